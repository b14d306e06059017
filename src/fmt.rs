/// Format a float as a euro amount with thousands separators: 1,234.56 €
pub fn money(val: f64) -> String {
    let negative = val < 0.0 && (val * 100.0).round() != 0.0;
    let abs = val.abs();
    let cents = format!("{:.2}", abs);
    let (int_part, dec_part) = cents.split_once('.').unwrap_or((&cents, "00"));

    let mut with_commas = String::new();
    for (i, c) in int_part.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            with_commas.push(',');
        }
        with_commas.push(c);
    }
    let with_commas: String = with_commas.chars().rev().collect();

    if negative {
        format!("-{with_commas}.{dec_part} €")
    } else {
        format!("{with_commas}.{dec_part} €")
    }
}

/// `YYYY-MM-DD HH:MM:SS` shown as `DD-MM-YYYY`.
pub fn day_first(date: &str) -> String {
    match chrono::NaiveDate::parse_from_str(date.get(..10).unwrap_or(date), "%Y-%m-%d") {
        Ok(d) => d.format("%d-%m-%Y").to_string(),
        Err(_) => date.to_string(),
    }
}

pub fn opt(v: &Option<String>) -> &str {
    v.as_deref().unwrap_or("")
}
