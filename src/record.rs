use chrono::{NaiveDate, NaiveDateTime};
use md5::{Digest, Md5};

use crate::models::Record;

pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"];

/// Serial of 10000-01-01.
const MAX_EXCEL_SERIAL: f64 = 2_958_466.0;

/// Uniqueness key of a record: MD5 over date, source, description, supplier,
/// supplier reference, POS operation and net amount. Absent fields count as
/// empty strings.
pub fn record_hash(record: &Record) -> String {
    fn part(v: &Option<String>) -> &str {
        v.as_deref().unwrap_or("")
    }
    let key = format!(
        "{}{}{}{}{}{}{:?}",
        record.date,
        record.source.key(),
        part(&record.description),
        part(&record.supplier),
        part(&record.supplier_ref),
        part(&record.pos_operation),
        record.net_amount,
    );
    let mut hasher = Md5::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Parse the date layouts found in supplier and POS exports into the
/// canonical `YYYY-MM-DD HH:MM:SS` form.
pub fn normalize_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.format(DATE_FORMAT).to_string());
        }
    }
    // Excel text cells sometimes carry fractional seconds.
    if let Some((head, _)) = raw.split_once('.') {
        if let Ok(dt) = NaiveDateTime::parse_from_str(head, "%Y-%m-%d %H:%M:%S") {
            return Some(dt.format(DATE_FORMAT).to_string());
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(raw, fmt) {
            return d.and_hms_opt(0, 0, 0).map(|dt| dt.format(DATE_FORMAT).to_string());
        }
    }
    None
}

/// Convert an Excel serial date (days since 1899-12-30, fraction = time of day).
/// Serials past 9999-12-31 (or non-finite/negative) give `None`.
pub fn excel_serial_to_datetime(serial: f64) -> Option<String> {
    if !serial.is_finite() || !(0.0..MAX_EXCEL_SERIAL).contains(&serial) {
        return None;
    }
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let days = chrono::Duration::try_days(serial.trunc() as i64)?;
    let seconds = chrono::Duration::try_seconds((serial.fract() * 86_400.0).round() as i64)?;
    let dt = base.checked_add_signed(days)?.checked_add_signed(seconds)?;
    Some(dt.format(DATE_FORMAT).to_string())
}

/// Parse a money amount written either the Italian way (`1.234,56`) or the
/// English way (`1,234.56`). Currency symbols and parenthesised negatives are
/// accepted.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let mut s: String = raw
        .chars()
        .filter(|c| !matches!(c, '€' | '$' | '"' | ' ' | '\u{a0}'))
        .collect();
    let mut negative = false;
    if let Some(inner) = s.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        negative = true;
        s = inner.to_string();
    }
    if s.is_empty() {
        return None;
    }

    let commas = s.matches(',').count();
    let dots = s.matches('.').count();
    let normalized = match (commas, dots) {
        (0, 0) => s,
        (0, 1) => s,
        (0, _) => s.replace('.', ""),
        (_, 0) => {
            let after = s.rsplit(',').next().map_or(0, str::len);
            if commas == 1 && after != 3 {
                s.replace(',', ".")
            } else {
                s.replace(',', "")
            }
        }
        _ => {
            let last_comma = s.rfind(',').unwrap_or(0);
            let last_dot = s.rfind('.').unwrap_or(0);
            if last_comma > last_dot {
                s.replace('.', "").replace(',', ".")
            } else {
                s.replace(',', "")
            }
        }
    };

    let value: f64 = normalized.parse().ok()?;
    Some(if negative { -value.abs() } else { value })
}

/// Render a spreadsheet number used as an identifier: integers lose the `.0`.
pub fn number_as_text(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}
