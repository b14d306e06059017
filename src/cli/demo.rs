use chrono::{Datelike, Duration, Local, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::cli::parse_month_opt;
use crate::db::staging_path;
use crate::error::{BarflowError, Result};
use crate::importer::import_timestamp;
use crate::models::{Record, Source};
use crate::record::DATE_FORMAT;
use crate::settings::load_settings;
use crate::staging::Staging;

const SUPPLIERS: &[&str] = &[
    "Beverage World",
    "Snack Masters",
    "Party Supplies Co.",
    "Fresh Foods Inc.",
];

/// Product name and list price of what the till sells.
const POS_PRODUCTS: &[(&str, f64)] = &[
    ("Caffè", 1.20),
    ("Cappuccino", 1.80),
    ("Cornetto", 1.50),
    ("Panino", 5.50),
    ("Insalata", 7.00),
    ("Coca-Cola", 2.50),
    ("Acqua", 1.00),
    ("Birra", 4.00),
    ("Aperitivo", 8.00),
    ("Tramezzino", 3.50),
];

/// Card processor commission on each POS sale.
const POS_FEE_RATE: f64 = 0.0095;

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn days_in_month(start: NaiveDate) -> u32 {
    let next = start + chrono::Months::new(1);
    (next - start).num_days() as u32
}

/// One month of supplier orders (1-3 a week) and POS sales, skipping sales
/// on the closed weekday.
fn generate_transactions(start: NaiveDate, closed: Option<Weekday>, rng: &mut StdRng) -> Vec<Record> {
    let days = days_in_month(start);
    let mut records = Vec::new();

    // Supplier orders, costed from 2-8 lines each.
    let mut order_no = 1u32;
    let mut week_start = 0u32;
    while week_start < days {
        for _ in 0..rng.gen_range(1..=3) {
            let offset = (week_start + rng.gen_range(0..=4)).min(days - 1);
            let date = start + Duration::days(offset as i64);
            let lines = rng.gen_range(2..=8);
            let total: f64 = (0..lines)
                .map(|_| (rng.gen_range(1..=10u32) * 10) as f64 * round2(rng.gen_range(0.5..15.0)))
                .sum();
            let mut record = Record::new(
                format!("{} 00:00:00", date.format("%Y-%m-%d")),
                Source::Supplier,
                -round2(total),
            );
            record.supplier = SUPPLIERS.choose(rng).map(|s| s.to_string());
            record.supplier_ref = Some(format!("{}{:03}", date.format("%Y%m"), order_no));
            record.description = Some(format!("{lines} items"));
            records.push(record);
            order_no += 1;
        }
        week_start += 7;
    }

    // POS sales, busier at the weekend.
    let mut operation = 1u32;
    for offset in 0..days {
        let date = start + Duration::days(offset as i64);
        if Some(date.weekday()) == closed {
            continue;
        }
        let sales = match date.weekday() {
            Weekday::Sat | Weekday::Sun => rng.gen_range(150..=300),
            _ => rng.gen_range(50..=150),
        };
        for _ in 0..sales {
            let (product, price) = POS_PRODUCTS[rng.gen_range(0..POS_PRODUCTS.len())];
            let quantity = rng.gen_range(1..=3u32) as f64;
            let gross = round2((price + rng.gen_range(-0.1..0.1)) * quantity);
            let fee = round2(gross * POS_FEE_RATE);
            let Some(time) = date.and_hms_opt(
                rng.gen_range(7..=22),
                rng.gen_range(0..=59),
                rng.gen_range(0..=59),
            ) else {
                continue;
            };
            let mut record = Record::new(time.format(DATE_FORMAT).to_string(), Source::Pos, round2(gross - fee));
            record.pos_operation = Some(format!("{operation:06}"));
            record.pos_gross = Some(gross);
            record.pos_fee = Some(fee);
            record.description = Some(format!("{} x{}", product, quantity as u32));
            records.push(record);
            operation += 1;
        }
    }
    records
}

fn month_start(month: Option<&str>) -> Result<NaiveDate> {
    match month {
        Some(m) => {
            let (year, mon) = parse_month_opt(&Some(m.to_string()));
            year.zip(mon)
                .and_then(|(y, mo)| NaiveDate::from_ymd_opt(y, mo, 1))
                .ok_or_else(|| BarflowError::InvalidDate(m.to_string()))
        }
        None => {
            let today = Local::now().date_naive();
            NaiveDate::from_ymd_opt(today.year(), today.month(), 1)
                .ok_or_else(|| BarflowError::InvalidDate(today.to_string()))
        }
    }
}

pub fn run(month: Option<&str>, seed: Option<u64>) -> Result<()> {
    let settings = load_settings();
    let start = month_start(month)?;
    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };

    let records = generate_transactions(start, settings.closed_day()?, &mut rng);
    let suppliers = records.iter().filter(|r| r.source == Source::Supplier).count();
    let sales = records.len() - suppliers;

    let staging = Staging::open(&staging_path(&settings))?;
    let (added, duplicates) = staging.add_records(&records, import_timestamp())?;

    println!("Demo data staged for {}", start.format("%Y-%m"));
    println!("  Supplier orders: {suppliers}");
    println!("  POS sales:       {sales}");
    println!("  Staged:          {added} ({duplicates} already present)");
    println!();
    println!("Try these next:");
    println!("  barflow staged stats");
    println!("  barflow report summary --staged");
    println!("  barflow commit");

    Ok(())
}
