use std::io::Write;
use std::path::PathBuf;

use crate::cli::FilterArgs;
use crate::error::Result;
use crate::fmt::{day_first, opt};
use crate::history::History;
use crate::models::HistoricalRecord;
use crate::settings::{get_data_dir, load_settings};

fn default_path() -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();
    get_data_dir()
        .join("exports")
        .join(format!("barflow-{stamp}.csv"))
}

fn amount(v: Option<f64>) -> String {
    v.map(|a| format!("{a:.2}")).unwrap_or_default()
}

/// Write records as CSV: day-first dates, two-decimal amounts.
pub(crate) fn write_csv<W: Write>(rows: &[HistoricalRecord], out: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(out);
    wtr.write_record([
        "Date",
        "Source",
        "Supplier",
        "Supplier ref",
        "Description",
        "POS operation",
        "Gross",
        "Fee",
        "Net",
        "Origin",
    ])?;
    for h in rows {
        let r = &h.record;
        wtr.write_record([
            day_first(&r.date),
            r.source.key().to_string(),
            opt(&r.supplier).to_string(),
            opt(&r.supplier_ref).to_string(),
            opt(&r.description).to_string(),
            opt(&r.pos_operation).to_string(),
            amount(r.pos_gross),
            amount(r.pos_fee),
            format!("{:.2}", r.net_amount),
            opt(&h.file_origin).to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn run(output: Option<String>, filter: &FilterArgs) -> Result<()> {
    let filter = filter.to_filter()?;
    let rows = History::open(&load_settings())?.query(&filter)?;

    let path = output.map(PathBuf::from).unwrap_or_else(default_path);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = std::fs::File::create(&path)?;
    write_csv(&rows, file)?;
    println!("Wrote {} transactions to {}", rows.len(), path.display());
    Ok(())
}
