use std::path::PathBuf;

use crate::db::staging_path;
use crate::error::{BarflowError, Result};
use crate::history::History;
use crate::importer::{get_by_key, import_file};
use crate::settings::load_settings;
use crate::staging::Staging;

pub fn run(kind: &str, file: &str, force: bool) -> Result<()> {
    let file_path = PathBuf::from(file);
    let settings = load_settings();
    let staging = Staging::open(&staging_path(&settings))?;
    let history = History::open(&settings)?;

    let importer = get_by_key(kind).ok_or_else(|| BarflowError::UnknownSource(kind.to_string()))?;
    let result = import_file(&staging, Some(&history), &file_path, importer, force)?;

    if result.duplicate_file {
        println!("This file has already been imported (duplicate checksum). Use --force to import it again.");
        return Ok(());
    }

    println!(
        "{} rows read, {} staged, {} skipped (duplicates)",
        result.parsed, result.imported, result.duplicates
    );
    if result.bad_dates > 0 {
        println!("{} rows dropped with an unreadable date", result.bad_dates);
    }
    println!("Review with `barflow staged list`, then `barflow commit`.");
    Ok(())
}
