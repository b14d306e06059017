use std::path::Path;

use colored::Colorize;

use crate::db::{history_path, migrator_for, open_history};
use crate::error::Result;
use crate::settings::load_settings;

pub fn run(dir: Option<&str>) -> Result<()> {
    let settings = load_settings();
    let migrator = migrator_for(&settings, dir.map(Path::new))?;
    let template = settings.template_db.as_deref().map(Path::new);
    let (_conn, report) = open_history(&history_path(&settings), template, &migrator)?;

    if report.applied.is_empty() {
        println!("Schema is up to date (v{}).", report.to_version);
        return Ok(());
    }
    for (version, name) in &report.applied {
        println!("  {} {name} (v{version})", "applied".green());
    }
    println!(
        "Schema upgraded from v{} to v{}.",
        report.from_version, report.to_version
    );
    Ok(())
}
