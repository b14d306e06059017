use colored::Colorize;

use crate::db::staging_path;
use crate::error::Result;
use crate::history::{commit_staging, History};
use crate::settings::load_settings;
use crate::staging::Staging;

pub fn run() -> Result<()> {
    let settings = load_settings();
    let staging = Staging::open(&staging_path(&settings))?;
    let history = History::open(&settings)?;

    let outcome = commit_staging(&staging, &history)?;
    println!(
        "{} {} transactions saved as {}",
        "Committed".green().bold(),
        outcome.saved,
        outcome.file_origin
    );
    if outcome.duplicates > 0 {
        println!("{} already in history, skipped", outcome.duplicates);
    }
    Ok(())
}
