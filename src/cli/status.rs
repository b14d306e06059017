use crate::db::{get_connection, history_path, migrator_for, staging_path};
use crate::error::Result;
use crate::history::History;
use crate::migrator::stored_version;
use crate::models::StoreStats;
use crate::settings::{load_settings, settings_file_exists};
use crate::staging::{database_exists, Staging};

fn print_stats(stats: &StoreStats) {
    println!("  Records:    {}", stats.total_records);
    if let Some((first, last)) = &stats.date_range {
        println!("  Date range: {first} .. {last}");
    }
    println!("  Size:       {:.2} MB", stats.db_size_mb);
}

pub fn run() -> Result<()> {
    let settings = load_settings();
    let history_db = history_path(&settings);
    let staging_db = staging_path(&settings);

    println!(
        "Settings:   {}",
        if settings_file_exists() { "saved" } else { "(defaults)" }
    );
    println!("Data dir:   {}", settings.data_path().display());
    println!(
        "Closed day: {}",
        settings
            .closed_day()?
            .map(|d| d.to_string())
            .unwrap_or_else(|| "(none)".to_string())
    );

    println!();
    println!("History:    {}", history_db.display());
    if history_db.exists() {
        let migrator = migrator_for(&settings, None)?;
        let conn = get_connection(&history_db)?;
        let version = match stored_version(&conn)? {
            Some(v) => format!("v{v}"),
            None => "unversioned".to_string(),
        };
        println!("  Schema:     {version} (latest v{})", migrator.latest_version());
        let pending = migrator.pending(&conn)?;
        if pending.is_empty() {
            print_stats(&History::open(&settings)?.stats()?);
        } else {
            for m in pending {
                println!("  Pending:    {} (v{})", m.name, m.version);
            }
            println!("  Run `barflow migrate` to upgrade.");
        }
    } else {
        println!("  Database not found. Run `barflow init` to set up.");
    }

    println!();
    println!("Staging:    {}", staging_db.display());
    if database_exists(&staging_db) {
        let staging = Staging::open(&staging_db)?;
        print_stats(&staging.stats()?);
        let files = staging.staged_files()?;
        if !files.is_empty() {
            println!("  Files:      {}", files.len());
        }
    } else {
        println!("  (empty)");
    }
    Ok(())
}
