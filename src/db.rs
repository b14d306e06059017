use std::path::{Path, PathBuf};

use rusqlite::Connection;
use tracing::info;

use crate::error::Result;
use crate::migrator::{self, MigrationReport, Migrator};
use crate::settings::Settings;

pub const HISTORY_DB: &str = "barflow_history.db";
pub const STAGING_DB: &str = "temporary_transactions.db";

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn history_path(settings: &Settings) -> PathBuf {
    settings.data_path().join(HISTORY_DB)
}

pub fn staging_path(settings: &Settings) -> PathBuf {
    settings.data_path().join(STAGING_DB)
}

/// Built-in migrations plus any from the configured migrations directory.
pub fn migrator_for(settings: &Settings, extra_dir: Option<&Path>) -> Result<Migrator> {
    let mut migrator = Migrator::with_builtin();
    if let Some(dir) = settings.migrations_dir.as_deref() {
        migrator.extend(migrator::load_dir(Path::new(dir))?);
    }
    if let Some(dir) = extra_dir {
        migrator.extend(migrator::load_dir(dir)?);
    }
    Ok(migrator)
}

/// Open the historical database at `db_path`, seeding it from `template` when
/// the file does not exist yet, and bring its schema up to date.
pub fn open_history(
    db_path: &Path,
    template: Option<&Path>,
    migrator: &Migrator,
) -> Result<(Connection, MigrationReport)> {
    info!("Database path: {}", db_path.display());
    if !db_path.exists() {
        match template {
            Some(t) if t.is_file() => {
                if let Some(parent) = db_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                info!("Copying initial database from template {}", t.display());
                std::fs::copy(t, db_path)?;
            }
            _ => info!("Database not found, creating an empty one"),
        }
    }
    let conn = get_connection(db_path)?;
    let report = migrator.apply(&conn)?;
    Ok((conn, report))
}

/// Open the configured historical database, migrated.
pub fn history_connection(settings: &Settings) -> Result<Connection> {
    let migrator = migrator_for(settings, None)?;
    let template = settings.template_db.as_deref().map(Path::new);
    let (conn, _) = open_history(&history_path(settings), template, &migrator)?;
    Ok(conn)
}

/// File size in megabytes, rounded to two decimals. Missing files are 0.
pub fn db_size_mb(path: &Path) -> f64 {
    let bytes = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    (bytes as f64 / 1024.0 / 1024.0 * 100.0).round() / 100.0
}
