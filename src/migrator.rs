//! Numbered schema migrations for the historical database.
//!
//! The applied version lives in the single-row `_schema_version` table. Each
//! pending migration runs in its own transaction together with the version
//! bump, so a failure leaves the database at the last good version.

use std::path::Path;

use regex::Regex;
use rusqlite::{params, Connection};
use tracing::{debug, error, info, warn};

use crate::error::{BarflowError, Result};
use crate::models::{read_record, Record, RECORD_COLUMNS};
use crate::record::record_hash;

/// A code migration receives the open transaction.
pub type UpgradeFn = fn(&Connection) -> Result<()>;

pub enum MigrationKind {
    Sql(String),
    Code(UpgradeFn),
}

pub struct Migration {
    pub version: u32,
    pub name: String,
    pub kind: MigrationKind,
}

impl Migration {
    pub fn sql(version: u32, name: &str, sql: &str) -> Self {
        Self {
            version,
            name: name.to_string(),
            kind: MigrationKind::Sql(sql.to_string()),
        }
    }

    pub fn code(version: u32, name: &str, upgrade: UpgradeFn) -> Self {
        Self {
            version,
            name: name.to_string(),
            kind: MigrationKind::Code(upgrade),
        }
    }
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            MigrationKind::Sql(_) => "sql",
            MigrationKind::Code(_) => "code",
        };
        f.debug_struct("Migration")
            .field("version", &self.version)
            .field("name", &self.name)
            .field("kind", &kind)
            .finish()
    }
}

/// Migrations compiled into the binary.
pub fn builtin() -> Vec<Migration> {
    vec![
        Migration::sql(
            1,
            "initial_schema",
            include_str!("../migrations/001_initial_schema.sql"),
        ),
        Migration::sql(
            2,
            "imported_files",
            include_str!("../migrations/002_imported_files.sql"),
        ),
        Migration::code(3, "backfill_record_hash", backfill_record_hash),
    ]
}

/// Discover `NNN_name.sql` files in `dir`. Script migrations written for
/// other runtimes (`.py`) are reported and skipped.
pub fn load_dir(dir: &Path) -> Result<Vec<Migration>> {
    if !dir.is_dir() {
        warn!("No migration scripts found in {}", dir.display());
        return Ok(Vec::new());
    }
    let pattern = Regex::new(r"^(\d+)_([A-Za-z0-9_]+)\.(py|sql)$").expect("static regex");

    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        let Some(caps) = pattern.captures(file_name) else {
            debug!("Ignoring {file_name}: not a migration file name");
            continue;
        };
        let Ok(version) = caps[1].parse::<u32>() else {
            warn!("Ignoring {file_name}: version out of range");
            continue;
        };
        let name = &caps[2];
        if &caps[3] == "py" {
            warn!("Skipping {file_name}: Python migrations are not supported");
            continue;
        }
        let sql = std::fs::read_to_string(entry.path())?;
        found.push(Migration::sql(version, name, &sql));
    }
    found.sort_by_key(|m| m.version);
    Ok(found)
}

fn ensure_version_table(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS _schema_version (version INTEGER)")?;
    Ok(())
}

/// Schema version as stored, without creating anything. `None` when the
/// database has never been versioned.
pub fn stored_version(conn: &Connection) -> Result<Option<u32>> {
    let has_table = conn
        .prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = '_schema_version'")?
        .exists([])?;
    if !has_table {
        return Ok(None);
    }
    let version: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM _schema_version", [], |r| r.get(0))?;
    Ok(version.map(|v| u32::try_from(v).unwrap_or(0)))
}

/// Current schema version; initialises the version table at 0 when absent.
pub fn current_version(conn: &Connection) -> Result<u32> {
    ensure_version_table(conn)?;
    let version: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM _schema_version", [], |r| r.get(0))?;
    match version {
        Some(v) => Ok(u32::try_from(v).unwrap_or(0)),
        None => {
            conn.execute("INSERT INTO _schema_version (version) VALUES (0)", [])?;
            Ok(0)
        }
    }
}

fn set_version(conn: &Connection, version: u32) -> Result<()> {
    conn.execute("DELETE FROM _schema_version", [])?;
    conn.execute(
        "INSERT INTO _schema_version (version) VALUES (?1)",
        params![version],
    )?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct MigrationReport {
    pub from_version: u32,
    pub to_version: u32,
    pub applied: Vec<(u32, String)>,
}

pub struct Migrator {
    migrations: Vec<Migration>,
}

impl Migrator {
    pub fn new(mut migrations: Vec<Migration>) -> Self {
        migrations.sort_by_key(|m| m.version);
        Self { migrations }
    }

    pub fn with_builtin() -> Self {
        Self::new(builtin())
    }

    pub fn extend(&mut self, more: Vec<Migration>) {
        self.migrations.extend(more);
        self.migrations.sort_by_key(|m| m.version);
    }

    pub fn latest_version(&self) -> u32 {
        self.migrations.last().map_or(0, |m| m.version)
    }

    fn check_unique_versions(&self) -> Result<()> {
        for pair in self.migrations.windows(2) {
            if pair[0].version == pair[1].version {
                return Err(BarflowError::DuplicateMigration {
                    version: pair[0].version,
                    first: pair[0].name.clone(),
                    second: pair[1].name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Migrations newer than the stored version. Read-only.
    pub fn pending(&self, conn: &Connection) -> Result<Vec<&Migration>> {
        let current = stored_version(conn)?.unwrap_or(0);
        Ok(self
            .migrations
            .iter()
            .filter(|m| m.version > current)
            .collect())
    }

    /// Apply every migration newer than the stored version, in order.
    pub fn apply(&self, conn: &Connection) -> Result<MigrationReport> {
        self.check_unique_versions()?;
        let from_version = current_version(conn)?;
        let mut current = from_version;
        let mut applied = Vec::new();

        for migration in &self.migrations {
            if migration.version <= current {
                continue;
            }
            info!("Applying migration: {} (v{})", migration.name, migration.version);

            let tx = conn.unchecked_transaction()?;
            let outcome = match &migration.kind {
                MigrationKind::Sql(sql) => tx.execute_batch(sql).map_err(BarflowError::from),
                MigrationKind::Code(upgrade) => upgrade(&tx),
            }
            .and_then(|()| set_version(&tx, migration.version));

            match outcome {
                Ok(()) => tx.commit()?,
                Err(e) => {
                    tx.rollback()?;
                    error!("Error applying migration {}: {e}", migration.name);
                    return Err(BarflowError::MigrationFailed {
                        version: migration.version,
                        name: migration.name.clone(),
                        message: e.to_string(),
                    });
                }
            }
            current = migration.version;
            applied.push((migration.version, migration.name.clone()));
            info!("Successfully applied migration: {}", migration.name);
        }

        info!("Database schema up-to-date (version {current})");
        Ok(MigrationReport {
            from_version,
            to_version: current,
            applied,
        })
    }
}

/// Give legacy rows (copied from seed databases) a record hash. A row whose
/// hash already exists is a duplicate and is removed.
fn backfill_record_hash(conn: &Connection) -> Result<()> {
    let rows: Vec<(i64, Record)> = {
        let mut stmt = conn.prepare(&format!(
            "SELECT id, {RECORD_COLUMNS} FROM transactions WHERE record_hash IS NULL ORDER BY id"
        ))?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, read_record(row, 1)?)))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()?
    };

    let mut filled = 0usize;
    let mut removed = 0usize;
    for (id, record) in rows {
        let hash = record_hash(&record);
        let taken = conn
            .prepare_cached("SELECT 1 FROM transactions WHERE record_hash = ?1")?
            .exists([&hash])?;
        if taken {
            conn.execute("DELETE FROM transactions WHERE id = ?1", [id])?;
            removed += 1;
        } else {
            conn.execute(
                "UPDATE transactions SET record_hash = ?1 WHERE id = ?2",
                params![hash, id],
            )?;
            filled += 1;
        }
    }
    if filled + removed > 0 {
        info!("Backfilled {filled} record hashes, removed {removed} duplicates");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::get_connection;

    fn test_db() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = get_connection(&dir.path().join("history.db")).unwrap();
        (dir, conn)
    }

    fn table_names(conn: &Connection) -> Vec<String> {
        conn.prepare("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap()
    }

    fn version_rows(conn: &Connection) -> i64 {
        conn.query_row("SELECT count(*) FROM _schema_version", [], |r| r.get(0)).unwrap()
    }

    #[test]
    fn test_fresh_database_starts_at_zero() {
        let (_dir, conn) = test_db();
        assert_eq!(current_version(&conn).unwrap(), 0);
        assert_eq!(version_rows(&conn), 1);
        // Reading again does not add rows
        assert_eq!(current_version(&conn).unwrap(), 0);
        assert_eq!(version_rows(&conn), 1);
    }

    #[test]
    fn test_stored_version_does_not_write() {
        let (_dir, conn) = test_db();
        assert_eq!(stored_version(&conn).unwrap(), None);
        assert_eq!(Migrator::with_builtin().pending(&conn).unwrap().len(), 3);
        let tables: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE name = '_schema_version'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(tables, 0);

        Migrator::with_builtin().apply(&conn).unwrap();
        assert_eq!(stored_version(&conn).unwrap(), Some(3));
    }

    #[test]
    fn test_builtin_migrations_apply_in_order() {
        let (_dir, conn) = test_db();
        let report = Migrator::with_builtin().apply(&conn).unwrap();
        assert_eq!(report.from_version, 0);
        assert_eq!(report.to_version, 3);
        let names: Vec<&str> = report.applied.iter().map(|(_, n)| n.as_str()).collect();
        assert_eq!(names, vec!["initial_schema", "imported_files", "backfill_record_hash"]);
        let tables = table_names(&conn);
        for expected in ["transactions", "imported_files", "_schema_version"] {
            assert!(tables.contains(&expected.to_string()), "missing table: {expected}");
        }
        assert_eq!(current_version(&conn).unwrap(), 3);
        assert_eq!(version_rows(&conn), 1);
    }

    #[test]
    fn test_apply_is_idempotent() {
        let (_dir, conn) = test_db();
        let migrator = Migrator::with_builtin();
        migrator.apply(&conn).unwrap();
        let again = migrator.apply(&conn).unwrap();
        assert!(again.applied.is_empty());
        assert_eq!(again.from_version, 3);
        assert_eq!(again.to_version, 3);
        assert!(migrator.pending(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_only_newer_migrations_run() {
        let (_dir, conn) = test_db();
        Migrator::with_builtin().apply(&conn).unwrap();
        let mut migrator = Migrator::with_builtin();
        migrator.extend(vec![Migration::sql(
            5,
            "add_notes",
            "ALTER TABLE transactions ADD COLUMN notes TEXT;",
        )]);
        assert_eq!(migrator.pending(&conn).unwrap().len(), 1);
        let report = migrator.apply(&conn).unwrap();
        assert_eq!(report.applied, vec![(5, "add_notes".to_string())]);
        assert_eq!(current_version(&conn).unwrap(), 5);
        conn.execute("UPDATE transactions SET notes = 'x'", []).unwrap();
    }

    #[test]
    fn test_failed_migration_rolls_back_and_keeps_previous_version() {
        let (_dir, conn) = test_db();
        let migrator = Migrator::new(vec![
            Migration::sql(1, "create_a", "CREATE TABLE a (x INTEGER);"),
            Migration::sql(
                2,
                "broken",
                "CREATE TABLE b (x INTEGER); INSERT INTO missing_table VALUES (1);",
            ),
            Migration::sql(3, "create_c", "CREATE TABLE c (x INTEGER);"),
        ]);
        let err = migrator.apply(&conn).unwrap_err();
        match err {
            BarflowError::MigrationFailed { version, name, .. } => {
                assert_eq!(version, 2);
                assert_eq!(name, "broken");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(current_version(&conn).unwrap(), 1);
        let tables = table_names(&conn);
        assert!(tables.contains(&"a".to_string()));
        assert!(!tables.contains(&"b".to_string()));
        assert!(!tables.contains(&"c".to_string()));
    }

    #[test]
    fn test_duplicate_versions_are_rejected_before_applying() {
        let (_dir, conn) = test_db();
        let migrator = Migrator::new(vec![
            Migration::sql(1, "first", "CREATE TABLE first (x INTEGER);"),
            Migration::sql(1, "second", "CREATE TABLE second (x INTEGER);"),
        ]);
        let err = migrator.apply(&conn).unwrap_err();
        assert!(matches!(err, BarflowError::DuplicateMigration { version: 1, .. }));
        assert!(!table_names(&conn).contains(&"first".to_string()));
    }

    #[test]
    fn test_code_migration_runs_inside_transaction() {
        fn failing(conn: &Connection) -> Result<()> {
            conn.execute_batch("CREATE TABLE half_done (x INTEGER);")?;
            Err(BarflowError::Settings("boom".to_string()))
        }
        let (_dir, conn) = test_db();
        let migrator = Migrator::new(vec![Migration::code(1, "failing", failing)]);
        assert!(migrator.apply(&conn).is_err());
        assert!(!table_names(&conn).contains(&"half_done".to_string()));
        assert_eq!(current_version(&conn).unwrap(), 0);
    }

    #[test]
    fn test_load_dir_reads_numbered_sql_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("010_add_notes.sql"), "SELECT 1;").unwrap();
        std::fs::write(dir.path().join("004_seed.sql"), "SELECT 2;").unwrap();
        std::fs::write(dir.path().join("005_legacy.py"), "def upgrade(c): pass").unwrap();
        std::fs::write(dir.path().join("README.md"), "docs").unwrap();
        std::fs::write(dir.path().join("bad-name.sql"), "SELECT 3;").unwrap();
        let found = load_dir(dir.path()).unwrap();
        let versions: Vec<(u32, &str)> = found.iter().map(|m| (m.version, m.name.as_str())).collect();
        assert_eq!(versions, vec![(4, "seed"), (10, "add_notes")]);
    }

    #[test]
    fn test_load_dir_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let found = load_dir(&dir.path().join("nope")).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_backfill_hashes_legacy_rows_and_drops_duplicates() {
        let (_dir, conn) = test_db();
        Migrator::new(vec![Migration::sql(
            1,
            "initial_schema",
            include_str!("../migrations/001_initial_schema.sql"),
        )])
        .apply(&conn)
        .unwrap();
        for _ in 0..2 {
            conn.execute(
                "INSERT INTO transactions (date, source, supplier, net_amount) \
                 VALUES ('2025-03-01 00:00:00', 'supplier', 'Beverage World', -80.0)",
                [],
            )
            .unwrap();
        }
        conn.execute(
            "INSERT INTO transactions (date, source, net_amount) VALUES ('2025-03-02 00:00:00', 'pos', 12.0)",
            [],
        )
        .unwrap();

        Migrator::with_builtin().apply(&conn).unwrap();

        let total: i64 = conn.query_row("SELECT count(*) FROM transactions", [], |r| r.get(0)).unwrap();
        let unhashed: i64 = conn
            .query_row("SELECT count(*) FROM transactions WHERE record_hash IS NULL", [], |r| r.get(0))
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(unhashed, 0);
    }
}
