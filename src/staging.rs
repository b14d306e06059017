//! Temporary working set of imported transactions awaiting review.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, ErrorCode};
use tracing::{info, warn};

use crate::db::{db_size_mb, get_connection};
use crate::error::{BarflowError, Result};
use crate::models::{read_record, Record, RecordPatch, Source, StagedRecord, StoreStats, RECORD_COLUMNS};
use crate::record::record_hash;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS temporary_transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    date TEXT NOT NULL,
    source TEXT NOT NULL,
    description TEXT,
    supplier TEXT,
    supplier_ref TEXT,
    pos_operation TEXT,
    pos_gross REAL,
    pos_fee REAL,
    net_amount REAL NOT NULL,
    record_hash TEXT UNIQUE,
    created_at TEXT DEFAULT (datetime('now')),
    import_timestamp REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_temp_date ON temporary_transactions(date);
CREATE INDEX IF NOT EXISTS idx_temp_source ON temporary_transactions(source);
CREATE INDEX IF NOT EXISTS idx_temp_hash ON temporary_transactions(record_hash);
CREATE INDEX IF NOT EXISTS idx_temp_import_timestamp ON temporary_transactions(import_timestamp);

CREATE TABLE IF NOT EXISTS staged_files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    filename TEXT NOT NULL,
    checksum TEXT NOT NULL,
    source TEXT NOT NULL,
    record_count INTEGER NOT NULL DEFAULT 0,
    imported_at TEXT DEFAULT (datetime('now'))
);
";

/// True when the error is a UNIQUE/PRIMARY KEY violation.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == ErrorCode::ConstraintViolation
                && matches!(
                    e.extended_code,
                    rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                )
        }
        _ => false,
    }
}

#[derive(Debug, Clone)]
pub struct StagedFile {
    pub filename: String,
    pub checksum: String,
    pub source: Source,
    pub record_count: i64,
    pub imported_at: Option<String>,
}

pub struct Staging {
    path: PathBuf,
    conn: Connection,
}

impl Staging {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = get_connection(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            path: path.to_path_buf(),
            conn,
        })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Stage records under one import timestamp. Returns `(added, duplicates)`.
    pub fn add_records(&self, records: &[Record], import_timestamp: f64) -> Result<(usize, usize)> {
        let tx = self.conn.unchecked_transaction()?;
        let mut added = 0usize;
        let mut duplicates = 0usize;
        {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT INTO temporary_transactions ({RECORD_COLUMNS}, record_hash, import_timestamp) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ))?;
            for r in records {
                let result = stmt.execute(params![
                    r.date,
                    r.source,
                    r.description,
                    r.supplier,
                    r.supplier_ref,
                    r.pos_operation,
                    r.pos_gross,
                    r.pos_fee,
                    r.net_amount,
                    record_hash(r),
                    import_timestamp,
                ]);
                match result {
                    Ok(_) => added += 1,
                    Err(e) if is_unique_violation(&e) => duplicates += 1,
                    Err(e) => return Err(e.into()),
                }
            }
        }
        tx.commit()?;
        info!("Staged {added} transactions ({duplicates} duplicates skipped)");
        Ok((added, duplicates))
    }

    /// Everything staged, newest import first.
    pub fn list(&self) -> Result<Vec<StagedRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, {RECORD_COLUMNS}, import_timestamp FROM temporary_transactions \
             ORDER BY import_timestamp DESC, date DESC"
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok(StagedRecord {
                id: row.get(0)?,
                record: read_record(row, 1)?,
                import_timestamp: row.get(10)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn get(&self, id: i64) -> Result<StagedRecord> {
        self.conn
            .query_row(
                &format!(
                    "SELECT id, {RECORD_COLUMNS}, import_timestamp FROM temporary_transactions WHERE id = ?1"
                ),
                [id],
                |row| {
                    Ok(StagedRecord {
                        id: row.get(0)?,
                        record: read_record(row, 1)?,
                        import_timestamp: row.get(10)?,
                    })
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => BarflowError::UnknownRecord(id),
                other => other.into(),
            })
    }

    /// Edit a staged record in place; its hash follows the new content.
    pub fn update(&self, id: i64, patch: &RecordPatch) -> Result<StagedRecord> {
        let mut staged = self.get(id)?;
        patch.apply(&mut staged.record)?;
        let r = &staged.record;
        let result = self.conn.execute(
            "UPDATE temporary_transactions SET date = ?1, description = ?2, supplier = ?3, \
             supplier_ref = ?4, pos_operation = ?5, pos_gross = ?6, pos_fee = ?7, net_amount = ?8, \
             record_hash = ?9 WHERE id = ?10",
            params![
                r.date,
                r.description,
                r.supplier,
                r.supplier_ref,
                r.pos_operation,
                r.pos_gross,
                r.pos_fee,
                r.net_amount,
                record_hash(r),
                id,
            ],
        );
        match result {
            Ok(_) => Ok(staged),
            Err(e) if is_unique_violation(&e) => Err(BarflowError::DuplicateRecord),
            Err(e) => Err(e.into()),
        }
    }

    pub fn remove(&self, id: i64) -> Result<()> {
        let n = self
            .conn
            .execute("DELETE FROM temporary_transactions WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(BarflowError::UnknownRecord(id));
        }
        Ok(())
    }

    pub fn count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM temporary_transactions", [], |r| r.get(0))?)
    }

    /// Empty the working set, keeping the schema. Ids start again from 1.
    pub fn clear(&self) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM temporary_transactions", [])?;
        tx.execute("DELETE FROM staged_files", [])?;
        tx.execute(
            "DELETE FROM sqlite_sequence WHERE name IN ('temporary_transactions', 'staged_files')",
            [],
        )?;
        tx.commit()?;
        info!("Temporary database cleared");
        Ok(())
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let total = self.count()?;
        if total == 0 {
            return Ok(StoreStats {
                total_records: 0,
                date_range: None,
                db_size_mb: 0.0,
            });
        }
        let (min, max): (String, String) = self.conn.query_row(
            "SELECT MIN(date), MAX(date) FROM temporary_transactions",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        Ok(StoreStats {
            total_records: total,
            date_range: Some((min, max)),
            db_size_mb: db_size_mb(&self.path),
        })
    }

    /// Remember an imported file. A file staged again (forced re-import)
    /// keeps a single row, refreshed with the latest count.
    pub fn record_file(&self, filename: &str, checksum: &str, source: Source, count: usize) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE staged_files SET filename = ?1, source = ?3, record_count = ?4, \
             imported_at = datetime('now') WHERE checksum = ?2",
            params![filename, checksum, source, count as i64],
        )?;
        if updated == 0 {
            self.conn.execute(
                "INSERT INTO staged_files (filename, checksum, source, record_count) VALUES (?1, ?2, ?3, ?4)",
                params![filename, checksum, source, count as i64],
            )?;
        }
        Ok(())
    }

    pub fn has_file(&self, checksum: &str) -> Result<bool> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT 1 FROM staged_files WHERE checksum = ?1")?;
        Ok(stmt.exists([checksum])?)
    }

    pub fn staged_files(&self) -> Result<Vec<StagedFile>> {
        let mut stmt = self.conn.prepare(
            "SELECT filename, checksum, source, record_count, imported_at FROM staged_files ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(StagedFile {
                filename: row.get(0)?,
                checksum: row.get(1)?,
                source: row.get(2)?,
                record_count: row.get(3)?,
                imported_at: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}

pub fn database_exists(path: &Path) -> bool {
    path.exists()
}

/// Remove the staging database file and its WAL side files.
pub fn delete_database(path: &Path) -> Result<()> {
    let mut candidates = vec![path.to_path_buf()];
    for suffix in ["-wal", "-shm"] {
        let mut side = path.as_os_str().to_owned();
        side.push(suffix);
        candidates.push(PathBuf::from(side));
    }
    for file in candidates {
        match std::fs::remove_file(&file) {
            Ok(()) => info!("Deleted {}", file.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!("Could not delete {}: {e}", file.display());
                return Err(e.into());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_staging() -> (tempfile::TempDir, Staging) {
        let dir = tempfile::tempdir().unwrap();
        let staging = Staging::open(&dir.path().join("temp.db")).unwrap();
        (dir, staging)
    }

    fn supplier(date: &str, name: &str, amount: f64) -> Record {
        let mut r = Record::new(date, Source::Supplier, amount);
        r.supplier = Some(name.to_string());
        r
    }

    #[test]
    fn test_add_records_counts_duplicates() {
        let (_dir, staging) = test_staging();
        let a = supplier("2025-03-01 00:00:00", "Beverage World", -120.0);
        let b = supplier("2025-03-02 00:00:00", "Snack Masters", -45.5);
        let (added, dups) = staging.add_records(&[a.clone(), b, a.clone()], 1.0).unwrap();
        assert_eq!((added, dups), (2, 1));
        let (added, dups) = staging.add_records(&[a], 2.0).unwrap();
        assert_eq!((added, dups), (0, 1));
        assert_eq!(staging.count().unwrap(), 2);
    }

    #[test]
    fn test_list_orders_by_import_then_date() {
        let (_dir, staging) = test_staging();
        staging
            .add_records(
                &[
                    supplier("2025-03-01 00:00:00", "A", -1.0),
                    supplier("2025-03-05 00:00:00", "B", -2.0),
                ],
                100.0,
            )
            .unwrap();
        staging
            .add_records(&[supplier("2025-02-01 00:00:00", "C", -3.0)], 200.0)
            .unwrap();
        let listed = staging.list().unwrap();
        let suppliers: Vec<&str> = listed
            .iter()
            .map(|s| s.record.supplier.as_deref().unwrap())
            .collect();
        assert_eq!(suppliers, vec!["C", "B", "A"]);
        assert_eq!(listed[0].import_timestamp, 200.0);
    }

    #[test]
    fn test_update_recomputes_hash_and_rejects_collisions() {
        let (_dir, staging) = test_staging();
        staging
            .add_records(
                &[
                    supplier("2025-03-01 00:00:00", "A", -10.0),
                    supplier("2025-03-01 00:00:00", "A", -20.0),
                ],
                1.0,
            )
            .unwrap();
        let ids: Vec<i64> = staging.list().unwrap().iter().map(|s| s.id).collect();
        let first = *ids.iter().min().unwrap();
        let second = *ids.iter().max().unwrap();

        let patch = RecordPatch {
            net_amount: Some(-15.0),
            ..Default::default()
        };
        let updated = staging.update(first, &patch).unwrap();
        assert_eq!(updated.record.net_amount, -15.0);
        let hash: String = staging
            .conn()
            .query_row(
                "SELECT record_hash FROM temporary_transactions WHERE id = ?1",
                [first],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(hash, record_hash(&updated.record));

        let collide = RecordPatch {
            net_amount: Some(-20.0),
            ..Default::default()
        };
        assert!(matches!(staging.update(first, &collide), Err(BarflowError::DuplicateRecord)));
        assert_eq!(staging.get(second).unwrap().record.net_amount, -20.0);
    }

    #[test]
    fn test_get_and_remove_unknown_ids() {
        let (_dir, staging) = test_staging();
        assert!(matches!(staging.get(42), Err(BarflowError::UnknownRecord(42))));
        assert!(matches!(staging.remove(42), Err(BarflowError::UnknownRecord(42))));
    }

    #[test]
    fn test_clear_resets_ids() {
        let (_dir, staging) = test_staging();
        staging
            .add_records(&[supplier("2025-03-01 00:00:00", "A", -1.0)], 1.0)
            .unwrap();
        staging.record_file("a.xlsx", "abc", Source::Supplier, 1).unwrap();
        staging.clear().unwrap();
        assert_eq!(staging.count().unwrap(), 0);
        assert!(staging.staged_files().unwrap().is_empty());
        staging
            .add_records(&[supplier("2025-03-02 00:00:00", "B", -1.0)], 2.0)
            .unwrap();
        assert_eq!(staging.list().unwrap()[0].id, 1);
    }

    #[test]
    fn test_stats_empty_and_filled() {
        let (_dir, staging) = test_staging();
        let empty = staging.stats().unwrap();
        assert_eq!(empty.total_records, 0);
        assert_eq!(empty.date_range, None);
        assert_eq!(empty.db_size_mb, 0.0);

        staging
            .add_records(
                &[
                    supplier("2025-03-09 00:00:00", "A", -1.0),
                    supplier("2025-03-01 00:00:00", "B", -1.0),
                ],
                1.0,
            )
            .unwrap();
        let stats = staging.stats().unwrap();
        assert_eq!(stats.total_records, 2);
        assert_eq!(
            stats.date_range,
            Some(("2025-03-01 00:00:00".to_string(), "2025-03-09 00:00:00".to_string()))
        );
    }

    #[test]
    fn test_staged_files_bookkeeping() {
        let (_dir, staging) = test_staging();
        assert!(!staging.has_file("abc").unwrap());
        staging.record_file("pos.xlsx", "abc", Source::Pos, 12).unwrap();
        assert!(staging.has_file("abc").unwrap());
        let files = staging.staged_files().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].source, Source::Pos);
        assert_eq!(files[0].record_count, 12);
    }

    #[test]
    fn test_record_file_again_keeps_one_row() {
        let (_dir, staging) = test_staging();
        staging.record_file("pos.xlsx", "abc", Source::Pos, 12).unwrap();
        staging.record_file("pos (copy).xlsx", "abc", Source::Pos, 13).unwrap();
        let files = staging.staged_files().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename, "pos (copy).xlsx");
        assert_eq!(files[0].record_count, 13);
    }

    #[test]
    fn test_delete_database_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temp.db");
        {
            let staging = Staging::open(&path).unwrap();
            staging
                .add_records(&[supplier("2025-03-01 00:00:00", "A", -1.0)], 1.0)
                .unwrap();
        }
        assert!(database_exists(&path));
        delete_database(&path).unwrap();
        assert!(!database_exists(&path));
        // Deleting again is fine
        delete_database(&path).unwrap();
    }
}
