//! Committed transactions, kept for reporting.

use std::path::{Path, PathBuf};

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Transaction};
use tracing::info;

use crate::db::{db_size_mb, history_connection, history_path};
use crate::error::{BarflowError, Result};
use crate::models::{read_record, HistoricalRecord, Record, Source, StoreStats, RECORD_COLUMNS};
use crate::record::record_hash;
use crate::settings::Settings;
use crate::staging::{is_unique_violation, StagedFile, Staging};

pub struct History {
    path: PathBuf,
    conn: Connection,
}

/// Selection over historical records. Unset fields do not constrain.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    /// `YYYY`, `YYYY-MM` or `YYYY-MM-DD` prefix of the date.
    pub date: Option<String>,
    /// Inclusive first day, `YYYY-MM-DD`.
    pub from: Option<String>,
    /// Inclusive last day, `YYYY-MM-DD`.
    pub to: Option<String>,
    pub source: Option<Source>,
    pub supplier: Option<String>,
    pub description: Option<String>,
    pub min_amount: Option<f64>,
    pub max_amount: Option<f64>,
    pub limit: Option<usize>,
}

impl Filter {
    /// True when no condition is set. `limit` alone does not count.
    pub fn is_empty(&self) -> bool {
        self.date.is_none()
            && self.from.is_none()
            && self.to.is_none()
            && self.source.is_none()
            && self.supplier.is_none()
            && self.description.is_none()
            && self.min_amount.is_none()
            && self.max_amount.is_none()
    }

    fn where_clause(&self) -> (String, Vec<Value>) {
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        if let Some(prefix) = &self.date {
            clauses.push("date LIKE ?");
            values.push(Value::Text(format!("{prefix}%")));
        }
        if let Some(from) = &self.from {
            clauses.push("substr(date, 1, 10) >= ?");
            values.push(Value::Text(from.clone()));
        }
        if let Some(to) = &self.to {
            clauses.push("substr(date, 1, 10) <= ?");
            values.push(Value::Text(to.clone()));
        }
        if let Some(source) = self.source {
            clauses.push("source = ?");
            values.push(Value::Text(source.key().to_string()));
        }
        if let Some(supplier) = &self.supplier {
            clauses.push("supplier LIKE ?");
            values.push(Value::Text(format!("%{supplier}%")));
        }
        if let Some(description) = &self.description {
            clauses.push("description LIKE ?");
            values.push(Value::Text(format!("%{description}%")));
        }
        if let Some(min) = self.min_amount {
            clauses.push("net_amount >= ?");
            values.push(Value::Real(min));
        }
        if let Some(max) = self.max_amount {
            clauses.push("net_amount <= ?");
            values.push(Value::Real(max));
        }
        if clauses.is_empty() {
            ("1 = 1".to_string(), values)
        } else {
            (clauses.join(" AND "), values)
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommitOutcome {
    pub saved: usize,
    pub duplicates: usize,
    pub file_origin: String,
    pub files: usize,
}

fn map_historical(row: &rusqlite::Row<'_>) -> rusqlite::Result<HistoricalRecord> {
    Ok(HistoricalRecord {
        id: row.get(0)?,
        record: read_record(row, 1)?,
        file_origin: row.get(10)?,
    })
}

impl History {
    /// Open (creating and migrating if needed) the configured historical database.
    pub fn open(settings: &Settings) -> Result<Self> {
        Ok(Self {
            path: history_path(settings),
            conn: history_connection(settings)?,
        })
    }

    /// Wrap an already migrated connection.
    #[cfg(test)]
    pub fn from_connection(path: &Path, conn: Connection) -> Self {
        Self {
            path: path.to_path_buf(),
            conn,
        }
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Store records under `file_origin`. Returns `(saved, duplicates)`.
    pub fn save_records(&self, records: &[Record], file_origin: &str) -> Result<(usize, usize)> {
        let tx = self.conn.unchecked_transaction()?;
        let counts = insert_records(&tx, records, file_origin)?;
        tx.commit()?;
        info!(
            "Saved {} transactions to history ({} duplicates skipped)",
            counts.0, counts.1
        );
        Ok(counts)
    }

    /// Store a staging session: its records and the files they came from,
    /// all or nothing. Files already listed in `imported_files` are not
    /// listed twice.
    pub fn save_session(
        &self,
        records: &[Record],
        file_origin: &str,
        files: &[StagedFile],
    ) -> Result<(usize, usize)> {
        let tx = self.conn.unchecked_transaction()?;
        let counts = insert_records(&tx, records, file_origin)?;
        for f in files {
            record_imported_file(&tx, f)?;
        }
        tx.commit()?;
        Ok(counts)
    }

    #[allow(dead_code)]
    pub fn load_all(&self) -> Result<Vec<HistoricalRecord>> {
        self.query(&Filter::default())
    }

    /// Records whose calendar day lies in `start..=end` (`YYYY-MM-DD`).
    #[allow(dead_code)]
    pub fn load_period(&self, start: &str, end: &str) -> Result<Vec<HistoricalRecord>> {
        self.query(&Filter {
            from: Some(start.to_string()),
            to: Some(end.to_string()),
            ..Default::default()
        })
    }

    pub fn query(&self, filter: &Filter) -> Result<Vec<HistoricalRecord>> {
        let (clause, values) = filter.where_clause();
        let limit = filter
            .limit
            .map(|n| format!(" LIMIT {n}"))
            .unwrap_or_default();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, {RECORD_COLUMNS}, file_origin FROM transactions \
             WHERE {clause} ORDER BY date DESC, id DESC{limit}"
        ))?;
        let rows = stmt.query_map(params_from_iter(values.iter()), map_historical)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn count_matching(&self, filter: &Filter) -> Result<i64> {
        let (clause, values) = filter.where_clause();
        Ok(self.conn.query_row(
            &format!("SELECT COUNT(*) FROM transactions WHERE {clause}"),
            params_from_iter(values.iter()),
            |r| r.get(0),
        )?)
    }

    /// Delete what `filter` selects. An empty filter is refused; use `clear_all`.
    pub fn delete_matching(&self, filter: &Filter) -> Result<usize> {
        if filter.is_empty() {
            return Err(BarflowError::EmptyFilter);
        }
        let (clause, values) = filter.where_clause();
        let n = self.conn.execute(
            &format!("DELETE FROM transactions WHERE {clause}"),
            params_from_iter(values.iter()),
        )?;
        info!("Deleted {n} historical transactions");
        Ok(n)
    }

    pub fn clear_all(&self) -> Result<usize> {
        let n = self.conn.execute("DELETE FROM transactions", [])?;
        info!("Cleared historical database ({n} transactions)");
        Ok(n)
    }

    pub fn delete(&self, id: i64) -> Result<bool> {
        let n = self.conn.execute("DELETE FROM transactions WHERE id = ?1", [id])?;
        Ok(n > 0)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let total: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM transactions", [], |r| r.get(0))?;
        if total == 0 {
            return Ok(StoreStats {
                total_records: 0,
                date_range: None,
                db_size_mb: 0.0,
            });
        }
        let range: (String, String) = self.conn.query_row(
            "SELECT MIN(date), MAX(date) FROM transactions",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        Ok(StoreStats {
            total_records: total,
            date_range: Some(range),
            db_size_mb: db_size_mb(&self.path),
        })
    }

    pub fn has_file(&self, checksum: &str) -> Result<bool> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT 1 FROM imported_files WHERE checksum = ?1")?;
        Ok(stmt.exists([checksum])?)
    }
}

fn insert_records(tx: &Transaction, records: &[Record], file_origin: &str) -> Result<(usize, usize)> {
    let mut saved = 0usize;
    let mut duplicates = 0usize;
    let mut stmt = tx.prepare_cached(&format!(
        "INSERT INTO transactions ({RECORD_COLUMNS}, record_hash, file_origin) \
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
            file_origin,
        ]);
        match result {
            Ok(_) => saved += 1,
            Err(e) if is_unique_violation(&e) => duplicates += 1,
            Err(e) => return Err(e.into()),
        }
    }
    Ok((saved, duplicates))
}

fn record_imported_file(tx: &Transaction, file: &StagedFile) -> Result<()> {
    tx.execute(
        "INSERT INTO imported_files (filename, checksum, source, record_count, imported_at) \
         SELECT ?1, ?2, ?3, ?4, COALESCE(?5, datetime('now')) \
         WHERE NOT EXISTS (SELECT 1 FROM imported_files WHERE checksum = ?2)",
        params![
            file.filename,
            file.checksum,
            file.source,
            file.record_count,
            file.imported_at
        ],
    )?;
    Ok(())
}

/// Move everything staged into history and empty the staging area.
pub fn commit_staging(staging: &Staging, history: &History) -> Result<CommitOutcome> {
    let staged = staging.list()?;
    if staged.is_empty() {
        return Err(BarflowError::NothingToCommit);
    }
    let file_origin = chrono::Local::now()
        .format("Session_%Y%m%d_%H%M%S")
        .to_string();
    let records: Vec<Record> = staged.into_iter().map(|s| s.record).collect();
    let files = staging.staged_files()?;
    let (saved, duplicates) = history.save_session(&records, &file_origin, &files)?;
    // Staging is only emptied once history holds the whole session.
    staging.clear()?;
    info!("Committed session {file_origin}: {saved} saved, {duplicates} duplicates");
    Ok(CommitOutcome {
        saved,
        duplicates,
        file_origin,
        files: files.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{open_history, HISTORY_DB};
    use crate::migrator::Migrator;

    fn test_history() -> (tempfile::TempDir, History) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(HISTORY_DB);
        let (conn, _) = open_history(&path, None, &Migrator::with_builtin()).unwrap();
        (dir, History::from_connection(&path, conn))
    }

    fn rec(date: &str, source: Source, supplier: Option<&str>, amount: f64) -> Record {
        let mut r = Record::new(date, source, amount);
        r.supplier = supplier.map(str::to_string);
        r
    }

    fn sample() -> Vec<Record> {
        vec![
            rec("2025-01-15 00:00:00", Source::Supplier, Some("Beverage World"), -300.0),
            rec("2025-02-03 00:00:00", Source::Supplier, Some("Snack Masters"), -80.0),
            rec("2025-02-03 21:10:00", Source::Pos, None, 45.5),
            rec("2025-02-20 22:00:00", Source::Pos, None, 120.0),
            rec("2025-03-01 00:00:00", Source::Manual, None, -15.0),
        ]
    }

    #[test]
    fn test_save_records_skips_duplicates() {
        let (_dir, history) = test_history();
        assert_eq!(history.save_records(&sample(), "a.xlsx").unwrap(), (5, 0));
        assert_eq!(history.save_records(&sample(), "b.xlsx").unwrap(), (0, 5));
        let all = history.load_all().unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].record.date, "2025-03-01 00:00:00");
        assert_eq!(all[0].file_origin.as_deref(), Some("a.xlsx"));
    }

    #[test]
    fn test_load_period_is_inclusive() {
        let (_dir, history) = test_history();
        history.save_records(&sample(), "s").unwrap();
        let feb = history.load_period("2025-02-03", "2025-02-20").unwrap();
        assert_eq!(feb.len(), 3);
    }

    #[test]
    fn test_query_filters_combine() {
        let (_dir, history) = test_history();
        history.save_records(&sample(), "s").unwrap();

        let by_month = Filter {
            date: Some("2025-02".to_string()),
            ..Default::default()
        };
        assert_eq!(history.count_matching(&by_month).unwrap(), 3);

        let pos_in_feb = Filter {
            date: Some("2025-02".to_string()),
            source: Some(Source::Pos),
            min_amount: Some(50.0),
            ..Default::default()
        };
        let found = history.query(&pos_in_feb).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].record.net_amount, 120.0);

        let supplier = Filter {
            supplier: Some("snack".to_string()),
            ..Default::default()
        };
        assert_eq!(history.count_matching(&supplier).unwrap(), 1);

        let limited = Filter {
            limit: Some(2),
            ..Default::default()
        };
        assert_eq!(history.query(&limited).unwrap().len(), 2);
        assert!(limited.is_empty());
    }

    #[test]
    fn test_delete_matching_requires_a_filter() {
        let (_dir, history) = test_history();
        history.save_records(&sample(), "s").unwrap();
        assert!(matches!(
            history.delete_matching(&Filter::default()),
            Err(BarflowError::EmptyFilter)
        ));
        let expenses = Filter {
            max_amount: Some(0.0),
            ..Default::default()
        };
        assert_eq!(history.delete_matching(&expenses).unwrap(), 3);
        assert_eq!(history.stats().unwrap().total_records, 2);
    }

    #[test]
    fn test_delete_and_clear() {
        let (_dir, history) = test_history();
        history.save_records(&sample(), "s").unwrap();
        let id = history.load_all().unwrap()[0].id;
        assert!(history.delete(id).unwrap());
        assert!(!history.delete(id).unwrap());
        assert_eq!(history.clear_all().unwrap(), 4);
        let stats = history.stats().unwrap();
        assert_eq!(stats.total_records, 0);
        assert_eq!(stats.date_range, None);
    }

    #[test]
    fn test_stats_reports_range() {
        let (_dir, history) = test_history();
        history.save_records(&sample(), "s").unwrap();
        let stats = history.stats().unwrap();
        assert_eq!(stats.total_records, 5);
        assert_eq!(
            stats.date_range,
            Some(("2025-01-15 00:00:00".to_string(), "2025-03-01 00:00:00".to_string()))
        );
        assert!(stats.db_size_mb >= 0.0);
    }

    #[test]
    fn test_commit_staging_moves_records_and_files() {
        let (dir, history) = test_history();
        let staging = Staging::open(&dir.path().join("temp.db")).unwrap();
        staging.add_records(&sample()[..3], 1.0).unwrap();
        staging.record_file("suppliers.xlsx", "cafe", Source::Supplier, 2).unwrap();
        history
            .save_records(&sample()[..1], "earlier")
            .unwrap();

        let outcome = commit_staging(&staging, &history).unwrap();
        assert_eq!(outcome.saved, 2);
        assert_eq!(outcome.duplicates, 1);
        assert_eq!(outcome.files, 1);
        assert!(outcome.file_origin.starts_with("Session_"));
        assert_eq!(staging.count().unwrap(), 0);
        assert!(history.has_file("cafe").unwrap());
        assert_eq!(history.stats().unwrap().total_records, 3);
    }

    fn imported_file_rows(history: &History) -> i64 {
        history
            .conn()
            .query_row("SELECT COUNT(*) FROM imported_files", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_commit_retry_does_not_duplicate_imported_files() {
        let (dir, history) = test_history();
        let staging = Staging::open(&dir.path().join("temp.db")).unwrap();
        staging.add_records(&sample()[..2], 1.0).unwrap();
        staging.record_file("suppliers.xlsx", "cafe", Source::Supplier, 2).unwrap();
        commit_staging(&staging, &history).unwrap();

        // Same session staged again, as if the earlier clear never happened.
        staging.add_records(&sample()[..2], 1.0).unwrap();
        staging.record_file("suppliers.xlsx", "cafe", Source::Supplier, 2).unwrap();
        let outcome = commit_staging(&staging, &history).unwrap();
        assert_eq!(outcome.saved, 0);
        assert_eq!(outcome.duplicates, 2);
        assert_eq!(imported_file_rows(&history), 1);
        assert_eq!(history.stats().unwrap().total_records, 2);
    }

    #[test]
    fn test_failed_commit_leaves_history_and_staging_untouched() {
        let (dir, history) = test_history();
        let staging = Staging::open(&dir.path().join("temp.db")).unwrap();
        staging.add_records(&sample()[..3], 1.0).unwrap();
        staging.record_file("pos.xlsx", "beef", Source::Pos, 3).unwrap();
        history.conn().execute_batch("DROP TABLE imported_files").unwrap();

        assert!(commit_staging(&staging, &history).is_err());
        assert_eq!(history.stats().unwrap().total_records, 0);
        assert_eq!(staging.count().unwrap(), 3);
        assert_eq!(staging.staged_files().unwrap().len(), 1);
    }

    #[test]
    fn test_commit_empty_staging_fails() {
        let (dir, history) = test_history();
        let staging = Staging::open(&dir.path().join("temp.db")).unwrap();
        assert!(matches!(
            commit_staging(&staging, &history),
            Err(BarflowError::NothingToCommit)
        ));
    }
}
