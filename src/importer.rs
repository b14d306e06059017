use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{BarflowError, Result};
use crate::history::History;
use crate::models::{Record, Source};
use crate::record::normalize_date;
use crate::sheet::{Sheet, Table};
use crate::staging::Staging;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn compute_checksum(file_path: &Path) -> Result<String> {
    let data = std::fs::read(file_path)?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(hex::encode(hasher.finalize()))
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_string()
}

/// Seconds since the epoch, shared by every record of one import.
pub fn import_timestamp() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

// ---------------------------------------------------------------------------
// Spreadsheet layouts, dispatched by enum
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ImporterKind {
    SupplierOrders,
    PosTransactions,
}

impl ImporterKind {
    pub fn key(&self) -> &'static str {
        match self {
            Self::SupplierOrders => "supplier",
            Self::PosTransactions => "pos",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SupplierOrders => "Supplier orders",
            Self::PosTransactions => "POS transactions",
        }
    }

    pub fn source(&self) -> Source {
        match self {
            Self::SupplierOrders => Source::Supplier,
            Self::PosTransactions => Source::Pos,
        }
    }

    pub fn required_columns(&self) -> &'static [&'static str] {
        match self {
            Self::SupplierOrders => &["Data", "Numero Rif.", "Fornitore", "Totale"],
            Self::PosTransactions => &[
                "Data Transazione",
                "Numero operazione",
                "Importo lordo",
                "Commissioni",
                "Importo netto",
            ],
        }
    }

    pub fn parse(&self, file_path: &Path) -> Result<ParseOutcome> {
        let sheet = Sheet::read(file_path)?;
        let table = sheet.table(self.required_columns(), &file_label(file_path))?;
        debug!(
            "{}: header found on row {}, {} data rows",
            self.name(),
            table.header_row + 1,
            table.rows.len()
        );
        match self {
            Self::SupplierOrders => parse_supplier_orders(&table),
            Self::PosTransactions => parse_pos_transactions(&table),
        }
    }
}

const ALL_IMPORTERS: &[ImporterKind] = &[ImporterKind::SupplierOrders, ImporterKind::PosTransactions];

pub fn get_by_key(key: &str) -> Option<ImporterKind> {
    let source = Source::from_key(key).ok()?;
    ALL_IMPORTERS.iter().find(|i| i.source() == source).copied()
}

#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub records: Vec<Record>,
    /// Rows dropped because their date could not be read.
    pub bad_dates: usize,
}

fn column(table: &Table, name: &str) -> Result<usize> {
    table.column(name).ok_or_else(|| BarflowError::MissingColumn {
        column: name.to_string(),
        file: String::new(),
    })
}

// ---------------------------------------------------------------------------
// Supplier orders
// ---------------------------------------------------------------------------

fn parse_supplier_orders(table: &Table) -> Result<ParseOutcome> {
    let c_date = column(table, "Data")?;
    let c_ref = column(table, "Numero Rif.")?;
    let c_supplier = column(table, "Fornitore")?;
    let c_total = column(table, "Totale")?;

    let mut out = ParseOutcome::default();
    for (i, row) in table.rows.iter().enumerate() {
        let total = table.cell(row, c_total);
        if total.is_empty() {
            continue;
        }
        let amount = total
            .as_amount()
            .ok_or_else(|| BarflowError::InvalidAmount(total.as_text().unwrap_or_default()))?;
        let Some(date) = table.cell(row, c_date).as_date() else {
            warn!("Skipping supplier row {}: unreadable date", table.header_row + i + 2);
            out.bad_dates += 1;
            continue;
        };
        let mut record = Record::new(date, Source::Supplier, -amount.abs());
        record.supplier = table.cell(row, c_supplier).as_text();
        record.supplier_ref = table.cell(row, c_ref).as_text();
        out.records.push(record);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// POS transactions
// ---------------------------------------------------------------------------

fn parse_pos_transactions(table: &Table) -> Result<ParseOutcome> {
    let c_date = column(table, "Data Transazione")?;
    let c_op = column(table, "Numero operazione")?;
    let c_gross = column(table, "Importo lordo")?;
    let c_fee = column(table, "Commissioni")?;
    let c_net = column(table, "Importo netto")?;

    let mut out = ParseOutcome::default();
    for (i, row) in table.rows.iter().enumerate() {
        let net = table.cell(row, c_net);
        if net.is_empty() {
            continue;
        }
        let amount = net
            .as_amount()
            .ok_or_else(|| BarflowError::InvalidAmount(net.as_text().unwrap_or_default()))?;
        let Some(date) = table.cell(row, c_date).as_date() else {
            warn!("Skipping POS row {}: unreadable date", table.header_row + i + 2);
            out.bad_dates += 1;
            continue;
        };
        let mut record = Record::new(date, Source::Pos, amount);
        record.pos_operation = table.cell(row, c_op).as_text();
        record.pos_gross = Some(table.cell(row, c_gross).as_amount().unwrap_or(0.0));
        record.pos_fee = Some(table.cell(row, c_fee).as_amount().unwrap_or(0.0));
        out.records.push(record);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// import_file
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ImportResult {
    pub parsed: usize,
    pub imported: usize,
    pub duplicates: usize,
    pub bad_dates: usize,
    pub duplicate_file: bool,
}

/// Parse `file_path` and stage its records. A file whose checksum was
/// already staged or committed is left alone unless `force` is set.
pub fn import_file(
    staging: &Staging,
    history: Option<&History>,
    file_path: &Path,
    importer: ImporterKind,
    force: bool,
) -> Result<ImportResult> {
    let checksum = compute_checksum(file_path)?;
    if !force {
        let seen = staging.has_file(&checksum)?
            || match history {
                Some(h) => h.has_file(&checksum)?,
                None => false,
            };
        if seen {
            info!("{} was already imported, skipping", file_path.display());
            return Ok(ImportResult {
                parsed: 0,
                imported: 0,
                duplicates: 0,
                bad_dates: 0,
                duplicate_file: true,
            });
        }
    }

    let outcome = importer.parse(file_path)?;
    let (imported, duplicates) = staging.add_records(&outcome.records, import_timestamp())?;
    staging.record_file(
        &file_label(file_path),
        &checksum,
        importer.source(),
        outcome.records.len(),
    )?;
    info!(
        "Imported {} from {}: {imported} staged, {duplicates} duplicates",
        importer.name(),
        file_path.display()
    );

    Ok(ImportResult {
        parsed: outcome.records.len(),
        imported,
        duplicates,
        bad_dates: outcome.bad_dates,
        duplicate_file: false,
    })
}

// ---------------------------------------------------------------------------
// Manual entry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntryKind {
    Expense,
    Income,
}

#[derive(Debug, Clone)]
pub struct ManualEntry {
    pub kind: EntryKind,
    pub date: String,
    pub amount: f64,
    pub description: Option<String>,
    pub supplier: Option<String>,
    pub supplier_ref: Option<String>,
    pub pos_operation: Option<String>,
    pub pos_gross: Option<f64>,
    pub pos_fee: Option<f64>,
}

fn non_empty(v: &Option<String>) -> Option<String> {
    v.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Build a record from hand-entered values. Expenses are always negative.
pub fn manual_record(entry: &ManualEntry) -> Result<Record> {
    let date = normalize_date(&entry.date).ok_or_else(|| BarflowError::InvalidDate(entry.date.clone()))?;
    if !entry.amount.is_finite() {
        return Err(BarflowError::InvalidAmount(entry.amount.to_string()));
    }
    let net = match entry.kind {
        EntryKind::Expense => -entry.amount.abs(),
        EntryKind::Income => entry.amount,
    };
    let mut record = Record::new(date, Source::Manual, net);
    record.description = non_empty(&entry.description);
    record.supplier = non_empty(&entry.supplier);
    record.supplier_ref = non_empty(&entry.supplier_ref);
    record.pos_operation = non_empty(&entry.pos_operation);
    record.pos_gross = entry.pos_gross;
    record.pos_fee = entry.pos_fee;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{open_history, HISTORY_DB};
    use crate::migrator::Migrator;
    use crate::sheet::Cell;

    fn write(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    const SUPPLIER_CSV: &str = "\
Ordini fornitori;;;
Periodo: marzo 2025;;;
;;;
Data;Numero Rif.;Fornitore;Totale
01/03/2025;1042;Beverage World;120,50
02/03/2025;1043;Snack Masters;
03/03/2025;1044;Snack Masters;-45,00
not a date;1045;Ice Co;10,00
";

    const POS_CSV: &str = "\
Data Transazione,Numero operazione,Importo lordo,Commissioni,Importo netto
2025-03-01 21:15:00,000123,10.00,0.15,9.85
2025-03-01 22:40:10,000124,,,20.00
2025-03-02 20:00:00,000125,5.00,0.08,
";

    #[test]
    fn test_numeric_date_cell_counts_as_bad_date() {
        let sheet = Sheet {
            rows: vec![
                ["Data", "Numero Rif.", "Fornitore", "Totale"]
                    .iter()
                    .map(|h| Cell::Text(h.to_string()))
                    .collect(),
                vec![
                    Cell::DateTime(45717.0),
                    Cell::Number(1042.0),
                    Cell::Text("Beverage World".into()),
                    Cell::Number(120.5),
                ],
                vec![
                    Cell::Number(20250301042.0),
                    Cell::Number(1043.0),
                    Cell::Text("Ice Co".into()),
                    Cell::Number(10.0),
                ],
            ],
        };
        let table = sheet
            .table(ImporterKind::SupplierOrders.required_columns(), "orders.xlsx")
            .unwrap();
        let out = parse_supplier_orders(&table).unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].date, "2025-03-01 00:00:00");
        assert_eq!(out.bad_dates, 1);
    }

    #[test]
    fn test_parse_supplier_orders() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "orders.csv", SUPPLIER_CSV);
        let outcome = ImporterKind::SupplierOrders.parse(&path).unwrap();
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.bad_dates, 1);
        let first = &outcome.records[0];
        assert_eq!(first.date, "2025-03-01 00:00:00");
        assert_eq!(first.source, Source::Supplier);
        assert_eq!(first.supplier.as_deref(), Some("Beverage World"));
        assert_eq!(first.supplier_ref.as_deref(), Some("1042"));
        assert_eq!(first.net_amount, -120.5);
        assert_eq!(outcome.records[1].net_amount, -45.0);
    }

    #[test]
    fn test_parse_pos_transactions() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "pos.csv", POS_CSV);
        let outcome = ImporterKind::PosTransactions.parse(&path).unwrap();
        assert_eq!(outcome.records.len(), 2);
        let first = &outcome.records[0];
        assert_eq!(first.pos_operation.as_deref(), Some("000123"));
        assert_eq!(first.pos_gross, Some(10.0));
        assert_eq!(first.pos_fee, Some(0.15));
        assert_eq!(first.net_amount, 9.85);
        assert_eq!(outcome.records[1].pos_gross, Some(0.0));
    }

    #[test]
    fn test_parse_missing_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "pos.csv", "Data,Importo\n2025-03-01,1\n");
        assert!(matches!(
            ImporterKind::PosTransactions.parse(&path),
            Err(BarflowError::MissingColumn { .. })
        ));
    }

    #[test]
    fn test_get_by_key() {
        assert_eq!(get_by_key("supplier"), Some(ImporterKind::SupplierOrders));
        assert_eq!(get_by_key("fornitore"), Some(ImporterKind::SupplierOrders));
        assert_eq!(get_by_key("POS"), Some(ImporterKind::PosTransactions));
        assert_eq!(get_by_key("manual"), None);
        assert_eq!(get_by_key("bank"), None);
    }

    #[test]
    fn test_import_file_detects_repeated_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "pos.csv", POS_CSV);
        let staging = Staging::open(&dir.path().join("temp.db")).unwrap();

        let first = import_file(&staging, None, &path, ImporterKind::PosTransactions, false).unwrap();
        assert!(!first.duplicate_file);
        assert_eq!(first.imported, 2);

        let again = import_file(&staging, None, &path, ImporterKind::PosTransactions, false).unwrap();
        assert!(again.duplicate_file);
        assert_eq!(again.imported, 0);

        let forced = import_file(&staging, None, &path, ImporterKind::PosTransactions, true).unwrap();
        assert!(!forced.duplicate_file);
        assert_eq!(forced.imported, 0);
        assert_eq!(forced.duplicates, 2);
        assert_eq!(staging.count().unwrap(), 2);
        let files = staging.staged_files().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].record_count, 2);
    }

    #[test]
    fn test_import_file_checks_committed_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "orders.csv", SUPPLIER_CSV);
        let staging = Staging::open(&dir.path().join("temp.db")).unwrap();
        let history_db = dir.path().join(HISTORY_DB);
        let (conn, _) = open_history(&history_db, None, &Migrator::with_builtin()).unwrap();
        let history = History::from_connection(&history_db, conn);

        import_file(&staging, Some(&history), &path, ImporterKind::SupplierOrders, false).unwrap();
        crate::history::commit_staging(&staging, &history).unwrap();

        let again = import_file(&staging, Some(&history), &path, ImporterKind::SupplierOrders, false).unwrap();
        assert!(again.duplicate_file);
        assert_eq!(staging.count().unwrap(), 0);
    }

    #[test]
    fn test_checksum_is_sha256_hex() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "a.csv", "abc");
        assert_eq!(
            compute_checksum(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    fn entry(kind: EntryKind, amount: f64) -> ManualEntry {
        ManualEntry {
            kind,
            date: "2025-03-04".to_string(),
            amount,
            description: Some("  Ice delivery ".to_string()),
            supplier: Some(String::new()),
            supplier_ref: None,
            pos_operation: None,
            pos_gross: None,
            pos_fee: None,
        }
    }

    #[test]
    fn test_manual_expense_is_negative() {
        let r = manual_record(&entry(EntryKind::Expense, 30.0)).unwrap();
        assert_eq!(r.net_amount, -30.0);
        assert_eq!(r.source, Source::Manual);
        assert_eq!(r.date, "2025-03-04 00:00:00");
        assert_eq!(r.description.as_deref(), Some("Ice delivery"));
        assert_eq!(r.supplier, None);
        let r = manual_record(&entry(EntryKind::Expense, -30.0)).unwrap();
        assert_eq!(r.net_amount, -30.0);
    }

    #[test]
    fn test_manual_income_keeps_amount() {
        let r = manual_record(&entry(EntryKind::Income, 250.0)).unwrap();
        assert_eq!(r.net_amount, 250.0);
    }

    #[test]
    fn test_manual_rejects_bad_date() {
        let mut e = entry(EntryKind::Income, 1.0);
        e.date = "tomorrow".to_string();
        assert!(matches!(manual_record(&e), Err(BarflowError::InvalidDate(_))));
    }
}
