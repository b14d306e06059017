use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

use crate::error::{BarflowError, Result};

/// Where a transaction came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Supplier,
    Pos,
    Manual,
}

impl Source {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Supplier => "supplier",
            Self::Pos => "pos",
            Self::Manual => "manual",
        }
    }

    /// Parse a source key. Keys written by older releases are accepted too.
    pub fn from_key(key: &str) -> Result<Self> {
        match key.trim().to_ascii_lowercase().as_str() {
            "supplier" | "fornitore" => Ok(Self::Supplier),
            "pos" => Ok(Self::Pos),
            "manual" | "manuale" => Ok(Self::Manual),
            _ => Err(BarflowError::UnknownSource(key.to_string())),
        }
    }
}

impl ToSql for Source {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.key()))
    }
}

impl FromSql for Source {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        Source::from_key(text).map_err(|e| FromSqlError::Other(e.to_string().into()))
    }
}

/// A single money movement. Negative `net_amount` is an expense.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Canonical `YYYY-MM-DD HH:MM:SS`.
    pub date: String,
    pub source: Source,
    pub description: Option<String>,
    pub supplier: Option<String>,
    pub supplier_ref: Option<String>,
    pub pos_operation: Option<String>,
    pub pos_gross: Option<f64>,
    pub pos_fee: Option<f64>,
    pub net_amount: f64,
}

impl Record {
    pub fn new(date: impl Into<String>, source: Source, net_amount: f64) -> Self {
        Self {
            date: date.into(),
            source,
            description: None,
            supplier: None,
            supplier_ref: None,
            pos_operation: None,
            pos_gross: None,
            pos_fee: None,
            net_amount,
        }
    }

    /// Calendar day part of `date`.
    pub fn day(&self) -> &str {
        self.date.get(..10).unwrap_or(&self.date)
    }

    pub fn is_income(&self) -> bool {
        self.net_amount > 0.0
    }
}

/// Column list shared by the staging and historical tables, in the order
/// `read_record` expects.
pub const RECORD_COLUMNS: &str =
    "date, source, description, supplier, supplier_ref, pos_operation, pos_gross, pos_fee, net_amount";

/// Read a `Record` from a row whose columns start at `offset` and follow
/// `RECORD_COLUMNS`.
pub fn read_record(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<Record> {
    Ok(Record {
        date: row.get(offset)?,
        source: row.get(offset + 1)?,
        description: row.get(offset + 2)?,
        supplier: row.get(offset + 3)?,
        supplier_ref: row.get(offset + 4)?,
        pos_operation: row.get(offset + 5)?,
        pos_gross: row.get(offset + 6)?,
        pos_fee: row.get(offset + 7)?,
        net_amount: row.get(offset + 8)?,
    })
}

#[derive(Debug, Clone)]
pub struct StagedRecord {
    pub id: i64,
    pub record: Record,
    pub import_timestamp: f64,
}

#[derive(Debug, Clone)]
pub struct HistoricalRecord {
    pub id: i64,
    pub record: Record,
    pub file_origin: Option<String>,
}

/// Changes to apply to a staged record. Empty strings clear optional text.
#[derive(Debug, Clone, Default)]
pub struct RecordPatch {
    pub date: Option<String>,
    pub description: Option<String>,
    pub supplier: Option<String>,
    pub supplier_ref: Option<String>,
    pub pos_operation: Option<String>,
    pub pos_gross: Option<f64>,
    pub pos_fee: Option<f64>,
    pub net_amount: Option<f64>,
}

fn patch_text(slot: &mut Option<String>, value: &Option<String>) {
    if let Some(v) = value {
        let v = v.trim();
        *slot = if v.is_empty() { None } else { Some(v.to_string()) };
    }
}

impl RecordPatch {
    pub fn is_empty(&self) -> bool {
        self.date.is_none()
            && self.description.is_none()
            && self.supplier.is_none()
            && self.supplier_ref.is_none()
            && self.pos_operation.is_none()
            && self.pos_gross.is_none()
            && self.pos_fee.is_none()
            && self.net_amount.is_none()
    }

    pub fn apply(&self, record: &mut Record) -> Result<()> {
        if let Some(raw) = &self.date {
            record.date = crate::record::normalize_date(raw)
                .ok_or_else(|| BarflowError::InvalidDate(raw.clone()))?;
        }
        patch_text(&mut record.description, &self.description);
        patch_text(&mut record.supplier, &self.supplier);
        patch_text(&mut record.supplier_ref, &self.supplier_ref);
        patch_text(&mut record.pos_operation, &self.pos_operation);
        if let Some(v) = self.pos_gross {
            record.pos_gross = Some(v);
        }
        if let Some(v) = self.pos_fee {
            record.pos_fee = Some(v);
        }
        if let Some(v) = self.net_amount {
            record.net_amount = v;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreStats {
    pub total_records: i64,
    pub date_range: Option<(String, String)>,
    pub db_size_mb: f64,
}
