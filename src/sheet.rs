//! Minimal spreadsheet reader: first worksheet of an Excel/ODS workbook, or a
//! delimited text file, as rows of cells.

use std::path::Path;

use crate::error::{BarflowError, Result};
use crate::record::{excel_serial_to_datetime, normalize_date, number_as_text, parse_amount};

/// How many leading rows are searched for the header row.
const HEADER_SEARCH_ROWS: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    /// Excel serial date.
    DateTime(f64),
}

impl Cell {
    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Text(s) => {
                let s = s.trim();
                (!s.is_empty()).then(|| s.to_string())
            }
            Cell::Number(n) => Some(number_as_text(*n)),
            Cell::DateTime(serial) => excel_serial_to_datetime(*serial),
        }
    }

    pub fn as_amount(&self) -> Option<f64> {
        match self {
            Cell::Number(n) => Some(*n),
            Cell::Text(s) => parse_amount(s),
            _ => None,
        }
    }

    /// Canonical `YYYY-MM-DD HH:MM:SS`, from a date cell, a serial number or text.
    pub fn as_date(&self) -> Option<String> {
        match self {
            Cell::DateTime(serial) | Cell::Number(serial) => excel_serial_to_datetime(*serial),
            Cell::Text(s) => normalize_date(s),
            Cell::Empty => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Sheet {
    pub rows: Vec<Vec<Cell>>,
}

/// Rows below a located header row.
#[derive(Debug, Clone)]
pub struct Table {
    pub headers: Vec<String>,
    /// 0-based index of the header row within the sheet.
    pub header_row: usize,
    pub rows: Vec<Vec<Cell>>,
}

fn header_key(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

impl Sheet {
    pub fn read(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "csv" | "txt" => read_delimited(path),
            "xlsx" | "xlsm" | "xls" | "ods" => read_workbook(path),
            _ => Err(BarflowError::UnsupportedFile(path.display().to_string())),
        }
    }

    /// Find the first row, among the leading rows, that carries every
    /// required column name (case and spacing ignored).
    pub fn table(&self, required: &[&str], file: &str) -> Result<Table> {
        let wanted: Vec<String> = required.iter().map(|c| header_key(c)).collect();
        for (idx, row) in self.rows.iter().take(HEADER_SEARCH_ROWS).enumerate() {
            let names: Vec<String> = row
                .iter()
                .map(|c| c.as_text().map(|t| header_key(&t)).unwrap_or_default())
                .collect();
            if wanted.iter().all(|w| names.contains(w)) {
                return Ok(Table {
                    headers: names,
                    header_row: idx,
                    rows: self.rows[idx + 1..].to_vec(),
                });
            }
        }
        // Report the first column that never shows up.
        let missing = wanted
            .iter()
            .zip(required)
            .find(|(w, _)| {
                !self.rows.iter().take(HEADER_SEARCH_ROWS).any(|row| {
                    row.iter()
                        .any(|c| c.as_text().map(|t| header_key(&t)) == Some((*w).clone()))
                })
            })
            .map_or(required.first().copied().unwrap_or(""), |(_, r)| *r);
        Err(BarflowError::MissingColumn {
            column: missing.to_string(),
            file: file.to_string(),
        })
    }
}

impl Table {
    pub fn column(&self, name: &str) -> Option<usize> {
        let key = header_key(name);
        self.headers.iter().position(|h| *h == key)
    }

    pub fn cell<'a>(&self, row: &'a [Cell], col: usize) -> &'a Cell {
        row.get(col).unwrap_or(&Cell::Empty)
    }
}

fn sniff_delimiter(first_line: &str) -> u8 {
    if first_line.matches(';').count() > first_line.matches(',').count() {
        b';'
    } else {
        b','
    }
}

fn read_delimited(path: &Path) -> Result<Sheet> {
    let content = std::fs::read_to_string(path)?;
    let content = content.trim_start_matches('\u{feff}');
    let first_line = content.lines().next().unwrap_or("");
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(sniff_delimiter(first_line))
        .from_reader(content.as_bytes());
    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        rows.push(
            record
                .iter()
                .map(|v| {
                    if v.trim().is_empty() {
                        Cell::Empty
                    } else {
                        Cell::Text(v.trim().to_string())
                    }
                })
                .collect(),
        );
    }
    Ok(Sheet { rows })
}

#[cfg(feature = "xlsx")]
fn read_workbook(path: &Path) -> Result<Sheet> {
    use calamine::{Data, Reader};

    let mut workbook = calamine::open_workbook_auto(path)
        .map_err(|e| BarflowError::Spreadsheet(format!("{}: {e}", path.display())))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| BarflowError::Spreadsheet(format!("{}: no worksheet", path.display())))?
        .map_err(|e| BarflowError::Spreadsheet(format!("{}: {e}", path.display())))?;

    let rows = range
        .rows()
        .map(|row| {
            row.iter()
                .map(|c| match c {
                    Data::Empty | Data::Error(_) => Cell::Empty,
                    Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => {
                        Cell::Text(s.clone())
                    }
                    Data::Float(f) => Cell::Number(*f),
                    Data::Int(i) => Cell::Number(*i as f64),
                    Data::Bool(b) => Cell::Text(b.to_string()),
                    Data::DateTime(dt) => Cell::DateTime(dt.as_f64()),
                })
                .collect()
        })
        .collect();
    Ok(Sheet { rows })
}

#[cfg(not(feature = "xlsx"))]
fn read_workbook(path: &Path) -> Result<Sheet> {
    Err(BarflowError::Spreadsheet(format!(
        "{}: spreadsheet support not compiled in (enable the `xlsx` feature)",
        path.display()
    )))
}
