use thiserror::Error;

#[derive(Error, Debug)]
pub enum BarflowError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Migration {name} (v{version}) failed: {message}")]
    MigrationFailed {
        version: u32,
        name: String,
        message: String,
    },

    #[error("Migrations {first} and {second} share version {version}")]
    DuplicateMigration {
        version: u32,
        first: String,
        second: String,
    },

    #[error("Unknown source: {0} (expected supplier, pos or manual)")]
    UnknownSource(String),

    #[error("Missing column '{column}' in {file}")]
    MissingColumn { column: String, file: String },

    #[error("Unsupported file type: {0}")]
    UnsupportedFile(String),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("No transaction with id {0}")]
    UnknownRecord(i64),

    #[error("An identical transaction is already staged")]
    DuplicateRecord,

    #[error("Nothing to change: pass at least one field option")]
    NothingToChange,

    #[error("There are no staged transactions to commit")]
    NothingToCommit,

    #[error("Refusing to delete without at least one filter")]
    EmptyFilter,

    #[error("Aborted")]
    Aborted,

    #[error("Settings error: {0}")]
    Settings(String),
}

pub type Result<T> = std::result::Result<T, BarflowError>;
