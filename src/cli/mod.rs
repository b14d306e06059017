pub mod add;
pub mod commit;
pub mod demo;
pub mod export;
pub mod history;
pub mod import;
pub mod init;
pub mod load;
pub mod migrate;
pub mod report;
pub mod staged;
pub mod status;

use std::io::{BufRead, Write};

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::error::{BarflowError, Result};
use crate::history::Filter;
use crate::models::Source;
use crate::record::normalize_date;

pub(crate) fn parse_month_opt(month: &Option<String>) -> (Option<i32>, Option<u32>) {
    if let Some(m) = month {
        let parts: Vec<&str> = m.split('-').collect();
        if parts.len() == 2 {
            let year = parts[0].parse().ok();
            let month = parts[1].parse().ok();
            return (year, month);
        }
    }
    (None, None)
}

/// Ask for a yes/no answer on stdin unless `yes` was given up front.
pub(crate) fn confirm(prompt: &str, yes: bool) -> Result<()> {
    if yes {
        return Ok(());
    }
    print!("{prompt} [y/N]: ");
    std::io::stdout().flush()?;
    let mut input = String::new();
    std::io::stdin().lock().read_line(&mut input)?;
    match input.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Ok(()),
        _ => Err(BarflowError::Aborted),
    }
}

#[derive(Parser)]
#[command(
    name = "barflow",
    version,
    about = "Stage, review and keep the books of a small bar or shop."
)]
pub struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Silence all log output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Choose a data directory and create the historical database.
    Init {
        /// Path for BarFlow data (default: the user data directory)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
    },
    /// Show databases, schema version and record counts.
    Status,
    /// Switch to an existing BarFlow data directory.
    Load {
        /// Path to a data directory containing barflow_history.db
        path: String,
    },
    /// Apply pending schema migrations to the historical database.
    Migrate {
        /// Extra directory of numbered .sql migrations
        #[arg(long)]
        dir: Option<String>,
    },
    /// Stage transactions from a supplier or POS spreadsheet.
    Import {
        /// File layout: supplier or pos
        kind: String,
        /// Path to an .xlsx/.xlsm/.xls/.ods or .csv file
        file: String,
        /// Import even if this exact file was imported before
        #[arg(long)]
        force: bool,
    },
    /// Stage a hand-entered expense or income.
    Add {
        #[arg(value_enum)]
        kind: AddKind,
        #[command(flatten)]
        entry: EntryArgs,
    },
    /// Review the staged transactions.
    Staged {
        #[command(subcommand)]
        command: StagedCommands,
    },
    /// Move every staged transaction into the historical database.
    Commit,
    /// Query and prune the historical database.
    History {
        #[command(subcommand)]
        command: HistoryCommands,
    },
    /// Aggregates over historical (or staged) transactions.
    Report {
        #[command(subcommand)]
        command: ReportCommands,
    },
    /// Export historical transactions to CSV.
    Export {
        /// Output path (default: <data_dir>/exports/barflow-YYYYMMDD-HHMMSS.csv)
        #[arg(long)]
        output: Option<String>,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Stage a month of generated sample transactions.
    Demo {
        /// Month to generate: YYYY-MM (default: current month)
        #[arg(long)]
        month: Option<String>,
        /// Random seed for reproducible data
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum AddKind {
    Expense,
    Income,
}

#[derive(Args)]
pub struct EntryArgs {
    /// Date: YYYY-MM-DD, DD/MM/YYYY, optionally with a time
    #[arg(long)]
    pub date: String,
    /// Amount (expenses are always stored as negative)
    #[arg(long, allow_hyphen_values = true)]
    pub amount: f64,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long)]
    pub supplier: Option<String>,
    #[arg(long = "supplier-ref")]
    pub supplier_ref: Option<String>,
    #[arg(long = "pos-operation")]
    pub pos_operation: Option<String>,
    /// POS gross amount
    #[arg(long)]
    pub gross: Option<f64>,
    /// POS fee
    #[arg(long)]
    pub fee: Option<f64>,
}

#[derive(Subcommand)]
pub enum StagedCommands {
    /// List staged transactions, newest import first.
    List,
    /// Count, date range and size of the temporary database.
    Stats,
    /// Change fields of a staged transaction. An empty text value clears the field.
    Edit {
        id: i64,
        #[arg(long)]
        date: Option<String>,
        #[arg(long, allow_hyphen_values = true)]
        amount: Option<f64>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        supplier: Option<String>,
        #[arg(long = "supplier-ref")]
        supplier_ref: Option<String>,
        #[arg(long = "pos-operation")]
        pos_operation: Option<String>,
        #[arg(long)]
        gross: Option<f64>,
        #[arg(long)]
        fee: Option<f64>,
    },
    /// Drop one staged transaction.
    Remove { id: i64 },
    /// Empty the staging area.
    Clear {
        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Delete the temporary database file altogether.
    Drop {
        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
pub enum HistoryCommands {
    /// List committed transactions, newest first.
    List {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Count, date range and size of the historical database.
    Stats,
    /// Delete the transactions matching the given filters.
    Delete {
        #[command(flatten)]
        filter: FilterArgs,
        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Delete one committed transaction by id.
    Remove { id: i64 },
    /// Delete every committed transaction.
    Clear {
        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Args, Clone, Copy)]
pub struct ReportArgs {
    /// Restrict to one year
    #[arg(long)]
    pub year: Option<i32>,
    /// Report on staged instead of committed transactions
    #[arg(long)]
    pub staged: bool,
}

#[derive(Subcommand)]
pub enum ReportCommands {
    /// Total income, expenses and profit.
    Summary {
        #[command(flatten)]
        args: ReportArgs,
    },
    /// Income, expenses and profit per month, with cumulative profit.
    Monthly {
        #[command(flatten)]
        args: ReportArgs,
    },
    /// Net and cumulative profit per day.
    Cumulative {
        #[command(flatten)]
        args: ReportArgs,
    },
    /// Average daily income per weekday against average daily expenses.
    Weekdays {
        #[command(flatten)]
        args: ReportArgs,
    },
    /// Monthly figures of one year with their running averages.
    Averages {
        #[command(flatten)]
        args: ReportArgs,
    },
}

#[derive(Args, Default)]
pub struct FilterArgs {
    /// Date prefix: YYYY, YYYY-MM or YYYY-MM-DD
    #[arg(long)]
    pub date: Option<String>,
    /// First day (inclusive)
    #[arg(long = "from")]
    pub from_date: Option<String>,
    /// Last day (inclusive)
    #[arg(long = "to")]
    pub to_date: Option<String>,
    /// supplier, pos or manual
    #[arg(long)]
    pub source: Option<String>,
    /// Supplier name contains
    #[arg(long)]
    pub supplier: Option<String>,
    /// Description contains
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long = "min", allow_hyphen_values = true)]
    pub min_amount: Option<f64>,
    #[arg(long = "max", allow_hyphen_values = true)]
    pub max_amount: Option<f64>,
    /// Show at most this many rows
    #[arg(long)]
    pub limit: Option<usize>,
}

fn day_arg(raw: &str) -> Result<String> {
    normalize_date(raw)
        .map(|d| d[..10].to_string())
        .ok_or_else(|| BarflowError::InvalidDate(raw.to_string()))
}

impl FilterArgs {
    pub fn to_filter(&self) -> Result<Filter> {
        let date = match &self.date {
            Some(prefix) => {
                let valid = match prefix.len() {
                    4 => prefix.parse::<i32>().is_ok(),
                    7 => {
                        let (y, m) = parse_month_opt(&Some(prefix.clone()));
                        y.is_some() && m.is_some_and(|m| (1..=12).contains(&m))
                    }
                    10 => chrono::NaiveDate::parse_from_str(prefix, "%Y-%m-%d").is_ok(),
                    _ => false,
                };
                if !valid {
                    return Err(BarflowError::InvalidDate(prefix.clone()));
                }
                Some(prefix.clone())
            }
            None => None,
        };
        Ok(Filter {
            date,
            from: self.from_date.as_deref().map(day_arg).transpose()?,
            to: self.to_date.as_deref().map(day_arg).transpose()?,
            source: self.source.as_deref().map(Source::from_key).transpose()?,
            supplier: self.supplier.clone(),
            description: self.description.clone(),
            min_amount: self.min_amount,
            max_amount: self.max_amount,
            limit: self.limit,
        })
    }
}
