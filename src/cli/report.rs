use colored::Colorize;
use comfy_table::{Cell, Table};
use rusqlite::Connection;

use crate::cli::{ReportArgs, ReportCommands};
use crate::db::staging_path;
use crate::error::Result;
use crate::fmt::money;
use crate::history::History;
use crate::reports::{self, Ledger};
use crate::settings::load_settings;
use crate::staging::Staging;

enum Store {
    History(History),
    Staging(Staging),
}

impl Store {
    fn open(args: &ReportArgs) -> Result<Self> {
        let settings = load_settings();
        if args.staged {
            Ok(Self::Staging(Staging::open(&staging_path(&settings))?))
        } else {
            Ok(Self::History(History::open(&settings)?))
        }
    }

    fn conn(&self) -> &Connection {
        match self {
            Self::History(h) => h.conn(),
            Self::Staging(s) => s.conn(),
        }
    }

    fn ledger(&self) -> Ledger {
        match self {
            Self::History(_) => Ledger::History,
            Self::Staging(_) => Ledger::Staging,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::History(_) => "committed",
            Self::Staging(_) => "staged",
        }
    }
}

fn signed(val: f64) -> String {
    if val >= 0.0 {
        money(val).green().to_string()
    } else {
        money(val).red().to_string()
    }
}

pub fn run(command: ReportCommands) -> Result<()> {
    match command {
        ReportCommands::Summary { args } => summary(&args),
        ReportCommands::Monthly { args } => monthly(&args),
        ReportCommands::Cumulative { args } => cumulative(&args),
        ReportCommands::Weekdays { args } => weekdays(&args),
        ReportCommands::Averages { args } => averages(&args),
    }
}

fn summary(args: &ReportArgs) -> Result<()> {
    let store = Store::open(args)?;
    let s = reports::summary(store.conn(), store.ledger(), args.year)?;

    let mut table = Table::new();
    table.set_header(vec!["", "Amount"]);
    table.add_row(vec![Cell::new("Income".green().bold()), Cell::new(money(s.income))]);
    table.add_row(vec![Cell::new("Expenses".red().bold()), Cell::new(money(s.expenses))]);
    table.add_row(vec![Cell::new("Profit".bold()), Cell::new(signed(s.profit))]);
    println!("Summary ({} transactions: {})\n{table}", store.label(), s.count);
    if let (Some(first), Some(last)) = (&s.first_date, &s.last_date) {
        println!("From {first} to {last}");
    }
    Ok(())
}

fn monthly(args: &ReportArgs) -> Result<()> {
    let store = Store::open(args)?;
    let rows = reports::monthly(store.conn(), store.ledger(), args.year)?;
    if rows.is_empty() {
        println!("No transactions found.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Month", "Income", "Expenses", "Profit", "Cumulative"]);
    for m in &rows {
        table.add_row(vec![
            Cell::new(&m.month),
            Cell::new(money(m.income)),
            Cell::new(money(m.expenses)),
            Cell::new(signed(m.profit)),
            Cell::new(signed(m.cumulative)),
        ]);
    }
    println!("Monthly\n{table}");
    Ok(())
}

fn cumulative(args: &ReportArgs) -> Result<()> {
    let store = Store::open(args)?;
    let rows = reports::cumulative(store.conn(), store.ledger(), args.year)?;
    if rows.is_empty() {
        println!("No transactions found.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Day", "Net", "Cumulative"]);
    for d in &rows {
        table.add_row(vec![
            Cell::new(&d.day),
            Cell::new(signed(d.net)),
            Cell::new(signed(d.cumulative)),
        ]);
    }
    println!("Cumulative profit\n{table}");
    Ok(())
}

fn weekdays(args: &ReportArgs) -> Result<()> {
    let settings = load_settings();
    let closed = settings.closed_day()?;
    let store = Store::open(args)?;
    let perf = reports::weekday_performance(store.conn(), store.ledger(), args.year, closed)?;
    if perf.rows.is_empty() {
        println!("No income on open days.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Weekday", "Avg daily income", "Days", "vs. expenses"]);
    for w in &perf.rows {
        table.add_row(vec![
            Cell::new(w.weekday),
            Cell::new(money(w.average_income)),
            Cell::new(w.days),
            Cell::new(signed(w.average_income - perf.daily_expense_reference)),
        ]);
    }
    println!("Weekday performance\n{table}");
    println!(
        "Average daily expenses: {}",
        money(perf.daily_expense_reference)
    );
    if let Some(day) = closed {
        println!("Closed on {day}, not shown.");
    }
    Ok(())
}

fn averages(args: &ReportArgs) -> Result<()> {
    let store = Store::open(args)?;
    let Some(avg) = reports::average_performance(store.conn(), store.ledger(), args.year)? else {
        println!("No transactions found.");
        return Ok(());
    };
    if avg.rows.is_empty() {
        println!("No transactions in {}.", avg.year);
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec![
        "Month", "Income", "Avg income", "Expenses", "Avg expenses", "Profit", "Avg profit",
    ]);
    for r in &avg.rows {
        table.add_row(vec![
            Cell::new(&r.month),
            Cell::new(money(r.income)),
            Cell::new(money(r.mean_income)),
            Cell::new(money(r.expenses)),
            Cell::new(money(r.mean_expenses)),
            Cell::new(signed(r.profit)),
            Cell::new(signed(r.mean_profit)),
        ]);
    }
    println!("Average performance {}\n{table}", avg.year);
    Ok(())
}
