use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::cli::{confirm, FilterArgs, HistoryCommands};
use crate::error::{BarflowError, Result};
use crate::fmt::{money, opt};
use crate::history::History;
use crate::models::HistoricalRecord;
use crate::settings::load_settings;

fn open() -> Result<History> {
    History::open(&load_settings())
}

fn record_table(rows: &[HistoricalRecord]) -> Table {
    let mut table = Table::new();
    table.set_header(vec![
        "ID", "Date", "Source", "Supplier", "Ref", "Description", "POS op", "Net", "Origin",
    ]);
    for h in rows {
        let r = &h.record;
        let net = if r.is_income() {
            money(r.net_amount).green()
        } else {
            money(r.net_amount).red()
        };
        table.add_row(vec![
            Cell::new(h.id),
            Cell::new(&r.date),
            Cell::new(r.source.key()),
            Cell::new(opt(&r.supplier)),
            Cell::new(opt(&r.supplier_ref)),
            Cell::new(opt(&r.description)),
            Cell::new(opt(&r.pos_operation)),
            Cell::new(net),
            Cell::new(opt(&h.file_origin)),
        ]);
    }
    table
}

pub fn run(command: HistoryCommands) -> Result<()> {
    match command {
        HistoryCommands::List { filter } => list(&filter),
        HistoryCommands::Stats => stats(),
        HistoryCommands::Delete { filter, yes } => delete(&filter, yes),
        HistoryCommands::Remove { id } => remove(id),
        HistoryCommands::Clear { yes } => clear(yes),
    }
}

fn list(args: &FilterArgs) -> Result<()> {
    let filter = args.to_filter()?;
    let history = open()?;
    let rows = history.query(&filter)?;
    if rows.is_empty() {
        println!("No transactions found.");
        return Ok(());
    }
    let total = history.count_matching(&filter)?;
    let net: f64 = rows.iter().map(|h| h.record.net_amount).sum();
    println!("{}", record_table(&rows));
    if (rows.len() as i64) < total {
        println!("Showing {} of {total} transactions, net {}", rows.len(), money(net));
    } else {
        println!("{total} transactions, net {}", money(net));
    }
    Ok(())
}

fn stats() -> Result<()> {
    let stats = open()?.stats()?;
    println!("Records:    {}", stats.total_records);
    match &stats.date_range {
        Some((first, last)) => println!("Date range: {first} .. {last}"),
        None => println!("Date range: -"),
    }
    println!("Size:       {:.2} MB", stats.db_size_mb);
    Ok(())
}

fn delete(args: &FilterArgs, yes: bool) -> Result<()> {
    let filter = args.to_filter()?;
    let history = open()?;
    if filter.is_empty() {
        return Err(BarflowError::EmptyFilter);
    }
    let count = history.count_matching(&filter)?;
    if count == 0 {
        println!("No transactions match.");
        return Ok(());
    }
    confirm(&format!("Delete {count} historical transactions?"), yes)?;
    let deleted = history.delete_matching(&filter)?;
    println!("Deleted {deleted} transactions");
    Ok(())
}

fn remove(id: i64) -> Result<()> {
    if !open()?.delete(id)? {
        return Err(BarflowError::UnknownRecord(id));
    }
    println!("Deleted transaction {id}");
    Ok(())
}

fn clear(yes: bool) -> Result<()> {
    let history = open()?;
    let count = history.stats()?.total_records;
    if count == 0 {
        println!("History is already empty.");
        return Ok(());
    }
    confirm(
        &format!("{} This deletes all {count} committed transactions. Continue?", "WARNING:".red().bold()),
        yes,
    )?;
    confirm("Are you absolutely sure?", yes)?;
    let deleted = history.clear_all()?;
    println!("History cleared ({deleted} transactions deleted)");
    Ok(())
}
