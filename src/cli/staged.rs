use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::cli::{confirm, StagedCommands};
use crate::db::staging_path;
use crate::error::{BarflowError, Result};
use crate::fmt::{money, opt};
use crate::models::{RecordPatch, StagedRecord};
use crate::settings::load_settings;
use crate::staging::{database_exists, delete_database, Staging};

fn open() -> Result<Staging> {
    Staging::open(&staging_path(&load_settings()))
}

pub(crate) fn record_table(rows: &[StagedRecord]) -> Table {
    let mut table = Table::new();
    table.set_header(vec![
        "ID", "Date", "Source", "Supplier", "Ref", "Description", "POS op", "Gross", "Fee", "Net",
    ]);
    for s in rows {
        let r = &s.record;
        let net = if r.is_income() {
            money(r.net_amount).green()
        } else {
            money(r.net_amount).red()
        };
        table.add_row(vec![
            Cell::new(s.id),
            Cell::new(&r.date),
            Cell::new(r.source.key()),
            Cell::new(opt(&r.supplier)),
            Cell::new(opt(&r.supplier_ref)),
            Cell::new(opt(&r.description)),
            Cell::new(opt(&r.pos_operation)),
            Cell::new(r.pos_gross.map(money).unwrap_or_default()),
            Cell::new(r.pos_fee.map(money).unwrap_or_default()),
            Cell::new(net),
        ]);
    }
    table
}

pub fn run(command: StagedCommands) -> Result<()> {
    match command {
        StagedCommands::List => list(),
        StagedCommands::Stats => stats(),
        StagedCommands::Edit {
            id,
            date,
            amount,
            description,
            supplier,
            supplier_ref,
            pos_operation,
            gross,
            fee,
        } => edit(
            id,
            RecordPatch {
                date,
                description,
                supplier,
                supplier_ref,
                pos_operation,
                pos_gross: gross,
                pos_fee: fee,
                net_amount: amount,
            },
        ),
        StagedCommands::Remove { id } => remove(id),
        StagedCommands::Clear { yes } => clear(yes),
        StagedCommands::Drop { yes } => drop_database(yes),
    }
}

fn list() -> Result<()> {
    let rows = open()?.list()?;
    if rows.is_empty() {
        println!("No staged transactions.");
        return Ok(());
    }
    let total: f64 = rows.iter().map(|s| s.record.net_amount).sum();
    println!("{}", record_table(&rows));
    println!("{} staged, net {}", rows.len(), money(total));
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

fn edit(id: i64, patch: RecordPatch) -> Result<()> {
    if patch.is_empty() {
        return Err(BarflowError::NothingToChange);
    }
    let updated = open()?.update(id, &patch)?;
    println!("{}", record_table(std::slice::from_ref(&updated)));
    Ok(())
}

fn remove(id: i64) -> Result<()> {
    open()?.remove(id)?;
    println!("Removed staged transaction {id}");
    Ok(())
}

fn clear(yes: bool) -> Result<()> {
    let staging = open()?;
    let count = staging.count()?;
    if count == 0 {
        println!("No staged transactions.");
        return Ok(());
    }
    confirm(&format!("Discard {count} staged transactions?"), yes)?;
    staging.clear()?;
    println!("Staging cleared ({count} transactions discarded)");
    Ok(())
}

fn drop_database(yes: bool) -> Result<()> {
    let path = staging_path(&load_settings());
    if !database_exists(&path) {
        println!("No temporary database at {}", path.display());
        return Ok(());
    }
    confirm(&format!("Delete {}?", path.display()), yes)?;
    delete_database(&path)?;
    println!("Deleted {}", path.display());
    Ok(())
}
