use crate::cli::{AddKind, EntryArgs};
use crate::db::staging_path;
use crate::error::{BarflowError, Result};
use crate::fmt::money;
use crate::importer::{import_timestamp, manual_record, EntryKind, ManualEntry};
use crate::settings::load_settings;
use crate::staging::Staging;

pub fn run(kind: AddKind, args: EntryArgs) -> Result<()> {
    let entry = ManualEntry {
        kind: match kind {
            AddKind::Expense => EntryKind::Expense,
            AddKind::Income => EntryKind::Income,
        },
        date: args.date,
        amount: args.amount,
        description: args.description,
        supplier: args.supplier,
        supplier_ref: args.supplier_ref,
        pos_operation: args.pos_operation,
        pos_gross: args.gross,
        pos_fee: args.fee,
    };
    let record = manual_record(&entry)?;

    let staging = Staging::open(&staging_path(&load_settings()))?;
    let (added, _) = staging.add_records(std::slice::from_ref(&record), import_timestamp())?;
    if added == 0 {
        return Err(BarflowError::DuplicateRecord);
    }
    println!("Staged {} on {}", money(record.net_amount), record.day());
    Ok(())
}
