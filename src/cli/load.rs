use std::path::PathBuf;

use crate::db::HISTORY_DB;
use crate::error::{BarflowError, Result};
use crate::settings::{load_settings, save_settings, shellexpand_path};

pub fn run(path: &str) -> Result<()> {
    let resolved = PathBuf::from(shellexpand_path(path));
    let db_path = resolved.join(HISTORY_DB);

    if !db_path.exists() {
        return Err(BarflowError::Settings(format!(
            "No database found at {}\nRun `barflow init --data-dir {}` to create one.",
            db_path.display(),
            resolved.display()
        )));
    }

    let mut settings = load_settings();
    settings.data_dir = resolved.to_string_lossy().to_string();
    save_settings(&settings)?;

    println!("Switched to {}", resolved.display());
    Ok(())
}
