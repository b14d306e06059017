use std::path::{Path, PathBuf};

use crate::db::{history_path, migrator_for, open_history, staging_path};
use crate::error::Result;
use crate::settings::{load_settings, save_settings, shellexpand_path};
use crate::staging::Staging;

pub fn run(data_dir: Option<String>) -> Result<()> {
    let mut settings = load_settings();
    if let Some(dir) = data_dir {
        settings.data_dir = shellexpand_path(&dir);
    }
    save_settings(&settings)?;

    let resolved = PathBuf::from(&settings.data_dir);
    std::fs::create_dir_all(&resolved)?;
    std::fs::create_dir_all(resolved.join("exports"))?;

    let migrator = migrator_for(&settings, None)?;
    let template = settings.template_db.as_deref().map(Path::new);
    let (_conn, report) = open_history(&history_path(&settings), template, &migrator)?;
    Staging::open(&staging_path(&settings))?;

    println!("Initialized BarFlow at {}", resolved.display());
    println!("Schema version: {}", report.to_version);
    Ok(())
}
