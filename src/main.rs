mod cli;
mod db;
mod error;
mod fmt;
mod history;
mod importer;
mod migrator;
mod models;
mod record;
mod reports;
mod settings;
mod sheet;
mod staging;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};

fn init_tracing(cli: &Cli) {
    if cli.quiet {
        return;
    }

    let filter = match cli.verbose {
        0 => "warn",
        1 => "warn,barflow=info",
        2 => "info,barflow=debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    let result = match cli.command {
        Commands::Init { data_dir } => cli::init::run(data_dir),
        Commands::Status => cli::status::run(),
        Commands::Load { path } => cli::load::run(&path),
        Commands::Migrate { dir } => cli::migrate::run(dir.as_deref()),
        Commands::Import { kind, file, force } => cli::import::run(&kind, &file, force),
        Commands::Add { kind, entry } => cli::add::run(kind, entry),
        Commands::Staged { command } => cli::staged::run(command),
        Commands::Commit => cli::commit::run(),
        Commands::History { command } => cli::history::run(command),
        Commands::Report { command } => cli::report::run(command),
        Commands::Export { output, filter } => cli::export::run(output, &filter),
        Commands::Demo { month, seed } => cli::demo::run(month.as_deref(), seed),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
