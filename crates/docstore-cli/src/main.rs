//! Docstore command-line tools
//!
//! # Usage
//!
//! ```bash
//! docstore migrate --source OLD --dest NEW [--batch-size N] [--dry-run]
//! docstore status [--db-path PATH]
//! docstore reindex [--db-path PATH]
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/docstore/config.toml)
//! 3. Environment variables (DOCSTORE_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use docstore_cli::{init_logging, load_settings, reindex, run_migration, show_status, Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref(), cli.log_level.as_deref())?;
    init_logging(&settings)?;

    match cli.command {
        Commands::Migrate(args) => run_migration(&settings, args).await?,
        Commands::Status { db_path } => show_status(&settings, db_path.as_deref()).await?,
        Commands::Reindex { db_path } => reindex(&settings, db_path.as_deref()).await?,
    }

    Ok(())
}
