//! Docstore CLI library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (migrate, status, reindex)

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands, MigrateArgs};
pub use commands::{init_logging, load_settings, reindex, run_migration, show_status};
