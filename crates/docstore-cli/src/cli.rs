//! CLI argument parsing for the docstore tools.
//!
//! CLI flags override every other configuration source.

use clap::{Args, Parser, Subcommand};

/// Docstore vector-store tools
#[derive(Parser, Debug)]
#[command(name = "docstore")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/docstore/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Migrate a legacy store into the normalized layout
    Migrate(MigrateArgs),

    /// Show row counts, index state and schema version
    Status {
        /// Database path (default from config)
        #[arg(long)]
        db_path: Option<String>,
    },

    /// Rebuild vector indexes on chunks and code blocks
    Reindex {
        /// Database path (default from config)
        #[arg(long)]
        db_path: Option<String>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct MigrateArgs {
    /// Legacy store to read (a newer backup next to it is preferred)
    #[arg(short, long)]
    pub source: String,

    /// Store to write (default: configured database path)
    #[arg(short, long)]
    pub dest: Option<String>,

    /// Rows per destination write
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Locate the source and stop
    #[arg(long)]
    pub dry_run: bool,

    /// Do not create scalar or vector indexes
    #[arg(long)]
    pub skip_indexes: bool,

    /// Do not compare source and destination counts
    #[arg(long)]
    pub skip_validation: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_migrate() {
        let cli = Cli::parse_from([
            "docstore",
            "migrate",
            "--source",
            "/data/old",
            "--dest",
            "/data/new",
            "--batch-size",
            "50",
            "--dry-run",
        ]);
        match cli.command {
            Commands::Migrate(args) => {
                assert_eq!(args.source, "/data/old");
                assert_eq!(args.dest.as_deref(), Some("/data/new"));
                assert_eq!(args.batch_size, Some(50));
                assert!(args.dry_run);
                assert!(!args.skip_indexes);
                assert!(!args.skip_validation);
            }
            _ => panic!("Expected Migrate command"),
        }
    }

    #[test]
    fn test_cli_migrate_requires_source() {
        assert!(Cli::try_parse_from(["docstore", "migrate"]).is_err());
    }

    #[test]
    fn test_cli_status_with_db_path() {
        let cli = Cli::parse_from(["docstore", "status", "--db-path", "/tmp/db"]);
        match cli.command {
            Commands::Status { db_path } => assert_eq!(db_path.as_deref(), Some("/tmp/db")),
            _ => panic!("Expected Status command"),
        }
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::parse_from(["docstore", "reindex", "--config", "/etc/docstore.toml", "-l", "debug"]);
        assert_eq!(cli.config.as_deref(), Some("/etc/docstore.toml"));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(matches!(cli.command, Commands::Reindex { db_path: None }));
    }
}
