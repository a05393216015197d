//! Command implementations for the docstore CLI.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use docstore_migrate::{current_schema_version, MigrationOptions, MigrationResult, Migrator};
use docstore_storage::{AdapterConfig, IndexOutcome, StorageAdapter, EMBEDDING_COLUMN};
use docstore_types::{tables, Settings};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::MigrateArgs;

/// Load layered settings and apply the CLI log level override.
pub fn load_settings(config_path: Option<&str>, log_level: Option<&str>) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    if let Some(level) = log_level {
        settings.log_level = level.to_string();
    }
    Ok(settings)
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init_logging(settings: &Settings) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.log_level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

fn db_path(settings: &Settings, db_path_override: Option<&str>) -> PathBuf {
    match db_path_override {
        Some(path) => PathBuf::from(path),
        None => settings.expanded_db_path(),
    }
}

/// Options for a run: configured defaults with CLI flags applied.
pub fn migration_options(settings: &Settings, args: &MigrateArgs) -> MigrationOptions {
    let mut options = MigrationOptions::from(&settings.migration);
    if let Some(batch_size) = args.batch_size {
        options.batch_size = batch_size;
    }
    options.dry_run = args.dry_run;
    options.build_indexes = !args.skip_indexes;
    options.validate = !args.skip_validation;
    options
}

pub async fn run_migration(settings: &Settings, args: MigrateArgs) -> Result<()> {
    let options = migration_options(settings, &args);
    let dest = db_path(settings, args.dest.as_deref());

    let result = Migrator::from_settings(settings)
        .migrate(Path::new(&args.source), &dest, &options)
        .await
        .context("Migration could not start")?;
    print_migration(&result);

    if !result.success {
        bail!("Migration failed: {}", result.errors.join("; "));
    }
    Ok(())
}

fn print_migration(result: &MigrationResult) {
    if let Some(source) = &result.source_used {
        println!("Source:       {}", source.display());
    }
    println!("Destination:  {}", result.destination.display());
    if result.dry_run {
        println!("Dry run, nothing written");
        return;
    }

    let counts = &result.counts;
    println!("Documents:    {}", counts.documents);
    println!("Chunks:       {}", counts.chunks);
    println!(
        "Code blocks:  {} ({} empty skipped)",
        counts.code_blocks, counts.skipped_code_blocks
    );
    println!("Tags:         {}", counts.tags);
    println!("Languages:    {}", counts.languages);
    println!("Keywords:     {}", counts.keywords);
    println!(
        "Indexes:      {} scalar, {} vector built, {} vector skipped",
        counts.scalar_indexes, counts.vector_indexes_built, counts.vector_indexes_skipped
    );
    if counts.dropped_vectors > 0 {
        println!("Dropped vectors: {}", counts.dropped_vectors);
    }
    if let Some(version) = &result.schema_version {
        println!("Schema version: {}", version);
    }
    for warning in &result.warnings {
        println!("warning: {}", warning);
    }
    for error in &result.errors {
        println!("error: {}", error);
    }
    println!("Elapsed:      {:.2}s", result.elapsed.as_secs_f64());
}

async fn open_existing(settings: &Settings, path: &Path) -> Result<Option<StorageAdapter>> {
    if !path.exists() {
        println!("No store at {}", path.display());
        return Ok(None);
    }
    let store = StorageAdapter::open(path, AdapterConfig::from(settings))
        .await
        .with_context(|| format!("Failed to open store at {}", path.display()))?;
    Ok(Some(store))
}

pub async fn show_status(settings: &Settings, db_path_override: Option<&str>) -> Result<()> {
    let path = db_path(settings, db_path_override);
    let Some(store) = open_existing(settings, &path).await? else {
        return Ok(());
    };

    println!("Store: {}", path.display());
    match current_schema_version(&store).await? {
        Some(version) => println!(
            "Schema version: {} (applied {})",
            version.version,
            version.applied_at.to_rfc3339()
        ),
        None => println!("Schema version: none recorded"),
    }

    for table in tables::ALL {
        if store.table_exists(table).await? {
            println!("  {:<20} {:>8} rows", table, store.count_rows(table).await?);
        } else {
            println!("  {:<20} {:>8}", table, "-");
        }
    }

    let stats = store.stats().await?;
    for table in &stats.tables {
        if table.created {
            println!(
                "  {} vector index: {}",
                table.kind.table_name(),
                if table.vector_index { "loaded" } else { "none" }
            );
        }
    }

    store.close().await?;
    Ok(())
}

pub async fn reindex(settings: &Settings, db_path_override: Option<&str>) -> Result<()> {
    let path = db_path(settings, db_path_override);
    let Some(store) = open_existing(settings, &path).await? else {
        return Ok(());
    };

    let stats = store.stats().await?;
    for table in stats.tables.iter().filter(|t| t.created) {
        let name = table.kind.table_name();
        let outcome = store.build_vector_index(name, EMBEDDING_COLUMN).await;
        info!(table = name, ?outcome, "Reindex finished");
        match outcome {
            IndexOutcome::Built { rows_indexed } => {
                println!("{}: indexed {} rows", name, rows_indexed)
            }
            IndexOutcome::Skipped { rows, required } => println!(
                "{}: {} rows, {} needed for an index; exhaustive search in use",
                name, rows, required
            ),
            IndexOutcome::NoVectors => println!("{}: no embeddings yet", name),
            IndexOutcome::InProgress => println!("{}: build already running", name),
            IndexOutcome::TimedOut => println!("{}: build timed out", name),
            IndexOutcome::Failed(reason) => println!("{}: build failed: {}", name, reason),
        }
    }

    store.close().await?;
    Ok(())
}
