//! # docstore-migrate
//!
//! One-shot migration from the legacy single-table layout (chunks carrying
//! document metadata inline) into the normalized, versioned layout.
//!
//! ## Usage
//!
//! ```ignore
//! let migrator = Migrator::from_settings(&settings);
//! let result = migrator.migrate(&legacy_path, &new_path, &options).await?;
//! assert!(result.success);
//! ```

pub mod error;
pub mod keywords;
pub mod legacy;
pub mod migrator;
pub mod options;
pub mod retry;
pub mod source;

pub use error::MigrationError;
pub use migrator::{current_schema_version, prepare_destination_schema, validate_migration, Migrator};
pub use options::{
    MigrationCounts, MigrationOptions, MigrationResult, ValidationReport, TARGET_SCHEMA_VERSION,
};
pub use retry::RetryPolicy;
pub use source::{find_backups, locate_source};
