//! # docstore-engine
//!
//! Table engine seam for docstore vector storage, backed by LanceDB.
//!
//! Provides:
//! - JSON rows mapped onto Arrow record batches
//! - Schema inference from a table's first batch
//! - Typed predicates rendered as LanceDB SQL filters
//! - BTree scalar indexes and IVF-PQ vector indexes with cosine distance

pub mod batch;
pub mod db;
pub mod error;
pub mod filter;
pub mod index;
pub mod schema;

/// One table row: column name to JSON cell.
pub type Row = serde_json::Map<String, serde_json::Value>;

pub use db::{
    row_from_value, Engine, RowStream, ScanOptions, ScoredRow, TableIndexes, VectorIndexBuild,
};
pub use error::EngineError;
pub use filter::Filter;
pub use index::{DistanceMetric, VectorIndexKind, VectorIndexParams};
pub use schema::{vector_cell, Column, ColumnType, TableSchema};
