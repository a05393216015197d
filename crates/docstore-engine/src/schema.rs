//! Table schemas inferred from the first batch of rows.
//!
//! A table's column types are fixed by the rows it is created from. Later
//! rows are conformed against that schema before they are written. The
//! schema maps one-to-one onto an Arrow schema; JSON columns are stored as
//! UTF-8 text tagged through field metadata.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineError;
use crate::Row;

/// Field metadata key marking a UTF-8 column that holds JSON text
const JSON_METADATA_KEY: &str = "docstore.json";

/// Column value type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ColumnType {
    Utf8,
    Int64,
    Float64,
    Boolean,
    /// Arbitrary nested JSON
    Json,
    /// Fixed-width float vector; empty vectors are stored as null
    Vector { width: usize },
}

impl ColumnType {
    fn infer(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::String(_) => Some(ColumnType::Utf8),
            Value::Bool(_) => Some(ColumnType::Boolean),
            Value::Number(n) if n.is_i64() => Some(ColumnType::Int64),
            Value::Number(_) => Some(ColumnType::Float64),
            Value::Array(items) if items.is_empty() => None,
            Value::Array(items) if items.iter().all(Value::is_number) => {
                Some(ColumnType::Vector { width: items.len() })
            }
            Value::Array(_) | Value::Object(_) => Some(ColumnType::Json),
        }
    }

    /// Whether this type can carry a scalar index
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            ColumnType::Utf8 | ColumnType::Int64 | ColumnType::Float64 | ColumnType::Boolean
        )
    }

    fn to_arrow(self) -> DataType {
        match self {
            ColumnType::Utf8 | ColumnType::Json => DataType::Utf8,
            ColumnType::Int64 => DataType::Int64,
            ColumnType::Float64 => DataType::Float64,
            ColumnType::Boolean => DataType::Boolean,
            ColumnType::Vector { width } => DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, false)),
                width as i32,
            ),
        }
    }
}

/// A named, typed column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

/// Ordered set of columns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TableSchema {
    pub columns: Vec<Column>,
}

impl TableSchema {
    /// Infer a schema from a batch.
    ///
    /// Column order follows the first row; columns only present in later
    /// rows are appended. Each column takes the type of its first non-null,
    /// non-empty value. Columns without one default to `Utf8`, or `Json`
    /// when they only ever held empty arrays.
    pub fn infer(table: &str, rows: &[Row]) -> Result<Self, EngineError> {
        if rows.is_empty() {
            return Err(EngineError::InvalidArgument(format!(
                "cannot infer schema for {} from an empty batch",
                table
            )));
        }

        let mut names: Vec<&String> = Vec::new();
        for row in rows {
            for name in row.keys() {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }

        let columns = names
            .into_iter()
            .map(|name| {
                let values = || rows.iter().filter_map(|r| r.get(name));
                let column_type = values()
                    .find_map(ColumnType::infer)
                    .unwrap_or_else(|| {
                        if values().any(Value::is_array) {
                            ColumnType::Json
                        } else {
                            ColumnType::Utf8
                        }
                    });
                Column {
                    name: name.clone(),
                    column_type,
                }
            })
            .collect();

        Ok(Self { columns })
    }

    /// Force `name` to be a vector column of `width`, adding it if absent.
    pub fn with_vector(mut self, name: &str, width: usize) -> Self {
        let column_type = ColumnType::Vector { width };
        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(column) => column.column_type = column_type,
            None => self.columns.push(Column {
                name: name.to_string(),
                column_type,
            }),
        }
        self
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Width of a vector column, if `name` is one
    pub fn vector_width(&self, name: &str) -> Option<usize> {
        match self.column(name)?.column_type {
            ColumnType::Vector { width } => Some(width),
            _ => None,
        }
    }

    /// Validate `row` against the schema and fill absent columns with null.
    pub fn conform(&self, table: &str, row: &mut Row) -> Result<(), EngineError> {
        if let Some(unknown) = row.keys().find(|k| self.column(k).is_none()) {
            return Err(EngineError::schema(
                table,
                format!("unknown column `{}`", unknown),
            ));
        }

        for column in &self.columns {
            let value = row.entry(column.name.clone()).or_insert(Value::Null);
            if value.is_null() {
                continue;
            }
            let ok = match (column.column_type, &*value) {
                (ColumnType::Utf8, Value::String(_)) => true,
                (ColumnType::Boolean, Value::Bool(_)) => true,
                (ColumnType::Int64, Value::Number(n)) => n.is_i64(),
                (ColumnType::Float64, Value::Number(_)) => true,
                (ColumnType::Json, _) => true,
                (ColumnType::Vector { width }, Value::Array(items)) => {
                    if !items.iter().all(Value::is_number) {
                        false
                    } else if items.is_empty() || items.len() == width {
                        true
                    } else {
                        return Err(EngineError::schema(
                            table,
                            format!(
                                "column `{}` expects vectors of width {}, got {}",
                                column.name,
                                width,
                                items.len()
                            ),
                        ));
                    }
                }
                _ => false,
            };
            if !ok {
                return Err(EngineError::schema(
                    table,
                    format!(
                        "column `{}` expects {:?}, got {}",
                        column.name, column.column_type, value
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Arrow schema with every column nullable.
    pub fn to_arrow(&self) -> Schema {
        let fields: Vec<Field> = self
            .columns
            .iter()
            .map(|column| {
                let field = Field::new(&column.name, column.column_type.to_arrow(), true);
                if column.column_type == ColumnType::Json {
                    field.with_metadata(HashMap::from([(
                        JSON_METADATA_KEY.to_string(),
                        "true".to_string(),
                    )]))
                } else {
                    field
                }
            })
            .collect();
        Schema::new(fields)
    }

    /// Read back a schema written by [`TableSchema::to_arrow`].
    pub fn from_arrow(table: &str, schema: &Schema) -> Result<Self, EngineError> {
        let columns = schema
            .fields()
            .iter()
            .map(|field| {
                let column_type = match field.data_type() {
                    DataType::Utf8 if field.metadata().contains_key(JSON_METADATA_KEY) => {
                        ColumnType::Json
                    }
                    DataType::Utf8 => ColumnType::Utf8,
                    DataType::Int64 => ColumnType::Int64,
                    DataType::Float64 => ColumnType::Float64,
                    DataType::Boolean => ColumnType::Boolean,
                    DataType::FixedSizeList(_, width) => ColumnType::Vector {
                        width: *width as usize,
                    },
                    other => {
                        return Err(EngineError::schema(
                            table,
                            format!("column `{}` has unsupported type {}", field.name(), other),
                        ))
                    }
                };
                Ok(Column {
                    name: field.name().clone(),
                    column_type,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { columns })
    }
}

/// Read a vector cell as f32s. Empty, null and non-numeric cells yield None.
pub fn vector_cell(row: &Row, column: &str) -> Option<Vec<f32>> {
    let items = row.get(column)?.as_array()?;
    if items.is_empty() {
        return None;
    }
    items.iter().map(|v| v.as_f64().map(|f| f as f32)).collect()
}
