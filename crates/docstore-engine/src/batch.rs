//! Conversion between JSON rows and Arrow record batches.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, FixedSizeListArray, Float32Array, Float64Array, Int64Array,
    RecordBatch, StringArray,
};
use arrow::datatypes::{DataType, Field};
use serde_json::{Number, Value};

use crate::error::EngineError;
use crate::schema::{vector_cell, ColumnType, TableSchema};
use crate::Row;

/// Column LanceDB adds to vector search results
pub const DISTANCE_COLUMN: &str = "_distance";

static NULL: Value = Value::Null;

/// Build a batch laid out as `schema`. Rows must already be conformed.
pub fn rows_to_batch(
    table: &str,
    schema: &TableSchema,
    rows: &[Row],
) -> Result<RecordBatch, EngineError> {
    let arrays = schema
        .columns
        .iter()
        .map(|column| {
            let cells = rows.iter().map(|row| row.get(&column.name).unwrap_or(&NULL));
            let array: ArrayRef = match column.column_type {
                ColumnType::Utf8 => Arc::new(StringArray::from(
                    cells.map(|v| v.as_str().map(str::to_string)).collect::<Vec<_>>(),
                )),
                ColumnType::Json => Arc::new(StringArray::from(
                    cells
                        .map(|v| (!v.is_null()).then(|| v.to_string()))
                        .collect::<Vec<_>>(),
                )),
                ColumnType::Int64 => Arc::new(Int64Array::from(
                    cells.map(Value::as_i64).collect::<Vec<_>>(),
                )),
                ColumnType::Float64 => Arc::new(Float64Array::from(
                    cells.map(Value::as_f64).collect::<Vec<_>>(),
                )),
                ColumnType::Boolean => Arc::new(BooleanArray::from(
                    cells.map(Value::as_bool).collect::<Vec<_>>(),
                )),
                ColumnType::Vector { width } => Arc::new(vector_array(
                    table,
                    width,
                    rows.iter().map(|row| vector_cell(row, &column.name)),
                )?),
            };
            Ok(array)
        })
        .collect::<Result<Vec<_>, EngineError>>()?;

    RecordBatch::try_new(Arc::new(schema.to_arrow()), arrays)
        .map_err(|e| EngineError::arrow(table, e))
}

/// Missing vectors are null entries over zero-filled slots.
fn vector_array(
    table: &str,
    width: usize,
    vectors: impl Iterator<Item = Option<Vec<f32>>>,
) -> Result<FixedSizeListArray, EngineError> {
    let mut values: Vec<f32> = Vec::new();
    let mut validity: Vec<bool> = Vec::new();
    for vector in vectors {
        match vector {
            Some(v) => {
                values.extend(v);
                validity.push(true);
            }
            None => {
                values.extend(std::iter::repeat(0.0).take(width));
                validity.push(false);
            }
        }
    }

    let field = Arc::new(Field::new("item", DataType::Float32, false));
    FixedSizeListArray::try_new(
        field,
        width as i32,
        Arc::new(Float32Array::from(values)),
        Some(validity.into()),
    )
    .map_err(|e| EngineError::arrow(table, e))
}

/// Decode a result batch back into rows. Columns the schema does not name,
/// such as `_distance`, are skipped; null vectors read back as `[]`.
pub fn batch_to_rows(
    table: &str,
    schema: &TableSchema,
    batch: &RecordBatch,
) -> Result<Vec<Row>, EngineError> {
    let mut rows = vec![Row::new(); batch.num_rows()];
    for column in &schema.columns {
        let Some(array) = batch.column_by_name(&column.name) else {
            continue;
        };
        let invalid = || {
            EngineError::schema(
                table,
                format!("column `{}` is not {:?}", column.name, column.column_type),
            )
        };

        for (i, row) in rows.iter_mut().enumerate() {
            let value = if array.is_null(i) {
                match column.column_type {
                    ColumnType::Vector { .. } => Value::Array(Vec::new()),
                    _ => Value::Null,
                }
            } else {
                match column.column_type {
                    ColumnType::Utf8 => {
                        let strings = array.as_any().downcast_ref::<StringArray>().ok_or_else(invalid)?;
                        Value::String(strings.value(i).to_string())
                    }
                    ColumnType::Json => {
                        let strings = array.as_any().downcast_ref::<StringArray>().ok_or_else(invalid)?;
                        serde_json::from_str(strings.value(i))?
                    }
                    ColumnType::Int64 => {
                        let ints = array.as_any().downcast_ref::<Int64Array>().ok_or_else(invalid)?;
                        Value::from(ints.value(i))
                    }
                    ColumnType::Float64 => {
                        let floats = array.as_any().downcast_ref::<Float64Array>().ok_or_else(invalid)?;
                        Number::from_f64(floats.value(i)).map_or(Value::Null, Value::Number)
                    }
                    ColumnType::Boolean => {
                        let bools = array.as_any().downcast_ref::<BooleanArray>().ok_or_else(invalid)?;
                        Value::Bool(bools.value(i))
                    }
                    ColumnType::Vector { .. } => {
                        let lists = array
                            .as_any()
                            .downcast_ref::<FixedSizeListArray>()
                            .ok_or_else(invalid)?;
                        let item = lists.value(i);
                        let floats = item.as_any().downcast_ref::<Float32Array>().ok_or_else(invalid)?;
                        Value::Array(floats.values().iter().map(|f| Value::from(*f)).collect())
                    }
                }
            };
            row.insert(column.name.clone(), value);
        }
    }
    Ok(rows)
}

/// The `_distance` column of a vector search batch.
pub fn distances(table: &str, batch: &RecordBatch) -> Result<Vec<f32>, EngineError> {
    let column = batch
        .column_by_name(DISTANCE_COLUMN)
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
        .ok_or_else(|| EngineError::schema(table, "search result has no distance column"))?;
    Ok((0..column.len()).map(|i| column.value(i)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_rows_survive_a_batch() {
        let rows = vec![
            row(json!({
                "id": "a",
                "n": 7,
                "score": 0.25,
                "ok": true,
                "tags": ["x", "y"],
                "embedding": [1.0, 0.5],
                "context": null
            })),
            row(json!({
                "id": "b",
                "n": null,
                "score": 1.5,
                "ok": false,
                "tags": null,
                "embedding": [],
                "context": "note"
            })),
        ];
        let schema = TableSchema::infer("t", &rows).unwrap();
        let batch = rows_to_batch("t", &schema, &rows).unwrap();
        assert_eq!(batch.num_rows(), 2);

        let back = batch_to_rows("t", &schema, &batch).unwrap();
        assert_eq!(back[0]["tags"], json!(["x", "y"]));
        assert_eq!(back[0]["embedding"], json!([1.0, 0.5]));
        assert_eq!(back[0]["context"], Value::Null);
        assert_eq!(back[1]["embedding"], json!([]));
        assert_eq!(back[1]["n"], Value::Null);
        assert_eq!(back[1]["context"], json!("note"));
        assert_eq!(back[1]["ok"], json!(false));
    }
}
