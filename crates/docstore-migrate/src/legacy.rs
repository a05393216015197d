//! Reading rows in the legacy layout.
//!
//! Legacy chunk and code-block rows carry document metadata in a nested
//! `metadata` cell, either a JSON object or a JSON-encoded string. Rows are
//! flattened so that top-level columns win over metadata keys.
//!
//! Embeddings arrive in several shapes:
//! - a plain numeric array
//! - a typed-array object `{"values": [..]}` or `{"data": [..]}`
//! - a base64 string of little-endian `f32`s

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};
use docstore_engine::Row;
use serde_json::Value;

const METADATA_COLUMN: &str = "metadata";

/// Merge the nested metadata cell into the row's top level.
pub fn flatten(mut row: Row) -> Row {
    let metadata = match row.remove(METADATA_COLUMN) {
        Some(Value::Object(map)) => map,
        Some(Value::String(text)) => match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => map,
            _ => return row,
        },
        _ => return row,
    };
    for (key, value) in metadata {
        match row.get(&key) {
            Some(existing) if !existing.is_null() => {}
            _ => {
                row.insert(key, value);
            }
        }
    }
    row
}

/// First non-empty string among `names`.
pub fn text(row: &Row, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| match row.get(*name) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// First non-negative integer among `names`. Numeric strings count.
pub fn integer(row: &Row, names: &[&str]) -> Option<u64> {
    names.iter().find_map(|name| match row.get(*name) {
        Some(Value::Number(n)) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| *f >= 0.0 && f.fract() == 0.0)
                .map(|f| f as u64)
        }),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Timestamp from RFC 3339 text or epoch seconds/milliseconds.
pub fn timestamp(row: &Row, names: &[&str]) -> Option<DateTime<Utc>> {
    names.iter().find_map(|name| match row.get(*name) {
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Some(Value::Number(n)) => {
            let raw = n.as_i64()?;
            // Values past year 2286 in seconds are taken as milliseconds.
            if raw > 10_000_000_000 {
                Utc.timestamp_millis_opt(raw).single()
            } else {
                Utc.timestamp_opt(raw, 0).single()
            }
        }
        _ => None,
    })
}

/// String list from an array cell or comma-separated text.
pub fn string_list(row: &Row, names: &[&str]) -> Vec<String> {
    for name in names {
        let items: Vec<String> = match row.get(*name) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect(),
            Some(Value::String(s)) => s.split(',').map(str::to_string).collect(),
            _ => continue,
        };
        let items: Vec<String> = items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if !items.is_empty() {
            return items;
        }
    }
    Vec::new()
}

/// Convert a legacy embedding cell into a plain vector. `Ok(empty)` for a
/// missing or null cell; `Err` with a reason for anything unreadable.
pub fn convert_vector(value: Option<&Value>) -> Result<Vec<f32>, String> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| format!("non-numeric vector element {}", item))
            })
            .collect(),
        Some(Value::Object(map)) => match map.get("values").or_else(|| map.get("data")) {
            Some(inner @ Value::Array(_)) => convert_vector(Some(inner)),
            _ => Err("vector object without `values` or `data` array".to_string()),
        },
        Some(Value::String(encoded)) => {
            if encoded.is_empty() {
                return Ok(Vec::new());
            }
            let bytes = STANDARD
                .decode(encoded)
                .map_err(|e| format!("invalid base64 vector: {}", e))?;
            if bytes.len() % 4 != 0 {
                return Err(format!("base64 vector has {} bytes, not a multiple of 4", bytes.len()));
            }
            Ok(bytes
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect())
        }
        Some(other) => Err(format!("unsupported vector cell {}", other)),
    }
}
