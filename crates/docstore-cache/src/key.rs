//! Canonical cache keys for read queries.
//!
//! A query is a namespace, an operation and a set of named parameters.
//! Parameters are rendered with object keys sorted at every depth, so two
//! queries holding the same values hash identically no matter the order
//! they were built in.
//!
//! Key format: `{namespace}:{operation}:{sha256 hex}`

use std::collections::BTreeMap;

use serde_json::Value;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq)]
pub struct CacheQuery {
    namespace: String,
    operation: String,
    params: BTreeMap<String, Value>,
}

impl CacheQuery {
    pub fn new(namespace: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            operation: operation.into(),
            params: BTreeMap::new(),
        }
    }

    /// Add a parameter (builder pattern). Setting a name twice keeps the
    /// last value.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Stable rendering of the parameters
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        out.push('{');
        for (i, (name, value)) in self.params.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            write_canonical(&mut out, &Value::String(name.clone()));
            out.push(':');
            write_canonical(&mut out, value);
        }
        out.push('}');
        out
    }

    pub fn key(&self) -> String {
        let digest = Sha256::digest(self.canonical().as_bytes());
        format!("{}:{}:{}", self.namespace, self.operation, hex::encode(digest))
    }

    /// Pattern matching every key in a namespace
    pub fn namespace_pattern(namespace: &str) -> String {
        format!("{}:*", namespace)
    }
}

fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (name, inner)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(out, &Value::String(name.clone()));
                out.push(':');
                write_canonical(out, inner);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Glob match supporting `*` only.
pub fn pattern_matches(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }

    let mut rest = key;
    for (i, part) in parts.iter().enumerate() {
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}
