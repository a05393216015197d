//! Typed row predicates, rendered as LanceDB SQL filter expressions.
//!
//! Equality, membership, null tests and boolean composition are all the
//! adapter and the migration engine need. Column names are backtick-quoted
//! and string literals escape embedded quotes, so caller-supplied values
//! never change the shape of the expression.

use std::fmt;

use serde_json::Value;

/// Predicate evaluated against a row
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    In(String, Vec<Value>),
    NotNull(String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(column.into(), value.into())
    }

    pub fn in_list<V: Into<Value>>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Filter::In(column.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn not_null(column: impl Into<String>) -> Self {
        Filter::NotNull(column.into())
    }

    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::And(mut filters) => {
                filters.push(other);
                Filter::And(filters)
            }
            f => Filter::And(vec![f, other]),
        }
    }

    pub fn negate(self) -> Self {
        Filter::Not(Box::new(self))
    }

    /// SQL predicate accepted by `only_if`, `delete` and `count_rows`.
    pub fn to_sql(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, filters: &[Filter], op: &str) -> fmt::Result {
            if filters.is_empty() {
                return write!(f, "{}", if op == "AND" { "TRUE" } else { "FALSE" });
            }
            write!(f, "(")?;
            for (i, filter) in filters.iter().enumerate() {
                if i > 0 {
                    write!(f, " {} ", op)?;
                }
                write!(f, "{}", filter)?;
            }
            write!(f, ")")
        }

        match self {
            Filter::Eq(column, Value::Null) => write!(f, "{} IS NULL", identifier(column)),
            Filter::Eq(column, value) => write!(f, "{} = {}", identifier(column), literal(value)),
            Filter::In(column, values) => {
                let (nulls, present): (Vec<&Value>, Vec<&Value>) =
                    values.iter().partition(|v| v.is_null());
                let column = identifier(column);
                let list = || {
                    present
                        .iter()
                        .map(|v| literal(v))
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                match (present.is_empty(), nulls.is_empty()) {
                    (true, true) => write!(f, "FALSE"),
                    (true, false) => write!(f, "{} IS NULL", column),
                    (false, true) => write!(f, "{} IN ({})", column, list()),
                    (false, false) => {
                        write!(f, "({} IN ({}) OR {} IS NULL)", column, list(), column)
                    }
                }
            }
            Filter::NotNull(column) => write!(f, "{} IS NOT NULL", identifier(column)),
            Filter::And(filters) => join(f, filters, "AND"),
            Filter::Or(filters) => join(f, filters, "OR"),
            Filter::Not(inner) => write!(f, "NOT ({})", inner),
        }
    }
}

fn identifier(column: &str) -> String {
    format!("`{}`", column.replace('`', "``"))
}

/// SQL literal for a JSON cell. Nested values compare against the JSON
/// text a `Json` column stores.
pub(crate) fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote(s),
        Value::Array(_) | Value::Object(_) => quote(&value.to_string()),
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}
