//! Row model shared by every storage backend: JSON rows, natural keys,
//! structured filters and table / schema-object definitions.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FillerError;

/// A table row: column name → value.
pub type Row = serde_json::Map<String, Value>;

/// Convert a JSON object (usually built with `json!`) into a [`Row`].
pub fn row_from(value: Value) -> Result<Row, FillerError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(FillerError::Other(format!(
            "expected a JSON object for a row, got {other}"
        ))),
    }
}

// ─── NaturalKey ───────────────────────────────────────────────────────────────

/// The ordered values of a row's natural-key columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NaturalKey(pub Vec<Value>);

impl NaturalKey {
    /// Extract the key of `row` for the given key columns.
    pub fn from_row(table: &str, row: &Row, columns: &[&str]) -> Result<Self, FillerError> {
        let mut values = Vec::with_capacity(columns.len());
        for column in columns {
            match row.get(*column) {
                Some(value) if !value.is_null() => values.push(value.clone()),
                _ => {
                    return Err(FillerError::Other(format!(
                        "row for '{table}' has no value for key column '{column}'"
                    )))
                }
            }
        }
        Ok(Self(values))
    }

    /// Canonical string form (a JSON array), used as the storage row key.
    pub fn encode(&self) -> String {
        Value::Array(self.0.clone()).to_string()
    }

    pub fn decode(encoded: &str) -> Result<Self, FillerError> {
        Ok(Self(serde_json::from_str(encoded)?))
    }

    /// A filter selecting exactly the row with this key.
    pub fn filter(&self, columns: &[&str]) -> Filter {
        columns
            .iter()
            .zip(&self.0)
            .fold(Filter::new(), |f, (column, value)| f.eq(*column, value.clone()))
    }
}

// ─── Filter ───────────────────────────────────────────────────────────────────

/// A single column predicate. A missing column reads as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    /// Equality; `Eq(col, null)` behaves like `IsNull`.
    Eq(String, Value),
    /// Membership in a list of values.
    In(String, Vec<Value>),
    IsNull(String),
    NotNull(String),
    Lte(String, Value),
    Gte(String, Value),
}

impl Condition {
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Self::Eq(column, expected) => {
                let actual = column_value(row, column);
                if expected.is_null() {
                    actual.is_null()
                } else {
                    values_equal(actual, expected)
                }
            }
            Self::In(column, list) => {
                let actual = column_value(row, column);
                list.iter().any(|v| values_equal(actual, v))
            }
            Self::IsNull(column) => column_value(row, column).is_null(),
            Self::NotNull(column) => !column_value(row, column).is_null(),
            Self::Lte(column, bound) => matches!(
                partial_compare(column_value(row, column), bound),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Self::Gte(column, bound) => matches!(
                partial_compare(column_value(row, column), bound),
                Some(Ordering::Greater | Ordering::Equal)
            ),
        }
    }
}

/// Conjunction of conditions. An empty filter matches every row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Eq(column.into(), value.into()));
        self
    }

    /// Column value is one of `values`.
    pub fn any<V: Into<Value>>(
        mut self,
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.conditions.push(Condition::In(
            column.into(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn is_null(mut self, column: impl Into<String>) -> Self {
        self.conditions.push(Condition::IsNull(column.into()));
        self
    }

    pub fn not_null(mut self, column: impl Into<String>) -> Self {
        self.conditions.push(Condition::NotNull(column.into()));
        self
    }

    pub fn lte(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Lte(column.into(), value.into()));
        self
    }

    pub fn gte(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Gte(column.into(), value.into()));
        self
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.conditions.iter().all(|c| c.matches(row))
    }
}

// ─── Query ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Order {
    Asc,
    Desc,
}

/// A filtered, ordered, optionally limited read.
///
/// Rows with equal sort columns come back in natural-key order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub filter: Filter,
    pub order_by: Vec<(String, Order)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }

    pub fn order_by(mut self, column: impl Into<String>, order: Order) -> Self {
        self.order_by.push((column.into(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Compare two rows according to `order_by`.
    pub fn compare(&self, a: &Row, b: &Row) -> Ordering {
        for (column, order) in &self.order_by {
            let ord = compare_values(column_value(a, column), column_value(b, column));
            let ord = match order {
                Order::Asc => ord,
                Order::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

// ─── Definitions ──────────────────────────────────────────────────────────────

/// A base table owned by a contract module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    pub natural_key: Vec<String>,
}

impl TableDef {
    pub fn new(name: impl Into<String>, natural_key: &[&str]) -> Self {
        Self {
            name: name.into(),
            natural_key: natural_key.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// Kind of a derived schema object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectKind {
    View,
    Procedure,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::View => write!(f, "view"),
            Self::Procedure => write!(f, "procedure"),
        }
    }
}

/// A named view or procedure backed by one script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaObject {
    pub kind: ObjectKind,
    pub name: String,
    pub script: String,
}

impl SchemaObject {
    pub fn view(name: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            kind: ObjectKind::View,
            name: name.into(),
            script: script.into(),
        }
    }

    pub fn procedure(name: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            kind: ObjectKind::Procedure,
            name: name.into(),
            script: script.into(),
        }
    }
}

// ─── Value comparison ─────────────────────────────────────────────────────────

static NULL: Value = Value::Null;

fn column_value<'a>(row: &'a Row, column: &str) -> &'a Value {
    row.get(column).unwrap_or(&NULL)
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => partial_compare(a, b) == Some(Ordering::Equal),
        _ => a == b,
    }
}

/// Compare two scalars of the same kind; `None` for mismatched kinds or nulls.
pub fn partial_compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                Some(x.cmp(&y))
            } else if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
                Some(x.cmp(&y))
            } else {
                x.as_f64()?.partial_cmp(&y.as_f64()?)
            }
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Total order used for sorting: null < bool < number < string < array < object.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    match partial_compare(a, b) {
        Some(ord) => ord,
        None => rank(a)
            .cmp(&rank(b))
            .then_with(|| a.to_string().cmp(&b.to_string())),
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn asset(id: &str, owner: Option<&str>, block: u64) -> Row {
        row_from(json!({
            "contract": "atomicassets",
            "asset_id": id,
            "owner": owner,
            "minted_at_block": block,
        }))
        .unwrap()
    }

    #[test]
    fn natural_key_encoding() {
        let row = asset("12345", Some("alice"), 100);
        let key = NaturalKey::from_row("assets", &row, &["contract", "asset_id"]).unwrap();
        assert_eq!(key.encode(), r#"["atomicassets","12345"]"#);
        assert_eq!(NaturalKey::decode(&key.encode()).unwrap(), key);
        assert!(key.filter(&["contract", "asset_id"]).matches(&row));
    }

    #[test]
    fn natural_key_requires_all_columns() {
        let row = asset("1", None, 1);
        assert!(NaturalKey::from_row("assets", &row, &["contract", "owner"]).is_err());
        assert!(NaturalKey::from_row("assets", &row, &["contract", "template_id"]).is_err());
    }

    #[test]
    fn filter_conditions() {
        let burned = asset("1", None, 100);
        let owned = asset("2", Some("alice"), 101);

        let f = Filter::new().eq("contract", "atomicassets").is_null("owner");
        assert!(f.matches(&burned));
        assert!(!f.matches(&owned));

        let f = Filter::new().any("asset_id", ["2", "3"]).eq("owner", "alice");
        assert!(f.matches(&owned));
        assert!(!f.matches(&burned));

        let f = Filter::new().lte("minted_at_block", 100);
        assert!(f.matches(&burned));
        assert!(!f.matches(&owned));

        assert!(Filter::new().gte("minted_at_block", 101).matches(&owned));
        assert!(Filter::new().eq("owner", Value::Null).matches(&burned));
        assert!(Filter::new().not_null("owner").matches(&owned));
        assert!(Filter::new().matches(&owned));
    }

    #[test]
    fn query_ordering() {
        let q = Query::new(Filter::new()).order_by("minted_at_block", Order::Desc);
        let a = asset("1", None, 100);
        let b = asset("2", None, 101);
        assert_eq!(q.compare(&a, &b), Ordering::Greater);
        assert_eq!(compare_values(&Value::Null, &json!(0)), Ordering::Less);
        assert_eq!(compare_values(&json!(2), &json!(10)), Ordering::Less);
    }
}
