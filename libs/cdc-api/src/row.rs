use crate::catalog::{EntityKind, EntitySchema, PASSTHROUGH_COLUMNS};
use crate::event::Operation;

/// Canonical field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Long(i64),
    Int(i32),
    Double(f64),
    Text(String),
    Null,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            Value::Int(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl From<Option<String>> for Value {
    fn from(v: Option<String>) -> Self {
        v.map(Value::Text).unwrap_or(Value::Null)
    }
}

/// Flattened business row, ready for the destination table.
///
/// Immutable once built. `fields` is positional in catalog order; the
/// passthrough columns are kept typed and rendered by [`EntityRow::columns`].
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRow {
    pub entity: EntityKind,
    pub fields: Vec<Value>,
    /// Serialized `source` block.
    pub source: Option<String>,
    pub op: Operation,
    pub ts_ms: i64,
    /// Serialized `transaction` block.
    pub transaction: Option<String>,
}

impl EntityRow {
    pub fn schema(&self) -> &'static EntitySchema {
        self.entity.schema()
    }

    /// Primary key value.
    pub fn key(&self) -> Option<i64> {
        self.fields.get(self.schema().key_index()).and_then(Value::as_i64)
    }

    /// Business field by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.schema().field_index(name).and_then(|i| self.fields.get(i))
    }

    /// All destination columns in order: business fields, then
    /// `source`, `op`, `ts_ms`, `transaction`.
    pub fn columns(&self) -> Vec<(&'static str, Value)> {
        let schema = self.schema();
        let mut columns: Vec<(&'static str, Value)> = schema
            .fields
            .iter()
            .zip(self.fields.iter())
            .map(|(spec, value)| (spec.name, value.clone()))
            .collect();
        let passthrough = [
            Value::from(self.source.clone()),
            Value::Text(self.op.code().to_string()),
            Value::Long(self.ts_ms),
            Value::from(self.transaction.clone()),
        ];
        columns.extend(PASSTHROUGH_COLUMNS.iter().map(|c| c.name).zip(passthrough));
        columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn latest_price() -> EntityRow {
        EntityRow {
            entity: EntityKind::LatestPrice,
            fields: vec![
                Value::Long(7),
                Value::Text("ETHUSDT".into()),
                Value::Text("3120.55".into()),
                Value::Long(1_700_000_000_000),
            ],
            source: Some(r#"{"db":"binance"}"#.into()),
            op: Operation::Create,
            ts_ms: 1_700_000_000_123,
            transaction: None,
        }
    }

    #[test]
    fn key_and_field_lookup() {
        let row = latest_price();
        assert_eq!(row.key(), Some(7));
        assert_eq!(row.field("symbol").and_then(Value::as_str), Some("ETHUSDT"));
        assert_eq!(row.field("missing"), None);
    }

    #[test]
    fn columns_follow_catalog_then_passthrough() {
        let columns = latest_price().columns();
        let names: Vec<&str> = columns.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, ["id", "symbol", "price", "time", "source", "op", "ts_ms", "transaction"]);
        assert_eq!(columns[4].1, Value::Text(r#"{"db":"binance"}"#.into()));
        assert_eq!(columns[5].1, Value::Text("c".into()));
        assert_eq!(columns[6].1, Value::Long(1_700_000_000_123));
        assert_eq!(columns[7].1, Value::Null);
    }
}
