use std::fmt;

use crate::catalog::EntityKind;
use crate::row::Value;

/// Change operation carried in the envelope's `op` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Update,
    Delete,
    /// Snapshot read emitted while the connector takes its initial snapshot.
    Read,
}

impl Operation {
    /// Single-letter wire code (`c`, `u`, `d`, `r`).
    pub fn code(self) -> &'static str {
        match self {
            Operation::Create => "c",
            Operation::Update => "u",
            Operation::Delete => "d",
            Operation::Read => "r",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "c" => Some(Operation::Create),
            "u" => Some(Operation::Update),
            "d" => Some(Operation::Delete),
            "r" => Some(Operation::Read),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Row snapshot inside the envelope. Positional: order matches the
/// entity's catalog fields.
#[derive(Debug, Clone, PartialEq)]
pub struct RowImage(pub Vec<Value>);

/// A validated change envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub entity: EntityKind,
    /// Prior row state; `None` for creations and snapshot reads.
    pub before: Option<RowImage>,
    /// New row state; `None` for deletions.
    pub after: Option<RowImage>,
    /// Connector provenance, opaque to the engine.
    pub source: Option<serde_json::Value>,
    pub op: Operation,
    /// Transaction metadata, opaque to the engine.
    pub transaction: Option<serde_json::Value>,
    pub ts_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_codes() {
        for op in [Operation::Create, Operation::Update, Operation::Delete, Operation::Read] {
            assert_eq!(Operation::from_code(op.code()), Some(op));
        }
        assert_eq!(Operation::from_code("t"), None);
        assert_eq!(Operation::Create.to_string(), "c");
    }
}
