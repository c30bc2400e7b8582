//! Projection of change events onto destination rows.

use cdc_api::{ChangeEvent, EntityRow, Operation};

/// Turn a creation event into a destination row.
///
/// Updates, deletes, snapshot reads and creations without an `after` image
/// yield `None`. Business fields are taken from `after` in catalog order;
/// `source` and `transaction` are kept as compact JSON text.
pub fn flatten(event: ChangeEvent) -> Option<EntityRow> {
    if event.op != Operation::Create {
        return None;
    }
    let after = event.after?;
    Some(EntityRow {
        entity: event.entity,
        fields: after.0,
        source: event.source.map(|v| v.to_string()),
        op: event.op,
        ts_ms: event.ts_ms,
        transaction: event.transaction.map(|v| v.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdc_api::{EntityKind, RowImage, Value};
    use proptest::prelude::*;
    use serde_json::json;

    fn image(id: i64) -> RowImage {
        RowImage(vec![
            Value::Long(id),
            Value::Text("BTCUSDT".into()),
            Value::Text("50000.00".into()),
            Value::Long(1_700_000_000_000),
        ])
    }

    fn event(op: Operation, before: Option<RowImage>, after: Option<RowImage>) -> ChangeEvent {
        ChangeEvent {
            entity: EntityKind::LatestPrice,
            before,
            after,
            source: Some(json!({"db": "binance", "table": "latest_prices"})),
            op,
            transaction: None,
            ts_ms: 1_700_000_000_250,
        }
    }

    #[test]
    fn creation_becomes_row() {
        let row = flatten(event(Operation::Create, None, Some(image(1)))).unwrap();
        assert_eq!(row.key(), Some(1));
        assert_eq!(row.op, Operation::Create);
        assert_eq!(row.ts_ms, 1_700_000_000_250);
        assert_eq!(row.source.as_deref(), Some(r#"{"db":"binance","table":"latest_prices"}"#));
        assert_eq!(row.transaction, None);
        assert_eq!(row.field("price"), Some(&Value::Text("50000.00".into())));
    }

    #[test]
    fn creation_without_after_is_dropped() {
        assert_eq!(flatten(event(Operation::Create, None, None)), None);
    }

    fn op_strategy() -> impl Strategy<Value = Operation> {
        prop_oneof![
            Just(Operation::Create),
            Just(Operation::Update),
            Just(Operation::Delete),
            Just(Operation::Read),
        ]
    }

    proptest! {
        #[test]
        fn only_creations_with_after_survive(
            op in op_strategy(),
            id in any::<i64>(),
            has_before in any::<bool>(),
            has_after in any::<bool>(),
        ) {
            let before = has_before.then(|| image(id));
            let after = has_after.then(|| image(id));
            let out = flatten(event(op, before, after));
            prop_assert_eq!(out.is_some(), op == Operation::Create && has_after);
            if let Some(row) = out {
                prop_assert_eq!(row.key(), Some(id));
                prop_assert_eq!(row.columns().len(), EntityKind::LatestPrice.schema().columns().count());
            }
        }
    }
}
