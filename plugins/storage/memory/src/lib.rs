use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tokio::sync::RwLock;

use cdc_api::{BoxFuture, CdcError, EntityRow, EntitySchema, RowSink};

// ═══════════════════════════════════════════════════════════════
//  Fault injection
// ═══════════════════════════════════════════════════════════════

#[derive(Default)]
struct Faults {
    /// Writes that fail as unavailable before writes succeed again.
    fail_next: u64,
    /// Successful writes left before a lasting outage.
    outage_budget: Option<u64>,
    rejected_keys: HashSet<i64>,
    prepare_errors: HashMap<String, CdcError>,
}

enum Verdict {
    Accept,
    Reject(CdcError),
}

impl Faults {
    fn judge(&mut self, row: &EntityRow) -> Verdict {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Verdict::Reject(CdcError::unavailable("injected failure: destination unavailable"));
        }
        match self.outage_budget {
            Some(0) => return Verdict::Reject(CdcError::unavailable("injected outage: no node reachable")),
            Some(ref mut n) => *n -= 1,
            None => {}
        }
        if let Some(key) = row.key().filter(|k| self.rejected_keys.contains(k)) {
            return Verdict::Reject(CdcError::row(format!("injected rejection of key {key}")));
        }
        Verdict::Accept
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemorySink
// ═══════════════════════════════════════════════════════════════

/// In-memory destination. Upserts keyed by `(table, id)`, with knobs to
/// simulate outages and rejected rows.
#[derive(Default)]
pub struct MemorySink {
    tables: RwLock<HashMap<String, BTreeMap<i64, EntityRow>>>,
    schemas: Mutex<HashMap<String, &'static EntitySchema>>,
    faults: Mutex<Faults>,
    write_calls: AtomicU64,
    closed: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("memory sink fault lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// The next `n` writes fail as unavailable.
    pub fn fail_next_writes(&self, n: u64) {
        self.faults().fail_next = n;
    }

    /// After `n` more successful writes every write fails as unavailable
    /// until [`MemorySink::restore`].
    pub fn outage_after(&self, n: u64) {
        self.faults().outage_budget = Some(n);
    }

    /// End an outage started by [`MemorySink::outage_after`].
    pub fn restore(&self) {
        let mut faults = self.faults();
        faults.outage_budget = None;
        faults.fail_next = 0;
    }

    /// Rows with this primary key are rejected individually.
    pub fn reject_key(&self, key: i64) {
        self.faults().rejected_keys.insert(key);
    }

    /// Make `prepare` of `table` fail with `err`.
    pub fn fail_prepare(&self, table: impl Into<String>, err: CdcError) {
        self.faults().prepare_errors.insert(table.into(), err);
    }

    /// Rows of `table`, ordered by primary key.
    pub async fn rows(&self, table: &str) -> Vec<EntityRow> {
        self.tables
            .read()
            .await
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn get(&self, table: &str, key: i64) -> Option<EntityRow> {
        self.tables.read().await.get(table).and_then(|rows| rows.get(&key)).cloned()
    }

    pub async fn count(&self, table: &str) -> usize {
        self.tables.read().await.get(table).map_or(0, BTreeMap::len)
    }

    /// Number of `write_row` calls, successful or not.
    pub fn write_calls(&self) -> u64 {
        self.write_calls.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

impl RowSink for MemorySink {
    fn prepare<'a>(
        &'a self,
        table: &'a str,
        schema: &'static EntitySchema,
    ) -> BoxFuture<'a, Result<(), CdcError>> {
        Box::pin(async move {
            let injected = self.faults().prepare_errors.get(table).cloned();
            if let Some(err) = injected {
                return Err(err);
            }
            let mut schemas = self.schemas.lock().unwrap_or_else(|p| p.into_inner());
            match schemas.get(table) {
                Some(existing) if existing.entity != schema.entity => Err(CdcError::schema(format!(
                    "table '{table}' holds {} rows, not {}",
                    existing.entity, schema.entity
                ))),
                _ => {
                    schemas.insert(table.to_string(), schema);
                    Ok(())
                }
            }
        })
    }

    fn write_row<'a>(
        &'a self,
        table: &'a str,
        row: &'a EntityRow,
    ) -> BoxFuture<'a, Result<(), CdcError>> {
        Box::pin(async move {
            self.write_calls.fetch_add(1, Ordering::Relaxed);
            let verdict = self.faults().judge(row);
            if let Verdict::Reject(err) = verdict {
                return Err(err);
            }
            let key = row
                .key()
                .ok_or_else(|| CdcError::row(format!("row for '{table}' has no primary key")))?;
            if row.fields.len() != row.schema().fields.len() {
                return Err(CdcError::row(format!(
                    "row for '{table}' has {} fields, expected {}",
                    row.fields.len(),
                    row.schema().fields.len()
                )));
            }
            self.tables
                .write()
                .await
                .entry(table.to_string())
                .or_default()
                .insert(key, row.clone());
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), CdcError>> {
        Box::pin(async move {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdc_api::{EntityKind, ErrorKind, Operation, Value};

    fn price(id: i64, price: &str) -> EntityRow {
        EntityRow {
            entity: EntityKind::LatestPrice,
            fields: vec![
                Value::Long(id),
                Value::Text("BTCUSDT".into()),
                Value::Text(price.into()),
                Value::Long(1),
            ],
            source: None,
            op: Operation::Create,
            ts_ms: 1,
            transaction: None,
        }
    }

    #[tokio::test]
    async fn upsert_by_key() {
        let sink = MemorySink::new();
        sink.write_row("latest_prices", &price(1, "1.0")).await.unwrap();
        sink.write_row("latest_prices", &price(1, "2.0")).await.unwrap();
        sink.write_row("latest_prices", &price(2, "3.0")).await.unwrap();

        assert_eq!(sink.count("latest_prices").await, 2);
        let row = sink.get("latest_prices", 1).await.unwrap();
        assert_eq!(row.field("price"), Some(&Value::Text("2.0".into())));
        assert_eq!(sink.write_calls(), 3);
    }

    #[tokio::test]
    async fn injected_faults() {
        let sink = MemorySink::new();
        sink.fail_next_writes(1);
        sink.reject_key(9);

        let err = sink.write_row("t", &price(1, "1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        sink.write_row("t", &price(1, "1")).await.unwrap();
        let err = sink.write_row("t", &price(9, "1")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Row);

        sink.outage_after(1);
        sink.write_row("t", &price(2, "1")).await.unwrap();
        assert!(sink.write_row("t", &price(3, "1")).await.is_err());
        sink.restore();
        sink.write_row("t", &price(3, "1")).await.unwrap();
        assert_eq!(sink.count("t").await, 3);
    }

    #[tokio::test]
    async fn prepare_detects_conflicting_schema() {
        let sink = MemorySink::new();
        sink.prepare("t", EntityKind::Trade.schema()).await.unwrap();
        sink.prepare("t", EntityKind::Trade.schema()).await.unwrap();
        let err = sink.prepare("t", EntityKind::Candlestick.schema()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);

        sink.fail_prepare("klines", CdcError::auth("denied"));
        assert!(sink.prepare("klines", EntityKind::Candlestick.schema()).await.unwrap_err().is_fatal());
    }
}
