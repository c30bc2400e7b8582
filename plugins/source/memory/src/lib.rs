use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use cdc_api::{BoxFuture, BusMessage, CdcError, ChangeSource, Position, SourceFactory};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

// ═══════════════════════════════════════════════════════════════
//  MemoryBus
// ═══════════════════════════════════════════════════════════════

#[derive(Default)]
struct BusState {
    /// topic -> partition -> log
    topics: HashMap<String, Vec<Vec<Option<Vec<u8>>>>>,
    /// (group, topic) -> partition -> next offset
    committed: HashMap<(String, String), BTreeMap<i32, i64>>,
    commits: u64,
    denied: HashSet<String>,
    failing_polls: u64,
    failing_commits: u64,
}

/// In-process partitioned log with durable consumer positions.
///
/// Positions are stored per consumer group, so a source re-opened for the
/// same table resumes where the last successful commit left off.
#[derive(Clone, Default)]
pub struct MemoryBus {
    state: Arc<Mutex<BusState>>,
}

impl std::fmt::Debug for MemoryBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBus").finish_non_exhaustive()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("memory bus lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Append a message; returns its offset. `None` publishes a tombstone.
    pub fn publish(&self, topic: &str, partition: i32, payload: Option<Vec<u8>>) -> i64 {
        let mut state = self.state();
        let partitions = state.topics.entry(topic.to_string()).or_default();
        let index = partition.max(0) as usize;
        if partitions.len() <= index {
            partitions.resize_with(index + 1, Vec::new);
        }
        let log = &mut partitions[index];
        log.push(payload);
        (log.len() - 1) as i64
    }

    pub fn publish_json(&self, topic: &str, partition: i32, value: &serde_json::Value) -> i64 {
        self.publish(topic, partition, Some(value.to_string().into_bytes()))
    }

    /// Committed next offset of `group` on `topic`/`partition`.
    pub fn committed(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        self.state()
            .committed
            .get(&(group.to_string(), topic.to_string()))
            .and_then(|p| p.get(&partition).copied())
    }

    /// Successful commits across all groups.
    pub fn commit_count(&self) -> u64 {
        self.state().commits
    }

    /// Opening a consumer on `topic` fails with an authorization error.
    pub fn deny_topic(&self, topic: &str) {
        self.state().denied.insert(topic.to_string());
    }

    /// The next `n` polls, on any topic, fail as unavailable.
    pub fn fail_polls(&self, n: u64) {
        self.state().failing_polls = n;
    }

    /// The next `n` commits, on any topic, fail as unavailable.
    pub fn fail_commits(&self, n: u64) {
        self.state().failing_commits = n;
    }
}

impl SourceFactory for MemoryBus {
    fn open<'a>(
        &'a self,
        topic: &'a str,
        table: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn ChangeSource>, CdcError>> {
        Box::pin(async move {
            let state = self.state();
            if state.denied.contains(topic) {
                return Err(CdcError::auth(format!("not authorized to read topic '{topic}'")));
            }
            let cursor = state
                .committed
                .get(&(table.to_string(), topic.to_string()))
                .cloned()
                .unwrap_or_default();
            drop(state);

            let source: Box<dyn ChangeSource> = Box::new(MemorySource {
                bus: self.clone(),
                topic: topic.to_string(),
                group: table.to_string(),
                cursor,
            });
            Ok(source)
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemorySource
// ═══════════════════════════════════════════════════════════════

/// Consumer of one topic on a [`MemoryBus`].
pub struct MemorySource {
    bus: MemoryBus,
    topic: String,
    group: String,
    /// partition -> next offset to read
    cursor: BTreeMap<i32, i64>,
}

impl MemorySource {
    fn take_available(&mut self, max: usize) -> Result<Vec<BusMessage>, CdcError> {
        let mut state = self.bus.state();
        if state.failing_polls > 0 {
            state.failing_polls -= 1;
            return Err(CdcError::unavailable("injected failure: broker unavailable"));
        }

        let mut batch = Vec::new();
        let Some(partitions) = state.topics.get(&self.topic) else {
            return Ok(batch);
        };
        for (index, log) in partitions.iter().enumerate() {
            let partition = index as i32;
            let next = self.cursor.entry(partition).or_insert(0);
            while batch.len() < max && (*next as usize) < log.len() {
                batch.push(BusMessage {
                    topic: self.topic.clone(),
                    partition,
                    offset: *next,
                    payload: log[*next as usize].clone(),
                });
                *next += 1;
            }
        }
        Ok(batch)
    }
}

impl ChangeSource for MemorySource {
    fn poll_batch(
        &mut self,
        max: usize,
        timeout: Duration,
    ) -> BoxFuture<'_, Result<Vec<BusMessage>, CdcError>> {
        Box::pin(async move {
            let deadline = tokio::time::Instant::now() + timeout;
            loop {
                let batch = self.take_available(max.max(1))?;
                if !batch.is_empty() || tokio::time::Instant::now() >= deadline {
                    return Ok(batch);
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        })
    }

    fn commit(&mut self, positions: Vec<Position>) -> BoxFuture<'_, Result<(), CdcError>> {
        Box::pin(async move {
            let mut state = self.bus.state();
            if state.failing_commits > 0 {
                state.failing_commits -= 1;
                return Err(CdcError::unavailable("injected failure: commit rejected by coordinator"));
            }
            let committed = state
                .committed
                .entry((self.group.clone(), self.topic.clone()))
                .or_default();
            for p in positions {
                committed.insert(p.partition, p.next_offset);
            }
            state.commits += 1;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdc_api::ErrorKind;

    const TOPIC: &str = "binance.binance.klines";

    #[tokio::test]
    async fn reads_in_offset_order_across_partitions() {
        let bus = MemoryBus::new();
        bus.publish(TOPIC, 0, Some(b"a".to_vec()));
        bus.publish(TOPIC, 1, Some(b"b".to_vec()));
        bus.publish(TOPIC, 0, None);

        let mut source = bus.open(TOPIC, "klines").await.unwrap();
        let batch = source.poll_batch(10, Duration::from_millis(10)).await.unwrap();
        let seen: Vec<(i32, i64)> = batch.iter().map(|m| (m.partition, m.offset)).collect();
        assert_eq!(seen, [(0, 0), (0, 1), (1, 0)]);
        assert_eq!(batch[1].payload, None);

        let empty = source.poll_batch(10, Duration::from_millis(10)).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn reopen_resumes_from_commit() {
        let bus = MemoryBus::new();
        for i in 0..4 {
            bus.publish(TOPIC, 0, Some(vec![i]));
        }

        let mut source = bus.open(TOPIC, "klines").await.unwrap();
        let batch = source.poll_batch(2, Duration::from_millis(10)).await.unwrap();
        assert_eq!(batch.len(), 2);
        source.commit(vec![Position { partition: 0, next_offset: 2 }]).await.unwrap();
        let _uncommitted = source.poll_batch(2, Duration::from_millis(10)).await.unwrap();
        drop(source);

        assert_eq!(bus.committed("klines", TOPIC, 0), Some(2));
        let mut source = bus.open(TOPIC, "klines").await.unwrap();
        let batch = source.poll_batch(10, Duration::from_millis(10)).await.unwrap();
        assert_eq!(batch.first().map(|m| m.offset), Some(2));
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn groups_are_independent() {
        let bus = MemoryBus::new();
        bus.publish(TOPIC, 0, Some(b"x".to_vec()));
        let mut a = bus.open(TOPIC, "klines").await.unwrap();
        a.poll_batch(10, Duration::from_millis(10)).await.unwrap();
        a.commit(vec![Position { partition: 0, next_offset: 1 }]).await.unwrap();

        let mut b = bus.open(TOPIC, "klines_copy").await.unwrap();
        assert_eq!(b.poll_batch(10, Duration::from_millis(10)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn injected_failures() {
        let bus = MemoryBus::new();
        bus.deny_topic("secret");
        let err = bus.open("secret", "t").await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Auth);

        bus.fail_polls(1);
        bus.fail_commits(1);
        let mut source = bus.open(TOPIC, "klines").await.unwrap();
        assert!(source.poll_batch(1, Duration::from_millis(1)).await.unwrap_err().is_retryable());
        assert!(source.commit(vec![]).await.is_err());
        source.commit(vec![]).await.unwrap();
        assert_eq!(bus.commit_count(), 1);
    }
}
