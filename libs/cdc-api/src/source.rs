use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::error::CdcError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One message read from the bus. `payload = None` is a tombstone.
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Option<Vec<u8>>,
}

/// Resume position for one partition: the first offset not yet consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub partition: i32,
    pub next_offset: i64,
}

/// Highest consumed offset per partition within a batch.
#[derive(Debug, Clone, Default)]
pub struct OffsetTracker {
    offsets: BTreeMap<i32, i64>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, partition: i32, offset: i64) {
        let entry = self.offsets.entry(partition).or_insert(offset);
        if offset > *entry {
            *entry = offset;
        }
    }

    pub fn partition_count(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Positions to commit: last consumed offset + 1 per partition.
    pub fn positions(&self) -> Vec<Position> {
        self.offsets
            .iter()
            .map(|(&partition, &offset)| Position { partition, next_offset: offset + 1 })
            .collect()
    }
}

/// Consumer bound to a single topic.
///
/// Owned by exactly one pipeline. Positions are committed only after the
/// batch they cover has been written.
pub trait ChangeSource: Send {
    /// Wait up to `timeout` for the first message, then collect up to `max`
    /// messages. An empty batch means nothing arrived in time.
    fn poll_batch(
        &mut self,
        max: usize,
        timeout: Duration,
    ) -> BoxFuture<'_, Result<Vec<BusMessage>, CdcError>>;

    /// Durably record resume positions.
    fn commit(&mut self, positions: Vec<Position>) -> BoxFuture<'_, Result<(), CdcError>>;

    /// Leave the consumer group. Called once when the pipeline exits.
    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

/// Opens consumers. Shared by all pipelines.
pub trait SourceFactory: Send + Sync {
    /// Open a consumer for `topic`. `table` identifies the pipeline and
    /// keeps consumer positions separate per destination.
    fn open<'a>(
        &'a self,
        topic: &'a str,
        table: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn ChangeSource>, CdcError>>;
}
