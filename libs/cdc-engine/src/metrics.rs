use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Per-pipeline counters. Updated by the pipeline task, read by anyone.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    messages: AtomicU64,
    decode_failures: AtomicU64,
    filtered: AtomicU64,
    rows_written: AtomicU64,
    rows_rejected: AtomicU64,
    batches: AtomicU64,
    write_retries: AtomicU64,
    commits: AtomicU64,
    commit_failures: AtomicU64,
}

/// Point-in-time copy of [`PipelineMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub messages: u64,
    pub decode_failures: u64,
    pub filtered: u64,
    pub rows_written: u64,
    pub rows_rejected: u64,
    pub batches: u64,
    pub write_retries: u64,
    pub commits: u64,
    pub commit_failures: u64,
}

macro_rules! counter {
    ($($add:ident => $field:ident),* $(,)?) => {
        $(
            pub fn $add(&self, n: u64) {
                self.$field.fetch_add(n, Ordering::Relaxed);
            }
        )*
    };
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    counter! {
        add_messages => messages,
        add_decode_failures => decode_failures,
        add_filtered => filtered,
        add_rows_written => rows_written,
        add_rows_rejected => rows_rejected,
        add_batches => batches,
        add_write_retries => write_retries,
        add_commits => commits,
        add_commit_failures => commit_failures,
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages: self.messages.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
            rows_rejected: self.rows_rejected.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            write_retries: self.write_retries.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            commit_failures: self.commit_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let m = PipelineMetrics::new();
        m.add_messages(10);
        m.add_filtered(3);
        m.add_rows_written(6);
        m.add_decode_failures(1);
        m.add_batches(1);

        let snap = m.snapshot();
        assert_eq!(snap.messages, 10);
        assert_eq!(snap.filtered + snap.rows_written + snap.decode_failures, 10);
        assert_eq!(snap.commits, 0);
    }

    #[test]
    fn snapshot_serializes() {
        let json = serde_json::to_value(MetricsSnapshot { rows_written: 2, ..Default::default() }).unwrap();
        assert_eq!(json["rows_written"], 2);
    }
}
