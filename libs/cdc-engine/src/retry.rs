use std::future::Future;
use std::time::Duration;

use serde::Deserialize;

use cdc_api::CdcError;

use crate::error::EngineError;

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

/// Bounded exponential backoff for unavailable bus or destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, where `attempt` counts from 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    pub fn should_retry(&self, attempt: u32, err: &CdcError) -> bool {
        err.is_retryable() && attempt < self.max_attempts.max(1)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy is exhausted.
///
/// Non-retryable errors come back as [`Retried::Failed`]; exhaustion is
/// reported as [`Retried::Exhausted`].
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, target: &str, mut op: F) -> Result<T, Retried>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CdcError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if policy.should_retry(attempt, &e) => {
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    target_name = %target,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "unavailable, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) if e.is_retryable() => {
                return Err(Retried::Exhausted { attempts: attempt, source: e });
            }
            Err(e) => return Err(Retried::Failed(e)),
        }
    }
}

/// Failure of a retried operation.
#[derive(Debug)]
pub enum Retried {
    /// Non-retryable error on some attempt.
    Failed(CdcError),
    /// Still unavailable after the last allowed attempt.
    Exhausted { attempts: u32, source: CdcError },
}

impl Retried {
    /// Convert into an engine error, wrapping non-retryable failures with `wrap`.
    pub fn into_engine(self, target: &str, wrap: impl FnOnce(CdcError) -> EngineError) -> EngineError {
        match self {
            Retried::Failed(e) => wrap(e),
            Retried::Exhausted { attempts, source } => EngineError::RetriesExhausted {
                target: target.to_string(),
                attempts,
                source,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy { max_attempts: 3, initial_backoff_ms: 1, max_backoff_ms: 4 }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy { max_attempts: 10, initial_backoff_ms: 100, max_backoff_ms: 1_000 };
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(4), Duration::from_millis(800));
        assert_eq!(p.backoff(5), Duration::from_millis(1_000));
        assert_eq!(p.backoff(60), Duration::from_millis(1_000));
    }

    #[test]
    fn only_unavailable_is_retried() {
        let p = fast();
        assert!(p.should_retry(1, &CdcError::unavailable("down")));
        assert!(!p.should_retry(3, &CdcError::unavailable("down")));
        assert!(!p.should_retry(1, &CdcError::auth("denied")));
        assert!(!p.should_retry(1, &CdcError::row("bad")));
    }

    #[tokio::test]
    async fn recovers_from_transient_failures() {
        let calls = &AtomicU32::new(0);
        let out = retry(&fast(), "t", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(CdcError::unavailable("timeout"))
            } else {
                Ok(42)
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_reports_attempts() {
        let err = retry(&fast(), "t", || async { Err::<(), _>(CdcError::unavailable("down")) })
            .await
            .unwrap_err();
        assert!(matches!(err, Retried::Exhausted { attempts: 3, .. }));

        let engine = err.into_engine("klines", |e| EngineError::Sink { table: "klines".into(), source: e });
        assert!(matches!(engine, EngineError::RetriesExhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn fatal_error_stops_immediately() {
        let calls = &AtomicU32::new(0);
        let err = retry(&fast(), "t", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(CdcError::auth("bad password"))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Retried::Failed(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn policy_defaults_from_toml() {
        let p: RetryPolicy = toml::from_str("max_attempts = 2").unwrap();
        assert_eq!(p.max_attempts, 2);
        assert_eq!(p.initial_backoff_ms, 500);
        assert_eq!(p.max_backoff_ms, 30_000);
    }
}
