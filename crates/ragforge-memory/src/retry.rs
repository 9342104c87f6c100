use ragforge_core::{RagError, RagResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Configures retry behaviour for transient vector database failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each further attempt.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    100
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// Delay after the failed attempt `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(
            self.base_delay_ms
                .saturating_mul(2u64.saturating_pow(attempt)),
        )
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent.
    ///
    /// Exhaustion returns [`RagError::RetryExhausted`] carrying every attempt's error.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> RagResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RagResult<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut errors = Vec::new();
        for attempt in 0..attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => {
                    warn!(operation, attempt, error = %e, "Non-retryable error");
                    return Err(e);
                }
                Err(e) => {
                    errors.push(e.to_string());
                    if attempt + 1 < attempts {
                        let delay = self.backoff(attempt);
                        info!(
                            operation,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Retryable error, backing off"
                        );
                        tokio::time::sleep(delay).await;
                    } else {
                        warn!(operation, attempt, error = %e, "Retry budget exhausted");
                    }
                }
            }
        }
        Err(RagError::RetryExhausted {
            operation: operation.to_string(),
            errors,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let p = RetryPolicy::default();
        assert_eq!(p.backoff(0), Duration::from_millis(100));
        assert_eq!(p.backoff(1), Duration::from_millis(200));
        assert_eq!(p.backoff(2), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let out = fast()
            .run("insert", move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(RagError::VectorStore(format!("attempt {n}")))
                } else {
                    Ok(n)
                }
            })
            .await
            .unwrap();
        assert_eq!(out, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_keeps_every_error() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let err = fast()
            .run("insert", move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(RagError::VectorStore(format!("attempt {n}")))
            })
            .await
            .unwrap_err();
        match err {
            RagError::RetryExhausted { operation, errors } => {
                assert_eq!(operation, "insert");
                assert_eq!(errors.len(), 3);
                assert!(errors[0].contains("attempt 0"));
                assert!(errors[2].contains("attempt 2"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_validation_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let err = fast()
            .run("insert", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(RagError::Validation("bad".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Validation(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
