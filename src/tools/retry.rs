use std::future::Future;
use std::time::Duration;

use crate::tools::types::ToolError;

/// Bounded exponential backoff.
///
/// `max_retries` counts attempts beyond the first, so an operation under
/// `max_retries = 2` runs at most three times.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }
}

#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, ToolError>,
    pub retries: u32,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = self.factor.powi(retry.saturating_sub(1) as i32);
        let ms = (self.base_delay.as_millis() as f64 * exp).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(ms as u64)
    }

    /// Runs `op` until it succeeds, fails unrecoverably, or the budget is
    /// spent.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ToolError>>,
    {
        let mut retries = 0;
        loop {
            match op(retries).await {
                Ok(v) => {
                    return RetryOutcome {
                        result: Ok(v),
                        retries,
                    }
                }
                Err(e) if e.recoverable && retries < self.max_retries => {
                    retries += 1;
                    let delay = self.delay_for(retries);
                    tracing::debug!(retry = retries, delay_ms = delay.as_millis() as u64, error = %e, "retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return RetryOutcome {
                        result: Err(e),
                        retries,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::types::ToolErrorCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            factor: 2.0,
        }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_for(1), Duration::from_millis(200));
        assert_eq!(p.delay_for(2), Duration::from_millis(400));
        assert_eq!(p.delay_for(10), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn two_retries_means_at_most_three_calls() {
        let calls = &AtomicU32::new(0);
        let out: RetryOutcome<()> = fast(2)
            .run(move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ToolError::element_not_found("#x"))
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(out.retries, 2);
        assert!(out.result.is_err());
    }

    #[tokio::test]
    async fn unrecoverable_errors_stop_immediately() {
        let calls = &AtomicU32::new(0);
        let out: RetryOutcome<()> = fast(5)
            .run(move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ToolError::new(ToolErrorCode::ScriptError, "boom"))
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(out.retries, 0);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failure() {
        let out = fast(2)
            .run(|attempt| async move {
                if attempt == 0 {
                    Err(ToolError::element_not_found("#x"))
                } else {
                    Ok(attempt)
                }
            })
            .await;
        assert_eq!(out.result.unwrap(), 1);
        assert_eq!(out.retries, 1);
    }
}
