//! Bounded timeout and retry for individual cluster API calls

use crate::error::ApiError;
use labeler_config::{EngineConfig, RetryConfig};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Timeout and backoff policy applied to every API call
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    retry: RetryConfig,
    request_timeout: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(retry: RetryConfig, request_timeout: Duration) -> Self {
        Self {
            retry,
            request_timeout,
        }
    }

    #[must_use]
    pub fn from_engine(engine: &EngineConfig) -> Self {
        Self::new(engine.retry.clone(), engine.request_timeout())
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.retry.max_attempts.max(1)
    }

    /// Backoff before retry number `attempt` (1-based)
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.retry.backoff(attempt)
    }

    /// Run `call` with a timeout per attempt, retrying transient failures
    /// with exponential backoff. Conflicts and permanent errors are returned
    /// immediately; the caller decides how to recover from a conflict.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 1;

        loop {
            let result = match timeout(self.request_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(ApiError::Timeout {
                    operation: operation.to_string(),
                }),
            };

            match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "API call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let backoff = self.backoff(attempt);
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "Transient API failure, retrying"
                    );
                    sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn fast_policy() -> RetryPolicy {
    RetryPolicy::new(
        RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        },
        Duration::from_millis(200),
    )
}
