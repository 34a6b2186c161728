use std::future::Future;
use std::time::Duration;

use crate::error::{EdgeError, Result};

/// Bounded retry with exponential backoff and a per-attempt timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after failed attempt number `attempt` (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(2u32.pow(exp))
            .min(self.max_backoff)
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or the
/// attempts run out. Timeouts count as transient failures.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let err = match tokio::time::timeout(policy.attempt_timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e,
            Err(_) => EdgeError::transient(format!(
                "{} timed out after {:?}",
                what, policy.attempt_timeout
            )),
        };

        if !err.is_transient() || attempt >= max_attempts {
            return Err(err);
        }

        let backoff = policy.backoff_for(attempt);
        log::warn!(
            "{} failed (attempt {}/{}): {}; retrying in {:?}",
            what,
            attempt,
            max_attempts,
            err,
            backoff
        );
        tokio::time::sleep(backoff).await;
    }
}
