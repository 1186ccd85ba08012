//! Flat-interval connect retry.
//!
//! Startup connections (broker, database) are retried a fixed number of
//! times with a fixed pause between attempts. There is no backoff growth and
//! no jitter:
//!
//! ```text
//! attempt 1 ── fail ── sleep(delay) ── attempt 2 ── ... ── attempt max_retries + 1 ── give up
//! ```
//!
//! Callers wrap the final error in their own connection error type and treat
//! it as fatal.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

/// Retry bound and pause for startup connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectRetryPolicy {
    /// Retries after the first attempt (default: 5)
    pub max_retries: u32,

    /// Pause between attempts (default: 5s)
    pub delay: Duration,
}

impl Default for ConnectRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            delay: Duration::from_secs(5),
        }
    }
}

impl ConnectRetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Total number of attempts, including the first one.
    pub fn total_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

/// Run `operation` until it succeeds or the policy is exhausted.
///
/// Each failure is logged with the attempt number. The last error is
/// returned unchanged once `policy.max_retries` retries have failed.
pub async fn retry_flat<F, Fut, T, E>(
    policy: &ConnectRetryPolicy,
    target: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt: u32 = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(target_name = target, attempt = attempt + 1, "Connected after retry");
                }
                return Ok(value);
            }
            Err(err) if attempt < policy.max_retries => {
                attempt += 1;
                warn!(
                    target_name = target,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = policy.delay.as_millis() as u64,
                    error = %err,
                    "Connection attempt failed, retrying"
                );
                sleep(policy.delay).await;
            }
            Err(err) => {
                warn!(
                    target_name = target,
                    attempts = attempt + 1,
                    error = %err,
                    "Connection retries exhausted"
                );
                return Err(err);
            }
        }
    }
}
