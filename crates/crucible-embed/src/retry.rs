//! Bounded retry with exponential backoff.
//!
//! [`RetryPolicy`] is pure arithmetic and can be tested without timers.
//! [`RetryTask`] drives an attempt closure on the tokio clock and reports
//! exhaustion through a terminal callback.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Backoff schedule for a bounded number of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts before giving up
    pub max_attempts: u32,
    /// Wait before the first attempt
    pub initial_delay: Duration,
    /// Growth factor between attempts
    pub multiplier: u32,
    /// Upper bound on any single wait
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    /// Policy for links to files that may still be being created.
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            multiplier: 2,
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Wait before attempt number `attempt` (zero-based), or `None` once exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let factor = self.multiplier.checked_pow(attempt).unwrap_or(u32::MAX);
        let delay = self
            .initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay);
        Some(delay.min(self.max_delay))
    }

    /// Sum of every wait in the schedule
    pub fn total_delay(&self) -> Duration {
        (0..self.max_attempts)
            .filter_map(|a| self.delay_for(a))
            .sum()
    }
}

/// How a retry run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    /// An attempt produced a value
    Succeeded {
        /// The value
        value: T,
        /// Attempts made, including the successful one
        attempts: u32,
    },
    /// Every attempt came back empty
    Exhausted {
        /// Attempts made
        attempts: u32,
    },
    /// Cancelled before finishing
    Cancelled,
}

/// Runs attempts according to a [`RetryPolicy`] until one succeeds.
#[derive(Debug, Clone)]
pub struct RetryTask {
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl RetryTask {
    /// Task following `policy`, stopped early by `cancel`.
    pub fn new(policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self { policy, cancel }
    }

    /// Run `attempt` after each backoff wait until it returns `Some`.
    ///
    /// `on_exhausted` runs once, with the attempt count, when the policy runs out.
    pub async fn run<T, F, Fut, E>(&self, mut attempt: F, on_exhausted: E) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Option<T>>,
        E: FnOnce(u32),
    {
        let mut made = 0;
        while let Some(delay) = self.policy.delay_for(made) {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(attempts = made, "Retry cancelled");
                    return RetryOutcome::Cancelled;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            made += 1;
            trace!(attempt = made, ?delay, "Retry attempt");
            if let Some(value) = attempt(made).await {
                return RetryOutcome::Succeeded {
                    value,
                    attempts: made,
                };
            }
        }

        on_exhausted(made);
        RetryOutcome::Exhausted { attempts: made }
    }
}
