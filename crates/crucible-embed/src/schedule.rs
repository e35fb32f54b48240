//! Timer-free scheduling state for the reconciliation driver.
//!
//! Both types take the current instant as an argument, so the debounce and
//! stabilization logic is testable without a runtime. The driver feeds them
//! `tokio::time::Instant::now()`.

use std::time::Duration;
use tokio::time::Instant;

/// Wait after the last relevant mutation before reprocessing.
pub const SETTLE_DELAY: Duration = Duration::from_millis(150);
/// Interval between bootstrap sweeps.
pub const BOOTSTRAP_INTERVAL: Duration = Duration::from_millis(300);
/// Give up on stabilization after this long.
pub const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(5);
/// Consecutive unchanged counts that count as stable.
pub const BOOTSTRAP_STABLE_PASSES: usize = 2;

/// Trailing-edge debounce: fires once activity has been quiet for `delay`.
#[derive(Debug, Clone)]
pub struct SettleScheduler {
    delay: Duration,
    deadline: Option<Instant>,
}

impl SettleScheduler {
    /// Scheduler with the given settle delay.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    /// Activity happened at `now`; pushes the deadline out.
    pub fn note_activity(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    /// When the pending pass should run
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether a pass is pending at all
    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Consume the pending pass if its deadline has passed.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Drop the pending pass.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}

impl Default for SettleScheduler {
    fn default() -> Self {
        Self::new(SETTLE_DELAY)
    }
}

/// What the bootstrap sweep should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapStep {
    /// Sweep again after the interval
    Continue,
    /// The augmented count stopped changing
    Stable,
    /// The timeout elapsed first
    TimedOut,
}

/// Tracks augmented-block counts across bootstrap sweeps.
#[derive(Debug, Clone)]
pub struct BootstrapTracker {
    started: Instant,
    timeout: Duration,
    required_stable: usize,
    last_count: Option<usize>,
    stable_passes: usize,
}

impl BootstrapTracker {
    /// Tracker started at `now` with the default timeout and stability rule.
    pub fn new(now: Instant) -> Self {
        Self::with_limits(now, BOOTSTRAP_TIMEOUT, BOOTSTRAP_STABLE_PASSES)
    }

    /// Tracker with explicit limits.
    pub fn with_limits(now: Instant, timeout: Duration, required_stable: usize) -> Self {
        Self {
            started: now,
            timeout,
            required_stable: required_stable.max(1),
            last_count: None,
            stable_passes: 0,
        }
    }

    /// Record the augmented count seen by a sweep at `now`.
    pub fn observe(&mut self, count: usize, now: Instant) -> BootstrapStep {
        if self.last_count == Some(count) {
            self.stable_passes += 1;
        } else {
            self.stable_passes = 0;
            self.last_count = Some(count);
        }

        if self.stable_passes >= self.required_stable {
            BootstrapStep::Stable
        } else if now.duration_since(self.started) >= self.timeout {
            BootstrapStep::TimedOut
        } else {
            BootstrapStep::Continue
        }
    }

    /// Count seen by the latest sweep
    pub fn last_count(&self) -> Option<usize> {
        self.last_count
    }
}
