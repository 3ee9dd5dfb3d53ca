//! Exponential backoff with a deadline.
//!
//! One policy drives every polling loop: readiness checks and reply polling
//! both sleep on the same schedule instead of scattering ad hoc sleeps.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Backoff schedule: start at `initial`, multiply by `multiplier`, never exceed `cap`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// First sleep interval
    pub initial: Duration,
    /// Growth factor applied after each sleep
    pub multiplier: f64,
    /// Upper bound on a single sleep
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(50),
            multiplier: 2.0,
            cap: Duration::from_millis(500),
        }
    }
}

impl BackoffPolicy {
    /// Create a policy.
    pub fn new(initial: Duration, multiplier: f64, cap: Duration) -> Self {
        Self {
            initial,
            multiplier,
            cap,
        }
    }

    /// Start a schedule that expires `timeout` from now.
    pub fn start(&self, timeout: Duration) -> Backoff {
        let now = Instant::now();
        Backoff {
            policy: *self,
            current: self.initial.min(self.cap),
            started: now,
            deadline: now + timeout,
            attempts: 0,
        }
    }
}

/// A running backoff schedule.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    current: Duration,
    started: Instant,
    deadline: Instant,
    attempts: u32,
}

impl Backoff {
    /// Next sleep interval, clamped to the remaining budget.
    ///
    /// Returns `None` once the deadline has passed.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let remaining = self.remaining();
        if remaining.is_zero() {
            return None;
        }
        let delay = self.current.min(remaining);
        let grown = (self.current.as_nanos() as f64 * self.policy.multiplier.max(1.0)).round();
        self.current = Duration::from_nanos(grown.min(u64::MAX as f64) as u64).min(self.policy.cap);
        self.attempts += 1;
        Some(delay)
    }

    /// Sleep for the next interval. Returns `false` when the deadline has passed.
    pub fn sleep(&mut self) -> bool {
        match self.next_delay() {
            Some(delay) => {
                std::thread::sleep(delay);
                true
            }
            None => false,
        }
    }

    /// Whether the deadline has passed.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Time left before the deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Time since the schedule started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Number of delays handed out so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
