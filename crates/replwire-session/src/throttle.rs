//! Adaptive rate limiting for callers issuing many round-trips.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use replwire_core::ThrottleSettings;

/// Snapshot of throttle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrottleStats {
    /// Current rate in calls per second
    pub rate: f64,
    /// Calls completed
    pub calls: u64,
    /// Calls that failed
    pub errors: u64,
    /// Mean latency over the current window
    pub average_latency_ms: Option<f64>,
}

#[derive(Debug)]
struct ThrottleState {
    rate: f64,
    next_slot: Option<Instant>,
    latencies: VecDeque<Duration>,
    calls: u64,
    errors: u64,
}

/// Spaces calls by a minimum interval derived from a rate that adapts to
/// observed latency and failures.
///
/// Sleeping happens outside the lock; concurrent callers each reserve their
/// own slot.
#[derive(Debug)]
pub struct AdaptiveThrottle {
    settings: ThrottleSettings,
    state: Mutex<ThrottleState>,
}

impl Default for AdaptiveThrottle {
    fn default() -> Self {
        Self::new(ThrottleSettings::default())
    }
}

impl AdaptiveThrottle {
    /// Create a throttle starting at `settings.initial_rate`.
    pub fn new(settings: ThrottleSettings) -> Self {
        let rate = settings
            .initial_rate
            .max(settings.min_rate)
            .min(settings.max_rate);
        Self {
            state: Mutex::new(ThrottleState {
                rate,
                next_slot: None,
                latencies: VecDeque::with_capacity(settings.window),
                calls: 0,
                errors: 0,
            }),
            settings,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ThrottleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` once its slot comes up; any `Err` lowers the rate.
    pub fn with_throttle<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        self.with_throttle_by(f, |result| result.is_err())
    }

    /// Run `f` once its slot comes up; `is_failure` decides which outcomes
    /// lower the rate.
    pub fn with_throttle_by<T, E, F, P>(&self, f: F, is_failure: P) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        P: FnOnce(&Result<T, E>) -> bool,
    {
        let wait = self.reserve();
        if !wait.is_zero() {
            debug!("Throttle waiting {}ms", wait.as_millis());
            std::thread::sleep(wait);
        }

        let started = Instant::now();
        let result = f();
        self.record(started.elapsed(), is_failure(&result));
        result
    }

    /// Claim the next free slot, returning how long to wait for it.
    fn reserve(&self) -> Duration {
        let mut state = self.lock();
        let now = Instant::now();
        let slot = state.next_slot.map_or(now, |next| next.max(now));
        state.next_slot = Some(slot + interval(state.rate));
        slot - now
    }

    fn record(&self, latency: Duration, failed: bool) {
        let settings = &self.settings;
        let mut state = self.lock();
        state.calls += 1;

        if failed {
            state.errors += 1;
            state.rate = (state.rate * settings.error_factor).max(settings.min_rate);
            debug!("Throttle rate lowered to {:.2}/s after failure", state.rate);
            return;
        }

        state.latencies.push_back(latency);
        while state.latencies.len() > settings.window.max(1) {
            state.latencies.pop_front();
        }
        if state.latencies.len() < settings.window.max(1) {
            return;
        }

        let average = average_ms(&state.latencies).unwrap_or_default();
        let previous = state.rate;
        if average < settings.low_latency_ms as f64 {
            state.rate = (state.rate * settings.increase_factor).min(settings.max_rate);
        } else if average > settings.high_latency_ms as f64 {
            state.rate = (state.rate * settings.decrease_factor).max(settings.min_rate);
        }
        if state.rate != previous {
            debug!(
                "Throttle rate {:.2}/s -> {:.2}/s (avg latency {:.0}ms)",
                previous, state.rate, average
            );
        }
    }

    /// Current rate in calls per second.
    pub fn rate(&self) -> f64 {
        self.lock().rate
    }

    /// Snapshot of counters and rate.
    pub fn stats(&self) -> ThrottleStats {
        let state = self.lock();
        ThrottleStats {
            rate: state.rate,
            calls: state.calls,
            errors: state.errors,
            average_latency_ms: average_ms(&state.latencies),
        }
    }
}

fn interval(rate: f64) -> Duration {
    if rate > 0.0 {
        Duration::from_secs_f64(1.0 / rate)
    } else {
        Duration::ZERO
    }
}

fn average_ms(latencies: &VecDeque<Duration>) -> Option<f64> {
    if latencies.is_empty() {
        return None;
    }
    let total: f64 = latencies.iter().map(|d| d.as_secs_f64() * 1000.0).sum();
    Some(total / latencies.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ThrottleSettings {
        ThrottleSettings {
            initial_rate: 1000.0,
            min_rate: 1.0,
            max_rate: 2000.0,
            window: 3,
            low_latency_ms: 50,
            high_latency_ms: 100,
            increase_factor: 1.5,
            decrease_factor: 0.5,
            error_factor: 0.5,
        }
    }

    #[test]
    fn test_error_lowers_rate() {
        let throttle = AdaptiveThrottle::new(settings());
        let result: Result<(), &str> = throttle.with_throttle(|| Err("boom"));
        assert!(result.is_err());
        assert_eq!(throttle.rate(), 500.0);
        let stats = throttle.stats();
        assert_eq!(stats.calls, 1);
        assert_eq!(stats.errors, 1);
    }

    #[test]
    fn test_fast_window_raises_rate_to_cap() {
        let throttle = AdaptiveThrottle::new(settings());
        for _ in 0..2 {
            let _: Result<u32, ()> = throttle.with_throttle(|| Ok(1));
        }
        assert_eq!(throttle.rate(), 1000.0);
        let _: Result<u32, ()> = throttle.with_throttle(|| Ok(1));
        assert_eq!(throttle.rate(), 1500.0);
        let _: Result<u32, ()> = throttle.with_throttle(|| Ok(1));
        assert_eq!(throttle.rate(), 2000.0);
    }

    #[test]
    fn test_slow_window_lowers_rate() {
        let throttle = AdaptiveThrottle::new(settings());
        for _ in 0..3 {
            throttle.record(Duration::from_millis(150), false);
        }
        assert_eq!(throttle.rate(), 500.0);
        assert!(throttle.stats().average_latency_ms.unwrap() >= 150.0);
    }

    #[test]
    fn test_rate_floor() {
        let throttle = AdaptiveThrottle::new(ThrottleSettings {
            initial_rate: 1.5,
            ..settings()
        });
        for _ in 0..4 {
            throttle.record(Duration::ZERO, true);
        }
        assert_eq!(throttle.rate(), 1.0);
    }

    #[test]
    fn test_custom_failure_predicate() {
        let throttle = AdaptiveThrottle::new(settings());
        let result: Result<(), &str> =
            throttle.with_throttle_by(|| Err("expected"), |_| false);
        assert!(result.is_err());
        assert_eq!(throttle.stats().errors, 0);
        assert_eq!(throttle.rate(), 1000.0);
    }

    #[test]
    fn test_minimum_interval_enforced() {
        let throttle = AdaptiveThrottle::new(ThrottleSettings {
            initial_rate: 20.0,
            max_rate: 20.0,
            ..settings()
        });
        let started = Instant::now();
        for _ in 0..3 {
            let _: Result<(), ()> = throttle.with_throttle(|| Ok(()));
        }
        assert!(started.elapsed() >= Duration::from_millis(100));
    }
}
