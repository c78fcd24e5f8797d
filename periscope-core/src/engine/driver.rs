//! Poll cycle pacing: backoff policy and per-cycle bookkeeping
//!
//! The poll interval (sub-second) is far shorter than plausible network
//! latency variance, so two guards are load-bearing here: the single-flight
//! latch (an overlapping cycle is skipped outright, never queued, so a slow
//! backend cannot pile up requests) and exponential failure backoff (a down
//! backend does not produce a tight retry loop).

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use crate::config::PollConfig;

/// Pure interval math for the poll loop.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Interval between successful cycles
    pub active_interval: Duration,
    /// Interval after the first failure
    pub failure_base: Duration,
    /// Growth factor per consecutive failure
    pub multiplier: f64,
    /// Ceiling on the failure interval
    pub max_interval: Duration,
}

impl BackoffPolicy {
    pub fn from_config(config: &PollConfig) -> Self {
        Self {
            active_interval: Duration::from_millis(config.active_interval_ms),
            failure_base: Duration::from_millis(config.failure_base_ms),
            multiplier: config.backoff_multiplier,
            max_interval: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Interval to wait before the next cycle given the failure streak.
    ///
    /// Zero failures means the active baseline; otherwise
    /// `min(max, base * multiplier^failures)`.
    pub fn interval_after(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return self.active_interval;
        }
        let scaled =
            self.failure_base.as_millis() as f64 * self.multiplier.powi(consecutive_failures as i32);
        let capped = scaled.min(self.max_interval.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&PollConfig::default())
    }
}

/// Mutable per-engine cycle state, shared between the loop task and
/// callers of `poll_now`.
#[derive(Debug)]
pub(crate) struct CycleState {
    in_flight: AtomicBool,
    stopped: AtomicBool,
    consecutive_failures: AtomicU32,
    current_interval_ms: AtomicU64,
}

impl CycleState {
    pub fn new(policy: &BackoffPolicy) -> Self {
        Self {
            in_flight: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            current_interval_ms: AtomicU64::new(policy.active_interval.as_millis() as u64),
        }
    }

    /// Try to claim the single-flight latch. Returns false when another
    /// cycle is already in flight; the caller must skip, not queue.
    pub fn begin_cycle(&self) -> bool {
        !self.in_flight.swap(true, Ordering::SeqCst)
    }

    /// Release the single-flight latch.
    pub fn end_cycle(&self) {
        self.in_flight.store(false, Ordering::SeqCst);
    }

    /// Successful cycle: clear the failure streak, restore the baseline.
    pub fn note_success(&self, policy: &BackoffPolicy) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.current_interval_ms
            .store(policy.active_interval.as_millis() as u64, Ordering::SeqCst);
    }

    /// Failed cycle: grow the interval. Returns the new streak length.
    pub fn note_failure(&self, policy: &BackoffPolicy) -> u32 {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        let interval = policy.interval_after(failures);
        self.current_interval_ms
            .store(interval.as_millis() as u64, Ordering::SeqCst);
        failures
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.stopped.store(false, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    pub fn current_interval(&self) -> Duration {
        Duration::from_millis(self.current_interval_ms.load(Ordering::SeqCst))
    }
}
