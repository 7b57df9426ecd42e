//! Convergence helpers shared by berth services.
//!
//! - [`RetryTracker`]: counts failures per key inside a sliding window so a
//!   caller can stop retrying something that keeps failing.
//! - [`BackoffPolicy`]: exponential delay with jitter between attempts.
//!
//! # Invariants
//!
//! - Failure counts reset once the window since the first failure elapses
//! - Backoff delays never exceed `max` plus its jitter share

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use rand::Rng;

// =============================================================================
// Retry tracking
// =============================================================================

/// Failure counts per key inside a sliding window.
#[derive(Debug, Clone)]
pub struct RetryTracker {
    /// Limit used by [`RetryTracker::record_failure`].
    default_limit: u32,
    window: Duration,
    /// key -> (failures, start of the current window)
    failures: BTreeMap<String, (u32, Instant)>,
}

impl RetryTracker {
    pub fn new(default_limit: u32, window: Duration) -> Self {
        Self {
            default_limit,
            window,
            failures: BTreeMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a failure against the tracker's default limit.
    ///
    /// Returns true if retries are exhausted.
    pub fn record_failure(&mut self, key: &str) -> bool {
        self.record_failure_with_limit(key, self.default_limit)
    }

    /// Record a failure against a per-key limit.
    ///
    /// Returns true once more than `max_retries` failures have been seen
    /// inside the window.
    pub fn record_failure_with_limit(&mut self, key: &str, max_retries: u32) -> bool {
        let now = Instant::now();
        let entry = self.failures.entry(key.to_string()).or_insert((0, now));
        if now.saturating_duration_since(entry.1) > self.window {
            *entry = (0, now);
        }
        entry.0 += 1;
        entry.0 > max_retries
    }

    /// Whether one more failure would exceed `max_retries`, without
    /// recording it.
    pub fn would_exhaust(&self, key: &str, max_retries: u32) -> bool {
        self.failures(key).saturating_add(1) > max_retries
    }

    /// Failures currently counted for a key.
    pub fn failures(&self, key: &str) -> u32 {
        match self.failures.get(key) {
            Some((count, first)) if first.elapsed() <= self.window => *count,
            _ => 0,
        }
    }

    pub fn is_exhausted(&self, key: &str) -> bool {
        self.failures(key) > self.default_limit
    }

    /// Forget a key, typically after it succeeded or was deleted.
    pub fn clear(&mut self, key: &str) {
        self.failures.remove(key);
    }

    /// Forget every key starting with `prefix`.
    pub fn clear_prefix(&mut self, prefix: &str) {
        self.failures.retain(|key, _| !key.starts_with(prefix));
    }

    /// Drop keys whose window has elapsed.
    pub fn prune(&mut self) {
        let window = self.window;
        self.failures.retain(|_, (_, since)| since.elapsed() <= window);
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

// =============================================================================
// Backoff
// =============================================================================

/// Exponential backoff with symmetric jitter.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Base delay for first retry.
    pub base: Duration,

    /// Maximum delay.
    pub max: Duration,

    /// Jitter factor (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
            jitter: 0.25,
        }
    }
}

impl BackoffPolicy {
    /// Calculate delay for the given attempt number (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.min(31) as i32;
        let delay = self.base.as_millis() as f64 * 2.0_f64.powi(exp);
        let delay = delay.min(self.max.as_millis() as f64);

        let jitter_range = delay * self.jitter.clamp(0.0, 1.0);
        let jitter = if jitter_range > 0.0 {
            rand::rng().random_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };

        Duration::from_millis((delay + jitter).max(0.0) as u64)
    }
}

/// Default failover budget per slot.
pub const DEFAULT_MAX_FAILOVERS: u32 = 3;

/// Default window over which failovers are counted.
pub const DEFAULT_RETRY_WINDOW: Duration = Duration::from_secs(10 * 60); // 10 minutes
