//! Per-tool circuit breaking.
//!
//! Sustained tool failure must shed load instead of burning agent iterations.
//! Each tool identity gets an independent finite state machine:
//!
//! ```text
//!            5 consecutive failures
//!   CLOSED ──────────────────────────► OPEN
//!     ▲                                 │ 60 s cool-down elapses,
//!     │ probe succeeds                  ▼ next allow_request() probe
//!     └───────────────────────────── HALF_OPEN
//!                                       │ probe fails
//!                                       └──────► OPEN (cool-down restarts)
//! ```
//!
//! [`CircuitBreaker::allow_request`] is the only decision primitive callers
//! invoke; success and failure are reported strictly from the tool's
//! returned outcome by the dispatcher. The per-tool state is the one
//! high-write shared structure in the process, so it sits behind a plain
//! mutex that is never held across an I/O boundary.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Health state of one tool's circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests flow; failures are counted.
    Closed,
    /// Requests are rejected until the cool-down elapses.
    Open,
    /// One probe request is in flight; its outcome decides the next state.
    HalfOpen,
}

#[derive(Debug)]
struct CircuitEntry {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
}

impl CircuitEntry {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            opened_at: None,
        }
    }
}

/// Table of per-tool circuit state.
///
/// Defaults match the documented policy (5 failures to open, 60 s
/// cool-down) and are configurable per instance.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use qaforge::circuit_breaker::{CircuitBreaker, CircuitState};
///
/// let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
/// assert!(breaker.allow_request("flaky_tool"));
/// breaker.record_failure("flaky_tool");
/// breaker.record_failure("flaky_tool");
/// assert_eq!(breaker.state("flaky_tool"), CircuitState::Open);
/// assert!(!breaker.allow_request("flaky_tool"));
/// ```
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    entries: Mutex<HashMap<String, CircuitEntry>>,
}

impl CircuitBreaker {
    /// Create a breaker table with explicit thresholds.
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Decide whether a request for `key` may proceed.
    ///
    /// In `Open`, once the cool-down has elapsed the call transitions the
    /// circuit to `HalfOpen` and admits exactly this probe.
    pub fn allow_request(&self, key: &str) -> bool {
        let mut entries = self.lock();
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(CircuitEntry::new);
        match entry.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = entry
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or_else(|| self.cooldown);
                if elapsed >= self.cooldown {
                    entry.state = CircuitState::HalfOpen;
                    log::info!("circuit for '{}' half-open, admitting probe", key);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Report a successful call for `key`.
    pub fn record_success(&self, key: &str) {
        let mut entries = self.lock();
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(CircuitEntry::new);
        match entry.state {
            CircuitState::Closed => {
                entry.failure_count = 0;
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                // A success in Open can only come from a probe admitted just
                // before a concurrent failure flipped the state back; treat
                // it as a recovered probe either way.
                entry.state = CircuitState::Closed;
                entry.failure_count = 0;
                entry.opened_at = None;
                log::info!("circuit for '{}' closed after successful probe", key);
            }
        }
    }

    /// Report a failed call for `key`.
    pub fn record_failure(&self, key: &str) {
        let mut entries = self.lock();
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(CircuitEntry::new);
        match entry.state {
            CircuitState::Closed => {
                entry.failure_count += 1;
                if entry.failure_count >= self.failure_threshold {
                    entry.state = CircuitState::Open;
                    entry.opened_at = Some(Instant::now());
                    log::warn!(
                        "circuit for '{}' opened after {} consecutive failures",
                        key,
                        entry.failure_count
                    );
                }
            }
            CircuitState::HalfOpen => {
                entry.state = CircuitState::Open;
                entry.opened_at = Some(Instant::now());
                log::warn!("circuit for '{}' re-opened, probe failed", key);
            }
            CircuitState::Open => {}
        }
    }

    /// Current state for `key` (defaults to `Closed` for unseen keys).
    pub fn state(&self, key: &str) -> CircuitState {
        self.lock()
            .get(key)
            .map(|entry| entry.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Consecutive failure count for `key`.
    pub fn failure_count(&self, key: &str) -> u32 {
        self.lock()
            .get(key)
            .map(|entry| entry.failure_count)
            .unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CircuitEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for CircuitBreaker {
    /// Breaker with the documented default policy: 5 failures, 60 s cool-down.
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(5, Duration::from_secs(60));
        for _ in 0..4 {
            breaker.record_failure("t");
            assert_eq!(breaker.state("t"), CircuitState::Closed);
        }
        breaker.record_failure("t");
        assert_eq!(breaker.state("t"), CircuitState::Open);
        assert!(!breaker.allow_request("t"));
    }

    #[test]
    fn success_resets_failure_count_in_closed() {
        let breaker = CircuitBreaker::default();
        breaker.record_failure("t");
        breaker.record_failure("t");
        breaker.record_success("t");
        assert_eq!(breaker.failure_count("t"), 0);
        assert_eq!(breaker.state("t"), CircuitState::Closed);
    }

    #[test]
    fn half_open_probe_after_cooldown_then_close_on_success() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(0));
        breaker.record_failure("t");
        assert_eq!(breaker.state("t"), CircuitState::Open);

        // Zero cool-down: the next decision admits a half-open probe.
        assert!(breaker.allow_request("t"));
        assert_eq!(breaker.state("t"), CircuitState::HalfOpen);

        breaker.record_success("t");
        assert_eq!(breaker.state("t"), CircuitState::Closed);
        assert_eq!(breaker.failure_count("t"), 0);
    }

    #[test]
    fn half_open_probe_failure_reopens() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(0));
        breaker.record_failure("t");
        assert!(breaker.allow_request("t"));
        breaker.record_failure("t");
        assert_eq!(breaker.state("t"), CircuitState::Open);
    }

    #[test]
    fn keys_are_independent() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        breaker.record_failure("a");
        assert_eq!(breaker.state("a"), CircuitState::Open);
        assert_eq!(breaker.state("b"), CircuitState::Closed);
        assert!(breaker.allow_request("b"));
    }

    #[test]
    fn open_rejects_before_cooldown() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(3600));
        breaker.record_failure("t");
        assert!(!breaker.allow_request("t"));
        assert_eq!(breaker.state("t"), CircuitState::Open);
    }
}
