//! Fixed-window rate limiting for LLM calls.
//!
//! Quotas are tracked per `(caller identity, role)` pair. A window opens on
//! the first request and admits up to the role's quota until it expires;
//! denied requests learn when the window resets so callers can surface a
//! retry-after. State lives behind a plain mutex that is only held for the
//! map update — never across I/O.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateDecision {
    /// Whether the call may proceed.
    pub allowed: bool,
    /// Requests left in the current window (0 when denied).
    pub remaining: u32,
    /// Time until the current window resets.
    pub reset_after: Duration,
}

struct WindowEntry {
    window_start: Instant,
    count: u32,
}

/// Fixed-window limiter with per-role quota overrides.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use qaforge::gateway::rate_limit::RateLimiter;
///
/// let limiter = RateLimiter::new(Duration::from_secs(60), 2)
///     .with_role_quota("admin", 100);
///
/// assert!(limiter.check("alice", "tester").allowed);
/// assert!(limiter.check("alice", "tester").allowed);
/// assert!(!limiter.check("alice", "tester").allowed);
/// // Distinct callers have independent windows.
/// assert!(limiter.check("bob", "tester").allowed);
/// ```
pub struct RateLimiter {
    window: Duration,
    default_quota: u32,
    role_quotas: HashMap<String, u32>,
    entries: Mutex<HashMap<(String, String), WindowEntry>>,
}

impl RateLimiter {
    /// Create a limiter admitting `default_quota` requests per `window`.
    pub fn new(window: Duration, default_quota: u32) -> Self {
        Self {
            window,
            default_quota,
            role_quotas: HashMap::new(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Override the quota for one role (builder pattern).
    pub fn with_role_quota(mut self, role: impl Into<String>, quota: u32) -> Self {
        self.role_quotas.insert(role.into(), quota);
        self
    }

    /// Quota applied to `role`.
    pub fn quota_for(&self, role: &str) -> u32 {
        self.role_quotas
            .get(role)
            .copied()
            .unwrap_or(self.default_quota)
    }

    /// Check (and count) one request for `(caller, role)`.
    pub fn check(&self, caller: &str, role: &str) -> RateDecision {
        let quota = self.quota_for(role);
        let now = Instant::now();
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let entry = entries
            .entry((caller.to_string(), role.to_string()))
            .or_insert(WindowEntry {
                window_start: now,
                count: 0,
            });

        let elapsed = now.duration_since(entry.window_start);
        if elapsed >= self.window {
            entry.window_start = now;
            entry.count = 0;
        }

        let reset_after = self
            .window
            .checked_sub(now.duration_since(entry.window_start))
            .unwrap_or_else(|| Duration::from_secs(0));

        if entry.count >= quota {
            log::debug!("rate limit hit for caller='{}' role='{}'", caller, role);
            return RateDecision {
                allowed: false,
                remaining: 0,
                reset_after,
            };
        }

        entry.count += 1;
        RateDecision {
            allowed: true,
            remaining: quota - entry.count,
            reset_after,
        }
    }
}
