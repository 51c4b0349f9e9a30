//! Configuration for qaforge.
//!
//! Provides the [`QaForgeConfig`] struct holding the process-wide knobs:
//! rate-limit windows, circuit-breaker thresholds, default approval timeout,
//! default iteration/cost ceilings, and the drafts storage root. Users
//! construct it manually or via [`QaForgeConfig::from_env`] — no file
//! parsing dependencies are required.
//!
//! # Example
//!
//! ```rust
//! use qaforge::config::QaForgeConfig;
//! use std::path::PathBuf;
//!
//! // Use the defaults
//! let config = QaForgeConfig::default();
//! assert_eq!(config.max_iterations, 5);
//!
//! // Or override individual knobs
//! let config = QaForgeConfig {
//!     drafts_root: PathBuf::from("/var/data/qa_drafts"),
//!     ..QaForgeConfig::default()
//! };
//! ```

use std::path::PathBuf;
use std::time::Duration;

/// Process-wide configuration for qaforge components.
///
/// Every field has a sensible default matching the documented behavior of
/// the core; environment variables (see [`QaForgeConfig::from_env`]) can
/// override each one at startup.
#[derive(Debug, Clone)]
pub struct QaForgeConfig {
    /// Rate-limiter window length.
    pub rate_limit_window: Duration,
    /// Requests allowed per `(caller, role)` pair inside one window.
    pub rate_limit_quota: u32,
    /// Consecutive failures before a tool's circuit opens.
    pub breaker_failure_threshold: u32,
    /// Cool-down before an open circuit admits a half-open probe.
    pub breaker_cooldown: Duration,
    /// Default lifetime of a pending approval request.
    pub approval_timeout: Duration,
    /// Interval between approval expiry sweeps.
    pub approval_sweep_interval: Duration,
    /// Default iteration ceiling for an agent execution.
    pub max_iterations: u32,
    /// Default cost ceiling for an agent execution, in abstract cost units.
    pub max_cost: f64,
    /// Directory where generated test drafts (intent JSON + rendered source)
    /// are materialized.
    pub drafts_root: PathBuf,
}

impl Default for QaForgeConfig {
    fn default() -> Self {
        Self {
            rate_limit_window: Duration::from_secs(60),
            rate_limit_quota: 30,
            breaker_failure_threshold: 5,
            breaker_cooldown: Duration::from_secs(60),
            approval_timeout: Duration::from_secs(3600),
            approval_sweep_interval: Duration::from_secs(30),
            max_iterations: 5,
            max_cost: 1.0,
            drafts_root: PathBuf::from("qa_drafts"),
        }
    }
}

impl QaForgeConfig {
    /// Build a configuration from environment variables, falling back to the
    /// defaults for anything unset or unparseable.
    ///
    /// Recognized variables:
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `QAFORGE_RATE_LIMIT_WINDOW_SECS` | `rate_limit_window` |
    /// | `QAFORGE_RATE_LIMIT_QUOTA` | `rate_limit_quota` |
    /// | `QAFORGE_BREAKER_THRESHOLD` | `breaker_failure_threshold` |
    /// | `QAFORGE_BREAKER_COOLDOWN_SECS` | `breaker_cooldown` |
    /// | `QAFORGE_APPROVAL_TIMEOUT_SECS` | `approval_timeout` |
    /// | `QAFORGE_APPROVAL_SWEEP_SECS` | `approval_sweep_interval` |
    /// | `QAFORGE_MAX_ITERATIONS` | `max_iterations` |
    /// | `QAFORGE_MAX_COST` | `max_cost` |
    /// | `QAFORGE_DRAFTS_ROOT` | `drafts_root` |
    ///
    /// Unparseable values are logged at warn level and ignored rather than
    /// aborting startup.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(secs) = env_u64("QAFORGE_RATE_LIMIT_WINDOW_SECS") {
            config.rate_limit_window = Duration::from_secs(secs);
        }
        if let Some(quota) = env_u64("QAFORGE_RATE_LIMIT_QUOTA") {
            config.rate_limit_quota = quota as u32;
        }
        if let Some(threshold) = env_u64("QAFORGE_BREAKER_THRESHOLD") {
            config.breaker_failure_threshold = threshold as u32;
        }
        if let Some(secs) = env_u64("QAFORGE_BREAKER_COOLDOWN_SECS") {
            config.breaker_cooldown = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("QAFORGE_APPROVAL_TIMEOUT_SECS") {
            config.approval_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("QAFORGE_APPROVAL_SWEEP_SECS") {
            config.approval_sweep_interval = Duration::from_secs(secs);
        }
        if let Some(iters) = env_u64("QAFORGE_MAX_ITERATIONS") {
            config.max_iterations = iters as u32;
        }
        if let Some(cost) = env_f64("QAFORGE_MAX_COST") {
            config.max_cost = cost;
        }
        if let Ok(root) = std::env::var("QAFORGE_DRAFTS_ROOT") {
            if !root.is_empty() {
                config.drafts_root = PathBuf::from(root);
            }
        }

        config
    }
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.parse::<u64>() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("ignoring unparseable {}={:?}", name, raw);
            None
        }
    }
}

fn env_f64(name: &str) -> Option<f64> {
    let raw = std::env::var(name).ok()?;
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Some(v),
        _ => {
            log::warn!("ignoring unparseable {}={:?}", name, raw);
            None
        }
    }
}

/// Initialize `env_logger` for binaries and integration tests.
///
/// Safe to call more than once; subsequent calls are no-ops.
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env().try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = QaForgeConfig::default();
        assert_eq!(config.breaker_failure_threshold, 5);
        assert_eq!(config.breaker_cooldown, Duration::from_secs(60));
        assert_eq!(config.approval_timeout, Duration::from_secs(3600));
        assert_eq!(config.max_iterations, 5);
        assert!((config.max_cost - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn from_env_overrides_and_tolerates_garbage() {
        std::env::set_var("QAFORGE_MAX_ITERATIONS", "9");
        std::env::set_var("QAFORGE_MAX_COST", "not-a-number");
        let config = QaForgeConfig::from_env();
        assert_eq!(config.max_iterations, 9);
        // Garbage falls back to the default rather than aborting.
        assert!((config.max_cost - 1.0).abs() < f64::EPSILON);
        std::env::remove_var("QAFORGE_MAX_ITERATIONS");
        std::env::remove_var("QAFORGE_MAX_COST");
    }
}
