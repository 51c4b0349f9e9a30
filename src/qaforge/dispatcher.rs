//! Tool dispatch with circuit breaking and retry.
//!
//! The dispatcher is the single path from a planned action to a tool
//! invocation. For every call it resolves the tool, consults the
//! [`CircuitBreaker`], validates parameters against the tool's own schema,
//! executes, and reports the outcome back to the breaker. Validation
//! failures are caller errors and are deliberately *not* reported to the
//! breaker — only the tool's actual behavior moves circuit state.
//!
//! [`ToolDispatcher::dispatch_with_retry`] wraps the base dispatch with
//! exponential backoff (`2^attempt × 1 s`, capped). Circuit-open and
//! invalid-parameter outcomes are never retried; cancellation aborts the
//! backoff wait immediately.
//!
//! The dispatcher never raises: every condition is translated into a
//! [`ToolOutcome`] mapping and returned to the caller unchanged, so the
//! planner always gets something it can reason about.

use crate::qaforge::cancel::CancellationToken;
use crate::qaforge::circuit_breaker::CircuitBreaker;
use crate::qaforge::tool_protocol::{ErrorKind, ToolOutcome, ToolRegistry};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Ceiling applied to the exponential backoff between retries.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Validates, circuit-checks, executes, and records tool invocations.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use tokio::sync::RwLock;
/// use qaforge::circuit_breaker::CircuitBreaker;
/// use qaforge::dispatcher::ToolDispatcher;
/// use qaforge::tool_protocol::ToolRegistry;
///
/// let registry = Arc::new(RwLock::new(ToolRegistry::new()));
/// let breaker = Arc::new(CircuitBreaker::default());
/// let dispatcher = ToolDispatcher::new(registry, breaker);
/// ```
pub struct ToolDispatcher {
    registry: Arc<RwLock<ToolRegistry>>,
    breaker: Arc<CircuitBreaker>,
    backoff_base: Duration,
}

impl ToolDispatcher {
    /// Create a dispatcher over a shared registry and breaker table.
    pub fn new(registry: Arc<RwLock<ToolRegistry>>, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            registry,
            breaker,
            backoff_base: Duration::from_secs(1),
        }
    }

    /// Override the backoff base unit (builder pattern). Tests use a
    /// millisecond base so retry paths run fast.
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Borrow the breaker table (for state inspection).
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Dispatch one tool invocation.
    ///
    /// Outcome mapping, in order of precedence:
    ///
    /// 1. unknown action type ⇒ `success=false`, kind `tool_error`
    /// 2. circuit open ⇒ `success=false`, `circuit_open=true` (tool not invoked)
    /// 3. schema violation ⇒ `success=false`, kind `invalid_parameters`
    ///    (not reported to the breaker)
    /// 4. tool raised ⇒ `success=false`, kind `tool_error`, breaker failure
    /// 5. tool returned ⇒ outcome passed through unchanged, breaker success
    ///    or failure according to its `success` flag
    pub async fn dispatch(&self, action_type: &str, params: Value) -> ToolOutcome {
        let tool = {
            let registry = self.registry.read().await;
            match registry.lookup(action_type) {
                Some(tool) => Arc::clone(tool),
                None => {
                    return ToolOutcome::failure(
                        ErrorKind::ToolError,
                        format!("no tool registered for action type '{}'", action_type),
                    );
                }
            }
        };

        if !self.breaker.allow_request(action_type) {
            let mut outcome = ToolOutcome::failure(
                ErrorKind::CircuitOpen,
                format!("circuit open for '{}'", action_type),
            );
            outcome.circuit_open = true;
            return outcome;
        }

        if let Err(err) = tool.validate_params(&params) {
            // Caller error, not tool failure: the breaker must not move.
            return ToolOutcome::failure(ErrorKind::InvalidParameters, err.to_string());
        }

        match tool.execute(params).await {
            Ok(mut outcome) => {
                if outcome.success {
                    self.breaker.record_success(action_type);
                } else {
                    self.breaker.record_failure(action_type);
                    if outcome.error_kind.is_none() {
                        outcome.error_kind = Some(ErrorKind::ToolError);
                    }
                }
                outcome
            }
            Err(err) => {
                self.breaker.record_failure(action_type);
                if log::log_enabled!(log::Level::Warn) {
                    log::warn!("tool '{}' raised: {}", action_type, err);
                }
                ToolOutcome::failure(ErrorKind::ToolError, err.to_string())
            }
        }
    }

    /// Dispatch with retry and exponential backoff.
    ///
    /// Returns immediately on success, on a circuit-open outcome (waiting it
    /// out is the planner's decision, not the dispatcher's), and on invalid
    /// parameters (a planner bug that retrying cannot fix). All other
    /// failures wait `2^attempt` base units (capped at 30 s) and retry
    /// until `max_attempts` is exhausted. Cancellation aborts the wait and
    /// yields a `cancelled` outcome.
    pub async fn dispatch_with_retry(
        &self,
        action_type: &str,
        params: Value,
        max_attempts: u32,
        cancel: &CancellationToken,
    ) -> ToolOutcome {
        let attempts = max_attempts.max(1);
        let mut last = ToolOutcome::failure(ErrorKind::ToolError, "no attempts made");

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return ToolOutcome::failure(ErrorKind::Cancelled, "execution cancelled");
            }

            last = self.dispatch(action_type, params.clone()).await;
            if last.success
                || last.circuit_open
                || last.error_kind == Some(ErrorKind::InvalidParameters)
            {
                return last;
            }
            if attempt == attempts {
                break;
            }

            let exponent = attempt.min(16);
            let delay = self
                .backoff_base
                .checked_mul(1u32 << exponent)
                .unwrap_or(MAX_BACKOFF)
                .min(MAX_BACKOFF);
            if log::log_enabled!(log::Level::Debug) {
                log::debug!(
                    "retrying '{}' after {:?} (attempt {}/{})",
                    action_type,
                    delay,
                    attempt,
                    attempts
                );
            }
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    return ToolOutcome::failure(ErrorKind::Cancelled, "execution cancelled");
                }
            }
        }
        last
    }
}
