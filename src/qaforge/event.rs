//! Execution event system.
//!
//! Provides a callback-based observability layer for the agent executor and
//! its surrounding services. Implement [`EventHandler`] to receive real-time
//! notifications about:
//!
//! - **Execution lifecycle**: start, per-iteration planning, terminal status
//! - **Actions**: dispatch begin/end with outcomes
//! - **Approvals**: request creation, decisions, expiry
//! - **Budget**: per-caller cost threshold alerts from the LLM gateway
//!
//! The handler is wrapped in `Arc<dyn EventHandler>` and shared across the
//! executor, gateway, and approval engine. Every method has a default no-op
//! implementation, so implementors only override what they care about.
//!
//! # Example
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use qaforge::event::{EventHandler, ExecutionEvent};
//!
//! struct ConsoleHandler;
//!
//! #[async_trait]
//! impl EventHandler for ConsoleHandler {
//!     async fn on_execution_event(&self, event: &ExecutionEvent) {
//!         match event {
//!             ExecutionEvent::ActionCompleted { execution_id, iteration, success, .. } => {
//!                 println!("{} iteration {} -> success={}", execution_id, iteration, success);
//!             }
//!             _ => {}
//!         }
//!     }
//! }
//! ```

use async_trait::async_trait;

/// Events emitted during the lifecycle of an agent execution.
///
/// Every variant carries the `execution_id` so handlers can correlate events
/// without external state. Emission order within one execution mirrors the
/// executor loop:
///
/// ```text
/// ExecutionStarted
///   └─ PlannerInvoked { iteration: 1 }
///   └─ ActionStarted { iteration: 1 }
///   └─ (ApprovalRequested / ApprovalDecided when the action is gated)
///   └─ ActionCompleted { iteration: 1 }
///   └─ ... loop ...
/// ExecutionFinished
/// ```
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// Fired when the executor accepts a new or resumed execution.
    ExecutionStarted {
        execution_id: String,
        /// Agent kind as a stable string (e.g. `"test_generator"`).
        agent_kind: String,
        goal: String,
    },

    /// Fired just before the planner (an LLM round-trip) is consulted.
    PlannerInvoked {
        execution_id: String,
        /// 1-based iteration about to be planned.
        iteration: u32,
    },

    /// Fired when an action has been recorded and dispatch is about to begin.
    ActionStarted {
        execution_id: String,
        iteration: u32,
        action_type: String,
    },

    /// Fired once an action's outcome (including synthesized approval
    /// outcomes) has been persisted.
    ActionCompleted {
        execution_id: String,
        iteration: u32,
        action_type: String,
        success: bool,
        /// Machine-readable error kind, when the action failed.
        error_kind: Option<String>,
        /// Cost incurred by this action, in abstract cost units.
        cost: f64,
    },

    /// Fired when the executor suspends on a pending approval request.
    ApprovalRequested {
        execution_id: String,
        request_id: String,
        request_type: String,
    },

    /// Fired when a suspended execution observes a decision (or expiry).
    ApprovalDecided {
        execution_id: String,
        request_id: String,
        /// Final request status as a stable string (e.g. `"APPROVED"`).
        status: String,
    },

    /// Fired exactly once, when the execution reaches a terminal status.
    ExecutionFinished {
        execution_id: String,
        /// Terminal status as a stable string (e.g. `"SUCCEEDED"`).
        status: String,
        iterations_used: u32,
        cost_accumulated: f64,
    },

    /// Fired by the LLM gateway when a caller crosses a budget threshold.
    BudgetAlert {
        caller: String,
        /// Fraction of the budget consumed, in `[0.0, 1.0+]`.
        consumed_fraction: f64,
        spent: f64,
        budget: f64,
    },
}

/// Callback interface for execution observability.
///
/// The default implementation ignores every event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Receive one [`ExecutionEvent`]. Called inline from the emitting
    /// component's task; implementations should return quickly and offload
    /// heavy work.
    async fn on_execution_event(&self, _event: &ExecutionEvent) {}
}

/// Handler that drops all events. Useful as an explicit default.
pub struct NoopEventHandler;

#[async_trait]
impl EventHandler for NoopEventHandler {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counter(AtomicUsize);

    #[async_trait]
    impl EventHandler for Counter {
        async fn on_execution_event(&self, _event: &ExecutionEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn handler_receives_events() {
        let handler = Arc::new(Counter(AtomicUsize::new(0)));
        let event = ExecutionEvent::ExecutionStarted {
            execution_id: "x".to_string(),
            agent_kind: "test_generator".to_string(),
            goal: "generate".to_string(),
        };
        handler.on_execution_event(&event).await;
        handler.on_execution_event(&event).await;
        assert_eq!(handler.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn noop_handler_ignores_events() {
        let handler = NoopEventHandler;
        handler
            .on_execution_event(&ExecutionEvent::BudgetAlert {
                caller: "c".to_string(),
                consumed_fraction: 0.8,
                spent: 0.8,
                budget: 1.0,
            })
            .await;
    }
}
