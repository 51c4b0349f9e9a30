//! Dispatcher/breaker integration: sustained tool failure opens the
//! circuit and sheds load without invoking the tool.

use async_trait::async_trait;
use qaforge::cancel::CancellationToken;
use qaforge::circuit_breaker::{CircuitBreaker, CircuitState};
use qaforge::dispatcher::ToolDispatcher;
use qaforge::tool_protocol::{
    ErrorKind, Tool, ToolOutcome, ToolParameter, ToolRegistry,
};
use serde_json::Value;
use std::error::Error;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

struct AlwaysFailingTool {
    invocations: Arc<AtomicU32>,
}

#[async_trait]
impl Tool for AlwaysFailingTool {
    fn action_type(&self) -> &str {
        "unstable_tool"
    }
    fn name(&self) -> &str {
        "Unstable Tool"
    }
    fn description(&self) -> &str {
        "Fails every time"
    }
    fn parameters(&self) -> Vec<ToolParameter> {
        vec![]
    }
    async fn execute(&self, _params: Value) -> Result<ToolOutcome, Box<dyn Error + Send + Sync>> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(ToolOutcome::failure(ErrorKind::ToolError, "backend down"))
    }
}

fn dispatcher_with_breaker(
    breaker: Arc<CircuitBreaker>,
) -> (ToolDispatcher, Arc<AtomicU32>) {
    let invocations = Arc::new(AtomicU32::new(0));
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(AlwaysFailingTool {
        invocations: Arc::clone(&invocations),
    }));
    let dispatcher = ToolDispatcher::new(Arc::new(RwLock::new(registry)), breaker)
        .with_backoff_base(Duration::from_millis(1));
    (dispatcher, invocations)
}

#[tokio::test]
async fn five_failures_open_the_circuit_and_shed_the_sixth_call() {
    let breaker = Arc::new(CircuitBreaker::default());
    let (dispatcher, invocations) = dispatcher_with_breaker(Arc::clone(&breaker));
    let cancel = CancellationToken::new();

    // Five dispatches through the retry wrapper with max-attempts=1.
    for _ in 0..5 {
        let outcome = dispatcher
            .dispatch_with_retry("unstable_tool", serde_json::json!({}), 1, &cancel)
            .await;
        assert!(!outcome.success);
        assert!(!outcome.circuit_open);
    }
    assert_eq!(invocations.load(Ordering::SeqCst), 5);
    assert_eq!(breaker.state("unstable_tool"), CircuitState::Open);

    // Sixth direct dispatch: rejected without touching the tool.
    let outcome = dispatcher
        .dispatch("unstable_tool", serde_json::json!({}))
        .await;
    assert!(!outcome.success);
    assert!(outcome.circuit_open);
    assert_eq!(outcome.error_kind, Some(ErrorKind::CircuitOpen));
    assert_eq!(invocations.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn circuit_open_is_not_retried_by_the_wrapper() {
    let breaker = Arc::new(CircuitBreaker::new(1, Duration::from_secs(3600)));
    let (dispatcher, invocations) = dispatcher_with_breaker(Arc::clone(&breaker));
    let cancel = CancellationToken::new();

    // One failure opens the circuit with threshold 1.
    dispatcher
        .dispatch_with_retry("unstable_tool", serde_json::json!({}), 1, &cancel)
        .await;
    assert_eq!(breaker.state("unstable_tool"), CircuitState::Open);

    // The wrapper sees circuit_open and returns immediately, once.
    let outcome = dispatcher
        .dispatch_with_retry("unstable_tool", serde_json::json!({}), 5, &cancel)
        .await;
    assert!(outcome.circuit_open);
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn half_open_success_resets_the_counter() {
    struct RecoveringTool {
        fail_first: AtomicU32,
    }

    #[async_trait]
    impl Tool for RecoveringTool {
        fn action_type(&self) -> &str {
            "recovering_tool"
        }
        fn name(&self) -> &str {
            "Recovering Tool"
        }
        fn description(&self) -> &str {
            "Fails, then recovers"
        }
        fn parameters(&self) -> Vec<ToolParameter> {
            vec![]
        }
        async fn execute(
            &self,
            _params: Value,
        ) -> Result<ToolOutcome, Box<dyn Error + Send + Sync>> {
            if self.fail_first.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n > 0 {
                    Some(n - 1)
                } else {
                    None
                }
            })
            .is_ok()
            {
                Ok(ToolOutcome::failure(ErrorKind::ToolError, "still down"))
            } else {
                Ok(ToolOutcome::success())
            }
        }
    }

    // Zero cool-down so the next decision after opening admits a probe.
    let breaker = Arc::new(CircuitBreaker::new(2, Duration::from_millis(0)));
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(RecoveringTool {
        fail_first: AtomicU32::new(2),
    }));
    let dispatcher = ToolDispatcher::new(Arc::new(RwLock::new(registry)), Arc::clone(&breaker))
        .with_backoff_base(Duration::from_millis(1));

    let cancel = CancellationToken::new();
    for _ in 0..2 {
        dispatcher
            .dispatch_with_retry("recovering_tool", serde_json::json!({}), 1, &cancel)
            .await;
    }
    assert_eq!(breaker.state("recovering_tool"), CircuitState::Open);

    // The probe succeeds, closing the circuit and resetting the counter.
    let outcome = dispatcher
        .dispatch("recovering_tool", serde_json::json!({}))
        .await;
    assert!(outcome.success);
    assert_eq!(breaker.state("recovering_tool"), CircuitState::Closed);
    assert_eq!(breaker.failure_count("recovering_tool"), 0);
}
