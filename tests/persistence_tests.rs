//! Durable-store round trip: an execution suspended on approval survives a
//! process restart (modeled as a fresh store handle and executor) and
//! resumes to completion, with the hash-chained action log intact.

use qaforge::approval::ApprovalEngine;
use qaforge::circuit_breaker::CircuitBreaker;
use qaforge::dispatcher::ToolDispatcher;
use qaforge::execution::{AgentKind, ExecutionStatus};
use qaforge::executor::{AgentExecutor, ExecutorConfig, StartAgentRequest};
use qaforge::planner::{PlannedAction, ScriptedPlanner};
use qaforge::store::{ExecutionStore, JsonlExecutionStore};
use qaforge::tool_protocol::ToolRegistry;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

fn executor_over(
    store: Arc<JsonlExecutionStore>,
    approvals: Arc<ApprovalEngine>,
    planner: ScriptedPlanner,
) -> Arc<AgentExecutor> {
    let dispatcher = Arc::new(
        ToolDispatcher::new(
            Arc::new(RwLock::new(ToolRegistry::new())),
            Arc::new(CircuitBreaker::default()),
        )
        .with_backoff_base(Duration::from_millis(1)),
    );
    let mut config = ExecutorConfig::default();
    config
        .actions_always_requiring_approval
        .push("write_test_file".to_string());
    Arc::new(
        AgentExecutor::new(
            store as Arc<dyn ExecutionStore>,
            dispatcher,
            approvals,
            Arc::new(planner),
        )
        .with_default_config(config),
    )
}

#[tokio::test]
async fn suspended_execution_resumes_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let approvals = Arc::new(ApprovalEngine::new(Duration::from_secs(3600)));

    // First "process": run until the approval suspension persists.
    let store = Arc::new(JsonlExecutionStore::open(dir.path()).unwrap());
    let planner = ScriptedPlanner::new().then(PlannedAction::Invoke {
        action_type: "write_test_file".to_string(),
        parameters: json!({"path": "drafts/T.json", "content": "{}"}),
    });
    let executor = executor_over(Arc::clone(&store), Arc::clone(&approvals), planner);

    let execution = executor
        .create(StartAgentRequest::new(
            AgentKind::TestGenerator,
            "generate_test",
            json!({}),
        ))
        .await
        .unwrap();

    let runner = Arc::clone(&executor);
    let run_id = execution.id.clone();
    let handle = tokio::spawn(async move { runner.run(&run_id).await });

    let mut pending_id = None;
    for _ in 0..500 {
        if let Some(current) = store.load_execution(&execution.id).await.unwrap() {
            if current.status == ExecutionStatus::WaitingForApproval {
                pending_id = current.pending_approval_id.clone();
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let pending_id = pending_id.expect("execution never suspended on approval");
    // Model the crash: abandon the running task mid-suspension.
    handle.abort();
    drop(executor);
    drop(store);

    // Second "process": a fresh handle replays the same state.
    let store = Arc::new(JsonlExecutionStore::open(dir.path()).unwrap());
    let reloaded = store
        .load_execution(&execution.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.status, ExecutionStatus::WaitingForApproval);
    assert_eq!(reloaded.iterations_used, 1);
    assert_eq!(reloaded.pending_approval_id.as_deref(), Some(&*pending_id));

    // Recovery scans see it as running-but-stale work.
    assert_eq!(store.list_running().await.unwrap().len(), 1);

    let planner = ScriptedPlanner::new().then(PlannedAction::GoalReached {
        summary: "resumed and finished".to_string(),
    });
    let executor = executor_over(Arc::clone(&store), Arc::clone(&approvals), planner);
    approvals
        .approve(&pending_id, "reviewer", None)
        .await
        .unwrap();

    let finished = executor.run(&execution.id).await.unwrap();
    assert_eq!(finished.status, ExecutionStatus::Succeeded);
    assert_eq!(finished.iterations_used, 2);

    let actions = store.list_actions(&execution.id).await.unwrap();
    assert_eq!(actions.len(), 2);
    assert_eq!(actions[0].output.as_ref().unwrap()["approved"], true);

    // The append-only log's hash chain is intact end to end.
    assert!(store.verify_integrity(&execution.id).unwrap());
}
