//! Flaky-fixer verification flow: reproduce, fix, verify, then gate the
//! git workflow behind approval — asserting the exact shape of the
//! persisted action log.

use qaforge::approval::{ApprovalEngine, ApprovalStatus};
use qaforge::circuit_breaker::CircuitBreaker;
use qaforge::collab::browser::{BrowserScript, ScriptedBrowser};
use qaforge::collab::git::{GitOp, InMemoryGitHost};
use qaforge::collab::issue_tracker::InMemoryTracker;
use qaforge::dispatcher::ToolDispatcher;
use qaforge::element_registry::ElementRegistry;
use qaforge::execution::{AgentKind, ExecutionStatus};
use qaforge::executor::{AgentExecutor, ExecutorConfig, StartAgentRequest};
use qaforge::gateway::rate_limit::RateLimiter;
use qaforge::gateway::LlmGateway;
use qaforge::llm_provider::ScriptedProvider;
use qaforge::planner::{PlannedAction, ScriptedPlanner};
use qaforge::store::{ExecutionStore, InMemoryExecutionStore};
use qaforge::tools;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

fn checkout_intent(label: &str) -> Value {
    json!({
        "className": "CheckoutPage",
        "testClassName": format!("CheckoutTest{}", label),
        "steps": [
            {"action": "NAVIGATE", "value": "https://shop.example/checkout"},
            {"action": "CLICK", "locator": "testid=place-order"}
        ]
    })
}

#[tokio::test]
async fn verification_runs_precede_the_gated_git_workflow() {
    let drafts = tempfile::tempdir().unwrap();
    let gateway = Arc::new(LlmGateway::new(
        Arc::new(ScriptedProvider::new("mock")),
        RateLimiter::new(Duration::from_secs(60), 100),
    ));
    let approvals = Arc::new(ApprovalEngine::new(Duration::from_secs(3600)));
    let git = Arc::new(InMemoryGitHost::new());
    let browser = Arc::new(ScriptedBrowser::new(BrowserScript::default()));
    let registry = tools::standard_registry(
        Arc::new(InMemoryTracker::new()),
        browser,
        git.clone(),
        gateway,
        Arc::clone(&approvals),
        Arc::new(RwLock::new(
            ElementRegistry::from_json(r#"{"version":"1","pages":{}}"#).unwrap(),
        )),
        drafts.path().to_path_buf(),
    );
    let dispatcher = Arc::new(
        ToolDispatcher::new(
            Arc::new(RwLock::new(registry)),
            Arc::new(CircuitBreaker::default()),
        )
        .with_backoff_base(Duration::from_millis(1)),
    );
    let store = Arc::new(InMemoryExecutionStore::new());

    // 5 stability runs of the original, 5 verification runs of the fix,
    // then — and only then — the git workflow.
    let stability_runs = 5u32;
    let verification_runs = 5u32;
    let mut planner = ScriptedPlanner::new();
    for run in 0..stability_runs {
        planner = planner.then(PlannedAction::Invoke {
            action_type: "execute_test".to_string(),
            parameters: json!({
                "intent": checkout_intent("Original"),
                "phase": "stability",
                "run": run + 1
            }),
        });
    }
    for run in 0..verification_runs {
        planner = planner.then(PlannedAction::Invoke {
            action_type: "execute_test".to_string(),
            parameters: json!({
                "intent": checkout_intent("Fixed"),
                "phase": "verification",
                "run": run + 1
            }),
        });
    }
    planner = planner
        .then(PlannedAction::Invoke {
            action_type: "git_workflow".to_string(),
            parameters: json!({
                "branch": "fix/checkout-flake",
                "message": "Stabilize checkout test",
                "files": {"tests/checkout.json": checkout_intent("Fixed").to_string()},
                "pr_title": "Stabilize checkout test",
                "content": "Stability fix verified 5/5"
            }),
        })
        .then(PlannedAction::GoalReached {
            summary: "fix verified and PR opened".to_string(),
        });

    // git_workflow is approval-gated out of the box; only the iteration
    // ceiling needs raising for the 12-step flow.
    let mut config = ExecutorConfig::default();
    config.max_iterations = 15;

    let executor = Arc::new(
        AgentExecutor::new(
            Arc::clone(&store) as Arc<dyn ExecutionStore>,
            dispatcher,
            Arc::clone(&approvals),
            Arc::new(planner),
        )
        .with_default_config(config),
    );

    let execution = executor
        .create(StartAgentRequest::new(
            AgentKind::FlakyFixer,
            "fix_flaky_test",
            json!({
                "test": "CheckoutTest",
                "custom_config": {"stability_check_runs": 5, "verification_runs": 5}
            }),
        ))
        .await
        .unwrap();

    let runner = Arc::clone(&executor);
    let run_id = execution.id.clone();
    let handle = tokio::spawn(async move { runner.run(&run_id).await });

    // Wait for the suspension at the git workflow, then approve as the
    // PR review gate.
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
    let request = approvals.get(&pending_id).await.unwrap();
    assert_eq!(request.request_type.label(), "FLAKY_FIX");
    approvals
        .approve(&pending_id, "reviewer", None)
        .await
        .unwrap();

    let finished = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(finished.status, ExecutionStatus::Succeeded);
    assert_eq!(finished.iterations_used, 12);

    // Exact ordering in the persisted action log: 5 stability runs, 5
    // verification runs, the gated git workflow, the terminal verdict.
    let actions = store.list_actions(&execution.id).await.unwrap();
    assert_eq!(actions.len(), 12);
    for (index, action) in actions.iter().take(10).enumerate() {
        assert_eq!(action.action_type, "execute_test");
        let phase = action.input["phase"].as_str().unwrap();
        if index < 5 {
            assert_eq!(phase, "stability");
        } else {
            assert_eq!(phase, "verification");
        }
        assert_eq!(action.input["run"], (index as u64 % 5) + 1);
        assert_eq!(action.success, Some(true));
    }
    assert_eq!(actions[10].action_type, "git_workflow");
    assert!(actions[10].required_approval);
    assert_eq!(actions[11].action_type, "goal_reached");

    // The approval replaced the dispatch, so no git mutation happened
    // before the reviewer said yes; the synthesized outcome is approved.
    assert_eq!(
        approvals.get(&pending_id).await.unwrap().status,
        ApprovalStatus::Approved
    );
    assert_eq!(actions[10].output.as_ref().unwrap()["approved"], true);
    assert!(git.operations().is_empty());

    // The review gate passed, so the workflow trigger now performs
    // branch → commit → PR in order.
    let pr_url = approvals
        .trigger_git_workflow(&pending_id, git.as_ref())
        .await
        .unwrap();
    assert!(pr_url.starts_with("https://"));
    let ops = git.operations();
    assert!(matches!(ops[0], GitOp::CreateBranch { .. }));
    assert!(matches!(ops[1], GitOp::Commit { .. }));
    assert!(matches!(ops[2], GitOp::OpenPr { .. }));
}
