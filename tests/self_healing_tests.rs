//! Self-healing flow: vague driver error → locator extracted from the
//! intent → registry fallback discovered → fix submitted for approval.

use qaforge::approval::ApprovalEngine;
use qaforge::circuit_breaker::CircuitBreaker;
use qaforge::collab::browser::{BrowserScript, ScriptedBrowser};
use qaforge::collab::git::InMemoryGitHost;
use qaforge::collab::issue_tracker::InMemoryTracker;
use qaforge::dispatcher::ToolDispatcher;
use qaforge::element_registry::ElementRegistry;
use qaforge::execution::{AgentKind, ExecutionStatus};
use qaforge::executor::{AgentExecutor, StartAgentRequest};
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

const REGISTRY_JSON: &str = r##"{
    "version": "1.0",
    "defaultStrategy": "testid",
    "pages": {
        "LoginPage": {
            "url": "https://www.saucedemo.com",
            "elements": {
                "login-button": {
                    "strategy": "testid", "value": "login-button", "playwrightCode": "",
                    "fallbacks": [
                        {"strategy": "css", "value": "#login-button"},
                        {"strategy": "text", "value": "Login"}
                    ]
                }
            }
        }
    }
}"##;

fn broken_intent() -> Value {
    json!({
        "className": "LoginPage",
        "testClassName": "LoginTest",
        "steps": [
            {"action": "CLICK", "locator": "testid=login-button"},
            {"action": "ASSERT_URL", "value": ".*inventory.*"}
        ]
    })
}

#[tokio::test]
async fn broken_locator_heals_via_registry_fallback_and_approval() {
    let drafts = tempfile::tempdir().unwrap();
    let gateway = Arc::new(LlmGateway::new(
        Arc::new(ScriptedProvider::new("mock")),
        RateLimiter::new(Duration::from_secs(60), 100),
    ));
    let approvals = Arc::new(
        ApprovalEngine::new(Duration::from_secs(3600))
            .with_drafts_root(drafts.path().to_path_buf()),
    );
    let elements = Arc::new(RwLock::new(
        ElementRegistry::from_json(REGISTRY_JSON).unwrap(),
    ));
    let registry = tools::standard_registry(
        Arc::new(InMemoryTracker::new()),
        Arc::new(ScriptedBrowser::new(BrowserScript::default())),
        Arc::new(InMemoryGitHost::new()),
        gateway,
        Arc::clone(&approvals),
        Arc::clone(&elements),
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

    let planner = ScriptedPlanner::new()
        .then(PlannedAction::Invoke {
            action_type: "extract_broken_locator".to_string(),
            parameters: json!({
                "error_message": "Element not found",
                "test_intent": broken_intent()
            }),
        })
        .then(PlannedAction::Invoke {
            action_type: "discover_locator".to_string(),
            parameters: json!({"broken_locator": "testid=login-button"}),
        })
        .then(PlannedAction::Invoke {
            action_type: "update_element_registry".to_string(),
            parameters: json!({
                "page": "LoginPage", "element": "login-button",
                "strategy": "css", "value": "#login-button"
            }),
        })
        .then(PlannedAction::Invoke {
            action_type: "request_approval".to_string(),
            parameters: json!({
                "content": "Replace testid=login-button with css=#login-button",
                "path": "fixes/LoginTest.json"
            }),
        })
        .then(PlannedAction::GoalReached {
            summary: "fix approved".to_string(),
        });

    let executor = Arc::new(AgentExecutor::new(
        Arc::clone(&store) as Arc<dyn ExecutionStore>,
        dispatcher,
        Arc::clone(&approvals),
        Arc::new(planner),
    ));

    let execution = executor
        .create(
            StartAgentRequest::new(
                AgentKind::SelfHealingFixer,
                "heal_broken_test",
                json!({"test": "LoginTest"}),
            )
            .with_max_iterations(8),
        )
        .await
        .unwrap();

    let runner = Arc::clone(&executor);
    let run_id = execution.id.clone();
    let handle = tokio::spawn(async move { runner.run(&run_id).await });

    // The agent works through extraction and discovery, then suspends on
    // the SELF_HEALING_FIX gate.
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
    assert_eq!(request.request_type.label(), "SELF_HEALING_FIX");
    assert!(request.content.contains("css=#login-button"));
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

    let actions = store.list_actions(&execution.id).await.unwrap();
    assert_eq!(actions.len(), 5);

    // Vague error: the locator comes out of the intent content.
    let extraction = actions[0].output.as_ref().unwrap();
    assert_eq!(extraction["success"], true);
    assert_eq!(extraction["broken_locator"], "testid=login-button");
    assert_eq!(extraction["extracted_from_content"], true);

    // The registry supplied the ordered fallbacks.
    let discovery = actions[1].output.as_ref().unwrap();
    assert_eq!(discovery["candidate_found"], true);
    assert_eq!(discovery["candidate"], "css=#login-button");
    assert_eq!(discovery["page"], "LoginPage");

    // The verified fallback became the primary locator.
    let snapshot = elements.read().await;
    let element = snapshot.element("LoginPage", "login-button").unwrap();
    assert_eq!(element.primary_locator(), "css=#login-button");

    // Approval materialized the fix into the drafts area.
    assert!(drafts.path().join("fixes/LoginTest.json").exists());
}
