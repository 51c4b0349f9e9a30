//! Execution data model.
//!
//! Shared primitives describing one agent run and its recorded steps. The
//! executor mutates these, the store persists them, and external callers
//! read them back through the query interface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The configured agent strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Generates new test intents from tracker stories.
    TestGenerator,
    /// Stabilizes flaky tests: reproduce, fix, verify, PR.
    FlakyFixer,
    /// Repairs broken locators using the element registry.
    SelfHealingFixer,
}

impl AgentKind {
    /// Stable label used in events, prompts, and persistence.
    pub fn label(&self) -> &'static str {
        match self {
            AgentKind::TestGenerator => "test_generator",
            AgentKind::FlakyFixer => "flaky_fixer",
            AgentKind::SelfHealingFixer => "self_healing_fixer",
        }
    }
}

/// Lifecycle status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    WaitingForApproval,
    Succeeded,
    Failed,
    Stopped,
    Timeout,
    BudgetExceeded,
}

impl ExecutionStatus {
    /// Terminal statuses admit no further actions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Succeeded
                | ExecutionStatus::Failed
                | ExecutionStatus::Stopped
                | ExecutionStatus::Timeout
                | ExecutionStatus::BudgetExceeded
        )
    }

    /// Stable label for events and logs.
    pub fn label(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::WaitingForApproval => "WAITING_FOR_APPROVAL",
            ExecutionStatus::Succeeded => "SUCCEEDED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Stopped => "STOPPED",
            ExecutionStatus::Timeout => "TIMEOUT",
            ExecutionStatus::BudgetExceeded => "BUDGET_EXCEEDED",
        }
    }
}

/// A single run of an agent toward a goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExecution {
    pub id: String,
    pub agent_kind: AgentKind,
    /// What the agent was asked to achieve (e.g. `"generate_test"`).
    pub goal: String,
    /// Opaque input parameters supplied by the caller.
    pub parameters: Value,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Last time any field changed; drives stuck-execution detection.
    pub updated_at: DateTime<Utc>,
    pub iterations_used: u32,
    pub cost_accumulated: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Who started the run (user id, scheduler, webhook).
    pub triggered_by: String,
    /// Approval request currently suspending this execution, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_approval_id: Option<String>,
}

impl AgentExecution {
    /// Create a fresh `RUNNING` execution.
    pub fn new(
        id: impl Into<String>,
        agent_kind: AgentKind,
        goal: impl Into<String>,
        parameters: Value,
        triggered_by: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            agent_kind,
            goal: goal.into(),
            parameters,
            status: ExecutionStatus::Running,
            started_at: now,
            finished_at: None,
            updated_at: now,
            iterations_used: 0,
            cost_accumulated: 0.0,
            last_error: None,
            triggered_by: triggered_by.into(),
            pending_approval_id: None,
        }
    }

    /// Stamp `updated_at`; call on every mutation before persisting.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// One step inside an execution: exactly one tool invocation or one
/// terminal declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentAction {
    pub execution_id: String,
    /// 1-based iteration index, contiguous and unique per execution.
    pub iteration: u32,
    pub action_type: String,
    /// Opaque input mapping handed to the tool.
    pub input: Value,
    /// Outcome mapping; absent until the action completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Set when the action completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock duration, set when the action completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Cost incurred by this action.
    pub cost: f64,
    pub required_approval: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_request_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AgentAction {
    /// Record the beginning of an action (no outcome yet).
    pub fn begin(
        execution_id: impl Into<String>,
        iteration: u32,
        action_type: impl Into<String>,
        input: Value,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            iteration,
            action_type: action_type.into(),
            input,
            output: None,
            success: None,
            error: None,
            duration_ms: None,
            cost: 0.0,
            required_approval: false,
            approval_request_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Whether the action has completed (its outcome is recorded).
    pub fn is_complete(&self) -> bool {
        self.output.is_some()
    }
}
