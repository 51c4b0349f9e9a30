//! The agent executor: plan → act → observe → terminate.
//!
//! One execution is one cooperative task; many run concurrently with no
//! shared mutable state beyond the store, the breaker table, and the
//! gateway's budget ledger. Within an execution everything is serial, and
//! iteration *n* is fully persisted before iteration *n+1* begins.
//!
//! Each loop turn re-checks, in order: pending approval, iteration
//! ceiling, cost ceiling, cancellation. Then the planner is consulted for
//! exactly one [`PlannedAction`]: a terminal verdict (recorded as a final
//! action) or a tool invocation. Invocations that the configuration gates
//! behind approval suspend the execution (`WAITING_FOR_APPROVAL`) instead
//! of dispatching; the decision later resumes the loop with a synthesized
//! outcome (`{success:true, approved:true}` on approval, a failed outcome
//! with kind `approval_rejected` / `approval_expired` otherwise) and the
//! planner takes it from there.
//!
//! The executor never propagates uncaught conditions into the trace: every
//! failure becomes a `{success:false, error:…}` action outcome with a
//! machine-readable kind, persisted like any other.

use crate::qaforge::agents;
use crate::qaforge::approval::{
    ApprovalEngine, ApprovalRequestType, ApprovalStatus, NewApprovalRequest,
};
use crate::qaforge::cancel::CancellationToken;
use crate::qaforge::dispatcher::ToolDispatcher;
use crate::qaforge::event::{EventHandler, ExecutionEvent};
use crate::qaforge::execution::{AgentAction, AgentExecution, AgentKind, ExecutionStatus};
use crate::qaforge::gateway::LlmGateway;
use crate::qaforge::intent;
use crate::qaforge::planner::{PlannedAction, Planner, PlanningSnapshot};
use crate::qaforge::store::{ExecutionStore, StoreError};
use crate::qaforge::tool_protocol::{ErrorKind, ToolOutcome};
use chrono::Utc;
use futures_util::future::join_all;
use serde_json::Value;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Dispatch attempts per action (retry wrapper setting).
const DISPATCH_MAX_ATTEMPTS: u32 = 3;

/// Per-execution configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Hard iteration ceiling.
    pub max_iterations: u32,
    /// Cost ceiling in abstract cost units; advisory before each planner
    /// call, so one in-flight call may overshoot by its own cost.
    pub max_cost: f64,
    /// Action types always gated behind approval.
    pub actions_always_requiring_approval: Vec<String>,
    /// Action types never gated; wins over the always-list on conflict.
    pub actions_never_requiring_approval: Vec<String>,
    pub approval_timeout: Duration,
    /// Opaque agent-kind specifics (e.g. `stability_check_runs`).
    pub custom_config: Value,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            max_cost: 1.0,
            // Gated action types must match what the registry actually
            // exposes: `git_workflow` is the one combined branch/commit/PR
            // capability, so repo mutations are always human-gated.
            actions_always_requiring_approval: vec![
                "git_workflow".to_string(),
                "request_approval".to_string(),
            ],
            actions_never_requiring_approval: vec![
                "fetch_story".to_string(),
                "query_element_registry".to_string(),
                "read_file".to_string(),
            ],
            approval_timeout: Duration::from_secs(3600),
            custom_config: Value::Object(Default::default()),
        }
    }
}

impl ExecutorConfig {
    /// Whether an action type must pause for human approval. The
    /// never-list wins over the always-list.
    pub fn requires_approval(&self, action_type: &str) -> bool {
        if self
            .actions_never_requiring_approval
            .iter()
            .any(|a| a == action_type)
        {
            return false;
        }
        self.actions_always_requiring_approval
            .iter()
            .any(|a| a == action_type)
    }
}

/// Parameters for starting a new execution.
#[derive(Debug, Clone)]
pub struct StartAgentRequest {
    pub agent_kind: AgentKind,
    pub goal: String,
    pub parameters: Value,
    pub triggered_by: String,
    pub max_iterations: Option<u32>,
    pub max_cost: Option<f64>,
    pub approval_timeout: Option<Duration>,
}

impl StartAgentRequest {
    pub fn new(agent_kind: AgentKind, goal: impl Into<String>, parameters: Value) -> Self {
        Self {
            agent_kind,
            goal: goal.into(),
            parameters,
            triggered_by: "api".to_string(),
            max_iterations: None,
            max_cost: None,
            approval_timeout: None,
        }
    }

    /// Set who triggered the run (builder pattern).
    pub fn triggered_by(mut self, who: impl Into<String>) -> Self {
        self.triggered_by = who.into();
        self
    }

    /// Override the iteration ceiling (builder pattern).
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    /// Override the cost ceiling (builder pattern).
    pub fn with_max_cost(mut self, max_cost: f64) -> Self {
        self.max_cost = Some(max_cost);
        self
    }
}

/// Errors surfaced by executor entry points. Failures *inside* the loop
/// never reach here — they are persisted as action outcomes instead.
#[derive(Debug)]
pub enum ExecutorError {
    ExecutionNotFound(String),
    Store(StoreError),
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutorError::ExecutionNotFound(id) => write!(f, "execution '{}' not found", id),
            ExecutorError::Store(err) => write!(f, "store failure: {}", err),
        }
    }
}

impl Error for ExecutorError {}

impl From<StoreError> for ExecutorError {
    fn from(err: StoreError) -> Self {
        ExecutorError::Store(err)
    }
}

/// The executor. Shared via `Arc`; each call to [`run`](AgentExecutor::run)
/// drives one execution to a terminal status.
pub struct AgentExecutor {
    store: Arc<dyn ExecutionStore>,
    dispatcher: Arc<ToolDispatcher>,
    approvals: Arc<ApprovalEngine>,
    planner: Arc<dyn Planner>,
    gateway: Option<Arc<LlmGateway>>,
    events: Option<Arc<dyn EventHandler>>,
    default_config: ExecutorConfig,
    configs: Mutex<HashMap<String, ExecutorConfig>>,
    cancellations: Mutex<HashMap<String, CancellationToken>>,
}

impl AgentExecutor {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        dispatcher: Arc<ToolDispatcher>,
        approvals: Arc<ApprovalEngine>,
        planner: Arc<dyn Planner>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            approvals,
            planner,
            gateway: None,
            events: None,
            default_config: ExecutorConfig::default(),
            configs: Mutex::new(HashMap::new()),
            cancellations: Mutex::new(HashMap::new()),
        }
    }

    /// Attach the gateway so each execution's budget is registered with the
    /// ledger (builder pattern).
    pub fn with_gateway(mut self, gateway: Arc<LlmGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Attach an event handler (builder pattern).
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.events = Some(handler);
        self
    }

    /// Replace the default per-execution configuration (builder pattern).
    pub fn with_default_config(mut self, config: ExecutorConfig) -> Self {
        self.default_config = config;
        self
    }

    async fn emit(&self, event: ExecutionEvent) {
        if let Some(handler) = &self.events {
            handler.on_execution_event(&event).await;
        }
    }

    /// Create and persist a new `RUNNING` execution without running it.
    pub async fn create(&self, request: StartAgentRequest) -> Result<AgentExecution, ExecutorError> {
        let mut config = self.default_config.clone();
        if let Some(max_iterations) = request.max_iterations {
            config.max_iterations = max_iterations;
        }
        if let Some(max_cost) = request.max_cost {
            config.max_cost = max_cost;
        }
        if let Some(timeout) = request.approval_timeout {
            config.approval_timeout = timeout;
        }
        if let Some(custom) = request.parameters.get("custom_config") {
            config.custom_config = custom.clone();
        }

        let execution = AgentExecution::new(
            Uuid::new_v4().to_string(),
            request.agent_kind,
            request.goal,
            request.parameters,
            request.triggered_by,
        );
        self.store.persist_execution(&execution).await?;
        self.configs
            .lock()
            .await
            .insert(execution.id.clone(), config);
        self.cancellations
            .lock()
            .await
            .insert(execution.id.clone(), CancellationToken::new());
        Ok(execution)
    }

    /// Create an execution and drive it to completion on a spawned task.
    /// Returns the execution id and initial status immediately.
    pub async fn start(
        self: Arc<Self>,
        request: StartAgentRequest,
    ) -> Result<(String, ExecutionStatus), ExecutorError> {
        let execution = self.create(request).await?;
        let id = execution.id.clone();
        let status = execution.status;
        let executor = Arc::clone(&self);
        let spawn_id = id.clone();
        tokio::spawn(async move {
            if let Err(err) = executor.run(&spawn_id).await {
                log::error!("execution {} aborted: {}", spawn_id, err);
            }
        });
        Ok((id, status))
    }

    /// Query one execution with its ordered actions.
    pub async fn query(
        &self,
        execution_id: &str,
    ) -> Result<(AgentExecution, Vec<AgentAction>), ExecutorError> {
        let execution = self
            .store
            .load_execution(execution_id)
            .await?
            .ok_or_else(|| ExecutorError::ExecutionNotFound(execution_id.to_string()))?;
        let actions = self.store.list_actions(execution_id).await?;
        Ok((execution, actions))
    }

    /// Request cancellation. Idempotent; racing a natural termination
    /// resolves to whichever terminal state landed first.
    pub async fn stop(&self, execution_id: &str) {
        let token = {
            let mut cancellations = self.cancellations.lock().await;
            cancellations
                .entry(execution_id.to_string())
                .or_insert_with(CancellationToken::new)
                .clone()
        };
        token.cancel();
    }

    async fn cancellation_for(&self, execution_id: &str) -> CancellationToken {
        self.cancellations
            .lock()
            .await
            .entry(execution_id.to_string())
            .or_insert_with(CancellationToken::new)
            .clone()
    }

    async fn config_for(&self, execution_id: &str) -> ExecutorConfig {
        self.configs
            .lock()
            .await
            .get(execution_id)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone())
    }

    /// Drive one execution to a terminal status, resuming from whatever
    /// state the store holds (including a pending approval).
    pub async fn run(&self, execution_id: &str) -> Result<AgentExecution, ExecutorError> {
        let mut execution = self
            .store
            .load_execution(execution_id)
            .await?
            .ok_or_else(|| ExecutorError::ExecutionNotFound(execution_id.to_string()))?;
        let config = self.config_for(execution_id).await;
        let cancel = self.cancellation_for(execution_id).await;
        let directive = agents::directive(execution.agent_kind, &config.custom_config);

        if let Some(gateway) = &self.gateway {
            gateway.set_budget(&execution.id, config.max_cost).await;
        }

        self.emit(ExecutionEvent::ExecutionStarted {
            execution_id: execution.id.clone(),
            agent_kind: execution.agent_kind.label().to_string(),
            goal: execution.goal.clone(),
        })
        .await;

        while !execution.status.is_terminal() {
            if execution.status == ExecutionStatus::WaitingForApproval {
                self.handle_approval_wait(&mut execution, &cancel).await?;
                continue;
            }

            if execution.iterations_used >= config.max_iterations {
                self.terminate(&mut execution, ExecutionStatus::Timeout, Some("iteration ceiling reached"))
                    .await?;
                break;
            }
            if execution.cost_accumulated >= config.max_cost {
                self.terminate(
                    &mut execution,
                    ExecutionStatus::BudgetExceeded,
                    Some("cost ceiling reached"),
                )
                .await?;
                break;
            }
            if cancel.is_cancelled() {
                self.terminate(&mut execution, ExecutionStatus::Stopped, Some("cancelled"))
                    .await?;
                break;
            }

            let iteration = execution.iterations_used + 1;
            self.emit(ExecutionEvent::PlannerInvoked {
                execution_id: execution.id.clone(),
                iteration,
            })
            .await;

            let actions = self.store.list_actions(&execution.id).await?;
            let snapshot = PlanningSnapshot {
                execution: &execution,
                actions: &actions,
                directive: &directive,
            };

            let planned = self.planner.next_action(&snapshot).await;
            match planned {
                Err(failure) => {
                    let outcome = ToolOutcome::failure(failure.kind, failure.message.clone())
                        .with_cost(failure.cost);
                    self.record_completed(
                        &mut execution,
                        iteration,
                        "plan",
                        Value::Object(Default::default()),
                        outcome,
                        failure.cost,
                    )
                    .await?;
                }
                Ok(step) => match step.action {
                    PlannedAction::GoalReached { summary } => {
                        let outcome = ToolOutcome::success()
                            .with_field("summary", Value::String(summary))
                            .with_cost(step.cost);
                        self.record_completed(
                            &mut execution,
                            iteration,
                            "goal_reached",
                            Value::Object(Default::default()),
                            outcome,
                            step.cost,
                        )
                        .await?;
                        self.terminate(&mut execution, ExecutionStatus::Succeeded, None)
                            .await?;
                    }
                    PlannedAction::GiveUp { reason } => {
                        let outcome = ToolOutcome::failure(ErrorKind::ToolError, reason.clone())
                            .with_cost(step.cost);
                        self.record_completed(
                            &mut execution,
                            iteration,
                            "give_up",
                            Value::Object(Default::default()),
                            outcome,
                            step.cost,
                        )
                        .await?;
                        self.terminate(&mut execution, ExecutionStatus::Failed, Some(reason.as_str()))
                            .await?;
                    }
                    PlannedAction::Invoke {
                        action_type,
                        parameters,
                    } => {
                        // Specialization is enforced, not just prompted: an
                        // action type outside this agent kind's set is a
                        // planner bug, recorded and never dispatched.
                        let allowed = agents::allowed_action_types(execution.agent_kind);
                        if !allowed.contains(&action_type.as_str()) {
                            let outcome = ToolOutcome::failure(
                                ErrorKind::InvalidParameters,
                                format!(
                                    "action type '{}' is not exposed to the {} agent",
                                    action_type,
                                    execution.agent_kind.label()
                                ),
                            )
                            .with_cost(step.cost);
                            self.record_completed(
                                &mut execution,
                                iteration,
                                &action_type,
                                parameters,
                                outcome,
                                step.cost,
                            )
                            .await?;
                        } else if config.requires_approval(&action_type) {
                            self.suspend_for_approval(
                                &mut execution,
                                iteration,
                                &action_type,
                                parameters,
                                step.cost,
                            )
                            .await?;
                        } else {
                            self.dispatch_action(
                                &mut execution,
                                iteration,
                                &action_type,
                                parameters,
                                step.cost,
                                &cancel,
                            )
                            .await?;
                        }
                    }
                },
            }
        }

        self.emit(ExecutionEvent::ExecutionFinished {
            execution_id: execution.id.clone(),
            status: execution.status.label().to_string(),
            iterations_used: execution.iterations_used,
            cost_accumulated: execution.cost_accumulated,
        })
        .await;
        Ok(execution)
    }

    /// Run many executions concurrently. Each execution remains its own
    /// serial unit of work; across executions no ordering is guaranteed.
    pub async fn run_all(
        &self,
        execution_ids: Vec<String>,
    ) -> Vec<Result<AgentExecution, ExecutorError>> {
        join_all(
            execution_ids
                .iter()
                .map(|id| self.run(id)),
        )
        .await
    }

    // ── Loop internals ──────────────────────────────────────────────────

    /// Persist a begun-and-completed action in one step and charge its cost.
    async fn record_completed(
        &self,
        execution: &mut AgentExecution,
        iteration: u32,
        action_type: &str,
        input: Value,
        outcome: ToolOutcome,
        cost: f64,
    ) -> Result<(), ExecutorError> {
        let mut action = AgentAction::begin(&execution.id, iteration, action_type, input);
        self.store.append_action(&action).await?;

        action.success = Some(outcome.success);
        action.error = outcome.error.clone();
        action.cost = cost;
        action.duration_ms = Some(0);
        let error_kind = outcome.error_kind;
        action.output =
            Some(serde_json::to_value(&outcome).unwrap_or_else(|_| Value::Object(Default::default())));
        self.store.complete_action(&action).await?;

        execution.iterations_used = iteration;
        execution.cost_accumulated += cost;
        if !outcome.success {
            execution.last_error = outcome.error;
        }
        execution.touch();
        self.store.persist_execution(execution).await?;

        self.emit(ExecutionEvent::ActionCompleted {
            execution_id: execution.id.clone(),
            iteration,
            action_type: action_type.to_string(),
            success: outcome.success,
            error_kind: error_kind.map(|kind| kind.to_string()),
            cost,
        })
        .await;
        Ok(())
    }

    /// Record the action, dispatch it through the retry wrapper, and
    /// persist the outcome.
    async fn dispatch_action(
        &self,
        execution: &mut AgentExecution,
        iteration: u32,
        action_type: &str,
        parameters: Value,
        planning_cost: f64,
        cancel: &CancellationToken,
    ) -> Result<(), ExecutorError> {
        let mut action =
            AgentAction::begin(&execution.id, iteration, action_type, parameters.clone());
        self.store.append_action(&action).await?;
        self.emit(ExecutionEvent::ActionStarted {
            execution_id: execution.id.clone(),
            iteration,
            action_type: action_type.to_string(),
        })
        .await;

        let started = Instant::now();
        let outcome = self
            .dispatcher
            .dispatch_with_retry(action_type, parameters, DISPATCH_MAX_ATTEMPTS, cancel)
            .await;
        let duration = started.elapsed();

        let total_cost = planning_cost + outcome.cost;
        action.success = Some(outcome.success);
        action.error = outcome.error.clone();
        action.duration_ms = Some(duration.as_millis() as u64);
        action.cost = total_cost;
        action.output =
            Some(serde_json::to_value(&outcome).unwrap_or_else(|_| Value::Object(Default::default())));
        self.store.complete_action(&action).await?;

        execution.iterations_used = iteration;
        execution.cost_accumulated += total_cost;
        if !outcome.success {
            execution.last_error = outcome.error.clone();
        }
        execution.touch();
        self.store.persist_execution(execution).await?;

        self.emit(ExecutionEvent::ActionCompleted {
            execution_id: execution.id.clone(),
            iteration,
            action_type: action_type.to_string(),
            success: outcome.success,
            error_kind: outcome.error_kind.map(|kind| kind.to_string()),
            cost: total_cost,
        })
        .await;

        // Cancellation inside the dispatch terminates the run; everything
        // else (including circuit-open) goes back to the planner.
        if outcome.error_kind == Some(ErrorKind::Cancelled) {
            self.terminate(execution, ExecutionStatus::Stopped, Some("cancelled"))
                .await?;
        }
        Ok(())
    }

    /// Record the gated action, create the approval request, and suspend.
    async fn suspend_for_approval(
        &self,
        execution: &mut AgentExecution,
        iteration: u32,
        action_type: &str,
        parameters: Value,
        planning_cost: f64,
    ) -> Result<(), ExecutorError> {
        let request_type = approval_type_for(execution.agent_kind, &parameters);
        let content = parameters
            .get("content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| parameters.to_string());
        let request = self
            .approvals
            .create(NewApprovalRequest {
                request_type,
                content,
                requester: execution.id.clone(),
                auto_execute_on_approval: parameters
                    .get("auto_execute_on_approval")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                target_file_path: parameters
                    .get("path")
                    .or_else(|| parameters.get("target_file_path"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                git_branch_hint: parameters
                    .get("branch")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                execution_id: Some(execution.id.clone()),
                timeout: Some(self.config_for(&execution.id).await.approval_timeout),
            })
            .await;

        let mut action = AgentAction::begin(&execution.id, iteration, action_type, parameters);
        action.required_approval = true;
        action.approval_request_id = Some(request.id.clone());
        action.cost = planning_cost;
        self.store.append_action(&action).await?;

        execution.iterations_used = iteration;
        execution.cost_accumulated += planning_cost;
        execution.pending_approval_id = Some(request.id.clone());
        execution.status = ExecutionStatus::WaitingForApproval;
        execution.touch();
        self.store.persist_execution(execution).await?;

        self.emit(ExecutionEvent::ApprovalRequested {
            execution_id: execution.id.clone(),
            request_id: request.id.clone(),
            request_type: request.request_type.label().to_string(),
        })
        .await;
        Ok(())
    }

    /// Block on the pending approval, then fold the decision back into the
    /// suspended action as a synthesized outcome.
    async fn handle_approval_wait(
        &self,
        execution: &mut AgentExecution,
        cancel: &CancellationToken,
    ) -> Result<(), ExecutorError> {
        let approval_id = match execution.pending_approval_id.clone() {
            Some(id) => id,
            None => {
                // Inconsistent state (approval id lost); resume running
                // rather than wedging the execution.
                log::warn!(
                    "execution {} waiting without a pending approval id; resuming",
                    execution.id
                );
                execution.status = ExecutionStatus::Running;
                execution.touch();
                self.store.persist_execution(execution).await?;
                return Ok(());
            }
        };

        enum Wait {
            Decided(ApprovalStatus),
            CancelledExternally,
        }

        let wait = tokio::select! {
            decided = self.approvals.await_decision(&approval_id) => match decided {
                Ok(status) => Wait::Decided(status),
                Err(err) => {
                    // The request vanished from the engine; nothing can
                    // decide it anymore, so treat it as expired.
                    log::warn!("approval {} unavailable: {}", approval_id, err);
                    Wait::Decided(ApprovalStatus::Expired)
                }
            },
            _ = cancel.cancelled() => {
                // Cancellation during the wait: cancel the request (the
                // executor is its requester) and stop.
                if let Err(err) = self.approvals.cancel(&approval_id, &execution.id).await {
                    log::debug!("cancel of approval {} raced: {}", approval_id, err);
                }
                Wait::CancelledExternally
            }
        };

        let status = match wait {
            Wait::Decided(status) => status,
            Wait::CancelledExternally => {
                self.complete_suspended_action(
                    execution,
                    ToolOutcome::failure(ErrorKind::Cancelled, "execution cancelled"),
                )
                .await?;
                execution.pending_approval_id = None;
                self.terminate(execution, ExecutionStatus::Stopped, Some("cancelled"))
                    .await?;
                return Ok(());
            }
        };

        self.emit(ExecutionEvent::ApprovalDecided {
            execution_id: execution.id.clone(),
            request_id: approval_id.clone(),
            status: status.label().to_string(),
        })
        .await;

        match status {
            ApprovalStatus::Approved => {
                let mut outcome =
                    ToolOutcome::success().with_field("approved", Value::Bool(true));
                if let Some(request) = self.approvals.get(&approval_id).await {
                    match self.approvals.apply_decision_effects(&request).await {
                        Ok(written) => {
                            if !written.is_empty() {
                                outcome = outcome.with_field(
                                    "materialized",
                                    Value::Array(
                                        written
                                            .iter()
                                            .map(|p| Value::String(p.display().to_string()))
                                            .collect(),
                                    ),
                                );
                            }
                        }
                        Err(err) => {
                            log::error!(
                                "post-approval effects for {} failed: {}",
                                approval_id,
                                err
                            );
                            outcome = outcome
                                .with_field("effects_error", Value::String(err.to_string()));
                        }
                    }

                    if request.auto_execute_on_approval {
                        match intent::parse_lenient(&request.content) {
                            Ok((parsed, _)) => {
                                let run = self
                                    .dispatcher
                                    .dispatch(
                                        "execute_test",
                                        serde_json::json!({ "intent": parsed }),
                                    )
                                    .await;
                                outcome = outcome.with_field(
                                    "auto_execute",
                                    serde_json::to_value(&run).unwrap_or(Value::Null),
                                );
                            }
                            Err(err) => {
                                log::debug!(
                                    "auto-execute skipped for {}: content is not an intent ({})",
                                    approval_id,
                                    err
                                );
                            }
                        }
                    }
                }
                self.complete_suspended_action(execution, outcome).await?;
                execution.pending_approval_id = None;
                execution.status = ExecutionStatus::Running;
                execution.touch();
                self.store.persist_execution(execution).await?;
            }
            ApprovalStatus::Rejected | ApprovalStatus::Expired => {
                let kind = if status == ApprovalStatus::Rejected {
                    ErrorKind::ApprovalRejected
                } else {
                    ErrorKind::ApprovalExpired
                };
                let reason = self
                    .approvals
                    .get(&approval_id)
                    .await
                    .and_then(|request| request.decision_notes)
                    .unwrap_or_else(|| format!("approval {}", status.label().to_lowercase()));
                self.complete_suspended_action(
                    execution,
                    ToolOutcome::failure(kind, reason.clone()),
                )
                .await?;
                execution.pending_approval_id = None;
                execution.status = ExecutionStatus::Running;
                execution.last_error = Some(reason);
                execution.touch();
                self.store.persist_execution(execution).await?;
            }
            ApprovalStatus::Cancelled => {
                self.complete_suspended_action(
                    execution,
                    ToolOutcome::failure(ErrorKind::Cancelled, "approval cancelled"),
                )
                .await?;
                execution.pending_approval_id = None;
                self.terminate(execution, ExecutionStatus::Stopped, Some("approval cancelled"))
                    .await?;
            }
            ApprovalStatus::Pending => {
                // await_decision never returns Pending; defensive no-op.
            }
        }
        Ok(())
    }

    /// Fold a synthesized outcome into the action suspended at the current
    /// iteration.
    async fn complete_suspended_action(
        &self,
        execution: &AgentExecution,
        outcome: ToolOutcome,
    ) -> Result<(), ExecutorError> {
        let actions = self.store.list_actions(&execution.id).await?;
        let suspended = actions
            .into_iter()
            .find(|action| action.iteration == execution.iterations_used && !action.is_complete());
        let mut action = match suspended {
            Some(action) => action,
            None => {
                log::warn!(
                    "execution {} has no suspended action at iteration {}",
                    execution.id,
                    execution.iterations_used
                );
                return Ok(());
            }
        };
        action.success = Some(outcome.success);
        action.error = outcome.error.clone();
        action.duration_ms = Some(0);
        action.output =
            Some(serde_json::to_value(&outcome).unwrap_or_else(|_| Value::Object(Default::default())));
        self.store.complete_action(&action).await?;
        Ok(())
    }

    async fn terminate(
        &self,
        execution: &mut AgentExecution,
        status: ExecutionStatus,
        error: Option<&str>,
    ) -> Result<(), ExecutorError> {
        execution.status = status;
        execution.finished_at = Some(Utc::now());
        if let Some(error) = error {
            if status != ExecutionStatus::Succeeded {
                execution.last_error = Some(error.to_string());
            }
        }
        execution.touch();
        self.store.persist_execution(execution).await?;
        log::info!(
            "execution {} terminated {} after {} iteration(s), cost {:.4}",
            execution.id,
            status.label(),
            execution.iterations_used,
            execution.cost_accumulated
        );
        Ok(())
    }
}

/// Choose the approval request type for a gated action: an explicit
/// `approval_type` parameter wins, then a `manual: true` hint, then the
/// agent kind's default.
fn approval_type_for(kind: AgentKind, parameters: &Value) -> ApprovalRequestType {
    if let Some(label) = parameters.get("approval_type").and_then(Value::as_str) {
        match label {
            "TEST_GENERATION" => return ApprovalRequestType::TestGeneration,
            "SELF_HEALING_FIX" => return ApprovalRequestType::SelfHealingFix,
            "SELF_HEALING_MANUAL" => return ApprovalRequestType::SelfHealingManual,
            "FLAKY_FIX" => return ApprovalRequestType::FlakyFix,
            "FLAKY_MANUAL" => return ApprovalRequestType::FlakyManual,
            other => log::warn!("unknown approval_type '{}', using kind default", other),
        }
    }
    let manual = parameters
        .get("manual")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    match (kind, manual) {
        (AgentKind::TestGenerator, _) => ApprovalRequestType::TestGeneration,
        (AgentKind::SelfHealingFixer, false) => ApprovalRequestType::SelfHealingFix,
        (AgentKind::SelfHealingFixer, true) => ApprovalRequestType::SelfHealingManual,
        (AgentKind::FlakyFixer, false) => ApprovalRequestType::FlakyFix,
        (AgentKind::FlakyFixer, true) => ApprovalRequestType::FlakyManual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_list_wins_over_always_list() {
        let mut config = ExecutorConfig::default();
        config
            .actions_always_requiring_approval
            .push("fetch_story".to_string());
        // fetch_story is in the default never-list.
        assert!(!config.requires_approval("fetch_story"));
        assert!(!config.requires_approval("capture_page_html"));
    }

    #[test]
    fn repo_mutations_are_gated_by_default() {
        let config = ExecutorConfig::default();
        assert!(config.requires_approval("git_workflow"));
        assert!(config.requires_approval("request_approval"));
        assert!(!config.requires_approval("execute_test"));
    }

    #[test]
    fn approval_type_prefers_explicit_then_manual_then_kind() {
        let explicit = serde_json::json!({"approval_type": "FLAKY_MANUAL"});
        assert_eq!(
            approval_type_for(AgentKind::TestGenerator, &explicit),
            ApprovalRequestType::FlakyManual
        );
        let manual = serde_json::json!({"manual": true});
        assert_eq!(
            approval_type_for(AgentKind::SelfHealingFixer, &manual),
            ApprovalRequestType::SelfHealingManual
        );
        assert_eq!(
            approval_type_for(AgentKind::FlakyFixer, &serde_json::json!({})),
            ApprovalRequestType::FlakyFix
        );
    }
}
