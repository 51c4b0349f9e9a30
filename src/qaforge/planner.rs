//! Planning: deciding the next action of an execution.
//!
//! The executor is generic; all strategy lives here. A [`Planner`] looks at
//! the execution so far (goal, parameters, recorded actions with their
//! outcomes) and produces exactly one [`PlannedAction`]: invoke a tool,
//! declare the goal reached, or give up. The LLM-backed implementation
//! routes through the [`LlmGateway`](crate::qaforge::gateway::LlmGateway)
//! and parses the model's JSON plan out of surrounding prose the same
//! brace-scanning way tool calls are parsed elsewhere in this crate.

use crate::qaforge::agents;
use crate::qaforge::execution::{AgentAction, AgentExecution};
use crate::qaforge::gateway::{GatewayRequest, LlmGateway, TaskKind};
use crate::qaforge::tool_protocol::{ErrorKind, ToolRegistry};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

/// The planner's verdict for one iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum PlannedAction {
    /// The goal is achieved; the execution terminates `SUCCEEDED`.
    GoalReached { summary: String },
    /// No path forward; the execution terminates `FAILED`.
    GiveUp { reason: String },
    /// Dispatch one tool invocation.
    Invoke {
        action_type: String,
        parameters: Value,
    },
}

/// A planned action plus the cost of producing it.
#[derive(Debug, Clone)]
pub struct PlannedStep {
    pub action: PlannedAction,
    /// Cost charged for the planning call itself (LLM round-trip).
    pub cost: f64,
}

/// A planning attempt that produced no usable action.
///
/// Carried back to the executor, which records a failed iteration with the
/// machine-readable kind; the next iteration gives the planner another
/// chance until a ceiling terminates the run.
#[derive(Debug, Clone)]
pub struct PlannerFailure {
    pub kind: ErrorKind,
    pub message: String,
    /// Cost still charged for the failed attempt.
    pub cost: f64,
}

impl fmt::Display for PlannerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "planning failed ({}): {}", self.kind, self.message)
    }
}

/// Everything a planner may look at for one decision.
pub struct PlanningSnapshot<'a> {
    pub execution: &'a AgentExecution,
    /// Actions recorded so far, oldest first.
    pub actions: &'a [AgentAction],
    /// Agent-kind directive paragraph (see
    /// [`agents`](crate::qaforge::agents)).
    pub directive: &'a str,
}

/// Decides the next action of an execution.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn next_action(
        &self,
        snapshot: &PlanningSnapshot<'_>,
    ) -> Result<PlannedStep, PlannerFailure>;
}

// ── LLM-backed planner ──────────────────────────────────────────────────

/// Planner that asks the model for a JSON plan each iteration.
pub struct LlmPlanner {
    gateway: Arc<LlmGateway>,
    registry: Arc<RwLock<ToolRegistry>>,
}

impl LlmPlanner {
    pub fn new(gateway: Arc<LlmGateway>, registry: Arc<RwLock<ToolRegistry>>) -> Self {
        Self { gateway, registry }
    }

    async fn build_prompt(&self, snapshot: &PlanningSnapshot<'_>) -> String {
        let mut prompt = String::new();
        prompt.push_str(snapshot.directive);
        prompt.push_str("\n\nGOAL: ");
        prompt.push_str(&snapshot.execution.goal);
        prompt.push('\n');
        if !snapshot.execution.parameters.is_null() {
            prompt.push_str(&format!(
                "PARAMETERS: {}\n",
                snapshot.execution.parameters
            ));
        }

        if snapshot.actions.is_empty() {
            prompt.push_str("\nNo actions taken yet.\n");
        } else {
            prompt.push_str("\nACTIONS SO FAR (oldest first):\n");
            for action in snapshot.actions {
                let outcome = match (action.success, &action.error) {
                    (Some(true), _) => "ok".to_string(),
                    (Some(false), Some(error)) => format!("failed: {}", error),
                    (Some(false), None) => "failed".to_string(),
                    (None, _) => "incomplete".to_string(),
                };
                prompt.push_str(&format!(
                    "{}. {} -> {}\n",
                    action.iteration, action.action_type, outcome
                ));
                if let Some(output) = &action.output {
                    // Outputs can be large; keep the planner prompt bounded.
                    let rendered = output.to_string();
                    let preview: String = rendered.chars().take(600).collect();
                    prompt.push_str(&format!("   output: {}\n", preview));
                }
            }
        }

        prompt.push('\n');
        {
            // Each agent kind only sees its own toolset.
            let allowed = agents::allowed_action_types(snapshot.execution.agent_kind);
            let registry = self.registry.read().await;
            prompt.push_str(&registry.catalog_for(allowed));
        }

        prompt.push_str(
            "\nDecide the single next step. Respond with EXACTLY one JSON object:\n\
             {\"plan\": {\"kind\": \"invoke\", \"action_type\": \"<type>\", \"parameters\": {…}}}\n\
             or {\"plan\": {\"kind\": \"goal_reached\", \"summary\": \"<why>\"}}\n\
             or {\"plan\": {\"kind\": \"give_up\", \"reason\": \"<why>\"}}\n",
        );
        prompt
    }
}

/// Extract the first `{"plan": …}` object from a response, tolerating
/// surrounding prose, and decode it.
pub fn parse_plan(response: &str) -> Option<PlannedAction> {
    let start = response.find("{\"plan\"")?;

    // Brace-count to the matching close so trailing prose is ignored.
    let mut depth = 0usize;
    let mut end = None;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in response[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    end = Some(start + offset + 1);
                    break;
                }
            }
            _ => {}
        }
    }
    let end = end?;

    let parsed: Value = serde_json::from_str(&response[start..end]).ok()?;
    let plan = parsed.get("plan")?;
    match plan.get("kind")?.as_str()? {
        "goal_reached" => Some(PlannedAction::GoalReached {
            summary: plan
                .get("summary")
                .and_then(Value::as_str)
                .unwrap_or("goal reached")
                .to_string(),
        }),
        "give_up" => Some(PlannedAction::GiveUp {
            reason: plan
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("planner gave up")
                .to_string(),
        }),
        "invoke" => {
            let action_type = plan.get("action_type")?.as_str()?.trim().to_string();
            if action_type.is_empty() {
                return None;
            }
            Some(PlannedAction::Invoke {
                action_type,
                parameters: plan
                    .get("parameters")
                    .cloned()
                    .unwrap_or(Value::Object(Default::default())),
            })
        }
        _ => None,
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn next_action(
        &self,
        snapshot: &PlanningSnapshot<'_>,
    ) -> Result<PlannedStep, PlannerFailure> {
        let prompt = self.build_prompt(snapshot).await;
        let request = GatewayRequest::new(
            snapshot.execution.id.clone(),
            TaskKind::Planning,
            prompt,
        )
        .correlated(
            snapshot.execution.id.clone(),
            snapshot.execution.iterations_used + 1,
        );

        let response = self.gateway.generate(request).await;
        let cost = response.cost;

        if !response.success || !response.validation_passed {
            return Err(PlannerFailure {
                kind: response.error_kind.unwrap_or(ErrorKind::ValidationFailed),
                message: response
                    .error
                    .unwrap_or_else(|| "planner call failed".to_string()),
                cost,
            });
        }

        let content = response.content.unwrap_or_default();
        match parse_plan(&content) {
            Some(action) => Ok(PlannedStep { action, cost }),
            None => Err(PlannerFailure {
                kind: ErrorKind::ValidationFailed,
                message: "planner response contained no parseable plan".to_string(),
                cost,
            }),
        }
    }
}

// ── Scripted planner for tests ──────────────────────────────────────────

/// Replays a queue of planned steps; panics are avoided by returning a
/// give-up once exhausted.
pub struct ScriptedPlanner {
    steps: Mutex<VecDeque<Result<PlannedStep, PlannerFailure>>>,
}

impl ScriptedPlanner {
    pub fn new() -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
        }
    }

    /// Queue a successful planned action with zero cost (builder pattern).
    pub fn then(self, action: PlannedAction) -> Self {
        self.then_costing(action, 0.0)
    }

    /// Queue a successful planned action with a cost (builder pattern).
    pub fn then_costing(self, action: PlannedAction, cost: f64) -> Self {
        self.steps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(Ok(PlannedStep { action, cost }));
        self
    }

    /// Queue a planning failure (builder pattern).
    pub fn then_failure(self, failure: PlannerFailure) -> Self {
        self.steps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(Err(failure));
        self
    }
}

impl Default for ScriptedPlanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn next_action(
        &self,
        _snapshot: &PlanningSnapshot<'_>,
    ) -> Result<PlannedStep, PlannerFailure> {
        self.steps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .unwrap_or_else(|| {
                Ok(PlannedStep {
                    action: PlannedAction::GiveUp {
                        reason: "scripted planner exhausted".to_string(),
                    },
                    cost: 0.0,
                })
            })
    }
}
