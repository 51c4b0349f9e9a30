//! Tool protocol abstraction layer.
//!
//! Agents act on the world exclusively through *tools*: registered
//! capabilities addressed by an action-type string. This module provides the
//! pieces every tool interaction is built from:
//!
//! - **[`Tool`] trait**: one capability — an action type, a parameter schema,
//!   and an async execute function.
//! - **[`ToolParameter`]**: type-safe parameter definitions used both for
//!   validation and for prompt catalogs.
//! - **[`ToolOutcome`]**: the uniform result mapping returned by every
//!   dispatch (`success`, optional `error` + machine-readable kind, and
//!   tool-specific payload fields).
//! - **[`ToolRegistry`]**: the process-wide action-type → tool map with
//!   replace-and-warn registration, prefix-based categorization, and a
//!   formatted [`catalog`](ToolRegistry::catalog) for planner prompts.
//!
//! The registry has no knowledge of which collaborator a tool wraps; a new
//! external service is integrated by registering new tools, never by
//! touching the dispatcher or executor.
//!
//! # Example
//!
//! ```rust
//! use qaforge::tool_protocol::{ToolParameter, ToolParameterType};
//!
//! let param = ToolParameter::new("story_key", ToolParameterType::String)
//!     .with_description("Issue key, e.g. SCRUM-7")
//!     .required();
//! assert!(param.required);
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Machine-readable classification of a failure, carried on every failed
/// [`ToolOutcome`] and persisted with the action that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The LLM gateway's rate limiter denied the call.
    RateLimited,
    /// The sanitizer or output validator blocked the content.
    BlockedByPolicy,
    /// LLM output failed structural validation.
    ValidationFailed,
    /// Parameters did not satisfy the tool's schema.
    InvalidParameters,
    /// The tool's circuit is open; the tool was not invoked.
    CircuitOpen,
    /// The tool itself failed.
    ToolError,
    /// A human rejected the gating approval request.
    ApprovalRejected,
    /// The gating approval request expired undecided.
    ApprovalExpired,
    /// The execution's cost ceiling was reached.
    BudgetExceeded,
    /// The execution's iteration ceiling was reached.
    IterationExceeded,
    /// The execution was cancelled externally.
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::BlockedByPolicy => "blocked_by_policy",
            ErrorKind::ValidationFailed => "validation_failed",
            ErrorKind::InvalidParameters => "invalid_parameters",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::ToolError => "tool_error",
            ErrorKind::ApprovalRejected => "approval_rejected",
            ErrorKind::ApprovalExpired => "approval_expired",
            ErrorKind::BudgetExceeded => "budget_exceeded",
            ErrorKind::IterationExceeded => "iteration_exceeded",
            ErrorKind::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Result mapping produced by a tool invocation (or synthesized by the
/// dispatcher / executor on its behalf).
///
/// At minimum the mapping carries `success`; failures additionally carry an
/// `error` message and an [`ErrorKind`]. Tool-specific payload fields live
/// in [`data`](ToolOutcome::data) and are flattened on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    /// Whether the invocation succeeded.
    pub success: bool,
    /// Human-readable error message when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Machine-readable error classification when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Set by the dispatcher when the circuit breaker rejected the call.
    #[serde(default, skip_serializing_if = "is_false")]
    pub circuit_open: bool,
    /// Cost incurred by this invocation, in abstract cost units.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub cost: f64,
    /// Tool-specific payload fields, flattened into the outcome mapping.
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn is_zero(v: &f64) -> bool {
    *v == 0.0
}

impl ToolOutcome {
    /// Successful outcome with no payload.
    pub fn success() -> Self {
        Self {
            success: true,
            error: None,
            error_kind: None,
            circuit_open: false,
            cost: 0.0,
            data: Map::new(),
        }
    }

    /// Failed outcome with a message and kind.
    pub fn failure(kind: ErrorKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            error_kind: Some(kind),
            circuit_open: false,
            cost: 0.0,
            data: Map::new(),
        }
    }

    /// Attach a payload field (builder pattern).
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Attach the cost incurred by this invocation (builder pattern).
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    /// Borrow a payload field by name.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}

/// Declared type of a tool parameter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ToolParameterType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            ToolParameterType::String => value.is_string(),
            ToolParameterType::Number => value.is_number(),
            ToolParameterType::Integer => value.is_i64() || value.is_u64(),
            ToolParameterType::Boolean => value.is_boolean(),
            ToolParameterType::Array => value.is_array(),
            ToolParameterType::Object => value.is_object(),
        }
    }
}

/// Defines one parameter a tool accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ToolParameterType,
    pub description: Option<String>,
    pub required: bool,
}

impl ToolParameter {
    /// Define a new parameter with the provided name and type.
    pub fn new(name: impl Into<String>, param_type: ToolParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: None,
            required: false,
        }
    }

    /// Add a human readable description that surfaces in the prompt catalog.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark the parameter as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Errors raised by registry operations and parameter validation.
#[derive(Debug, Clone)]
pub enum ToolError {
    /// No tool is registered for the requested action type.
    NotFound(String),
    /// The provided JSON parameters failed schema validation.
    InvalidParameters(String),
    /// Tool execution completed with an application-level failure.
    ExecutionFailed(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::NotFound(action) => write!(f, "no tool registered for '{}'", action),
            ToolError::InvalidParameters(msg) => write!(f, "invalid parameters: {}", msg),
            ToolError::ExecutionFailed(msg) => write!(f, "tool execution failed: {}", msg),
        }
    }
}

impl Error for ToolError {}

/// A registered capability bound to an action type.
///
/// A tool is a capability set — one pure execute function plus a schema
/// description — not a node in a class hierarchy. Implementations wrap a
/// collaborator (issue tracker, browser driver, git host) but the registry
/// and dispatcher never know which.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique action-type key this tool handles (e.g. `"fetch_story"`).
    fn action_type(&self) -> &str;

    /// Display name for catalogs and UI listings.
    fn name(&self) -> &str;

    /// One-paragraph description surfaced to the planner.
    fn description(&self) -> &str;

    /// Declared parameter schema.
    fn parameters(&self) -> Vec<ToolParameter>;

    /// Execute the tool with validated parameters.
    ///
    /// Raised errors are translated by the dispatcher into failed outcomes;
    /// tools that perform exploratory work should instead return
    /// `success=true` with a sentinel payload so the planner keeps moving.
    async fn execute(&self, params: Value) -> Result<ToolOutcome, Box<dyn Error + Send + Sync>>;

    /// Schema-aware parameter check. The default implementation enforces
    /// presence of required parameters and rough JSON type agreement.
    fn validate_params(&self, params: &Value) -> Result<(), ToolError> {
        let object = match params {
            Value::Object(map) => map,
            Value::Null => {
                let missing: Vec<String> = self
                    .parameters()
                    .into_iter()
                    .filter(|p| p.required)
                    .map(|p| p.name)
                    .collect();
                if missing.is_empty() {
                    return Ok(());
                }
                return Err(ToolError::InvalidParameters(format!(
                    "missing required parameters: {}",
                    missing.join(", ")
                )));
            }
            other => {
                return Err(ToolError::InvalidParameters(format!(
                    "parameters must be a JSON object, got {}",
                    json_type_name(other)
                )))
            }
        };

        for param in self.parameters() {
            match object.get(&param.name) {
                Some(value) => {
                    if !value.is_null() && !param.param_type.matches(value) {
                        return Err(ToolError::InvalidParameters(format!(
                            "parameter '{}' expects {:?}, got {}",
                            param.name,
                            param.param_type,
                            json_type_name(value)
                        )));
                    }
                }
                None if param.required => {
                    return Err(ToolError::InvalidParameters(format!(
                        "missing required parameter '{}'",
                        param.name
                    )));
                }
                None => {}
            }
        }
        Ok(())
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Coarse grouping of tools for UI listings, derived purely from the
/// action-type name prefix. The mapping is syntactic, not semantic; a tool
/// may be re-categorized without any behavior change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ToolCategory {
    DataRetrieval,
    AiOperations,
    GitOperations,
    TestExecution,
    FileOperations,
    ApprovalWorkflow,
    IssueTracker,
    Other,
}

impl ToolCategory {
    /// Categorize an action type by its name prefix.
    pub fn of(action_type: &str) -> Self {
        if action_type == "fetch_story" {
            return ToolCategory::IssueTracker;
        }
        if action_type.starts_with("request_approval") {
            return ToolCategory::ApprovalWorkflow;
        }
        if action_type.starts_with("git_")
            || action_type.starts_with("create_branch")
            || action_type.starts_with("commit")
            || action_type.starts_with("open_pr")
            || action_type.starts_with("merge_pr")
        {
            return ToolCategory::GitOperations;
        }
        if action_type.starts_with("execute_") || action_type.starts_with("run_") {
            return ToolCategory::TestExecution;
        }
        if action_type.starts_with("write_")
            || action_type.starts_with("delete_")
            || action_type.ends_with("_file")
        {
            return ToolCategory::FileOperations;
        }
        if action_type.starts_with("generate_")
            || action_type.starts_with("analyze_")
            || action_type.starts_with("discover_")
            || action_type.starts_with("extract_")
        {
            return ToolCategory::AiOperations;
        }
        if action_type.starts_with("fetch_")
            || action_type.starts_with("query_")
            || action_type.starts_with("capture_")
            || action_type.starts_with("read_")
        {
            return ToolCategory::DataRetrieval;
        }
        ToolCategory::Other
    }

    /// Stable display label.
    pub fn label(&self) -> &'static str {
        match self {
            ToolCategory::DataRetrieval => "Data retrieval",
            ToolCategory::AiOperations => "AI operations",
            ToolCategory::GitOperations => "Git operations",
            ToolCategory::TestExecution => "Test execution",
            ToolCategory::FileOperations => "File operations",
            ToolCategory::ApprovalWorkflow => "Approval workflow",
            ToolCategory::IssueTracker => "Issue tracker",
            ToolCategory::Other => "Other",
        }
    }
}

/// Registry mapping action types to tools.
///
/// Read-mostly after startup: executions share it behind an `Arc` and only
/// look tools up. Re-registering an action type replaces the earlier tool
/// and logs a warning.
///
/// # Example
///
/// ```rust,no_run
/// use qaforge::tool_protocol::ToolRegistry;
///
/// let registry = ToolRegistry::new();
/// assert!(registry.lookup("fetch_story").is_none());
/// ```
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Insert a tool, replacing (with a warning) any tool previously
    /// registered for the same action type.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let action_type = tool.action_type().to_string();
        if let Some(previous) = self.tools.insert(action_type.clone(), tool) {
            log::warn!(
                "tool '{}' replaced previously registered '{}' for action type '{}'",
                self.tools[&action_type].name(),
                previous.name(),
                action_type
            );
        }
    }

    /// Look a tool up by action type.
    pub fn lookup(&self, action_type: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(action_type)
    }

    /// All registered tools, sorted by action type for stable iteration.
    pub fn list(&self) -> Vec<&Arc<dyn Tool>> {
        let mut tools: Vec<&Arc<dyn Tool>> = self.tools.values().collect();
        tools.sort_by(|a, b| a.action_type().cmp(b.action_type()));
        tools
    }

    /// Registered tools grouped by [`ToolCategory`].
    pub fn list_by_category(&self) -> BTreeMap<ToolCategory, Vec<&Arc<dyn Tool>>> {
        let mut grouped: BTreeMap<ToolCategory, Vec<&Arc<dyn Tool>>> = BTreeMap::new();
        for tool in self.list() {
            grouped
                .entry(ToolCategory::of(tool.action_type()))
                .or_insert_with(Vec::new)
                .push(tool);
        }
        grouped
    }

    /// All registered action types, sorted.
    pub fn available_action_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.tools.keys().cloned().collect();
        types.sort();
        types
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Render the full tool catalog as prompt text: one block per tool with
    /// name, action type, description, and parameter schema. Included
    /// verbatim inside planner prompts.
    pub fn catalog(&self) -> String {
        self.catalog_for(&[])
    }

    /// Render the catalog restricted to the given action types (empty
    /// slice ⇒ all). The planner uses this to expose each agent kind only
    /// its own toolset.
    pub fn catalog_for(&self, only: &[&str]) -> String {
        let tools: Vec<&Arc<dyn Tool>> = self
            .list()
            .into_iter()
            .filter(|tool| only.is_empty() || only.contains(&tool.action_type()))
            .collect();
        if tools.is_empty() {
            return String::from("(no tools registered)\n");
        }

        let mut text = String::new();
        text.push_str(&format!("AVAILABLE TOOLS ({} total):\n\n", tools.len()));
        for (idx, tool) in tools.iter().enumerate() {
            text.push_str(&format!(
                "[{}] {} (action type: {})\n    {}\n",
                idx + 1,
                tool.name(),
                tool.action_type(),
                tool.description()
            ));
            let params = tool.parameters();
            if !params.is_empty() {
                text.push_str("    Parameters:\n");
                for param in &params {
                    let required = if param.required { " [REQUIRED]" } else { "" };
                    text.push_str(&format!(
                        "      - {} ({}){}: {}\n",
                        param.name,
                        format!("{:?}", param.param_type).to_lowercase(),
                        required,
                        param.description.as_deref().unwrap_or("(no description)")
                    ));
                }
            }
            text.push('\n');
        }
        text
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticTool {
        action: &'static str,
        params: Vec<ToolParameter>,
    }

    #[async_trait]
    impl Tool for StaticTool {
        fn action_type(&self) -> &str {
            self.action
        }
        fn name(&self) -> &str {
            "Static Tool"
        }
        fn description(&self) -> &str {
            "Returns a fixed payload"
        }
        fn parameters(&self) -> Vec<ToolParameter> {
            self.params.clone()
        }
        async fn execute(
            &self,
            _params: Value,
        ) -> Result<ToolOutcome, Box<dyn Error + Send + Sync>> {
            Ok(ToolOutcome::success().with_field("answer", serde_json::json!(42)))
        }
    }

    fn tool(action: &'static str) -> Arc<dyn Tool> {
        Arc::new(StaticTool {
            action,
            params: vec![ToolParameter::new("key", ToolParameterType::String).required()],
        })
    }

    #[test]
    fn lookup_returns_registered_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(tool("fetch_story"));
        assert!(registry.lookup("fetch_story").is_some());
        assert!(registry.lookup("missing").is_none());
        assert_eq!(registry.available_action_types(), vec!["fetch_story"]);
    }

    #[test]
    fn list_by_category_groups_tools() {
        let mut registry = ToolRegistry::new();
        registry.register(tool("fetch_story"));
        registry.register(tool("execute_test"));
        registry.register(tool("run_suite"));
        let grouped = registry.list_by_category();
        assert_eq!(grouped[&ToolCategory::IssueTracker].len(), 1);
        assert_eq!(grouped[&ToolCategory::TestExecution].len(), 2);
    }

    #[test]
    fn register_replaces_on_conflict() {
        let mut registry = ToolRegistry::new();
        registry.register(tool("fetch_story"));
        registry.register(tool("fetch_story"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn categorization_is_prefix_based() {
        assert_eq!(ToolCategory::of("fetch_story"), ToolCategory::IssueTracker);
        assert_eq!(ToolCategory::of("fetch_page"), ToolCategory::DataRetrieval);
        assert_eq!(ToolCategory::of("git_commit"), ToolCategory::GitOperations);
        assert_eq!(ToolCategory::of("execute_test"), ToolCategory::TestExecution);
        assert_eq!(
            ToolCategory::of("write_test_file"),
            ToolCategory::FileOperations
        );
        assert_eq!(
            ToolCategory::of("discover_locator"),
            ToolCategory::AiOperations
        );
        assert_eq!(
            ToolCategory::of("request_approval"),
            ToolCategory::ApprovalWorkflow
        );
        assert_eq!(ToolCategory::of("unclassified"), ToolCategory::Other);
    }

    #[test]
    fn validate_params_enforces_required_and_types() {
        let t = StaticTool {
            action: "x",
            params: vec![
                ToolParameter::new("key", ToolParameterType::String).required(),
                ToolParameter::new("count", ToolParameterType::Integer),
            ],
        };

        assert!(t.validate_params(&serde_json::json!({"key": "v"})).is_ok());
        assert!(t
            .validate_params(&serde_json::json!({"key": "v", "count": 3}))
            .is_ok());
        assert!(t.validate_params(&serde_json::json!({})).is_err());
        assert!(t
            .validate_params(&serde_json::json!({"key": 42}))
            .is_err());
        assert!(t
            .validate_params(&serde_json::json!({"key": "v", "count": "three"}))
            .is_err());
        assert!(t.validate_params(&serde_json::json!("not an object")).is_err());
    }

    #[test]
    fn catalog_lists_tools_in_stable_order() {
        let mut registry = ToolRegistry::new();
        registry.register(tool("query_element_registry"));
        registry.register(tool("fetch_story"));
        let catalog = registry.catalog();
        let fetch_at = catalog.find("fetch_story").unwrap();
        let query_at = catalog.find("query_element_registry").unwrap();
        assert!(fetch_at < query_at);
        assert!(catalog.contains("[REQUIRED]"));
    }

    #[test]
    fn catalog_for_restricts_to_the_allowed_set() {
        let mut registry = ToolRegistry::new();
        registry.register(tool("fetch_story"));
        registry.register(tool("git_workflow"));
        let catalog = registry.catalog_for(&["fetch_story"]);
        assert!(catalog.contains("fetch_story"));
        assert!(!catalog.contains("git_workflow"));
        assert!(catalog.contains("(1 total)"));
        // An empty filter means the whole registry.
        assert!(registry.catalog_for(&[]).contains("git_workflow"));
    }

    #[test]
    fn outcome_round_trips_through_json() {
        let outcome = ToolOutcome::failure(ErrorKind::ToolError, "boom")
            .with_field("detail", serde_json::json!("x"));
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error_kind"], "tool_error");
        assert_eq!(json["detail"], "x");
        let back: ToolOutcome = serde_json::from_value(json).unwrap();
        assert_eq!(back.error_kind, Some(ErrorKind::ToolError));
        assert_eq!(back.field("detail"), Some(&serde_json::json!("x")));
    }
}
