//! Approval-request tool.
//!
//! `request_approval` sits in the executor's default always-gated list, so
//! in normal operation the executor intercepts the action and creates the
//! request itself before suspending — this tool's `execute` never runs.
//! The tool still exists for two reasons: it puts the action type (with
//! its parameter schema) into the planner catalog, and deployments that
//! take `request_approval` off the gated list get a working fallback that
//! files the request without suspending the execution.

use crate::qaforge::approval::{ApprovalEngine, ApprovalRequestType, NewApprovalRequest};
use crate::qaforge::tool_protocol::{Tool, ToolOutcome, ToolParameter, ToolParameterType};
use async_trait::async_trait;
use serde_json::Value;
use std::error::Error;
use std::sync::Arc;

/// Files an approval request for human review.
pub struct RequestApprovalTool {
    engine: Arc<ApprovalEngine>,
}

impl RequestApprovalTool {
    pub fn new(engine: Arc<ApprovalEngine>) -> Self {
        Self { engine }
    }
}

fn request_type_from(label: Option<&str>) -> ApprovalRequestType {
    match label {
        Some("SELF_HEALING_FIX") => ApprovalRequestType::SelfHealingFix,
        Some("SELF_HEALING_MANUAL") => ApprovalRequestType::SelfHealingManual,
        Some("FLAKY_FIX") => ApprovalRequestType::FlakyFix,
        Some("FLAKY_MANUAL") => ApprovalRequestType::FlakyManual,
        _ => ApprovalRequestType::TestGeneration,
    }
}

#[async_trait]
impl Tool for RequestApprovalTool {
    fn action_type(&self) -> &str {
        "request_approval"
    }

    fn name(&self) -> &str {
        "Request Approval"
    }

    fn description(&self) -> &str {
        "Submit generated content for human review. The execution pauses until \
         a reviewer approves, rejects, or the request expires."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::new("content", ToolParameterType::String)
                .with_description("The content under review (intent JSON or fix description)")
                .required(),
            ToolParameter::new("approval_type", ToolParameterType::String).with_description(
                "TEST_GENERATION, SELF_HEALING_FIX, SELF_HEALING_MANUAL, FLAKY_FIX, \
                 or FLAKY_MANUAL",
            ),
            ToolParameter::new("path", ToolParameterType::String)
                .with_description("Target file path for materialization on approval"),
            ToolParameter::new("auto_execute_on_approval", ToolParameterType::Boolean),
            ToolParameter::new("execution_id", ToolParameterType::String),
        ]
    }

    async fn execute(&self, params: Value) -> Result<ToolOutcome, Box<dyn Error + Send + Sync>> {
        let request = self
            .engine
            .create(NewApprovalRequest {
                request_type: request_type_from(
                    params.get("approval_type").and_then(Value::as_str),
                ),
                content: params
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                requester: params
                    .get("execution_id")
                    .and_then(Value::as_str)
                    .unwrap_or("anonymous")
                    .to_string(),
                auto_execute_on_approval: params
                    .get("auto_execute_on_approval")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                target_file_path: params
                    .get("path")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                git_branch_hint: None,
                execution_id: params
                    .get("execution_id")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                timeout: None,
            })
            .await;

        Ok(ToolOutcome::success()
            .with_field("request_id", Value::String(request.id))
            .with_field("status", Value::String(request.status.label().to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn files_a_pending_request() {
        let engine = Arc::new(ApprovalEngine::new(Duration::from_secs(3600)));
        let tool = RequestApprovalTool::new(Arc::clone(&engine));
        let outcome = tool
            .execute(serde_json::json!({
                "content": "{}", "approval_type": "FLAKY_MANUAL", "execution_id": "e1"
            }))
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(
            outcome.field("status"),
            Some(&Value::String("PENDING".into()))
        );
        assert_eq!(engine.list_pending().await.len(), 1);
    }
}
