//! Git workflow tool: branch → commit → open PR in one gated action.

use crate::qaforge::collab::git::{CommitFiles, GitHost};
use crate::qaforge::tool_protocol::{
    ErrorKind, Tool, ToolOutcome, ToolParameter, ToolParameterType,
};
use async_trait::async_trait;
use serde_json::Value;
use std::error::Error;
use std::sync::Arc;

/// Drives the hosted repository through the full review workflow.
pub struct GitWorkflowTool {
    host: Arc<dyn GitHost>,
    base_branch: String,
}

impl GitWorkflowTool {
    pub fn new(host: Arc<dyn GitHost>) -> Self {
        Self {
            host,
            base_branch: "main".to_string(),
        }
    }

    /// Override the base branch new branches fork from (builder pattern).
    pub fn with_base_branch(mut self, base: impl Into<String>) -> Self {
        self.base_branch = base.into();
        self
    }
}

#[async_trait]
impl Tool for GitWorkflowTool {
    fn action_type(&self) -> &str {
        "git_workflow"
    }

    fn name(&self) -> &str {
        "Git Workflow"
    }

    fn description(&self) -> &str {
        "Create a branch, commit the given files, and open a pull request."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::new("branch", ToolParameterType::String)
                .with_description("Branch to create (skipped when it already exists)")
                .required(),
            ToolParameter::new("message", ToolParameterType::String)
                .with_description("Commit message")
                .required(),
            ToolParameter::new("files", ToolParameterType::Object)
                .with_description("Mapping of repo path to file contents")
                .required(),
            ToolParameter::new("pr_title", ToolParameterType::String).required(),
            ToolParameter::new("pr_body", ToolParameterType::String),
        ]
    }

    async fn execute(&self, params: Value) -> Result<ToolOutcome, Box<dyn Error + Send + Sync>> {
        let branch = params
            .get("branch")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let message = params
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let pr_title = params
            .get("pr_title")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let pr_body = params
            .get("pr_body")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let mut files = CommitFiles::new();
        if let Some(map) = params.get("files").and_then(Value::as_object) {
            for (path, content) in map {
                match content.as_str() {
                    Some(text) => {
                        files.insert(path.clone(), text.to_string());
                    }
                    None => {
                        return Ok(ToolOutcome::failure(
                            ErrorKind::InvalidParameters,
                            format!("file '{}' content must be a string", path),
                        ))
                    }
                }
            }
        }
        if files.is_empty() {
            return Ok(ToolOutcome::failure(
                ErrorKind::InvalidParameters,
                "files mapping is empty",
            ));
        }

        if !self.host.branch_exists(branch).await? {
            self.host.create_branch(branch, &self.base_branch).await?;
        }
        let commit_id = self.host.commit(branch, message, files).await?;
        let pr_url = self.host.open_pr(branch, pr_title, pr_body).await?;

        Ok(ToolOutcome::success()
            .with_field("branch", Value::String(branch.to_string()))
            .with_field("commit", Value::String(commit_id))
            .with_field("pr_url", Value::String(pr_url)))
    }
}
