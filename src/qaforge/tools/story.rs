//! Issue-tracker tool.

use crate::qaforge::collab::issue_tracker::IssueTracker;
use crate::qaforge::tool_protocol::{
    ErrorKind, Tool, ToolOutcome, ToolParameter, ToolParameterType,
};
use async_trait::async_trait;
use serde_json::Value;
use std::error::Error;
use std::sync::Arc;

/// Fetches a story by key and returns its normalized fields.
pub struct FetchStoryTool {
    tracker: Arc<dyn IssueTracker>,
}

impl FetchStoryTool {
    pub fn new(tracker: Arc<dyn IssueTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl Tool for FetchStoryTool {
    fn action_type(&self) -> &str {
        "fetch_story"
    }

    fn name(&self) -> &str {
        "Fetch Story"
    }

    fn description(&self) -> &str {
        "Fetch a tracker story (summary, description, acceptance criteria) by key."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::new("story_key", ToolParameterType::String)
            .with_description("Issue key, e.g. SCRUM-7")
            .required()]
    }

    async fn execute(&self, params: Value) -> Result<ToolOutcome, Box<dyn Error + Send + Sync>> {
        let key = params
            .get("story_key")
            .and_then(Value::as_str)
            .unwrap_or_default();
        match self.tracker.fetch_story(key).await {
            Ok(story) => {
                let story_json = serde_json::to_value(&story)?;
                Ok(ToolOutcome::success().with_field("story", story_json))
            }
            Err(err) => Ok(ToolOutcome::failure(
                ErrorKind::ToolError,
                format!("fetch_story failed: {}", err),
            )),
        }
    }
}
