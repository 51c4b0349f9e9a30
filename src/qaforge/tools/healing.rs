//! Self-healing extraction tool.
//!
//! `extract_broken_locator` is exploratory by contract: it always returns
//! `success=true`. A locator found directly in the driver error message is
//! reported with `extracted_from_content=false`; when the error is vague
//! ("Element not found") the tool falls back to the test intent and flags
//! the result with `extracted_from_content=true`. Finding nothing yields a
//! null sentinel — the planner decides what that means, never this tool.

use crate::qaforge::intent::TestIntent;
use crate::qaforge::tool_protocol::{Tool, ToolOutcome, ToolParameter, ToolParameterType};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::error::Error;

lazy_static! {
    /// Locator in strategy=value form embedded in an error message.
    static ref LOCATOR_IN_ERROR: Regex =
        Regex::new(r"(testid|css|role|label|placeholder|text|xpath)=[^\s'\x22,)]+").unwrap();
    /// Quoted selector fallback, e.g. waiting for selector "#login".
    static ref QUOTED_SELECTOR: Regex =
        Regex::new(r#"selector\s+["']([^"']+)["']"#).unwrap();
}

/// Extracts the broken locator from a driver error, falling back to the
/// failing test intent.
pub struct ExtractBrokenLocatorTool;

impl ExtractBrokenLocatorTool {
    pub fn new() -> Self {
        Self
    }

    fn from_error(error_message: &str) -> Option<(String, bool)> {
        if let Some(found) = LOCATOR_IN_ERROR.find(error_message) {
            return Some((found.as_str().to_string(), false));
        }
        if let Some(captures) = QUOTED_SELECTOR.captures(error_message) {
            return Some((captures[1].to_string(), false));
        }
        None
    }

    fn from_intent(intent: &TestIntent, failing_step: Option<usize>) -> Option<(String, bool)> {
        if let Some(index) = failing_step {
            if let Some(step) = intent.steps.get(index) {
                if let Some(locator) = &step.locator {
                    return Some((locator.to_string(), true));
                }
            }
        }
        intent
            .steps
            .iter()
            .find_map(|step| step.locator.as_ref())
            .map(|locator| (locator.to_string(), true))
    }
}

impl Default for ExtractBrokenLocatorTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ExtractBrokenLocatorTool {
    fn action_type(&self) -> &str {
        "extract_broken_locator"
    }

    fn name(&self) -> &str {
        "Extract Broken Locator"
    }

    fn description(&self) -> &str {
        "Identify the broken locator from a test failure. Always succeeds; a null \
         broken_locator means nothing could be identified."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::new("error_message", ToolParameterType::String)
                .with_description("Driver failure message")
                .required(),
            ToolParameter::new("test_intent", ToolParameterType::Object)
                .with_description("Failing test's intent, used when the error is vague"),
            ToolParameter::new("failing_step", ToolParameterType::Integer)
                .with_description("Index of the failing step, when known"),
        ]
    }

    async fn execute(&self, params: Value) -> Result<ToolOutcome, Box<dyn Error + Send + Sync>> {
        let error_message = params
            .get("error_message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let failing_step = params
            .get("failing_step")
            .and_then(Value::as_u64)
            .map(|v| v as usize);

        let mut extraction = Self::from_error(error_message);
        if extraction.is_none() {
            if let Some(intent_value) = params.get("test_intent") {
                if let Ok(intent) =
                    serde_json::from_value::<TestIntent>(intent_value.clone())
                {
                    extraction = Self::from_intent(&intent, failing_step);
                }
            }
        }

        let outcome = match extraction {
            Some((locator, from_content)) => ToolOutcome::success()
                .with_field("broken_locator", Value::String(locator))
                .with_field("extracted_from_content", Value::Bool(from_content)),
            None => ToolOutcome::success()
                .with_field("broken_locator", Value::Null)
                .with_field("extracted_from_content", Value::Bool(false)),
        };
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent() -> Value {
        serde_json::json!({
            "className": "LoginPage",
            "testClassName": "LoginTest",
            "steps": [
                {"action": "CLICK", "locator": "testid=login-button"},
                {"action": "FILL", "locator": "css=#user", "value": "x"}
            ]
        })
    }

    #[tokio::test]
    async fn explicit_locator_in_error_wins() {
        let tool = ExtractBrokenLocatorTool::new();
        let outcome = tool
            .execute(serde_json::json!({
                "error_message": "timeout waiting for css=#missing to appear",
                "test_intent": intent()
            }))
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(
            outcome.field("broken_locator"),
            Some(&Value::String("css=#missing".into()))
        );
        assert_eq!(
            outcome.field("extracted_from_content"),
            Some(&Value::Bool(false))
        );
    }

    #[tokio::test]
    async fn vague_error_falls_back_to_intent() {
        let tool = ExtractBrokenLocatorTool::new();
        let outcome = tool
            .execute(serde_json::json!({
                "error_message": "Element not found",
                "test_intent": intent()
            }))
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(
            outcome.field("broken_locator"),
            Some(&Value::String("testid=login-button".into()))
        );
        assert_eq!(
            outcome.field("extracted_from_content"),
            Some(&Value::Bool(true))
        );
    }

    #[tokio::test]
    async fn failing_step_selects_the_right_locator() {
        let tool = ExtractBrokenLocatorTool::new();
        let outcome = tool
            .execute(serde_json::json!({
                "error_message": "Element not found",
                "test_intent": intent(),
                "failing_step": 1
            }))
            .await
            .unwrap();
        assert_eq!(
            outcome.field("broken_locator"),
            Some(&Value::String("css=#user".into()))
        );
    }

    #[tokio::test]
    async fn nothing_found_is_a_null_sentinel_not_a_failure() {
        let tool = ExtractBrokenLocatorTool::new();
        let outcome = tool
            .execute(serde_json::json!({"error_message": "something went wrong"}))
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.field("broken_locator"), Some(&Value::Null));
    }
}
