//! Gateway-backed AI tools: intent generation and failure analysis.
//!
//! These tools are the only ones that spend LLM budget; their outcomes
//! carry the gateway-computed cost so the executor's per-action accounting
//! stays exact.

use crate::qaforge::collab::issue_tracker::Story;
use crate::qaforge::element_registry::ElementRegistry;
use crate::qaforge::gateway::{context, GatewayRequest, LlmGateway, TaskKind};
use crate::qaforge::intent;
use crate::qaforge::tool_protocol::{
    ErrorKind, Tool, ToolOutcome, ToolParameter, ToolParameterType,
};
use async_trait::async_trait;
use serde_json::Value;
use std::error::Error;
use std::sync::Arc;
use tokio::sync::RwLock;

fn caller_from(params: &Value) -> String {
    params
        .get("execution_id")
        .and_then(Value::as_str)
        .unwrap_or("anonymous")
        .to_string()
}

/// Turns a tracker story into a validated test intent via the gateway.
pub struct GenerateTestIntentTool {
    gateway: Arc<LlmGateway>,
    registry: Arc<RwLock<ElementRegistry>>,
}

impl GenerateTestIntentTool {
    pub fn new(gateway: Arc<LlmGateway>, registry: Arc<RwLock<ElementRegistry>>) -> Self {
        Self { gateway, registry }
    }
}

#[async_trait]
impl Tool for GenerateTestIntentTool {
    fn action_type(&self) -> &str {
        "generate_test_intent"
    }

    fn name(&self) -> &str {
        "Generate Test Intent"
    }

    fn description(&self) -> &str {
        "Generate a structured test intent for a story, using the element \
         registry's known locators."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::new("story", ToolParameterType::Object)
                .with_description("Story object as returned by fetch_story")
                .required(),
            ToolParameter::new("api_context", ToolParameterType::String)
                .with_description("Optional API-surface notes to include in the prompt"),
            ToolParameter::new("execution_id", ToolParameterType::String)
                .with_description("Caller identity for rate limiting and budgeting"),
        ]
    }

    async fn execute(&self, params: Value) -> Result<ToolOutcome, Box<dyn Error + Send + Sync>> {
        let story: Story = match serde_json::from_value(
            params.get("story").cloned().unwrap_or(Value::Null),
        ) {
            Ok(story) => story,
            Err(err) => {
                return Ok(ToolOutcome::failure(
                    ErrorKind::InvalidParameters,
                    format!("story does not parse: {}", err),
                ))
            }
        };
        let api_context = params.get("api_context").and_then(Value::as_str);

        let prompt = {
            let registry = self.registry.read().await;
            context::build_test_generation_prompt(&story, api_context, &registry)
        };

        let response = self
            .gateway
            .generate(
                GatewayRequest::new(caller_from(&params), TaskKind::TestGeneration, prompt),
            )
            .await;

        if !response.success {
            return Ok(ToolOutcome::failure(
                response.error_kind.unwrap_or(ErrorKind::ToolError),
                response
                    .error
                    .unwrap_or_else(|| "intent generation failed".to_string()),
            )
            .with_cost(response.cost));
        }
        if !response.validation_passed {
            return Ok(ToolOutcome::failure(
                ErrorKind::ValidationFailed,
                response
                    .error
                    .unwrap_or_else(|| "generated output is not a usable intent".to_string()),
            )
            .with_cost(response.cost));
        }

        let content = response.content.unwrap_or_default();
        match intent::parse_lenient(&content) {
            Ok((parsed, warnings)) => Ok(ToolOutcome::success()
                .with_field("intent", serde_json::to_value(&parsed)?)
                .with_field(
                    "warnings",
                    Value::Array(warnings.into_iter().map(Value::String).collect()),
                )
                .with_cost(response.cost)),
            Err(err) => Ok(ToolOutcome::failure(
                ErrorKind::ValidationFailed,
                format!("generated intent rejected: {}", err),
            )
            .with_cost(response.cost)),
        }
    }
}

/// Asks the gateway why a test run failed, bounded page HTML included.
pub struct AnalyzeFailureTool {
    gateway: Arc<LlmGateway>,
}

impl AnalyzeFailureTool {
    pub fn new(gateway: Arc<LlmGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Tool for AnalyzeFailureTool {
    fn action_type(&self) -> &str {
        "analyze_failure"
    }

    fn name(&self) -> &str {
        "Analyze Failure"
    }

    fn description(&self) -> &str {
        "Analyze a failing test run from its captured page HTML, failing step, \
         and broken locator."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::new("page_html", ToolParameterType::String)
                .with_description("Captured page HTML (bounded to 50 KB in the prompt)")
                .required(),
            ToolParameter::new("failing_step", ToolParameterType::Integer).required(),
            ToolParameter::new("broken_locator", ToolParameterType::String).required(),
            ToolParameter::new("error_message", ToolParameterType::String).required(),
            ToolParameter::new("execution_id", ToolParameterType::String),
        ]
    }

    async fn execute(&self, params: Value) -> Result<ToolOutcome, Box<dyn Error + Send + Sync>> {
        let prompt = context::build_failure_analysis_prompt(
            params
                .get("page_html")
                .and_then(Value::as_str)
                .unwrap_or_default(),
            params
                .get("failing_step")
                .and_then(Value::as_u64)
                .unwrap_or(0) as usize,
            params
                .get("broken_locator")
                .and_then(Value::as_str)
                .unwrap_or_default(),
            params
                .get("error_message")
                .and_then(Value::as_str)
                .unwrap_or_default(),
        );

        let response = self
            .gateway
            .generate(
                GatewayRequest::new(caller_from(&params), TaskKind::FailureAnalysis, prompt),
            )
            .await;

        if !response.success || !response.validation_passed {
            return Ok(ToolOutcome::failure(
                response.error_kind.unwrap_or(ErrorKind::ToolError),
                response
                    .error
                    .unwrap_or_else(|| "failure analysis unavailable".to_string()),
            )
            .with_cost(response.cost));
        }

        Ok(ToolOutcome::success()
            .with_field(
                "analysis",
                Value::String(response.content.unwrap_or_default()),
            )
            .with_cost(response.cost))
    }
}

/// Asks the gateway for a replacement locator, feeding it the registered
/// fallbacks and any prior analysis.
pub struct SuggestLocatorFixTool {
    gateway: Arc<LlmGateway>,
    registry: Arc<RwLock<ElementRegistry>>,
}

impl SuggestLocatorFixTool {
    pub fn new(gateway: Arc<LlmGateway>, registry: Arc<RwLock<ElementRegistry>>) -> Self {
        Self { gateway, registry }
    }
}

#[async_trait]
impl Tool for SuggestLocatorFixTool {
    fn action_type(&self) -> &str {
        "suggest_locator_fix"
    }

    fn name(&self) -> &str {
        "Suggest Locator Fix"
    }

    fn description(&self) -> &str {
        "Propose a replacement locator for a broken one, weighing the \
         registry's fallbacks and any prior failure analysis."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::new("broken_locator", ToolParameterType::String).required(),
            ToolParameter::new("analysis", ToolParameterType::String)
                .with_description("Prior failure-analysis prose, when available"),
            ToolParameter::new("execution_id", ToolParameterType::String),
        ]
    }

    async fn execute(&self, params: Value) -> Result<ToolOutcome, Box<dyn Error + Send + Sync>> {
        let broken = params
            .get("broken_locator")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let analysis = params
            .get("analysis")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let fallbacks = {
            let registry = self.registry.read().await;
            registry.fallbacks_for(broken)
        };
        let prompt = context::build_fix_suggestion_prompt(broken, &fallbacks, analysis);

        let response = self
            .gateway
            .generate(
                GatewayRequest::new(caller_from(&params), TaskKind::FixSuggestion, prompt),
            )
            .await;

        if !response.success || !response.validation_passed {
            return Ok(ToolOutcome::failure(
                response.error_kind.unwrap_or(ErrorKind::ToolError),
                response
                    .error
                    .unwrap_or_else(|| "fix suggestion unavailable".to_string()),
            )
            .with_cost(response.cost));
        }

        Ok(ToolOutcome::success()
            .with_field(
                "suggestion",
                Value::String(response.content.unwrap_or_default()),
            )
            .with_field(
                "fallbacks",
                Value::Array(fallbacks.into_iter().map(Value::String).collect()),
            )
            .with_cost(response.cost))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qaforge::gateway::rate_limit::RateLimiter;
    use crate::qaforge::llm_provider::ScriptedProvider;
    use std::time::Duration;

    fn registry() -> Arc<RwLock<ElementRegistry>> {
        Arc::new(RwLock::new(
            ElementRegistry::from_json(r#"{"version":"1","pages":{}}"#).unwrap(),
        ))
    }

    fn story_json() -> Value {
        serde_json::json!({
            "key": "SCRUM-7",
            "summary": "Implement user login",
            "description": "",
            "acceptance_criteria": [],
            "labels": [],
            "components": []
        })
    }

    #[tokio::test]
    async fn generates_and_validates_an_intent() {
        let provider = ScriptedProvider::new("mock").with_response(
            r#"{"className":"LoginPage","testClassName":"LoginTest","steps":[
                {"action":"NAVIGATE","value":"https://www.saucedemo.com"},
                {"action":"WARP","value":"x"}
            ]}"#,
        );
        let gateway = Arc::new(LlmGateway::new(
            Arc::new(provider),
            RateLimiter::new(Duration::from_secs(60), 10),
        ));
        let tool = GenerateTestIntentTool::new(gateway, registry());
        let outcome = tool
            .execute(serde_json::json!({"story": story_json(), "execution_id": "e1"}))
            .await
            .unwrap();
        assert!(outcome.success);
        let intent = outcome.field("intent").unwrap();
        assert_eq!(intent["steps"].as_array().unwrap().len(), 1);
        assert_eq!(
            outcome.field("warnings").unwrap().as_array().unwrap().len(),
            1
        );
        assert!(outcome.cost > 0.0);
    }

    #[tokio::test]
    async fn non_intent_output_fails_validation() {
        let provider = ScriptedProvider::new("mock").with_response("I refuse to answer in JSON");
        let gateway = Arc::new(LlmGateway::new(
            Arc::new(provider),
            RateLimiter::new(Duration::from_secs(60), 10),
        ));
        let tool = GenerateTestIntentTool::new(gateway, registry());
        let outcome = tool
            .execute(serde_json::json!({"story": story_json()}))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(ErrorKind::ValidationFailed));
    }

    #[tokio::test]
    async fn suggestion_carries_fallbacks_from_the_registry() {
        let provider = ScriptedProvider::new("mock").with_response(
            "Use css=#login-button; it is the first registered fallback and still unique.",
        );
        let gateway = Arc::new(LlmGateway::new(
            Arc::new(provider),
            RateLimiter::new(Duration::from_secs(60), 10),
        ));
        let elements = Arc::new(RwLock::new(
            ElementRegistry::from_json(
                r##"{"version":"1","pages":{"LoginPage":{"url":"https://x","elements":{
                    "login-button":{"strategy":"testid","value":"login-button",
                        "playwrightCode":"",
                        "fallbacks":[{"strategy":"css","value":"#login-button"}]}}}}}"##,
            )
            .unwrap(),
        ));
        let tool = SuggestLocatorFixTool::new(gateway, elements);
        let outcome = tool
            .execute(serde_json::json!({
                "broken_locator": "testid=login-button",
                "analysis": "The data-test attribute was removed in the last deploy."
            }))
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(
            outcome.field("fallbacks").unwrap()[0],
            serde_json::json!("css=#login-button")
        );
        assert!(outcome
            .field("suggestion")
            .and_then(Value::as_str)
            .unwrap()
            .contains("css=#login-button"));
    }

    #[tokio::test]
    async fn analyze_failure_returns_prose() {
        let provider = ScriptedProvider::new("mock").with_response(
            "The login button moved; #login-button now matches the intended element.",
        );
        let gateway = Arc::new(LlmGateway::new(
            Arc::new(provider),
            RateLimiter::new(Duration::from_secs(60), 10),
        ));
        let tool = AnalyzeFailureTool::new(gateway);
        let outcome = tool
            .execute(serde_json::json!({
                "page_html": "<html></html>",
                "failing_step": 2,
                "broken_locator": "testid=login-button",
                "error_message": "Element not found"
            }))
            .await
            .unwrap();
        assert!(outcome.success);
        assert!(outcome
            .field("analysis")
            .and_then(Value::as_str)
            .unwrap()
            .contains("#login-button"));
    }
}
