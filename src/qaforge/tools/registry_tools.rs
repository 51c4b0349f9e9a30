//! Element-registry tools: query, discover fallbacks, update.
//!
//! `discover_locator` follows the resilience policy for exploratory work:
//! it always returns `success=true`, signalling "nothing found" through a
//! `candidate_found=false` sentinel instead of a failure the dispatcher
//! would count against the tool's circuit.

use crate::qaforge::element_registry::{ElementLocator, ElementRegistry};
use crate::qaforge::tool_protocol::{
    ErrorKind, Tool, ToolOutcome, ToolParameter, ToolParameterType,
};
use async_trait::async_trait;
use serde_json::Value;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Looks pages and elements up in the shared registry.
pub struct QueryElementRegistryTool {
    registry: Arc<RwLock<ElementRegistry>>,
}

impl QueryElementRegistryTool {
    pub fn new(registry: Arc<RwLock<ElementRegistry>>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Tool for QueryElementRegistryTool {
    fn action_type(&self) -> &str {
        "query_element_registry"
    }

    fn name(&self) -> &str {
        "Query Element Registry"
    }

    fn description(&self) -> &str {
        "Look up a page (all its elements) or one element's locators in the element registry."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::new("page", ToolParameterType::String)
                .with_description("Page name, e.g. LoginPage")
                .required(),
            ToolParameter::new("element", ToolParameterType::String)
                .with_description("Element name; omit to list the whole page"),
        ]
    }

    async fn execute(&self, params: Value) -> Result<ToolOutcome, Box<dyn Error + Send + Sync>> {
        let page_name = params
            .get("page")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let registry = self.registry.read().await;
        let page = match registry.pages.get(page_name) {
            Some(page) => page,
            None => {
                return Ok(ToolOutcome::failure(
                    ErrorKind::ToolError,
                    format!("page '{}' not in the element registry", page_name),
                ))
            }
        };

        match params.get("element").and_then(Value::as_str) {
            Some(element_name) => match page.elements.get(element_name) {
                Some(element) => Ok(ToolOutcome::success()
                    .with_field("locator", Value::String(element.primary_locator()))
                    .with_field(
                        "fallbacks",
                        Value::Array(
                            element
                                .fallbacks
                                .iter()
                                .map(|f| Value::String(f.as_locator_string()))
                                .collect(),
                        ),
                    )),
                None => Ok(ToolOutcome::failure(
                    ErrorKind::ToolError,
                    format!("element '{}' not on page '{}'", element_name, page_name),
                )),
            },
            None => Ok(ToolOutcome::success()
                .with_field("url", Value::String(page.url.clone()))
                .with_field("elements", serde_json::to_value(&page.elements)?)),
        }
    }
}

/// Finds registered fallback locators for a broken primary locator.
pub struct DiscoverLocatorTool {
    registry: Arc<RwLock<ElementRegistry>>,
}

impl DiscoverLocatorTool {
    pub fn new(registry: Arc<RwLock<ElementRegistry>>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Tool for DiscoverLocatorTool {
    fn action_type(&self) -> &str {
        "discover_locator"
    }

    fn name(&self) -> &str {
        "Discover Locator"
    }

    fn description(&self) -> &str {
        "Find registered fallback locators for a broken locator. Always succeeds; \
         candidate_found=false means the registry knows no alternative."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::new("broken_locator", ToolParameterType::String)
            .with_description("Broken locator in strategy=value form")
            .required()]
    }

    async fn execute(&self, params: Value) -> Result<ToolOutcome, Box<dyn Error + Send + Sync>> {
        let broken = params
            .get("broken_locator")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let registry = self.registry.read().await;
        let fallbacks = registry.fallbacks_for(broken);
        let candidate = fallbacks.first().cloned();

        let mut outcome = ToolOutcome::success()
            .with_field("candidate_found", Value::Bool(candidate.is_some()))
            .with_field(
                "fallbacks",
                Value::Array(fallbacks.iter().cloned().map(Value::String).collect()),
            );
        if let Some((page, element, _)) = registry.find_by_primary_locator(broken) {
            outcome = outcome
                .with_field("page", Value::String(page.to_string()))
                .with_field("element", Value::String(element.to_string()));
        }
        if let Some(candidate) = candidate {
            outcome = outcome.with_field("candidate", Value::String(candidate));
        }
        Ok(outcome)
    }
}

/// Promotes a new primary locator for a registered element.
///
/// The registry is owned outside the core, so this tool mutates the shared
/// in-memory copy and, when a persist path is configured, writes the full
/// document back for the owning pipeline to pick up.
pub struct UpdateElementRegistryTool {
    registry: Arc<RwLock<ElementRegistry>>,
    persist_path: Option<PathBuf>,
}

impl UpdateElementRegistryTool {
    pub fn new(registry: Arc<RwLock<ElementRegistry>>) -> Self {
        Self {
            registry,
            persist_path: None,
        }
    }

    /// Persist the updated document to `path` after each change (builder
    /// pattern).
    pub fn with_persist_path(mut self, path: PathBuf) -> Self {
        self.persist_path = Some(path);
        self
    }
}

#[async_trait]
impl Tool for UpdateElementRegistryTool {
    fn action_type(&self) -> &str {
        "update_element_registry"
    }

    fn name(&self) -> &str {
        "Update Element Registry"
    }

    fn description(&self) -> &str {
        "Promote a verified locator to primary for a registered element; the old \
         primary becomes the first fallback."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::new("page", ToolParameterType::String).required(),
            ToolParameter::new("element", ToolParameterType::String).required(),
            ToolParameter::new("strategy", ToolParameterType::String)
                .with_description("New primary strategy, e.g. css")
                .required(),
            ToolParameter::new("value", ToolParameterType::String)
                .with_description("New primary locator value")
                .required(),
        ]
    }

    async fn execute(&self, params: Value) -> Result<ToolOutcome, Box<dyn Error + Send + Sync>> {
        let page_name = params.get("page").and_then(Value::as_str).unwrap_or_default();
        let element_name = params
            .get("element")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let strategy = params
            .get("strategy")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let value = params.get("value").and_then(Value::as_str).unwrap_or_default();

        let snapshot = {
            let mut registry = self.registry.write().await;
            let element = registry
                .pages
                .get_mut(page_name)
                .and_then(|page| page.elements.get_mut(element_name));
            let element = match element {
                Some(element) => element,
                None => {
                    return Ok(ToolOutcome::failure(
                        ErrorKind::ToolError,
                        format!("element '{}/{}' not registered", page_name, element_name),
                    ))
                }
            };

            let old_primary = ElementLocator {
                strategy: element.strategy.clone(),
                value: element.value.clone(),
                options: element.options.clone(),
            };
            element.strategy = strategy.to_string();
            element.value = value.to_string();
            element.fallbacks.retain(|f| {
                !(f.strategy == strategy && f.value == value)
            });
            element.fallbacks.insert(0, old_primary);
            registry.last_updated = chrono::Utc::now().to_rfc3339();
            registry.clone()
        };

        if let Some(path) = &self.persist_path {
            let rendered = serde_json::to_string_pretty(&snapshot)?;
            tokio::fs::write(path, rendered.as_bytes()).await?;
        }

        Ok(ToolOutcome::success().with_field(
            "locator",
            Value::String(format!("{}={}", strategy, value)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared_registry() -> Arc<RwLock<ElementRegistry>> {
        Arc::new(RwLock::new(
            ElementRegistry::from_json(
                r##"{"version":"1","pages":{"LoginPage":{"url":"https://x","elements":{
                    "login-button":{"strategy":"testid","value":"login-button",
                        "playwrightCode":"",
                        "fallbacks":[{"strategy":"css","value":"#login-button"}]}}}}}"##,
            )
            .unwrap(),
        ))
    }

    #[tokio::test]
    async fn discover_returns_sentinel_not_failure() {
        let tool = DiscoverLocatorTool::new(shared_registry());
        let outcome = tool
            .execute(serde_json::json!({"broken_locator": "testid=login-button"}))
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.field("candidate_found"), Some(&Value::Bool(true)));
        assert_eq!(
            outcome.field("candidate"),
            Some(&Value::String("css=#login-button".into()))
        );

        let outcome = tool
            .execute(serde_json::json!({"broken_locator": "testid=unknown"}))
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.field("candidate_found"), Some(&Value::Bool(false)));
    }

    #[tokio::test]
    async fn update_promotes_fallback_and_demotes_primary() {
        let registry = shared_registry();
        let tool = UpdateElementRegistryTool::new(Arc::clone(&registry));
        let outcome = tool
            .execute(serde_json::json!({
                "page": "LoginPage", "element": "login-button",
                "strategy": "css", "value": "#login-button"
            }))
            .await
            .unwrap();
        assert!(outcome.success);

        let snapshot = registry.read().await;
        let element = snapshot.element("LoginPage", "login-button").unwrap();
        assert_eq!(element.primary_locator(), "css=#login-button");
        // The old primary is now the best fallback, and the promoted entry
        // no longer appears among the fallbacks.
        assert_eq!(element.fallbacks[0].as_locator_string(), "testid=login-button");
        assert!(element
            .fallbacks
            .iter()
            .all(|f| f.as_locator_string() != "css=#login-button"));
    }

    #[tokio::test]
    async fn query_lists_page_or_single_element() {
        let tool = QueryElementRegistryTool::new(shared_registry());
        let outcome = tool
            .execute(serde_json::json!({"page": "LoginPage"}))
            .await
            .unwrap();
        assert!(outcome.success);
        assert!(outcome.field("elements").is_some());

        let outcome = tool
            .execute(serde_json::json!({"page": "LoginPage", "element": "login-button"}))
            .await
            .unwrap();
        assert_eq!(
            outcome.field("locator"),
            Some(&Value::String("testid=login-button".into()))
        );

        let outcome = tool
            .execute(serde_json::json!({"page": "Nope"}))
            .await
            .unwrap();
        assert!(!outcome.success);
    }
}
