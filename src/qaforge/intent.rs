//! Typed test intents.
//!
//! A [`TestIntent`] is the structured output of the generator agent: a
//! language-agnostic sequence of browser-automation steps. The system
//! deliberately separates *what a test does* (the intent) from *how it is
//! rendered into source* (a substitutable [`IntentRenderer`]); the core
//! produces, validates, persists, and approves intents but never inspects
//! rendered source beyond storing it.
//!
//! LLM output is untrusted, so ingestion is lenient: JSON fences are
//! stripped, unknown action keywords decode to steps with no action (which
//! are then filtered out with a recorded warning), and bare locators
//! without a `strategy=` prefix normalize to CSS. Parsing then serializing
//! an intent is idempotent — unknown-action steps drop out exactly once.
//!
//! # Wire shape
//!
//! ```json
//! {
//!   "className": "LoginPage",
//!   "testClassName": "LoginTest",
//!   "steps": [
//!     {"action": "NAVIGATE", "value": "https://www.saucedemo.com"},
//!     {"action": "FILL", "locator": "testid=username", "value": "standard_user"}
//!   ]
//! }
//! ```
//!
//! Unknown top-level keys are ignored by consumers.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::error::Error;
use std::fmt;

/// Browser-automation step verbs an intent may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentAction {
    Navigate,
    Fill,
    Click,
    ClickRole,
    PressKey,
    SelectOption,
    WaitForSelector,
    WaitForUrl,
    AssertUrl,
    AssertText,
    AssertTitle,
    AssertCount,
    AssertValue,
    AssertVisible,
    Reload,
}

impl IntentAction {
    /// Whether a step with this action must carry a non-empty locator.
    pub fn requires_locator(&self) -> bool {
        matches!(
            self,
            IntentAction::Fill
                | IntentAction::Click
                | IntentAction::ClickRole
                | IntentAction::SelectOption
                | IntentAction::WaitForSelector
                | IntentAction::AssertText
                | IntentAction::AssertCount
                | IntentAction::AssertValue
                | IntentAction::AssertVisible
        )
    }

    /// Whether a step with this action must carry a non-empty value
    /// (URL, text, key, pattern, or expected value).
    pub fn requires_value(&self) -> bool {
        matches!(
            self,
            IntentAction::Navigate
                | IntentAction::Fill
                | IntentAction::PressKey
                | IntentAction::SelectOption
                | IntentAction::WaitForUrl
                | IntentAction::AssertUrl
                | IntentAction::AssertText
                | IntentAction::AssertTitle
                | IntentAction::AssertCount
                | IntentAction::AssertValue
        )
    }

    /// Wire keyword for this action (e.g. `"WAIT_FOR_SELECTOR"`).
    pub fn keyword(&self) -> &'static str {
        match self {
            IntentAction::Navigate => "NAVIGATE",
            IntentAction::Fill => "FILL",
            IntentAction::Click => "CLICK",
            IntentAction::ClickRole => "CLICK_ROLE",
            IntentAction::PressKey => "PRESS_KEY",
            IntentAction::SelectOption => "SELECT_OPTION",
            IntentAction::WaitForSelector => "WAIT_FOR_SELECTOR",
            IntentAction::WaitForUrl => "WAIT_FOR_URL",
            IntentAction::AssertUrl => "ASSERT_URL",
            IntentAction::AssertText => "ASSERT_TEXT",
            IntentAction::AssertTitle => "ASSERT_TITLE",
            IntentAction::AssertCount => "ASSERT_COUNT",
            IntentAction::AssertValue => "ASSERT_VALUE",
            IntentAction::AssertVisible => "ASSERT_VISIBLE",
            IntentAction::Reload => "RELOAD",
        }
    }
}

/// Locator strategy prefix (`testid=`, `css=`, …).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocatorStrategy {
    Testid,
    Css,
    Role,
    Label,
    Placeholder,
    Text,
    Xpath,
}

impl LocatorStrategy {
    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "testid" => Some(LocatorStrategy::Testid),
            "css" => Some(LocatorStrategy::Css),
            "role" => Some(LocatorStrategy::Role),
            "label" => Some(LocatorStrategy::Label),
            "placeholder" => Some(LocatorStrategy::Placeholder),
            "text" => Some(LocatorStrategy::Text),
            "xpath" => Some(LocatorStrategy::Xpath),
            _ => None,
        }
    }

    fn prefix(&self) -> &'static str {
        match self {
            LocatorStrategy::Testid => "testid",
            LocatorStrategy::Css => "css",
            LocatorStrategy::Role => "role",
            LocatorStrategy::Label => "label",
            LocatorStrategy::Placeholder => "placeholder",
            LocatorStrategy::Text => "text",
            LocatorStrategy::Xpath => "xpath",
        }
    }
}

/// A normalized element locator in `strategy=value` form.
///
/// A bare selector without a recognized `strategy=` prefix is treated as
/// CSS, so `".login"` and `"css=.login"` are the same locator.
///
/// # Example
///
/// ```rust
/// use qaforge::intent::{Locator, LocatorStrategy};
///
/// let loc = Locator::parse("testid=login-button").unwrap();
/// assert_eq!(loc.strategy, LocatorStrategy::Testid);
/// assert_eq!(loc.value, "login-button");
/// assert_eq!(loc.to_string(), "testid=login-button");
///
/// let bare = Locator::parse(".submit > button").unwrap();
/// assert_eq!(bare.strategy, LocatorStrategy::Css);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub strategy: LocatorStrategy,
    pub value: String,
}

impl Locator {
    /// Parse a locator string; returns `None` for empty/whitespace input.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        if let Some(eq) = trimmed.find('=') {
            let (prefix, rest) = trimmed.split_at(eq);
            if let Some(strategy) = LocatorStrategy::from_prefix(prefix) {
                let value = rest[1..].to_string();
                if value.is_empty() {
                    return None;
                }
                return Some(Self { strategy, value });
            }
        }
        // No recognized prefix: the whole string is a CSS selector. This
        // keeps `xpath=//a[@id='x']`-style values with embedded `=` intact
        // because only known prefixes are split off.
        Some(Self {
            strategy: LocatorStrategy::Css,
            value: trimmed.to_string(),
        })
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.strategy.prefix(), self.value)
    }
}

impl Serialize for Locator {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Locator {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Locator::parse(&raw).ok_or_else(|| D::Error::custom("empty locator"))
    }
}

fn de_opt_locator<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Locator>, D::Error> {
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(Locator::parse))
}

fn de_opt_action<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<IntentAction>, D::Error> {
    // Unknown keywords decode to None instead of failing the whole intent;
    // the lenient parser filters those steps out afterwards.
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|keyword| {
        serde_json::from_value::<IntentAction>(serde_json::Value::String(keyword)).ok()
    }))
}

/// One step of a [`TestIntent`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntentStep {
    /// Step verb; `None` when the LLM emitted an unknown keyword.
    #[serde(default, deserialize_with = "de_opt_action")]
    pub action: Option<IntentAction>,
    /// Element locator, normalized to `strategy=value` form.
    #[serde(default, deserialize_with = "de_opt_locator", skip_serializing_if = "Option::is_none")]
    pub locator: Option<Locator>,
    /// URL / text / key / pattern / expected value, depending on the action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Per-step timeout in milliseconds, overriding the driver default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Human-readable comment carried into rendered output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl IntentStep {
    /// Build a step with just a verb.
    pub fn new(action: IntentAction) -> Self {
        Self {
            action: Some(action),
            locator: None,
            value: None,
            timeout: None,
            description: None,
        }
    }

    /// Attach a locator (builder pattern). Invalid/empty strings leave the
    /// locator unset.
    pub fn with_locator(mut self, raw: &str) -> Self {
        self.locator = Locator::parse(raw);
        self
    }

    /// Attach a value (builder pattern).
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Attach a description (builder pattern).
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A validated, ordered sequence of browser actions plus naming metadata
/// for the renderer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestIntent {
    /// Page-object class name the renderer should target.
    pub class_name: String,
    /// Test class name the renderer should emit.
    pub test_class_name: String,
    /// Ordered steps.
    pub steps: Vec<IntentStep>,
}

/// Validation failures for an ingested intent.
#[derive(Debug, Clone)]
pub enum IntentError {
    /// The text was not parseable JSON after fence stripping.
    Parse(String),
    /// A retained step violated a requires-locator / requires-value rule.
    InvalidStep {
        index: usize,
        message: String,
    },
    /// The intent contains no usable steps.
    Empty,
}

impl fmt::Display for IntentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntentError::Parse(msg) => write!(f, "intent parse failure: {}", msg),
            IntentError::InvalidStep { index, message } => {
                write!(f, "invalid step {}: {}", index, message)
            }
            IntentError::Empty => write!(f, "intent has no usable steps"),
        }
    }
}

impl Error for IntentError {}

/// Strip Markdown code fences (```json … ``` or ``` … ```) around a JSON
/// payload, returning the inner text.
pub fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let after_fence = &trimmed[3..];
    // Skip an optional language tag on the opening fence line.
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    match body.rfind("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

/// Leniently parse LLM output into a [`TestIntent`].
///
/// Fences are stripped, steps whose action keyword was unknown are filtered
/// out (one warning per dropped step), and the surviving steps are checked
/// against the requires-locator / requires-value rules. Unknown top-level
/// keys are ignored.
///
/// Returns the cleaned intent plus the warnings recorded while cleaning.
///
/// # Example
///
/// ```rust
/// use qaforge::intent::parse_lenient;
///
/// let raw = r#"{"className": "P", "testClassName": "T", "steps": [
///   {"action": "NAVIGATE", "value": "https://example.com"},
///   {"action": "TELEPORT", "value": "nowhere"}
/// ]}"#;
/// let (intent, warnings) = parse_lenient(raw).unwrap();
/// assert_eq!(intent.steps.len(), 1);
/// assert_eq!(warnings.len(), 1);
/// ```
pub fn parse_lenient(text: &str) -> Result<(TestIntent, Vec<String>), IntentError> {
    let cleaned = strip_fences(text);
    let mut intent: TestIntent =
        serde_json::from_str(cleaned).map_err(|e| IntentError::Parse(e.to_string()))?;

    let mut warnings = Vec::new();
    let mut kept = Vec::with_capacity(intent.steps.len());
    for (index, step) in intent.steps.into_iter().enumerate() {
        if step.action.is_none() {
            let warning = format!("skipping step {} with unknown action", index);
            log::warn!("{}", warning);
            warnings.push(warning);
            continue;
        }
        kept.push(step);
    }
    intent.steps = kept;

    validate(&intent)?;
    Ok((intent, warnings))
}

/// Enforce the structural rules on a parsed intent: at least one step, and
/// every step's locator/value requirements satisfied.
pub fn validate(intent: &TestIntent) -> Result<(), IntentError> {
    if intent.steps.is_empty() {
        return Err(IntentError::Empty);
    }
    for (index, step) in intent.steps.iter().enumerate() {
        let action = match step.action {
            Some(action) => action,
            None => {
                return Err(IntentError::InvalidStep {
                    index,
                    message: "step has no action".to_string(),
                })
            }
        };
        if action.requires_locator() && step.locator.is_none() {
            return Err(IntentError::InvalidStep {
                index,
                message: format!("{} requires a locator", action.keyword()),
            });
        }
        if action.requires_value()
            && step.value.as_deref().map(str::trim).unwrap_or("").is_empty()
        {
            return Err(IntentError::InvalidStep {
                index,
                message: format!("{} requires a value", action.keyword()),
            });
        }
    }
    Ok(())
}

/// Renderer contract: turn a validated intent into executable test source.
///
/// Rendering must be a pure function of intent + template: re-rendering the
/// same intent yields byte-identical output. The core stores the rendered
/// source without inspecting it.
pub trait IntentRenderer: Send + Sync {
    /// Render `intent` into source text for the target class name embedded
    /// in the intent.
    fn render(&self, intent: &TestIntent) -> Result<String, Box<dyn Error + Send + Sync>>;

    /// File extension for rendered artifacts (e.g. `"java"`, `"ts"`).
    fn file_extension(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_intent() -> TestIntent {
        TestIntent {
            class_name: "LoginPage".to_string(),
            test_class_name: "LoginTest".to_string(),
            steps: vec![
                IntentStep::new(IntentAction::Navigate).with_value("https://www.saucedemo.com"),
                IntentStep::new(IntentAction::Fill)
                    .with_locator("testid=username")
                    .with_value("standard_user"),
                IntentStep::new(IntentAction::Click).with_locator("testid=login-button"),
                IntentStep::new(IntentAction::AssertUrl).with_value(".*inventory.*"),
            ],
        }
    }

    #[test]
    fn locator_parse_normalizes_bare_to_css() {
        let bare = Locator::parse("#login").unwrap();
        assert_eq!(bare.strategy, LocatorStrategy::Css);
        assert_eq!(bare.value, "#login");

        let testid = Locator::parse("testid=login-button").unwrap();
        assert_eq!(testid.strategy, LocatorStrategy::Testid);

        // Unknown prefix stays a CSS selector, embedded '=' preserved.
        let weird = Locator::parse("input[name=q]").unwrap();
        assert_eq!(weird.strategy, LocatorStrategy::Css);
        assert_eq!(weird.value, "input[name=q]");

        assert!(Locator::parse("").is_none());
        assert!(Locator::parse("   ").is_none());
        assert!(Locator::parse("css=").is_none());
    }

    #[test]
    fn intent_round_trips_semantically() {
        let intent = sample_intent();
        let json = serde_json::to_string(&intent).unwrap();
        let back: TestIntent = serde_json::from_str(&json).unwrap();
        assert_eq!(intent, back);
        // Wire keys are camelCase.
        assert!(json.contains("\"className\""));
        assert!(json.contains("\"testClassName\""));
    }

    #[test]
    fn unknown_actions_drop_out_idempotently() {
        let raw = r#"{"className":"P","testClassName":"T","steps":[
            {"action":"NAVIGATE","value":"https://example.com"},
            {"action":"TELEPORT","locator":"css=#x"},
            {"action":"CLICK","locator":"testid=go"}
        ]}"#;
        let (first, warnings) = parse_lenient(raw).unwrap();
        assert_eq!(first.steps.len(), 2);
        assert_eq!(warnings.len(), 1);

        // Re-serializing and re-parsing must not drop anything further.
        let reserialized = serde_json::to_string(&first).unwrap();
        let (second, warnings) = parse_lenient(&reserialized).unwrap();
        assert_eq!(first, second);
        assert!(warnings.is_empty());
    }

    #[test]
    fn unknown_top_level_keys_are_ignored() {
        let raw = r#"{"className":"P","testClassName":"T","schemaVersion":3,
            "steps":[{"action":"RELOAD"}]}"#;
        let (intent, _) = parse_lenient(raw).unwrap();
        assert_eq!(intent.steps.len(), 1);
    }

    #[test]
    fn fence_stripping_handles_language_tags() {
        let fenced = "```json\n{\"a\":1}\n```";
        assert_eq!(strip_fences(fenced), "{\"a\":1}");
        let plain_fence = "```\n{\"a\":1}\n```";
        assert_eq!(strip_fences(plain_fence), "{\"a\":1}");
        assert_eq!(strip_fences("{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn validate_rejects_missing_locator_and_value() {
        let missing_locator = TestIntent {
            class_name: "P".to_string(),
            test_class_name: "T".to_string(),
            steps: vec![IntentStep::new(IntentAction::Click)],
        };
        assert!(matches!(
            validate(&missing_locator),
            Err(IntentError::InvalidStep { index: 0, .. })
        ));

        let missing_value = TestIntent {
            class_name: "P".to_string(),
            test_class_name: "T".to_string(),
            steps: vec![IntentStep::new(IntentAction::Navigate)],
        };
        assert!(matches!(
            validate(&missing_value),
            Err(IntentError::InvalidStep { index: 0, .. })
        ));

        assert!(validate(&sample_intent()).is_ok());
    }

    #[test]
    fn empty_intent_is_rejected() {
        let raw = r#"{"className":"P","testClassName":"T","steps":[{"action":"FLY"}]}"#;
        assert!(matches!(parse_lenient(raw), Err(IntentError::Empty)));
    }
}
