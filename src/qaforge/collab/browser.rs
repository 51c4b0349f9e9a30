//! Browser-driver collaborator contract.
//!
//! The driver is a black box to the core: it executes single primitive
//! commands (navigate, fill, click, assert, …) against a live page context
//! and reports success or failure. The `execute_test` tool walks a
//! [`TestIntent`](crate::qaforge::intent::TestIntent) step by step,
//! translating each step into one [`BrowserCommand`].

use async_trait::async_trait;
use std::error::Error;
use std::fmt;
use std::sync::Mutex;

/// One primitive command issued to the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum BrowserCommand {
    Navigate { url: String },
    Fill { locator: String, value: String },
    Click { locator: String },
    ClickRole { role: String },
    PressKey { key: String },
    SelectOption { locator: String, value: String },
    WaitForSelector { locator: String, timeout_ms: Option<u64> },
    WaitForUrl { pattern: String, timeout_ms: Option<u64> },
    AssertUrl { pattern: String },
    AssertText { locator: String, expected: String },
    AssertTitle { expected: String },
    AssertCount { locator: String, expected: usize },
    AssertValue { locator: String, expected: String },
    AssertVisible { locator: String },
    Reload,
}

impl fmt::Display for BrowserCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrowserCommand::Navigate { url } => write!(f, "navigate {}", url),
            BrowserCommand::Fill { locator, .. } => write!(f, "fill {}", locator),
            BrowserCommand::Click { locator } => write!(f, "click {}", locator),
            BrowserCommand::ClickRole { role } => write!(f, "click role {}", role),
            BrowserCommand::PressKey { key } => write!(f, "press {}", key),
            BrowserCommand::SelectOption { locator, .. } => write!(f, "select {}", locator),
            BrowserCommand::WaitForSelector { locator, .. } => write!(f, "wait for {}", locator),
            BrowserCommand::WaitForUrl { pattern, .. } => write!(f, "wait for url {}", pattern),
            BrowserCommand::AssertUrl { pattern } => write!(f, "assert url {}", pattern),
            BrowserCommand::AssertText { locator, .. } => write!(f, "assert text {}", locator),
            BrowserCommand::AssertTitle { .. } => write!(f, "assert title"),
            BrowserCommand::AssertCount { locator, .. } => write!(f, "assert count {}", locator),
            BrowserCommand::AssertValue { locator, .. } => write!(f, "assert value {}", locator),
            BrowserCommand::AssertVisible { locator } => write!(f, "assert visible {}", locator),
            BrowserCommand::Reload => write!(f, "reload"),
        }
    }
}

/// A live page context owned by the driver.
///
/// One context maps to one isolated browser page/session. Contexts are not
/// shared between executions.
#[async_trait]
pub trait BrowserContext: Send + Sync {
    /// Execute one command; errors carry the driver's failure message
    /// (e.g. `"Element not found"`).
    async fn execute(&self, command: BrowserCommand) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Current page HTML (used by self-healing failure analysis).
    async fn content(&self) -> Result<String, Box<dyn Error + Send + Sync>>;

    /// Screenshot bytes (PNG); drivers may return an empty vec when
    /// screenshots are unsupported.
    async fn screenshot(&self) -> Result<Vec<u8>, Box<dyn Error + Send + Sync>>;

    /// Release the page/session.
    async fn close(&self) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// Creates page contexts.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn new_context(
        &self,
    ) -> Result<Box<dyn BrowserContext>, Box<dyn Error + Send + Sync>>;
}

// ── Scripted driver for tests ───────────────────────────────────────────

/// Behavior script for [`ScriptedBrowser`]: commands whose display string
/// contains any listed fragment fail with the paired message.
#[derive(Debug, Clone, Default)]
pub struct BrowserScript {
    pub failures: Vec<(String, String)>,
    pub page_html: String,
}

/// Test driver that records every command and fails on scripted matches.
pub struct ScriptedBrowser {
    script: BrowserScript,
    commands: std::sync::Arc<Mutex<Vec<String>>>,
}

impl ScriptedBrowser {
    pub fn new(script: BrowserScript) -> Self {
        Self {
            script,
            commands: std::sync::Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Display strings of every command executed so far, across contexts.
    pub fn executed(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

struct ScriptedContext {
    script: BrowserScript,
    commands: std::sync::Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl BrowserContext for ScriptedContext {
    async fn execute(&self, command: BrowserCommand) -> Result<(), Box<dyn Error + Send + Sync>> {
        let rendered = command.to_string();
        self.commands
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(rendered.clone());
        for (fragment, message) in &self.script.failures {
            if rendered.contains(fragment) {
                return Err(message.clone().into());
            }
        }
        Ok(())
    }

    async fn content(&self) -> Result<String, Box<dyn Error + Send + Sync>> {
        Ok(self.script.page_html.clone())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, Box<dyn Error + Send + Sync>> {
        Ok(Vec::new())
    }

    async fn close(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }
}

#[async_trait]
impl BrowserDriver for ScriptedBrowser {
    async fn new_context(
        &self,
    ) -> Result<Box<dyn BrowserContext>, Box<dyn Error + Send + Sync>> {
        // All contexts share the recorder so tests can assert global order.
        Ok(Box::new(ScriptedContext {
            script: self.script.clone(),
            commands: std::sync::Arc::clone(&self.commands),
        }))
    }
}
