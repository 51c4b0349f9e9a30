//! Provider-agnostic LLM completion contract.
//!
//! The core never talks to a vendor directly: every call flows through the
//! [`LlmGateway`](crate::qaforge::gateway::LlmGateway), which holds an
//! `Arc<dyn LlmProvider>`. The trait deliberately models a provider as an
//! opaque text-in/text-out service that reports token counts and latency —
//! conversation bookkeeping, retries, and budgeting all live above it.
//!
//! Two implementations ship with the crate:
//!
//! - [`HttpProvider`] — a minimal `reqwest`-based client speaking an
//!   OpenAI-compatible chat-completions shape, for running against a real
//!   endpoint.
//! - [`ScriptedProvider`] — a deterministic test double that replays a queue
//!   of canned responses.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::VecDeque;
use std::error::Error;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

/// A single completion returned by a provider.
#[derive(Debug, Clone)]
pub struct Completion {
    /// The raw completion text.
    pub text: String,
    /// Prompt tokens billed by the provider.
    pub prompt_tokens: usize,
    /// Completion tokens billed by the provider.
    pub completion_tokens: usize,
    /// Wall-clock latency of the provider round-trip.
    pub latency: Duration,
}

impl Completion {
    /// Total billed tokens for this call.
    pub fn total_tokens(&self) -> usize {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Errors raised by provider implementations.
#[derive(Debug)]
pub enum ProviderError {
    /// Transport-level failure (connect, TLS, timeout).
    Transport(String),
    /// The endpoint answered with a non-success status.
    Status(u16, String),
    /// The response body could not be decoded into a completion.
    MalformedResponse(String),
    /// A scripted provider ran out of queued responses.
    Exhausted,
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Transport(msg) => write!(f, "provider transport error: {}", msg),
            ProviderError::Status(code, body) => {
                write!(f, "provider returned status {}: {}", code, body)
            }
            ProviderError::MalformedResponse(msg) => {
                write!(f, "malformed provider response: {}", msg)
            }
            ProviderError::Exhausted => write!(f, "scripted provider has no responses left"),
        }
    }
}

impl Error for ProviderError {}

/// Trait-driven abstraction over a concrete LLM vendor.
///
/// Implementations must be thread-safe (`Send + Sync`) so a single provider
/// handle can serve many concurrent executions.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Request one completion for `prompt`.
    ///
    /// Implementations translate the request into the vendor wire format and
    /// return the response in the uniform [`Completion`] shape, including
    /// the vendor-reported token counts.
    async fn complete(
        &self,
        prompt: &str,
        max_tokens: usize,
        temperature: f64,
    ) -> Result<Completion, ProviderError>;

    /// Identifier of the upstream model (e.g. `"gpt-4.1-mini"`), used for
    /// cost lookup and usage records.
    fn model_name(&self) -> &str;
}

// ── HTTP-backed provider ────────────────────────────────────────────────

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    content: String,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: usize,
    #[serde(default)]
    completion_tokens: usize,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

/// Minimal chat-completions client for OpenAI-compatible endpoints.
///
/// # Example
///
/// ```rust,no_run
/// use qaforge::llm_provider::HttpProvider;
///
/// let provider = HttpProvider::new(
///     "https://api.example.com/v1/chat/completions",
///     &std::env::var("QAFORGE_LLM_KEY").unwrap_or_default(),
///     "gpt-4.1-mini",
/// );
/// ```
pub struct HttpProvider {
    endpoint: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl HttpProvider {
    /// Create a client for `endpoint` authenticating with `api_key`.
    pub fn new(endpoint: impl Into<String>, api_key: &str, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.to_string(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Create a client whose API key is resolved from the secrets store.
    pub async fn from_secrets(
        endpoint: impl Into<String>,
        secrets: &dyn crate::qaforge::collab::secrets::SecretsStore,
        key_name: &str,
        model: impl Into<String>,
    ) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let api_key = secrets.get(key_name).await?;
        Ok(Self::new(endpoint, &api_key, model))
    }
}

#[async_trait]
impl LlmProvider for HttpProvider {
    async fn complete(
        &self,
        prompt: &str,
        max_tokens: usize,
        temperature: f64,
    ) -> Result<Completion, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": max_tokens,
            "temperature": temperature,
        });

        let started = std::time::Instant::now();
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        if !status.is_success() {
            if log::log_enabled!(log::Level::Error) {
                log::error!(
                    "HttpProvider::complete: endpoint {} returned {}: {}",
                    self.endpoint,
                    status,
                    text
                );
            }
            return Err(ProviderError::Status(status.as_u16(), text));
        }

        let wire: WireResponse = serde_json::from_str(&text)
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;
        let choice = wire
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::MalformedResponse("empty choices array".to_string()))?;
        let usage = wire.usage.unwrap_or(WireUsage {
            prompt_tokens: 0,
            completion_tokens: 0,
        });

        Ok(Completion {
            text: choice.message.content,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            latency: started.elapsed(),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ── Scripted provider for tests ─────────────────────────────────────────

/// Deterministic provider that replays queued responses in order.
///
/// Each queued entry becomes one [`Completion`]; once the queue is empty
/// further calls fail with [`ProviderError::Exhausted`]. Token counts are
/// synthesized from text lengths so budget accounting stays exercised in
/// tests.
///
/// # Example
///
/// ```rust
/// use qaforge::llm_provider::ScriptedProvider;
///
/// let provider = ScriptedProvider::new("mock-model")
///     .with_response("first answer")
///     .with_response("second answer");
/// ```
pub struct ScriptedProvider {
    model: String,
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedProvider {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            responses: Mutex::new(VecDeque::new()),
        }
    }

    /// Queue one response (builder pattern).
    pub fn with_response(self, text: impl Into<String>) -> Self {
        self.push_response(text);
        self
    }

    /// Queue one response on a shared handle.
    pub fn push_response(&self, text: impl Into<String>) {
        self.responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(text.into());
    }

    /// Number of responses still queued.
    pub fn remaining(&self) -> usize {
        self.responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(
        &self,
        prompt: &str,
        _max_tokens: usize,
        _temperature: f64,
    ) -> Result<Completion, ProviderError> {
        let next = self
            .responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front();
        match next {
            Some(text) => Ok(Completion {
                // Rough 4-chars-per-token synthesis keeps cost math nonzero.
                prompt_tokens: prompt.len() / 4 + 1,
                completion_tokens: text.len() / 4 + 1,
                text,
                latency: Duration::from_millis(1),
            }),
            None => Err(ProviderError::Exhausted),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
