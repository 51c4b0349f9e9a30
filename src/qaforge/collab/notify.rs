//! Notification collaborator contract.
//!
//! Notifications are best-effort and fire-and-forget: a failed delivery is
//! logged, never propagated, and never blocks an execution. The webhook
//! implementation spawns a detached task per notification so callers return
//! immediately.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Mutex;

/// Delivers one payload to one channel. Must not fail the caller.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, channel: &str, payload: Value);
}

/// Drops every notification.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _channel: &str, _payload: Value) {}
}

/// Posts notifications to per-channel webhook URLs, detached from the
/// caller's task.
pub struct WebhookNotifier {
    client: reqwest::Client,
    base_url: String,
}

impl WebhookNotifier {
    /// `base_url` is joined with the channel name: `{base_url}/{channel}`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, channel: &str, payload: Value) {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), channel);
        let request = self.client.post(&url).json(&payload);
        // Fire and forget: delivery happens on a detached task.
        tokio::spawn(async move {
            if let Err(err) = request.send().await {
                log::warn!("notification delivery to {} failed: {}", url, err);
            }
        });
    }
}

/// Records notifications for tests.
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, Value)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<(String, Value)> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Default for RecordingNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, channel: &str, payload: Value) {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((channel.to_string(), payload));
    }
}
