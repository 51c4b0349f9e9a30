//! Issue-tracker collaborator contract.
//!
//! The core needs exactly one operation from a tracker: fetch a story by
//! key. Everything else (auth, pagination, custom fields) stays behind the
//! implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::sync::Mutex;

/// A user story as the generator agent consumes it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Story {
    /// Tracker key, e.g. `"SCRUM-7"`.
    pub key: String,
    pub summary: String,
    #[serde(default)]
    pub description: String,
    /// Acceptance criteria, one entry per criterion.
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub components: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
}

/// Fetches stories by key.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn fetch_story(&self, key: &str) -> Result<Story, Box<dyn Error + Send + Sync>>;
}

/// In-memory tracker for tests and offline runs.
///
/// # Example
///
/// ```rust
/// use qaforge::collab::issue_tracker::{InMemoryTracker, Story};
///
/// let tracker = InMemoryTracker::new().with_story(Story {
///     key: "SCRUM-7".to_string(),
///     summary: "Implement user login".to_string(),
///     description: String::new(),
///     acceptance_criteria: vec![],
///     labels: vec![],
///     components: vec![],
///     assignee: None,
/// });
/// ```
pub struct InMemoryTracker {
    stories: Mutex<HashMap<String, Story>>,
}

impl InMemoryTracker {
    pub fn new() -> Self {
        Self {
            stories: Mutex::new(HashMap::new()),
        }
    }

    /// Seed a story (builder pattern).
    pub fn with_story(self, story: Story) -> Self {
        self.stories
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(story.key.clone(), story);
        self
    }
}

impl Default for InMemoryTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IssueTracker for InMemoryTracker {
    async fn fetch_story(&self, key: &str) -> Result<Story, Box<dyn Error + Send + Sync>> {
        self.stories
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
            .ok_or_else(|| format!("story '{}' not found", key).into())
    }
}
