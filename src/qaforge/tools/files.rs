//! File tools over the drafts area.
//!
//! All paths are relative to a configured root; absolute paths and any
//! component that would escape the root (`..`) are rejected before touching
//! the filesystem. `write_test_file` additionally recognizes intent JSON
//! content and, when a renderer is attached, writes the rendered test
//! source next to the intent.

use crate::qaforge::intent::{self, IntentRenderer};
use crate::qaforge::tool_protocol::{
    ErrorKind, Tool, ToolOutcome, ToolParameter, ToolParameterType,
};
use async_trait::async_trait;
use serde_json::Value;
use std::error::Error;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Reject absolute paths and parent-directory escapes, returning the
/// resolved path under `root`.
fn resolve_under(root: &Path, relative: &str) -> Result<PathBuf, String> {
    let candidate = Path::new(relative);
    if candidate.is_absolute() {
        return Err(format!("absolute paths are not allowed: {}", relative));
    }
    for component in candidate.components() {
        match component {
            Component::ParentDir => {
                return Err(format!("path escapes the drafts root: {}", relative))
            }
            Component::Normal(_) | Component::CurDir => {}
            _ => return Err(format!("unsupported path component in: {}", relative)),
        }
    }
    Ok(root.join(candidate))
}

/// Reads a file from the drafts area.
pub struct ReadFileTool {
    root: PathBuf,
}

impl ReadFileTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn action_type(&self) -> &str {
        "read_file"
    }

    fn name(&self) -> &str {
        "Read File"
    }

    fn description(&self) -> &str {
        "Read a file from the drafts area. Path is relative to the drafts root."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::new("path", ToolParameterType::String)
            .with_description("Relative path under the drafts root")
            .required()]
    }

    async fn execute(&self, params: Value) -> Result<ToolOutcome, Box<dyn Error + Send + Sync>> {
        let relative = params
            .get("path")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let path = match resolve_under(&self.root, relative) {
            Ok(path) => path,
            Err(message) => {
                return Ok(ToolOutcome::failure(ErrorKind::InvalidParameters, message))
            }
        };
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(ToolOutcome::success()
                .with_field("path", Value::String(relative.to_string()))
                .with_field("content", Value::String(content))),
            Err(err) => Ok(ToolOutcome::failure(
                ErrorKind::ToolError,
                format!("cannot read '{}': {}", relative, err),
            )),
        }
    }
}

/// Writes generated test content into the drafts area.
pub struct WriteTestFileTool {
    root: PathBuf,
    renderer: Option<Arc<dyn IntentRenderer>>,
}

impl WriteTestFileTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            renderer: None,
        }
    }

    /// Attach a renderer; intent JSON content then also produces a rendered
    /// source artifact next to the intent file (builder pattern).
    pub fn with_renderer(mut self, renderer: Arc<dyn IntentRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }
}

#[async_trait]
impl Tool for WriteTestFileTool {
    fn action_type(&self) -> &str {
        "write_test_file"
    }

    fn name(&self) -> &str {
        "Write Test File"
    }

    fn description(&self) -> &str {
        "Write generated test content (intent JSON or source) into the drafts area."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::new("path", ToolParameterType::String)
                .with_description("Relative path under the drafts root")
                .required(),
            ToolParameter::new("content", ToolParameterType::String)
                .with_description("File contents to write")
                .required(),
        ]
    }

    async fn execute(&self, params: Value) -> Result<ToolOutcome, Box<dyn Error + Send + Sync>> {
        let relative = params
            .get("path")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let content = params
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let path = match resolve_under(&self.root, relative) {
            Ok(path) => path,
            Err(message) => {
                return Ok(ToolOutcome::failure(ErrorKind::InvalidParameters, message))
            }
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content.as_bytes()).await?;
        let mut outcome =
            ToolOutcome::success().with_field("path", Value::String(relative.to_string()));

        // Intent content with a renderer attached also materializes source.
        if let Some(renderer) = &self.renderer {
            if let Ok((parsed, _)) = intent::parse_lenient(content) {
                match renderer.render(&parsed) {
                    Ok(source) => {
                        let rendered_path =
                            path.with_extension(renderer.file_extension().to_string());
                        tokio::fs::write(&rendered_path, source.as_bytes()).await?;
                        outcome = outcome.with_field(
                            "rendered_path",
                            Value::String(
                                rendered_path
                                    .strip_prefix(&self.root)
                                    .unwrap_or(&rendered_path)
                                    .display()
                                    .to_string(),
                            ),
                        );
                    }
                    Err(err) => {
                        log::warn!("renderer failed for '{}': {}", relative, err);
                        outcome =
                            outcome.with_field("render_error", Value::String(err.to_string()));
                    }
                }
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qaforge::intent::TestIntent;

    struct StubRenderer;

    impl IntentRenderer for StubRenderer {
        fn render(&self, intent: &TestIntent) -> Result<String, Box<dyn Error + Send + Sync>> {
            Ok(format!("// {} steps\n", intent.steps.len()))
        }
        fn file_extension(&self) -> &str {
            "spec.ts"
        }
    }

    #[tokio::test]
    async fn write_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let write = WriteTestFileTool::new(dir.path());
        let read = ReadFileTool::new(dir.path());

        let outcome = write
            .execute(serde_json::json!({"path": "drafts/login.json", "content": "{}"}))
            .await
            .unwrap();
        assert!(outcome.success);

        let outcome = read
            .execute(serde_json::json!({"path": "drafts/login.json"}))
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.field("content"), Some(&Value::String("{}".into())));
    }

    #[tokio::test]
    async fn traversal_and_absolute_paths_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let write = WriteTestFileTool::new(dir.path());

        let outcome = write
            .execute(serde_json::json!({"path": "../evil.txt", "content": "x"}))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(ErrorKind::InvalidParameters));

        let outcome = write
            .execute(serde_json::json!({"path": "/etc/passwd", "content": "x"}))
            .await
            .unwrap();
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn intent_content_is_also_rendered() {
        let dir = tempfile::tempdir().unwrap();
        let write = WriteTestFileTool::new(dir.path()).with_renderer(Arc::new(StubRenderer));

        let intent_json = r#"{"className":"P","testClassName":"T","steps":[
            {"action":"NAVIGATE","value":"https://example.com"}]}"#;
        let outcome = write
            .execute(serde_json::json!({"path": "drafts/p.json", "content": intent_json}))
            .await
            .unwrap();
        assert!(outcome.success);
        assert!(outcome.field("rendered_path").is_some());
        assert!(dir.path().join("drafts/p.spec.ts").exists());
    }

    #[tokio::test]
    async fn read_missing_file_is_a_tool_error() {
        let dir = tempfile::tempdir().unwrap();
        let read = ReadFileTool::new(dir.path());
        let outcome = read
            .execute(serde_json::json!({"path": "nope.txt"}))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(ErrorKind::ToolError));
    }
}
