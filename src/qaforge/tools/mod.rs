//! Concrete tools.
//!
//! One file per concern, each registering one or more capabilities by
//! action type. [`standard_registry`] wires the full set over the supplied
//! collaborators — the composition a production deployment starts from.

pub mod ai;
pub mod approval_tool;
pub mod browser_tools;
pub mod files;
pub mod git_tools;
pub mod healing;
pub mod registry_tools;
pub mod story;

pub use ai::{AnalyzeFailureTool, GenerateTestIntentTool, SuggestLocatorFixTool};
pub use approval_tool::RequestApprovalTool;
pub use browser_tools::{CapturePageHtmlTool, ExecuteTestTool};
pub use files::{ReadFileTool, WriteTestFileTool};
pub use git_tools::GitWorkflowTool;
pub use healing::ExtractBrokenLocatorTool;
pub use registry_tools::{DiscoverLocatorTool, QueryElementRegistryTool, UpdateElementRegistryTool};
pub use story::FetchStoryTool;

use crate::qaforge::approval::ApprovalEngine;
use crate::qaforge::collab::browser::BrowserDriver;
use crate::qaforge::collab::git::GitHost;
use crate::qaforge::collab::issue_tracker::IssueTracker;
use crate::qaforge::element_registry::ElementRegistry;
use crate::qaforge::gateway::LlmGateway;
use crate::qaforge::tool_protocol::ToolRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Build a registry holding the full standard tool set.
pub fn standard_registry(
    tracker: Arc<dyn IssueTracker>,
    driver: Arc<dyn BrowserDriver>,
    git: Arc<dyn GitHost>,
    gateway: Arc<LlmGateway>,
    approvals: Arc<ApprovalEngine>,
    elements: Arc<RwLock<ElementRegistry>>,
    drafts_root: PathBuf,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(FetchStoryTool::new(tracker)));
    registry.register(Arc::new(QueryElementRegistryTool::new(Arc::clone(&elements))));
    registry.register(Arc::new(DiscoverLocatorTool::new(Arc::clone(&elements))));
    registry.register(Arc::new(UpdateElementRegistryTool::new(Arc::clone(&elements))));
    registry.register(Arc::new(GenerateTestIntentTool::new(
        Arc::clone(&gateway),
        Arc::clone(&elements),
    )));
    registry.register(Arc::new(SuggestLocatorFixTool::new(
        Arc::clone(&gateway),
        Arc::clone(&elements),
    )));
    registry.register(Arc::new(AnalyzeFailureTool::new(gateway)));
    registry.register(Arc::new(ReadFileTool::new(drafts_root.clone())));
    registry.register(Arc::new(WriteTestFileTool::new(drafts_root)));
    registry.register(Arc::new(ExecuteTestTool::new(Arc::clone(&driver))));
    registry.register(Arc::new(CapturePageHtmlTool::new(driver)));
    registry.register(Arc::new(ExtractBrokenLocatorTool::new()));
    registry.register(Arc::new(GitWorkflowTool::new(git)));
    registry.register(Arc::new(RequestApprovalTool::new(approvals)));
    registry
}
