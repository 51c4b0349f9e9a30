//! Git-hosting collaborator contract.
//!
//! The approval engine's post-decision routing and the `git_workflow` tool
//! drive a hosted repository through this trait: branch, commit, open a
//! pull request, validate connectivity. Provider specifics (auth, API
//! shapes) stay behind the implementation.

use async_trait::async_trait;
use std::collections::HashMap;
use std::error::Error;
use std::sync::Mutex;

/// A commit to be pushed onto a branch: path → file contents.
pub type CommitFiles = HashMap<String, String>;

/// Operations the core needs from a git host.
#[async_trait]
pub trait GitHost: Send + Sync {
    async fn create_branch(
        &self,
        branch: &str,
        from: &str,
    ) -> Result<(), Box<dyn Error + Send + Sync>>;

    async fn branch_exists(&self, branch: &str) -> Result<bool, Box<dyn Error + Send + Sync>>;

    async fn commit(
        &self,
        branch: &str,
        message: &str,
        files: CommitFiles,
    ) -> Result<String, Box<dyn Error + Send + Sync>>;

    /// Open a pull request; returns its URL or identifier.
    async fn open_pr(
        &self,
        branch: &str,
        title: &str,
        body: &str,
    ) -> Result<String, Box<dyn Error + Send + Sync>>;

    async fn delete_branch(&self, branch: &str) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Verify credentials/connectivity without mutating anything.
    async fn validate(&self) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// Record of one mutation applied to the [`InMemoryGitHost`].
#[derive(Debug, Clone, PartialEq)]
pub enum GitOp {
    CreateBranch { branch: String, from: String },
    Commit { branch: String, message: String },
    OpenPr { branch: String, title: String },
    DeleteBranch { branch: String },
}

/// In-memory host for tests: records every operation in order.
pub struct InMemoryGitHost {
    ops: Mutex<Vec<GitOp>>,
    branches: Mutex<Vec<String>>,
}

impl InMemoryGitHost {
    pub fn new() -> Self {
        Self {
            ops: Mutex::new(Vec::new()),
            branches: Mutex::new(vec!["main".to_string()]),
        }
    }

    /// Ordered mutation log.
    pub fn operations(&self) -> Vec<GitOp> {
        self.ops
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn record(&self, op: GitOp) {
        self.ops
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(op);
    }
}

impl Default for InMemoryGitHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GitHost for InMemoryGitHost {
    async fn create_branch(
        &self,
        branch: &str,
        from: &str,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut branches = self
            .branches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if branches.iter().any(|b| b == branch) {
            return Err(format!("branch '{}' already exists", branch).into());
        }
        branches.push(branch.to_string());
        drop(branches);
        self.record(GitOp::CreateBranch {
            branch: branch.to_string(),
            from: from.to_string(),
        });
        Ok(())
    }

    async fn branch_exists(&self, branch: &str) -> Result<bool, Box<dyn Error + Send + Sync>> {
        Ok(self
            .branches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .any(|b| b == branch))
    }

    async fn commit(
        &self,
        branch: &str,
        message: &str,
        _files: CommitFiles,
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        if !self.branch_exists(branch).await? {
            return Err(format!("branch '{}' does not exist", branch).into());
        }
        self.record(GitOp::Commit {
            branch: branch.to_string(),
            message: message.to_string(),
        });
        Ok(format!("commit-{}", self.operations().len()))
    }

    async fn open_pr(
        &self,
        branch: &str,
        title: &str,
        _body: &str,
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        self.record(GitOp::OpenPr {
            branch: branch.to_string(),
            title: title.to_string(),
        });
        Ok(format!("https://git.example/pr/{}", self.operations().len()))
    }

    async fn delete_branch(&self, branch: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.branches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain(|b| b != branch);
        self.record(GitOp::DeleteBranch {
            branch: branch.to_string(),
        });
        Ok(())
    }

    async fn validate(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }
}
