//! Human-in-the-loop approval workflow.
//!
//! Sensitive actions (committing generated tests, opening PRs, applying
//! self-healing fixes) pause the owning execution until a reviewer decides.
//! The engine persists each [`ApprovalRequest`] with a derived expiry,
//! publishes decisions over per-request watch channels so suspended
//! executors resume promptly, and runs a sweeper that expires anything
//! still pending past its deadline.
//!
//! State machine: `PENDING → APPROVED | REJECTED | EXPIRED | CANCELLED`.
//! Transitions are idempotent at the edge — a second decision on the same
//! request yields a precondition error instead of silently overwriting.
//!
//! Each request type carries a routing policy describing its post-decision
//! side effects: whether approved content is materialized to a file, and
//! whether a Git workflow (branch → commit → PR) may be triggered for it.

use crate::qaforge::collab::git::{CommitFiles, GitHost};
use crate::qaforge::collab::notify::Notifier;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

/// Kinds of approval gates the agents produce.
///
/// `TEST_MODIFICATION` and `TEST_DELETION` are deprecated: no active agent
/// path produces them, but previously persisted requests must still
/// deserialize, so the variants remain on the wire with an empty routing
/// policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalRequestType {
    /// New generated test draft to review.
    TestGeneration,
    /// Agent-verified locator fix; approval syncs the fixed artifact into
    /// the drafts area.
    SelfHealingFix,
    /// Agent exhausted attempts; approval acknowledges, human edits by hand.
    SelfHealingManual,
    /// Agent-verified stability fix already committed; approval is the PR
    /// review gate.
    FlakyFix,
    /// Agent exhausted attempts on a flaky test; no file sync on approval.
    FlakyManual,
    /// Deprecated; kept for wire compatibility.
    TestModification,
    /// Deprecated; kept for wire compatibility.
    TestDeletion,
}

/// Post-decision side-effect policy for a request type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingPolicy {
    /// Materialize the approved content to its target file path.
    pub materialize_to_file: bool,
    /// The request is eligible for the Git workflow trigger.
    pub git_workflow_eligible: bool,
}

impl ApprovalRequestType {
    /// The side-effect policy applied after a decision.
    pub fn routing_policy(&self) -> RoutingPolicy {
        match self {
            ApprovalRequestType::TestGeneration => RoutingPolicy {
                materialize_to_file: true,
                git_workflow_eligible: true,
            },
            ApprovalRequestType::SelfHealingFix => RoutingPolicy {
                materialize_to_file: true,
                git_workflow_eligible: true,
            },
            // Exhausted-attempt requests never sync files; a human edits.
            ApprovalRequestType::SelfHealingManual | ApprovalRequestType::FlakyManual => {
                RoutingPolicy {
                    materialize_to_file: false,
                    git_workflow_eligible: false,
                }
            }
            // The fix is already committed; approval gates the PR only.
            ApprovalRequestType::FlakyFix => RoutingPolicy {
                materialize_to_file: false,
                git_workflow_eligible: true,
            },
            ApprovalRequestType::TestModification | ApprovalRequestType::TestDeletion => {
                RoutingPolicy {
                    materialize_to_file: false,
                    git_workflow_eligible: false,
                }
            }
        }
    }

    /// Stable label for events and logs.
    pub fn label(&self) -> &'static str {
        match self {
            ApprovalRequestType::TestGeneration => "TEST_GENERATION",
            ApprovalRequestType::SelfHealingFix => "SELF_HEALING_FIX",
            ApprovalRequestType::SelfHealingManual => "SELF_HEALING_MANUAL",
            ApprovalRequestType::FlakyFix => "FLAKY_FIX",
            ApprovalRequestType::FlakyManual => "FLAKY_MANUAL",
            ApprovalRequestType::TestModification => "TEST_MODIFICATION",
            ApprovalRequestType::TestDeletion => "TEST_DELETION",
        }
    }
}

/// Lifecycle state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    Cancelled,
}

impl ApprovalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }

    /// Stable label for events and logs.
    pub fn label(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "PENDING",
            ApprovalStatus::Approved => "APPROVED",
            ApprovalStatus::Rejected => "REJECTED",
            ApprovalStatus::Expired => "EXPIRED",
            ApprovalStatus::Cancelled => "CANCELLED",
        }
    }
}

/// A persisted pause point awaiting a human decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub request_type: ApprovalRequestType,
    pub status: ApprovalStatus,
    /// The generated content under review (intent JSON, rendered source,
    /// or a fix description).
    pub content: String,
    /// SHA-256 hex digest of `content` at creation time, so reviewers and
    /// post-decision effects can detect drift.
    pub content_digest: String,
    pub requester: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub auto_execute_on_approval: bool,
    /// Target path (relative to the drafts root) for materialization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_file_path: Option<String>,
    /// Branch-name hint for the Git workflow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_branch_hint: Option<String>,
    /// Owning execution, when the request came from an agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
}

/// Creation parameters for a request.
#[derive(Debug, Clone)]
pub struct NewApprovalRequest {
    pub request_type: ApprovalRequestType,
    pub content: String,
    pub requester: String,
    pub auto_execute_on_approval: bool,
    pub target_file_path: Option<String>,
    pub git_branch_hint: Option<String>,
    pub execution_id: Option<String>,
    /// Per-request lifetime; the engine default applies when unset.
    pub timeout: Option<Duration>,
}

/// Errors raised by engine operations.
#[derive(Debug, Clone)]
pub enum ApprovalError {
    NotFound(String),
    /// The request already reached the given terminal status.
    AlreadyDecided(ApprovalStatus),
    /// Cancellation attempted by someone other than the requester.
    NotRequester { requester: String, caller: String },
}

impl fmt::Display for ApprovalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApprovalError::NotFound(id) => write!(f, "approval request '{}' not found", id),
            ApprovalError::AlreadyDecided(status) => {
                write!(f, "approval request already {}", status.label())
            }
            ApprovalError::NotRequester { requester, caller } => write!(
                f,
                "only requester '{}' may cancel (caller was '{}')",
                requester, caller
            ),
        }
    }
}

impl Error for ApprovalError {}

struct EngineState {
    requests: HashMap<String, ApprovalRequest>,
    publishers: HashMap<String, watch::Sender<ApprovalStatus>>,
}

/// The approval engine.
///
/// Shared via `Arc`; the executor blocks in
/// [`await_decision`](ApprovalEngine::await_decision) while a reviewer
/// drives [`approve`](ApprovalEngine::approve) /
/// [`reject`](ApprovalEngine::reject) from the outside.
pub struct ApprovalEngine {
    state: Mutex<EngineState>,
    timeout: Duration,
    drafts_root: Option<PathBuf>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl ApprovalEngine {
    /// Create an engine whose requests expire `timeout` after creation.
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: Mutex::new(EngineState {
                requests: HashMap::new(),
                publishers: HashMap::new(),
            }),
            timeout,
            drafts_root: None,
            notifier: None,
        }
    }

    /// Set the drafts root used when materializing approved content
    /// (builder pattern).
    pub fn with_drafts_root(mut self, root: PathBuf) -> Self {
        self.drafts_root = Some(root);
        self
    }

    /// Attach a best-effort notification channel; reviewers are pinged on
    /// creation and requesters on decision (builder pattern).
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    async fn notify(&self, channel: &str, payload: serde_json::Value) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(channel, payload).await;
        }
    }

    /// Create and persist a pending request; returns a snapshot.
    pub async fn create(&self, new: NewApprovalRequest) -> ApprovalRequest {
        let now = Utc::now();
        let timeout = new.timeout.unwrap_or(self.timeout);
        let expires_at = now
            + ChronoDuration::from_std(timeout).unwrap_or_else(|_| ChronoDuration::seconds(3600));
        let request = ApprovalRequest {
            id: Uuid::new_v4().to_string(),
            request_type: new.request_type,
            status: ApprovalStatus::Pending,
            content_digest: hex_digest(&new.content),
            content: new.content,
            requester: new.requester,
            reviewer: None,
            decision_notes: None,
            created_at: now,
            expires_at,
            reviewed_at: None,
            auto_execute_on_approval: new.auto_execute_on_approval,
            target_file_path: new.target_file_path,
            git_branch_hint: new.git_branch_hint,
            execution_id: new.execution_id,
        };

        {
            let mut state = self.state.lock().await;
            let (tx, _rx) = watch::channel(ApprovalStatus::Pending);
            state.publishers.insert(request.id.clone(), tx);
            state.requests.insert(request.id.clone(), request.clone());
        }
        log::info!(
            "approval request {} ({}) created, expires {}",
            request.id,
            request.request_type.label(),
            request.expires_at
        );
        self.notify(
            "approvals",
            serde_json::json!({
                "event": "approval_requested",
                "request_id": request.id,
                "request_type": request.request_type.label(),
                "requester": request.requester,
                "expires_at": request.expires_at.to_rfc3339(),
            }),
        )
        .await;
        request
    }

    /// Snapshot one request.
    pub async fn get(&self, id: &str) -> Option<ApprovalRequest> {
        self.state.lock().await.requests.get(id).cloned()
    }

    /// Snapshot of all requests still pending, oldest first.
    pub async fn list_pending(&self) -> Vec<ApprovalRequest> {
        let state = self.state.lock().await;
        let mut pending: Vec<ApprovalRequest> = state
            .requests
            .values()
            .filter(|r| r.status == ApprovalStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.created_at);
        pending
    }

    /// Approve a pending request.
    pub async fn approve(
        &self,
        id: &str,
        reviewer: &str,
        notes: Option<String>,
    ) -> Result<ApprovalRequest, ApprovalError> {
        self.decide(id, ApprovalStatus::Approved, Some(reviewer), notes)
            .await
    }

    /// Reject a pending request with a reason.
    pub async fn reject(
        &self,
        id: &str,
        reviewer: &str,
        reason: impl Into<String>,
    ) -> Result<ApprovalRequest, ApprovalError> {
        self.decide(id, ApprovalStatus::Rejected, Some(reviewer), Some(reason.into()))
            .await
    }

    /// Cancel a pending request; only its requester may do so.
    pub async fn cancel(&self, id: &str, caller: &str) -> Result<ApprovalRequest, ApprovalError> {
        {
            let state = self.state.lock().await;
            let request = state
                .requests
                .get(id)
                .ok_or_else(|| ApprovalError::NotFound(id.to_string()))?;
            if request.requester != caller {
                return Err(ApprovalError::NotRequester {
                    requester: request.requester.clone(),
                    caller: caller.to_string(),
                });
            }
        }
        self.decide(id, ApprovalStatus::Cancelled, None, None).await
    }

    async fn decide(
        &self,
        id: &str,
        status: ApprovalStatus,
        reviewer: Option<&str>,
        notes: Option<String>,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let mut state = self.state.lock().await;
        let request = state
            .requests
            .get_mut(id)
            .ok_or_else(|| ApprovalError::NotFound(id.to_string()))?;
        if request.status != ApprovalStatus::Pending {
            return Err(ApprovalError::AlreadyDecided(request.status));
        }

        request.status = status;
        request.reviewer = reviewer.map(str::to_string);
        request.decision_notes = notes;
        if matches!(status, ApprovalStatus::Approved | ApprovalStatus::Rejected) {
            request.reviewed_at = Some(Utc::now());
        }
        let snapshot = request.clone();

        if let Some(tx) = state.publishers.get(id) {
            let _ = tx.send(status);
        }
        drop(state);
        log::info!("approval request {} -> {}", id, status.label());
        self.notify(
            "approvals",
            serde_json::json!({
                "event": "approval_decided",
                "request_id": snapshot.id,
                "status": status.label(),
                "reviewer": snapshot.reviewer,
            }),
        )
        .await;
        Ok(snapshot)
    }

    /// Transition every still-pending request past its deadline to
    /// `EXPIRED`; returns the affected ids.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<String> {
        let expired: Vec<String> = {
            let state = self.state.lock().await;
            state
                .requests
                .values()
                .filter(|r| r.status == ApprovalStatus::Pending && r.expires_at <= now)
                .map(|r| r.id.clone())
                .collect()
        };
        for id in &expired {
            // decide() re-checks Pending, so a racing reviewer wins cleanly.
            if let Err(err) = self.decide(id, ApprovalStatus::Expired, None, None).await {
                log::debug!("sweep skipped {}: {}", id, err);
            }
        }
        expired
    }

    /// Spawn the background sweeper task.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(&self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let expired = engine.sweep_expired(Utc::now()).await;
                if !expired.is_empty() {
                    log::info!("sweeper expired {} approval request(s)", expired.len());
                }
            }
        })
    }

    /// Block until the request is decided or its deadline passes.
    ///
    /// A stalled sweeper cannot wedge the caller: when the deadline passes
    /// without a decision this method expires the request itself and
    /// returns `Expired`.
    pub async fn await_decision(&self, id: &str) -> Result<ApprovalStatus, ApprovalError> {
        let (mut rx, expires_at) = {
            let state = self.state.lock().await;
            let request = state
                .requests
                .get(id)
                .ok_or_else(|| ApprovalError::NotFound(id.to_string()))?;
            if request.status != ApprovalStatus::Pending {
                return Ok(request.status);
            }
            let rx = state
                .publishers
                .get(id)
                .map(|tx| tx.subscribe())
                .ok_or_else(|| ApprovalError::NotFound(id.to_string()))?;
            (rx, request.expires_at)
        };

        loop {
            let current = *rx.borrow();
            if current != ApprovalStatus::Pending {
                return Ok(current);
            }

            let remaining = (expires_at - Utc::now())
                .to_std()
                .unwrap_or_else(|_| Duration::from_secs(0));
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        // Publisher dropped; fall back to the stored status.
                        return self
                            .get(id)
                            .await
                            .map(|r| r.status)
                            .ok_or_else(|| ApprovalError::NotFound(id.to_string()));
                    }
                }
                _ = tokio::time::sleep(remaining) => {
                    match self.decide(id, ApprovalStatus::Expired, None, None).await {
                        Ok(request) => return Ok(request.status),
                        // A decision raced in just before the deadline.
                        Err(ApprovalError::AlreadyDecided(status)) => return Ok(status),
                        Err(err) => return Err(err),
                    }
                }
            }
        }
    }

    /// Apply the post-decision side effects for an approved request:
    /// materialize the content under the drafts root when the type's
    /// routing policy says so. Returns the paths written.
    pub async fn apply_decision_effects(
        &self,
        request: &ApprovalRequest,
    ) -> Result<Vec<PathBuf>, Box<dyn Error + Send + Sync>> {
        if request.status != ApprovalStatus::Approved {
            return Ok(Vec::new());
        }
        let policy = request.request_type.routing_policy();
        if !policy.materialize_to_file {
            return Ok(Vec::new());
        }
        let relative = match &request.target_file_path {
            Some(path) => path,
            None => return Ok(Vec::new()),
        };
        let root = self
            .drafts_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("qa_drafts"));
        let target = root.join(relative);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, request.content.as_bytes()).await?;
        log::info!(
            "materialized approved {} content to {}",
            request.request_type.label(),
            target.display()
        );
        Ok(vec![target])
    }

    /// Run the Git workflow (branch → commit → open PR) for an approved,
    /// workflow-eligible request. Returns the PR URL.
    pub async fn trigger_git_workflow(
        &self,
        id: &str,
        host: &dyn GitHost,
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        let request = self
            .get(id)
            .await
            .ok_or_else(|| ApprovalError::NotFound(id.to_string()))?;
        if request.status != ApprovalStatus::Approved {
            return Err(Box::new(ApprovalError::AlreadyDecided(request.status)));
        }
        if !request.request_type.routing_policy().git_workflow_eligible {
            return Err(format!(
                "request type {} is not eligible for the git workflow",
                request.request_type.label()
            )
            .into());
        }

        let branch = request
            .git_branch_hint
            .clone()
            .unwrap_or_else(|| format!("qaforge/approval-{}", &request.id[..8.min(request.id.len())]));
        if !host.branch_exists(&branch).await? {
            host.create_branch(&branch, "main").await?;
        }

        let path = request
            .target_file_path
            .clone()
            .unwrap_or_else(|| format!("approved/{}.json", request.id));
        let mut files = CommitFiles::new();
        files.insert(path, request.content.clone());
        host.commit(
            &branch,
            &format!("Apply approved {} {}", request.request_type.label(), request.id),
            files,
        )
        .await?;

        let pr_url = host
            .open_pr(
                &branch,
                &format!("Approved {}", request.request_type.label()),
                request.decision_notes.as_deref().unwrap_or(""),
            )
            .await?;
        log::info!("git workflow for approval {} opened {}", id, pr_url);
        Ok(pr_url)
    }
}

fn hex_digest(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
