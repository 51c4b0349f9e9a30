//! Durable execution storage.
//!
//! Every agent run and every action it takes is recorded through the
//! [`ExecutionStore`] trait: full execution round-trips, monotonic action
//! appends with `(execution id, iteration)` uniqueness, and the recovery
//! queries (`list_running`, `list_stuck`). Reads are strongly consistent
//! for a single execution id.
//!
//! Two implementations ship with the crate:
//!
//! - [`InMemoryExecutionStore`] — maps behind async mutexes; tests and
//!   ephemeral runs.
//! - [`JsonlExecutionStore`] — one append-only `.jsonl` file per execution,
//!   each line SHA-256 hash-chained to the previous one so truncation and
//!   tampering are detectable via
//!   [`verify_integrity`](JsonlExecutionStore::verify_integrity). Action
//!   begin and completion are separate appended records; replay merges them
//!   (the latest record for an iteration wins).
//!
//! # Disk format
//!
//! ```text
//! {"record":"execution","seq":0,"prev_hash":"","hash":"ab12…","execution":{…}}
//! {"record":"action","seq":1,"prev_hash":"ab12…","hash":"cd34…","action":{…}}
//! {"record":"action","seq":2,"prev_hash":"cd34…","hash":"ef56…","action":{…}}
//! ```

use crate::qaforge::execution::{AgentAction, AgentExecution};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::error::Error;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;

/// Errors raised by store implementations.
#[derive(Debug)]
pub enum StoreError {
    /// `(execution id, iteration)` uniqueness was violated.
    DuplicateIteration { execution_id: String, iteration: u32 },
    /// Completion recorded for an action that was never begun.
    UnknownAction { execution_id: String, iteration: u32 },
    NotFound(String),
    Io(String),
    /// A persisted line failed to decode or broke the hash chain.
    Corrupt(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::DuplicateIteration {
                execution_id,
                iteration,
            } => write!(
                f,
                "iteration {} already recorded for execution '{}'",
                iteration, execution_id
            ),
            StoreError::UnknownAction {
                execution_id,
                iteration,
            } => write!(
                f,
                "no begun action at iteration {} for execution '{}'",
                iteration, execution_id
            ),
            StoreError::NotFound(id) => write!(f, "execution '{}' not found", id),
            StoreError::Io(msg) => write!(f, "store io error: {}", msg),
            StoreError::Corrupt(msg) => write!(f, "store corruption: {}", msg),
        }
    }
}

impl Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

/// Durable record of executions and their correlated actions.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Persist the full execution state (insert or overwrite).
    async fn persist_execution(&self, execution: &AgentExecution) -> Result<(), StoreError>;

    /// Load an execution by id.
    async fn load_execution(&self, id: &str) -> Result<Option<AgentExecution>, StoreError>;

    /// Record the beginning of an action. Duplicate `(execution id,
    /// iteration)` pairs are an error.
    async fn append_action(&self, action: &AgentAction) -> Result<(), StoreError>;

    /// Record an action's completion (outcome, success, duration, cost).
    /// The action must have been begun first.
    async fn complete_action(&self, action: &AgentAction) -> Result<(), StoreError>;

    /// Ordered actions for one execution (begin/completion merged).
    async fn list_actions(&self, execution_id: &str) -> Result<Vec<AgentAction>, StoreError>;

    /// Executions not yet terminal.
    async fn list_running(&self) -> Result<Vec<AgentExecution>, StoreError>;

    /// Non-terminal executions whose `updated_at` is older than
    /// `now - older_than`.
    async fn list_stuck(&self, older_than: Duration) -> Result<Vec<AgentExecution>, StoreError>;
}

// ── In-memory store ─────────────────────────────────────────────────────

/// Map-backed store for tests and single-process ephemeral runs.
pub struct InMemoryExecutionStore {
    executions: Mutex<HashMap<String, AgentExecution>>,
    actions: Mutex<HashMap<String, BTreeMap<u32, AgentAction>>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self {
            executions: Mutex::new(HashMap::new()),
            actions: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryExecutionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn persist_execution(&self, execution: &AgentExecution) -> Result<(), StoreError> {
        self.executions
            .lock()
            .await
            .insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn load_execution(&self, id: &str) -> Result<Option<AgentExecution>, StoreError> {
        Ok(self.executions.lock().await.get(id).cloned())
    }

    async fn append_action(&self, action: &AgentAction) -> Result<(), StoreError> {
        let mut actions = self.actions.lock().await;
        let per_execution = actions
            .entry(action.execution_id.clone())
            .or_insert_with(BTreeMap::new);
        if per_execution.contains_key(&action.iteration) {
            return Err(StoreError::DuplicateIteration {
                execution_id: action.execution_id.clone(),
                iteration: action.iteration,
            });
        }
        per_execution.insert(action.iteration, action.clone());
        Ok(())
    }

    async fn complete_action(&self, action: &AgentAction) -> Result<(), StoreError> {
        let mut actions = self.actions.lock().await;
        let per_execution = actions
            .get_mut(&action.execution_id)
            .ok_or_else(|| StoreError::UnknownAction {
                execution_id: action.execution_id.clone(),
                iteration: action.iteration,
            })?;
        if !per_execution.contains_key(&action.iteration) {
            return Err(StoreError::UnknownAction {
                execution_id: action.execution_id.clone(),
                iteration: action.iteration,
            });
        }
        per_execution.insert(action.iteration, action.clone());
        Ok(())
    }

    async fn list_actions(&self, execution_id: &str) -> Result<Vec<AgentAction>, StoreError> {
        Ok(self
            .actions
            .lock()
            .await
            .get(execution_id)
            .map(|per_execution| per_execution.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_running(&self) -> Result<Vec<AgentExecution>, StoreError> {
        Ok(self
            .executions
            .lock()
            .await
            .values()
            .filter(|execution| !execution.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn list_stuck(&self, older_than: Duration) -> Result<Vec<AgentExecution>, StoreError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than)
                .unwrap_or_else(|_| chrono::Duration::seconds(0));
        Ok(self
            .executions
            .lock()
            .await
            .values()
            .filter(|execution| {
                !execution.status.is_terminal() && execution.updated_at < cutoff
            })
            .cloned()
            .collect())
    }
}

// ── JSONL store with hash chain ─────────────────────────────────────────

#[derive(Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum LogRecord {
    Execution {
        seq: u64,
        prev_hash: String,
        hash: String,
        execution: AgentExecution,
    },
    Action {
        seq: u64,
        prev_hash: String,
        hash: String,
        action: AgentAction,
    },
}

impl LogRecord {
    fn seq(&self) -> u64 {
        match self {
            LogRecord::Execution { seq, .. } | LogRecord::Action { seq, .. } => *seq,
        }
    }

    fn hash(&self) -> &str {
        match self {
            LogRecord::Execution { hash, .. } | LogRecord::Action { hash, .. } => hash,
        }
    }

    fn prev_hash(&self) -> &str {
        match self {
            LogRecord::Execution { prev_hash, .. } | LogRecord::Action { prev_hash, .. } => {
                prev_hash
            }
        }
    }

    fn payload_json(&self) -> Result<String, StoreError> {
        let payload = match self {
            LogRecord::Execution { execution, .. } => serde_json::to_string(execution),
            LogRecord::Action { action, .. } => serde_json::to_string(action),
        };
        payload.map_err(|e| StoreError::Corrupt(e.to_string()))
    }
}

fn chain_hash(seq: u64, prev_hash: &str, payload_json: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seq.to_be_bytes());
    hasher.update(prev_hash.as_bytes());
    hasher.update(payload_json.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

struct FileState {
    seq: u64,
    last_hash: String,
    begun_iterations: HashSet<u32>,
}

/// Append-only, hash-chained, disk-persisted store.
///
/// One `.jsonl` file per execution id under the root directory. Appends are
/// flushed per line; replay reconstructs current state by taking the latest
/// record per entity.
pub struct JsonlExecutionStore {
    root: PathBuf,
    files: Mutex<HashMap<String, FileState>>,
}

impl JsonlExecutionStore {
    /// Open (creating the directory if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            files: Mutex::new(HashMap::new()),
        })
    }

    fn file_path(&self, execution_id: &str) -> PathBuf {
        // Execution ids are UUIDs; hash anyway so arbitrary ids cannot
        // escape the root.
        let safe: String = execution_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.root.join(format!("{}.jsonl", safe))
    }

    fn read_records(path: &Path) -> Result<Vec<LogRecord>, StoreError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(path)?;
        let reader = BufReader::new(file);
        let mut records = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: LogRecord = serde_json::from_str(&line).map_err(|e| {
                StoreError::Corrupt(format!("{}:{}: {}", path.display(), line_no + 1, e))
            })?;
            records.push(record);
        }
        Ok(records)
    }

    async fn file_state(&self, execution_id: &str) -> Result<(), StoreError> {
        let mut files = self.files.lock().await;
        if files.contains_key(execution_id) {
            return Ok(());
        }
        let records = Self::read_records(&self.file_path(execution_id))?;
        let mut state = FileState {
            seq: 0,
            last_hash: String::new(),
            begun_iterations: HashSet::new(),
        };
        for record in &records {
            state.seq = record.seq() + 1;
            state.last_hash = record.hash().to_string();
            if let LogRecord::Action { action, .. } = record {
                state.begun_iterations.insert(action.iteration);
            }
        }
        files.insert(execution_id.to_string(), state);
        Ok(())
    }

    async fn append_record(
        &self,
        execution_id: &str,
        build: impl FnOnce(u64, String, String) -> LogRecord,
        payload_json: String,
    ) -> Result<(), StoreError> {
        self.file_state(execution_id).await?;
        let mut files = self.files.lock().await;
        let state = files
            .get_mut(execution_id)
            .ok_or_else(|| StoreError::NotFound(execution_id.to_string()))?;

        let seq = state.seq;
        let prev_hash = state.last_hash.clone();
        let hash = chain_hash(seq, &prev_hash, &payload_json);
        let record = build(seq, prev_hash, hash.clone());

        let line =
            serde_json::to_string(&record).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_path(execution_id))?;
        writeln!(file, "{}", line)?;
        file.flush()?;

        state.seq = seq + 1;
        state.last_hash = hash;
        if let LogRecord::Action { action, .. } = &record {
            state.begun_iterations.insert(action.iteration);
        }
        Ok(())
    }

    /// Verify the hash chain of one execution's log file.
    pub fn verify_integrity(&self, execution_id: &str) -> Result<bool, StoreError> {
        let records = Self::read_records(&self.file_path(execution_id))?;
        let mut prev_hash = String::new();
        for (index, record) in records.iter().enumerate() {
            if record.seq() != index as u64 {
                return Ok(false);
            }
            if record.prev_hash() != prev_hash {
                return Ok(false);
            }
            let expected = chain_hash(record.seq(), record.prev_hash(), &record.payload_json()?);
            if record.hash() != expected {
                return Ok(false);
            }
            prev_hash = record.hash().to_string();
        }
        Ok(true)
    }

    fn replay(path: &Path) -> Result<(Option<AgentExecution>, BTreeMap<u32, AgentAction>), StoreError> {
        let records = Self::read_records(path)?;
        let mut execution = None;
        let mut actions: BTreeMap<u32, AgentAction> = BTreeMap::new();
        for record in records {
            match record {
                LogRecord::Execution {
                    execution: snapshot,
                    ..
                } => execution = Some(snapshot),
                LogRecord::Action { action, .. } => {
                    // Latest record per iteration wins (begin, then end).
                    actions.insert(action.iteration, action);
                }
            }
        }
        Ok((execution, actions))
    }

    fn all_executions(&self) -> Result<Vec<AgentExecution>, StoreError> {
        let mut executions = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let (execution, _) = Self::replay(&path)?;
            if let Some(execution) = execution {
                executions.push(execution);
            }
        }
        Ok(executions)
    }
}

#[async_trait]
impl ExecutionStore for JsonlExecutionStore {
    async fn persist_execution(&self, execution: &AgentExecution) -> Result<(), StoreError> {
        let payload =
            serde_json::to_string(execution).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let snapshot = execution.clone();
        self.append_record(
            &execution.id,
            move |seq, prev_hash, hash| LogRecord::Execution {
                seq,
                prev_hash,
                hash,
                execution: snapshot,
            },
            payload,
        )
        .await
    }

    async fn load_execution(&self, id: &str) -> Result<Option<AgentExecution>, StoreError> {
        let (execution, _) = Self::replay(&self.file_path(id))?;
        Ok(execution)
    }

    async fn append_action(&self, action: &AgentAction) -> Result<(), StoreError> {
        self.file_state(&action.execution_id).await?;
        {
            let files = self.files.lock().await;
            if let Some(state) = files.get(&action.execution_id) {
                if state.begun_iterations.contains(&action.iteration) {
                    return Err(StoreError::DuplicateIteration {
                        execution_id: action.execution_id.clone(),
                        iteration: action.iteration,
                    });
                }
            }
        }
        let payload =
            serde_json::to_string(action).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let snapshot = action.clone();
        self.append_record(
            &action.execution_id,
            move |seq, prev_hash, hash| LogRecord::Action {
                seq,
                prev_hash,
                hash,
                action: snapshot,
            },
            payload,
        )
        .await
    }

    async fn complete_action(&self, action: &AgentAction) -> Result<(), StoreError> {
        self.file_state(&action.execution_id).await?;
        {
            let files = self.files.lock().await;
            let known = files
                .get(&action.execution_id)
                .map(|state| state.begun_iterations.contains(&action.iteration))
                .unwrap_or(false);
            if !known {
                return Err(StoreError::UnknownAction {
                    execution_id: action.execution_id.clone(),
                    iteration: action.iteration,
                });
            }
        }
        let payload =
            serde_json::to_string(action).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let snapshot = action.clone();
        self.append_record(
            &action.execution_id,
            move |seq, prev_hash, hash| LogRecord::Action {
                seq,
                prev_hash,
                hash,
                action: snapshot,
            },
            payload,
        )
        .await
    }

    async fn list_actions(&self, execution_id: &str) -> Result<Vec<AgentAction>, StoreError> {
        let (_, actions) = Self::replay(&self.file_path(execution_id))?;
        Ok(actions.into_iter().map(|(_, action)| action).collect())
    }

    async fn list_running(&self) -> Result<Vec<AgentExecution>, StoreError> {
        Ok(self
            .all_executions()?
            .into_iter()
            .filter(|execution| !execution.status.is_terminal())
            .collect())
    }

    async fn list_stuck(&self, older_than: Duration) -> Result<Vec<AgentExecution>, StoreError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than)
                .unwrap_or_else(|_| chrono::Duration::seconds(0));
        Ok(self
            .all_executions()?
            .into_iter()
            .filter(|execution| {
                !execution.status.is_terminal() && execution.updated_at < cutoff
            })
            .collect())
    }
}
