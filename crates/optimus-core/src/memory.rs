//! Goal-keyed memory of step outcomes
//!
//! Every executed step appends one entry under its goal. The store is a
//! single JSON document:
//!
//! ```json
//! {
//!   "version": 1,
//!   "goals": {
//!     "write a hello world function": [
//!       {"timestamp": "...", "step_description": "...", "status": "success", "detail": "..."}
//!     ]
//!   }
//! }
//! ```
//!
//! It is rewritten atomically (temp file, fsync, rename) before `record` or
//! `clear_goal` return.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AgentError, Result};
use crate::skills::truncate;

/// Current document version
const FORMAT_VERSION: u32 = 1;

/// Characters of detail shown per entry in planner context
const CONTEXT_DETAIL_LEN: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Failure,
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutcomeStatus::Success => write!(f, "success"),
            OutcomeStatus::Failure => write!(f, "failure"),
        }
    }
}

/// Result of one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub status: OutcomeStatus,
    pub detail: String,
}

impl Outcome {
    pub fn success(detail: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Success,
            detail: detail.into(),
        }
    }

    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Failure,
            detail: detail.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

/// One recorded step outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryEntry {
    pub goal: String,
    pub timestamp: DateTime<Utc>,
    pub step_description: String,
    pub outcome: Outcome,
}

/// Memory statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    pub total_goals: usize,
    pub total_entries: usize,
}

/// Persisted form of an entry; the goal is the map key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct EntryRecord {
    timestamp: DateTime<Utc>,
    step_description: String,
    status: OutcomeStatus,
    detail: String,
}

impl EntryRecord {
    fn to_entry(&self, goal: &str) -> MemoryEntry {
        MemoryEntry {
            goal: goal.to_string(),
            timestamp: self.timestamp,
            step_description: self.step_description.clone(),
            outcome: Outcome {
                status: self.status,
                detail: self.detail.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct MemoryDocument {
    version: u32,
    goals: BTreeMap<String, Vec<EntryRecord>>,
}

impl Default for MemoryDocument {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION,
            goals: BTreeMap::new(),
        }
    }
}

/// Durable, goal-keyed log of step outcomes.
///
/// All writes go through one lock, so writers to the same goal are
/// serialized and entries stay in the order they were recorded.
#[derive(Debug)]
pub struct Memory {
    path: Option<PathBuf>,
    document: Mutex<MemoryDocument>,
}

impl Memory {
    /// Open the store at `path`.
    ///
    /// A missing or empty file is an empty store. Content that is not a valid
    /// memory document fails with `CorruptMemory` and is left untouched.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let document = load_document(&path)?;

        let entries: usize = document.goals.values().map(Vec::len).sum();
        info!(path = %path.display(), goals = document.goals.len(), entries, "Opened memory store");

        Ok(Self {
            path: Some(path),
            document: Mutex::new(document),
        })
    }

    /// A store that is never written to disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            document: Mutex::new(MemoryDocument::default()),
        }
    }

    /// Backing file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append an entry for `goal`; it is on disk when this returns.
    ///
    /// The goal is trimmed; a blank goal fails with `InvalidGoal` and nothing
    /// is written.
    pub fn record(
        &self,
        goal: &str,
        step_description: &str,
        outcome: Outcome,
    ) -> Result<MemoryEntry> {
        let goal = goal.trim();
        if goal.is_empty() {
            return Err(AgentError::InvalidGoal);
        }

        let mut document = self.document.lock();

        // Stamped under the lock so timestamps follow insertion order
        let record = EntryRecord {
            timestamp: Utc::now(),
            step_description: step_description.to_string(),
            status: outcome.status,
            detail: outcome.detail,
        };
        let entry = record.to_entry(goal);

        document
            .goals
            .entry(goal.to_string())
            .or_default()
            .push(record);

        if let Err(e) = self.persist(&document) {
            // Keep the in-memory view identical to what is on disk
            if let Some(entries) = document.goals.get_mut(goal) {
                entries.pop();
                if entries.is_empty() {
                    document.goals.remove(goal);
                }
            }
            return Err(e);
        }

        debug!(goal = %goal, status = %entry.outcome.status, "Stored memory entry");
        Ok(entry)
    }

    /// Up to `limit` most recent entries for `goal`, oldest first
    pub fn get_recent_context(&self, goal: &str, limit: usize) -> Vec<MemoryEntry> {
        let goal = goal.trim();
        let document = self.document.lock();
        match document.goals.get(goal) {
            Some(records) => {
                let start = records.len().saturating_sub(limit);
                records[start..].iter().map(|r| r.to_entry(goal)).collect()
            }
            None => Vec::new(),
        }
    }

    /// Every entry for `goal`, oldest first
    pub fn retrieve(&self, goal: &str) -> Vec<MemoryEntry> {
        self.get_recent_context(goal, usize::MAX)
    }

    /// Remove every entry for `goal`. Clearing an unknown goal is a no-op.
    pub fn clear_goal(&self, goal: &str) -> Result<()> {
        let goal = goal.trim();
        let mut document = self.document.lock();
        let Some(removed) = document.goals.remove(goal) else {
            return Ok(());
        };

        if let Err(e) = self.persist(&document) {
            document.goals.insert(goal.to_string(), removed);
            return Err(e);
        }

        info!(goal = %goal, entries = removed.len(), "Cleared memory for goal");
        Ok(())
    }

    /// Goals with stored entries, ordered by their first entry
    pub fn goals(&self) -> Vec<String> {
        let document = self.document.lock();
        let mut goals: Vec<(&String, DateTime<Utc>)> = document
            .goals
            .iter()
            .filter_map(|(goal, records)| records.first().map(|r| (goal, r.timestamp)))
            .collect();
        goals.sort_by_key(|(_, first)| *first);
        goals.into_iter().map(|(goal, _)| goal.clone()).collect()
    }

    pub fn stats(&self) -> MemoryStats {
        let document = self.document.lock();
        MemoryStats {
            total_goals: document.goals.len(),
            total_entries: document.goals.values().map(Vec::len).sum(),
        }
    }

    /// Render entries as prompt context
    pub fn format_context(entries: &[MemoryEntry]) -> String {
        if entries.is_empty() {
            return "No prior context available.".to_string();
        }

        entries
            .iter()
            .map(|e| {
                format!(
                    "- {}: [{}] {}",
                    e.step_description,
                    e.outcome.status,
                    truncate(&e.outcome.detail, CONTEXT_DETAIL_LEN)
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn persist(&self, document: &MemoryDocument) -> Result<()> {
        match &self.path {
            Some(path) => write_document(path, document),
            None => Ok(()),
        }
    }
}

fn corrupt(path: &Path, reason: impl Into<String>) -> AgentError {
    AgentError::CorruptMemory {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn storage(path: &Path) -> impl FnOnce(std::io::Error) -> AgentError + '_ {
    move |source| AgentError::Storage {
        path: path.to_path_buf(),
        source,
    }
}

fn load_document(path: &Path) -> Result<MemoryDocument> {
    if !path.exists() {
        return Ok(MemoryDocument::default());
    }

    let content = fs::read_to_string(path).map_err(storage(path))?;
    if content.trim().is_empty() {
        return Ok(MemoryDocument::default());
    }

    let document: MemoryDocument =
        serde_json::from_str(&content).map_err(|e| corrupt(path, e.to_string()))?;

    if document.version != FORMAT_VERSION {
        return Err(corrupt(
            path,
            format!("unsupported version {} (expected {})", document.version, FORMAT_VERSION),
        ));
    }
    if document.goals.keys().any(|goal| goal.trim().is_empty()) {
        return Err(corrupt(path, "empty goal key"));
    }

    Ok(document)
}

fn write_document(path: &Path, document: &MemoryDocument) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(storage(parent))?;
    }

    let json = serde_json::to_vec_pretty(document).map_err(|e| AgentError::Storage {
        path: path.to_path_buf(),
        source: e.into(),
    })?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "memory.json".to_string());
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));

    let mut file = fs::File::create(&tmp).map_err(storage(&tmp))?;
    file.write_all(&json).map_err(storage(&tmp))?;
    file.sync_all().map_err(storage(&tmp))?;
    drop(file);

    fs::rename(&tmp, path).map_err(storage(path))?;
    Ok(())
}
