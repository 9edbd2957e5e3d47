//! Per-path pending change tracking.
//!
//! Each path holds at most one diff. Proposing a diff for a path replaces
//! whatever was there. Resolving a diff moves it out of active tracking and
//! appends an immutable record to the decision history.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::path::normalize_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffStatus {
    Pending,
    Accepted,
    Rejected,
}

/// Terminal review decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Accepted,
    Rejected,
}

impl Decision {
    fn status(self) -> DiffStatus {
        match self {
            Decision::Accepted => DiffStatus::Accepted,
            Decision::Rejected => DiffStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDiff {
    pub path: String,
    /// Committed content at the time of the proposal.
    pub original: String,
    pub proposed: String,
    pub status: DiffStatus,
    pub created_at: DateTime<Utc>,
}

/// Immutable log entry for a resolved diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub path: String,
    pub original: String,
    pub proposed: String,
    pub decision: Decision,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReviewError {
    #[error("no pending diff for {path}")]
    NoPendingDiff { path: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStore {
    #[serde(default)]
    diffs: BTreeMap<String, PendingDiff>,
    #[serde(default)]
    history: Vec<ReviewRecord>,
}

impl DiffStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending diff, replacing any existing entry for the path.
    ///
    /// Returns the replaced entry, if any.
    pub fn propose(&mut self, path: &str, original: &str, proposed: &str) -> Option<PendingDiff> {
        let path = normalize_path(path);
        self.diffs.insert(
            path.clone(),
            PendingDiff {
                path,
                original: original.to_string(),
                proposed: proposed.to_string(),
                status: DiffStatus::Pending,
                created_at: Utc::now(),
            },
        )
    }

    pub fn get(&self, path: &str) -> Option<&PendingDiff> {
        self.diffs.get(&normalize_path(path))
    }

    /// True only for an entry whose status is exactly pending.
    pub fn has_pending(&self, path: &str) -> bool {
        self.get(path)
            .is_some_and(|diff| diff.status == DiffStatus::Pending)
    }

    /// Pending paths in display (sorted path) order.
    pub fn pending_paths(&self) -> Vec<String> {
        self.diffs
            .values()
            .filter(|diff| diff.status == DiffStatus::Pending)
            .map(|diff| diff.path.clone())
            .collect()
    }

    /// Transition a pending diff to its terminal state and stop tracking it.
    pub fn resolve(&mut self, path: &str, decision: Decision) -> Result<PendingDiff, ReviewError> {
        let key = normalize_path(path);
        if !self.has_pending(&key) {
            return Err(ReviewError::NoPendingDiff { path: key });
        }
        let mut diff = self
            .diffs
            .remove(&key)
            .ok_or_else(|| ReviewError::NoPendingDiff { path: key.clone() })?;
        diff.status = decision.status();
        self.history.push(ReviewRecord {
            path: diff.path.clone(),
            original: diff.original.clone(),
            proposed: diff.proposed.clone(),
            decision,
            decided_at: Utc::now(),
        });
        Ok(diff)
    }

    /// Drop a diff without recording a decision (its path was deleted).
    pub fn discard(&mut self, path: &str) -> Option<PendingDiff> {
        self.diffs.remove(&normalize_path(path))
    }

    pub fn history(&self) -> &[ReviewRecord] {
        &self.history
    }

    pub fn is_empty(&self) -> bool {
        self.diffs.is_empty()
    }
}
