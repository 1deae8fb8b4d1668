use crate::error::{BatchError, Result};
use crate::item::{ensure_unique_ids, ResultRecord, ResultStatus, WorkItem};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ProgressStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Idle,
    Running,
    Crashed,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::Idle => "idle",
            ProgressStatus::Running => "running",
            ProgressStatus::Crashed => "crashed",
        }
    }

    /// A checkpoint in one of these states was interrupted mid-run.
    pub fn is_resumable(&self) -> bool {
        matches!(self, ProgressStatus::Running | ProgressStatus::Crashed)
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// The checkpoint of one batch run.
///
/// `completed` and `results` grow together, one entry per finished item, and
/// the checkpoint file is rewritten after every [`Progress::record`]. The
/// mutation methods enforce that `completed` only ever holds known, distinct
/// ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    pub name: String,
    pub run_id: Uuid,
    pub status: ProgressStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<WorkItem>,
    pub completed: Vec<String>,
    pub results: Vec<ResultRecord>,
}

impl Progress {
    /// Fresh checkpoint for a new run over `items`.
    pub fn start(name: impl Into<String>, items: Vec<WorkItem>) -> Result<Self> {
        ensure_unique_ids(&items)?;
        let now = Utc::now();
        Ok(Self {
            name: name.into(),
            run_id: Uuid::new_v4(),
            status: ProgressStatus::Running,
            started_at: now,
            updated_at: now,
            items,
            completed: Vec::new(),
            results: Vec::new(),
        })
    }

    /// Items not yet recorded, in original order.
    pub fn remaining(&self) -> Vec<WorkItem> {
        let done: HashSet<&str> = self.completed.iter().map(String::as_str).collect();
        self.items
            .iter()
            .filter(|item| !done.contains(item.id.as_str()))
            .cloned()
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.completed.len() == self.items.len()
    }

    /// Append the outcome of one item.
    pub fn record(&mut self, result: ResultRecord) -> Result<()> {
        if !self.items.iter().any(|item| item.id == result.id) {
            return Err(BatchError::UnknownItem(result.id));
        }
        if self.completed.iter().any(|id| *id == result.id) {
            return Err(BatchError::DuplicateCompletion(result.id));
        }
        self.completed.push(result.id.clone());
        self.results.push(result);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Re-arm an interrupted checkpoint for another pass.
    pub fn resume(&mut self) -> Result<()> {
        if !self.status.is_resumable() {
            return Err(BatchError::NotResumable {
                name: self.name.clone(),
                status: self.status.to_string(),
            });
        }
        self.status = ProgressStatus::Running;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// True when this checkpoint was taken over exactly the items in `ids`.
    pub fn covers<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> bool {
        same_ids(self.items.iter().map(|item| item.id.as_str()), ids)
    }

    /// Fold the results into a final summary.
    pub fn summarize(&self) -> RunSummary {
        RunSummary::from_results(&self.name, self.run_id, self.started_at, &self.results)
    }
}

// ---------------------------------------------------------------------------
// RunSummary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedItem {
    pub id: String,
    pub status: ResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Immutable record written once a run has processed every item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub name: String,
    pub run_id: Uuid,
    pub total: usize,
    pub counts: BTreeMap<ResultStatus, usize>,
    pub failed: Vec<FailedItem>,
    /// Every recorded item, in completion order.
    #[serde(default)]
    pub ids: Vec<String>,
    /// Items recorded as `skipped`, in completion order.
    #[serde(default)]
    pub skipped: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn from_results(
        name: &str,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        results: &[ResultRecord],
    ) -> Self {
        let mut counts: BTreeMap<ResultStatus, usize> = BTreeMap::new();
        let mut failed = Vec::new();
        let mut skipped = Vec::new();
        let mut ids = Vec::with_capacity(results.len());
        for result in results {
            ids.push(result.id.clone());
            *counts.entry(result.status).or_insert(0) += 1;
            if result.status == ResultStatus::Skipped {
                skipped.push(result.id.clone());
            }
            if result.status.is_failure() {
                failed.push(FailedItem {
                    id: result.id.clone(),
                    status: result.status,
                    reason: result.reason().map(str::to_owned),
                });
            }
        }
        Self {
            name: name.to_string(),
            run_id,
            total: results.len(),
            counts,
            failed,
            ids,
            skipped,
            started_at,
            completed_at: Utc::now(),
        }
    }

    pub fn count(&self, status: ResultStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn failed_ids(&self) -> HashSet<String> {
        self.failed.iter().map(|f| f.id.clone()).collect()
    }

    /// True when this summary records exactly the items in `ids`.
    pub fn covers<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> bool {
        same_ids(self.ids.iter().map(String::as_str), ids)
    }

    /// "8 done: 5 updated, 1 skipped, 2 failed"
    pub fn headline(&self) -> String {
        let parts: Vec<String> = self
            .counts
            .iter()
            .filter(|(status, _)| !status.is_failure())
            .map(|(status, n)| format!("{n} {status}"))
            .collect();
        let mut line = format!("{} done", self.total);
        if !parts.is_empty() {
            line.push_str(": ");
            line.push_str(&parts.join(", "));
        }
        if !self.failed.is_empty() {
            line.push_str(if parts.is_empty() { ": " } else { ", " });
            line.push_str(&format!("{} failed", self.failed.len()));
        }
        line
    }
}

/// Item ids are unique within a run, so set equality is enough.
fn same_ids<'a, 'b>(
    have: impl IntoIterator<Item = &'a str>,
    want: impl IntoIterator<Item = &'b str>,
) -> bool {
    let have: HashSet<&str> = have.into_iter().collect();
    let want: HashSet<&str> = want.into_iter().collect();
    have == want
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
