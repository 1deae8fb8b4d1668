use crate::error::{BatchError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

// ---------------------------------------------------------------------------
// WorkItem
// ---------------------------------------------------------------------------

/// One unit of batch input. Identity is `id`; everything else is opaque to
/// the runner and only read by the job's prompt builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl WorkItem {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Field lookup that also answers for `id`.
    pub fn field(&self, key: &str) -> Option<Value> {
        if key == "id" {
            return Some(Value::String(self.id.clone()));
        }
        self.fields.get(key).cloned()
    }
}

/// Reject item lists that repeat an id; checkpoint matching is by id only.
pub fn ensure_unique_ids(items: &[WorkItem]) -> Result<()> {
    let mut seen = HashSet::new();
    for item in items {
        if !seen.insert(item.id.as_str()) {
            return Err(BatchError::DuplicateItem(item.id.clone()));
        }
    }
    Ok(())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ManifestShape {
    Bare(Vec<WorkItem>),
    Wrapped { items: Vec<WorkItem> },
}

/// Load a work item manifest: either a JSON array of items or an object with
/// an `items` array.
pub fn load_manifest(path: &Path) -> Result<Vec<WorkItem>> {
    let data = std::fs::read_to_string(path)?;
    let items = match serde_json::from_str::<ManifestShape>(&data)? {
        ManifestShape::Bare(items) | ManifestShape::Wrapped { items } => items,
    };
    ensure_unique_ids(&items)?;
    Ok(items)
}

// ---------------------------------------------------------------------------
// ResultStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Updated,
    Touched,
    Processed,
    Skipped,
    /// The invocation hit its hard timeout and was killed.
    Timeout,
    /// The invocation exited non-zero or could not be spawned.
    LlmError,
    /// The invocation succeeded but produced empty or unparseable output.
    GenError,
    /// The job failed while interpreting otherwise valid output.
    Error,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Updated => "updated",
            ResultStatus::Touched => "touched",
            ResultStatus::Processed => "processed",
            ResultStatus::Skipped => "skipped",
            ResultStatus::Timeout => "timeout",
            ResultStatus::LlmError => "llm_error",
            ResultStatus::GenError => "gen_error",
            ResultStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "updated" => ResultStatus::Updated,
            "touched" => ResultStatus::Touched,
            "processed" => ResultStatus::Processed,
            "skipped" => ResultStatus::Skipped,
            "timeout" => ResultStatus::Timeout,
            "llm_error" => ResultStatus::LlmError,
            "gen_error" => ResultStatus::GenError,
            "error" => ResultStatus::Error,
            _ => return None,
        })
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ResultStatus::Timeout
                | ResultStatus::LlmError
                | ResultStatus::GenError
                | ResultStatus::Error
        )
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ResultRecord
// ---------------------------------------------------------------------------

/// Outcome of one item. Append-only: once recorded in a checkpoint it is
/// never rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub id: String,
    pub status: ResultStatus,
    #[serde(flatten)]
    pub detail: Map<String, Value>,
}

impl ResultRecord {
    pub fn new(id: impl Into<String>, status: ResultStatus) -> Self {
        Self {
            id: id.into(),
            status,
            detail: Map::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.detail.insert(key.into(), value.into());
        self
    }

    /// Human-readable failure reason, taken from the `error` detail field.
    pub fn reason(&self) -> Option<&str> {
        self.detail.get("error").and_then(Value::as_str)
    }
}
