use crate::error::{BatchError, Result};
use crate::item::WorkItem;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Highest (least urgent) priority value a task may carry.
pub const MAX_PRIORITY: u8 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Backlog,
    #[default]
    Todo,
    InProgress,
    Review,
    Done,
}

impl TaskStatus {
    /// Only tasks nobody has started yet take part in planning; anything
    /// further along counts as a satisfied dependency.
    pub fn is_pending(&self) -> bool {
        matches!(self, TaskStatus::Backlog | TaskStatus::Todo)
    }
}

/// A snapshot of one task from the external task store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// 0 is most urgent.
    #[serde(default)]
    pub priority: u8,
    #[serde(default)]
    pub status: TaskStatus,
}

impl TaskRecord {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            priority: 0,
            status: TaskStatus::Todo,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    /// The task as batch input: title, description and priority become
    /// prompt fields.
    pub fn to_work_item(&self) -> WorkItem {
        WorkItem::new(self.id.clone())
            .with_field("title", self.title.clone())
            .with_field("description", self.description.clone())
            .with_field("priority", self.priority)
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RawTask {
    id: String,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    priority: i64,
    #[serde(default)]
    status: TaskStatus,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotShape {
    Bare(Vec<RawTask>),
    Wrapped { tasks: Vec<RawTask> },
}

/// Parse a task snapshot: a JSON array of tasks or an object with a `tasks`
/// array. Priorities outside 0..=3 are rejected.
pub fn parse_tasks(data: &str) -> Result<Vec<TaskRecord>> {
    let raw = match serde_json::from_str::<SnapshotShape>(data)? {
        SnapshotShape::Bare(tasks) | SnapshotShape::Wrapped { tasks } => tasks,
    };
    raw.into_iter()
        .map(|t| {
            if !(0..=i64::from(MAX_PRIORITY)).contains(&t.priority) {
                return Err(BatchError::InvalidPriority {
                    id: t.id,
                    priority: t.priority,
                });
            }
            Ok(TaskRecord {
                id: t.id,
                title: t.title,
                description: t.description.unwrap_or_default(),
                priority: t.priority as u8,
                status: t.status,
            })
        })
        .collect()
}

pub fn load_tasks(path: &Path) -> Result<Vec<TaskRecord>> {
    let data = std::fs::read_to_string(path)?;
    parse_tasks(&data)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
