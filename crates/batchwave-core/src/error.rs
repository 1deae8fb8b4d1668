use thiserror::Error;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("invalid run name '{0}': must be lowercase alphanumeric with '.', '_' or '-'")]
    InvalidRunName(String),

    #[error("run '{name}' is already active (pid {pid})")]
    RunLocked { name: String, pid: u32 },

    #[error("no checkpoint found for run '{0}'")]
    NoCheckpoint(String),

    #[error("run '{name}' cannot be resumed from status '{status}'")]
    NotResumable { name: String, status: String },

    #[error("item '{0}' is not part of this run")]
    UnknownItem(String),

    #[error("item '{0}' is already recorded as completed")]
    DuplicateCompletion(String),

    #[error("duplicate work item id: {0}")]
    DuplicateItem(String),

    #[error("duplicate task id: {0}")]
    DuplicateTask(String),

    #[error("task '{id}' has priority {priority}: must be between 0 and 3")]
    InvalidPriority { id: String, priority: i64 },

    #[error("dependency cycle among tasks: {}", stuck.join(", "))]
    DependencyCycle { stuck: Vec<String> },

    #[error(
        "wave {wave} of '{name}' was recorded for a different set of tasks; \
         run again without resume to start over"
    )]
    PlanChanged { name: String, wave: usize },

    #[error("run lock {} is unreadable; delete it if no process is driving this run", path.display())]
    CorruptLock { path: std::path::PathBuf },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BatchError>;
