//! `batchwave-core`: the synchronous half of batchwave.
//!
//! Work items and their results, the JSON checkpoint a batch run persists
//! after every completed item, the run lock, task snapshots and the
//! dependency-wave planner. Nothing in here spawns processes or needs a
//! runtime; the async engine lives in `llm-agent`.

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod io;
pub mod item;
pub mod lock;
pub mod paths;
pub mod planner;
pub mod progress;
pub mod task;

pub use checkpoint::CheckpointStore;
pub use error::{BatchError, Result};
pub use item::{ResultRecord, ResultStatus, WorkItem};
pub use planner::{DependencyGraph, Plan, Wave};
pub use progress::{Progress, ProgressStatus, RunSummary};
pub use task::TaskRecord;
