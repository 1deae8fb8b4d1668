//! `llm-agent`: async execution half of batchwave.
//!
//! Drives an external LLM command over a list of work items with bounded
//! concurrency, a hard per-item timeout, and a checkpoint written after every
//! finished item so an interrupted batch resumes where it stopped.
//!
//! # Architecture
//!
//! ```text
//! BatchJob        ← scan items, build prompts, interpret outcomes
//!     │
//!     ▼
//! BatchRunner     ← semaphore-gated workers, single checkpoint writer
//!     │              (batchwave_core::CheckpointStore)
//!     ▼
//! Invoker         ← CommandInvoker spawns `claude -p …`, kill on timeout
//!     │
//!     ▼
//! InvocationOutcome → classify → ResultRecord
//! ```
//!
//! [`WaveExecutor`] sits on top: it feeds a dependency-wave plan through
//! `BatchRunner`, one run per wave.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use batchwave_core::CheckpointStore;
//! use llm_agent::{BatchRunner, CommandInvoker, RunOptions, RunnerConfig, TemplateJob};
//!
//! let job = TemplateJob::new(items, "Update the docs for {{path}}. Reply with JSON.");
//! let invoker = CommandInvoker::new("claude").args(["-p"]);
//! let runner = BatchRunner::new("docs", job, invoker, store, RunnerConfig::default())?;
//! let summary = runner.run(RunOptions { resume: false, cwd }).await?;
//! println!("{}", summary.headline());
//! ```

pub mod error;
pub mod outcome;
pub mod process;
pub mod runner;
pub mod template;
pub mod waves;

#[cfg(test)]
mod testing;

pub use error::AgentError;
pub use outcome::{classify, parse_output, InvocationOutcome, ParsedOutput, Reply};
pub use process::CommandInvoker;
pub use runner::{BatchJob, BatchRunner, Invoker, RunOptions, RunnerConfig};
pub use template::{render, TemplateJob};
pub use waves::{blocked_tasks, WaveExecutor, WaveReport};

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, AgentError>;
