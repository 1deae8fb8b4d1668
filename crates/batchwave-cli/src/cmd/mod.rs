pub mod clear;
pub mod config;
pub mod plan;
pub mod run;
pub mod status;
pub mod waves;

use anyhow::Context;
use batchwave_core::config::Config;
use batchwave_core::{CheckpointStore, RunSummary};
use llm_agent::RunnerConfig;
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// BatchExit: a batch that finished but recorded failures
// ---------------------------------------------------------------------------

/// Returned after results are printed so `main` can exit 2 without treating
/// the run itself as an error.
#[derive(Debug)]
pub struct BatchExit {
    pub name: String,
    pub failed: usize,
}

impl BatchExit {
    pub fn exit_code(&self) -> i32 {
        2
    }
}

impl std::fmt::Display for BatchExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} item(s) failed in '{}'", self.failed, self.name)
    }
}

impl std::error::Error for BatchExit {}

pub(crate) fn check_failures<'a>(
    name: &str,
    summaries: impl IntoIterator<Item = &'a RunSummary>,
) -> anyhow::Result<()> {
    let failed: usize = summaries.into_iter().map(RunSummary::failed_count).sum();
    if failed > 0 {
        return Err(BatchExit {
            name: name.to_string(),
            failed,
        }
        .into());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Shared setup
// ---------------------------------------------------------------------------

/// Flags that override `runner:` settings from the config file.
#[derive(Debug, Clone, Copy, Default, clap::Args)]
pub struct RunnerOverrides {
    /// Maximum concurrent invocations
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Per-item timeout in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}

pub(crate) fn load_config(root: &Path) -> anyhow::Result<(Config, CheckpointStore)> {
    let config = Config::load(root).context("failed to load config")?;
    let store = CheckpointStore::new(config.state_dir(root));
    Ok((config, store))
}

pub(crate) fn runner_config(config: &Config, overrides: RunnerOverrides) -> RunnerConfig {
    let mut rc = RunnerConfig::from(&config.runner);
    if let Some(n) = overrides.concurrency {
        rc.concurrency = n;
    }
    if let Some(secs) = overrides.timeout_secs {
        rc.timeout = Duration::from_secs(secs);
    }
    rc
}

pub(crate) fn read_template(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("failed to read prompt template {}", path.display()))
}

pub(crate) fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("failed to start tokio runtime")
}
