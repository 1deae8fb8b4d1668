use crate::error::{BatchError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const BATCHWAVE_DIR: &str = ".batchwave";
pub const CONFIG_FILE: &str = ".batchwave/config.yaml";
pub const DEFAULT_STATE_DIR: &str = ".batchwave/state";

pub const PROGRESS_SUFFIX: &str = ".progress.json";
pub const RESULT_SUFFIX: &str = ".result.json";
pub const LOCK_SUFFIX: &str = ".lock";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn batchwave_dir(root: &Path) -> PathBuf {
    root.join(BATCHWAVE_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn progress_path(state_dir: &Path, name: &str) -> PathBuf {
    state_dir.join(format!("{name}{PROGRESS_SUFFIX}"))
}

pub fn result_path(state_dir: &Path, name: &str) -> PathBuf {
    state_dir.join(format!("{name}{RESULT_SUFFIX}"))
}

pub fn lock_path(state_dir: &Path, name: &str) -> PathBuf {
    state_dir.join(format!("{name}{LOCK_SUFFIX}"))
}

/// Name of the run that executes wave `number` of the run `name`.
pub fn wave_run_name(name: &str, number: usize) -> String {
    format!("{name}.wave-{number}")
}

// ---------------------------------------------------------------------------
// Run name validation
// ---------------------------------------------------------------------------

static RUN_NAME_RE: OnceLock<Regex> = OnceLock::new();

fn run_name_re() -> &'static Regex {
    RUN_NAME_RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9._\-]*[a-z0-9]$|^[a-z0-9]$").expect("valid run name regex")
    })
}

/// Run names become file names, so they are restricted to a safe charset.
pub fn validate_run_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 64 || !run_name_re().is_match(name) || name.contains("..")
    {
        return Err(BatchError::InvalidRunName(name.to_string()));
    }
    Ok(())
}
