use crate::error::Result;
use crate::io::{read_json, remove_if_exists, write_json};
use crate::lock::{LockRecord, RunLock};
use crate::paths;
use crate::progress::{Progress, ProgressStatus, RunSummary};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// CheckpointStore
// ---------------------------------------------------------------------------

/// Owns the per-run files under the state directory:
///
/// ```text
/// <state_dir>/<name>.progress.json   checkpoint while a run is in flight
/// <state_dir>/<name>.result.json     summary once a run has finished
/// <state_dir>/<name>.lock            presence file of the driving process
/// ```
///
/// The directory is created lazily on the first write.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    state_dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        CheckpointStore {
            state_dir: state_dir.into(),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn progress_path(&self, name: &str) -> PathBuf {
        paths::progress_path(&self.state_dir, name)
    }

    pub fn result_path(&self, name: &str) -> PathBuf {
        paths::result_path(&self.state_dir, name)
    }

    pub fn lock_path(&self, name: &str) -> PathBuf {
        paths::lock_path(&self.state_dir, name)
    }

    // -- checkpoint ---------------------------------------------------------

    pub fn load_progress(&self, name: &str) -> Result<Option<Progress>> {
        paths::validate_run_name(name)?;
        read_json(&self.progress_path(name))
    }

    pub fn save_progress(&self, progress: &Progress) -> Result<()> {
        paths::validate_run_name(&progress.name)?;
        write_json(&self.progress_path(&progress.name), progress)
    }

    pub fn clear_progress(&self, name: &str) -> Result<bool> {
        paths::validate_run_name(name)?;
        remove_if_exists(&self.progress_path(name))
    }

    // -- summary ------------------------------------------------------------

    pub fn load_summary(&self, name: &str) -> Result<Option<RunSummary>> {
        paths::validate_run_name(name)?;
        read_json(&self.result_path(name))
    }

    pub fn write_summary(&self, summary: &RunSummary) -> Result<()> {
        paths::validate_run_name(&summary.name)?;
        write_json(&self.result_path(&summary.name), summary)
    }

    pub fn clear_summary(&self, name: &str) -> Result<bool> {
        paths::validate_run_name(name)?;
        remove_if_exists(&self.result_path(name))
    }

    /// Write the summary, then drop the checkpoint. The checkpoint only goes
    /// once the summary is on disk, so a crash in between leaves a resumable
    /// checkpoint rather than nothing.
    pub fn finish(&self, summary: &RunSummary) -> Result<()> {
        self.write_summary(summary)?;
        self.clear_progress(&summary.name)?;
        Ok(())
    }

    /// Names of every run with a checkpoint or a summary, sorted.
    pub fn list_runs(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.state_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = BTreeSet::new();
        for entry in entries {
            let file_name = entry?.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let name = file_name
                .strip_suffix(paths::PROGRESS_SUFFIX)
                .or_else(|| file_name.strip_suffix(paths::RESULT_SUFFIX));
            if let Some(name) = name.filter(|n| paths::validate_run_name(n).is_ok()) {
                names.insert(name.to_string());
            }
        }
        Ok(names.into_iter().collect())
    }

    // -- lock ---------------------------------------------------------------

    pub fn acquire_lock(&self, name: &str) -> Result<RunLock> {
        paths::validate_run_name(name)?;
        RunLock::acquire(&self.lock_path(name), name)
    }

    /// The live process holding the lock of `name`, if any. A lock whose
    /// holder has died reads as no holder; an unreadable lock is an error
    /// rather than a guess either way.
    pub fn lock_holder(&self, name: &str) -> Result<Option<LockRecord>> {
        paths::validate_run_name(name)?;
        let record = LockRecord::read(&self.lock_path(name))?;
        Ok(record.filter(LockRecord::is_alive))
    }

    /// Status as an observer sees it: a `running` checkpoint with nobody
    /// holding the lock was left behind by a crashed process.
    pub fn observed_status(&self, progress: &Progress) -> Result<ProgressStatus> {
        if progress.status == ProgressStatus::Running && self.lock_holder(&progress.name)?.is_none()
        {
            return Ok(ProgressStatus::Crashed);
        }
        Ok(progress.status)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
