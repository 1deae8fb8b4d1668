use crate::error::{BatchError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

// ---------------------------------------------------------------------------
// LockRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

impl LockRecord {
    /// `Ok(None)` when there is no lock. A lock file that does not parse is
    /// [`BatchError::CorruptLock`]: records are published whole, so garbage
    /// never comes from a writer that is still mid-create.
    pub fn read(path: &Path) -> Result<Option<Self>> {
        match crate::io::read_json(path) {
            Err(BatchError::Json(_)) => Err(BatchError::CorruptLock {
                path: path.to_path_buf(),
            }),
            other => other,
        }
    }

    pub fn is_alive(&self) -> bool {
        is_pid_alive(self.pid)
    }
}

// ---------------------------------------------------------------------------
// RunLock
// ---------------------------------------------------------------------------

/// Presence file that keeps two processes from driving the same run.
///
/// The record is written to a tempfile next to the lock and published with a
/// no-clobber rename, so the lock path only ever holds a complete record. A
/// lock left behind by a process that is no longer alive is replaced. The
/// file is removed when the guard drops.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(path: &Path, name: &str) -> Result<Self> {
        let dir = match path.parent() {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                parent
            }
            None => Path::new("."),
        };

        for _ in 0..2 {
            let mut tmp = NamedTempFile::new_in(dir)?;
            let record = LockRecord {
                pid: std::process::id(),
                started_at: Utc::now(),
            };
            tmp.write_all(&serde_json::to_vec(&record)?)?;
            tmp.as_file().sync_all()?;

            match tmp.persist_noclobber(path) {
                Ok(_) => {
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                    match LockRecord::read(path)? {
                        Some(existing) if existing.is_alive() => {
                            return Err(BatchError::RunLocked {
                                name: name.to_string(),
                                pid: existing.pid,
                            });
                        }
                        Some(existing) => {
                            tracing::warn!(
                                run = name,
                                pid = existing.pid,
                                "removing stale run lock"
                            );
                            crate::io::remove_if_exists(path)?;
                        }
                        // Released between our attempt and the read.
                        None => {}
                    }
                }
                Err(e) => return Err(e.error.into()),
            }
        }

        Err(BatchError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("could not acquire run lock {}", path.display()),
        )))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = crate::io::remove_if_exists(&self.path) {
            tracing::warn!(path = %self.path.display(), "failed to release run lock: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// PID helpers (Unix only)
// ---------------------------------------------------------------------------

/// Returns true if the process is still alive (`kill -0 {pid}`).
pub fn is_pid_alive(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }
    #[cfg(unix)]
    {
        std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        // Without a liveness probe every lock is treated as held.
        true
    }
}
