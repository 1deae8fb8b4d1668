use crate::error::Result;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// RunnerSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerSettings {
    /// Maximum number of invocations in flight at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Hard wall-clock limit per invocation.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_concurrency() -> usize {
    6
}

fn default_timeout_secs() -> u64 {
    600
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl RunnerSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// InvokerSettings
// ---------------------------------------------------------------------------

/// How the prompt reaches the external command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptMode {
    /// Written to stdin, which is then closed.
    #[default]
    Stdin,
    /// Appended as the final command-line argument.
    Arg,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokerSettings {
    #[serde(default = "default_command")]
    pub command: String,
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    #[serde(default)]
    pub prompt_mode: PromptMode,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

fn default_command() -> String {
    "claude".to_string()
}

fn default_args() -> Vec<String> {
    vec!["-p".to_string()]
}

impl Default for InvokerSettings {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: default_args(),
            prompt_mode: PromptMode::default(),
            env: HashMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub runner: RunnerSettings,
    #[serde(default)]
    pub invoker: InvokerSettings,
    /// Directory for checkpoint, summary and lock files. Relative paths are
    /// resolved against the project root.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

fn default_version() -> u32 {
    1
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(paths::DEFAULT_STATE_DIR)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            runner: RunnerSettings::default(),
            invoker: InvokerSettings::default(),
            state_dir: default_state_dir(),
        }
    }
}

impl Config {
    /// Load `.batchwave/config.yaml`, falling back to defaults when the file
    /// does not exist.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    /// Absolute state directory for this project.
    pub fn state_dir(&self, root: &Path) -> PathBuf {
        if self.state_dir.is_absolute() {
            self.state_dir.clone()
        } else {
            root.join(&self.state_dir)
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.runner.concurrency == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "runner.concurrency must be at least 1".to_string(),
            });
        } else if self.runner.concurrency > 32 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "runner.concurrency={} (>32 is unusual for LLM backends)",
                    self.runner.concurrency
                ),
            });
        }

        if self.runner.timeout_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "runner.timeout_secs must be at least 1".to_string(),
            });
        }

        let command = self.invoker.command.trim();
        if command.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "invoker.command is empty".to_string(),
            });
        } else if which::which(command).is_err() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!("invoker.command '{command}' was not found on PATH"),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
