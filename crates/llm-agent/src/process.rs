use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use batchwave_core::config::{InvokerSettings, PromptMode};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::outcome::{extract_session_id, InvocationOutcome};
use crate::runner::Invoker;

// ─── CommandInvoker ───────────────────────────────────────────────────────

/// Runs the configured LLM command once per prompt.
///
/// The prompt goes to stdin (closed after writing) or is appended as the last
/// argument. stdout is the model output; stderr is kept for error reports and
/// scanned for a session tag. The child is spawned with `kill_on_drop`, so
/// dropping the future returned by [`CommandInvoker::run`] (which is how the
/// runner enforces its deadline) kills the process.
#[derive(Debug, Clone)]
pub struct CommandInvoker {
    command: String,
    args: Vec<String>,
    prompt_mode: PromptMode,
    env: HashMap<String, String>,
}

impl CommandInvoker {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            prompt_mode: PromptMode::Stdin,
            env: HashMap::new(),
        }
    }

    pub fn from_settings(settings: &InvokerSettings) -> Self {
        Self {
            command: settings.command.clone(),
            args: settings.args.clone(),
            prompt_mode: settings.prompt_mode,
            env: settings.env.clone(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn prompt_mode(mut self, mode: PromptMode) -> Self {
        self.prompt_mode = mode;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub async fn run(&self, prompt: &str, cwd: &Path) -> InvocationOutcome {
        let mut cmd = self.build_command(prompt, cwd);

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                return InvocationOutcome::Failed {
                    exit_code: None,
                    stderr: format!("failed to spawn '{}': {e}", self.command),
                    session_id: None,
                }
            }
        };

        // Feed stdin from its own task so a chatty child can't deadlock us
        // on a full stdout pipe while we are still writing.
        if let Some(mut stdin) = child.stdin.take() {
            let data = prompt.as_bytes().to_vec();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&data).await {
                    tracing::debug!("prompt write ended early: {e}");
                }
                // stdin dropped here, closing the pipe
            });
        }

        let output = match child.wait_with_output().await {
            Ok(o) => o,
            Err(e) => {
                return InvocationOutcome::Failed {
                    exit_code: None,
                    stderr: format!("failed to wait for '{}': {e}", self.command),
                    session_id: None,
                }
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let session_id = extract_session_id(&stderr);

        if output.status.success() {
            InvocationOutcome::Completed {
                stdout,
                stderr,
                session_id,
            }
        } else {
            InvocationOutcome::Failed {
                exit_code: output.status.code(),
                stderr,
                session_id,
            }
        }
    }

    fn build_command(&self, prompt: &str, cwd: &Path) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args);
        if self.prompt_mode == PromptMode::Arg {
            cmd.arg(prompt);
        }

        // Nested agent CLIs refuse to start when they think they are inside
        // another agent session.
        cmd.env_remove("CLAUDECODE");
        for (k, v) in &self.env {
            cmd.env(k, v);
        }

        cmd.current_dir(cwd)
            .stdin(match self.prompt_mode {
                PromptMode::Stdin => Stdio::piped(),
                PromptMode::Arg => Stdio::null(),
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl Invoker for CommandInvoker {
    async fn invoke(&self, prompt: String, cwd: PathBuf) -> InvocationOutcome {
        self.run(&prompt, &cwd).await
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────
