//! Scripted invoker shared by the engine tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::outcome::InvocationOutcome;
use crate::runner::Invoker;

/// Behaviour for one prompt.
#[derive(Clone)]
pub(crate) enum Script {
    Reply(&'static str),
    Fail,
    Hang,
}

/// Answers every prompt with `{"status":"updated"}` unless a script for that
/// exact prompt says otherwise. Tracks calls and peak concurrency.
#[derive(Default)]
pub(crate) struct MockInvoker {
    pub delay: Duration,
    pub scripts: HashMap<String, Script>,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub calls: Mutex<Vec<String>>,
}

impl MockInvoker {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn script(mut self, prompt: &str, script: Script) -> Self {
        self.scripts.insert(prompt.to_string(), script);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Invoker for MockInvoker {
    async fn invoke(&self, prompt: String, _cwd: PathBuf) -> InvocationOutcome {
        self.calls.lock().unwrap().push(prompt.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let script = self
            .scripts
            .get(&prompt)
            .cloned()
            .unwrap_or(Script::Reply(r#"{"status":"updated"}"#));
        if let Script::Hang = script {
            // This future is dropped on timeout, so leave the gauge first.
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(3600)).await;
            return InvocationOutcome::completed("");
        }

        tokio::time::sleep(self.delay).await;
        let outcome = match script {
            Script::Reply(text) => InvocationOutcome::completed(text),
            _ => InvocationOutcome::Failed {
                exit_code: Some(1),
                stderr: "backend unavailable".into(),
                session_id: None,
            },
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}
