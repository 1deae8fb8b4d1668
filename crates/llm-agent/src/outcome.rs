use std::sync::OnceLock;
use std::time::Duration;

use batchwave_core::{ResultRecord, ResultStatus};
use regex::Regex;
use serde_json::Value;

/// Longest slice of raw model output or stderr kept in a result record.
const MAX_EXCERPT: usize = 500;

// ─── InvocationOutcome ────────────────────────────────────────────────────

/// Raw result of one external invocation, before any interpretation.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationOutcome {
    /// Exit code 0.
    Completed {
        stdout: String,
        stderr: String,
        session_id: Option<String>,
    },
    /// Non-zero exit, death by signal, or the command could not be started.
    Failed {
        exit_code: Option<i32>,
        stderr: String,
        session_id: Option<String>,
    },
    /// Killed after exceeding its deadline.
    TimedOut { timeout: Duration },
}

impl InvocationOutcome {
    pub fn session_id(&self) -> Option<&str> {
        match self {
            InvocationOutcome::Completed { session_id, .. }
            | InvocationOutcome::Failed { session_id, .. } => session_id.as_deref(),
            InvocationOutcome::TimedOut { .. } => None,
        }
    }

    /// Convenience for tests and mock invokers.
    pub fn completed(stdout: impl Into<String>) -> Self {
        InvocationOutcome::Completed {
            stdout: stdout.into(),
            stderr: String::new(),
            session_id: None,
        }
    }
}

// ─── Session tag ──────────────────────────────────────────────────────────

static SESSION_RE: OnceLock<Regex> = OnceLock::new();

fn session_re() -> &'static Regex {
    SESSION_RE.get_or_init(|| {
        Regex::new(r"(?i)\[session[:=]\s*([A-Za-z0-9_.:\-]+)\s*\]|\bsession_id=([A-Za-z0-9_.:\-]+)")
            .expect("valid session tag regex")
    })
}

/// Find the session/trace id the backend printed on stderr, if any.
/// Accepts `[session: <id>]` and `session_id=<id>`; the last match wins.
pub fn extract_session_id(stderr: &str) -> Option<String> {
    session_re()
        .captures_iter(stderr)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)))
        .last()
        .map(|m| m.as_str().to_string())
}

// ─── Output parsing ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedOutput {
    Parsed(Value),
    Unparseable(String),
}

/// Strictly parse model output as JSON.
///
/// The only leniency is a single markdown code fence around the whole
/// payload. Anything else (prose around the JSON, trailing commentary) is
/// `Unparseable`.
pub fn parse_output(text: &str) -> ParsedOutput {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return ParsedOutput::Unparseable(String::new());
    }
    let body = strip_fence(trimmed).unwrap_or(trimmed);
    match serde_json::from_str::<Value>(body) {
        Ok(v) => ParsedOutput::Parsed(v),
        Err(_) => ParsedOutput::Unparseable(trimmed.to_string()),
    }
}

fn strip_fence(text: &str) -> Option<&str> {
    let rest = text.strip_prefix("```")?;
    let rest = rest.strip_suffix("```")?;
    // Drop the info string (`json`) on the opening line.
    let newline = rest.find('\n')?;
    Some(rest[newline + 1..].trim())
}

/// Keep the tail of `text`, at most [`MAX_EXCERPT`] characters.
pub fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    let count = trimmed.chars().count();
    if count <= MAX_EXCERPT {
        return trimmed.to_string();
    }
    trimmed.chars().skip(count - MAX_EXCERPT).collect()
}

// ─── Classification ───────────────────────────────────────────────────────

/// Output that survived the generic failure checks.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub value: Value,
    pub session_id: Option<String>,
}

/// Map the three generic failure modes to their result statuses:
///
/// - timeout → `timeout`
/// - non-zero exit / spawn failure → `llm_error`
/// - empty or unparseable output → `gen_error`
///
/// Anything else is handed back as a [`Reply`] for the job to interpret.
pub fn classify(id: &str, outcome: InvocationOutcome) -> Result<Reply, ResultRecord> {
    match outcome {
        InvocationOutcome::TimedOut { timeout } => Err(ResultRecord::new(id, ResultStatus::Timeout)
            .with_detail(
                "error",
                format!("timed out after {}s", timeout.as_secs_f64().ceil() as u64),
            )),
        InvocationOutcome::Failed {
            exit_code,
            stderr,
            session_id,
        } => {
            let mut message = match exit_code {
                Some(code) => format!("exited with code {code}"),
                None => "terminated without an exit code".to_string(),
            };
            let tail = excerpt(&stderr);
            if !tail.is_empty() {
                message.push_str(": ");
                message.push_str(&tail);
            }
            Err(with_session(
                ResultRecord::new(id, ResultStatus::LlmError).with_detail("error", message),
                session_id,
            ))
        }
        InvocationOutcome::Completed {
            stdout, session_id, ..
        } => match parse_output(&stdout) {
            ParsedOutput::Parsed(value) => Ok(Reply { value, session_id }),
            ParsedOutput::Unparseable(raw) if raw.is_empty() => Err(with_session(
                ResultRecord::new(id, ResultStatus::GenError).with_detail("error", "empty output"),
                session_id,
            )),
            ParsedOutput::Unparseable(raw) => Err(with_session(
                ResultRecord::new(id, ResultStatus::GenError)
                    .with_detail("error", "unparseable output")
                    .with_detail("raw", excerpt(&raw)),
                session_id,
            )),
        },
    }
}

fn with_session(record: ResultRecord, session_id: Option<String>) -> ResultRecord {
    match session_id {
        Some(sid) => record.with_detail("session_id", sid),
        None => record,
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_tag_formats() {
        assert_eq!(
            extract_session_id("starting\n[session: abc-123]\n"),
            Some("abc-123".into())
        );
        assert_eq!(extract_session_id("[SESSION=x_1]"), Some("x_1".into()));
        assert_eq!(
            extract_session_id("log session_id=s1\nlater session_id=s2"),
            Some("s2".into())
        );
        assert_eq!(extract_session_id("no tag here"), None);
    }

    #[test]
    fn parse_strict_json() {
        assert_eq!(
            parse_output(" {\"status\":\"updated\"} \n"),
            ParsedOutput::Parsed(json!({"status": "updated"}))
        );
    }

    #[test]
    fn parse_fenced_json() {
        let text = "```json\n{\"a\": 1}\n```";
        assert_eq!(parse_output(text), ParsedOutput::Parsed(json!({"a": 1})));
    }

    #[test]
    fn parse_rejects_prose_around_json() {
        let text = "Sure! Here is the result: {\"a\": 1}";
        assert!(matches!(parse_output(text), ParsedOutput::Unparseable(_)));
    }

    #[test]
    fn parse_empty_is_unparseable() {
        assert_eq!(parse_output("  \n"), ParsedOutput::Unparseable(String::new()));
    }

    #[test]
    fn excerpt_keeps_tail() {
        let long = format!("{}END", "x".repeat(1000));
        let ex = excerpt(&long);
        assert_eq!(ex.chars().count(), MAX_EXCERPT);
        assert!(ex.ends_with("END"));
    }

    #[test]
    fn classify_timeout() {
        let err = classify(
            "a",
            InvocationOutcome::TimedOut {
                timeout: Duration::from_millis(1500),
            },
        )
        .unwrap_err();
        assert_eq!(err.status, ResultStatus::Timeout);
        assert_eq!(err.reason(), Some("timed out after 2s"));
    }

    #[test]
    fn classify_failed_exit_keeps_stderr_and_session() {
        let err = classify(
            "a",
            InvocationOutcome::Failed {
                exit_code: Some(2),
                stderr: "rate limited".into(),
                session_id: Some("s9".into()),
            },
        )
        .unwrap_err();
        assert_eq!(err.status, ResultStatus::LlmError);
        assert_eq!(err.reason(), Some("exited with code 2: rate limited"));
        assert_eq!(err.detail["session_id"], "s9");
    }

    #[test]
    fn classify_empty_and_unparseable_are_distinct_from_llm_error() {
        let empty = classify("a", InvocationOutcome::completed("")).unwrap_err();
        assert_eq!(empty.status, ResultStatus::GenError);
        assert_eq!(empty.reason(), Some("empty output"));

        let garbage = classify("a", InvocationOutcome::completed("I could not do it")).unwrap_err();
        assert_eq!(garbage.status, ResultStatus::GenError);
        assert_eq!(garbage.detail["raw"], "I could not do it");
    }

    #[test]
    fn classify_success_returns_value() {
        let reply = classify("a", InvocationOutcome::completed(r#"{"ok":true}"#)).unwrap();
        assert_eq!(reply.value, json!({"ok": true}));
        assert_eq!(reply.session_id, None);
    }
}
