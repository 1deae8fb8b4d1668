use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use batchwave_core::{ResultRecord, ResultStatus, WorkItem};
use regex::Regex;
use serde_json::Value;

use crate::outcome::{classify, InvocationOutcome, Reply};
use crate::runner::BatchJob;

static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();

fn placeholder_re() -> &'static Regex {
    PLACEHOLDER_RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("valid placeholder regex")
    })
}

/// Substitute `{{field}}` placeholders with values from `item`.
///
/// Strings are inserted as-is, other values as compact JSON. Placeholders
/// naming a field the item does not have are left in place.
pub fn render(template: &str, item: &WorkItem) -> String {
    placeholder_re()
        .replace_all(template, |caps: &regex::Captures<'_>| match item.field(&caps[1]) {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

// ─── TemplateJob ──────────────────────────────────────────────────────────

/// A batch over a fixed item list, one rendered prompt per item.
///
/// The model is expected to answer with a JSON object. A `status` field
/// naming a non-failure result status becomes the record status; anything
/// else is recorded as `processed`. Remaining fields are kept as detail.
#[derive(Debug, Clone)]
pub struct TemplateJob {
    items: Vec<WorkItem>,
    template: String,
    blocked: HashMap<String, Vec<String>>,
}

impl TemplateJob {
    pub fn new(items: Vec<WorkItem>, template: impl Into<String>) -> Self {
        Self {
            items,
            template: template.into(),
            blocked: HashMap::new(),
        }
    }

    /// Mark `id` as blocked by unsuccessful dependencies. It will be recorded
    /// as `skipped` without being invoked.
    pub fn block(mut self, id: impl Into<String>, deps: Vec<String>) -> Self {
        self.blocked.insert(id.into(), deps);
        self
    }

    pub fn blocked_count(&self) -> usize {
        self.blocked.len()
    }

    fn interpret(&self, item: &WorkItem, reply: Reply) -> ResultRecord {
        let mut record = match reply.value {
            Value::Object(mut fields) => {
                let reported = fields.remove("status");
                fields.remove("id");
                let status = match reported.as_ref().and_then(Value::as_str) {
                    Some(s) => match ResultStatus::parse(s) {
                        Some(st) if !st.is_failure() => st,
                        _ => {
                            fields.insert("reported_status".into(), Value::String(s.into()));
                            ResultStatus::Processed
                        }
                    },
                    None => ResultStatus::Processed,
                };
                let mut record = ResultRecord::new(item.id.clone(), status);
                record.detail = fields;
                record
            }
            other => ResultRecord::new(item.id.clone(), ResultStatus::Processed)
                .with_detail("output", other),
        };
        if let Some(sid) = reply.session_id {
            record = record.with_detail("session_id", sid);
        }
        record
    }
}

impl BatchJob for TemplateJob {
    fn scan(&self, _cwd: &Path) -> batchwave_core::Result<Vec<WorkItem>> {
        Ok(self.items.clone())
    }

    fn build_prompt(&self, item: &WorkItem) -> String {
        render(&self.template, item)
    }

    fn handle_result(&self, item: &WorkItem, outcome: InvocationOutcome) -> ResultRecord {
        match classify(&item.id, outcome) {
            Ok(reply) => self.interpret(item, reply),
            Err(record) => record,
        }
    }

    fn skip(&self, item: &WorkItem) -> Option<ResultRecord> {
        let deps = self.blocked.get(&item.id)?;
        Some(
            ResultRecord::new(item.id.clone(), ResultStatus::Skipped)
                .with_detail("error", format!("blocked by unsuccessful dependency: {}", deps.join(", ")))
                .with_detail("blocked_by", deps.clone()),
        )
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item() -> WorkItem {
        WorkItem::new("T1")
            .with_field("title", "Write docs")
            .with_field("priority", 2)
    }

    #[test]
    fn renders_fields_and_keeps_unknown_placeholders() {
        let out = render("[{{id}}] {{ title }} p={{priority}} {{missing}}", &item());
        assert_eq!(out, "[T1] Write docs p=2 {{missing}}");
    }

    #[test]
    fn reply_status_is_used_when_not_a_failure() {
        let job = TemplateJob::new(vec![item()], "{{id}}");
        let rec = job.handle_result(
            &item(),
            InvocationOutcome::completed(r#"{"status":"touched","files":3}"#),
        );
        assert_eq!(rec.status, ResultStatus::Touched);
        assert_eq!(rec.detail["files"], 3);
        assert!(!rec.detail.contains_key("status"));
    }

    #[test]
    fn failure_or_unknown_status_becomes_processed() {
        let job = TemplateJob::new(vec![item()], "{{id}}");
        let rec = job.handle_result(&item(), InvocationOutcome::completed(r#"{"status":"timeout"}"#));
        assert_eq!(rec.status, ResultStatus::Processed);
        assert_eq!(rec.detail["reported_status"], "timeout");

        let rec = job.handle_result(&item(), InvocationOutcome::completed(r#"{"summary":"ok"}"#));
        assert_eq!(rec.status, ResultStatus::Processed);
        assert_eq!(rec.detail["summary"], "ok");
    }

    #[test]
    fn non_object_reply_is_kept_as_output() {
        let job = TemplateJob::new(vec![item()], "{{id}}");
        let rec = job.handle_result(&item(), InvocationOutcome::completed("[1,2]"));
        assert_eq!(rec.status, ResultStatus::Processed);
        assert_eq!(rec.detail["output"], json!([1, 2]));
    }

    #[test]
    fn invocation_failures_pass_through_classification() {
        let job = TemplateJob::new(vec![item()], "{{id}}");
        let rec = job.handle_result(&item(), InvocationOutcome::completed("not json"));
        assert_eq!(rec.status, ResultStatus::GenError);
    }

    #[test]
    fn blocked_items_are_skipped_with_reason() {
        let job = TemplateJob::new(vec![item()], "{{id}}").block("T1", vec!["T0".into()]);
        let rec = job.skip(&item()).unwrap();
        assert_eq!(rec.status, ResultStatus::Skipped);
        assert_eq!(rec.reason(), Some("blocked by unsuccessful dependency: T0"));
        assert!(job.skip(&WorkItem::new("T2")).is_none());
    }
}
