use std::collections::HashSet;
use std::sync::Arc;

use batchwave_core::paths::{validate_run_name, wave_run_name};
use batchwave_core::{BatchError, CheckpointStore, Plan, RunSummary, Wave};
use serde::Serialize;

use crate::runner::{BatchJob, BatchRunner, Invoker, RunOptions, RunnerConfig};
use crate::Result;

/// Outcome of one wave.
#[derive(Debug, Clone, Serialize)]
pub struct WaveReport {
    pub number: usize,
    pub run_name: String,
    pub summary: RunSummary,
    /// The summary came from an earlier invocation and nothing was re-run.
    pub reused: bool,
}

/// Runs a [`Plan`] one wave at a time, each wave as its own batch run named
/// `<name>.wave-<n>`.
///
/// Waves never overlap: wave `n + 1` starts only once every item of wave `n`
/// has a result. Between waves the executor accumulates the ids of tasks that
/// failed or were skipped and hands them to the job factory, which decides
/// what the next wave does about its dependents.
pub struct WaveExecutor<I> {
    name: String,
    invoker: Arc<I>,
    store: CheckpointStore,
    config: RunnerConfig,
}

impl<I: Invoker> WaveExecutor<I> {
    pub fn new(
        name: impl Into<String>,
        invoker: I,
        store: CheckpointStore,
        config: RunnerConfig,
    ) -> Result<Self> {
        let name = name.into();
        validate_run_name(&name)?;
        Ok(Self {
            name,
            invoker: Arc::new(invoker),
            store,
            config,
        })
    }

    /// Execute every wave of `plan`.
    ///
    /// `make_job` is called once per wave that actually runs, with the wave
    /// and the ids of all tasks that have so far failed or been skipped.
    ///
    /// With `options.resume`, a wave that already has a summary is reused and
    /// a wave with a checkpoint is resumed; either must cover exactly the
    /// wave's tasks, otherwise the plan changed underneath and the execution
    /// fails with [`BatchError::PlanChanged`]. Without resume, summaries left
    /// by an earlier execution are cleared first so a later resume cannot
    /// mistake them for this execution's.
    pub async fn execute<J, F>(
        &self,
        plan: &Plan,
        options: RunOptions,
        mut make_job: F,
    ) -> Result<Vec<WaveReport>>
    where
        J: BatchJob,
        F: FnMut(&Wave, &HashSet<String>) -> J,
    {
        let _lock = self.store.acquire_lock(&self.name)?;

        if !options.resume {
            for wave in &plan.waves {
                self.store
                    .clear_summary(&wave_run_name(&self.name, wave.number))?;
            }
        }

        tracing::info!(
            run = %self.name,
            waves = plan.waves.len(),
            tasks = plan.task_count(),
            "executing wave plan"
        );

        let mut unsuccessful: HashSet<String> = HashSet::new();
        let mut reports = Vec::with_capacity(plan.waves.len());

        for wave in &plan.waves {
            let run_name = wave_run_name(&self.name, wave.number);
            let wave_ids = wave.ids();

            let (checkpoint, finished) = if options.resume {
                match self.store.load_progress(&run_name)? {
                    Some(progress) => (Some(progress), None),
                    None => (None, self.store.load_summary(&run_name)?),
                }
            } else {
                (None, None)
            };

            // Reused or resumed state must belong to this wave's tasks, or
            // tasks that joined the wave since would never run.
            let matches_wave = match (&checkpoint, &finished) {
                (Some(progress), _) => progress.covers(wave_ids.iter().copied()),
                (None, Some(summary)) => summary.covers(wave_ids.iter().copied()),
                (None, None) => true,
            };
            if !matches_wave {
                return Err(BatchError::PlanChanged {
                    name: self.name.clone(),
                    wave: wave.number,
                }
                .into());
            }

            let (summary, reused) = match finished {
                Some(summary) => {
                    tracing::info!(
                        wave = wave.number,
                        run = %run_name,
                        "wave already finished, reusing"
                    );
                    (summary, true)
                }
                None => {
                    tracing::info!(
                        wave = wave.number,
                        tasks = wave.tasks.len(),
                        "starting wave {}: {}",
                        wave.number,
                        wave_ids.join(", ")
                    );
                    let job = make_job(wave, &unsuccessful);
                    let runner = BatchRunner::with_shared(
                        run_name.clone(),
                        Arc::new(job),
                        Arc::clone(&self.invoker),
                        self.store.clone(),
                        self.config.clone(),
                    )?;
                    let summary = runner
                        .run(RunOptions {
                            resume: checkpoint.is_some(),
                            cwd: options.cwd.clone(),
                        })
                        .await?;
                    (summary, false)
                }
            };

            unsuccessful.extend(summary.failed_ids());
            unsuccessful.extend(summary.skipped.iter().cloned());
            tracing::info!(wave = wave.number, "{}", summary.headline());

            reports.push(WaveReport {
                number: wave.number,
                run_name,
                summary,
                reused,
            });
        }

        Ok(reports)
    }
}

/// For each task of `wave`, the dependencies found in `unsuccessful`.
/// Tasks with none are omitted.
pub fn blocked_tasks(wave: &Wave, unsuccessful: &HashSet<String>) -> Vec<(String, Vec<String>)> {
    wave.tasks
        .iter()
        .filter_map(|task| {
            let bad: Vec<String> = task
                .deps
                .iter()
                .filter(|d| unsuccessful.contains(*d))
                .cloned()
                .collect();
            (!bad.is_empty()).then(|| (task.id.clone(), bad))
        })
        .collect()
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateJob;
    use crate::testing::{MockInvoker, Script};
    use crate::AgentError;
    use batchwave_core::planner::plan;
    use batchwave_core::task::TaskRecord;
    use batchwave_core::{Progress, ResultRecord, ResultStatus, WorkItem};
    use std::collections::HashMap;
    use std::time::Duration;
    use tempfile::TempDir;

    fn tasks() -> Vec<TaskRecord> {
        vec![
            TaskRecord::new("T1", "schema"),
            TaskRecord::new("T2", "api").with_description("depends on [T1]"),
            TaskRecord::new("T3", "ui").with_description("blocked by [T2]"),
            TaskRecord::new("T4", "lint"),
        ]
    }

    fn by_id(tasks: &[TaskRecord]) -> HashMap<String, TaskRecord> {
        tasks.iter().map(|t| (t.id.clone(), t.clone())).collect()
    }

    /// The CLI's policy: prompt is the task id; dependents of unsuccessful
    /// tasks are skipped.
    fn factory(
        records: HashMap<String, TaskRecord>,
        skip_failed_deps: bool,
    ) -> impl FnMut(&Wave, &HashSet<String>) -> TemplateJob {
        move |wave, unsuccessful| {
            let items: Vec<WorkItem> = wave
                .tasks
                .iter()
                .map(|t| records[&t.id].to_work_item())
                .collect();
            let mut job = TemplateJob::new(items, "{{id}}");
            if skip_failed_deps {
                for (id, deps) in blocked_tasks(wave, unsuccessful) {
                    job = job.block(id, deps);
                }
            }
            job
        }
    }

    fn executor(
        invoker: MockInvoker,
        dir: &TempDir,
    ) -> (WaveExecutor<MockInvoker>, CheckpointStore) {
        let store = CheckpointStore::new(dir.path().join("state"));
        let exec = WaveExecutor::new(
            "feature",
            invoker,
            store.clone(),
            RunnerConfig {
                concurrency: 4,
                timeout: Duration::from_secs(5),
            },
        )
        .unwrap();
        (exec, store)
    }

    fn options(dir: &TempDir, resume: bool) -> RunOptions {
        RunOptions {
            resume,
            cwd: dir.path().to_path_buf(),
        }
    }

    #[tokio::test]
    async fn waves_run_in_order() {
        let dir = TempDir::new().unwrap();
        let (exec, store) = executor(MockInvoker::default(), &dir);
        let tasks = tasks();
        let plan = plan(tasks.clone()).unwrap();

        let reports = exec
            .execute(&plan, options(&dir, false), factory(by_id(&tasks), false))
            .await
            .unwrap();

        assert_eq!(reports.len(), 3);
        let calls = exec.invoker.calls();
        let pos = |id: &str| calls.iter().position(|c| c == id).unwrap();
        assert!(pos("T1") < pos("T2"));
        assert!(pos("T4") < pos("T2"));
        assert!(pos("T2") < pos("T3"));
        assert_eq!(reports[0].run_name, "feature.wave-1");
        assert!(store.load_summary("feature.wave-3").unwrap().is_some());
        assert!(!store.lock_path("feature").exists());
    }

    #[tokio::test]
    async fn dependents_of_failures_are_skipped_transitively() {
        let dir = TempDir::new().unwrap();
        let (exec, _store) = executor(MockInvoker::default().script("T1", Script::Fail), &dir);
        let tasks = tasks();
        let plan = plan(tasks.clone()).unwrap();

        let reports = exec
            .execute(&plan, options(&dir, false), factory(by_id(&tasks), true))
            .await
            .unwrap();

        assert_eq!(reports[0].summary.failed_ids(), HashSet::from(["T1".to_string()]));
        assert_eq!(reports[1].summary.skipped, vec!["T2"]);
        assert_eq!(reports[2].summary.skipped, vec!["T3"]);
        let mut calls = exec.invoker.calls();
        calls.sort();
        assert_eq!(calls, vec!["T1", "T4"]);
    }

    #[tokio::test]
    async fn without_skip_policy_dependents_still_run() {
        let dir = TempDir::new().unwrap();
        let (exec, _store) = executor(MockInvoker::default().script("T1", Script::Fail), &dir);
        let tasks = tasks();
        let plan = plan(tasks.clone()).unwrap();

        let reports = exec
            .execute(&plan, options(&dir, false), factory(by_id(&tasks), false))
            .await
            .unwrap();

        assert_eq!(reports[1].summary.count(ResultStatus::Updated), 1);
        assert_eq!(exec.invoker.calls().len(), 4);
    }

    #[tokio::test]
    async fn resume_reuses_finished_waves_and_continues_interrupted_one() {
        let dir = TempDir::new().unwrap();
        let (exec, store) = executor(MockInvoker::default(), &dir);
        let tasks = tasks();
        let plan = plan(tasks.clone()).unwrap();

        // Wave 1 finished earlier; wave 2 was interrupted before T2 finished.
        let wave1: Vec<WorkItem> = ["T1", "T4"].iter().map(|id| WorkItem::new(*id)).collect();
        let mut p1 = Progress::start("feature.wave-1", wave1).unwrap();
        p1.record(ResultRecord::new("T1", ResultStatus::Updated)).unwrap();
        p1.record(ResultRecord::new("T4", ResultStatus::Touched)).unwrap();
        store.finish(&p1.summarize()).unwrap();
        let p2 = Progress::start("feature.wave-2", vec![WorkItem::new("T2")]).unwrap();
        store.save_progress(&p2).unwrap();

        let reports = exec
            .execute(&plan, options(&dir, true), factory(by_id(&tasks), true))
            .await
            .unwrap();

        assert!(reports[0].reused);
        assert_eq!(reports[0].summary.count(ResultStatus::Touched), 1);
        assert!(!reports[1].reused);
        assert_eq!(reports[1].summary.run_id, p2.run_id);
        assert_eq!(exec.invoker.calls(), vec!["T2", "T3"]);
    }

    #[tokio::test]
    async fn resume_refuses_state_recorded_for_other_tasks() {
        let dir = TempDir::new().unwrap();
        let (exec, store) = executor(MockInvoker::default(), &dir);
        let tasks = tasks();
        let plan = plan(tasks.clone()).unwrap();

        // Wave 1 was recorded before T4 existed.
        let mut old = Progress::start("feature.wave-1", vec![WorkItem::new("T1")]).unwrap();
        old.record(ResultRecord::new("T1", ResultStatus::Updated)).unwrap();
        store.finish(&old.summarize()).unwrap();

        let err = exec
            .execute(&plan, options(&dir, true), factory(by_id(&tasks), false))
            .await
            .unwrap_err();
        assert!(
            matches!(err, AgentError::Core(BatchError::PlanChanged { wave: 1, .. })),
            "{err:?}"
        );

        // Wave 1 now matches, but wave 2's checkpoint was taken over other tasks.
        let mut p1 = Progress::start(
            "feature.wave-1",
            vec![WorkItem::new("T1"), WorkItem::new("T4")],
        )
        .unwrap();
        p1.record(ResultRecord::new("T1", ResultStatus::Updated)).unwrap();
        p1.record(ResultRecord::new("T4", ResultStatus::Updated)).unwrap();
        store.finish(&p1.summarize()).unwrap();
        let p2 = Progress::start(
            "feature.wave-2",
            vec![WorkItem::new("T2"), WorkItem::new("T9")],
        )
        .unwrap();
        store.save_progress(&p2).unwrap();

        let err = exec
            .execute(&plan, options(&dir, true), factory(by_id(&tasks), false))
            .await
            .unwrap_err();
        assert!(
            matches!(err, AgentError::Core(BatchError::PlanChanged { wave: 2, .. })),
            "{err:?}"
        );
        assert!(exec.invoker.calls().is_empty());
        assert!(store.load_progress("feature.wave-2").unwrap().is_some());
    }

    #[tokio::test]
    async fn fresh_execution_ignores_old_summaries() {
        let dir = TempDir::new().unwrap();
        let (exec, store) = executor(MockInvoker::default(), &dir);
        let tasks = tasks();
        let plan = plan(tasks.clone()).unwrap();

        let stale = Progress::start("feature.wave-1", vec![WorkItem::new("T1")]).unwrap();
        store.write_summary(&stale.summarize()).unwrap();

        let reports = exec
            .execute(&plan, options(&dir, false), factory(by_id(&tasks), false))
            .await
            .unwrap();
        assert!(reports.iter().all(|r| !r.reused));
        assert_ne!(reports[0].summary.run_id, stale.run_id);
        assert_eq!(exec.invoker.calls().len(), 4);
    }

    #[test]
    fn blocked_tasks_lists_only_unsuccessful_deps() {
        let plan = plan(vec![
            TaskRecord::new("A", "a"),
            TaskRecord::new("B", "b"),
            TaskRecord::new("C", "c").with_description("depends on [A], [B]"),
        ])
        .unwrap();
        let unsuccessful = HashSet::from(["B".to_string()]);
        let blocked = blocked_tasks(&plan.waves[1], &unsuccessful);
        assert_eq!(blocked, vec![("C".to_string(), vec!["B".to_string()])]);
    }
}
