use crate::cmd::{
    check_failures, load_config, read_template, runner_config, runtime, RunnerOverrides,
};
use crate::output::{print_json, print_summary};
use anyhow::Context;
use batchwave_core::planner;
use batchwave_core::task::{load_tasks, TaskRecord};
use batchwave_core::WorkItem;
use llm_agent::{blocked_tasks, CommandInvoker, RunOptions, TemplateJob, WaveExecutor, WaveReport};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(clap::Args)]
pub struct WavesArgs {
    /// Run name; each wave runs as `<name>.wave-<n>`
    pub name: String,

    /// Task snapshot (JSON array, or object with a `tasks` array)
    #[arg(long)]
    pub tasks: PathBuf,

    /// Prompt template; `{{field}}` is replaced from each task
    #[arg(long)]
    pub prompt: PathBuf,

    /// Reuse finished waves and resume an interrupted one
    #[arg(long)]
    pub resume: bool,

    /// Record tasks whose dependencies failed or were skipped as skipped
    #[arg(long)]
    pub skip_failed_deps: bool,

    #[command(flatten)]
    pub overrides: RunnerOverrides,
}

pub fn run(root: &Path, args: WavesArgs, json: bool) -> anyhow::Result<()> {
    let (config, store) = load_config(root)?;
    let template = read_template(&args.prompt)?;
    let tasks = load_tasks(&args.tasks)
        .with_context(|| format!("failed to load tasks from {}", args.tasks.display()))?;
    let plan = planner::plan(tasks.clone()).context("failed to plan tasks")?;
    let records: HashMap<String, TaskRecord> =
        tasks.into_iter().map(|t| (t.id.clone(), t)).collect();

    let executor = WaveExecutor::new(
        args.name.as_str(),
        CommandInvoker::from_settings(&config.invoker),
        store,
        runner_config(&config, args.overrides),
    )
    .context("invalid wave setup")?;

    let skip_failed_deps = args.skip_failed_deps;
    let reports = runtime()?
        .block_on(executor.execute(
            &plan,
            RunOptions {
                resume: args.resume,
                cwd: root.to_path_buf(),
            },
            |wave, unsuccessful| {
                let items: Vec<WorkItem> = wave
                    .tasks
                    .iter()
                    .filter_map(|t| records.get(&t.id))
                    .map(TaskRecord::to_work_item)
                    .collect();
                let mut job = TemplateJob::new(items, template.clone());
                if skip_failed_deps {
                    for (id, deps) in blocked_tasks(wave, unsuccessful) {
                        job = job.block(id, deps);
                    }
                }
                job
            },
        ))
        .with_context(|| format!("waves '{}' failed", args.name))?;

    if json {
        print_json(&serde_json::json!({ "name": args.name, "waves": reports }))?;
    } else {
        render_human(&reports);
    }
    check_failures(&args.name, reports.iter().map(|r| &r.summary))
}

fn render_human(reports: &[WaveReport]) {
    for (i, report) in reports.iter().enumerate() {
        if i > 0 {
            println!();
        }
        let reused = if report.reused { " (reused)" } else { "" };
        println!("WAVE {}{reused}", report.number);
        print_summary(&report.summary);
    }
}
