use crate::cmd::{
    check_failures, load_config, read_template, runner_config, runtime, RunnerOverrides,
};
use crate::output::{print_json, print_summary};
use anyhow::Context;
use batchwave_core::item::load_manifest;
use llm_agent::{BatchRunner, CommandInvoker, RunOptions, TemplateJob};
use std::path::{Path, PathBuf};

#[derive(clap::Args)]
pub struct RunArgs {
    /// Run name; also names the checkpoint files
    pub name: String,

    /// JSON work item manifest (array, or object with an `items` array)
    #[arg(long, required_unless_present = "resume")]
    pub items: Option<PathBuf>,

    /// Prompt template; `{{field}}` is replaced from each item
    #[arg(long)]
    pub prompt: PathBuf,

    /// Continue the interrupted run from its checkpoint
    #[arg(long)]
    pub resume: bool,

    #[command(flatten)]
    pub overrides: RunnerOverrides,
}

pub fn run(root: &Path, args: RunArgs, json: bool) -> anyhow::Result<()> {
    let (config, store) = load_config(root)?;
    let template = read_template(&args.prompt)?;

    // On resume the item list comes from the checkpoint.
    let items = match (&args.items, args.resume) {
        (Some(path), false) => load_manifest(path)
            .with_context(|| format!("failed to load items from {}", path.display()))?,
        (Some(_), true) => {
            tracing::warn!("--items is ignored with --resume");
            Vec::new()
        }
        (None, _) => Vec::new(),
    };

    let runner = BatchRunner::new(
        args.name.as_str(),
        TemplateJob::new(items, template),
        CommandInvoker::from_settings(&config.invoker),
        store,
        runner_config(&config, args.overrides),
    )
    .context("invalid run setup")?;

    let summary = runtime()?
        .block_on(runner.run(RunOptions {
            resume: args.resume,
            cwd: root.to_path_buf(),
        }))
        .with_context(|| format!("run '{}' failed", args.name))?;

    if json {
        print_json(&summary)?;
    } else {
        print_summary(&summary);
    }
    check_failures(&args.name, [&summary])
}
