use crate::output::{print_json, print_table};
use anyhow::Context;
use batchwave_core::planner::{self, Plan};
use batchwave_core::task::load_tasks;
use std::path::Path;

pub fn run(tasks: &Path, json: bool) -> anyhow::Result<()> {
    let plan = load_plan(tasks)?;

    if json {
        print_json(&plan)?;
        return Ok(());
    }

    render_human(&plan);
    Ok(())
}

fn load_plan(tasks: &Path) -> anyhow::Result<Plan> {
    let records = load_tasks(tasks)
        .with_context(|| format!("failed to load tasks from {}", tasks.display()))?;
    planner::plan(records).context("failed to plan tasks")
}

fn render_human(plan: &Plan) {
    if plan.waves.is_empty() {
        println!("No pending tasks.");
        return;
    }

    println!(
        "{} task(s) in {} wave(s)",
        plan.task_count(),
        plan.waves.len()
    );
    for wave in &plan.waves {
        println!();
        println!("WAVE {}", wave.number);
        let rows = wave
            .tasks
            .iter()
            .map(|t| {
                vec![
                    t.id.clone(),
                    format!("P{}", t.priority),
                    t.title.clone(),
                    t.deps.join(", "),
                ]
            })
            .collect();
        print_table(&["ID", "PRIORITY", "TITLE", "AFTER"], rows);
    }
}
