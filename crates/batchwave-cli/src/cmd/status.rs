use crate::cmd::load_config;
use crate::output::{print_json, print_summary, print_table};
use batchwave_core::{CheckpointStore, Progress, ResultStatus};
use std::collections::BTreeMap;
use std::path::Path;

pub fn run(root: &Path, name: Option<&str>, json: bool) -> anyhow::Result<()> {
    let (_, store) = load_config(root)?;
    match name {
        Some(name) => show(&store, name, json),
        None => list(&store, json),
    }
}

// ---------------------------------------------------------------------------
// status <name>
// ---------------------------------------------------------------------------

fn show(store: &CheckpointStore, name: &str, json: bool) -> anyhow::Result<()> {
    if let Some(progress) = store.load_progress(name)? {
        return show_checkpoint(store, &progress, json);
    }

    let Some(summary) = store.load_summary(name)? else {
        anyhow::bail!("no run named '{name}' (no checkpoint or summary)");
    };
    if json {
        print_json(&serde_json::json!({
            "name": name,
            "state": "finished",
            "summary": summary,
        }))?;
    } else {
        print_summary(&summary);
        println!();
        println!(
            "Finished {} (run {})",
            summary.completed_at.format("%Y-%m-%d %H:%M:%S UTC"),
            summary.run_id
        );
    }
    Ok(())
}

fn show_checkpoint(
    store: &CheckpointStore,
    progress: &Progress,
    json: bool,
) -> anyhow::Result<()> {
    let status = store.observed_status(progress)?;
    let holder = store.lock_holder(&progress.name)?;
    let counts = count_results(progress);

    if json {
        print_json(&serde_json::json!({
            "name": progress.name,
            "state": "in_progress",
            "status": status,
            "run_id": progress.run_id,
            "done": progress.completed.len(),
            "total": progress.items.len(),
            "counts": counts,
            "pid": holder.map(|h| h.pid),
            "started_at": progress.started_at,
            "updated_at": progress.updated_at,
        }))?;
        return Ok(());
    }

    println!(
        "{}: {} ({}/{} done)",
        progress.name,
        status,
        progress.completed.len(),
        progress.items.len()
    );
    if let Some(h) = holder {
        println!("Driven by pid {} since {}", h.pid, h.started_at.format("%H:%M:%S UTC"));
    } else if status.is_resumable() {
        println!(
            "Not running. Resume with: batchwave run {} --resume --prompt <FILE>",
            progress.name
        );
    }
    if !counts.is_empty() {
        println!();
        let rows = counts
            .iter()
            .map(|(status, n)| vec![status.to_string(), n.to_string()])
            .collect();
        print_table(&["STATUS", "COUNT"], rows);
    }
    Ok(())
}

fn count_results(progress: &Progress) -> BTreeMap<ResultStatus, usize> {
    let mut counts = BTreeMap::new();
    for r in &progress.results {
        *counts.entry(r.status).or_insert(0) += 1;
    }
    counts
}

// ---------------------------------------------------------------------------
// status (all runs)
// ---------------------------------------------------------------------------

fn list(store: &CheckpointStore, json: bool) -> anyhow::Result<()> {
    let mut rows = Vec::new();
    for name in store.list_runs()? {
        let row = match store.load_progress(&name)? {
            Some(p) => {
                let status = store.observed_status(&p)?;
                let failed = p.results.iter().filter(|r| r.status.is_failure()).count();
                let done = format!("{}/{}", p.completed.len(), p.items.len());
                (name, status.to_string(), done, failed)
            }
            None => match store.load_summary(&name)? {
                Some(s) => {
                    let done = format!("{}/{}", s.total, s.total);
                    (name, "finished".to_string(), done, s.failed_count())
                }
                None => continue,
            },
        };
        rows.push(row);
    }

    if json {
        let runs: Vec<_> = rows
            .iter()
            .map(|(name, status, done, failed)| {
                serde_json::json!({
                    "name": name,
                    "status": status,
                    "done": done,
                    "failed": failed,
                })
            })
            .collect();
        return print_json(&runs);
    }

    if rows.is_empty() {
        println!("No runs.");
        return Ok(());
    }
    let rows = rows
        .into_iter()
        .map(|(name, status, done, failed)| vec![name, status, done, failed.to_string()])
        .collect();
    print_table(&["RUN", "STATUS", "DONE", "FAILED"], rows);
    Ok(())
}
