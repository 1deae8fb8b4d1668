use crate::cmd::load_config;
use crate::output::print_json;
use std::path::Path;

/// Remove the checkpoint and summary of `name`, plus those of its wave runs
/// (`<name>.wave-<n>`). Refuses while any of them is being driven.
pub fn run(root: &Path, name: &str, json: bool) -> anyhow::Result<()> {
    let (_, store) = load_config(root)?;

    let wave_prefix = format!("{name}.wave-");
    let mut targets = vec![name.to_string()];
    targets.extend(
        store
            .list_runs()?
            .into_iter()
            .filter(|run| run.starts_with(&wave_prefix)),
    );

    for target in &targets {
        if let Some(holder) = store.lock_holder(target)? {
            anyhow::bail!("run '{target}' is in progress (pid {}); not clearing", holder.pid);
        }
    }

    let mut cleared = Vec::new();
    for target in &targets {
        let progress = store.clear_progress(target)?;
        let summary = store.clear_summary(target)?;
        if progress || summary {
            cleared.push(target.clone());
        }
    }

    if json {
        print_json(&serde_json::json!({ "name": name, "cleared": cleared }))?;
    } else if cleared.is_empty() {
        println!("Nothing to clear for '{name}'.");
    } else {
        for run in &cleared {
            println!("Cleared '{run}'.");
        }
    }
    Ok(())
}
