use batchwave_core::RunSummary;
use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }
    }

    let line = |cells: Vec<String>| {
        let padded: Vec<String> = cells
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let w = widths.get(i).copied().unwrap_or(0);
                format!("{cell:w$}")
            })
            .collect();
        println!("{}", padded.join("  ").trim_end());
    };

    line(headers.iter().map(|h| h.to_string()).collect());
    line(widths.iter().map(|&w| "-".repeat(w)).collect());
    for row in rows {
        line(row);
    }
}

/// Human rendering of a finished run: headline, then one row per failure.
pub fn print_summary(summary: &RunSummary) {
    println!("{}: {}", summary.name, summary.headline());
    if summary.failed.is_empty() {
        return;
    }
    let rows = summary
        .failed
        .iter()
        .map(|f| {
            vec![
                f.id.clone(),
                f.status.to_string(),
                f.reason.clone().unwrap_or_default(),
            ]
        })
        .collect();
    println!();
    print_table(&["ITEM", "STATUS", "REASON"], rows);
}
