//! Plan command - build order and pending work

use super::builder;
use anyhow::{Context, Result};
use metal_build::RecompileReason;
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct PlanEntry<'a> {
    group: usize,
    label: String,
    key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a RecompileReason>,
}

pub fn run(dir: Option<&Path>, target: Option<String>, json: bool) -> Result<()> {
    let (_, builder) = builder(dir, target).context("Failed to load project")?;
    let (graph, plan) = builder.plan().context("Failed to plan build")?;
    let dirty = builder
        .dirty_set(&graph)
        .context("Failed to compute fingerprints")?;

    let groups = plan.parallel_groups();
    let entries: Vec<PlanEntry> = groups
        .iter()
        .enumerate()
        .flat_map(|(group, ids)| ids.iter().map(move |id| (group + 1, *id)))
        .map(|(group, id)| PlanEntry {
            group,
            label: graph.label(id),
            key: graph.key(id),
            reason: dirty.reason(id),
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    println!(
        "{} nodes in {} groups, {} to rebuild",
        graph.len(),
        groups.len(),
        dirty.len()
    );
    let width = entries.iter().map(|e| e.label.len()).max().unwrap_or(0);
    for entry in &entries {
        let status = match entry.reason {
            Some(reason) => reason.to_string(),
            None => "up to date".to_string(),
        };
        println!("  [{}] {:width$}  {}", entry.group, entry.label, status, width = width);
    }
    Ok(())
}
