//! Commands command - export compile command records

use super::builder;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

pub fn run(dir: Option<&Path>, target: Option<String>, output: Option<&Path>) -> Result<()> {
    let (_, builder) = builder(dir, target).context("Failed to load project")?;
    let commands = builder
        .compile_commands()
        .context("Failed to compute compile commands")?;
    let json = serde_json::to_string_pretty(&commands)?;

    match output {
        Some(path) => {
            fs::write(path, json + "\n")
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), records = commands.len(), "compile commands written");
        }
        None => println!("{}", json),
    }
    Ok(())
}
