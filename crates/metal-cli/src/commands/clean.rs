use super::builder;
use anyhow::{Context, Result};
use std::path::Path;

pub fn run(dir: Option<&Path>, quiet: bool) -> Result<()> {
    let (_, builder) = builder(dir, None).context("Failed to load project")?;
    builder.clean().context("Failed to clean build outputs")?;
    if !quiet {
        println!("Removed build outputs");
    }
    Ok(())
}
