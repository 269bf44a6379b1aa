//! Build command - incremental parallel build of the workspace

use super::builder;
use crate::toolchain::ProcessToolchain;
use anyhow::{bail, Result};
use metal_build::{BuildResult, BuildSummary};
use std::path::Path;

/// Build command arguments
#[derive(Default)]
pub struct BuildArgs {
    /// Number of parallel jobs
    pub jobs: Option<usize>,
    /// Build target
    pub target: Option<String>,
    /// Remove outputs before building
    pub clean: bool,
    /// Ignore recorded fingerprints
    pub force: bool,
    /// JSON output
    pub json: bool,
    /// Quiet output (errors only)
    pub quiet: bool,
}

/// Run the build command, returning the process exit code
pub fn run(dir: Option<&Path>, args: BuildArgs) -> Result<i32> {
    if args.jobs == Some(0) {
        bail!("--jobs must be at least 1");
    }

    let summary = match build(dir, &args) {
        Ok(summary) => summary,
        Err(error) => BuildSummary::aborted(&error),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else if summary.is_success() {
        if !args.quiet {
            println!("{}", summary);
        }
    } else {
        eprintln!("{}", summary);
    }

    Ok(summary.exit_code())
}

fn build(dir: Option<&Path>, args: &BuildArgs) -> BuildResult<BuildSummary> {
    let (workspace, mut builder) = builder(dir, args.target.clone())?;
    if let Some(jobs) = args.jobs {
        builder = builder.with_workers(jobs);
    }
    builder = builder.with_force(args.force);

    if args.clean {
        builder.clean()?;
    }

    let toolchain = ProcessToolchain::from_config(&workspace.settings.toolchain);
    let context = builder.build(&toolchain)?;
    Ok(context.summary)
}
