pub mod build;
pub mod clean;
pub mod export;
pub mod plan;

use metal_build::{BuildError, BuildResult, Builder};
use metal_config::{ConfigLoader, Workspace};
use std::path::Path;

/// Load the workspace around `dir`, or around the current directory
pub fn load_workspace(dir: Option<&Path>) -> BuildResult<Workspace> {
    let start = match dir {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir().map_err(|e| BuildError::io(".", e))?,
    };
    Ok(ConfigLoader::new().load_workspace(&start)?)
}

/// Builder for the workspace around `dir`, with an optional target override
pub fn builder(dir: Option<&Path>, target: Option<String>) -> BuildResult<(Workspace, Builder)> {
    let workspace = load_workspace(dir)?;
    let mut builder = Builder::from_workspace(&workspace)?;
    if target.is_some() {
        builder = builder.with_target(target);
    }
    Ok((workspace, builder))
}
