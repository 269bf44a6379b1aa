//! Configuration Loader
//!
//! Handles loading a project, the projects it depends on, and merging the
//! settings that apply to a build with proper precedence.

use crate::global::GlobalConfig;
use crate::project::{ProjectConfig, ToolchainConfig};
use crate::{ConfigError, ConfigResult, PROJECT_FILE};
use std::env;
use std::path::{Path, PathBuf};

/// Configuration loader
///
/// Loads configuration from multiple sources and merges them with proper precedence:
/// 1. Global config (~/.metal/config.toml) - lowest priority
/// 2. Project config (./metal.toml) - overrides global
/// 3. Environment variables (METAL_*) - overrides project
/// 4. CLI flags - highest priority (handled by caller)
pub struct ConfigLoader {
    /// Cached global config path
    global_config_path: Option<PathBuf>,
}

/// A project's configuration together with where it was found
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedProject {
    /// Project name from `[project]`
    pub name: String,

    /// Directory containing metal.toml
    pub root: PathBuf,

    /// Parsed configuration
    pub config: ProjectConfig,
}

/// Settings resolved across global config, the root project and the environment
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Settings {
    /// Parallel compile jobs (None: one per available core)
    pub jobs: Option<usize>,

    /// Build target
    pub target: Option<String>,

    /// Toolchain programs
    pub toolchain: ToolchainConfig,
}

/// The root project plus every project reachable through its dependencies
#[derive(Debug, Clone)]
pub struct Workspace {
    /// Projects in dependency order: producers before consumers, root last
    pub projects: Vec<LoadedProject>,

    /// Resolved settings
    pub settings: Settings,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            global_config_path: None,
        }
    }

    /// Read the global configuration from `path` instead of ~/.metal/config.toml
    pub fn with_global_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.global_config_path = Some(path.into());
        self
    }

    /// Load the project containing `start_dir`
    ///
    /// Walks up the directory tree to find metal.toml, then applies
    /// environment variable overrides.
    pub fn load_from_directory(&mut self, start_dir: &Path) -> ConfigResult<LoadedProject> {
        let root = self.find_project_root(start_dir)?;
        let mut project = load_project_at(&root)?;
        project.config = self.apply_env_overrides(project.config)?;
        Ok(project)
    }

    /// Load the project containing `start_dir` and all of its dependencies
    pub fn load_workspace(&mut self, start_dir: &Path) -> ConfigResult<Workspace> {
        let root = self.load_from_directory(start_dir)?;
        let global = self.load_global_config()?;
        let settings = resolve_settings(&global, &root.config);

        let mut projects = Vec::new();
        let mut stack = Vec::new();
        visit(root, &mut stack, &mut projects)?;

        Ok(Workspace { projects, settings })
    }

    /// Find the nearest ancestor of `start_dir` containing metal.toml
    fn find_project_root(&self, start_dir: &Path) -> ConfigResult<PathBuf> {
        let mut current = start_dir.to_path_buf();

        loop {
            if current.join(PROJECT_FILE).exists() {
                return Ok(current);
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return Err(ConfigError::NotFound(start_dir.join(PROJECT_FILE))),
            }
        }
    }

    /// Load global configuration from ~/.metal/config.toml
    fn load_global_config(&mut self) -> ConfigResult<GlobalConfig> {
        let path = match &self.global_config_path {
            Some(path) => path.clone(),
            None => match GlobalConfig::global_config_path() {
                Ok(path) => {
                    self.global_config_path = Some(path.clone());
                    path
                }
                // No home directory: nothing to load
                Err(ConfigError::HomeNotFound) => return Ok(GlobalConfig::default()),
                Err(e) => return Err(e),
            },
        };

        // Global config is optional - if it doesn't exist, return default
        if !path.exists() {
            return Ok(GlobalConfig::default());
        }

        GlobalConfig::load_from_file(&path)
    }

    /// Apply environment variable overrides to the root project config
    ///
    /// METAL_JOBS, METAL_TARGET and METAL_OUTPUT override the `[build]` table.
    fn apply_env_overrides(&self, mut config: ProjectConfig) -> ConfigResult<ProjectConfig> {
        if let Ok(jobs) = env::var("METAL_JOBS") {
            let jobs = match jobs.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        field: "METAL_JOBS".to_string(),
                        reason: format!("expected a positive integer, got '{}'", jobs),
                    })
                }
            };
            config.build.get_or_insert_with(Default::default).jobs = Some(jobs);
        }

        if let Ok(target) = env::var("METAL_TARGET") {
            if !target.is_empty() {
                config.build.get_or_insert_with(Default::default).target = Some(target);
            }
        }

        if let Ok(output) = env::var("METAL_OUTPUT") {
            if !output.is_empty() {
                config.build.get_or_insert_with(Default::default).output =
                    Some(PathBuf::from(output));
            }
        }

        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadedProject {
    /// Project name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute output directory of this project
    pub fn output_dir(&self) -> PathBuf {
        self.root.join(self.config.output_dir())
    }
}

impl Workspace {
    /// The project the build was started from
    pub fn root(&self) -> &LoadedProject {
        // `visit` always pushes the root last
        &self.projects[self.projects.len() - 1]
    }

    /// Look up a project by name
    pub fn project(&self, name: &str) -> Option<&LoadedProject> {
        self.projects.iter().find(|p| p.name == name)
    }
}

fn load_project_at(dir: &Path) -> ConfigResult<LoadedProject> {
    let root = dir
        .canonicalize()
        .map_err(|_| ConfigError::NotFound(dir.join(PROJECT_FILE)))?;
    let config = ProjectConfig::load_from_file(&root.join(PROJECT_FILE))?;
    let name = config
        .project_name()
        .ok_or_else(|| ConfigError::ValidationError("missing [project] table".to_string()))?
        .to_string();
    Ok(LoadedProject { name, root, config })
}

/// Depth-first walk over path dependencies, emitting producers before consumers
fn visit(
    project: LoadedProject,
    stack: &mut Vec<LoadedProject>,
    out: &mut Vec<LoadedProject>,
) -> ConfigResult<()> {
    if let Some(done) = out.iter().find(|p| p.name == project.name) {
        if done.root != project.root {
            return Err(ConfigError::ValidationError(format!(
                "two projects named '{}': {} and {}",
                project.name,
                done.root.display(),
                project.root.display()
            )));
        }
        return Ok(());
    }

    if let Some(pos) = stack.iter().position(|p| p.root == project.root) {
        let mut names: Vec<&str> = stack[pos..].iter().map(|p| p.name.as_str()).collect();
        names.push(&project.name);
        return Err(ConfigError::DependencyCycle(names.join(" -> ")));
    }

    let dependencies: Vec<(String, PathBuf)> = project
        .config
        .dependencies
        .iter()
        .map(|(name, dep)| (name.clone(), project.root.join(&dep.path)))
        .collect();

    stack.push(project);
    for (name, path) in dependencies {
        let dependency = load_project_at(&path)?;
        if dependency.name != name {
            return Err(ConfigError::InvalidValue {
                field: format!("dependencies.{}", name),
                reason: format!(
                    "project at '{}' is named '{}'",
                    path.display(),
                    dependency.name
                ),
            });
        }
        visit(dependency, stack, out)?;
    }

    if let Some(project) = stack.pop() {
        out.push(project);
    }
    Ok(())
}

fn resolve_settings(global: &GlobalConfig, root: &ProjectConfig) -> Settings {
    let mut toolchain = global.toolchain.clone().unwrap_or_default();
    if let Some(project_toolchain) = &root.toolchain {
        toolchain.merge(project_toolchain);
    }

    Settings {
        jobs: root.jobs().or_else(|| global.default_jobs()),
        target: root
            .target()
            .or_else(|| global.default_target())
            .map(str::to_string),
        toolchain,
    }
}
