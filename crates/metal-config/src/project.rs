//! Project Configuration (metal.toml)
//!
//! Handles project-level configuration stored in `metal.toml` at the project root.
//! A project declares its source sets, the archives and applications composed
//! from them, the channels through which it exposes artifacts to other
//! projects, and the projects it depends on.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Language kinds accepted in `[[sources]]` entries
pub const SOURCE_KINDS: [&str; 5] = ["c", "cpp", "cxx", "ixx", "asm"];

/// Default output directory, relative to the project root
pub const DEFAULT_OUTPUT: &str = "build";

/// Default channel for native dependencies
pub const DEFAULT_CHANNEL: &str = "native";

/// Project configuration from metal.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Project metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<ProjectSection>,

    /// Build settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildSection>,

    /// Toolchain programs (override the global configuration)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub toolchain: Option<ToolchainConfig>,

    /// Source sets, in declaration order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceSetConfig>,

    /// Archives, in declaration order
    #[serde(default, rename = "archive", skip_serializing_if = "Vec::is_empty")]
    pub archives: Vec<ArchiveConfig>,

    /// Applications, in declaration order
    #[serde(default, rename = "application", skip_serializing_if = "Vec::is_empty")]
    pub applications: Vec<ApplicationConfig>,

    /// Artifacts exposed to other projects, by channel name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub expose: BTreeMap<String, ExposeConfig>,

    /// Project dependencies, by project name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, DependencyConfig>,
}

/// Project metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProjectSection {
    /// Project name, unique within a workspace
    pub name: String,
}

/// Build settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct BuildSection {
    /// Output directory (default: "build")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,

    /// Number of parallel compile jobs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jobs: Option<usize>,

    /// Build target name; source sets with a `targets` filter only build for listed targets
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// Toolchain program names
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ToolchainConfig {
    /// C compiler
    #[serde(skip_serializing_if = "Option::is_none")]
    pub c: Option<String>,

    /// C++ compiler (translation units and module interfaces)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cxx: Option<String>,

    /// Assembler driver
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asm: Option<String>,

    /// Static archiver
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archiver: Option<String>,

    /// Linker driver
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linker: Option<String>,
}

impl ToolchainConfig {
    /// Overlay `other` on top of this configuration; set fields in `other` win
    pub fn merge(&mut self, other: &ToolchainConfig) {
        if other.c.is_some() {
            self.c = other.c.clone();
        }
        if other.cxx.is_some() {
            self.cxx = other.cxx.clone();
        }
        if other.asm.is_some() {
            self.asm = other.asm.clone();
        }
        if other.archiver.is_some() {
            self.archiver = other.archiver.clone();
        }
        if other.linker.is_some() {
            self.linker = other.linker.clone();
        }
    }
}

/// A `[[sources]]` entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct SourceSetConfig {
    /// Source set name; `name` + `kind` identify the set
    pub name: String,

    /// Language kind: c, cpp, cxx, ixx or asm
    pub kind: String,

    /// Source files or directories, relative to the project root
    #[serde(default)]
    pub sources: Vec<PathBuf>,

    /// Compile options passed through to the toolchain, in order
    #[serde(default)]
    pub compile_options: Vec<String>,

    /// Header search directories
    #[serde(default)]
    pub include_directories: Vec<PathBuf>,

    /// Header dependencies: directories or other source sets
    #[serde(default)]
    pub header_dependencies: Vec<HeaderRef>,

    /// Module dependencies: module names or module-interface source sets
    #[serde(default)]
    pub module_dependencies: Vec<ModuleRef>,

    /// Targets this source set builds for (empty: every target)
    #[serde(default)]
    pub targets: Vec<String>,
}

/// Reference to a source set of this project
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SourceSetRef {
    /// Source set name
    pub sources: String,

    /// Source set kind
    pub kind: String,
}

/// Header dependency declaration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum HeaderRef {
    /// Directory of headers, relative to the project root
    Directory(PathBuf),

    /// Another source set (usually a cpp header-only set)
    SourceSet(SourceSetRef),

    /// A header set exposed by a dependency channel
    Exposed(ExposedHeadersRef),
}

/// Reference to a header set another project exposes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ExposedHeadersRef {
    /// Name of the producer's cpp source set
    pub headers: String,
}

/// Module dependency declaration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ModuleRef {
    /// Exported module name, local or from a dependency channel
    Name(String),

    /// A module-interface (ixx) source set of this project
    SourceSet(SourceSetRef),
}

/// An `[[archive]]` entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ArchiveConfig {
    /// Archive name
    pub name: String,

    /// Member source sets, in link order
    #[serde(default)]
    pub sources: Vec<SourceSetRef>,

    /// Options passed through to the archiver
    #[serde(default)]
    pub link_options: Vec<String>,
}

/// An `[[application]]` entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,

    /// Member source sets, in link order
    #[serde(default)]
    pub sources: Vec<SourceSetRef>,

    /// Archives to link, local or exposed by a dependency, in link order
    #[serde(default)]
    pub archives: Vec<String>,

    /// Options passed through to the linker
    #[serde(default)]
    pub link_options: Vec<String>,
}

/// Artifacts exposed under one channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ExposeConfig {
    /// Exposed archive names
    #[serde(default)]
    pub archives: Vec<String>,

    /// Exposed module names
    #[serde(default)]
    pub modules: Vec<String>,

    /// Exposed header sets (names of cpp source sets)
    #[serde(default)]
    pub headers: Vec<String>,
}

/// A `[dependencies.<project>]` entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DependencyConfig {
    /// Path to the producer project, relative to this project's root
    pub path: PathBuf,

    /// Channel to consume (default: "native")
    #[serde(default = "default_channel")]
    pub channel: String,
}

fn default_channel() -> String {
    DEFAULT_CHANNEL.to_string()
}

impl ProjectConfig {
    /// Load project configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the project configuration
    pub fn validate(&self) -> ConfigResult<()> {
        let project = self.project.as_ref().ok_or_else(|| {
            ConfigError::ValidationError("missing [project] table".to_string())
        })?;
        if !is_valid_name(&project.name) {
            return Err(ConfigError::InvalidValue {
                field: "project.name".to_string(),
                reason: format!("invalid project name '{}'", project.name),
            });
        }

        if let Some(build) = &self.build {
            if build.jobs == Some(0) {
                return Err(ConfigError::InvalidValue {
                    field: "build.jobs".to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
        }

        for set in &self.sources {
            if set.name.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "sources.name".to_string(),
                    reason: "name cannot be empty".to_string(),
                });
            }
            validate_kind(&format!("sources '{}'", set.name), &set.kind)?;
            for header in &set.header_dependencies {
                match header {
                    HeaderRef::SourceSet(r) => {
                        validate_kind(&format!("sources '{}' header dependency", set.name), &r.kind)?;
                    }
                    HeaderRef::Exposed(r) if r.headers.is_empty() => {
                        return Err(ConfigError::InvalidValue {
                            field: format!("sources '{}' header dependency", set.name),
                            reason: "header set name cannot be empty".to_string(),
                        });
                    }
                    HeaderRef::Directory(_) | HeaderRef::Exposed(_) => {}
                }
            }
            for module in &set.module_dependencies {
                match module {
                    ModuleRef::Name(name) if name.is_empty() => {
                        return Err(ConfigError::InvalidValue {
                            field: format!("sources '{}' module dependency", set.name),
                            reason: "module name cannot be empty".to_string(),
                        });
                    }
                    ModuleRef::SourceSet(r) => {
                        validate_kind(&format!("sources '{}' module dependency", set.name), &r.kind)?;
                    }
                    ModuleRef::Name(_) => {}
                }
            }
        }

        let composite_names = self
            .archives
            .iter()
            .map(|a| a.name.as_str())
            .chain(self.applications.iter().map(|a| a.name.as_str()));
        for name in composite_names {
            if name.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "archive/application name".to_string(),
                    reason: "name cannot be empty".to_string(),
                });
            }
        }

        for (name, dependency) in &self.dependencies {
            if !is_valid_name(name) {
                return Err(ConfigError::InvalidValue {
                    field: "dependency name".to_string(),
                    reason: format!("invalid project name '{}'", name),
                });
            }
            if dependency.channel.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("dependencies.{}.channel", name),
                    reason: "channel cannot be empty".to_string(),
                });
            }
        }

        if self.expose.keys().any(|channel| channel.is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: "expose".to_string(),
                reason: "channel name cannot be empty".to_string(),
            });
        }
        for (channel, exposed) in &self.expose {
            for headers in &exposed.headers {
                let is_header_set = self
                    .sources
                    .iter()
                    .any(|set| &set.name == headers && set.kind == "cpp");
                if !is_header_set {
                    return Err(ConfigError::InvalidValue {
                        field: format!("expose.{}.headers", channel),
                        reason: format!("'{}' is not a cpp source set", headers),
                    });
                }
            }
        }

        Ok(())
    }

    /// Get the project name, if present
    pub fn project_name(&self) -> Option<&str> {
        self.project.as_ref().map(|p| p.name.as_str())
    }

    /// Output directory relative to the project root
    pub fn output_dir(&self) -> PathBuf {
        self.build
            .as_ref()
            .and_then(|b| b.output.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT))
    }

    /// Configured job count, if any
    pub fn jobs(&self) -> Option<usize> {
        self.build.as_ref().and_then(|b| b.jobs)
    }

    /// Configured build target, if any
    pub fn target(&self) -> Option<&str> {
        self.build.as_ref().and_then(|b| b.target.as_deref())
    }
}

fn validate_kind(field: &str, kind: &str) -> ConfigResult<()> {
    if SOURCE_KINDS.contains(&kind) {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            field: field.to_string(),
            reason: format!(
                "unknown kind '{}' (expected one of: {})",
                kind,
                SOURCE_KINDS.join(", ")
            ),
        })
    }
}

/// Project names appear in output paths and node keys
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
