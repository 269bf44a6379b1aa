//! Metal Configuration System
//!
//! Provides configuration management for Metal native projects including:
//! - Project configuration (metal.toml): source sets, archives, applications,
//!   exposed channels and project dependencies
//! - Global user configuration (~/.metal/config.toml): toolchain programs and
//!   default worker count
//! - Workspace loading that follows path dependencies between projects
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded and merged in the following order (later overrides earlier):
//! 1. Global config (~/.metal/config.toml)
//! 2. Project config (./metal.toml)
//! 3. Environment variables (METAL_JOBS, METAL_TARGET, METAL_OUTPUT)
//! 4. CLI flags
//!
//! # Example
//!
//! ```no_run
//! use metal_config::ConfigLoader;
//! use std::path::Path;
//!
//! let mut loader = ConfigLoader::new();
//! let workspace = loader.load_workspace(Path::new(".")).unwrap();
//! println!("building {}", workspace.root().name());
//! ```

pub mod global;
pub mod loader;
pub mod project;

use std::path::PathBuf;
use thiserror::Error;

/// File name of a project configuration
pub const PROJECT_FILE: &str = "metal.toml";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax in {file}: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Circular project dependency: {0}")]
    DependencyCycle(String),

    #[error("Home directory not found")]
    HomeNotFound,
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

// Re-export main types
pub use global::GlobalConfig;
pub use loader::{ConfigLoader, LoadedProject, Settings, Workspace};
pub use project::{
    ApplicationConfig, ArchiveConfig, BuildSection, DependencyConfig, ExposeConfig, ExposedHeadersRef,
    HeaderRef, ModuleRef, ProjectConfig, ProjectSection, SourceSetConfig, SourceSetRef,
    ToolchainConfig,
};
