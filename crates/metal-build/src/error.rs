/// Build engine error types
use metal_config::ConfigError;
use std::path::PathBuf;
use thiserror::Error;

pub type BuildResult<T> = Result<T, BuildError>;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Graph error: {0}")]
    Graph(String),

    #[error("Circular module dependency detected: {}", .cycle.join(" -> "))]
    Cycle { cycle: Vec<String> },

    #[error("Compilation failed for '{unit}': {diagnostics}")]
    Toolchain { unit: String, diagnostics: String },

    #[error("Failed to compose '{artifact}': {reason}")]
    Composite { artifact: String, reason: String },

    #[error("Fingerprint store error: {0}")]
    Store(String),

    #[error("I/O error at {path}: {error}")]
    IoError {
        path: PathBuf,
        error: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl BuildError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a graph error
    pub fn graph(message: impl Into<String>) -> Self {
        Self::Graph(message.into())
    }

    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        Self::IoError {
            path: path.into(),
            error,
        }
    }

    /// Create a toolchain error for a compile unit
    pub fn toolchain(unit: impl Into<String>, diagnostics: impl ToString) -> Self {
        Self::Toolchain {
            unit: unit.into(),
            diagnostics: diagnostics.to_string(),
        }
    }

    /// Create a composite error for an archive or application
    pub fn composite(artifact: impl Into<String>, reason: impl ToString) -> Self {
        Self::Composite {
            artifact: artifact.into(),
            reason: reason.to_string(),
        }
    }

    /// Errors that abort the build before any job is scheduled
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Toolchain { .. } | Self::Composite { .. })
    }
}
