//! Toolchain boundary
//!
//! The engine never formats command lines; it hands a [`CompileCommand`] or a
//! member list to a [`Toolchain`] and records what comes back.

use crate::commands::CompileCommand;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Compiler, archiver or linker failure, with the tool's diagnostics
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{diagnostics}")]
pub struct ToolchainError {
    pub diagnostics: String,
}

impl ToolchainError {
    pub fn new(diagnostics: impl Into<String>) -> Self {
        Self {
            diagnostics: diagnostics.into(),
        }
    }
}

/// Files produced by one compile
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOutput {
    pub object: Option<PathBuf>,
    /// Precompiled interface, for module interface units
    pub interface: Option<PathBuf>,
}

/// External toolchain invoked by the executor
///
/// Implementations are called concurrently from worker threads. Option lists
/// arrive exactly as declared.
pub trait Toolchain: Send + Sync {
    /// Compile one unit to the paths named in the command
    fn compile(&self, command: &CompileCommand) -> Result<CompileOutput, ToolchainError>;

    /// Bundle objects into a static archive at `output`
    fn archive(&self, members: &[PathBuf], options: &[String], output: &Path)
        -> Result<(), ToolchainError>;

    /// Link objects and archives into an executable at `output`
    fn link(&self, members: &[PathBuf], options: &[String], output: &Path)
        -> Result<(), ToolchainError>;
}
