//! Shared fixtures for the integration suites

#![allow(dead_code)]

use metal_build::{Builder, CompileCommand, CompileOutput, Toolchain, ToolchainError};
use metal_config::{ConfigLoader, PROJECT_FILE};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Writes every requested output and records what it was asked to do
///
/// Sources whose file name is in `fail` produce a compile error.
#[derive(Default)]
pub struct FakeToolchain {
    fail: Mutex<Vec<String>>,
    compiled: Mutex<Vec<String>>,
    composed: Mutex<Vec<PathBuf>>,
}

impl FakeToolchain {
    pub fn failing(names: &[&str]) -> Self {
        let toolchain = Self::default();
        toolchain.set_failing(names);
        toolchain
    }

    pub fn set_failing(&self, names: &[&str]) {
        *self.fail.lock().unwrap() = names.iter().map(|n| n.to_string()).collect();
    }

    /// File names compiled so far, sorted
    pub fn compiled(&self) -> Vec<String> {
        let mut names = self.compiled.lock().unwrap().clone();
        names.sort();
        names
    }

    /// Archive and application paths written so far, in completion order
    pub fn composed(&self) -> Vec<PathBuf> {
        self.composed.lock().unwrap().clone()
    }

    pub fn reset(&self) {
        self.compiled.lock().unwrap().clear();
        self.composed.lock().unwrap().clear();
    }

    fn compose(&self, members: &[PathBuf], output: &Path) -> Result<(), ToolchainError> {
        for member in members {
            if !member.exists() {
                return Err(ToolchainError::new(format!("{}: no such file", member.display())));
            }
        }
        fs::write(output, members.len().to_string()).unwrap();
        self.composed.lock().unwrap().push(output.to_path_buf());
        Ok(())
    }
}

impl Toolchain for FakeToolchain {
    fn compile(&self, command: &CompileCommand) -> Result<CompileOutput, ToolchainError> {
        let name = command
            .source
            .file_name()
            .unwrap()
            .to_string_lossy()
            .into_owned();
        self.compiled.lock().unwrap().push(name.clone());
        if self.fail.lock().unwrap().contains(&name) {
            return Err(ToolchainError::new(format!("{}:1:1: error: expected ';'", name)));
        }
        for import in &command.module_imports {
            if !import.interface.exists() {
                return Err(ToolchainError::new(format!(
                    "module '{}' not found",
                    import.name
                )));
            }
        }
        fs::write(&command.object, "obj").unwrap();
        if let Some(interface) = &command.interface {
            fs::write(interface, "bmi").unwrap();
        }
        Ok(CompileOutput {
            object: Some(command.object.clone()),
            interface: command.interface.clone(),
        })
    }

    fn archive(&self, members: &[PathBuf], _: &[String], output: &Path) -> Result<(), ToolchainError> {
        self.compose(members, output)
    }

    fn link(&self, members: &[PathBuf], _: &[String], output: &Path) -> Result<(), ToolchainError> {
        self.compose(members, output)
    }
}

pub fn write_file(root: &Path, rel: &str, content: &str) -> PathBuf {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, content).unwrap();
    path
}

pub fn create_config_file(dir: &Path, content: &str) -> PathBuf {
    write_file(dir, PROJECT_FILE, content)
}

/// Builder for the workspace at `dir`, isolated from any global config
pub fn builder(dir: &Path) -> Builder {
    let workspace = ConfigLoader::new()
        .with_global_config_path(dir.join("no-global.toml"))
        .load_workspace(dir)
        .unwrap();
    Builder::from_workspace(&workspace).unwrap().with_workers(2)
}
