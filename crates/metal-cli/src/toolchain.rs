//! Clang-style process toolchain
//!
//! Turns compile command records into compiler, archiver and linker
//! invocations. Module interfaces are precompiled with `--precompile` and the
//! resulting interface is then compiled to an object; importers receive every
//! interface through `-fmodule-file=<name>=<path>`.

use metal_build::{CompileCommand, CompileOutput, SourceKind, Toolchain, ToolchainError};
use metal_config::ToolchainConfig;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

const DEFAULT_C: &str = "clang";
const DEFAULT_CXX: &str = "clang++";
const DEFAULT_ARCHIVER: &str = "ar";
const DEFAULT_ARCHIVE_FLAGS: &str = "rcs";

/// One external process run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<OsString>,
    pub directory: Option<PathBuf>,
}

impl Invocation {
    fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            directory: None,
        }
    }

    fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn current_dir(mut self, dir: &Path) -> Self {
        self.directory = Some(dir.to_path_buf());
        self
    }

    fn run(&self) -> Result<(), ToolchainError> {
        debug!(program = %self.program, args = ?self.args, "running");
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(dir) = &self.directory {
            command.current_dir(dir);
        }

        let output = command
            .output()
            .map_err(|e| ToolchainError::new(format!("cannot run {}: {}", self.program, e)))?;
        if output.status.success() {
            return Ok(());
        }

        let mut diagnostics = String::from_utf8_lossy(&output.stderr).into_owned();
        diagnostics.push_str(&String::from_utf8_lossy(&output.stdout));
        if diagnostics.trim().is_empty() {
            diagnostics = format!("{} exited with {}", self.program, output.status);
        }
        Err(ToolchainError::new(diagnostics.trim_end()))
    }
}

/// Toolchain driving clang-compatible programs
#[derive(Debug, Clone)]
pub struct ProcessToolchain {
    c: String,
    cxx: String,
    asm: String,
    archiver: String,
    linker: String,
}

impl ProcessToolchain {
    /// Programs from configuration, clang defaults for anything unset
    pub fn from_config(config: &ToolchainConfig) -> Self {
        let c = config.c.clone().unwrap_or_else(|| DEFAULT_C.to_string());
        let cxx = config.cxx.clone().unwrap_or_else(|| DEFAULT_CXX.to_string());
        Self {
            asm: config.asm.clone().unwrap_or_else(|| c.clone()),
            archiver: config
                .archiver
                .clone()
                .unwrap_or_else(|| DEFAULT_ARCHIVER.to_string()),
            linker: config.linker.clone().unwrap_or_else(|| cxx.clone()),
            c,
            cxx,
        }
    }

    fn compiler(&self, kind: SourceKind) -> &str {
        match kind {
            SourceKind::C => &self.c,
            SourceKind::Asm => &self.asm,
            SourceKind::Cpp | SourceKind::Cxx | SourceKind::Ixx => &self.cxx,
        }
    }

    /// Processes needed to compile one unit, in order
    pub fn compile_invocations(&self, command: &CompileCommand) -> Vec<Invocation> {
        let program = self.compiler(command.kind);
        let common = |invocation: Invocation| {
            let mut invocation = invocation.current_dir(&command.directory);
            if let Some(target) = &command.target {
                invocation = invocation.arg(format!("--target={}", target));
            }
            invocation
                .args(command.options.iter())
                .args(command.include_dirs.iter().map(|dir| {
                    let mut flag = OsString::from("-I");
                    flag.push(dir);
                    flag
                }))
                .args(command.module_imports.iter().map(|import| {
                    let mut flag = OsString::from(format!("-fmodule-file={}=", import.name));
                    flag.push(&import.interface);
                    flag
                }))
        };

        match (command.kind, &command.interface) {
            (SourceKind::Ixx, Some(interface)) => vec![
                common(Invocation::new(program))
                    .args(["-x", "c++-module", "--precompile"])
                    .arg(&command.source)
                    .arg("-o")
                    .arg(interface),
                common(Invocation::new(program))
                    .arg("-c")
                    .arg(interface)
                    .arg("-o")
                    .arg(&command.object),
            ],
            _ => vec![common(Invocation::new(program))
                .arg("-c")
                .arg(&command.source)
                .arg("-o")
                .arg(&command.object)],
        }
    }

    /// Archiver run; declared options replace the default `rcs`
    pub fn archive_invocation(&self, members: &[PathBuf], options: &[String], output: &Path) -> Invocation {
        let invocation = Invocation::new(&self.archiver);
        let invocation = if options.is_empty() {
            invocation.arg(DEFAULT_ARCHIVE_FLAGS)
        } else {
            invocation.args(options.iter())
        };
        invocation.arg(output).args(members.iter())
    }

    pub fn link_invocation(&self, members: &[PathBuf], options: &[String], output: &Path) -> Invocation {
        Invocation::new(&self.linker)
            .args(members.iter())
            .args(options.iter())
            .arg("-o")
            .arg(output)
    }
}

impl Toolchain for ProcessToolchain {
    fn compile(&self, command: &CompileCommand) -> Result<CompileOutput, ToolchainError> {
        for invocation in self.compile_invocations(command) {
            invocation.run()?;
        }
        Ok(CompileOutput {
            object: Some(command.object.clone()),
            interface: command.interface.clone(),
        })
    }

    fn archive(&self, members: &[PathBuf], options: &[String], output: &Path) -> Result<(), ToolchainError> {
        // ar appends to an existing archive
        if output.exists() {
            fs::remove_file(output).map_err(|e| {
                ToolchainError::new(format!("cannot replace {}: {}", output.display(), e))
            })?;
        }
        self.archive_invocation(members, options, output).run()
    }

    fn link(&self, members: &[PathBuf], options: &[String], output: &Path) -> Result<(), ToolchainError> {
        self.link_invocation(members, options, output).run()
    }
}
