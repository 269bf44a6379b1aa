//! Output path scheme
//!
//! Every output lives under a project's output directory:
//!
//! ```text
//! <output>/obj/<set>/<kind>/<target>/<source relative to root>.o
//! <output>/bmi/<set>/ixx/<target>/<source relative to root>.pcm
//! <output>/lib/<target>/lib<name>.a
//! <output>/bin/<target>/<name>
//! <output>/.metal/<target>/fingerprints.json
//! ```
//!
//! `<target>` is the build target, or `default` when none is set.

use crate::kind::SourceKind;
use std::path::{Component, Path, PathBuf};

const DEFAULT_TARGET_DIR: &str = "default";

/// Deterministic output paths for one project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
    output_dir: PathBuf,
    target: Option<String>,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>, output_dir: impl Into<PathBuf>, target: Option<String>) -> Self {
        Self {
            root: root.into(),
            output_dir: output_dir.into(),
            target,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Directory name for the current target
    pub fn target_dir(&self) -> &str {
        self.target.as_deref().unwrap_or(DEFAULT_TARGET_DIR)
    }

    /// Object file for a compile unit
    pub fn object_path(&self, set_name: &str, kind: SourceKind, source: &Path) -> PathBuf {
        let dir = self
            .output_dir
            .join("obj")
            .join(set_name)
            .join(kind.as_str())
            .join(self.target_dir());
        with_suffix(dir.join(self.relative(source)), "o")
    }

    /// Precompiled module interface for an ixx unit
    pub fn interface_path(&self, set_name: &str, source: &Path) -> PathBuf {
        let dir = self
            .output_dir
            .join("bmi")
            .join(set_name)
            .join(SourceKind::Ixx.as_str())
            .join(self.target_dir());
        with_suffix(dir.join(self.relative(source)), "pcm")
    }

    pub fn archive_path(&self, name: &str) -> PathBuf {
        self.output_dir
            .join("lib")
            .join(self.target_dir())
            .join(format!("lib{}.a", name))
    }

    pub fn application_path(&self, name: &str) -> PathBuf {
        self.output_dir
            .join("bin")
            .join(self.target_dir())
            .join(format!("{}{}", name, std::env::consts::EXE_SUFFIX))
    }

    /// Location of the persisted fingerprint store, one per target
    pub fn store_path(&self) -> PathBuf {
        self.output_dir
            .join(".metal")
            .join(self.target_dir())
            .join("fingerprints.json")
    }

    /// Source path relative to the project root
    ///
    /// Sources outside the root keep their full path minus the root prefix,
    /// so two units never share an output.
    pub fn relative(&self, source: &Path) -> PathBuf {
        match source.strip_prefix(&self.root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => {
                let mut rel = PathBuf::from("_external");
                for component in source.components() {
                    if let Component::Normal(part) = component {
                        rel.push(part);
                    }
                }
                rel
            }
        }
    }
}

/// `main.cpp` + `o` -> `main.cpp.o`
fn with_suffix(path: PathBuf, suffix: &str) -> PathBuf {
    let mut os = path.into_os_string();
    os.push(".");
    os.push(suffix);
    PathBuf::from(os)
}
