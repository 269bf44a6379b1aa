//! Archive and application composition

use crate::error::BuildError;
use crate::graph::{Graph, Node, NodeId};
use crate::registry::CompositeKind;
use crate::toolchain::Toolchain;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// A composed archive or application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub kind: CompositeKind,
    pub path: PathBuf,
    /// Inputs in the order they were handed to the toolchain
    pub members: Vec<PathBuf>,
}

/// Failure to compose one composite
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeError {
    pub artifact: String,
    pub reason: String,
}

impl fmt::Display for CompositeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to compose '{}': {}", self.artifact, self.reason)
    }
}

impl std::error::Error for CompositeError {}

impl From<CompositeError> for BuildError {
    fn from(err: CompositeError) -> Self {
        BuildError::composite(err.artifact, err.reason)
    }
}

/// Turns finished member outputs into archives and applications
pub struct Composer;

impl Composer {
    /// Compose the composite node `id`
    ///
    /// Link inputs are the member objects in declaration order, then linked
    /// archives in declaration order. Header-only members contribute nothing.
    pub fn compose(
        graph: &Graph,
        id: NodeId,
        outputs: &BTreeMap<NodeId, PathBuf>,
        toolchain: &dyn Toolchain,
    ) -> Result<Artifact, CompositeError> {
        let Node::Composite(composite) = graph.node(id) else {
            return Err(CompositeError {
                artifact: graph.label(id),
                reason: "not an archive or application".to_string(),
            });
        };
        let fail = |reason: String| CompositeError {
            artifact: composite.name.clone(),
            reason,
        };

        let mut members = Vec::new();
        let inputs = composite
            .members
            .iter()
            .filter(|member| !graph.node(**member).is_header_only())
            .chain(&composite.archives);
        for input in inputs {
            let path = outputs
                .get(input)
                .ok_or_else(|| fail(format!("no output recorded for {}", graph.label(*input))))?;
            if !path.exists() {
                return Err(fail(format!("missing member output {}", path.display())));
            }
            members.push(path.clone());
        }

        let path = graph
            .output_path(id)
            .ok_or_else(|| fail("no output path".to_string()))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| fail(format!("cannot create {}: {}", parent.display(), e)))?;
        }

        let result = match composite.kind {
            CompositeKind::Archive => toolchain.archive(&members, &composite.link_options, &path),
            CompositeKind::Application => toolchain.link(&members, &composite.link_options, &path),
        };
        result.map_err(|e| fail(e.diagnostics))?;

        debug!(artifact = %composite.name, kind = %composite.kind, members = members.len(), "composed");
        Ok(Artifact {
            name: composite.name.clone(),
            kind: composite.kind,
            path,
            members,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CompileCommand;
    use crate::graph::build;
    use crate::kind::SourceKind;
    use crate::registry::{CompileOptions, Registry};
    use crate::toolchain::{CompileOutput, ToolchainError};
    use pretty_assertions::assert_eq;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, Vec<PathBuf>, Vec<String>)>>,
        fail_link: bool,
    }

    impl Toolchain for Recorder {
        fn compile(&self, _: &CompileCommand) -> Result<CompileOutput, ToolchainError> {
            unreachable!("composer never compiles")
        }

        fn archive(&self, members: &[PathBuf], options: &[String], output: &Path) -> Result<(), ToolchainError> {
            self.calls
                .lock()
                .unwrap()
                .push(("archive".into(), members.to_vec(), options.to_vec()));
            fs::write(output, "ar").unwrap();
            Ok(())
        }

        fn link(&self, members: &[PathBuf], options: &[String], output: &Path) -> Result<(), ToolchainError> {
            if self.fail_link {
                return Err(ToolchainError::new("undefined reference to `main'"));
            }
            self.calls
                .lock()
                .unwrap()
                .push(("link".into(), members.to_vec(), options.to_vec()));
            fs::write(output, "exe").unwrap();
            Ok(())
        }
    }

    fn setup(temp: &TempDir) -> (Graph, BTreeMap<NodeId, PathBuf>) {
        let mut reg = Registry::new("bar", temp.path());
        let cxx = reg
            .register("main", SourceKind::Cxx, vec!["b.cpp".into(), "a.cpp".into()], CompileOptions::new())
            .unwrap();
        reg.add_archive("core", vec![cxx], vec!["rcs".into()]).unwrap();
        reg.add_application("app", vec![cxx], vec!["-g".into()]).unwrap();
        reg.link_archive("app", "core").unwrap();
        let graph = build(&reg, vec![]).unwrap();

        let mut outputs = BTreeMap::new();
        for id in [NodeId(0), NodeId(1)] {
            let path = graph.output_path(id).unwrap();
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, "obj").unwrap();
            outputs.insert(id, path);
        }
        (graph, outputs)
    }

    #[test]
    fn test_archive_then_application() {
        let temp = TempDir::new().unwrap();
        let (graph, mut outputs) = setup(&temp);
        let toolchain = Recorder::default();
        let core = NodeId(2);
        let app = NodeId(3);

        let archive = Composer::compose(&graph, core, &outputs, &toolchain).unwrap();
        assert_eq!(archive.kind, CompositeKind::Archive);
        assert!(archive.path.ends_with("lib/default/libcore.a"));
        outputs.insert(core, archive.path.clone());

        let application = Composer::compose(&graph, app, &outputs, &toolchain).unwrap();
        assert_eq!(
            application.members,
            vec![
                outputs[&NodeId(0)].clone(),
                outputs[&NodeId(1)].clone(),
                archive.path.clone()
            ]
        );

        let calls = toolchain.calls.lock().unwrap();
        assert_eq!(calls[0].2, vec!["rcs"]);
        assert_eq!(calls[1].0, "link");
        assert_eq!(calls[1].2, vec!["-g"]);
    }

    #[test]
    fn test_missing_member_output() {
        let temp = TempDir::new().unwrap();
        let (graph, outputs) = setup(&temp);
        fs::remove_file(&outputs[&NodeId(1)]).unwrap();

        let err = Composer::compose(&graph, NodeId(2), &outputs, &Recorder::default()).unwrap_err();
        assert_eq!(err.artifact, "core");
        assert!(err.reason.contains("missing member output"));
    }

    #[test]
    fn test_unrecorded_archive_is_error() {
        let temp = TempDir::new().unwrap();
        let (graph, outputs) = setup(&temp);
        let err = Composer::compose(&graph, NodeId(3), &outputs, &Recorder::default()).unwrap_err();
        assert!(err.reason.contains("bar:archive core"));
    }

    #[test]
    fn test_link_failure_is_composite_error() {
        let temp = TempDir::new().unwrap();
        let (graph, mut outputs) = setup(&temp);
        let toolchain = Recorder {
            fail_link: true,
            ..Default::default()
        };
        let archive = Composer::compose(&graph, NodeId(2), &outputs, &toolchain).unwrap();
        outputs.insert(NodeId(2), archive.path);

        let err: BuildError = Composer::compose(&graph, NodeId(3), &outputs, &toolchain)
            .unwrap_err()
            .into();
        assert!(matches!(err, BuildError::Composite { .. }));
        assert!(err.to_string().contains("undefined reference"));
    }
}
