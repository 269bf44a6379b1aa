//! Compile command records
//!
//! The same records drive the toolchain and the exported command database,
//! and can be computed without building anything.

use crate::graph::{Graph, Node, NodeId};
use crate::kind::{CompileStrategy, SourceKind};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A module interface made available to a compile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleImport {
    pub name: String,
    /// Precompiled interface path
    pub interface: PathBuf,
}

/// Everything a toolchain needs to compile one unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileCommand {
    /// Stable node key
    pub unit: String,
    pub source: PathBuf,
    pub kind: SourceKind,
    /// Project root, the working directory for the compile
    pub directory: PathBuf,
    /// Declared compile options, unchanged
    pub options: Vec<String>,
    pub include_dirs: Vec<PathBuf>,
    /// Interfaces imported directly or transitively, sorted by name
    pub module_imports: Vec<ModuleImport>,
    /// Module exported by this unit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    pub object: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// Compile command for a node
///
/// None for composites and header-only units, which never compile.
pub fn compile_command(graph: &Graph, id: NodeId) -> Option<CompileCommand> {
    let Node::Unit(unit) = graph.node(id) else {
        return None;
    };
    if unit.strategy() == CompileStrategy::HeaderOnly {
        return None;
    }

    let module_imports = graph
        .module_imports(id)
        .into_iter()
        .filter_map(|import| {
            let name = graph.node(import).as_unit()?.module.as_ref()?.name.clone();
            let interface = graph.interface_path(import)?;
            Some(ModuleImport { name, interface })
        })
        .collect();

    Some(CompileCommand {
        unit: graph.key(id),
        source: unit.source.clone(),
        kind: unit.kind,
        directory: graph.layout(id).root().to_path_buf(),
        options: unit.flags.clone(),
        include_dirs: unit.include_dirs.clone(),
        module_imports,
        module: unit.module.as_ref().map(|m| m.name.clone()),
        object: graph.output_path(id)?,
        interface: graph.interface_path(id),
        target: graph.target().map(str::to_string),
    })
}

/// Compile commands for every compiled unit, in node order
pub fn compile_commands(graph: &Graph) -> Vec<CompileCommand> {
    graph
        .node_ids()
        .filter_map(|id| compile_command(graph, id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::build;
    use crate::registry::{CompileOptions, HeaderDependency, ModuleDependency, Registry};
    use pretty_assertions::assert_eq;

    fn project() -> Registry {
        let mut reg = Registry::new("bar", "/work/bar");
        let cpp = reg
            .register(
                "main",
                SourceKind::Cpp,
                vec!["include/util.hpp".into()],
                CompileOptions::new().with_include_dirs(["include"]),
            )
            .unwrap();
        reg.register(
            "main",
            SourceKind::Ixx,
            vec!["src/greet.ixx".into()],
            CompileOptions::new().with_flags(["--std=c++20"]),
        )
        .unwrap();
        let cxx = reg
            .register(
                "main",
                SourceKind::Cxx,
                vec!["src/main.cpp".into()],
                CompileOptions::new().with_flags(["-g", "--std=c++20"]),
            )
            .unwrap();
        reg.declare_header_dependency(cxx, HeaderDependency::SourceSet(cpp))
            .unwrap();
        reg.declare_module_dependency(cxx, ModuleDependency::Name("greet".into()))
            .unwrap();
        reg.add_application("hello", vec![cxx], vec![]).unwrap();
        reg
    }

    #[test]
    fn test_commands_skip_headers_and_composites() {
        let graph = build(&project(), vec![]).unwrap();
        let commands = compile_commands(&graph);
        let units: Vec<&str> = commands.iter().map(|c| c.unit.as_str()).collect();
        assert_eq!(
            units,
            vec!["bar/main-ixx/src/greet.ixx", "bar/main-cxx/src/main.cpp"]
        );
    }

    #[test]
    fn test_command_contents() {
        let graph = build(&project(), vec![]).unwrap();
        let commands = compile_commands(&graph);

        let greet = &commands[0];
        assert_eq!(greet.module.as_deref(), Some("greet"));
        assert_eq!(
            greet.interface,
            Some(PathBuf::from(
                "/work/bar/build/bmi/main/ixx/default/src/greet.ixx.pcm"
            ))
        );

        let main = &commands[1];
        assert_eq!(main.options, vec!["-g", "--std=c++20"]);
        assert_eq!(main.include_dirs, vec![PathBuf::from("/work/bar/include")]);
        assert_eq!(main.directory, PathBuf::from("/work/bar"));
        assert_eq!(
            main.module_imports,
            vec![ModuleImport {
                name: "greet".to_string(),
                interface: greet.interface.clone().unwrap(),
            }]
        );
        assert_eq!(
            main.object,
            PathBuf::from("/work/bar/build/obj/main/cxx/default/src/main.cpp.o")
        );
        assert_eq!(main.interface, None);
    }

    #[test]
    fn test_commands_are_deterministic() {
        let a = serde_json::to_string(&compile_commands(&build(&project(), vec![]).unwrap())).unwrap();
        let b = serde_json::to_string(&compile_commands(&build(&project(), vec![]).unwrap())).unwrap();
        assert_eq!(a, b);
        assert!(a.contains("\"kind\":\"cxx\""));
    }
}
