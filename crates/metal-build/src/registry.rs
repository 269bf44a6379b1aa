//! Source set registry
//!
//! Collects one project's declarations: source sets, their header and module
//! dependencies, archives, applications, channel exposures and project
//! dependencies. Nothing is compiled or resolved here; [`crate::graph`]
//! freezes a registry into graph nodes.

use crate::error::{BuildError, BuildResult};
use crate::kind::SourceKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

/// Handle to a source set within its registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceSetId(pub u32);

impl SourceSetId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Compile options of a source set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOptions {
    /// Flags passed to the toolchain unchanged, in order
    pub flags: Vec<String>,
    /// Header search directories
    pub include_dirs: Vec<PathBuf>,
    /// Targets the set builds for; empty means every target
    pub targets: BTreeSet<String>,
}

impl CompileOptions {
    /// Create empty compile options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag list
    pub fn with_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.flags = flags.into_iter().map(Into::into).collect();
        self
    }

    /// Set the header search directories
    pub fn with_include_dirs<I, P>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.include_dirs = dirs.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict the set to the given targets
    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.targets = targets.into_iter().map(Into::into).collect();
        self
    }

    /// Whether the set builds for `target`
    ///
    /// An unfiltered set builds for every target, and a build without a
    /// target builds every set.
    pub fn enabled_for(&self, target: Option<&str>) -> bool {
        match target {
            Some(target) => self.targets.is_empty() || self.targets.contains(target),
            None => true,
        }
    }
}

/// A declared header dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderDependency {
    /// A directory of headers; added to the search path and hashed
    Directory(PathBuf),
    /// Another source set of the same project
    SourceSet(SourceSetId),
    /// A header set exposed by a dependency channel
    Name(String),
}

/// A declared module dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleDependency {
    /// An exported module name, local or imported through a channel
    Name(String),
    /// Every interface of a local ixx source set
    SourceSet(SourceSetId),
}

/// A named collection of sources of one kind
#[derive(Debug, Clone)]
pub struct SourceSet {
    pub name: String,
    pub kind: SourceKind,
    /// Absolute source paths, in declaration order
    pub files: Vec<PathBuf>,
    pub options: CompileOptions,
    pub header_dependencies: Vec<HeaderDependency>,
    pub module_dependencies: Vec<ModuleDependency>,
}

impl SourceSet {
    /// `name-kind`, as used in output paths and node keys
    pub fn label(&self) -> String {
        format!("{}-{}", self.name, self.kind)
    }
}

/// Kind of composite artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompositeKind {
    Archive,
    Application,
}

impl fmt::Display for CompositeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Archive => f.write_str("archive"),
            Self::Application => f.write_str("application"),
        }
    }
}

/// A declared archive or application
#[derive(Debug, Clone)]
pub struct CompositeSpec {
    pub name: String,
    pub kind: CompositeKind,
    /// Member source sets, in link order
    pub members: Vec<SourceSetId>,
    /// Linked archive names (applications only), in link order
    pub archives: Vec<String>,
    pub link_options: Vec<String>,
}

/// An item published under a channel
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Exposed {
    Archive(String),
    Module(String),
    /// A cpp source set, by name
    Headers(String),
}

impl fmt::Display for Exposed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Archive(name) => write!(f, "archive '{}'", name),
            Self::Module(name) => write!(f, "module '{}'", name),
            Self::Headers(name) => write!(f, "headers '{}'", name),
        }
    }
}

/// A dependency on another project's channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectDependency {
    /// Producer project name
    pub project: String,
    /// Channel name
    pub channel: String,
}

impl ProjectDependency {
    pub fn new(project: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            channel: channel.into(),
        }
    }
}

/// Declarations of one project
#[derive(Debug, Clone)]
pub struct Registry {
    project: String,
    root: PathBuf,
    output_dir: PathBuf,
    source_sets: Vec<SourceSet>,
    composites: Vec<CompositeSpec>,
    exposures: BTreeMap<String, Vec<Exposed>>,
    dependencies: Vec<ProjectDependency>,
}

impl Registry {
    /// Create an empty registry for the project rooted at `root`
    pub fn new(project: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            project: project.into(),
            output_dir: root.join("build"),
            root,
            source_sets: Vec::new(),
            composites: Vec::new(),
            exposures: BTreeMap::new(),
            dependencies: Vec::new(),
        }
    }

    /// Set the output directory (relative paths resolve against the root)
    pub fn with_output_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.output_dir = self.resolve(dir.as_ref());
        self
    }

    /// Register a source set
    ///
    /// Relative file and include paths resolve against the project root.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        kind: SourceKind,
        files: Vec<PathBuf>,
        options: CompileOptions,
    ) -> BuildResult<SourceSetId> {
        let name = name.into();
        if name.is_empty() {
            return Err(BuildError::configuration(format!(
                "project '{}': source set name cannot be empty",
                self.project
            )));
        }
        if self.find(&name, kind).is_some() {
            return Err(BuildError::configuration(format!(
                "project '{}': source set '{}-{}' is declared twice",
                self.project, name, kind
            )));
        }
        if files.is_empty() && kind.requires_sources() {
            return Err(BuildError::configuration(format!(
                "project '{}': source set '{}-{}' has no source files",
                self.project, name, kind
            )));
        }

        let mut resolved = Vec::with_capacity(files.len());
        for file in files {
            let file = self.resolve(&file);
            if resolved.contains(&file) {
                return Err(BuildError::configuration(format!(
                    "project '{}': source set '{}-{}' lists {} twice",
                    self.project,
                    name,
                    kind,
                    file.display()
                )));
            }
            resolved.push(file);
        }

        let options = CompileOptions {
            include_dirs: options
                .include_dirs
                .iter()
                .map(|dir| self.resolve(dir))
                .collect(),
            ..options
        };

        let id = SourceSetId(self.source_sets.len() as u32);
        self.source_sets.push(SourceSet {
            name,
            kind,
            files: resolved,
            options,
            header_dependencies: Vec::new(),
            module_dependencies: Vec::new(),
        });
        Ok(id)
    }

    /// Declare that `id` includes headers from a directory or another set
    pub fn declare_header_dependency(
        &mut self,
        id: SourceSetId,
        dependency: HeaderDependency,
    ) -> BuildResult<()> {
        self.check(id)?;
        let dependency = match dependency {
            HeaderDependency::Directory(dir) => HeaderDependency::Directory(self.resolve(&dir)),
            HeaderDependency::SourceSet(other) => {
                self.check(other)?;
                if other == id {
                    return Err(BuildError::configuration(format!(
                        "project '{}': source set '{}' cannot depend on itself",
                        self.project,
                        self.source_sets[id.index()].label()
                    )));
                }
                HeaderDependency::SourceSet(other)
            }
            HeaderDependency::Name(name) if name.is_empty() => {
                return Err(BuildError::configuration(format!(
                    "project '{}': empty header set name",
                    self.project
                )));
            }
            HeaderDependency::Name(name) => HeaderDependency::Name(name),
        };

        let set = &mut self.source_sets[id.index()];
        if !set.header_dependencies.contains(&dependency) {
            set.header_dependencies.push(dependency);
        }
        Ok(())
    }

    /// Declare that `id` imports a module by name or every interface of an ixx set
    pub fn declare_module_dependency(
        &mut self,
        id: SourceSetId,
        dependency: ModuleDependency,
    ) -> BuildResult<()> {
        self.check(id)?;
        match &dependency {
            ModuleDependency::Name(name) if name.is_empty() => {
                return Err(BuildError::configuration(format!(
                    "project '{}': empty module name",
                    self.project
                )));
            }
            ModuleDependency::SourceSet(other) => {
                self.check(*other)?;
                let producer = &self.source_sets[other.index()];
                if producer.kind != SourceKind::Ixx {
                    return Err(BuildError::configuration(format!(
                        "project '{}': module dependency on '{}', which is not a module interface set",
                        self.project,
                        producer.label()
                    )));
                }
            }
            ModuleDependency::Name(_) => {}
        }

        let set = &mut self.source_sets[id.index()];
        if !set.module_dependencies.contains(&dependency) {
            set.module_dependencies.push(dependency);
        }
        Ok(())
    }

    /// Declare an archive built from the given source sets
    pub fn add_archive(
        &mut self,
        name: impl Into<String>,
        members: Vec<SourceSetId>,
        link_options: Vec<String>,
    ) -> BuildResult<()> {
        let name = name.into();
        if members.is_empty() {
            return Err(BuildError::configuration(format!(
                "project '{}': archive '{}' has no member source sets",
                self.project, name
            )));
        }
        self.add_composite(name, CompositeKind::Archive, members, link_options)
    }

    /// Declare an application built from the given source sets
    pub fn add_application(
        &mut self,
        name: impl Into<String>,
        members: Vec<SourceSetId>,
        link_options: Vec<String>,
    ) -> BuildResult<()> {
        self.add_composite(name.into(), CompositeKind::Application, members, link_options)
    }

    /// Link an archive (local or exposed by a dependency) into an application
    pub fn link_archive(&mut self, application: &str, archive: impl Into<String>) -> BuildResult<()> {
        let archive = archive.into();
        let project = self.project.clone();
        let spec = self
            .composites
            .iter_mut()
            .find(|c| c.kind == CompositeKind::Application && c.name == application)
            .ok_or_else(|| {
                BuildError::configuration(format!(
                    "project '{}': unknown application '{}'",
                    project, application
                ))
            })?;
        if !spec.archives.contains(&archive) {
            spec.archives.push(archive);
        }
        Ok(())
    }

    /// Publish an archive, module or header set under a channel
    pub fn expose(&mut self, channel: impl Into<String>, item: Exposed) -> BuildResult<()> {
        let channel = channel.into();
        if channel.is_empty() {
            return Err(BuildError::configuration(format!(
                "project '{}': channel name cannot be empty",
                self.project
            )));
        }
        let items = self.exposures.entry(channel).or_default();
        if !items.contains(&item) {
            items.push(item);
        }
        Ok(())
    }

    /// Consume another project's channel
    pub fn depend_on(&mut self, dependency: ProjectDependency) -> BuildResult<()> {
        if dependency.project == self.project {
            return Err(BuildError::configuration(format!(
                "project '{}' cannot depend on itself",
                self.project
            )));
        }
        if !self.dependencies.contains(&dependency) {
            self.dependencies.push(dependency);
        }
        Ok(())
    }

    /// Find a source set by name and kind
    pub fn find(&self, name: &str, kind: SourceKind) -> Option<SourceSetId> {
        self.source_sets
            .iter()
            .position(|s| s.name == name && s.kind == kind)
            .map(|i| SourceSetId(i as u32))
    }

    pub fn source_set(&self, id: SourceSetId) -> Option<&SourceSet> {
        self.source_sets.get(id.index())
    }

    /// Source sets with their handles, in declaration order
    pub fn source_sets(&self) -> impl Iterator<Item = (SourceSetId, &SourceSet)> {
        self.source_sets
            .iter()
            .enumerate()
            .map(|(i, s)| (SourceSetId(i as u32), s))
    }

    pub fn composites(&self) -> &[CompositeSpec] {
        &self.composites
    }

    /// Items exposed under `channel`, or None if the channel is not exposed
    pub fn exposures(&self, channel: &str) -> Option<&[Exposed]> {
        self.exposures.get(channel).map(Vec::as_slice)
    }

    /// Exposed channels and their items
    pub fn channels(&self) -> &BTreeMap<String, Vec<Exposed>> {
        &self.exposures
    }

    pub fn dependencies(&self) -> &[ProjectDependency] {
        &self.dependencies
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn add_composite(
        &mut self,
        name: String,
        kind: CompositeKind,
        members: Vec<SourceSetId>,
        link_options: Vec<String>,
    ) -> BuildResult<()> {
        if name.is_empty() {
            return Err(BuildError::configuration(format!(
                "project '{}': {} name cannot be empty",
                self.project, kind
            )));
        }
        if self.composites.iter().any(|c| c.name == name) {
            return Err(BuildError::configuration(format!(
                "project '{}': composite '{}' is declared twice",
                self.project, name
            )));
        }
        for member in &members {
            self.check(*member)?;
        }

        self.composites.push(CompositeSpec {
            name,
            kind,
            members,
            archives: Vec::new(),
            link_options,
        });
        Ok(())
    }

    fn check(&self, id: SourceSetId) -> BuildResult<()> {
        if id.index() < self.source_sets.len() {
            Ok(())
        } else {
            Err(BuildError::configuration(format!(
                "project '{}': unknown source set handle {}",
                self.project, id.0
            )))
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn registry() -> Registry {
        Registry::new("bar", "/work/bar")
    }

    #[test]
    fn test_register_resolves_paths() {
        let mut reg = registry();
        let id = reg
            .register(
                "main",
                SourceKind::Cxx,
                vec![PathBuf::from("src/main.cpp")],
                CompileOptions::new().with_include_dirs(["include"]),
            )
            .unwrap();

        let set = reg.source_set(id).unwrap();
        assert_eq!(set.files, vec![PathBuf::from("/work/bar/src/main.cpp")]);
        assert_eq!(
            set.options.include_dirs,
            vec![PathBuf::from("/work/bar/include")]
        );
        assert_eq!(set.label(), "main-cxx");
        assert_eq!(reg.output_dir(), Path::new("/work/bar/build"));
    }

    #[test]
    fn test_duplicate_identifier_is_rejected() {
        let mut reg = registry();
        reg.register("main", SourceKind::Cxx, vec!["a.cpp".into()], CompileOptions::new())
            .unwrap();
        let err = reg
            .register("main", SourceKind::Cxx, vec!["b.cpp".into()], CompileOptions::new())
            .unwrap_err();
        assert!(matches!(err, BuildError::Configuration(_)));

        // Same name, different kind is a different set
        assert!(reg
            .register("main", SourceKind::Ixx, vec!["m.ixx".into()], CompileOptions::new())
            .is_ok());
    }

    #[test]
    fn test_empty_files() {
        let mut reg = registry();
        assert!(reg
            .register("main", SourceKind::C, vec![], CompileOptions::new())
            .is_err());
        assert!(reg
            .register("main", SourceKind::Cpp, vec![], CompileOptions::new())
            .is_ok());
    }

    #[test]
    fn test_duplicate_file_in_set() {
        let mut reg = registry();
        let err = reg
            .register(
                "main",
                SourceKind::C,
                vec!["a.c".into(), "a.c".into()],
                CompileOptions::new(),
            )
            .unwrap_err();
        assert!(err.to_string().contains("twice"));
    }

    #[test]
    fn test_unknown_handle() {
        let mut reg = registry();
        let err = reg
            .declare_header_dependency(SourceSetId(7), HeaderDependency::Directory("inc".into()))
            .unwrap_err();
        assert!(matches!(err, BuildError::Configuration(_)));
        assert!(reg.add_application("app", vec![SourceSetId(0)], vec![]).is_err());
    }

    #[test]
    fn test_module_dependency_requires_interface_set() {
        let mut reg = registry();
        let cxx = reg
            .register("main", SourceKind::Cxx, vec!["a.cpp".into()], CompileOptions::new())
            .unwrap();
        let c = reg
            .register("main", SourceKind::C, vec!["a.c".into()], CompileOptions::new())
            .unwrap();
        let ixx = reg
            .register("main", SourceKind::Ixx, vec!["m.ixx".into()], CompileOptions::new())
            .unwrap();

        assert!(reg
            .declare_module_dependency(cxx, ModuleDependency::SourceSet(c))
            .is_err());
        reg.declare_module_dependency(cxx, ModuleDependency::SourceSet(ixx))
            .unwrap();
        reg.declare_module_dependency(cxx, ModuleDependency::SourceSet(ixx))
            .unwrap();
        assert_eq!(reg.source_set(cxx).unwrap().module_dependencies.len(), 1);
    }

    #[test]
    fn test_self_header_dependency() {
        let mut reg = registry();
        let cpp = reg
            .register("main", SourceKind::Cpp, vec![], CompileOptions::new())
            .unwrap();
        assert!(reg
            .declare_header_dependency(cpp, HeaderDependency::SourceSet(cpp))
            .is_err());
        assert!(reg
            .declare_header_dependency(cpp, HeaderDependency::Name(String::new()))
            .is_err());
        reg.declare_header_dependency(cpp, HeaderDependency::Name("api".into()))
            .unwrap();
    }

    #[test]
    fn test_composites() {
        let mut reg = registry();
        let cxx = reg
            .register("main", SourceKind::Cxx, vec!["a.cpp".into()], CompileOptions::new())
            .unwrap();
        reg.add_archive("main", vec![cxx], vec![]).unwrap();
        reg.add_application("test", vec![cxx], vec!["-g".into()])
            .unwrap();
        reg.link_archive("test", "main").unwrap();
        reg.link_archive("test", "gtest").unwrap();

        assert!(reg.add_application("test", vec![cxx], vec![]).is_err());
        assert!(reg.add_archive("empty", vec![], vec![]).is_err());
        assert!(reg.link_archive("main", "gtest").is_err());

        let app = &reg.composites()[1];
        assert_eq!(app.kind, CompositeKind::Application);
        assert_eq!(app.archives, vec!["main", "gtest"]);
    }

    #[test]
    fn test_exposures_and_dependencies() {
        let mut reg = registry();
        reg.expose("native", Exposed::Archive("main".into())).unwrap();
        reg.expose("native", Exposed::Module("bar".into())).unwrap();
        reg.expose("native", Exposed::Module("bar".into())).unwrap();
        assert_eq!(reg.exposures("native").unwrap().len(), 2);
        assert!(reg.exposures("importable").is_none());

        reg.depend_on(ProjectDependency::new("googletest", "native"))
            .unwrap();
        assert!(reg.depend_on(ProjectDependency::new("bar", "native")).is_err());
        assert_eq!(reg.dependencies().len(), 1);
    }

    #[test]
    fn test_target_filter() {
        let any = CompileOptions::new();
        assert!(any.enabled_for(Some("x86_64-elf")));
        assert!(any.enabled_for(None));

        let filtered = CompileOptions::new().with_targets(["x86_64-elf"]);
        assert!(filtered.enabled_for(Some("x86_64-elf")));
        assert!(!filtered.enabled_for(Some("aarch64-elf")));
        assert!(filtered.enabled_for(None));
    }
}
