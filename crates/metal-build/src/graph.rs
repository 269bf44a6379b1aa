//! Dependency graph
//!
//! Freezes registries into a single arena of nodes addressed by [`NodeId`].
//! Every enabled source set expands into one compile unit per file, and every
//! archive or application becomes a composite node. Declared header and
//! module dependencies, plus the cross-project edges handed in by
//! [`crate::propagate`], become [`DependencyEdge`]s. Composite membership is
//! kept on the composite itself and is never an edge.

use crate::error::{BuildError, BuildResult};
use crate::kind::{CompileStrategy, SourceKind};
use crate::layout::OutputLayout;
use crate::registry::{
    CompositeKind, Exposed, HeaderDependency, ModuleDependency, Registry, SourceSetId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// Index of a node in the graph arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Index of a project in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProjectId(pub u32);

impl ProjectId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Module exported by an ixx unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInterface {
    pub name: String,
}

/// One source file bound to its source set's options
#[derive(Debug, Clone)]
pub struct CompileUnit {
    pub project: ProjectId,
    pub source_set: SourceSetId,
    pub set_name: String,
    pub kind: SourceKind,
    /// Absolute source path
    pub source: PathBuf,
    /// Flags passed through unchanged
    pub flags: Vec<String>,
    /// Header search path: the set's own directories, then header dependencies
    pub include_dirs: Vec<PathBuf>,
    /// Directory header dependencies, hashed into the fingerprint
    pub header_dirs: Vec<PathBuf>,
    /// Set for ixx units
    pub module: Option<ModuleInterface>,
}

impl CompileUnit {
    pub fn strategy(&self) -> CompileStrategy {
        self.kind.strategy()
    }
}

/// An archive or application
#[derive(Debug, Clone)]
pub struct Composite {
    pub project: ProjectId,
    pub name: String,
    pub kind: CompositeKind,
    /// Member compile units, in link order
    pub members: Vec<NodeId>,
    /// Linked archive nodes, in link order
    pub archives: Vec<NodeId>,
    pub link_options: Vec<String>,
}

/// A graph node
#[derive(Debug, Clone)]
pub enum Node {
    Unit(CompileUnit),
    Composite(Composite),
}

impl Node {
    pub fn project(&self) -> ProjectId {
        match self {
            Self::Unit(unit) => unit.project,
            Self::Composite(composite) => composite.project,
        }
    }

    pub fn as_unit(&self) -> Option<&CompileUnit> {
        match self {
            Self::Unit(unit) => Some(unit),
            Self::Composite(_) => None,
        }
    }

    pub fn as_composite(&self) -> Option<&Composite> {
        match self {
            Self::Composite(composite) => Some(composite),
            Self::Unit(_) => None,
        }
    }

    /// Header-only units never reach the toolchain
    pub fn is_header_only(&self) -> bool {
        matches!(self, Self::Unit(unit) if unit.strategy() == CompileStrategy::HeaderOnly)
    }
}

/// Kind of dependency edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    /// Consumer includes headers of the producer (dirtiness only)
    Header,
    /// Consumer imports the producer's module interface
    Module,
    /// Consumer uses an artifact exposed by another project
    Project,
}

impl EdgeKind {
    /// Ordering edges delay the consumer until the producer is done
    pub fn is_ordering(&self) -> bool {
        !matches!(self, Self::Header)
    }
}

/// A resolved dependency between two nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DependencyEdge {
    pub consumer: NodeId,
    pub producer: NodeId,
    pub kind: EdgeKind,
}

/// Consumer side of a cross-project edge
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Consumer {
    /// Every unit of a source set importing an exposed module or
    /// including an exposed header set
    SourceSet(SourceSetId),
    /// An application linking an exposed archive
    Application(String),
}

/// Edge from a consumer project declaration to a producer project node
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CrossProjectEdge {
    pub consumer: Consumer,
    pub producer: NodeId,
    /// The exposed item the edge satisfies
    pub item: Exposed,
    pub producer_project: String,
}

/// Frozen view of one project inside the graph
#[derive(Debug, Clone)]
pub struct ProjectView {
    id: ProjectId,
    name: String,
    layout: OutputLayout,
    modules: BTreeMap<String, NodeId>,
    archives: BTreeMap<String, NodeId>,
    applications: BTreeMap<String, NodeId>,
    exposures: BTreeMap<String, Vec<Exposed>>,
    source_sets: BTreeMap<SourceSetId, Vec<NodeId>>,
    header_sets: BTreeMap<String, SourceSetId>,
}

impl ProjectView {
    pub fn id(&self) -> ProjectId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Interface unit exporting `name`
    pub fn module(&self, name: &str) -> Option<NodeId> {
        self.modules.get(name).copied()
    }

    pub fn archive(&self, name: &str) -> Option<NodeId> {
        self.archives.get(name).copied()
    }

    pub fn application(&self, name: &str) -> Option<NodeId> {
        self.applications.get(name).copied()
    }

    /// Items exposed under `channel`, or None if the channel is not exposed
    pub fn exposures(&self, channel: &str) -> Option<&[Exposed]> {
        self.exposures.get(channel).map(Vec::as_slice)
    }

    /// Units of a source set; empty when the set is disabled for the target
    pub fn units(&self, set: SourceSetId) -> &[NodeId] {
        self.source_sets.get(&set).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Units of the cpp source set `name`; None if there is no such set
    pub fn header_set(&self, name: &str) -> Option<&[NodeId]> {
        self.header_sets.get(name).map(|sid| self.units(*sid))
    }

    /// Exported module names, sorted
    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }
}

/// Immutable dependency graph of one build
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<Node>,
    edges: Vec<DependencyEdge>,
    projects: Vec<ProjectView>,
    target: Option<String>,
    /// Producers of each consumer, with edge kind
    dependencies: Vec<Vec<(NodeId, EdgeKind)>>,
    /// Reverse of edges plus membership
    dependents: Vec<Vec<NodeId>>,
}

impl Graph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// Nodes with their ids, in declaration order
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeId(i as u32), n))
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    /// All edges, sorted by consumer
    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn projects(&self) -> &[ProjectView] {
        &self.projects
    }

    pub fn project(&self, id: ProjectId) -> &ProjectView {
        &self.projects[id.index()]
    }

    pub fn project_named(&self, name: &str) -> Option<&ProjectView> {
        self.projects.iter().find(|p| p.name == name)
    }

    /// Producers of `id` through dependency edges
    pub fn dependencies(&self, id: NodeId) -> &[(NodeId, EdgeKind)] {
        &self.dependencies[id.index()]
    }

    /// Nodes that must be terminal before `id` can run:
    /// ordering edges plus composite membership
    pub fn ordering_predecessors(&self, id: NodeId) -> Vec<NodeId> {
        let mut preds: BTreeSet<NodeId> = self.dependencies[id.index()]
            .iter()
            .filter(|(_, kind)| kind.is_ordering())
            .map(|(producer, _)| *producer)
            .collect();
        if let Node::Composite(composite) = self.node(id) {
            preds.extend(composite.members.iter().copied());
            preds.extend(composite.archives.iter().copied());
        }
        preds.into_iter().collect()
    }

    /// Direct header, ordering and membership relations of `id`
    pub fn relations(&self, id: NodeId) -> Vec<NodeId> {
        let mut related: BTreeSet<NodeId> = self.dependencies[id.index()]
            .iter()
            .map(|(producer, _)| *producer)
            .collect();
        if let Node::Composite(composite) = self.node(id) {
            related.extend(composite.members.iter().copied());
            related.extend(composite.archives.iter().copied());
        }
        related.into_iter().collect()
    }

    /// Every node reachable from `id` through [`Graph::relations`], excluding `id`
    pub fn reachable(&self, id: NodeId) -> Vec<NodeId> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<NodeId> = self.relations(id).into();
        while let Some(next) = queue.pop_front() {
            if next == id || !seen.insert(next) {
                continue;
            }
            queue.extend(self.relations(next));
        }
        seen.into_iter().collect()
    }

    /// Nodes that relate to `id` (reverse of [`Graph::relations`])
    pub fn dependents(&self, id: NodeId) -> &[NodeId] {
        &self.dependents[id.index()]
    }

    /// Units importing the interface `id`, directly
    pub fn module_consumers(&self, id: NodeId) -> Vec<NodeId> {
        self.dependents[id.index()]
            .iter()
            .copied()
            .filter(|consumer| {
                self.dependencies[consumer.index()]
                    .iter()
                    .any(|(producer, kind)| *producer == id && kind.is_ordering())
            })
            .collect()
    }

    /// Interface units imported by `id`, transitively, ordered by module name
    pub fn module_imports(&self, id: NodeId) -> Vec<NodeId> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([id]);
        while let Some(next) = queue.pop_front() {
            for (producer, kind) in &self.dependencies[next.index()] {
                let is_interface = matches!(
                    self.node(*producer),
                    Node::Unit(unit) if unit.module.is_some()
                );
                if kind.is_ordering() && is_interface && *producer != id && seen.insert(*producer) {
                    queue.push_back(*producer);
                }
            }
        }
        let mut imports: Vec<NodeId> = seen.into_iter().collect();
        imports.sort_by(|a, b| self.label(*a).cmp(&self.label(*b)));
        imports
    }

    /// Layout of the project owning `id`
    pub fn layout(&self, id: NodeId) -> &OutputLayout {
        self.project(self.node(id).project()).layout()
    }

    /// Primary output: object for compiled units, file for composites
    pub fn output_path(&self, id: NodeId) -> Option<PathBuf> {
        let layout = self.layout(id);
        match self.node(id) {
            Node::Unit(unit) => match unit.strategy() {
                CompileStrategy::HeaderOnly => None,
                CompileStrategy::Object | CompileStrategy::ModuleInterface => {
                    Some(layout.object_path(&unit.set_name, unit.kind, &unit.source))
                }
            },
            Node::Composite(composite) => Some(match composite.kind {
                CompositeKind::Archive => layout.archive_path(&composite.name),
                CompositeKind::Application => layout.application_path(&composite.name),
            }),
        }
    }

    /// Precompiled interface of an ixx unit
    pub fn interface_path(&self, id: NodeId) -> Option<PathBuf> {
        match self.node(id) {
            Node::Unit(unit) if unit.module.is_some() => Some(
                self.layout(id)
                    .interface_path(&unit.set_name, &unit.source),
            ),
            _ => None,
        }
    }

    /// Every file a node is expected to leave behind
    pub fn expected_outputs(&self, id: NodeId) -> Vec<PathBuf> {
        self.output_path(id)
            .into_iter()
            .chain(self.interface_path(id))
            .collect()
    }

    /// Stable identity across invocations, used by the fingerprint store
    pub fn key(&self, id: NodeId) -> String {
        let project = self.project(self.node(id).project());
        match self.node(id) {
            Node::Unit(unit) => format!(
                "{}/{}-{}/{}",
                project.name,
                unit.set_name,
                unit.kind,
                portable(&project.layout.relative(&unit.source))
            ),
            Node::Composite(composite) => {
                format!("{}/{}/{}", project.name, composite.kind, composite.name)
            }
        }
    }

    /// Human-readable name: the module name for interfaces
    pub fn label(&self, id: NodeId) -> String {
        let project = self.project(self.node(id).project());
        match self.node(id) {
            Node::Unit(CompileUnit {
                module: Some(module),
                ..
            }) => module.name.clone(),
            Node::Unit(unit) => format!(
                "{}:{}",
                project.name,
                portable(&project.layout.relative(&unit.source))
            ),
            Node::Composite(composite) => {
                format!("{}:{} {}", project.name, composite.kind, composite.name)
            }
        }
    }
}

fn portable(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Builds a [`Graph`] one project at a time, producers first
#[derive(Debug, Default)]
pub struct GraphBuilder {
    target: Option<String>,
    nodes: Vec<Node>,
    edges: BTreeSet<DependencyEdge>,
    projects: Vec<ProjectView>,
}

impl GraphBuilder {
    /// Create a builder for the given target (None builds every source set)
    pub fn new(target: Option<String>) -> Self {
        Self {
            target,
            ..Self::default()
        }
    }

    /// Frozen view of an already added project
    pub fn project(&self, name: &str) -> Option<&ProjectView> {
        self.projects.iter().find(|p| p.name == name)
    }

    /// Freeze a registry into the graph
    ///
    /// `cross_edges` come from [`crate::propagate::propagate`] and must point
    /// at projects added earlier. On error the builder is left unchanged.
    #[instrument(skip_all, fields(project = registry.project()))]
    pub fn add_project(
        &mut self,
        registry: &Registry,
        cross_edges: Vec<CrossProjectEdge>,
    ) -> BuildResult<ProjectId> {
        let start = self.nodes.len();
        let result = self.add_project_nodes(registry, &cross_edges);
        if result.is_err() {
            self.nodes.truncate(start);
            self.edges
                .retain(|edge| edge.consumer.index() < start);
        }
        result
    }

    /// Finish building
    pub fn finish(self) -> Graph {
        let len = self.nodes.len();
        let mut dependencies = vec![Vec::new(); len];
        let mut dependents: Vec<BTreeSet<NodeId>> = vec![BTreeSet::new(); len];

        for edge in &self.edges {
            dependencies[edge.consumer.index()].push((edge.producer, edge.kind));
            dependents[edge.producer.index()].insert(edge.consumer);
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if let Node::Composite(composite) = node {
                for member in composite.members.iter().chain(&composite.archives) {
                    dependents[member.index()].insert(NodeId(i as u32));
                }
            }
        }

        debug!(
            nodes = len,
            edges = self.edges.len(),
            projects = self.projects.len(),
            "graph frozen"
        );

        Graph {
            nodes: self.nodes,
            edges: self.edges.into_iter().collect(),
            projects: self.projects,
            target: self.target,
            dependencies,
            dependents: dependents
                .into_iter()
                .map(|set| set.into_iter().collect())
                .collect(),
        }
    }

    fn add_project_nodes(
        &mut self,
        registry: &Registry,
        cross_edges: &[CrossProjectEdge],
    ) -> BuildResult<ProjectId> {
        let name = registry.project().to_string();
        if self.project(&name).is_some() {
            return Err(BuildError::configuration(format!(
                "project '{}' is added twice",
                name
            )));
        }
        for edge in cross_edges {
            if edge.producer.index() >= self.nodes.len() {
                return Err(BuildError::graph(format!(
                    "project '{}': cross-project edge points at unknown node {}",
                    name, edge.producer
                )));
            }
        }

        let pid = ProjectId(self.projects.len() as u32);
        let layout = OutputLayout::new(
            registry.root(),
            registry.output_dir(),
            self.target.clone(),
        );

        // Compile units, one per file
        let mut set_units: BTreeMap<SourceSetId, Vec<NodeId>> = BTreeMap::new();
        let mut modules: BTreeMap<String, NodeId> = BTreeMap::new();
        for (sid, set) in registry.source_sets() {
            if !set.options.enabled_for(self.target.as_deref()) {
                debug!(set = %set.label(), "source set disabled for target");
                continue;
            }

            let mut include_dirs = set.options.include_dirs.clone();
            let mut header_dirs = Vec::new();
            for dependency in &set.header_dependencies {
                match dependency {
                    HeaderDependency::Directory(dir) => {
                        push_unique(&mut include_dirs, dir);
                        header_dirs.push(dir.clone());
                    }
                    HeaderDependency::SourceSet(other) => {
                        if let Some(other) = registry.source_set(*other) {
                            for dir in &other.options.include_dirs {
                                push_unique(&mut include_dirs, dir);
                            }
                        }
                    }
                    HeaderDependency::Name(headers) => {
                        let item = Exposed::Headers(headers.clone());
                        let producers: Vec<NodeId> = cross_edges
                            .iter()
                            .filter(|edge| edge.consumer == Consumer::SourceSet(sid) && edge.item == item)
                            .map(|edge| edge.producer)
                            .collect();
                        if producers.is_empty() {
                            return Err(BuildError::graph(format!(
                                "project '{}': source set '{}' includes unknown header set '{}'",
                                name,
                                set.label(),
                                headers
                            )));
                        }
                        for producer in producers {
                            if let Node::Unit(unit) = &self.nodes[producer.index()] {
                                for dir in &unit.include_dirs {
                                    push_unique(&mut include_dirs, dir);
                                }
                            }
                        }
                    }
                }
            }

            let mut units = Vec::with_capacity(set.files.len());
            for file in &set.files {
                let id = NodeId(self.nodes.len() as u32);
                let module = if set.kind == SourceKind::Ixx {
                    let module_name = scan_module_name(file);
                    if let Some(existing) = modules.get(&module_name) {
                        return Err(BuildError::graph(format!(
                            "project '{}': module '{}' is exported by both {} and {}",
                            name,
                            module_name,
                            self.source_of(*existing).display(),
                            file.display()
                        )));
                    }
                    modules.insert(module_name.clone(), id);
                    Some(ModuleInterface { name: module_name })
                } else {
                    None
                };

                self.nodes.push(Node::Unit(CompileUnit {
                    project: pid,
                    source_set: sid,
                    set_name: set.name.clone(),
                    kind: set.kind,
                    source: file.clone(),
                    flags: set.options.flags.clone(),
                    include_dirs: include_dirs.clone(),
                    header_dirs: header_dirs.clone(),
                    module,
                }));
                units.push(id);
            }
            set_units.insert(sid, units);
        }

        // Declared dependencies between source sets
        for (sid, set) in registry.source_sets() {
            let Some(consumers) = set_units.get(&sid) else {
                continue;
            };

            for dependency in &set.header_dependencies {
                if let HeaderDependency::SourceSet(other) = dependency {
                    let producers = set_units.get(other).map(Vec::as_slice).unwrap_or(&[]);
                    self.connect(consumers, producers, EdgeKind::Header);
                }
            }

            for dependency in &set.module_dependencies {
                match dependency {
                    ModuleDependency::SourceSet(other) => {
                        let producers = set_units.get(other).map(Vec::as_slice).unwrap_or(&[]);
                        self.connect(consumers, producers, EdgeKind::Module);
                    }
                    ModuleDependency::Name(module) => {
                        let imported = cross_edges.iter().any(|edge| {
                            edge.consumer == Consumer::SourceSet(sid)
                                && edge.item == Exposed::Module(module.clone())
                        });
                        match (modules.get(module), imported) {
                            (Some(_), true) => {
                                return Err(BuildError::graph(format!(
                                    "project '{}': module '{}' is both defined locally and imported",
                                    name, module
                                )));
                            }
                            (Some(producer), false) => {
                                self.connect(consumers, &[*producer], EdgeKind::Module);
                            }
                            (None, true) => {}
                            (None, false) => {
                                return Err(BuildError::graph(format!(
                                    "project '{}': source set '{}' imports unknown module '{}'",
                                    name,
                                    set.label(),
                                    module
                                )));
                            }
                        }
                    }
                }
            }
        }

        // Cross-project edges into source sets
        for edge in cross_edges {
            if let Consumer::SourceSet(sid) = &edge.consumer {
                if registry.source_set(*sid).is_none() {
                    return Err(BuildError::configuration(format!(
                        "project '{}': cross-project edge from unknown source set handle {}",
                        name, sid.0
                    )));
                }
                let kind = match edge.item {
                    Exposed::Headers(_) => EdgeKind::Header,
                    Exposed::Archive(_) | Exposed::Module(_) => EdgeKind::Project,
                };
                if let Some(consumers) = set_units.get(sid) {
                    self.connect(consumers, &[edge.producer], kind);
                }
            }
        }

        // Composites: create every node first so applications may link
        // archives declared after them
        let mut archives = BTreeMap::new();
        let mut applications = BTreeMap::new();
        let mut composite_ids = Vec::with_capacity(registry.composites().len());
        for spec in registry.composites() {
            let id = NodeId(self.nodes.len() as u32);
            let members = spec
                .members
                .iter()
                .flat_map(|sid| set_units.get(sid).into_iter().flatten().copied())
                .collect();
            self.nodes.push(Node::Composite(Composite {
                project: pid,
                name: spec.name.clone(),
                kind: spec.kind,
                members,
                archives: Vec::new(),
                link_options: spec.link_options.clone(),
            }));
            match spec.kind {
                CompositeKind::Archive => archives.insert(spec.name.clone(), id),
                CompositeKind::Application => applications.insert(spec.name.clone(), id),
            };
            composite_ids.push(id);
        }

        for (spec, id) in registry.composites().iter().zip(composite_ids) {
            let mut linked = Vec::with_capacity(spec.archives.len());
            for archive in &spec.archives {
                let imported = cross_edges.iter().find(|edge| {
                    edge.consumer == Consumer::Application(spec.name.clone())
                        && edge.item == Exposed::Archive(archive.clone())
                });
                match (archives.get(archive), imported) {
                    (Some(_), Some(edge)) => {
                        return Err(BuildError::graph(format!(
                            "project '{}': archive '{}' is both defined locally and imported from '{}'",
                            name, archive, edge.producer_project
                        )));
                    }
                    (Some(local), None) => linked.push(*local),
                    (None, Some(edge)) => {
                        self.edges.insert(DependencyEdge {
                            consumer: id,
                            producer: edge.producer,
                            kind: EdgeKind::Project,
                        });
                        linked.push(edge.producer);
                    }
                    (None, None) => {
                        return Err(BuildError::graph(format!(
                            "project '{}': application '{}' links unknown archive '{}'",
                            name, spec.name, archive
                        )));
                    }
                }
            }
            if let Node::Composite(composite) = &mut self.nodes[id.index()] {
                composite.archives = linked;
            }
        }

        debug!(
            project = %name,
            units = set_units.values().map(Vec::len).sum::<usize>(),
            modules = modules.len(),
            "project added to graph"
        );

        self.projects.push(ProjectView {
            id: pid,
            name,
            layout,
            modules,
            archives,
            applications,
            exposures: registry.channels().clone(),
            source_sets: set_units,
            header_sets: registry
                .source_sets()
                .filter(|(_, set)| set.kind == SourceKind::Cpp)
                .map(|(sid, set)| (set.name.clone(), sid))
                .collect(),
        });
        Ok(pid)
    }

    fn connect(&mut self, consumers: &[NodeId], producers: &[NodeId], kind: EdgeKind) {
        for consumer in consumers {
            for producer in producers {
                if consumer != producer {
                    self.edges.insert(DependencyEdge {
                        consumer: *consumer,
                        producer: *producer,
                        kind,
                    });
                }
            }
        }
    }

    fn source_of(&self, id: NodeId) -> &Path {
        match &self.nodes[id.index()] {
            Node::Unit(unit) => &unit.source,
            Node::Composite(_) => Path::new(""),
        }
    }
}

/// Build a graph for a single project
pub fn build(registry: &Registry, cross_edges: Vec<CrossProjectEdge>) -> BuildResult<Graph> {
    let mut builder = GraphBuilder::new(None);
    builder.add_project(registry, cross_edges)?;
    Ok(builder.finish())
}

/// Name exported by an interface unit
///
/// Reads the `export module <name>;` declaration; an unreadable file or one
/// without a declaration falls back to the file stem.
pub fn scan_module_name(path: &Path) -> String {
    let declared = std::fs::read_to_string(path).ok().and_then(|source| {
        source.lines().find_map(|line| {
            let rest = line.trim().strip_prefix("export")?;
            let rest = rest.trim_start().strip_prefix("module")?;
            let name = rest.split(';').next()?.trim();
            (!name.is_empty()).then(|| name.to_string())
        })
    });

    declared.unwrap_or_else(|| {
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    })
}

fn push_unique(dirs: &mut Vec<PathBuf>, dir: &Path) {
    if !dirs.iter().any(|d| d == dir) {
        dirs.push(dir.to_path_buf());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::CompileOptions;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn files(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_units_in_declaration_order() {
        let mut reg = Registry::new("bar", "/work/bar");
        reg.register("main", SourceKind::C, files(&["b.c", "a.c"]), CompileOptions::new())
            .unwrap();

        let graph = build(&reg, vec![]).unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.key(NodeId(0)), "bar/main-c/b.c");
        assert_eq!(graph.key(NodeId(1)), "bar/main-c/a.c");
        assert_eq!(graph.label(NodeId(1)), "bar:a.c");
    }

    #[test]
    fn test_module_dependency_by_name() {
        let mut reg = Registry::new("bar", "/work/bar");
        let ixx = reg
            .register("main", SourceKind::Ixx, files(&["greet.ixx"]), CompileOptions::new())
            .unwrap();
        let cxx = reg
            .register("main", SourceKind::Cxx, files(&["main.cpp"]), CompileOptions::new())
            .unwrap();
        reg.declare_module_dependency(cxx, ModuleDependency::Name("greet".into()))
            .unwrap();

        let graph = build(&reg, vec![]).unwrap();
        let project = &graph.projects()[0];
        let greet = project.module("greet").unwrap();
        let main = project.units(cxx)[0];

        assert_eq!(project.units(ixx), &[greet]);
        assert_eq!(graph.dependencies(main), &[(greet, EdgeKind::Module)]);
        assert_eq!(graph.ordering_predecessors(main), vec![greet]);
        assert_eq!(graph.module_consumers(greet), vec![main]);
        assert_eq!(graph.label(greet), "greet");
    }

    #[test]
    fn test_unknown_module_is_graph_error() {
        let mut reg = Registry::new("bar", "/work/bar");
        let cxx = reg
            .register("main", SourceKind::Cxx, files(&["main.cpp"]), CompileOptions::new())
            .unwrap();
        reg.declare_module_dependency(cxx, ModuleDependency::Name("missing".into()))
            .unwrap();

        match build(&reg, vec![]) {
            Err(BuildError::Graph(msg)) => assert!(msg.contains("missing")),
            other => panic!("expected graph error, got {:?}", other.map(|g| g.len())),
        }
    }

    #[test]
    fn test_duplicate_module_name() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.ixx"), "export module same;\n").unwrap();
        fs::write(temp.path().join("b.ixx"), "export module same;\n").unwrap();

        let mut reg = Registry::new("bar", temp.path());
        reg.register("main", SourceKind::Ixx, files(&["a.ixx", "b.ixx"]), CompileOptions::new())
            .unwrap();

        let err = build(&reg, vec![]).unwrap_err();
        assert!(matches!(err, BuildError::Graph(_)));
        assert!(err.to_string().contains("same"));
    }

    #[test]
    fn test_header_edges_are_not_ordering() {
        let mut reg = Registry::new("bar", "/work/bar");
        let cpp = reg
            .register(
                "main",
                SourceKind::Cpp,
                files(&["include/util.hpp"]),
                CompileOptions::new().with_include_dirs(["include"]),
            )
            .unwrap();
        let cxx = reg
            .register("main", SourceKind::Cxx, files(&["main.cpp"]), CompileOptions::new())
            .unwrap();
        reg.declare_header_dependency(cxx, HeaderDependency::SourceSet(cpp))
            .unwrap();
        reg.declare_header_dependency(cxx, HeaderDependency::Directory("vendor".into()))
            .unwrap();

        let graph = build(&reg, vec![]).unwrap();
        let header = NodeId(0);
        let main = NodeId(1);

        assert!(graph.node(header).is_header_only());
        assert_eq!(graph.output_path(header), None);
        assert_eq!(graph.dependencies(main), &[(header, EdgeKind::Header)]);
        assert!(graph.ordering_predecessors(main).is_empty());
        assert_eq!(graph.relations(main), vec![header]);

        let unit = graph.node(main).as_unit().unwrap();
        assert_eq!(
            unit.include_dirs,
            vec![
                PathBuf::from("/work/bar/include"),
                PathBuf::from("/work/bar/vendor")
            ]
        );
        assert_eq!(unit.header_dirs, vec![PathBuf::from("/work/bar/vendor")]);
    }

    #[test]
    fn test_composite_membership_is_not_an_edge() {
        let mut reg = Registry::new("bar", "/work/bar");
        let cxx = reg
            .register("main", SourceKind::Cxx, files(&["a.cpp", "b.cpp"]), CompileOptions::new())
            .unwrap();
        reg.add_application("app", vec![cxx], vec![]).unwrap();
        reg.add_archive("core", vec![cxx], vec![]).unwrap();
        reg.link_archive("app", "core").unwrap();

        let graph = build(&reg, vec![]).unwrap();
        let project = &graph.projects()[0];
        let app = project.application("app").unwrap();
        let core = project.archive("core").unwrap();

        assert!(graph.edges().is_empty());
        let composite = graph.node(app).as_composite().unwrap();
        assert_eq!(composite.members, vec![NodeId(0), NodeId(1)]);
        assert_eq!(composite.archives, vec![core]);
        assert_eq!(
            graph.ordering_predecessors(app),
            vec![NodeId(0), NodeId(1), core]
        );
        assert_eq!(graph.key(core), "bar/archive/core");
    }

    #[test]
    fn test_unknown_archive() {
        let mut reg = Registry::new("bar", "/work/bar");
        let cxx = reg
            .register("main", SourceKind::Cxx, files(&["a.cpp"]), CompileOptions::new())
            .unwrap();
        reg.add_application("app", vec![cxx], vec![]).unwrap();
        reg.link_archive("app", "gtest").unwrap();

        let err = build(&reg, vec![]).unwrap_err();
        assert!(err.to_string().contains("gtest"));
    }

    #[test]
    fn test_target_filter_skips_sets() {
        let mut reg = Registry::new("bar", "/work/bar");
        let only_arm = reg
            .register(
                "boot",
                SourceKind::Asm,
                files(&["start.S"]),
                CompileOptions::new().with_targets(["aarch64-elf"]),
            )
            .unwrap();
        reg.register("main", SourceKind::C, files(&["main.c"]), CompileOptions::new())
            .unwrap();

        let mut builder = GraphBuilder::new(Some("x86_64-elf".into()));
        builder.add_project(&reg, vec![]).unwrap();
        let graph = builder.finish();

        assert_eq!(graph.len(), 1);
        assert!(graph.projects()[0].units(only_arm).is_empty());
        assert_eq!(graph.target(), Some("x86_64-elf"));
    }

    #[test]
    fn test_failed_add_leaves_builder_unchanged() {
        let mut good = Registry::new("good", "/work/good");
        good.register("main", SourceKind::C, files(&["a.c"]), CompileOptions::new())
            .unwrap();
        let mut bad = Registry::new("bad", "/work/bad");
        let cxx = bad
            .register("main", SourceKind::Cxx, files(&["a.cpp"]), CompileOptions::new())
            .unwrap();
        bad.declare_module_dependency(cxx, ModuleDependency::Name("nope".into()))
            .unwrap();

        let mut builder = GraphBuilder::new(None);
        builder.add_project(&good, vec![]).unwrap();
        assert!(builder.add_project(&bad, vec![]).is_err());
        assert!(builder.project("bad").is_none());
        assert_eq!(builder.finish().len(), 1);
    }

    #[test]
    fn test_scan_module_name() {
        let temp = TempDir::new().unwrap();
        let declared = temp.path().join("greeting.ixx");
        fs::write(
            &declared,
            "module;\n#include <string>\nexport module hello.world;\nexport void hi();\n",
        )
        .unwrap();
        let undeclared = temp.path().join("plain.ixx");
        fs::write(&undeclared, "// nothing here\n").unwrap();

        assert_eq!(scan_module_name(&declared), "hello.world");
        assert_eq!(scan_module_name(&undeclared), "plain");
        assert_eq!(scan_module_name(&temp.path().join("absent.ixx")), "absent");
    }

    #[test]
    fn test_module_imports_are_transitive() {
        let mut reg = Registry::new("bar", "/work/bar");
        let base = reg
            .register("base", SourceKind::Ixx, files(&["base.ixx"]), CompileOptions::new())
            .unwrap();
        let mid = reg
            .register("mid", SourceKind::Ixx, files(&["mid.ixx"]), CompileOptions::new())
            .unwrap();
        let cxx = reg
            .register("main", SourceKind::Cxx, files(&["main.cpp"]), CompileOptions::new())
            .unwrap();
        reg.declare_module_dependency(mid, ModuleDependency::SourceSet(base))
            .unwrap();
        reg.declare_module_dependency(cxx, ModuleDependency::Name("mid".into()))
            .unwrap();

        let graph = build(&reg, vec![]).unwrap();
        let imports: Vec<String> = graph
            .module_imports(NodeId(2))
            .into_iter()
            .map(|id| graph.label(id))
            .collect();
        assert_eq!(imports, vec!["base", "mid"]);
    }
}
