//! Build orchestration and pipeline management
use crate::build_order::{order, OrderedPlan};
use crate::commands::{compile_commands, CompileCommand};
use crate::error::{BuildError, BuildResult};
use crate::executor::{ExecutionResult, Executor, NodeStatus};
use crate::fingerprint::{FingerprintStore, Fingerprints};
use crate::graph::Graph;
use crate::incremental::{dirty_set, DirtySet, RecompileReason};
use crate::layout::OutputLayout;
use crate::loader::registries_from_workspace;
use crate::output::BuildSummary;
use crate::propagate::flatten;
use crate::registry::Registry;
use crate::toolchain::Toolchain;

use metal_config::{ConfigLoader, Workspace};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Build configuration
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Worker threads for compile, archive and link jobs
    pub workers: usize,
    /// Build target; selects target-filtered source sets and output directories
    pub target: Option<String>,
    /// Ignore the fingerprint store and rebuild everything
    pub force: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            workers: Executor::default_workers(),
            target: None,
            force: false,
        }
    }
}

/// Build context - result of a build that reached scheduling
#[derive(Debug)]
pub struct BuildContext {
    pub summary: BuildSummary,
    /// Build statistics
    pub stats: BuildStats,
    pub result: ExecutionResult,
}

/// Build statistics
#[derive(Debug, Clone, Default)]
pub struct BuildStats {
    /// Nodes in the graph: compile units plus composites
    pub total_nodes: usize,
    /// Nodes found dirty
    pub dirty_nodes: usize,
    /// Toolchain invocations
    pub invocations: usize,
    /// Number of parallel build groups
    pub parallel_groups: usize,
    /// Total build time
    pub total_time: Duration,
    /// Time spent loading fingerprints and computing the dirty set
    pub planning_time: Duration,
    /// Time spent executing jobs
    pub execution_time: Duration,
}

/// Main builder for orchestrating builds
pub struct Builder {
    /// One registry per project, producers first and the root project last
    registries: Vec<Registry>,
    /// Build configuration
    config: BuildConfig,
}

impl Builder {
    /// Create a builder for the workspace containing `project_path`
    pub fn new(project_path: impl AsRef<Path>) -> BuildResult<Self> {
        let workspace = ConfigLoader::new().load_workspace(project_path.as_ref())?;
        Self::from_workspace(&workspace)
    }

    /// Create a builder from an already loaded workspace
    ///
    /// Jobs and target come from the resolved workspace settings.
    pub fn from_workspace(workspace: &Workspace) -> BuildResult<Self> {
        let registries = registries_from_workspace(workspace)?;
        let mut config = BuildConfig::default();
        if let Some(jobs) = workspace.settings.jobs {
            config.workers = jobs;
        }
        config.target = workspace.settings.target.clone();
        Self::from_registries(registries).map(|b| b.with_config(config))
    }

    /// Create a builder over registries ordered producers first
    pub fn from_registries(registries: Vec<Registry>) -> BuildResult<Self> {
        if registries.is_empty() {
            return Err(BuildError::configuration("no projects to build"));
        }
        Ok(Self {
            registries,
            config: BuildConfig::default(),
        })
    }

    /// Set build configuration
    pub fn with_config(mut self, config: BuildConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn with_target(mut self, target: Option<String>) -> Self {
        self.config.target = target;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.config.force = force;
        self
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn registries(&self) -> &[Registry] {
        &self.registries
    }

    fn root(&self) -> &Registry {
        // `from_registries` rejects an empty list
        &self.registries[self.registries.len() - 1]
    }

    /// Location of the fingerprint store, inside the root project's output
    pub fn store_path(&self) -> PathBuf {
        let root = self.root();
        OutputLayout::new(root.root(), root.output_dir(), self.config.target.clone()).store_path()
    }

    /// Freeze every project into one graph
    pub fn graph(&self) -> BuildResult<Graph> {
        flatten(&self.registries, self.config.target.clone())
    }

    /// Graph plus its checked build order
    pub fn plan(&self) -> BuildResult<(Graph, OrderedPlan)> {
        let graph = self.graph()?;
        let plan = order(&graph)?;
        Ok((graph, plan))
    }

    /// Compile command records for every compiled unit, without building
    pub fn compile_commands(&self) -> BuildResult<Vec<CompileCommand>> {
        let (graph, _) = self.plan()?;
        Ok(compile_commands(&graph))
    }

    /// Nodes the next build would run, with the reason for each
    pub fn dirty_set(&self, graph: &Graph) -> BuildResult<DirtySet> {
        let fingerprints = Fingerprints::compute(graph)?;
        Ok(self.dirty_with(graph, &fingerprints))
    }

    fn dirty_with(&self, graph: &Graph, fingerprints: &Fingerprints) -> DirtySet {
        if self.config.force {
            DirtySet::all(graph, RecompileReason::Forced)
        } else {
            let previous = FingerprintStore::load(&self.store_path());
            dirty_set(graph, fingerprints, &previous)
        }
    }

    /// Execute the build
    ///
    /// Configuration, graph and cycle errors are returned before any job
    /// starts. Compile and link failures are reported in the context. A
    /// fingerprint store that cannot be saved is logged, and the next build
    /// treats every node as new.
    #[instrument(skip_all, fields(project = self.root().project()))]
    pub fn build(&self, toolchain: &dyn Toolchain) -> BuildResult<BuildContext> {
        let build_start = Instant::now();

        let (graph, plan) = self.plan()?;
        let groups = plan.parallel_groups().len();
        debug!(nodes = graph.len(), groups, "planned");

        let planning_start = Instant::now();
        let fingerprints = Fingerprints::compute(&graph)?;
        let dirty = self.dirty_with(&graph, &fingerprints);
        let planning_time = planning_start.elapsed();
        info!(dirty = dirty.len(), total = graph.len(), "dirty set computed");

        let executor = Executor::new(self.config.workers)?;
        let execution_start = Instant::now();
        let result = executor.execute(&graph, &plan, &dirty, toolchain);
        let execution_time = execution_start.elapsed();

        // Failed and skipped nodes get no entry, so they are dirty next time
        let mut store = FingerprintStore::new();
        for id in graph.node_ids() {
            if matches!(result.status(id), NodeStatus::Succeeded | NodeStatus::Clean) {
                store.record(&graph, &fingerprints, id);
            }
        }
        let store_path = self.store_path();
        if let Err(e) = store.save(&store_path) {
            warn!(path = %store_path.display(), error = %e, "fingerprint store not saved");
        }

        let total_time = build_start.elapsed();
        let summary = BuildSummary::from_result(&graph, &result, total_time);
        let stats = BuildStats {
            total_nodes: graph.len(),
            dirty_nodes: dirty.len(),
            invocations: result.invocations(),
            parallel_groups: groups,
            total_time,
            planning_time,
            execution_time,
        };

        info!(
            invocations = stats.invocations,
            failed = summary.failed,
            elapsed_ms = total_time.as_millis() as u64,
            "build finished"
        );
        Ok(BuildContext {
            summary,
            stats,
            result,
        })
    }

    /// Remove the output directory of every project
    pub fn clean(&self) -> BuildResult<()> {
        for registry in &self.registries {
            let dir = registry.output_dir();
            if dir.exists() {
                fs::remove_dir_all(dir).map_err(|e| BuildError::io(dir, e))?;
                info!(project = registry.project(), dir = %dir.display(), "cleaned");
            }
        }
        Ok(())
    }
}
