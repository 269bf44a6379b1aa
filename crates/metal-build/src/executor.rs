//! Parallel execution of the dirty subgraph
//!
//! The coordinating thread owns all scheduling state. Jobs run on a bounded
//! rayon pool and report back over a channel. A node is dispatched once every
//! node in [`OrderedPlan::predecessors`] is terminal; if any of them failed or
//! was skipped, the node is skipped without being attempted.

use crate::build_order::OrderedPlan;
use crate::commands::{compile_command, CompileCommand};
use crate::composer::{Artifact, Composer};
use crate::error::{BuildError, BuildResult};
use crate::graph::{Graph, Node, NodeId};
use crate::incremental::DirtySet;
use crate::toolchain::{CompileOutput, Toolchain};
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Stage a node failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Compiling a unit
    Toolchain,
    /// Archiving or linking a composite
    Composite,
}

impl FailureKind {
    fn of(error: &BuildError) -> Self {
        match error {
            BuildError::Composite { .. } => Self::Composite,
            _ => Self::Toolchain,
        }
    }
}

/// Terminal state of a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeStatus {
    /// Ran and produced its outputs
    Succeeded,
    /// The toolchain or composer reported an error
    Failed {
        kind: FailureKind,
        diagnostics: String,
    },
    /// Never attempted because `cause` failed upstream
    Skipped { cause: NodeId },
    /// Not dirty; previous outputs reused
    Clean,
}

/// Outcome of one node
#[derive(Debug, Clone)]
pub struct NodeReport {
    pub node: NodeId,
    pub label: String,
    pub status: NodeStatus,
    /// Whether the toolchain was invoked
    pub invoked: bool,
    pub duration: Duration,
}

/// Outcome of a whole execution
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    reports: Vec<NodeReport>,
    outputs: BTreeMap<NodeId, PathBuf>,
    artifacts: Vec<Artifact>,
}

impl ExecutionResult {
    pub fn status(&self, id: NodeId) -> &NodeStatus {
        &self.reports[id.index()].status
    }

    /// Per-node reports, in node order
    pub fn reports(&self) -> &[NodeReport] {
        &self.reports
    }

    fn with_status(&self, pred: impl Fn(&NodeStatus) -> bool) -> Vec<NodeId> {
        self.reports
            .iter()
            .filter(|r| pred(&r.status))
            .map(|r| r.node)
            .collect()
    }

    pub fn failed(&self) -> Vec<NodeId> {
        self.with_status(|s| matches!(s, NodeStatus::Failed { .. }))
    }

    pub fn skipped(&self) -> Vec<NodeId> {
        self.with_status(|s| matches!(s, NodeStatus::Skipped { .. }))
    }

    pub fn succeeded(&self) -> Vec<NodeId> {
        self.with_status(|s| *s == NodeStatus::Succeeded)
    }

    pub fn clean(&self) -> Vec<NodeId> {
        self.with_status(|s| *s == NodeStatus::Clean)
    }

    /// Nodes skipped because of the failure of `cause`
    pub fn skipped_by(&self, cause: NodeId) -> Vec<NodeId> {
        self.with_status(|s| *s == NodeStatus::Skipped { cause })
    }

    /// Number of compile, archive and link invocations
    pub fn invocations(&self) -> usize {
        self.reports.iter().filter(|r| r.invoked).count()
    }

    /// Primary output of every succeeded or clean node that has one
    pub fn outputs(&self) -> &BTreeMap<NodeId, PathBuf> {
        &self.outputs
    }

    /// Composites built by this execution
    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    pub fn is_success(&self) -> bool {
        self.reports
            .iter()
            .all(|r| matches!(r.status, NodeStatus::Succeeded | NodeStatus::Clean))
    }

    /// Non-zero iff any node failed
    pub fn exit_code(&self) -> i32 {
        if self.failed().is_empty() {
            0
        } else {
            1
        }
    }
}

/// Work handed to a pool thread
enum Job {
    Compile(CompileCommand),
    Compose(BTreeMap<NodeId, PathBuf>),
}

enum Outcome {
    Compiled(CompileOutput),
    Composed(Artifact),
    Failed(BuildError),
}

struct Finished {
    node: NodeId,
    outcome: Outcome,
    duration: Duration,
}

/// Runs the dirty part of a plan on a bounded worker pool
pub struct Executor {
    workers: usize,
    pool: ThreadPool,
}

impl Executor {
    /// Create an executor with `workers` threads (at least one)
    pub fn new(workers: usize) -> BuildResult<Self> {
        let workers = workers.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("metal-worker-{}", i))
            .build()
            .map_err(|e| {
                BuildError::configuration(format!("cannot start {} workers: {}", workers, e))
            })?;
        Ok(Self { workers, pool })
    }

    /// Worker count from the available parallelism
    pub fn default_workers() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Execute `plan`, running only dirty nodes
    #[instrument(skip_all, fields(nodes = graph.len(), dirty = dirty.len(), workers = self.workers))]
    pub fn execute(
        &self,
        graph: &Graph,
        plan: &OrderedPlan,
        dirty: &DirtySet,
        toolchain: &dyn Toolchain,
    ) -> ExecutionResult {
        let len = graph.len();
        let mut remaining: Vec<usize> = graph
            .node_ids()
            .map(|id| plan.predecessors(id).len())
            .collect();
        let mut ready: BinaryHeap<Reverse<NodeId>> = graph
            .node_ids()
            .filter(|id| remaining[id.index()] == 0)
            .map(Reverse)
            .collect();
        let mut statuses: Vec<Option<NodeStatus>> = vec![None; len];
        let mut durations = vec![Duration::ZERO; len];
        let mut invoked = vec![false; len];
        let mut outputs = BTreeMap::new();
        let mut artifacts = Vec::new();
        let (tx, rx) = mpsc::channel::<Finished>();

        self.pool.in_place_scope(|scope| {
            let mut running = 0usize;
            loop {
                while let Some(Reverse(id)) = ready.pop() {
                    let status = if let Some(cause) = failed_cause(plan.predecessors(id), &statuses) {
                        Some(NodeStatus::Skipped { cause })
                    } else if !dirty.is_dirty(id) {
                        if let Some(path) = graph.output_path(id) {
                            outputs.insert(id, path);
                        }
                        Some(NodeStatus::Clean)
                    } else if graph.node(id).is_header_only() {
                        Some(NodeStatus::Succeeded)
                    } else {
                        let job = match graph.node(id) {
                            Node::Unit(_) => compile_command(graph, id).map(Job::Compile),
                            Node::Composite(composite) => Some(Job::Compose(
                                composite
                                    .members
                                    .iter()
                                    .chain(&composite.archives)
                                    .filter_map(|m| outputs.get(m).map(|p| (*m, p.clone())))
                                    .collect(),
                            )),
                        };
                        match job {
                            Some(job) => {
                                debug!(node = %graph.label(id), reason = ?dirty.reason(id), "dispatch");
                                let tx = tx.clone();
                                running += 1;
                                scope.spawn(move |_| {
                                    let start = Instant::now();
                                    let outcome = catch_unwind(AssertUnwindSafe(|| {
                                        run_job(graph, id, job, toolchain)
                                    }))
                                    .unwrap_or_else(|_| {
                                        Outcome::Failed(BuildError::toolchain(
                                            graph.label(id),
                                            "toolchain panicked",
                                        ))
                                    });
                                    // The coordinator outlives every job
                                    let _ = tx.send(Finished {
                                        node: id,
                                        outcome,
                                        duration: start.elapsed(),
                                    });
                                });
                                None
                            }
                            None => Some(NodeStatus::Succeeded),
                        }
                    };

                    if let Some(status) = status {
                        statuses[id.index()] = Some(status);
                        release(plan, id, &mut remaining, &mut ready);
                    }
                }

                if running == 0 {
                    break;
                }
                let Ok(finished) = rx.recv() else {
                    break;
                };
                running -= 1;

                let id = finished.node;
                durations[id.index()] = finished.duration;
                invoked[id.index()] = true;
                let status = match finished.outcome {
                    Outcome::Compiled(output) => {
                        if let Some(path) = output.object.or_else(|| graph.output_path(id)) {
                            outputs.insert(id, path);
                        }
                        NodeStatus::Succeeded
                    }
                    Outcome::Composed(artifact) => {
                        outputs.insert(id, artifact.path.clone());
                        artifacts.push(artifact);
                        NodeStatus::Succeeded
                    }
                    Outcome::Failed(error) => {
                        warn!(node = %graph.label(id), %error, "failed");
                        let kind = FailureKind::of(&error);
                        let diagnostics = match error {
                            BuildError::Toolchain { diagnostics, .. } => diagnostics,
                            BuildError::Composite { reason, .. } => reason,
                            other => other.to_string(),
                        };
                        NodeStatus::Failed { kind, diagnostics }
                    }
                };
                debug!(node = %graph.label(id), ?status, elapsed_ms = finished.duration.as_millis() as u64, "finished");
                statuses[id.index()] = Some(status);
                release(plan, id, &mut remaining, &mut ready);
            }
        });

        let reports: Vec<NodeReport> = graph
            .node_ids()
            .map(|id| NodeReport {
                node: id,
                label: graph.label(id),
                // Unreached only if the plan does not cover the graph
                status: statuses[id.index()]
                    .take()
                    .unwrap_or(NodeStatus::Skipped { cause: id }),
                invoked: invoked[id.index()],
                duration: durations[id.index()],
            })
            .collect();

        let result = ExecutionResult {
            reports,
            outputs,
            artifacts,
        };
        info!(
            succeeded = result.succeeded().len(),
            clean = result.clean().len(),
            failed = result.failed().len(),
            skipped = result.skipped().len(),
            "execution finished"
        );
        result
    }
}

/// First failure upstream of a node, through failed or skipped predecessors
fn failed_cause(predecessors: &[NodeId], statuses: &[Option<NodeStatus>]) -> Option<NodeId> {
    predecessors.iter().find_map(|p| match &statuses[p.index()] {
        Some(NodeStatus::Failed { .. }) => Some(*p),
        Some(NodeStatus::Skipped { cause }) => Some(*cause),
        _ => None,
    })
}

fn release(
    plan: &OrderedPlan,
    id: NodeId,
    remaining: &mut [usize],
    ready: &mut BinaryHeap<Reverse<NodeId>>,
) {
    for succ in plan.successors(id) {
        let count = &mut remaining[succ.index()];
        *count -= 1;
        if *count == 0 {
            ready.push(Reverse(*succ));
        }
    }
}

fn run_job(graph: &Graph, id: NodeId, job: Job, toolchain: &dyn Toolchain) -> Outcome {
    match job {
        Job::Compile(command) => {
            for path in std::iter::once(&command.object).chain(&command.interface) {
                if let Some(parent) = path.parent() {
                    if let Err(e) = fs::create_dir_all(parent) {
                        return Outcome::Failed(BuildError::toolchain(
                            graph.label(id),
                            format!("cannot create {}: {}", parent.display(), e),
                        ));
                    }
                }
            }
            match toolchain.compile(&command) {
                Ok(output) => Outcome::Compiled(output),
                Err(e) => Outcome::Failed(BuildError::toolchain(graph.label(id), e.diagnostics)),
            }
        }
        Job::Compose(outputs) => match Composer::compose(graph, id, &outputs, toolchain) {
            Ok(artifact) => Outcome::Composed(artifact),
            Err(e) => Outcome::Failed(e.into()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_order::order;
    use crate::graph::build;
    use crate::incremental::RecompileReason;
    use crate::kind::SourceKind;
    use crate::registry::{CompileOptions, HeaderDependency, ModuleDependency, Registry};
    use crate::toolchain::ToolchainError;
    use pretty_assertions::assert_eq;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Writes every requested output; fails sources whose file name is listed
    #[derive(Default)]
    struct FakeToolchain {
        fail: Vec<&'static str>,
        fail_compose: bool,
        compiled: Mutex<Vec<String>>,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Toolchain for FakeToolchain {
        fn compile(&self, command: &CompileCommand) -> Result<CompileOutput, ToolchainError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            self.active.fetch_sub(1, Ordering::SeqCst);

            let name = command.source.file_name().unwrap().to_string_lossy().into_owned();
            self.compiled.lock().unwrap().push(name.clone());
            if self.fail.contains(&name.as_str()) {
                return Err(ToolchainError::new(format!("{}: error: expected ';'", name)));
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

        fn archive(&self, _: &[PathBuf], _: &[String], output: &Path) -> Result<(), ToolchainError> {
            fs::write(output, "ar").unwrap();
            Ok(())
        }

        fn link(&self, _: &[PathBuf], _: &[String], output: &Path) -> Result<(), ToolchainError> {
            if self.fail_compose {
                return Err(ToolchainError::new("undefined reference to `greet()'"));
            }
            fs::write(output, "exe").unwrap();
            Ok(())
        }
    }

    /// m.ixx <- n.cpp (imports m), p.c independent
    fn project(temp: &TempDir) -> Registry {
        let mut reg = Registry::new("bar", temp.path());
        let m = reg
            .register("m", SourceKind::Ixx, vec!["m.ixx".into()], CompileOptions::new())
            .unwrap();
        let n = reg
            .register("n", SourceKind::Cxx, vec!["n.cpp".into()], CompileOptions::new())
            .unwrap();
        reg.register("p", SourceKind::C, vec!["p.c".into()], CompileOptions::new())
            .unwrap();
        reg.declare_module_dependency(n, ModuleDependency::SourceSet(m))
            .unwrap();
        reg.add_application("app", vec![n], vec![]).unwrap();
        reg
    }

    fn run(graph: &Graph, toolchain: &FakeToolchain, workers: usize) -> ExecutionResult {
        let plan = order(graph).unwrap();
        let dirty = DirtySet::all(graph, RecompileReason::FirstBuild);
        Executor::new(workers)
            .unwrap()
            .execute(graph, &plan, &dirty, toolchain)
    }

    #[test]
    fn test_all_succeed() {
        let temp = TempDir::new().unwrap();
        let graph = build(&project(&temp), vec![]).unwrap();
        let toolchain = FakeToolchain::default();
        let result = run(&graph, &toolchain, 4);

        assert!(result.is_success());
        assert_eq!(result.exit_code(), 0);
        assert_eq!(result.invocations(), 4);
        assert_eq!(result.artifacts().len(), 1);
        assert!(result.artifacts()[0].path.exists());
    }

    #[test]
    fn test_partial_failure() {
        let temp = TempDir::new().unwrap();
        let graph = build(&project(&temp), vec![]).unwrap();
        let toolchain = FakeToolchain {
            fail: vec!["m.ixx"],
            ..Default::default()
        };
        let result = run(&graph, &toolchain, 2);

        let (m, n, p, app) = (NodeId(0), NodeId(1), NodeId(2), NodeId(3));
        assert_eq!(
            result.status(m),
            &NodeStatus::Failed {
                kind: FailureKind::Toolchain,
                diagnostics: "m.ixx: error: expected ';'".to_string(),
            }
        );
        assert_eq!(result.status(n), &NodeStatus::Skipped { cause: m });
        assert_eq!(result.status(app), &NodeStatus::Skipped { cause: m });
        assert_eq!(result.status(p), &NodeStatus::Succeeded);
        assert_eq!(result.skipped_by(m), vec![n, app]);
        assert_eq!(result.exit_code(), 1);

        let compiled = toolchain.compiled.lock().unwrap();
        assert!(!compiled.contains(&"n.cpp".to_string()));
    }

    #[test]
    fn test_link_failure_is_a_composite_failure() {
        let temp = TempDir::new().unwrap();
        let graph = build(&project(&temp), vec![]).unwrap();
        let toolchain = FakeToolchain {
            fail_compose: true,
            ..Default::default()
        };
        let result = run(&graph, &toolchain, 2);

        let app = NodeId(3);
        match result.status(app) {
            NodeStatus::Failed { kind, diagnostics } => {
                assert_eq!(*kind, FailureKind::Composite);
                assert!(diagnostics.contains("undefined reference"));
            }
            other => panic!("expected a failed link, got {:?}", other),
        }
        assert_eq!(result.failed(), vec![app]);
        assert_eq!(result.succeeded().len(), 3);
    }

    #[test]
    fn test_header_sharing_units_run_concurrently() {
        let temp = TempDir::new().unwrap();
        let mut reg = Registry::new("bar", temp.path());
        let util = reg
            .register("util", SourceKind::Cpp, vec!["util.hpp".into()], CompileOptions::new())
            .unwrap();
        let x = reg
            .register("x", SourceKind::Cxx, vec!["x.cpp".into()], CompileOptions::new())
            .unwrap();
        let y = reg
            .register("y", SourceKind::Cxx, vec!["y.cpp".into()], CompileOptions::new())
            .unwrap();
        reg.declare_header_dependency(x, HeaderDependency::SourceSet(util))
            .unwrap();
        reg.declare_header_dependency(y, HeaderDependency::SourceSet(util))
            .unwrap();
        let graph = build(&reg, vec![]).unwrap();
        let toolchain = FakeToolchain::default();

        let result = run(&graph, &toolchain, 2);
        assert!(result.is_success());
        assert_eq!(toolchain.peak.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_clean_nodes_are_not_run() {
        let temp = TempDir::new().unwrap();
        let graph = build(&project(&temp), vec![]).unwrap();
        let plan = order(&graph).unwrap();
        let toolchain = FakeToolchain::default();

        let result = Executor::new(2)
            .unwrap()
            .execute(&graph, &plan, &DirtySet::default(), &toolchain);
        assert_eq!(result.clean().len(), graph.len());
        assert_eq!(result.invocations(), 0);
        assert!(toolchain.compiled.lock().unwrap().is_empty());
    }

    #[test]
    fn test_worker_bound_is_respected() {
        let temp = TempDir::new().unwrap();
        let mut reg = Registry::new("wide", temp.path());
        let files = (0..8).map(|i| PathBuf::from(format!("f{}.c", i))).collect();
        reg.register("main", SourceKind::C, files, CompileOptions::new())
            .unwrap();
        let graph = build(&reg, vec![]).unwrap();
        let toolchain = FakeToolchain::default();

        let result = run(&graph, &toolchain, 2);
        assert!(result.is_success());
        let peak = toolchain.peak.load(Ordering::SeqCst);
        assert!((1..=2).contains(&peak));
    }

    #[test]
    fn test_header_only_never_invokes_toolchain() {
        let temp = TempDir::new().unwrap();
        let mut reg = Registry::new("hdr", temp.path());
        reg.register("api", SourceKind::Cpp, vec!["api.hpp".into()], CompileOptions::new())
            .unwrap();
        let graph = build(&reg, vec![]).unwrap();
        let toolchain = FakeToolchain::default();

        let result = run(&graph, &toolchain, 1);
        assert_eq!(result.status(NodeId(0)), &NodeStatus::Succeeded);
        assert_eq!(result.invocations(), 0);
    }
}
