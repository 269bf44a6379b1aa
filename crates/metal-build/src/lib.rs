//! Metal build orchestration engine
//!
//! Compiles C, header-only C++, C++ translation units, C++20 module
//! interfaces and assembly into archives and applications across several
//! interdependent projects:
//! - Source set registration per project
//! - Dependency graph construction (header, module and cross-project edges)
//! - Module interface ordering with full cycle reports
//! - Incremental builds driven by persisted SHA-256 fingerprints
//! - Parallel execution on a bounded worker pool with partial-failure semantics
//! - Archive and application composition
//!
//! Compiler invocation is delegated to a [`Toolchain`] implementation.

pub mod build_order;
pub mod builder;
pub mod commands;
pub mod composer;
pub mod error;
pub mod executor;
pub mod fingerprint;
pub mod graph;
pub mod incremental;
pub mod kind;
pub mod layout;
pub mod loader;
pub mod output;
pub mod propagate;
pub mod registry;
pub mod toolchain;

// Re-export main types
pub use build_order::{order, CycleError, OrderedPlan};
pub use builder::{BuildConfig, BuildContext, BuildStats, Builder};
pub use commands::{compile_command, compile_commands, CompileCommand, ModuleImport};
pub use composer::{Artifact, Composer, CompositeError};
pub use error::{BuildError, BuildResult};
pub use executor::{ExecutionResult, Executor, FailureKind, NodeReport, NodeStatus};
pub use fingerprint::{Fingerprint, FingerprintStore, Fingerprints, StoreEntry};
pub use graph::{
    CompileUnit, Composite, Consumer, CrossProjectEdge, DependencyEdge, EdgeKind, Graph,
    GraphBuilder, ModuleInterface, Node, NodeId, ProjectId, ProjectView,
};
pub use incremental::{dirty_set, DirtySet, RecompileReason};
pub use kind::{CompileStrategy, SourceKind};
pub use layout::OutputLayout;
pub use loader::{registries_from_workspace, registry_from_project};
pub use output::{BuildOutcome, BuildSummary, FailureReport};
pub use propagate::{flatten, propagate};
pub use registry::{
    CompileOptions, CompositeKind, CompositeSpec, Exposed, HeaderDependency, ModuleDependency,
    ProjectDependency, Registry, SourceSet, SourceSetId,
};
pub use toolchain::{CompileOutput, Toolchain, ToolchainError};
