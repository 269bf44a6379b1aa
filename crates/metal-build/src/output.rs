//! Build summaries for humans and machines

use crate::error::BuildError;
use crate::executor::{ExecutionResult, FailureKind, NodeStatus};
use crate::graph::Graph;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// One failed node and everything it took down with it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    pub unit: String,
    pub kind: FailureKind,
    pub diagnostics: String,
    /// Labels of dependents that were never attempted
    pub skipped: Vec<String>,
}

/// How a build ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BuildOutcome {
    Succeeded,
    Failed { failures: Vec<FailureReport> },
    /// Stopped before scheduling by a configuration, graph or cycle error
    Aborted { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildSummary {
    #[serde(flatten)]
    pub outcome: BuildOutcome,
    pub total: usize,
    /// Nodes for which the toolchain was invoked
    pub compiled: usize,
    pub succeeded: usize,
    pub clean: usize,
    pub failed: usize,
    pub skipped: usize,
    pub artifacts: Vec<PathBuf>,
    pub elapsed_ms: u64,
}

impl BuildSummary {
    pub fn from_result(graph: &Graph, result: &ExecutionResult, elapsed: Duration) -> Self {
        let failures: Vec<FailureReport> = result
            .reports()
            .iter()
            .filter_map(|report| match &report.status {
                NodeStatus::Failed { kind, diagnostics } => Some(FailureReport {
                    unit: report.label.clone(),
                    kind: *kind,
                    diagnostics: diagnostics.clone(),
                    skipped: result
                        .skipped_by(report.node)
                        .into_iter()
                        .map(|id| graph.label(id))
                        .collect(),
                }),
                _ => None,
            })
            .collect();

        let outcome = if failures.is_empty() {
            BuildOutcome::Succeeded
        } else {
            BuildOutcome::Failed { failures }
        };

        Self {
            outcome,
            total: graph.len(),
            compiled: result.invocations(),
            succeeded: result.succeeded().len(),
            clean: result.clean().len(),
            failed: result.failed().len(),
            skipped: result.skipped().len(),
            artifacts: result.artifacts().iter().map(|a| a.path.clone()).collect(),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn aborted(error: &BuildError) -> Self {
        Self {
            outcome: BuildOutcome::Aborted {
                error: error.to_string(),
            },
            total: 0,
            compiled: 0,
            succeeded: 0,
            clean: 0,
            failed: 0,
            skipped: 0,
            artifacts: Vec::new(),
            elapsed_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == BuildOutcome::Succeeded
    }

    pub fn exit_code(&self) -> i32 {
        match self.outcome {
            BuildOutcome::Succeeded => 0,
            BuildOutcome::Failed { .. } => 1,
            BuildOutcome::Aborted { .. } => 2,
        }
    }
}

impl fmt::Display for BuildSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let seconds = self.elapsed_ms as f64 / 1000.0;
        match &self.outcome {
            BuildOutcome::Succeeded => write!(
                f,
                "Build succeeded: {} compiled, {} up to date ({:.2}s)",
                self.compiled, self.clean, seconds
            ),
            BuildOutcome::Failed { failures } => {
                for failure in failures {
                    match failure.kind {
                        FailureKind::Toolchain => writeln!(f, "error: {}", failure.unit)?,
                        FailureKind::Composite => {
                            writeln!(f, "error: failed to compose {}", failure.unit)?
                        }
                    }
                    for line in failure.diagnostics.lines() {
                        writeln!(f, "    {}", line)?;
                    }
                    if !failure.skipped.is_empty() {
                        writeln!(f, "    skipped: {}", failure.skipped.join(", "))?;
                    }
                }
                write!(
                    f,
                    "Build failed: {} failed, {} skipped, {} succeeded ({:.2}s)",
                    self.failed, self.skipped, self.succeeded, seconds
                )
            }
            BuildOutcome::Aborted { error } => write!(f, "Build aborted: {}", error),
        }
    }
}
