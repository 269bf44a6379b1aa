//! Cross-project dependency propagation
//!
//! A producer project exposes archives, module interfaces and header sets
//! under named channels. A consumer depending on a channel gets a project edge
//! from every source set importing an exposed module and every application
//! linking an exposed archive, and a header edge from every source set
//! including an exposed header set.

use crate::error::{BuildError, BuildResult};
use crate::graph::{Consumer, CrossProjectEdge, Graph, GraphBuilder, ProjectView};
use crate::registry::{CompositeKind, Exposed, HeaderDependency, ModuleDependency, Registry};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// Edges from `consumer` declarations to items `producer` exposes on `channel`
pub fn propagate(
    consumer: &Registry,
    producer: &ProjectView,
    channel: &str,
) -> BuildResult<Vec<CrossProjectEdge>> {
    let exposed = producer.exposures(channel).ok_or_else(|| {
        BuildError::configuration(format!(
            "project '{}' depends on channel '{}' of project '{}', which does not expose it",
            consumer.project(),
            channel,
            producer.name()
        ))
    })?;

    let mut edges = Vec::new();
    for item in exposed {
        let missing = || {
            BuildError::graph(format!(
                "project '{}' exposes {} on channel '{}' but does not build it",
                producer.name(),
                item,
                channel
            ))
        };

        match item {
            Exposed::Module(name) => {
                let node = producer.module(name).ok_or_else(missing)?;
                let wanted = ModuleDependency::Name(name.clone());
                for (sid, set) in consumer.source_sets() {
                    if set.module_dependencies.contains(&wanted) {
                        edges.push(CrossProjectEdge {
                            consumer: Consumer::SourceSet(sid),
                            producer: node,
                            item: item.clone(),
                            producer_project: producer.name().to_string(),
                        });
                    }
                }
            }
            Exposed::Archive(name) => {
                let node = producer.archive(name).ok_or_else(missing)?;
                for spec in consumer.composites() {
                    if spec.kind == CompositeKind::Application && spec.archives.contains(name) {
                        edges.push(CrossProjectEdge {
                            consumer: Consumer::Application(spec.name.clone()),
                            producer: node,
                            item: item.clone(),
                            producer_project: producer.name().to_string(),
                        });
                    }
                }
            }
            Exposed::Headers(name) => {
                let units = producer.header_set(name).ok_or_else(missing)?;
                if units.is_empty() {
                    return Err(BuildError::graph(format!(
                        "project '{}' exposes {} on channel '{}' but it has no headers for this target",
                        producer.name(),
                        item,
                        channel
                    )));
                }
                let wanted = HeaderDependency::Name(name.clone());
                for (sid, set) in consumer.source_sets() {
                    if set.header_dependencies.contains(&wanted) {
                        edges.extend(units.iter().map(|unit| CrossProjectEdge {
                            consumer: Consumer::SourceSet(sid),
                            producer: *unit,
                            item: item.clone(),
                            producer_project: producer.name().to_string(),
                        }));
                    }
                }
            }
        }
    }

    edges.sort();
    debug!(
        consumer = consumer.project(),
        producer = producer.name(),
        channel,
        edges = edges.len(),
        "propagated"
    );
    Ok(edges)
}

/// Build one graph from registries ordered producers first
#[instrument(skip_all, fields(projects = registries.len()))]
pub fn flatten(registries: &[Registry], target: Option<String>) -> BuildResult<Graph> {
    let mut builder = GraphBuilder::new(target);

    for registry in registries {
        let mut cross = Vec::new();
        for dependency in registry.dependencies() {
            let producer = builder.project(&dependency.project).ok_or_else(|| {
                BuildError::configuration(format!(
                    "project '{}' depends on unknown project '{}'",
                    registry.project(),
                    dependency.project
                ))
            })?;
            cross.extend(propagate(registry, producer, &dependency.channel)?);
        }

        let mut sources: BTreeMap<(&Consumer, &Exposed), &str> = BTreeMap::new();
        for edge in &cross {
            if let Some(first) = sources.insert((&edge.consumer, &edge.item), &edge.producer_project) {
                if first != edge.producer_project {
                    return Err(BuildError::graph(format!(
                        "project '{}': {} is provided by both '{}' and '{}'",
                        registry.project(),
                        edge.item,
                        first,
                        edge.producer_project
                    )));
                }
            }
        }

        builder.add_project(registry, cross)?;
    }

    Ok(builder.finish())
}
