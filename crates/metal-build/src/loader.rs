//! Project configuration to registry conversion

use crate::error::{BuildError, BuildResult};
use crate::kind::SourceKind;
use crate::registry::{
    CompileOptions, Exposed, HeaderDependency, ModuleDependency, ProjectDependency, Registry,
    SourceSetId,
};
use metal_config::{HeaderRef, LoadedProject, ModuleRef, SourceSetRef, Workspace};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Registries for every project of a workspace, producers first
pub fn registries_from_workspace(workspace: &Workspace) -> BuildResult<Vec<Registry>> {
    workspace.projects.iter().map(registry_from_project).collect()
}

/// Register everything a loaded project declares
///
/// Source entries naming directories expand to the files matching the set's
/// kind, sorted by path. Directories listed by a cpp set, and the parent
/// directories of header files it lists, become include directories of that
/// set.
pub fn registry_from_project(project: &LoadedProject) -> BuildResult<Registry> {
    let config = &project.config;
    let mut registry =
        Registry::new(project.name(), project.root.clone()).with_output_dir(config.output_dir());

    let mut ids = Vec::with_capacity(config.sources.len());
    for set in &config.sources {
        let kind: SourceKind = set.kind.parse()?;
        let mut files = Vec::new();
        let mut include_dirs = set.include_directories.clone();

        for entry in &set.sources {
            let path = project.root.join(entry);
            if path.is_dir() {
                files.extend(expand_directory(&path, kind));
                if kind == SourceKind::Cpp && !include_dirs.contains(entry) {
                    include_dirs.push(entry.clone());
                }
            } else if path.is_file() {
                if kind == SourceKind::Cpp {
                    let parent = entry.parent().map(Path::to_path_buf).unwrap_or_default();
                    if !include_dirs.contains(&parent) {
                        include_dirs.push(parent);
                    }
                }
                files.push(path);
            } else {
                return Err(BuildError::configuration(format!(
                    "project '{}': source '{}' of set '{}-{}' does not exist",
                    project.name(),
                    entry.display(),
                    set.name,
                    kind
                )));
            }
        }

        let options = CompileOptions::new()
            .with_flags(set.compile_options.iter().cloned())
            .with_include_dirs(include_dirs)
            .with_targets(set.targets.iter().cloned());
        debug!(project = project.name(), set = %set.name, %kind, files = files.len(), "registering");
        ids.push(registry.register(&set.name, kind, files, options)?);
    }

    // References may point forward, so resolve them once every set exists
    for (set, id) in config.sources.iter().zip(&ids) {
        for header in &set.header_dependencies {
            let dependency = match header {
                HeaderRef::Directory(dir) => HeaderDependency::Directory(dir.clone()),
                HeaderRef::SourceSet(reference) => {
                    HeaderDependency::SourceSet(lookup(&registry, reference)?)
                }
                HeaderRef::Exposed(reference) => HeaderDependency::Name(reference.headers.clone()),
            };
            registry.declare_header_dependency(*id, dependency)?;
        }
        for module in &set.module_dependencies {
            let dependency = match module {
                ModuleRef::Name(name) => ModuleDependency::Name(name.clone()),
                ModuleRef::SourceSet(reference) => {
                    ModuleDependency::SourceSet(lookup(&registry, reference)?)
                }
            };
            registry.declare_module_dependency(*id, dependency)?;
        }
    }

    for archive in &config.archives {
        let members = lookup_all(&registry, &archive.sources)?;
        registry.add_archive(&archive.name, members, archive.link_options.clone())?;
    }
    for application in &config.applications {
        let members = lookup_all(&registry, &application.sources)?;
        registry.add_application(&application.name, members, application.link_options.clone())?;
        for archive in &application.archives {
            registry.link_archive(&application.name, archive)?;
        }
    }

    for (channel, exposed) in &config.expose {
        for archive in &exposed.archives {
            registry.expose(channel, Exposed::Archive(archive.clone()))?;
        }
        for module in &exposed.modules {
            registry.expose(channel, Exposed::Module(module.clone()))?;
        }
        for headers in &exposed.headers {
            registry.expose(channel, Exposed::Headers(headers.clone()))?;
        }
    }
    for (name, dependency) in &config.dependencies {
        registry.depend_on(ProjectDependency::new(name, &dependency.channel))?;
    }

    Ok(registry)
}

fn lookup(registry: &Registry, reference: &SourceSetRef) -> BuildResult<SourceSetId> {
    let kind: SourceKind = reference.kind.parse()?;
    registry.find(&reference.sources, kind).ok_or_else(|| {
        BuildError::configuration(format!(
            "project '{}': unknown source set '{}-{}'",
            registry.project(),
            reference.sources,
            kind
        ))
    })
}

fn lookup_all(registry: &Registry, references: &[SourceSetRef]) -> BuildResult<Vec<SourceSetId>> {
    references.iter().map(|r| lookup(registry, r)).collect()
}

/// Files under `dir` with one of `kind`'s extensions, sorted
fn expand_directory(dir: &Path, kind: SourceKind) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && kind.matches(e.path()))
        .map(|e| e.into_path())
        .collect()
}
