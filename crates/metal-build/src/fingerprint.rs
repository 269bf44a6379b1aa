//! Node fingerprints and their persisted store
//!
//! A node's own fingerprint covers its direct inputs: source contents,
//! options, include directories, header directory contents, module name and
//! target for units; name, options and member keys for composites. Its full
//! fingerprint adds the own fingerprints of every node reachable through
//! header, ordering or membership relations.

use crate::error::{BuildError, BuildResult};
use crate::graph::{Graph, Node, NodeId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Current on-disk format of the fingerprint store
pub const STORE_VERSION: u32 = 1;

/// Hex-encoded SHA-256 digest
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn finish(hasher: Sha256) -> Self {
        Self(format!("{:x}", hasher.finalize()))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough to tell builds apart in logs
        f.write_str(&self.0[..self.0.len().min(12)])
    }
}

/// Fingerprints of every node in a graph
#[derive(Debug, Clone)]
pub struct Fingerprints {
    own: Vec<Fingerprint>,
    full: Vec<Fingerprint>,
    dependencies: Vec<Vec<String>>,
}

impl Fingerprints {
    /// Fingerprint every node of `graph`
    ///
    /// Fails when a source file cannot be read.
    pub fn compute(graph: &Graph) -> BuildResult<Self> {
        let own = graph
            .node_ids()
            .map(|id| own_fingerprint(graph, id))
            .collect::<BuildResult<Vec<_>>>()?;

        let mut full = Vec::with_capacity(own.len());
        let mut dependencies = Vec::with_capacity(own.len());
        for id in graph.node_ids() {
            let mut reachable: Vec<(String, NodeId)> = graph
                .reachable(id)
                .into_iter()
                .map(|dep| (graph.key(dep), dep))
                .collect();
            reachable.sort();

            let mut hasher = Sha256::new();
            field(&mut hasher, own[id.index()].as_str());
            for (key, dep) in &reachable {
                field(&mut hasher, key);
                field(&mut hasher, own[dep.index()].as_str());
            }
            full.push(Fingerprint::finish(hasher));
            dependencies.push(reachable.into_iter().map(|(key, _)| key).collect());
        }

        debug!(nodes = own.len(), "fingerprints computed");
        Ok(Self {
            own,
            full,
            dependencies,
        })
    }

    /// Digest of the node's direct inputs
    pub fn own(&self, id: NodeId) -> &Fingerprint {
        &self.own[id.index()]
    }

    /// Digest of the node's inputs and everything it relates to
    pub fn full(&self, id: NodeId) -> &Fingerprint {
        &self.full[id.index()]
    }

    /// Keys of every node reachable from `id`, sorted
    pub fn dependency_keys(&self, id: NodeId) -> &[String] {
        &self.dependencies[id.index()]
    }

    pub fn len(&self) -> usize {
        self.own.len()
    }

    pub fn is_empty(&self) -> bool {
        self.own.is_empty()
    }
}

fn own_fingerprint(graph: &Graph, id: NodeId) -> BuildResult<Fingerprint> {
    let mut hasher = Sha256::new();
    field(&mut hasher, &graph.key(id));
    field(&mut hasher, graph.target().unwrap_or(""));

    match graph.node(id) {
        Node::Unit(unit) => {
            field(&mut hasher, "unit");
            field(&mut hasher, unit.kind.as_str());
            let contents = fs::read(&unit.source).map_err(|e| BuildError::io(&unit.source, e))?;
            field(&mut hasher, &contents);
            for flag in &unit.flags {
                field(&mut hasher, flag);
            }
            for dir in &unit.include_dirs {
                field(&mut hasher, dir.to_string_lossy().as_bytes());
            }
            for dir in &unit.header_dirs {
                hash_directory(&mut hasher, dir);
            }
            if let Some(module) = &unit.module {
                field(&mut hasher, "module");
                field(&mut hasher, &module.name);
            }
        }
        Node::Composite(composite) => {
            field(&mut hasher, "composite");
            field(&mut hasher, &composite.kind.to_string());
            field(&mut hasher, &composite.name);
            for option in &composite.link_options {
                field(&mut hasher, option);
            }
            for member in composite.members.iter().chain(&composite.archives) {
                field(&mut hasher, &graph.key(*member));
            }
        }
    }

    Ok(Fingerprint::finish(hasher))
}

/// Hash every file under `dir` in a sorted walk
fn hash_directory(hasher: &mut Sha256, dir: &Path) {
    field(hasher, dir.to_string_lossy().as_bytes());
    if !dir.is_dir() {
        field(hasher, "missing");
        return;
    }

    for entry in WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.file_type().is_file() {
            let rel = entry.path().strip_prefix(dir).unwrap_or(entry.path());
            field(hasher, rel.to_string_lossy().as_bytes());
            match fs::read(entry.path()) {
                Ok(contents) => field(hasher, &contents),
                Err(_) => field(hasher, "unreadable"),
            }
        }
    }
}

/// Length-prefixed so adjacent fields never run together
fn field(hasher: &mut Sha256, bytes: impl AsRef<[u8]>) {
    let bytes = bytes.as_ref();
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// Fingerprints recorded by the last successful build of each node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerprintStore {
    version: u32,
    entries: BTreeMap<String, StoreEntry>,
}

/// Stored state of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreEntry {
    pub own: Fingerprint,
    pub fingerprint: Fingerprint,
    /// Keys of the nodes the fingerprint covers
    pub dependencies: Vec<String>,
}

impl FingerprintStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            version: STORE_VERSION,
            entries: BTreeMap::new(),
        }
    }

    /// Load the store at `path`
    ///
    /// A missing store is a first build. A corrupt or outdated store is
    /// logged and also treated as a first build.
    pub fn load(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no fingerprint store, first build");
                return Self::new();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read fingerprint store, rebuilding everything");
                return Self::new();
            }
        };

        match serde_json::from_str::<Self>(&content) {
            Ok(store) if store.version == STORE_VERSION => store,
            Ok(store) => {
                warn!(
                    path = %path.display(),
                    version = store.version,
                    "fingerprint store has an unsupported version, rebuilding everything"
                );
                Self::new()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "fingerprint store is corrupt, rebuilding everything");
                Self::new()
            }
        }
    }

    /// Save the store to `path`
    ///
    /// Writes a sibling temporary file and renames it over the old store.
    pub fn save(&self, path: &Path) -> BuildResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| BuildError::Store(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| BuildError::io(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| BuildError::io(path, e))
    }

    pub fn get(&self, key: &str) -> Option<&StoreEntry> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, entry: StoreEntry) {
        self.entries.insert(key.into(), entry);
    }

    pub fn remove(&mut self, key: &str) -> Option<StoreEntry> {
        self.entries.remove(key)
    }

    /// Record the current fingerprints of `id`
    pub fn record(&mut self, graph: &Graph, fingerprints: &Fingerprints, id: NodeId) {
        self.insert(
            graph.key(id),
            StoreEntry {
                own: fingerprints.own(id).clone(),
                fingerprint: fingerprints.full(id).clone(),
                dependencies: fingerprints.dependency_keys(id).to_vec(),
            },
        );
    }

    /// Stored entries, sorted by key
    pub fn entries(&self) -> impl Iterator<Item = (&str, &StoreEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for FingerprintStore {
    fn default() -> Self {
        Self::new()
    }
}
