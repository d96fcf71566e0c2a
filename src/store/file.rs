use super::memory::MemoryStore;
use super::{EdgeRecord, GraphStore, NodeRecord};
use crate::cache::CacheEntry;
use crate::constants::STORE_FORMAT_VERSION;
use crate::core::ComposeError;
use crate::identity::ResourceId;
use crate::utils::fs::atomic_write;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    #[serde(default)]
    nodes: Vec<NodeRecord>,
    #[serde(default)]
    edges: Vec<EdgeSet>,
    #[serde(default)]
    cache: Vec<CacheEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EdgeSet {
    source: ResourceId,
    edges: Vec<EdgeRecord>,
}

/// Store persisted as a single JSON file.
///
/// All reads and writes go to memory; [`GraphStore::flush`] writes the file
/// atomically. A file written by an incompatible version is ignored and the
/// store starts empty.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    inner: MemoryStore,
}

impl FileStore {
    /// Opens the store at `path`, loading it if the file exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ComposeError> {
        let path = path.into();
        let inner = MemoryStore::new();

        if path.exists() {
            let raw = std::fs::read(&path).map_err(|e| ComposeError::store("open", e))?;
            match serde_json::from_slice::<StoreFile>(&raw) {
                Ok(file) if file.version == STORE_FORMAT_VERSION => {
                    debug!(
                        target: "store",
                        "loaded {} nodes and {} cache entries from {}",
                        file.nodes.len(),
                        file.cache.len(),
                        path.display()
                    );
                    for node in file.nodes {
                        inner.nodes.insert(node.id.clone(), node);
                    }
                    for set in file.edges {
                        inner.edges.insert(set.source, set.edges);
                    }
                    for entry in file.cache {
                        inner.cache.insert(entry.id.clone(), entry);
                    }
                }
                Ok(file) => warn!(
                    target: "store",
                    "ignoring graph store {} written by format version {}",
                    path.display(),
                    file.version
                ),
                Err(e) => warn!(
                    target: "store",
                    "ignoring unreadable graph store {}: {e}",
                    path.display()
                ),
            }
        }

        Ok(Self {
            path,
            inner,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn snapshot(&self) -> StoreFile {
        let mut nodes: Vec<NodeRecord> =
            self.inner.nodes.iter().map(|r| r.value().clone()).collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        let mut edges: Vec<EdgeSet> = self
            .inner
            .edges
            .iter()
            .map(|r| EdgeSet {
                source: r.key().clone(),
                edges: r.value().clone(),
            })
            .collect();
        edges.sort_by(|a, b| a.source.cmp(&b.source));

        let mut cache: Vec<CacheEntry> =
            self.inner.cache.iter().map(|r| r.value().clone()).collect();
        cache.sort_by(|a, b| a.id.cmp(&b.id));

        StoreFile {
            version: STORE_FORMAT_VERSION,
            nodes,
            edges,
            cache,
        }
    }
}

impl GraphStore for FileStore {
    fn get_node(&self, id: &ResourceId) -> Result<Option<NodeRecord>, ComposeError> {
        self.inner.get_node(id)
    }

    fn put_node(&self, record: NodeRecord) -> Result<(), ComposeError> {
        self.inner.put_node(record)
    }

    fn get_edges(&self, id: &ResourceId) -> Result<Option<Vec<EdgeRecord>>, ComposeError> {
        self.inner.get_edges(id)
    }

    fn put_edges(&self, id: &ResourceId, edges: Vec<EdgeRecord>) -> Result<(), ComposeError> {
        self.inner.put_edges(id, edges)
    }

    fn get_cache_entry(&self, id: &ResourceId) -> Result<Option<CacheEntry>, ComposeError> {
        self.inner.get_cache_entry(id)
    }

    fn put_cache_entry(&self, entry: CacheEntry) -> Result<(), ComposeError> {
        self.inner.put_cache_entry(entry)
    }

    fn remove(&self, id: &ResourceId) -> Result<(), ComposeError> {
        self.inner.remove(id)
    }

    fn resource_ids(&self) -> Result<Vec<ResourceId>, ComposeError> {
        self.inner.resource_ids()
    }

    fn flush(&self) -> Result<(), ComposeError> {
        let json = serde_json::to_vec_pretty(&self.snapshot())
            .map_err(|e| ComposeError::store("serialize", e))?;
        atomic_write(&self.path, &json)
            .map_err(|e| ComposeError::store("flush", format!("{e:#}")))?;
        debug!(target: "store", "flushed graph store to {}", self.path.display());
        Ok(())
    }
}
