use super::{EdgeRecord, GraphStore, NodeRecord};
use crate::cache::CacheEntry;
use crate::core::ComposeError;
use crate::identity::ResourceId;
use dashmap::DashMap;
use std::collections::BTreeSet;

/// Store that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    pub(super) nodes: DashMap<ResourceId, NodeRecord>,
    pub(super) edges: DashMap<ResourceId, Vec<EdgeRecord>>,
    pub(super) cache: DashMap<ResourceId, CacheEntry>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cache entries.
    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

impl GraphStore for MemoryStore {
    fn get_node(&self, id: &ResourceId) -> Result<Option<NodeRecord>, ComposeError> {
        Ok(self.nodes.get(id).map(|r| r.value().clone()))
    }

    fn put_node(&self, record: NodeRecord) -> Result<(), ComposeError> {
        self.nodes.insert(record.id.clone(), record);
        Ok(())
    }

    fn get_edges(&self, id: &ResourceId) -> Result<Option<Vec<EdgeRecord>>, ComposeError> {
        Ok(self.edges.get(id).map(|r| r.value().clone()))
    }

    fn put_edges(&self, id: &ResourceId, edges: Vec<EdgeRecord>) -> Result<(), ComposeError> {
        self.edges.insert(id.clone(), edges);
        Ok(())
    }

    fn get_cache_entry(&self, id: &ResourceId) -> Result<Option<CacheEntry>, ComposeError> {
        Ok(self.cache.get(id).map(|r| r.value().clone()))
    }

    fn put_cache_entry(&self, entry: CacheEntry) -> Result<(), ComposeError> {
        self.cache.insert(entry.id.clone(), entry);
        Ok(())
    }

    fn remove(&self, id: &ResourceId) -> Result<(), ComposeError> {
        self.nodes.remove(id);
        self.edges.remove(id);
        self.cache.remove(id);
        Ok(())
    }

    fn resource_ids(&self) -> Result<Vec<ResourceId>, ComposeError> {
        let ids: BTreeSet<ResourceId> = self
            .nodes
            .iter()
            .map(|r| r.key().clone())
            .chain(self.cache.iter().map(|r| r.key().clone()))
            .collect();
        Ok(ids.into_iter().collect())
    }

    fn flush(&self) -> Result<(), ComposeError> {
        Ok(())
    }
}
