//! Persistence of the dependency graph and the render cache.
//!
//! The engine reads and writes through the [`GraphStore`] trait so the same
//! code runs against an in-memory store (tests, one-shot renders) and the
//! JSON file store used by the CLI between runs.
//!
//! Stored data is keyed by [`ResourceId`]:
//!
//! - a [`NodeRecord`] per resource with its kind, last content hash and
//!   frontmatter
//! - the outgoing [`EdgeRecord`]s of each document, in directive order
//! - one [`CacheEntry`] per rendered resource

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::cache::CacheEntry;
use crate::core::{ComposeError, DirectiveKind, RequiredMarker, ResourceKind, SourcePosition};
use crate::identity::{ContentHash, ResourceId};
use crate::markdown::DirectiveOptions;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What is known about a resource from the last time it was parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: ResourceId,
    pub kind: ResourceKind,
    /// Content hash at parse time. Edges are reused while it matches.
    pub hash: Option<ContentHash>,
    #[serde(default)]
    pub frontmatter: Option<serde_json::Map<String, serde_json::Value>>,
    /// Directives whose targets could not be identified.
    #[serde(default)]
    pub invalid_references: Vec<InvalidReference>,
    pub updated_at: DateTime<Utc>,
}

/// A directive target that is not a valid reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidReference {
    pub reference: String,
    pub reason: String,
    pub directive: usize,
    pub marker: RequiredMarker,
    pub position: SourcePosition,
}

/// One outgoing edge of a document, as parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub target: ResourceId,
    pub kind: ResourceKind,
    pub directive_kind: DirectiveKind,
    /// Index of the directive in the source document.
    pub directive: usize,
    pub marker: RequiredMarker,
    #[serde(default)]
    pub options: DirectiveOptions,
    pub position: SourcePosition,
}

/// Storage for nodes, edges and cache entries.
///
/// Implementations must be safe to share across tasks. Writes may be
/// buffered until [`GraphStore::flush`].
pub trait GraphStore: Send + Sync {
    fn get_node(&self, id: &ResourceId) -> Result<Option<NodeRecord>, ComposeError>;

    fn put_node(&self, record: NodeRecord) -> Result<(), ComposeError>;

    /// Outgoing edges of `id`, or `None` if it was never parsed.
    fn get_edges(&self, id: &ResourceId) -> Result<Option<Vec<EdgeRecord>>, ComposeError>;

    fn put_edges(&self, id: &ResourceId, edges: Vec<EdgeRecord>) -> Result<(), ComposeError>;

    fn get_cache_entry(&self, id: &ResourceId) -> Result<Option<CacheEntry>, ComposeError>;

    fn put_cache_entry(&self, entry: CacheEntry) -> Result<(), ComposeError>;

    /// Removes everything stored about `id`.
    fn remove(&self, id: &ResourceId) -> Result<(), ComposeError>;

    /// Every resource with a node record or cache entry.
    fn resource_ids(&self) -> Result<Vec<ResourceId>, ComposeError>;

    /// Persists buffered writes.
    fn flush(&self) -> Result<(), ComposeError>;
}
