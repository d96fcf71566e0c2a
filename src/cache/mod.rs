//! Render cache.
//!
//! The cache maps each resource to its last rendered [`Fragment`] together
//! with everything needed to decide whether that fragment is still valid: the
//! content hash it was rendered from, a render key covering the inherited
//! state and directive options, and the time the content was last checked.
//!
//! # Freshness
//!
//! [`CacheStore::assess`] applies the [`ConsistencyPolicy`] to one node:
//!
//! - local resources are always rehashed and compared
//! - remote resources are trusted until their TTL elapses, then re-fetched;
//!   an unchanged hash only refreshes the timestamp, a connection problem
//!   keeps the old artifact flagged stale, and a 404 records empty content
//! - derived resources compare a fingerprint of their sources' content
//!
//! # In-flight coordination
//!
//! Several engine invocations may share one cache. [`CacheStore::claim`]
//! makes sure at most one of them renders a given resource at a time; the
//! others wait and then reuse what the first one recorded.

pub mod policy;

pub use policy::{ConsistencyPolicy, FailureDisposition, RecheckFallback};

use crate::core::{ComposeError, ConsistencyClass, RemoteFailure, ResourceKind, UnavailableKind};
use crate::identity::{ContentHash, ContentSnapshot, ResourceId};
use crate::render::Fragment;
use crate::store::GraphStore;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Cached render of one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: ResourceId,
    pub kind: ResourceKind,
    /// Hash of the content the artifact was rendered from. For derived
    /// resources, the fingerprint of their sources.
    pub content_hash: ContentHash,
    /// Hash of the inherited state and directive options used for the render.
    pub render_key: ContentHash,
    pub artifact: Fragment,
    pub class: ConsistencyClass,
    pub checked_at: DateTime<Utc>,
    pub ttl_secs: Option<u64>,
    /// The last re-check failed; the artifact may be out of date.
    #[serde(default)]
    pub stale: bool,
    /// The last re-check answered 404; the artifact is empty.
    #[serde(default)]
    pub gone: bool,
}

/// Why a node must be rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirtyReason {
    NoEntry,
    ContentChanged,
    RenderInputsChanged,
    Unavailable(UnavailableKind),
}

/// Outcome of checking one node against the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    /// The cached artifact can be used as is.
    Fresh(CacheEntry),
    /// The remote re-check failed; the cached artifact is used with a warning.
    Stale { entry: CacheEntry, failure: RemoteFailure },
    /// The remote resource is gone; it renders empty with a warning.
    Missing(CacheEntry),
    /// The node has to be rendered.
    Dirty(DirtyReason),
}

impl Freshness {
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        matches!(self, Self::Dirty(_))
    }

    /// The cache entry to serve when the node is not re-rendered.
    #[must_use]
    pub const fn entry(&self) -> Option<&CacheEntry> {
        match self {
            Self::Fresh(entry) | Self::Stale { entry, .. } | Self::Missing(entry) => Some(entry),
            Self::Dirty(_) => None,
        }
    }
}

/// Freshness plus the node's own content hash, when it is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assessment {
    pub freshness: Freshness,
    pub content_hash: Option<ContentHash>,
}

/// Result of [`CacheStore::claim`].
pub enum Claim<'a> {
    /// This caller renders the resource. Dropping the guard wakes waiters.
    Leader(InflightGuard<'a>),
    /// Another invocation rendered the resource while this one waited.
    Completed(CacheEntry),
}

/// Marks a resource as being rendered until dropped.
pub struct InflightGuard<'a> {
    inflight: &'a DashMap<ResourceId, Arc<Notify>>,
    id: ResourceId,
    notify: Option<Arc<Notify>>,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        if let Some(notify) = self.notify.take() {
            self.inflight.remove_if(&self.id, |_, current| Arc::ptr_eq(current, &notify));
            notify.notify_waiters();
        }
    }
}

/// Cache of rendered artifacts backed by a [`GraphStore`].
pub struct CacheStore {
    store: Arc<dyn GraphStore>,
    policy: ConsistencyPolicy,
    inflight: DashMap<ResourceId, Arc<Notify>>,
    pending_timeout: Duration,
}

impl CacheStore {
    pub fn new(
        store: Arc<dyn GraphStore>,
        policy: ConsistencyPolicy,
        pending_timeout: Duration,
    ) -> Self {
        Self {
            store,
            policy,
            inflight: DashMap::new(),
            pending_timeout,
        }
    }

    #[must_use]
    pub const fn policy(&self) -> &ConsistencyPolicy {
        &self.policy
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    pub fn lookup(&self, id: &ResourceId) -> Result<Option<CacheEntry>, ComposeError> {
        self.store.get_cache_entry(id)
    }

    /// Whether `entry` may be served without any check right now.
    #[must_use]
    pub fn is_fresh(&self, entry: &CacheEntry) -> bool {
        self.policy.is_fresh(entry, Utc::now())
    }

    /// Records a freshly rendered artifact.
    pub fn record(&self, entry: CacheEntry) -> Result<(), ComposeError> {
        debug!(target: "cache", "recording {} ({})", entry.id, entry.content_hash);
        self.store.put_cache_entry(entry)
    }

    /// Flags an entry stale without touching its timestamp, so the next
    /// render re-checks it again. Returns whether an entry existed.
    pub fn mark_stale(&self, id: &ResourceId) -> Result<bool, ComposeError> {
        let Some(mut entry) = self.lookup(id)? else {
            return Ok(false);
        };
        if !entry.stale {
            entry.stale = true;
            self.store.put_cache_entry(entry)?;
        }
        Ok(true)
    }

    /// A re-check found unchanged content: restart the TTL.
    fn touch(&self, mut entry: CacheEntry, now: DateTime<Utc>) -> Result<CacheEntry, ComposeError> {
        entry.checked_at = now;
        entry.stale = false;
        entry.gone = false;
        self.store.put_cache_entry(entry.clone())?;
        Ok(entry)
    }

    /// A re-check answered 404: keep an empty artifact until the TTL
    /// elapses again.
    fn record_missing(
        &self,
        mut entry: CacheEntry,
        now: DateTime<Utc>,
    ) -> Result<CacheEntry, ComposeError> {
        entry.artifact = Fragment::empty();
        entry.content_hash = ContentHash::empty();
        entry.checked_at = now;
        entry.stale = false;
        entry.gone = true;
        self.store.put_cache_entry(entry.clone())?;
        Ok(entry)
    }

    /// Checks a local or remote node against its cache entry.
    ///
    /// Content is read through `snapshot`, so a resource fetched here is not
    /// fetched again when it is rendered in the same invocation.
    pub async fn assess(
        &self,
        id: &ResourceId,
        render_key: ContentHash,
        snapshot: &ContentSnapshot,
    ) -> Result<Assessment, ComposeError> {
        let entry = self.lookup(id)?;
        let now = Utc::now();

        if id.is_remote() {
            return self.assess_remote(id, entry, render_key, snapshot, now).await;
        }

        let fetched = match snapshot.get(id).await {
            Ok(fetched) => fetched,
            Err(err) => {
                return Ok(Assessment {
                    freshness: Freshness::Dirty(DirtyReason::Unavailable(err.kind)),
                    content_hash: None,
                });
            }
        };

        let freshness = match entry {
            None => Freshness::Dirty(DirtyReason::NoEntry),
            Some(entry) if entry.content_hash != fetched.hash => {
                Freshness::Dirty(DirtyReason::ContentChanged)
            }
            Some(entry) if entry.render_key != render_key => {
                Freshness::Dirty(DirtyReason::RenderInputsChanged)
            }
            Some(entry) => Freshness::Fresh(entry),
        };
        Ok(Assessment {
            freshness,
            content_hash: Some(fetched.hash),
        })
    }

    async fn assess_remote(
        &self,
        id: &ResourceId,
        entry: Option<CacheEntry>,
        render_key: ContentHash,
        snapshot: &ContentSnapshot,
        now: DateTime<Utc>,
    ) -> Result<Assessment, ComposeError> {
        let Some(entry) = entry else {
            return Ok(Assessment {
                freshness: Freshness::Dirty(DirtyReason::NoEntry),
                content_hash: None,
            });
        };

        if self.policy.is_fresh(&entry, now) {
            let content_hash = Some(entry.content_hash);
            let freshness = if entry.gone {
                Freshness::Missing(entry)
            } else if entry.render_key != render_key {
                Freshness::Dirty(DirtyReason::RenderInputsChanged)
            } else {
                Freshness::Fresh(entry)
            };
            return Ok(Assessment {
                freshness,
                content_hash,
            });
        }

        debug!(target: "cache", "re-checking {id}: TTL elapsed");
        match snapshot.get(id).await {
            Ok(fetched) if fetched.hash == entry.content_hash && !entry.gone => {
                let entry = self.touch(entry, now)?;
                let freshness = if entry.render_key == render_key {
                    Freshness::Fresh(entry)
                } else {
                    Freshness::Dirty(DirtyReason::RenderInputsChanged)
                };
                Ok(Assessment {
                    freshness,
                    content_hash: Some(fetched.hash),
                })
            }
            Ok(fetched) => Ok(Assessment {
                freshness: Freshness::Dirty(DirtyReason::ContentChanged),
                content_hash: Some(fetched.hash),
            }),
            Err(err) => {
                let failure = match err.kind {
                    UnavailableKind::Remote { failure } => failure,
                    UnavailableKind::Local { reason } => {
                        RemoteFailure::Connection { message: reason }
                    }
                };
                match ConsistencyPolicy::recheck_fallback(&failure) {
                    RecheckFallback::TreatAsMissing => {
                        warn!(target: "cache", "{id} is gone (404), rendering empty");
                        let entry = self.record_missing(entry, now)?;
                        Ok(Assessment {
                            content_hash: Some(entry.content_hash),
                            freshness: Freshness::Missing(entry),
                        })
                    }
                    RecheckFallback::ServeStale if entry.gone => Ok(Assessment {
                        content_hash: Some(entry.content_hash),
                        freshness: Freshness::Missing(entry),
                    }),
                    RecheckFallback::ServeStale => {
                        warn!(
                            target: "cache",
                            "cannot re-check {id} ({failure}), serving stale copy"
                        );
                        self.mark_stale(id)?;
                        let mut entry = entry;
                        entry.stale = true;
                        Ok(Assessment {
                            content_hash: Some(entry.content_hash),
                            freshness: Freshness::Stale {
                                entry,
                                failure,
                            },
                        })
                    }
                }
            }
        }
    }

    /// Checks a derived node by comparing the fingerprint of its sources.
    /// `fingerprint` is `None` when some source's content is not yet known.
    pub fn assess_derived(
        &self,
        id: &ResourceId,
        fingerprint: Option<ContentHash>,
        render_key: ContentHash,
    ) -> Result<Freshness, ComposeError> {
        let Some(fingerprint) = fingerprint else {
            return Ok(Freshness::Dirty(DirtyReason::ContentChanged));
        };
        Ok(match self.lookup(id)? {
            None => Freshness::Dirty(DirtyReason::NoEntry),
            Some(entry) if entry.content_hash != fingerprint => {
                Freshness::Dirty(DirtyReason::ContentChanged)
            }
            Some(entry) if entry.render_key != render_key => {
                Freshness::Dirty(DirtyReason::RenderInputsChanged)
            }
            Some(entry) => Freshness::Fresh(entry),
        })
    }

    /// Claims the right to render `id`.
    ///
    /// If another caller is rendering it, waits for that render to finish
    /// (or for the pending timeout) and then reuses its entry when it was
    /// recorded after `since` with the same render key.
    pub async fn claim(
        &self,
        id: &ResourceId,
        render_key: ContentHash,
        since: DateTime<Utc>,
    ) -> Result<Claim<'_>, ComposeError> {
        let guard = loop {
            let existing = match self.inflight.entry(id.clone()) {
                Entry::Occupied(occupied) => occupied.get().clone(),
                Entry::Vacant(vacant) => {
                    let notify = Arc::new(Notify::new());
                    vacant.insert(notify.clone());
                    break InflightGuard {
                        inflight: &self.inflight,
                        id: id.clone(),
                        notify: Some(notify),
                    };
                }
            };

            let notified = existing.notified();
            // The leader removes its entry before notifying, so an entry that
            // is still ours after `notified()` guarantees the wake-up.
            let still_running = self
                .inflight
                .get(id)
                .is_some_and(|current| Arc::ptr_eq(current.value(), &existing));
            if !still_running {
                continue;
            }

            debug!(target: "cache", "waiting for in-flight render of {id}");
            tokio::select! {
                () = notified => {}
                () = tokio::time::sleep(self.pending_timeout) => {
                    warn!(
                        target: "cache",
                        "timed out waiting for render of {id}, rendering anyway"
                    );
                    break InflightGuard {
                        inflight: &self.inflight,
                        id: id.clone(),
                        notify: None,
                    };
                }
            }
            if let Some(entry) = self.reusable(id, render_key, since)? {
                return Ok(Claim::Completed(entry));
            }
        };

        // A render may have completed between our last check and the claim.
        if let Some(entry) = self.reusable(id, render_key, since)? {
            drop(guard);
            return Ok(Claim::Completed(entry));
        }
        Ok(Claim::Leader(guard))
    }

    fn reusable(
        &self,
        id: &ResourceId,
        render_key: ContentHash,
        since: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>, ComposeError> {
        Ok(self.lookup(id)?.filter(|entry| {
            entry.checked_at >= since && entry.render_key == render_key && !entry.stale
        }))
    }
}
