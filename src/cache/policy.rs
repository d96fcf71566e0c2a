//! Consistency policy.
//!
//! The policy decides three things: which [`ConsistencyClass`] a resource
//! belongs to, how long a remote entry is trusted, and what a failed resource
//! means for the documents that reference it.

use super::CacheEntry;
use crate::core::{ConsistencyClass, RemoteFailure, RequiredMarker, ResourceKind};
use crate::diagnostics::DiagnosticCode;
use crate::identity::ResourceId;
use crate::markdown::DirectiveOptions;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// What a failed resource means for a referring directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Abort every root that reaches the directive.
    Fatal,
    /// Substitute empty content and record a warning with this code.
    Warn(DiagnosticCode),
}

/// What to do when re-checking an expired remote entry fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecheckFallback {
    /// Keep serving the cached artifact, flagged stale.
    ServeStale,
    /// The resource is gone; serve empty content until the next TTL expiry.
    TreatAsMissing,
}

#[derive(Debug, Clone)]
pub struct ConsistencyPolicy {
    default_remote_ttl: Duration,
}

impl ConsistencyPolicy {
    #[must_use]
    pub const fn new(default_remote_ttl: Duration) -> Self {
        Self { default_remote_ttl }
    }

    /// Classifies a resource. `content` is consulted for HTML, where pages
    /// that run scripts are local-async.
    #[must_use]
    pub fn classify(
        &self,
        id: &ResourceId,
        kind: ResourceKind,
        content: Option<&[u8]>,
    ) -> ConsistencyClass {
        if id.is_remote() {
            return ConsistencyClass::Remote;
        }
        if kind == ResourceKind::Html && content.is_some_and(contains_script) {
            return ConsistencyClass::LocalAsync;
        }
        ConsistencyClass::LocalSync
    }

    /// TTL for a new entry in seconds. Only remote entries expire.
    #[must_use]
    pub fn ttl_secs(&self, class: ConsistencyClass, options: &DirectiveOptions) -> Option<u64> {
        match class {
            ConsistencyClass::Remote => {
                Some(options.ttl_secs().unwrap_or(self.default_remote_ttl.as_secs()))
            }
            ConsistencyClass::LocalSync | ConsistencyClass::LocalAsync => None,
        }
    }

    /// Whether `entry` may be used without looking at the resource again.
    ///
    /// Local entries are never trusted blindly; they are confirmed by
    /// rehashing. Remote entries are trusted until their TTL elapses unless a
    /// previous re-check left them stale.
    #[must_use]
    pub fn is_fresh(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        match entry.class {
            ConsistencyClass::Remote => !entry.stale && !self.ttl_elapsed(entry, now),
            ConsistencyClass::LocalSync | ConsistencyClass::LocalAsync => false,
        }
    }

    #[must_use]
    pub fn ttl_elapsed(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        let ttl = entry.ttl_secs.unwrap_or(self.default_remote_ttl.as_secs());
        let ttl = i64::try_from(ttl)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX);
        now.signed_duration_since(entry.checked_at) >= ttl
    }

    #[must_use]
    pub const fn failure_disposition(marker: RequiredMarker) -> FailureDisposition {
        match marker {
            RequiredMarker::Required => FailureDisposition::Fatal,
            RequiredMarker::Optional => {
                FailureDisposition::Warn(DiagnosticCode::OptionalResourceFailed)
            }
            RequiredMarker::Default => FailureDisposition::Warn(DiagnosticCode::MissingContent),
        }
    }

    #[must_use]
    pub const fn recheck_fallback(failure: &RemoteFailure) -> RecheckFallback {
        if failure.is_not_found() {
            RecheckFallback::TreatAsMissing
        } else {
            RecheckFallback::ServeStale
        }
    }
}

fn contains_script(content: &[u8]) -> bool {
    content.windows(7).any(|w| w.eq_ignore_ascii_case(b"<script"))
}
