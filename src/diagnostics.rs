//! Diagnostics and statistics attached to composed documents.

use crate::core::DirectiveOrigin;
use crate::identity::ResourceId;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// Stable machine-readable code of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticCode {
    /// A resource referenced with `?` failed.
    OptionalResourceFailed,
    /// A resource referenced without a marker failed.
    MissingContent,
    /// A remote resource could not be re-checked; the cached copy was used.
    StaleContent,
    /// A remote resource answered 404 on re-check and renders empty.
    RemoteNotFound,
    /// A local-async renderer failed; the previous output was kept.
    AsyncRenderFailed,
    /// The page relies on scripts that were not executed.
    ClientScript,
    /// A renderer reported something about its input.
    RendererNote,
    /// A directive target could not be identified.
    InvalidReference,
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Self::OptionalResourceFailed => "optional-resource-failed",
            Self::MissingContent => "missing-content",
            Self::StaleContent => "stale-content",
            Self::RemoteNotFound => "remote-not-found",
            Self::AsyncRenderFailed => "async-render-failed",
            Self::ClientScript => "client-script",
            Self::RendererNote => "renderer-note",
            Self::InvalidReference => "invalid-reference",
        };
        f.write_str(code)
    }
}

/// A non-fatal problem encountered while composing a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: DiagnosticCode,
    pub message: String,
    /// The resource the problem is about.
    pub resource: Option<ResourceId>,
    /// The directive through which the resource was reached, when known.
    pub origin: Option<DirectiveOrigin>,
}

impl Diagnostic {
    pub fn warning(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            code,
            message: message.into(),
            resource: None,
            origin: None,
        }
    }

    pub fn error(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            ..Self::warning(code, message)
        }
    }

    #[must_use]
    pub fn with_resource(mut self, id: &ResourceId) -> Self {
        self.resource = Some(id.clone());
        self
    }

    #[must_use]
    pub fn with_origin(mut self, origin: DirectiveOrigin) -> Self {
        self.origin = Some(origin);
        self
    }

    /// One-line colored rendering for terminal output.
    #[must_use]
    pub fn to_colored_string(&self) -> String {
        let label = match self.severity {
            Severity::Warning => "warning".yellow().bold(),
            Severity::Error => "error".red().bold(),
        };
        format!("{label}[{}]: {}", self.code, self.message_with_origin())
    }

    fn message_with_origin(&self) -> String {
        match &self.origin {
            Some(origin) => format!("{} ({origin})", self.message),
            None => self.message.clone(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{label}[{}]: {}", self.code, self.message_with_origin())
    }
}

/// Cached and recomputed node counts for one resource kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindStats {
    pub cached: usize,
    pub recomputed: usize,
    pub failed: usize,
}

/// Per-kind statistics, keyed by the kind's display name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RenderStats(BTreeMap<String, KindStats>);

impl RenderStats {
    pub fn record_cached(&mut self, kind: impl fmt::Display) {
        self.0.entry(kind.to_string()).or_default().cached += 1;
    }

    pub fn record_recomputed(&mut self, kind: impl fmt::Display) {
        self.0.entry(kind.to_string()).or_default().recomputed += 1;
    }

    pub fn record_failed(&mut self, kind: impl fmt::Display) {
        self.0.entry(kind.to_string()).or_default().failed += 1;
    }

    #[must_use]
    pub fn get(&self, kind: &str) -> KindStats {
        self.0.get(kind).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn total_cached(&self) -> usize {
        self.0.values().map(|s| s.cached).sum()
    }

    #[must_use]
    pub fn total_recomputed(&self) -> usize {
        self.0.values().map(|s| s.recomputed).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &KindStats)> {
        self.0.iter()
    }
}

/// Diagnostics of one composed root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub items: Vec<Diagnostic>,
    pub stats: RenderStats,
}

impl Diagnostics {
    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter().filter(|d| d.severity == Severity::Warning)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter().filter(|d| d.severity == Severity::Error)
    }

    #[must_use]
    pub fn has_code(&self, code: DiagnosticCode) -> bool {
        self.items.iter().any(|d| d.code == code)
    }
}
