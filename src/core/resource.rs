//! Resource classification types.
//!
//! Every node in the dependency graph carries a [`ResourceKind`] that selects
//! its renderer, a [`ConsistencyClass`] that selects how its cache entry is
//! validated, and every edge carries a [`RequiredMarker`] that decides what a
//! failure of the referenced resource means for the documents above it.
//!
//! # Examples
//!
//! ```rust
//! use mdweave::core::{DirectiveKind, ResourceKind};
//!
//! let kind: DirectiveKind = "summarize".parse().unwrap();
//! assert_eq!(kind.resource_kind("notes.md").to_string(), "summary");
//!
//! let file: DirectiveKind = "file".parse().unwrap();
//! assert_eq!(file.resource_kind("diagram.png"), ResourceKind::Image);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// AI task performed by a derived resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiTask {
    /// Condense a single source.
    Summary,
    /// Merge several sources into one text.
    Consolidation,
    /// Extract the topics of a source.
    Topic,
    /// Produce an embedding representation of a source.
    Embedding,
}

impl AiTask {
    /// Stable lowercase name used in identifiers and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::Consolidation => "consolidation",
            Self::Topic => "topic",
            Self::Embedding => "embedding",
        }
    }
}

impl fmt::Display for AiTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AiTask {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "summary" => Ok(Self::Summary),
            "consolidation" => Ok(Self::Consolidation),
            "topic" => Ok(Self::Topic),
            "embedding" => Ok(Self::Embedding),
            other => Err(format!("unknown AI task '{other}'")),
        }
    }
}

/// The kind of a resource, which selects its renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    /// A markdown document that may itself contain directives.
    Document,
    /// An HTML page. Pages that run scripts are classified as local-async.
    Html,
    /// An image embedded by reference.
    Image,
    /// Tabular data (CSV, TSV, JSON) rendered as a table or chart.
    TableData,
    /// An audio clip embedded by reference.
    Audio,
    /// Output of an AI task computed from one or more sources.
    Ai(AiTask),
}

impl ResourceKind {
    /// Infers the kind of a plain file reference from its extension.
    ///
    /// Unknown extensions and extensionless references are treated as
    /// documents, which matches how transclusion of prose is normally written.
    #[must_use]
    pub fn from_reference(reference: &str) -> Self {
        // Strip query and fragment so URLs like `a.png?v=2` still classify.
        let trimmed = reference.split(['?', '#']).next().unwrap_or(reference);
        let ext = Path::new(trimmed)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        match ext.as_deref() {
            Some("png" | "jpg" | "jpeg" | "gif" | "svg" | "webp" | "bmp" | "avif") => Self::Image,
            Some("mp3" | "wav" | "ogg" | "flac" | "m4a" | "opus") => Self::Audio,
            Some("csv" | "tsv" | "json") => Self::TableData,
            Some("html" | "htm") => Self::Html,
            _ => Self::Document,
        }
    }

    /// Whether nodes of this kind have outgoing edges discovered during
    /// graph construction.
    #[must_use]
    pub const fn has_dependencies(self) -> bool {
        matches!(self, Self::Document | Self::Ai(_))
    }

    /// Returns the AI task for derived kinds.
    #[must_use]
    pub const fn ai_task(self) -> Option<AiTask> {
        match self {
            Self::Ai(task) => Some(task),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Document => f.write_str("document"),
            Self::Html => f.write_str("html"),
            Self::Image => f.write_str("image"),
            Self::TableData => f.write_str("table-data"),
            Self::Audio => f.write_str("audio"),
            Self::Ai(task) => write!(f, "{task}"),
        }
    }
}

/// The directive keyword written in a document, such as `::file` or `::chart`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectiveKind {
    /// Transclude a file; the target's extension decides its resource kind.
    File,
    /// Embed an image.
    Image,
    /// Embed an audio clip.
    Audio,
    /// Render tabular data as a table.
    Table,
    /// Render tabular data as a chart.
    Chart,
    /// Summarize one source with an AI provider.
    Summarize,
    /// Consolidate several sources with an AI provider.
    Consolidate,
    /// Extract topics from one source.
    Topic,
    /// Embed one source.
    Embed,
}

impl DirectiveKind {
    /// Resource kind of the node a directive of this keyword points at.
    #[must_use]
    pub fn resource_kind(self, target: &str) -> ResourceKind {
        match self {
            Self::File => ResourceKind::from_reference(target),
            Self::Image => ResourceKind::Image,
            Self::Audio => ResourceKind::Audio,
            Self::Table | Self::Chart => ResourceKind::TableData,
            Self::Summarize => ResourceKind::Ai(AiTask::Summary),
            Self::Consolidate => ResourceKind::Ai(AiTask::Consolidation),
            Self::Topic => ResourceKind::Ai(AiTask::Topic),
            Self::Embed => ResourceKind::Ai(AiTask::Embedding),
        }
    }

    /// Whether the directive produces a derived node over its targets
    /// instead of pointing at a target directly.
    #[must_use]
    pub const fn is_ai(self) -> bool {
        matches!(self, Self::Summarize | Self::Consolidate | Self::Topic | Self::Embed)
    }

    /// Whether the directive accepts more than one target.
    #[must_use]
    pub const fn accepts_many_targets(self) -> bool {
        matches!(self, Self::Consolidate)
    }
}

impl fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::File => "file",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Table => "table",
            Self::Chart => "chart",
            Self::Summarize => "summarize",
            Self::Consolidate => "consolidate",
            Self::Topic => "topic",
            Self::Embed => "embed",
        };
        f.write_str(name)
    }
}

impl FromStr for DirectiveKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "file" | "include" | "transclude" => Ok(Self::File),
            "image" | "img" => Ok(Self::Image),
            "audio" => Ok(Self::Audio),
            "table" => Ok(Self::Table),
            "chart" => Ok(Self::Chart),
            "summarize" | "summary" => Ok(Self::Summarize),
            "consolidate" => Ok(Self::Consolidate),
            "topic" | "topics" => Ok(Self::Topic),
            "embed" | "embedding" => Ok(Self::Embed),
            other => Err(format!("unknown directive '{other}'")),
        }
    }
}

/// Validation strategy for a node's cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConsistencyClass {
    /// Local content that renders deterministically. Always rehashed.
    LocalSync,
    /// Local content whose final form depends on asynchronous work such as
    /// client-side scripts. Rehashed like local content, but renderer errors
    /// are reported without invalidating what was cached before.
    LocalAsync,
    /// Remote content, trusted for a TTL and re-checked afterwards.
    Remote,
}

impl fmt::Display for ConsistencyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalSync => f.write_str("local-sync"),
            Self::LocalAsync => f.write_str("local-async"),
            Self::Remote => f.write_str("remote"),
        }
    }
}

/// How strongly a directive depends on its target.
///
/// Ordered by strength so the strongest marker across several incoming
/// edges can be taken with `max`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RequiredMarker {
    /// `?`: failure yields empty content and a warning.
    Optional,
    /// No marker: failure yields empty content and a distinct warning.
    #[default]
    Default,
    /// `!`: failure aborts every root that reaches the directive.
    Required,
}

impl RequiredMarker {
    /// Parses a trailing marker character.
    #[must_use]
    pub const fn from_suffix(c: char) -> Option<Self> {
        match c {
            '!' => Some(Self::Required),
            '?' => Some(Self::Optional),
            _ => None,
        }
    }
}

impl fmt::Display for RequiredMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required => f.write_str("required"),
            Self::Optional => f.write_str("optional"),
            Self::Default => f.write_str("default"),
        }
    }
}

/// Line and column of a directive in its document, both 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourcePosition {
    pub line: usize,
    pub column: usize,
}

impl SourcePosition {
    #[must_use]
    pub const fn new(line: usize, column: usize) -> Self {
        Self {
            line,
            column,
        }
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}
