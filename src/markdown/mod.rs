//! Document parsing.
//!
//! The engine does not interpret markdown itself. A [`DocumentParser`] turns
//! document text into a [`ParsedDocument`]: the ordered directives it
//! contains, the document structure as text runs interleaved with directive
//! slots, and its frontmatter. [`DirectiveParser`] is the built-in syntax:
//!
//! ```text
//! ::file ../shared/intro.md!
//! ::image https://example.com/logo.png? alt="Project logo"
//! ::consolidate notes/a.md notes/b.md
//! ::chart data/sales.csv type=bar ttl=3600
//! ```
//!
//! A trailing `!` marks the target required, a trailing `?` optional.
//! Directives inside fenced code blocks are ignored.

mod directive;
pub mod frontmatter;

pub use directive::DirectiveParser;
pub use frontmatter::{merge_state, parse_frontmatter};

use crate::core::{DirectiveKind, RequiredMarker, SourcePosition};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Options attached to a directive as `key=value` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DirectiveOptions(BTreeMap<String, String>);

impl DirectiveOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Per-directive TTL override, in seconds.
    #[must_use]
    pub fn ttl_secs(&self) -> Option<u64> {
        self.get("ttl").and_then(|v| v.parse().ok())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

/// One directive found in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub kind: DirectiveKind,
    /// Target references exactly as written, markers removed. Only
    /// consolidation takes more than one.
    pub targets: Vec<String>,
    pub options: DirectiveOptions,
    pub marker: RequiredMarker,
    pub position: SourcePosition,
}

/// A piece of document structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal text, newlines included.
    Text(String),
    /// The directive at this index in [`ParsedDocument::directives`].
    Directive(usize),
}

/// Result of parsing one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedDocument {
    pub directives: Vec<Directive>,
    pub segments: Vec<Segment>,
    pub frontmatter: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Extracts directives and structure from document text.
///
/// Parsing is synchronous and side-effect free; the engine calls it from
/// graph construction and from the document renderer.
pub trait DocumentParser: Send + Sync {
    /// Parses `content`.
    ///
    /// Unknown directive keywords are kept as literal text; only structural
    /// problems the parser cannot recover from are errors.
    fn parse(&self, content: &str) -> anyhow::Result<ParsedDocument>;
}
