//! mdweave - incremental composition of markdown documents
//!
//! Documents pull other resources in through line directives:
//!
//! ```markdown
//! # Handbook
//! ::file intro.md
//! ::image diagrams/flow.png?
//! ::table https://example.com/metrics.csv ttl=3600
//! ::file legal.md!
//! ::consolidate chapter1.md chapter2.md
//! ```
//!
//! The engine resolves the transitive graph of these references, decides
//! which nodes must be rendered again and which can be served from the
//! cache, renders the dirty ones concurrently in dependency order and
//! assembles one composed document per requested root.
//!
//! # Architecture Overview
//!
//! - [`identity`] - canonical resource identifiers, content hashing, fetching
//! - [`markdown`] - the directive parser and frontmatter handling
//! - [`graph`] - the dependency graph and its incremental builder
//! - [`cache`] - cached artifacts and the consistency policy
//! - [`workplan`] - freshness assessment and concurrency layers
//! - [`render`] - renderers, the orchestrator and document assembly
//! - [`store`] - persistence of nodes, edges and cache entries
//! - [`engine`] - the caller-facing API tying the above together
//!
//! Supporting modules: [`config`], [`constants`], [`core`] (errors and shared
//! types), [`diagnostics`], [`utils`] and the [`cli`].
//!
//! # Consistency
//!
//! Local files are re-hashed on every request, so a changed file is always
//! picked up. Remote resources are trusted for a TTL (one day by default, or
//! `ttl=<secs>` on the directive); after it elapses they are re-fetched, and
//! a failed re-check falls back to the cached copy with a warning. A 404
//! renders the resource empty with a warning.
//!
//! # Failure markers
//!
//! A directive target ending in `!` is required: its failure fails the root
//! document. A `?` target is optional; without a marker a failure leaves the
//! slot empty with a missing-content warning.

pub mod cache;
pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod diagnostics;
pub mod engine;
pub mod graph;
pub mod identity;
pub mod markdown;
pub mod render;
pub mod store;
pub mod utils;
pub mod workplan;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
