//! Integration test suite for mdweave
//!
//! End-to-end tests that drive the [`Engine`](mdweave::engine::Engine) over
//! real files in a temporary directory, with remote resources served from a
//! script. They run quickly and need no network.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! Tests are organized by functionality area:
//! - **composition**: Nested transclusion, state layering, templating, AI-derived content
//! - **incremental**: Cache hits, targeted re-rendering, persistence across runs
//! - **failures**: Cycles and the `!` / `?` / default failure markers
//! - **remote**: TTL freshness, stale fallback and 404 handling
//! - **concurrency**: Shared nodes and concurrent invocations
//! - **cli**: Commands driven in-process

#[path = "../common/mod.rs"]
mod common;

mod cli;
mod composition;
mod concurrency;
mod failures;
mod incremental;
mod remote;
