//! Test utilities for mdweave
//!
//! Helpers shared by unit and integration tests:
//! - [`TestProject`] lays out documents in a temporary directory
//! - [`ScriptedFetcher`] serves scripted content and counts fetches
//! - [`CountingRenderer`] and [`EchoAiProvider`] stand in for real renderers
//!
//! # Example
//!
//! ```rust,no_run
//! use mdweave::test_utils::ScriptedFetcher;
//! use mdweave::identity::ResourceId;
//! use std::path::PathBuf;
//!
//! let fetcher = ScriptedFetcher::new();
//! let id = ResourceId::Local(PathBuf::from("/docs/a.md"));
//! fetcher.insert(&id, "# A\n");
//! assert_eq!(fetcher.calls(&id), 0);
//! ```

mod doubles;
mod environment;

pub use doubles::{CountingRenderer, EchoAiProvider, ScriptedFetcher};
pub use environment::TestProject;

use std::sync::Once;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Only the first call has an effect. Uses `level` when given, otherwise
/// `RUST_LOG`; with neither, logging stays off.
///
/// ```bash
/// RUST_LOG=mdweave=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true)
            .try_init();
    });
}
