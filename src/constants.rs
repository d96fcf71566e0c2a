//! Global constants used throughout the engine.
//!
//! Timeouts, freshness windows and parallelism defaults live here so the
//! cache policy, orchestrator and configuration layer agree on them.

use std::time::Duration;

/// Default freshness window for remote resources (one day).
///
/// Remote content is trusted without any network traffic until this much time
/// has passed since it was last checked. Individual directives may override it
/// with a `ttl=<seconds>` option.
pub const DEFAULT_REMOTE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Maximum time a single renderer invocation may take.
pub const DEFAULT_RENDER_TIMEOUT: Duration = Duration::from_secs(120);

/// Maximum time a single fetch (file read or HTTP request) may take.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a caller waits on another invocation's in-flight render of the
/// same resource before taking over the work itself.
pub const PENDING_STATE_TIMEOUT: Duration = Duration::from_secs(60);

/// Minimum number of concurrent render tasks regardless of CPU count.
pub const MIN_PARALLELISM: usize = 4;

/// Multiplier applied to CPU core count for the default worker count.
///
/// Rendering is dominated by I/O (file reads, HTTP, AI providers), so more
/// tasks than cores keeps the pipeline busy.
pub const PARALLELISM_CORE_MULTIPLIER: usize = 2;

/// Fallback CPU core count when `available_parallelism` cannot be determined.
pub const FALLBACK_CORE_COUNT: usize = 4;

/// Polling interval used by `watch` when none is configured.
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_millis(500);

/// Quiet period `watch` waits for after a change before re-rendering.
pub const DEFAULT_WATCH_DEBOUNCE: Duration = Duration::from_millis(300);

/// File name of the project-level configuration file.
pub const CONFIG_FILE_NAME: &str = "mdweave.toml";

/// Default location of the persistent graph store, relative to the project.
pub const DEFAULT_STORE_PATH: &str = ".mdweave/graph.json";

/// Version tag written into the persistent store; mismatches start fresh.
pub const STORE_FORMAT_VERSION: u32 = 1;

/// Returns the default number of render workers for this machine.
#[must_use]
pub fn default_worker_count() -> usize {
    let cores = std::thread::available_parallelism()
        .map(std::num::NonZero::get)
        .unwrap_or(FALLBACK_CORE_COUNT);
    std::cmp::max(MIN_PARALLELISM, cores * PARALLELISM_CORE_MULTIPLIER)
}
