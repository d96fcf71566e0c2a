//! Engine configuration.
//!
//! Settings come from a TOML file and a couple of environment overrides.
//! Every field has a default, so an empty or missing file is valid:
//!
//! ```toml
//! # mdweave.toml
//! workers = 8
//! remote_ttl_secs = 3600
//! render_timeout_secs = 60
//! store_path = ".mdweave/graph.json"
//! ```
//!
//! # Lookup order
//!
//! 1. An explicit path (the `--config` flag)
//! 2. The `MDWEAVE_CONFIG` environment variable
//! 3. `mdweave.toml` in the working directory
//! 4. `mdweave/config.toml` in the user's configuration directory
//!    (`~/.config` on Linux)
//! 5. Built-in defaults
//!
//! `MDWEAVE_WORKERS` and `MDWEAVE_REMOTE_TTL` are applied last and win over
//! the file.

use crate::constants::{
    CONFIG_FILE_NAME, DEFAULT_FETCH_TIMEOUT, DEFAULT_REMOTE_TTL, DEFAULT_RENDER_TIMEOUT,
    DEFAULT_STORE_PATH, DEFAULT_WATCH_DEBOUNCE, DEFAULT_WATCH_INTERVAL, PENDING_STATE_TIMEOUT,
    default_worker_count,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable naming a configuration file.
pub const CONFIG_ENV: &str = "MDWEAVE_CONFIG";
/// Environment override for [`EngineConfig::workers`].
pub const WORKERS_ENV: &str = "MDWEAVE_WORKERS";
/// Environment override for [`EngineConfig::remote_ttl_secs`].
pub const REMOTE_TTL_ENV: &str = "MDWEAVE_REMOTE_TTL";

/// Settings for an [`Engine`](crate::engine::Engine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Concurrent render tasks. Defaults to twice the core count.
    pub workers: Option<usize>,
    /// Freshness window for remote resources.
    pub remote_ttl_secs: u64,
    /// Upper bound for a single renderer call.
    pub render_timeout_secs: u64,
    /// Upper bound for a single file read or HTTP request.
    pub fetch_timeout_secs: u64,
    /// How long to wait on another invocation's render of the same resource.
    pub pending_timeout_secs: u64,
    /// Location of the persistent graph store, relative to the working
    /// directory unless absolute.
    pub store_path: PathBuf,
    pub user_agent: String,
    pub watch_interval_ms: u64,
    pub watch_debounce_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: None,
            remote_ttl_secs: DEFAULT_REMOTE_TTL.as_secs(),
            render_timeout_secs: DEFAULT_RENDER_TIMEOUT.as_secs(),
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT.as_secs(),
            pending_timeout_secs: PENDING_STATE_TIMEOUT.as_secs(),
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            user_agent: format!("mdweave/{}", env!("CARGO_PKG_VERSION")),
            watch_interval_ms: duration_ms(DEFAULT_WATCH_INTERVAL),
            watch_debounce_ms: duration_ms(DEFAULT_WATCH_DEBOUNCE),
        }
    }
}

/// `<config dir>/mdweave/config.toml`, when the platform has a config dir.
#[must_use]
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("mdweave").join("config.toml"))
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl EngineConfig {
    /// Loads configuration following the lookup order, then applies the
    /// environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match Self::locate(explicit, |key| std::env::var(key).ok()) {
            Some(path) => Self::load_from(&path)?,
            None => {
                debug!("no configuration file found, using defaults");
                Self::default()
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Reads and parses a TOML configuration file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        debug!("loaded configuration from {}", path.display());
        Ok(config)
    }

    /// The file to load, if any. An explicit path or `MDWEAVE_CONFIG` is
    /// returned even when the file does not exist, so a typo is reported
    /// instead of silently falling back to defaults.
    fn locate(explicit: Option<&Path>, env: impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        if let Some(path) = env(CONFIG_ENV).filter(|p| !p.is_empty()) {
            return Some(PathBuf::from(path));
        }
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.is_file() {
            return Some(local);
        }
        user_config_path().filter(|path| path.is_file())
    }

    /// Applies environment overrides read through `env`.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(workers) = env(WORKERS_ENV) {
            let workers: usize = workers.trim().parse().with_context(|| {
                format!("{WORKERS_ENV} must be a positive integer, got '{workers}'")
            })?;
            self.workers = Some(workers);
        }
        if let Some(ttl) = env(REMOTE_TTL_ENV) {
            self.remote_ttl_secs = ttl.trim().parse().with_context(|| {
                format!("{REMOTE_TTL_ENV} must be a number of seconds, got '{ttl}'")
            })?;
        }
        self.validate()
    }

    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.workers == Some(0) {
            anyhow::bail!("workers must be at least 1");
        }
        if self.render_timeout_secs == 0 || self.fetch_timeout_secs == 0 {
            anyhow::bail!("timeouts must be at least one second");
        }
        Ok(())
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(default_worker_count)
    }

    #[must_use]
    pub const fn remote_ttl(&self) -> Duration {
        Duration::from_secs(self.remote_ttl_secs)
    }

    #[must_use]
    pub const fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render_timeout_secs)
    }

    #[must_use]
    pub const fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    #[must_use]
    pub const fn pending_timeout(&self) -> Duration {
        Duration::from_secs(self.pending_timeout_secs)
    }

    #[must_use]
    pub const fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms)
    }

    #[must_use]
    pub const fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env_of(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.remote_ttl(), DEFAULT_REMOTE_TTL);
        assert_eq!(config.store_path, PathBuf::from(DEFAULT_STORE_PATH));
        assert!(config.worker_count() >= crate::constants::MIN_PARALLELISM);
        assert!(config.user_agent.starts_with("mdweave/"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("mdweave.toml");
        std::fs::write(&path, "workers = 3\nremote_ttl_secs = 60\n").unwrap();

        let config = EngineConfig::load_from(&path).unwrap();
        assert_eq!(config.worker_count(), 3);
        assert_eq!(config.remote_ttl_secs, 60);
        assert_eq!(config.render_timeout(), DEFAULT_RENDER_TIMEOUT);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("mdweave.toml");
        std::fs::write(&path, "wrokers = 3\n").unwrap();

        let err = EngineConfig::load_from(&path).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse config file"));
    }

    #[test]
    fn test_locate_prefers_explicit_then_env() {
        let explicit = Path::new("/etc/custom.toml");
        let env = env_of(&[(CONFIG_ENV, "/tmp/from-env.toml")]);
        assert_eq!(EngineConfig::locate(Some(explicit), &env), Some(explicit.to_path_buf()));
        assert_eq!(EngineConfig::locate(None, &env), Some(PathBuf::from("/tmp/from-env.toml")));
    }

    #[test]
    fn test_user_config_path_is_namespaced() {
        if let Some(path) = user_config_path() {
            assert!(path.ends_with("mdweave/config.toml"));
        }
    }

    #[test]
    fn test_env_overrides() {
        let mut config = EngineConfig::default();
        config
            .apply_overrides(env_of(&[(WORKERS_ENV, "2"), (REMOTE_TTL_ENV, " 10 ")]))
            .unwrap();
        assert_eq!(config.workers, Some(2));
        assert_eq!(config.remote_ttl_secs, 10);

        let err = config.apply_overrides(env_of(&[(WORKERS_ENV, "many")])).unwrap_err();
        assert!(err.to_string().contains(WORKERS_ENV));
        assert!(config.apply_overrides(env_of(&[(WORKERS_ENV, "0")])).is_err());
    }
}
