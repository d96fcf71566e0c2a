//! Command-line interface for mdweave.
//!
//! # Commands
//!
//! - `render` - Compose documents and write the results
//! - `graph` - Show the dependency graph of documents
//! - `plan` - Show what a render would recompute
//! - `watch` - Re-render whenever a local dependency changes
//! - `cache` - Inspect, prune or clear the persistent store
//!
//! # Global options
//!
//! - `-v, --verbose` - Debug logging
//! - `-q, --quiet` - No logging
//! - `-c, --config <PATH>` - Configuration file (see [`crate::config`])
//! - `--no-progress` - Hide progress bars
//!
//! Logging goes to stderr, composed output to stdout or `--out`.

mod cache;
pub mod common;
mod graph;
mod plan;
mod render;
mod watch;

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::store::FileStore;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Runtime configuration derived from the global flags.
///
/// Passed to every command instead of being stored in environment
/// variables, so commands can be driven programmatically.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    /// Log filter; `None` disables logging.
    pub log_level: Option<String>,
    pub no_progress: bool,
    pub config_path: Option<PathBuf>,
}

impl CliConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the engine configuration for this invocation.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        EngineConfig::load(self.config_path.as_deref())
    }

    /// Builds an engine over the persistent store named by `config`.
    pub fn open_engine(&self, config: EngineConfig) -> Result<Engine> {
        let store = FileStore::open(&config.store_path).with_context(|| {
            format!("Failed to open graph store at {}", config.store_path.display())
        })?;
        Engine::builder()
            .with_config(config)
            .with_store(Arc::new(store))
            .build()
            .context("Failed to initialize the engine")
    }
}

/// mdweave - incremental markdown composition.
#[derive(Parser)]
#[command(
    name = "mdweave",
    about = "Compose markdown documents that transclude local and remote resources",
    version,
    long_about = "mdweave resolves the directives of markdown documents, renders only what \
                  changed since the last run and assembles the composed documents."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all logging
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Path to a configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Hide progress bars
    #[arg(long, global = true)]
    no_progress: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compose documents
    Render(render::RenderCommand),

    /// Show the dependency graph of documents
    Graph(graph::GraphCommand),

    /// Show the render plan without rendering
    Plan(plan::PlanCommand),

    /// Re-render documents when their local dependencies change
    Watch(watch::WatchCommand),

    /// Manage the persistent graph store
    Cache(cache::CacheCommand),
}

impl Cli {
    /// Initializes logging and runs the selected command.
    pub async fn execute(self) -> Result<()> {
        let config = self.build_config();
        init_logging(&config);
        self.execute_with_config(config).await
    }

    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        let log_level = if self.verbose {
            Some("debug".to_string())
        } else if self.quiet {
            None
        } else {
            Some("info".to_string())
        };

        CliConfig {
            log_level,
            no_progress: self.no_progress,
            config_path: self.config.clone(),
        }
    }

    pub async fn execute_with_config(self, config: CliConfig) -> Result<()> {
        match self.command {
            Commands::Render(cmd) => cmd.execute(&config).await,
            Commands::Graph(cmd) => cmd.execute(&config).await,
            Commands::Plan(cmd) => cmd.execute(&config).await,
            Commands::Watch(cmd) => cmd.execute(&config).await,
            Commands::Cache(cmd) => cmd.execute(&config).await,
        }
    }
}

/// Sets up the tracing subscriber. `RUST_LOG` wins over the level derived
/// from the flags, except with `--quiet`.
fn init_logging(config: &CliConfig) {
    let Some(level) = &config.log_level else {
        return;
    };
    let filter = if *level != "debug" && std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(format!("mdweave={level}"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .try_init();
}
