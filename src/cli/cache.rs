//! Manage the persistent graph store.
//!
//! ```bash
//! mdweave cache info              # counts of stored resources
//! mdweave cache prune README.md   # drop what README.md no longer reaches
//! mdweave cache clean             # drop everything
//! ```

use super::CliConfig;
use super::common::resolve_roots;
use anyhow::Result;
use clap::{Args, Subcommand};
use colored::Colorize;

#[derive(Args, Debug, Clone)]
pub struct CacheCommand {
    #[command(subcommand)]
    pub action: CacheAction,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CacheAction {
    /// Show what the store holds
    Info,
    /// Remove every stored node, edge and artifact
    Clean,
    /// Remove resources not reachable from the given documents
    Prune {
        /// Documents whose dependencies are kept
        #[arg(required = true)]
        roots: Vec<String>,
    },
}

impl CacheCommand {
    pub async fn execute(self, cli: &CliConfig) -> Result<()> {
        let config = cli.engine_config()?;
        let store_path = config.store_path.clone();
        let engine = cli.open_engine(config)?;

        match self.action {
            CacheAction::Info => {
                let summary = engine.summary()?;
                println!("{} {}", "Store:".bold(), store_path.display());
                println!("  resources:     {}", summary.resources);
                println!("  cache entries: {}", summary.cache_entries);
                println!("  stale:         {}", summary.stale);
                println!("  gone:          {}", summary.gone);
            }
            CacheAction::Clean => {
                let removed = engine.clear()?;
                println!("{} removed {removed} resources", "✓".green());
            }
            CacheAction::Prune { roots } => {
                let roots = resolve_roots(&roots)?;
                let removed = engine.prune(&roots).await?;
                println!("{} pruned {removed} unreachable resources", "✓".green());
            }
        }
        Ok(())
    }
}
