//! Show the dependency graph of documents.
//!
//! ```bash
//! mdweave graph README.md
//! mdweave graph README.md --format json
//! ```
//!
//! Building the graph also refreshes the stored edges, so a later render
//! does not parse unchanged documents again.

use super::CliConfig;
use super::common::resolve_roots;
use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use colored::Colorize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum GraphFormat {
    /// Indented tree per root
    #[default]
    Tree,
    /// Nodes and edges as JSON
    Json,
}

#[derive(Args, Debug, Clone)]
pub struct GraphCommand {
    /// Root documents
    #[arg(required = true)]
    pub roots: Vec<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = GraphFormat::Tree)]
    pub format: GraphFormat,
}

impl GraphCommand {
    pub async fn execute(self, cli: &CliConfig) -> Result<()> {
        let engine = cli.open_engine(cli.engine_config()?)?;
        let roots = resolve_roots(&self.roots)?;
        let report = engine.build_graph(&roots).await?;

        match self.format {
            GraphFormat::Json => {
                let export = report.graph.export(&report.roots);
                let json = serde_json::to_string_pretty(&export)
                    .context("Failed to serialize the graph")?;
                println!("{json}");
            }
            GraphFormat::Tree => {
                for root in report.composable_roots() {
                    print!("{}", report.graph.to_tree_string(root));
                }
            }
        }

        for (root, err) in &report.failures {
            eprintln!("{} {}: {err}", "error:".red().bold(), root.short_name());
        }
        let stats = report.stats;
        eprintln!(
            "{} parsed, {} reused, {} trusted, {} unavailable",
            stats.parsed, stats.reused, stats.trusted, stats.unavailable
        );
        Ok(())
    }
}
