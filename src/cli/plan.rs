//! Show what a render would do.
//!
//! ```bash
//! mdweave plan README.md
//! ```
//!
//! Prints the concurrency layers of the nodes that would be rendered and why
//! each one is dirty. Nothing is rendered, but content is fetched to check
//! freshness.

use super::CliConfig;
use super::common::{parse_state, resolve_roots};
use anyhow::Result;
use clap::Args;
use colored::Colorize;

#[derive(Args, Debug, Clone)]
pub struct PlanCommand {
    /// Root documents
    #[arg(required = true)]
    pub roots: Vec<String>,

    /// Initial state as key=value; may be repeated
    #[arg(short, long = "state", value_name = "KEY=VALUE")]
    pub state: Vec<String>,
}

impl PlanCommand {
    pub async fn execute(self, cli: &CliConfig) -> Result<()> {
        let engine = cli.open_engine(cli.engine_config()?)?;
        let roots = resolve_roots(&self.roots)?;
        let state = parse_state(&self.state)?;
        let report = engine.generate_workplan(&roots, &state).await?;

        for (root, err) in &report.graph.failures {
            eprintln!("{} {}: {err}", "error:".red().bold(), root.short_name());
        }
        if report.plan.is_empty() {
            println!("{}", "Everything is up to date".green());
        } else {
            print!("{}", report.plan);
        }
        Ok(())
    }
}
