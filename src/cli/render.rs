//! Compose documents.
//!
//! ```bash
//! mdweave render README.md                     # composed text to stdout
//! mdweave render guide.md --out dist/guide.md  # to a file
//! mdweave render a.md b.md --out dist/         # one file per root
//! mdweave render page.md --state templating=true --state title="Release notes"
//! ```
//!
//! The exit status is non-zero when any root fails; the others are still
//! written.

use super::CliConfig;
use super::common::{
    parse_state, print_diagnostics, print_summary, report_failures, resolve_roots, write_outputs,
};
use crate::engine::RenderReport;
use crate::render::RenderProgress;
use crate::utils::RenderProgressBar;
use anyhow::Result;
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug, Clone)]
pub struct RenderCommand {
    /// Documents to compose (paths or http(s) URLs)
    #[arg(required = true)]
    pub roots: Vec<String>,

    /// Output file, or directory when several documents are given
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Initial state as key=value; may be repeated
    #[arg(short, long = "state", value_name = "KEY=VALUE")]
    pub state: Vec<String>,

    /// Number of concurrent render tasks
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Timeout for a single renderer call, in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

impl RenderCommand {
    pub async fn execute(self, cli: &CliConfig) -> Result<()> {
        let report = self.render_once(cli).await?;
        write_outputs(&report.documents, self.out.as_deref())?;
        report_failures(&report.documents)
    }

    /// Renders the roots once and prints diagnostics, without writing.
    pub(crate) async fn render_once(&self, cli: &CliConfig) -> Result<RenderReport> {
        let mut config = cli.engine_config()?;
        if let Some(workers) = self.workers {
            config.workers = Some(workers);
        }
        if let Some(timeout) = self.timeout {
            config.render_timeout_secs = timeout;
        }
        config.validate()?;

        let engine = cli.open_engine(config)?;
        let roots = resolve_roots(&self.roots)?;
        let state = parse_state(&self.state)?;

        let progress = Arc::new(RenderProgressBar::new(!cli.no_progress));
        let observer: Arc<dyn RenderProgress> = progress.clone();
        let report = engine.render_with_progress(&roots, &state, Some(observer)).await?;
        progress.finish();

        for document in &report.documents {
            if let Ok(composed) = &document.result {
                print_diagnostics(&composed.root, &composed.diagnostics);
            }
        }
        print_summary(&report);
        Ok(report)
    }
}
