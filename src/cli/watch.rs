//! Re-render documents when their local dependencies change.
//!
//! ```bash
//! mdweave watch README.md --out dist/README.md
//! ```
//!
//! Local files reachable from the roots are polled and compared by content
//! hash. After a change, the watcher waits until the files stop changing for
//! the debounce period, then renders again. Only the affected nodes are
//! re-rendered. Remote resources are not watched.
//! Stops on Ctrl-C.

use super::CliConfig;
use super::common::{report_failures, write_outputs};
use super::render::RenderCommand;
use crate::identity::ContentHash;
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Args, Debug, Clone)]
pub struct WatchCommand {
    #[command(flatten)]
    pub render: RenderCommand,

    /// Polling interval in milliseconds
    #[arg(long, value_name = "MS")]
    pub interval_ms: Option<u64>,
}

type Fingerprint = BTreeMap<PathBuf, Option<ContentHash>>;

impl WatchCommand {
    pub async fn execute(self, cli: &CliConfig) -> Result<()> {
        let config = cli.engine_config()?;
        let interval =
            self.interval_ms.map_or_else(|| config.watch_interval(), Duration::from_millis);
        let debounce = config.watch_debounce();

        loop {
            let report = self.render.render_once(cli).await?;
            write_outputs(&report.documents, self.render.out.as_deref())?;
            if let Err(e) = report_failures(&report.documents) {
                warn!("{e}");
            }

            let paths = report.local_dependencies();
            eprintln!("{} watching {} local files", "→".cyan(), paths.len());
            let mut seen = fingerprint(&paths).await;

            // Wait for a change, then for the files to settle.
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("stopping watch");
                        return Ok(());
                    }
                    () = tokio::time::sleep(interval) => {}
                }
                let current = fingerprint(&paths).await;
                if current == seen {
                    continue;
                }
                seen = current;
                loop {
                    tokio::time::sleep(debounce).await;
                    let settled = fingerprint(&paths).await;
                    if settled == seen {
                        break;
                    }
                    seen = settled;
                }
                break;
            }
            info!("change detected, rendering again");
        }
    }
}

/// Content hash of every path; `None` for files that cannot be read.
async fn fingerprint(paths: &[PathBuf]) -> Fingerprint {
    let mut out = Fingerprint::new();
    for path in paths {
        let hash = tokio::fs::read(path).await.ok().map(|bytes| ContentHash::of(&bytes));
        out.insert(path.clone(), hash);
    }
    out
}
