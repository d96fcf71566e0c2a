//! Progress indicators for the CLI.
//!
//! Bars are hidden when progress is disabled (`--no-progress`) or when
//! stderr is not a terminal, so piped output stays clean.
//!
//! ```rust,no_run
//! use mdweave::utils::progress::ProgressBar;
//!
//! let progress = ProgressBar::new(10, true);
//! progress.set_message("Rendering");
//! progress.inc(1);
//! progress.finish_and_clear();
//! ```

use crate::identity::ResourceId;
use crate::render::{NodeState, RenderProgress};
use indicatif::{ProgressBar as IndicatifBar, ProgressStyle as IndicatifStyle};
use std::io::IsTerminal;
use std::time::Duration;

/// A progress bar with consistent styling.
#[derive(Clone)]
pub struct ProgressBar {
    inner: IndicatifBar,
}

impl ProgressBar {
    /// Creates a bar over `len` units. A disabled bar silently ignores
    /// every update.
    pub fn new(len: u64, enabled: bool) -> Self {
        let bar = if enabled && std::io::stderr().is_terminal() {
            let bar = IndicatifBar::new(len);
            bar.set_style(default_style());
            bar
        } else {
            IndicatifBar::hidden()
        };
        Self { inner: bar }
    }

    /// Creates a spinner for work of unknown size.
    pub fn new_spinner(enabled: bool) -> Self {
        let bar = if enabled && std::io::stderr().is_terminal() {
            let bar = IndicatifBar::new_spinner();
            bar.set_style(spinner_style());
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        } else {
            IndicatifBar::hidden()
        };
        Self { inner: bar }
    }

    pub fn set_length(&self, len: u64) {
        self.inner.set_length(len);
    }

    pub fn set_message(&self, msg: impl Into<String>) {
        self.inner.set_message(msg.into());
    }

    pub fn inc(&self, delta: u64) {
        self.inner.inc(delta);
    }

    pub fn finish_with_message(&self, msg: impl Into<String>) {
        self.inner.finish_with_message(msg.into());
    }

    pub fn finish_and_clear(&self) {
        self.inner.finish_and_clear();
    }

    /// Prints a line above the bar without garbling it.
    pub fn println(&self, msg: impl AsRef<str>) {
        self.inner.println(msg);
    }
}

fn default_style() -> IndicatifStyle {
    IndicatifStyle::default_bar()
        .template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .map_or_else(|_| IndicatifStyle::default_bar(), |s| s.progress_chars("━╸━"))
}

fn spinner_style() -> IndicatifStyle {
    IndicatifStyle::default_spinner()
        .template("{prefix:.bold} {spinner:.cyan} {msg}")
        .map_or_else(
            |_| IndicatifStyle::default_spinner(),
            |s| s.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        )
}

/// Shows render progress: one tick per node that reaches a terminal state.
pub struct RenderProgressBar {
    bar: ProgressBar,
}

impl RenderProgressBar {
    pub fn new(enabled: bool) -> Self {
        Self {
            bar: ProgressBar::new(0, enabled),
        }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl RenderProgress for RenderProgressBar {
    fn planned(&self, to_render: usize) {
        self.bar.set_length(to_render as u64);
        self.bar.set_message("rendering");
    }

    fn finished(&self, id: &ResourceId, state: NodeState) {
        self.bar.inc(1);
        match state {
            NodeState::Failed => self.bar.set_message(format!("failed {}", id.short_name())),
            _ => self.bar.set_message(id.short_name()),
        }
    }
}
