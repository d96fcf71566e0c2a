//! Utility functions shared by the store and the CLI.
//!
//! - [`fs`] writes files atomically
//! - [`progress`] wraps `indicatif` progress bars

pub mod fs;
pub mod progress;

pub use fs::{atomic_write, ensure_dir};
pub use progress::{ProgressBar, RenderProgressBar};
