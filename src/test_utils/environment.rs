//! Temporary project layout for integration and library tests.

use crate::identity::{ResourceId, normalize_path};
use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// A temporary directory holding documents and a graph store.
pub struct TestProject {
    pub temp_dir: TempDir,
    pub docs_dir: PathBuf,
    pub store_path: PathBuf,
}

impl TestProject {
    pub fn new() -> Result<Self> {
        super::init_test_logging(None);

        let temp_dir = TempDir::new()?;
        let docs_dir = temp_dir.path().join("docs");
        let store_path = temp_dir.path().join("store").join("graph.json");
        fs::create_dir_all(&docs_dir)?;

        Ok(Self {
            temp_dir,
            docs_dir,
            store_path,
        })
    }

    /// Writes `content` to `relative` under the docs directory, creating
    /// parent directories as needed.
    pub fn write(&self, relative: &str, content: &str) -> Result<PathBuf> {
        let path = self.docs_dir.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    pub fn remove(&self, relative: &str) -> Result<()> {
        fs::remove_file(self.docs_dir.join(relative))
            .with_context(|| format!("Failed to remove {relative}"))
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.docs_dir.join(relative)
    }

    /// Identifier of the document at `relative`.
    pub fn id(&self, relative: &str) -> ResourceId {
        ResourceId::Local(normalize_path(&self.docs_dir.join(relative)))
    }
}
