//! The queue file: a JSON array of job records under the XDG state dir.
//!
//! Every save replaces the whole file atomically, so a crash mid-write leaves
//! the previous version intact.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::QueueStore;
use crate::job::JobRecord;
use crate::storage;

/// Location of the durable queue.
#[derive(Debug, Clone)]
pub struct QueueFile {
    path: PathBuf,
}

impl QueueFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.local/state/fetchq/queue.json`.
    pub fn default_path() -> Result<PathBuf> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("fetchq")?;
        Ok(xdg_dirs.get_state_home().join("fetchq").join("queue.json"))
    }

    pub fn at_default_path() -> Result<Self> {
        Ok(Self::new(Self::default_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw records as written. A missing file is an empty queue; an unreadable
    /// or malformed one is an error.
    pub fn load_records(&self) -> Result<Vec<JobRecord>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("read queue: {}", self.path.display()))
            }
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&bytes)
            .with_context(|| format!("parse queue: {}", self.path.display()))
    }

    /// Load and repair: jobs left active by a previous process go back to `Queued`.
    pub fn load(&self) -> Result<QueueStore> {
        let records = self.load_records()?;
        tracing::debug!(jobs = records.len(), path = %self.path.display(), "loaded queue");
        Ok(QueueStore::from_records(records))
    }

    pub fn save(&self, store: &QueueStore) -> Result<()> {
        self.save_records(store.records())
    }

    pub fn save_records(&self, records: &[JobRecord]) -> Result<()> {
        let json = serde_json::to_vec_pretty(records).context("serialize queue")?;
        storage::write_atomic(&self.path, &json)
    }
}
