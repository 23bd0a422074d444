//! On-disk snapshot history
//!
//! Each cycle writes `health_report_<timestamp>.json`. Names sort
//! chronologically, so pruning keeps the lexically greatest `retain` files.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::Result;
use crate::health::HealthSnapshot;

const PREFIX: &str = "health_report_";
const SUFFIX: &str = ".json";

/// Bounded directory of JSON snapshots
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
    retain: usize,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>, retain: usize) -> Self {
        Self {
            dir: dir.into(),
            retain: retain.max(1),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a snapshot and prune the oldest beyond the retention bound
    pub fn save(&self, snapshot: &HealthSnapshot) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;

        let stamp = snapshot.timestamp.format("%Y%m%d_%H%M%S_%6f").to_string();
        let mut path = self.dir.join(format!("{}{}{}", PREFIX, stamp, SUFFIX));
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("{}{}_{}{}", PREFIX, stamp, n, SUFFIX));
            n += 1;
        }

        let json = serde_json::to_string_pretty(snapshot)?;
        std::fs::write(&path, json)?;
        debug!("Wrote snapshot {}", path.display());

        self.prune()?;
        Ok(path)
    }

    /// Snapshot files currently on disk, oldest first
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(PREFIX) && n.ends_with(SUFFIX))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        Ok(files)
    }

    /// Read back the most recent snapshot
    pub fn latest(&self) -> Result<Option<HealthSnapshot>> {
        match self.list()?.last() {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                Ok(Some(serde_json::from_str(&content)?))
            }
            None => Ok(None),
        }
    }

    fn prune(&self) -> Result<()> {
        let files = self.list()?;
        if files.len() <= self.retain {
            return Ok(());
        }

        let excess = files.len() - self.retain;
        for old in &files[..excess] {
            if let Err(e) = std::fs::remove_file(old) {
                warn!("Failed to remove old report {}: {}", old.display(), e);
            }
        }
        Ok(())
    }
}
