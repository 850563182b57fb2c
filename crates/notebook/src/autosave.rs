//! Periodic autosave snapshots.
//!
//! The exported document is written to a single snapshot file on a fixed
//! interval. A snapshot survives until a real notebook is loaded or saved,
//! and is offered for restoration when a session starts without one.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::format::SerializedDocument;

pub const DEFAULT_AUTOSAVE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// What is written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutosaveSnapshot {
    /// Schema version for forward compatibility
    pub schema_version: u32,
    /// RFC 3339 timestamp of the write
    pub saved_at: String,
    pub document: SerializedDocument,
}

impl AutosaveSnapshot {
    pub const CURRENT_SCHEMA_VERSION: u32 = 1;
}

/// Location of the autosave file.
#[derive(Debug, Clone)]
pub struct AutosaveStore {
    path: PathBuf,
}

/// `<data dir>/jupyter-web/autosave.json`
pub fn default_autosave_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("jupyter-web")
        .join("autosave.json")
}

impl Default for AutosaveStore {
    fn default() -> Self {
        Self::new(default_autosave_path())
    }
}

impl AutosaveStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, document: &SerializedDocument) -> Result<()> {
        let snapshot = AutosaveSnapshot {
            schema_version: AutosaveSnapshot::CURRENT_SCHEMA_VERSION,
            saved_at: chrono::Utc::now().to_rfc3339(),
            document: document.clone(),
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(&self.path, format!("{json}\n"))
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        info!(
            "[autosave] Saved {} cells to {}",
            snapshot.document.cells.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Returns None if the snapshot is missing or unreadable.
    pub fn load(&self) -> Option<AutosaveSnapshot> {
        if !self.path.exists() {
            return None;
        }
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                warn!("[autosave] Failed to read snapshot: {}", e);
                return None;
            }
        };
        match serde_json::from_str::<AutosaveSnapshot>(&contents) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("[autosave] Failed to parse snapshot: {}", e);
                None
            }
        }
    }

    pub fn clear(&self) {
        if self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!("[autosave] Failed to clear snapshot: {}", e);
            } else {
                info!("[autosave] Cleared snapshot");
            }
        }
    }
}

/// Interval timer around an [`AutosaveStore`].
#[derive(Debug)]
pub struct Autosaver {
    store: AutosaveStore,
    interval: Duration,
    next_due: Instant,
}

impl Autosaver {
    pub fn new(store: AutosaveStore, interval: Duration) -> Self {
        Self {
            store,
            interval,
            next_due: Instant::now() + interval,
        }
    }

    pub fn store(&self) -> &AutosaveStore {
        &self.store
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn next_due(&self) -> Instant {
        self.next_due
    }

    pub fn is_due(&self) -> bool {
        Instant::now() >= self.next_due
    }

    pub fn reschedule(&mut self) {
        self.next_due = Instant::now() + self.interval;
    }

    /// Write the snapshot and schedule the next one.
    pub fn save(&mut self, document: &SerializedDocument) -> Result<()> {
        self.reschedule();
        self.store.save(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellKind;
    use crate::format::{source_to_lines, SerializedCell};

    fn sample() -> SerializedDocument {
        SerializedDocument::new(vec![SerializedCell {
            cell_type: CellKind::Code,
            source: source_to_lines("x = 1\n"),
            outputs: vec![],
        }])
    }

    #[test]
    fn test_save_load_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = AutosaveStore::new(dir.path().join("nested").join("autosave.json"));
        assert!(store.load().is_none());

        store.save(&sample()).unwrap();
        let snapshot = store.load().unwrap();
        assert_eq!(snapshot.schema_version, AutosaveSnapshot::CURRENT_SCHEMA_VERSION);
        assert!(chrono::DateTime::parse_from_rfc3339(&snapshot.saved_at).is_ok());
        assert_eq!(snapshot.document, sample());

        store.clear();
        assert!(store.load().is_none());
        // Clearing twice is fine.
        store.clear();
    }

    #[test]
    fn test_corrupt_snapshot_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("autosave.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(AutosaveStore::new(&path).load().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_autosaver_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let mut saver = Autosaver::new(
            AutosaveStore::new(dir.path().join("autosave.json")),
            Duration::from_secs(300),
        );
        assert!(!saver.is_due());

        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(saver.is_due());

        saver.save(&sample()).unwrap();
        assert!(!saver.is_due());
        assert!(saver.store().load().is_some());
    }
}
