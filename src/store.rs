// src/store.rs - Best-effort graph snapshots on disk
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::graph::GraphSnapshot;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to replace snapshot: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// One JSON document per session, rewritten atomically on every change.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

fn file_stem(session_id: &str) -> String {
    let stem: String = session_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(64)
        .collect();
    if stem.is_empty() { "default".to_string() } else { stem }
}

impl SnapshotStore {
    pub fn for_session(dir: impl AsRef<Path>, session_id: &str) -> Self {
        Self {
            path: dir.as_ref().join(format!("{}.json", file_stem(session_id))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or unreadable snapshots mean an empty graph.
    pub fn load(&self) -> Option<GraphSnapshot> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("Cannot read snapshot {}: {}", self.path.display(), e);
                return None;
            }
        };
        match serde_json::from_str(&contents) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!("Ignoring corrupt snapshot {}: {}", self.path.display(), e);
                None
            }
        }
    }

    pub fn save(&self, snapshot: &GraphSnapshot) -> Result<(), SnapshotError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut file = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut file, snapshot)?;
        file.flush()?;
        file.persist(&self.path)?;
        Ok(())
    }
}
