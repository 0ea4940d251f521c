//! Durable, append-only run event logs.
//!
//! One JSON record per line, keyed by run id, written synchronously with
//! emission. The file is readable independently of the in-memory registry so
//! run history survives a restart.

use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::state::RunEvent;

/// Append-only writer for one run's event log.
pub struct RunLog {
    path: PathBuf,
    file: tokio::fs::File,
}

impl RunLog {
    /// Path a run's log lives at under the given state directory.
    pub fn path_for(state_dir: &Path, run_id: Uuid) -> PathBuf {
        state_dir.join("runs").join(format!("{}.jsonl", run_id))
    }

    /// Create (or truncate) the log file for a run.
    pub async fn create(state_dir: &Path, run_id: Uuid) -> std::io::Result<Self> {
        let path = Self::path_for(state_dir, run_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&path)
            .await?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event and flush it to disk.
    pub async fn append(&mut self, event: &RunEvent) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(event)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        line.push(b'\n');
        self.file.write_all(&line).await?;
        self.file.flush().await
    }
}

/// Reload the ordered event sequence from a log file.
///
/// Stops at the first malformed line (a torn write from a crash) and returns
/// what was durably recorded before it.
pub fn replay(path: &Path) -> std::io::Result<Vec<RunEvent>> {
    let contents = std::fs::read_to_string(path)?;
    let mut events = Vec::new();
    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RunEvent>(line) {
            Ok(event) => events.push(event),
            Err(e) => {
                tracing::warn!(path = %path.display(), "Truncating replay at malformed line: {}", e);
                break;
            }
        }
    }
    Ok(events)
}
