//! All-or-nothing application of change-sets to the working tree.
//!
//! Staging consults the policy gate for every edit before anything is
//! written; a single denial rejects the whole set. Writes are serialized by a
//! tree-wide mutex so concurrent runs never interleave partial writes, and an
//! undo record (prior content or "absent") is captured before each write so a
//! failed apply rolls the tree back byte-for-byte.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::changeset::ChangeSet;
use crate::policy::PolicyDocument;

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("policy denies edit to '{path}'")]
    PolicyViolation { path: String },

    #[error("failed to write '{path}': {source}")]
    WriteFailed {
        path: String,
        source: std::io::Error,
    },
}

/// Prior state of one edited path.
#[derive(Debug, Clone)]
pub struct UndoEntry {
    pub path: String,
    /// Content before the edit; `None` when the file did not exist.
    pub prior: Option<String>,
}

/// Rollback information for one applied change-set.
#[derive(Debug, Clone, Default)]
pub struct UndoRecord {
    pub entries: Vec<UndoEntry>,
}

impl UndoRecord {
    /// Count of files created (vs. overwritten) by the apply.
    pub fn created(&self) -> usize {
        self.entries.iter().filter(|e| e.prior.is_none()).count()
    }

    /// Count of files overwritten by the apply.
    pub fn modified(&self) -> usize {
        self.entries.iter().filter(|e| e.prior.is_some()).count()
    }

    /// Human-readable apply summary for event detail text.
    pub fn summary(&self) -> String {
        format!("{} created, {} modified", self.created(), self.modified())
    }
}

/// Applies change-sets to one working tree.
#[derive(Clone)]
pub struct PatchApplier {
    root: PathBuf,
    backup_dir: PathBuf,
    /// Serializes the write phase across all runs sharing this tree.
    write_lock: Arc<Mutex<()>>,
}

impl PatchApplier {
    pub fn new(root: PathBuf, backup_dir: PathBuf) -> Self {
        Self {
            root,
            backup_dir,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// The working tree root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Apply a change-set under the policy gate.
    ///
    /// Every edit is authorized before any write happens. On a write failure
    /// mid-set, previously written edits are rolled back from the undo record
    /// before the error is returned.
    pub async fn apply(
        &self,
        changeset: &ChangeSet,
        policy: &PolicyDocument,
    ) -> Result<UndoRecord, ApplyError> {
        // Stage: the gate sees every path before the tree is touched.
        for edit in &changeset.edits {
            if !policy.authorize(&edit.path) {
                return Err(ApplyError::PolicyViolation {
                    path: edit.path.clone(),
                });
            }
        }

        let _guard = self.write_lock.lock().await;

        let mut undo = UndoRecord::default();
        for edit in &changeset.edits {
            let target = self.root.join(&edit.path);

            let prior = match tokio::fs::read_to_string(&target).await {
                Ok(contents) => Some(contents),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => {
                    self.rollback(&undo).await;
                    return Err(ApplyError::WriteFailed {
                        path: edit.path.clone(),
                        source: e,
                    });
                }
            };

            if let Some(contents) = &prior {
                if let Err(e) = self.backup(&edit.path, contents).await {
                    tracing::warn!(path = %edit.path, "Backup failed, continuing: {}", e);
                }
            }

            if let Err(e) = write_atomic(&target, &edit.content).await {
                self.rollback(&undo).await;
                return Err(ApplyError::WriteFailed {
                    path: edit.path.clone(),
                    source: e,
                });
            }

            undo.entries.push(UndoEntry {
                path: edit.path.clone(),
                prior,
            });
        }

        Ok(undo)
    }

    /// Restore the tree to the state captured in an undo record.
    async fn rollback(&self, undo: &UndoRecord) {
        for entry in undo.entries.iter().rev() {
            let target = self.root.join(&entry.path);
            let result = match &entry.prior {
                Some(contents) => write_atomic(&target, contents).await,
                None => match tokio::fs::remove_file(&target).await {
                    Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
                    _ => Ok(()),
                },
            };
            if let Err(e) = result {
                tracing::error!(path = %entry.path, "Rollback failed: {}", e);
            }
        }
    }

    /// Keep a timestamped copy of a file about to be overwritten.
    async fn backup(&self, rel_path: &str, contents: &str) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.backup_dir).await?;
        let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S%.3f");
        let name = rel_path.replace(['/', '\\'], "_");
        let backup_path = self.backup_dir.join(format!("{}.backup_{}", name, stamp));
        tokio::fs::write(backup_path, contents).await
    }
}

/// Write via a temp file and rename, creating parent directories as needed.
async fn write_atomic(target: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = target.with_extension("autopilot.tmp");
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, target).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::FileEdit;

    fn changeset(edits: Vec<(&str, &str)>) -> ChangeSet {
        ChangeSet {
            explanation: "test".to_string(),
            commit_message: "test".to_string(),
            edits: edits
                .into_iter()
                .map(|(path, content)| FileEdit {
                    path: path.to_string(),
                    content: content.to_string(),
                })
                .collect(),
        }
    }

    fn applier(dir: &Path) -> PatchApplier {
        PatchApplier::new(dir.to_path_buf(), dir.join(".autopilot/backups"))
    }

    fn restricted(prefix: &str) -> PolicyDocument {
        PolicyDocument {
            unrestricted: false,
            allowed_path_prefixes: vec![prefix.to_string()],
            allowed_hosts: vec![],
        }
    }

    #[tokio::test]
    async fn applies_allowed_edits() {
        let dir = tempfile::tempdir().unwrap();
        let applier = applier(dir.path());
        let cs = changeset(vec![("app/a.txt", "one"), ("app/sub/b.txt", "two")]);

        let undo = applier.apply(&cs, &restricted("app/")).await.unwrap();
        assert_eq!(undo.created(), 2);
        assert_eq!(undo.modified(), 0);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("app/a.txt")).unwrap(),
            "one"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("app/sub/b.txt")).unwrap(),
            "two"
        );
    }

    #[tokio::test]
    async fn one_denied_path_rejects_the_whole_set() {
        let dir = tempfile::tempdir().unwrap();
        let applier = applier(dir.path());
        let cs = changeset(vec![("app/ok.txt", "fine"), ("/etc/passwd", "nope")]);

        let err = applier.apply(&cs, &restricted("app/")).await.unwrap_err();
        match err {
            ApplyError::PolicyViolation { path } => assert_eq!(path, "/etc/passwd"),
            other => panic!("unexpected error: {:?}", other),
        }
        // All-or-nothing: the allowed file must not have been written either.
        assert!(!dir.path().join("app/ok.txt").exists());
    }

    #[tokio::test]
    async fn overwrite_records_prior_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("app")).unwrap();
        std::fs::write(dir.path().join("app/a.txt"), "before").unwrap();
        let applier = applier(dir.path());

        let undo = applier
            .apply(&changeset(vec![("app/a.txt", "after")]), &restricted("app/"))
            .await
            .unwrap();
        assert_eq!(undo.modified(), 1);
        assert_eq!(undo.entries[0].prior.as_deref(), Some("before"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("app/a.txt")).unwrap(),
            "after"
        );
    }

    #[tokio::test]
    async fn backup_is_kept_for_overwritten_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("app")).unwrap();
        std::fs::write(dir.path().join("app/a.txt"), "before").unwrap();
        let applier = applier(dir.path());

        applier
            .apply(&changeset(vec![("app/a.txt", "after")]), &restricted("app/"))
            .await
            .unwrap();

        let backups: Vec<_> = std::fs::read_dir(dir.path().join(".autopilot/backups"))
            .unwrap()
            .collect();
        assert_eq!(backups.len(), 1);
    }

    #[tokio::test]
    async fn unrestricted_policy_allows_any_relative_path() {
        let dir = tempfile::tempdir().unwrap();
        let applier = applier(dir.path());
        let undo = applier
            .apply(
                &changeset(vec![("anywhere/file.txt", "x")]),
                &PolicyDocument::unrestricted(),
            )
            .await
            .unwrap();
        assert_eq!(undo.created(), 1);
    }
}
