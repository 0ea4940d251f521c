//! Policy gate: which paths a run may edit and which hosts it may contact.
//!
//! The document is loaded once at run start and treated as an immutable
//! snapshot for the run's whole lifetime, so authorization semantics stay
//! deterministic even if the file on disk changes mid-run.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("failed to read policy document {path}: {source}")]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse policy document {path}: {source}")]
    Invalid {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Declarative mutation/egress policy for runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDocument {
    /// When true, every path and host is authorized.
    #[serde(default)]
    pub unrestricted: bool,

    /// Path prefixes (relative to the working tree) a run may write under.
    #[serde(default)]
    pub allowed_path_prefixes: Vec<String>,

    /// Hosts the pipeline may contact on behalf of a run.
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
}

impl PolicyDocument {
    /// An unrestricted policy (used by operator tooling and tests).
    pub fn unrestricted() -> Self {
        Self {
            unrestricted: true,
            allowed_path_prefixes: Vec::new(),
            allowed_hosts: Vec::new(),
        }
    }

    /// Load the document from a JSON file.
    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        let contents = std::fs::read_to_string(path).map_err(|source| PolicyError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| PolicyError::Invalid {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Whether a run may write the given path.
    ///
    /// Restricted policies only authorize normalized relative paths: absolute
    /// paths and any `..` traversal are denied regardless of prefix match.
    pub fn authorize(&self, path: &str) -> bool {
        if self.unrestricted {
            return true;
        }

        let candidate = Path::new(path);
        if candidate.is_absolute() {
            return false;
        }
        if candidate
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return false;
        }

        self.allowed_path_prefixes
            .iter()
            .any(|prefix| candidate.starts_with(Path::new(prefix.trim_end_matches('/'))))
    }

    /// Whether the pipeline may contact the given host for this run.
    pub fn authorize_host(&self, host: &str) -> bool {
        if self.unrestricted {
            return true;
        }
        self.allowed_hosts.iter().any(|h| h == host)
    }
}
