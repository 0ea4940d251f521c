//! Configuration management for autopilot.sh.
//!
//! Configuration is read from environment variables:
//! - `AUTOPILOT_WORKSPACE` - Optional. Working tree that runs may edit. Defaults to current directory.
//! - `AUTOPILOT_STATE_DIR` - Optional. Directory for run event logs. Defaults to `<workspace>/.autopilot`.
//! - `AUTOPILOT_POLICY_FILE` - Optional. Path to the policy document. Defaults to `<state_dir>/policy.json`.
//! - `AUTOPILOT_PROVIDERS_FILE` - Optional. Path to the provider descriptor list. Defaults to `<state_dir>/providers.json`.
//! - `AUTOPILOT_HEALTH_URL` - Optional. Health endpoint probed after each applied changeset.
//! - `AUTOPILOT_MAX_ITERATIONS` - Optional. Default iteration bound per run. Defaults to `5`.
//! - `AUTOPILOT_WAIT_S` - Optional. Default wait between iterations, in seconds. Defaults to `5`.
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `3000`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Working tree that runs are allowed to modify (subject to policy)
    pub workspace_path: PathBuf,

    /// Directory holding run event logs and patch backups
    pub state_dir: PathBuf,

    /// Policy document location, loaded once per run
    pub policy_path: PathBuf,

    /// Provider descriptor list location
    pub providers_path: PathBuf,

    /// Health endpoint the verifier probes after applying a changeset
    pub health_url: Option<String>,

    /// Default iteration bound when the caller does not supply one
    pub default_iterations: u32,

    /// Default wait between iterations, in seconds
    pub default_wait_s: u64,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let workspace_path = std::env::var("AUTOPILOT_WORKSPACE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        let state_dir = std::env::var("AUTOPILOT_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| workspace_path.join(".autopilot"));

        let policy_path = std::env::var("AUTOPILOT_POLICY_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| state_dir.join("policy.json"));

        let providers_path = std::env::var("AUTOPILOT_PROVIDERS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| state_dir.join("providers.json"));

        let health_url = std::env::var("AUTOPILOT_HEALTH_URL").ok();

        let default_iterations = std::env::var("AUTOPILOT_MAX_ITERATIONS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .map_err(|e| {
                ConfigError::InvalidValue("AUTOPILOT_MAX_ITERATIONS".to_string(), format!("{}", e))
            })?;

        let default_wait_s = std::env::var("AUTOPILOT_WAIT_S")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .map_err(|e| {
                ConfigError::InvalidValue("AUTOPILOT_WAIT_S".to_string(), format!("{}", e))
            })?;

        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|e| ConfigError::InvalidValue("PORT".to_string(), format!("{}", e)))?;

        Ok(Self {
            workspace_path,
            state_dir,
            policy_path,
            providers_path,
            health_url,
            default_iterations,
            default_wait_s,
            host,
            port,
        })
    }

    /// Create a config rooted at a workspace with defaults elsewhere (useful for testing).
    pub fn new(workspace_path: PathBuf) -> Self {
        let state_dir = workspace_path.join(".autopilot");
        Self {
            policy_path: state_dir.join("policy.json"),
            providers_path: state_dir.join("providers.json"),
            state_dir,
            workspace_path,
            health_url: None,
            default_iterations: 5,
            default_wait_s: 5,
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}
