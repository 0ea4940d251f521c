//! Provider abstraction for remote text-generation back-ends.
//!
//! A [`ProviderClient`] wraps one back-end with a uniform request/response
//! contract and error classification; the [`pool::ProviderPool`] layers
//! ordered failover, per-provider retry, and health accounting on top.
//! Clients never retry on their own - retry policy belongs to the pool.

mod error;
pub mod health;
mod http;
pub mod pool;

pub use error::{classify_http_status, PoolError, ProviderError, ProviderErrorKind, ProviderFailure};
pub use health::{ProviderHealthSnapshot, ProviderHealthTracker};
pub use http::HttpProviderClient;
pub use pool::ProviderPool;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Role in a chat conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A role-tagged message sent to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

/// Static description of one provider back-end.
///
/// An ordered list of descriptors per capability tag encodes failover
/// preference: earlier entries are tried first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    /// Stable identifier (e.g. "ollama-local", "openrouter").
    pub id: String,
    /// Capability tags this back-end can serve (e.g. "code", "general").
    pub capabilities: Vec<String>,
    /// Chat-completions endpoint URL.
    pub endpoint: String,
    /// Model identifier sent with each request.
    pub model: String,
    /// Environment variable holding the API key, if the back-end needs one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_env: Option<String>,
    /// Per-call timeout in seconds.
    #[serde(default = "default_timeout_s")]
    pub timeout_s: u64,
    /// Attempts per call before failing over to the next provider.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_timeout_s() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    2
}

impl ProviderDescriptor {
    /// Whether this descriptor serves the given capability tag.
    pub fn serves(&self, tag: &str) -> bool {
        self.capabilities.iter().any(|c| c == tag)
    }

    /// Per-call timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_s)
    }
}

/// Trait for provider clients.
///
/// A single call: no internal retry, no local state mutation beyond the
/// outbound request. Failures are classified so the pool can decide whether
/// retry or failover is appropriate.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Send messages to the back-end and return the raw model text.
    async fn generate(
        &self,
        messages: &[ChatMessage],
        domain_hint: Option<&str>,
        timeout: Duration,
    ) -> Result<String, ProviderError>;
}
