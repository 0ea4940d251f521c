//! Provider pool with ordered failover and per-provider retry.
//!
//! The pool walks the configured provider list for a capability tag in order.
//! Each provider gets up to its configured retry count with exponential
//! backoff for transient errors; a non-retryable error, or retry exhaustion,
//! advances to the next provider. Providers in cooldown are deferred to a
//! second pass rather than skipped outright, so a tag whose every back-end is
//! struggling still gets a best-effort attempt.

use std::sync::Arc;
use std::time::Duration;

use super::error::{PoolError, ProviderError, ProviderFailure};
use super::health::ProviderHealthTracker;
use super::{ChatMessage, HttpProviderClient, ProviderClient, ProviderDescriptor};

/// One configured provider: its descriptor plus a live client.
struct PoolEntry {
    descriptor: ProviderDescriptor,
    client: Arc<dyn ProviderClient>,
}

/// Ordered pool of providers, grouped by capability tag at call time.
pub struct ProviderPool {
    entries: Vec<PoolEntry>,
    health: ProviderHealthTracker,
}

impl ProviderPool {
    /// Build a pool from descriptors, constructing an HTTP client per entry.
    ///
    /// Descriptors whose credentials cannot be resolved are skipped with a
    /// warning rather than failing the whole pool.
    pub fn from_descriptors(descriptors: Vec<ProviderDescriptor>) -> Self {
        let mut entries = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            match HttpProviderClient::from_descriptor(&descriptor) {
                Ok(client) => entries.push(PoolEntry {
                    descriptor,
                    client: Arc::new(client),
                }),
                Err(e) => {
                    tracing::warn!(provider_id = %descriptor.id, "Skipping provider: {}", e);
                }
            }
        }
        Self {
            entries,
            health: ProviderHealthTracker::new(),
        }
    }

    /// Build a pool from pre-constructed clients (used by tests and callers
    /// that want non-HTTP back-ends).
    pub fn with_clients(clients: Vec<(ProviderDescriptor, Arc<dyn ProviderClient>)>) -> Self {
        Self {
            entries: clients
                .into_iter()
                .map(|(descriptor, client)| PoolEntry { descriptor, client })
                .collect(),
            health: ProviderHealthTracker::new(),
        }
    }

    /// Load descriptors from a JSON file.
    pub fn load_descriptors(path: &std::path::Path) -> std::io::Result<Vec<ProviderDescriptor>> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// The health tracker's diagnostic view.
    pub fn health(&self) -> &ProviderHealthTracker {
        &self.health
    }

    /// Whether any provider serves the given tag.
    pub fn serves(&self, tag: &str) -> bool {
        self.entries.iter().any(|e| e.descriptor.serves(tag))
    }

    /// Execute a generation request against the first provider for `tag` that
    /// answers, in configured order with failover.
    pub async fn execute(
        &self,
        tag: &str,
        messages: &[ChatMessage],
    ) -> Result<String, PoolError> {
        let candidates: Vec<&PoolEntry> = self
            .entries
            .iter()
            .filter(|e| e.descriptor.serves(tag))
            .collect();

        if candidates.is_empty() {
            return Err(PoolError::NoProvidersForTag(tag.to_string()));
        }

        // Healthy providers first (configured order preserved within each
        // class), then a second chance for those in cooldown.
        let mut ordered: Vec<&PoolEntry> = Vec::with_capacity(candidates.len());
        let mut deferred: Vec<&PoolEntry> = Vec::new();
        for entry in candidates {
            if self.health.is_healthy(&entry.descriptor.id).await {
                ordered.push(entry);
            } else {
                deferred.push(entry);
            }
        }
        ordered.extend(deferred);

        let mut failures: Vec<ProviderFailure> = Vec::new();

        for entry in ordered {
            match self.try_provider(entry, tag, messages).await {
                Ok(text) => {
                    self.health.record_success(&entry.descriptor.id).await;
                    return Ok(text);
                }
                Err(error) => {
                    self.health
                        .record_failure(&entry.descriptor.id, error.kind)
                        .await;
                    tracing::warn!(
                        provider_id = %entry.descriptor.id,
                        tag = %tag,
                        "Provider failed, advancing to next: {}",
                        error
                    );
                    failures.push(ProviderFailure {
                        provider_id: entry.descriptor.id.clone(),
                        error,
                    });
                }
            }
        }

        Err(PoolError::AllProvidersExhausted {
            tag: tag.to_string(),
            failures,
        })
    }

    /// Attempt one provider up to its configured retry count.
    ///
    /// Returns the last error if every attempt fails or the first error is
    /// non-retryable.
    async fn try_provider(
        &self,
        entry: &PoolEntry,
        tag: &str,
        messages: &[ChatMessage],
    ) -> Result<String, ProviderError> {
        let timeout = entry.descriptor.timeout();
        let attempts = entry.descriptor.max_retries.max(1);
        let mut last_error: Option<ProviderError> = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = last_error
                    .as_ref()
                    .map(|e| e.suggested_delay(attempt - 1))
                    .unwrap_or(Duration::from_secs(1));
                tracing::debug!(
                    provider_id = %entry.descriptor.id,
                    attempt,
                    delay_secs = delay.as_secs_f64(),
                    "Retrying provider after backoff"
                );
                tokio::time::sleep(delay).await;
            }

            match entry.client.generate(messages, Some(tag), timeout).await {
                Ok(text) => return Ok(text),
                Err(error) => {
                    let retryable = error.is_retryable();
                    last_error = Some(error);
                    if !retryable {
                        break;
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| ProviderError::unavailable(None, "provider made no attempts")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn descriptor(id: &str, retries: u32) -> ProviderDescriptor {
        ProviderDescriptor {
            id: id.to_string(),
            capabilities: vec!["general".to_string()],
            endpoint: "http://localhost:9999/v1/chat/completions".to_string(),
            model: "test-model".to_string(),
            credential_env: None,
            timeout_s: 5,
            max_retries: retries,
        }
    }

    struct FixedClient {
        result: Result<String, ProviderError>,
        calls: AtomicU32,
    }

    impl FixedClient {
        fn ok(text: &str) -> Self {
            Self {
                result: Ok(text.to_string()),
                calls: AtomicU32::new(0),
            }
        }

        fn err(error: ProviderError) -> Self {
            Self {
                result: Err(error),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ProviderClient for FixedClient {
        async fn generate(
            &self,
            _messages: &[ChatMessage],
            _domain_hint: Option<&str>,
            _timeout: Duration,
        ) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    #[tokio::test]
    async fn unknown_tag_is_rejected() {
        let pool = ProviderPool::with_clients(vec![(
            descriptor("p1", 1),
            Arc::new(FixedClient::ok("hi")) as Arc<dyn ProviderClient>,
        )]);
        let err = pool
            .execute("code", &[ChatMessage::user("goal")])
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::NoProvidersForTag(_)));
    }

    #[tokio::test]
    async fn first_provider_wins_when_healthy() {
        let pool = ProviderPool::with_clients(vec![
            (
                descriptor("p1", 1),
                Arc::new(FixedClient::ok("from p1")) as Arc<dyn ProviderClient>,
            ),
            (
                descriptor("p2", 1),
                Arc::new(FixedClient::ok("from p2")) as Arc<dyn ProviderClient>,
            ),
        ]);
        let text = pool
            .execute("general", &[ChatMessage::user("goal")])
            .await
            .unwrap();
        assert_eq!(text, "from p1");
    }

    #[tokio::test]
    async fn non_retryable_error_fails_over_without_retry() {
        let failing = Arc::new(FixedClient::err(ProviderError::bad_response(
            Some(401),
            "bad key",
        )));
        let pool = ProviderPool::with_clients(vec![
            (descriptor("p1", 3), failing.clone() as Arc<dyn ProviderClient>),
            (
                descriptor("p2", 1),
                Arc::new(FixedClient::ok("fallback")) as Arc<dyn ProviderClient>,
            ),
        ]);
        let text = pool
            .execute("general", &[ChatMessage::user("goal")])
            .await
            .unwrap();
        assert_eq!(text, "fallback");
        // BadResponse must not be retried on the same provider.
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_carries_per_provider_failures() {
        let pool = ProviderPool::with_clients(vec![
            (
                descriptor("p1", 1),
                Arc::new(FixedClient::err(ProviderError::timeout("t1")))
                    as Arc<dyn ProviderClient>,
            ),
            (
                descriptor("p2", 1),
                Arc::new(FixedClient::err(ProviderError::unavailable(Some(503), "down")))
                    as Arc<dyn ProviderClient>,
            ),
        ]);
        let err = pool
            .execute("general", &[ChatMessage::user("goal")])
            .await
            .unwrap_err();
        match err {
            PoolError::AllProvidersExhausted { tag, failures } => {
                assert_eq!(tag, "general");
                assert_eq!(failures.len(), 2);
                assert_eq!(failures[0].provider_id, "p1");
                assert_eq!(failures[1].provider_id, "p2");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
