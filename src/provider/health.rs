//! Per-provider health tracking with cooldown-based demotion.
//!
//! The tracker is best-effort accounting: pool correctness does not depend on
//! it, but it lets the pool skip providers stuck in a failure streak and lets
//! operators inspect per-provider counters.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::error::ProviderErrorKind;

/// Health state for a single provider.
#[derive(Debug, Clone, Default)]
struct ProviderHealth {
    /// When the cooldown expires (None = healthy).
    cooldown_until: Option<Instant>,
    /// Consecutive failures, reset on success.
    consecutive_failures: u32,
    /// Last failure kind, for diagnostics.
    last_failure: Option<String>,
    last_failure_at: Option<chrono::DateTime<chrono::Utc>>,
    total_requests: u64,
    total_successes: u64,
    total_failures: u64,
}

impl ProviderHealth {
    fn is_in_cooldown(&self) -> bool {
        self.cooldown_until
            .map(|until| Instant::now() < until)
            .unwrap_or(false)
    }

    fn remaining_cooldown(&self) -> Option<Duration> {
        self.cooldown_until.and_then(|until| {
            let now = Instant::now();
            (now < until).then(|| until - now)
        })
    }
}

/// Backoff configuration for cooldown placement.
#[derive(Debug, Clone)]
pub struct CooldownConfig {
    /// Base cooldown for the first failure.
    pub base_delay: Duration,
    /// Maximum cooldown cap.
    pub max_delay: Duration,
    /// Multiplier per consecutive failure.
    pub multiplier: f64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
        }
    }
}

impl CooldownConfig {
    /// Cooldown duration for the given failure streak, capped at `max_delay`.
    pub fn cooldown_for(&self, consecutive_failures: u32) -> Duration {
        let delay_secs =
            self.base_delay.as_secs_f64() * self.multiplier.powi(consecutive_failures as i32);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Serializable health snapshot for the diagnostic endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealthSnapshot {
    pub provider_id: String,
    pub is_healthy: bool,
    pub cooldown_remaining_secs: Option<f64>,
    pub consecutive_failures: u32,
    pub last_failure: Option<String>,
    pub last_failure_at: Option<chrono::DateTime<chrono::Utc>>,
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
}

/// Thread-safe health tracker shared by the pool and the diagnostic endpoint.
#[derive(Debug, Clone, Default)]
pub struct ProviderHealthTracker {
    providers: Arc<RwLock<HashMap<String, ProviderHealth>>>,
    cooldown: CooldownConfig,
}

impl ProviderHealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a provider is currently healthy (not in cooldown).
    /// Unknown providers are healthy by default.
    pub async fn is_healthy(&self, provider_id: &str) -> bool {
        let providers = self.providers.read().await;
        providers
            .get(provider_id)
            .map(|h| !h.is_in_cooldown())
            .unwrap_or(true)
    }

    /// Record a successful request; resets the failure streak and cooldown.
    pub async fn record_success(&self, provider_id: &str) {
        let mut providers = self.providers.write().await;
        let health = providers.entry(provider_id.to_string()).or_default();
        health.total_requests += 1;
        health.total_successes += 1;
        health.consecutive_failures = 0;
        health.cooldown_until = None;
    }

    /// Record a failure and place the provider into cooldown.
    ///
    /// Returns the cooldown duration applied.
    pub async fn record_failure(&self, provider_id: &str, kind: ProviderErrorKind) -> Duration {
        let mut providers = self.providers.write().await;
        let health = providers.entry(provider_id.to_string()).or_default();

        health.total_requests += 1;
        health.total_failures += 1;
        health.consecutive_failures = health.consecutive_failures.saturating_add(1);
        health.last_failure = Some(kind.to_string());
        health.last_failure_at = Some(chrono::Utc::now());

        let cooldown = self
            .cooldown
            .cooldown_for(health.consecutive_failures.saturating_sub(1));
        health.cooldown_until = Some(Instant::now() + cooldown);

        tracing::info!(
            provider_id = %provider_id,
            consecutive_failures = health.consecutive_failures,
            cooldown_secs = cooldown.as_secs_f64(),
            "Provider placed in cooldown"
        );

        cooldown
    }

    /// Consecutive-failure count for a provider (0 if never seen).
    pub async fn consecutive_failures(&self, provider_id: &str) -> u32 {
        let providers = self.providers.read().await;
        providers
            .get(provider_id)
            .map(|h| h.consecutive_failures)
            .unwrap_or(0)
    }

    /// Snapshots for all tracked providers, for the diagnostic endpoint.
    pub async fn snapshots(&self) -> Vec<ProviderHealthSnapshot> {
        let providers = self.providers.read().await;
        let mut out: Vec<ProviderHealthSnapshot> = providers
            .iter()
            .map(|(id, health)| ProviderHealthSnapshot {
                provider_id: id.clone(),
                is_healthy: !health.is_in_cooldown(),
                cooldown_remaining_secs: health.remaining_cooldown().map(|d| d.as_secs_f64()),
                consecutive_failures: health.consecutive_failures,
                last_failure: health.last_failure.clone(),
                last_failure_at: health.last_failure_at,
                total_requests: health.total_requests,
                total_successes: health.total_successes,
                total_failures: health.total_failures,
            })
            .collect();
        out.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        out
    }

    /// Clear cooldown for a provider (manual recovery).
    pub async fn clear_cooldown(&self, provider_id: &str) {
        let mut providers = self.providers.write().await;
        if let Some(health) = providers.get_mut(provider_id) {
            health.cooldown_until = None;
            health.consecutive_failures = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_providers_are_healthy() {
        let tracker = ProviderHealthTracker::new();
        assert!(tracker.is_healthy("never-seen").await);
        assert_eq!(tracker.consecutive_failures("never-seen").await, 0);
    }

    #[tokio::test]
    async fn failure_places_provider_in_cooldown() {
        let tracker = ProviderHealthTracker::new();
        tracker
            .record_failure("p1", ProviderErrorKind::Timeout)
            .await;
        assert!(!tracker.is_healthy("p1").await);
        assert_eq!(tracker.consecutive_failures("p1").await, 1);
    }

    #[tokio::test]
    async fn success_resets_streak() {
        let tracker = ProviderHealthTracker::new();
        tracker
            .record_failure("p1", ProviderErrorKind::Unavailable)
            .await;
        tracker
            .record_failure("p1", ProviderErrorKind::Unavailable)
            .await;
        tracker.record_success("p1").await;
        assert!(tracker.is_healthy("p1").await);
        assert_eq!(tracker.consecutive_failures("p1").await, 0);
    }

    #[test]
    fn cooldown_grows_and_caps() {
        let config = CooldownConfig::default();
        assert!(config.cooldown_for(1) > config.cooldown_for(0));
        assert!(config.cooldown_for(20) <= config.max_delay);
    }
}
