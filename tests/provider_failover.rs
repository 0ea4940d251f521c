//! Failover behavior of the provider pool across multiple back-ends.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::assert_ok;

use autopilot_sh::provider::{
    ChatMessage, PoolError, ProviderClient, ProviderDescriptor, ProviderError, ProviderPool,
};

/// Client that replays a sequence of results, repeating the last one.
struct SequencedClient {
    responses: Mutex<VecDeque<Result<String, ProviderError>>>,
    last: Result<String, ProviderError>,
    calls: AtomicU32,
}

impl SequencedClient {
    fn new(responses: Vec<Result<String, ProviderError>>) -> Arc<Self> {
        let last = responses
            .last()
            .cloned()
            .unwrap_or_else(|| Err(ProviderError::unavailable(None, "empty script")));
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            last,
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderClient for SequencedClient {
    async fn generate(
        &self,
        _messages: &[ChatMessage],
        _domain_hint: Option<&str>,
        _timeout: Duration,
    ) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.last.clone())
    }
}

fn descriptor(id: &str, retries: u32) -> ProviderDescriptor {
    ProviderDescriptor {
        id: id.to_string(),
        capabilities: vec!["code".to_string()],
        endpoint: "http://localhost:9999/v1/chat/completions".to_string(),
        model: "test-model".to_string(),
        credential_env: None,
        timeout_s: 5,
        max_retries: retries,
    }
}

fn goal() -> Vec<ChatMessage> {
    vec![ChatMessage::user("fix the bug")]
}

#[tokio::test]
async fn pool_fails_over_until_a_provider_answers() {
    let p1 = SequencedClient::new(vec![Err(ProviderError::timeout("slow"))]);
    let p2 = SequencedClient::new(vec![Err(ProviderError::timeout("also slow"))]);
    let p3 = SequencedClient::new(vec![Ok("from p3".to_string())]);

    let pool = ProviderPool::with_clients(vec![
        (descriptor("p1", 1), p1.clone() as Arc<dyn ProviderClient>),
        (descriptor("p2", 1), p2.clone() as Arc<dyn ProviderClient>),
        (descriptor("p3", 1), p3.clone() as Arc<dyn ProviderClient>),
    ]);

    let text = pool.execute("code", &goal()).await.unwrap();
    assert_eq!(text, "from p3");
    assert_eq!(p1.calls(), 1);
    assert_eq!(p2.calls(), 1);
    assert_eq!(p3.calls(), 1);

    // Failures along the way are recorded against each provider.
    let snapshots = pool.health().snapshots().await;
    let failures: Vec<(String, u32)> = snapshots
        .iter()
        .map(|s| (s.provider_id.clone(), s.consecutive_failures))
        .collect();
    assert!(failures.contains(&("p1".to_string(), 1)));
    assert!(failures.contains(&("p2".to_string(), 1)));
    assert!(failures.contains(&("p3".to_string(), 0)));
}

#[tokio::test]
async fn retry_after_hint_drives_same_provider_retry() {
    let p1 = SequencedClient::new(vec![
        Err(ProviderError::rate_limited(
            "slow down",
            Some(Duration::from_millis(10)),
        )),
        Ok("second attempt".to_string()),
    ]);

    let pool = ProviderPool::with_clients(vec![(
        descriptor("p1", 2),
        p1.clone() as Arc<dyn ProviderClient>,
    )]);

    let text = assert_ok!(pool.execute("code", &goal()).await);
    assert_eq!(text, "second attempt");
    assert_eq!(p1.calls(), 2);
}

#[tokio::test]
async fn cooldown_defers_a_failing_provider_on_later_calls() {
    let p1 = SequencedClient::new(vec![Err(ProviderError::unavailable(Some(500), "erroring"))]);
    let p2 = SequencedClient::new(vec![Ok("from p2".to_string())]);

    let pool = ProviderPool::with_clients(vec![
        (descriptor("p1", 1), p1.clone() as Arc<dyn ProviderClient>),
        (descriptor("p2", 1), p2.clone() as Arc<dyn ProviderClient>),
    ]);

    // First call walks p1 (fails, enters cooldown) then p2.
    assert_eq!(pool.execute("code", &goal()).await.unwrap(), "from p2");
    assert_eq!(p1.calls(), 1);

    // Second call defers p1 to the back of the order; p2 answers first and
    // p1 is never contacted.
    assert_eq!(pool.execute("code", &goal()).await.unwrap(), "from p2");
    assert_eq!(p1.calls(), 1);
    assert_eq!(p2.calls(), 2);
}

#[tokio::test]
async fn exhaustion_reports_every_provider_failure() {
    let p1 = SequencedClient::new(vec![Err(ProviderError::timeout("t"))]);
    let p2 = SequencedClient::new(vec![Err(ProviderError::bad_response(Some(401), "bad key"))]);

    let pool = ProviderPool::with_clients(vec![
        (descriptor("p1", 1), p1 as Arc<dyn ProviderClient>),
        (descriptor("p2", 1), p2 as Arc<dyn ProviderClient>),
    ]);

    let err = pool.execute("code", &goal()).await.unwrap_err();
    match &err {
        PoolError::AllProvidersExhausted { tag, failures } => {
            assert_eq!(tag, "code");
            assert_eq!(failures.len(), 2);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    let detail = err.detail();
    assert!(detail.contains("p1"));
    assert!(detail.contains("p2"));
}
