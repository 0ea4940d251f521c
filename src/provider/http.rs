//! HTTP provider client for OpenAI-compatible chat-completions endpoints.
//!
//! One attempt per call; the pool owns retry and failover policy.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::{classify_http_status, ProviderError, ProviderErrorKind};
use super::{ChatMessage, ProviderClient, ProviderDescriptor};

/// Client for one OpenAI-compatible back-end.
pub struct HttpProviderClient {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpProviderClient {
    /// Build a client from a descriptor, resolving the credential env var now
    /// so a missing key surfaces at construction rather than mid-run.
    pub fn from_descriptor(descriptor: &ProviderDescriptor) -> Result<Self, ProviderError> {
        let api_key = match &descriptor.credential_env {
            Some(var) => match std::env::var(var) {
                Ok(key) => Some(key),
                Err(_) => {
                    return Err(ProviderError::bad_response(
                        None,
                        format!(
                            "provider '{}' requires credential env var {} which is not set",
                            descriptor.id, var
                        ),
                    ))
                }
            },
            None => None,
        };

        Ok(Self {
            client: Client::new(),
            endpoint: descriptor.endpoint.clone(),
            model: descriptor.model.clone(),
            api_key,
        })
    }

    /// Parse Retry-After header if present (seconds form only).
    fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
        headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok().map(Duration::from_secs))
    }

    fn create_error(
        status: reqwest::StatusCode,
        body: &str,
        retry_after: Option<Duration>,
    ) -> ProviderError {
        let status_code = status.as_u16();
        match classify_http_status(status_code) {
            ProviderErrorKind::RateLimited => ProviderError::rate_limited(body, retry_after),
            ProviderErrorKind::Unavailable => {
                ProviderError::unavailable(Some(status_code), body)
            }
            _ => ProviderError::bad_response(Some(status_code), body),
        }
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        domain_hint: Option<&str>,
        timeout: Duration,
    ) -> Result<String, ProviderError> {
        if messages.is_empty() {
            return Err(ProviderError::bad_response(
                None,
                "generate called with no messages",
            ));
        }

        tracing::debug!(
            endpoint = %self.endpoint,
            model = %self.model,
            domain_hint = domain_hint.unwrap_or("-"),
            messages = messages.len(),
            "Dispatching generation request"
        );

        let request = CompletionRequest {
            model: &self.model,
            messages,
            temperature: 0.2,
        };

        let mut builder = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .timeout(timeout)
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) => {
                if e.is_timeout() {
                    return Err(ProviderError::timeout(format!("request timed out: {}", e)));
                }
                return Err(ProviderError::unavailable(
                    None,
                    format!("request failed: {}", e),
                ));
            }
        };

        let status = response.status();
        let retry_after = Self::parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(Self::create_error(status, &body, retry_after));
        }

        let parsed: CompletionResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::bad_response(
                None,
                format!(
                    "failed to parse response: {}, body: {}",
                    e,
                    &body[..body.len().min(500)]
                ),
            )
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::bad_response(None, "no choices in response"))?;

        if content.trim().is_empty() {
            return Err(ProviderError::bad_response(None, "empty completion"));
        }

        Ok(content)
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}
