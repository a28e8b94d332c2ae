//! Ollama HTTP transport for the reasoning gateway, plus the mock client
//! tests inject.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{CompletionRequest, GatewayError, ReasoningClient};

/// Ollama HTTP client for local inference. Timeouts are per request, not
/// per client, so one instance serves both analysis kinds.
pub struct OllamaClient {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl OllamaClient {
    pub fn new(base_url: &str) -> Result<Self, GatewayError> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| GatewayError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Default Ollama instance at localhost:11434.
    pub fn default_local() -> Result<Self, GatewayError> {
        Self::new("http://localhost:11434")
    }

    pub fn list_models(&self) -> Result<Vec<String>, GatewayError> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self.client.get(&url).send().map_err(|e| {
            if e.is_connect() {
                GatewayError::Connection(self.base_url.clone())
            } else {
                GatewayError::HttpClient(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Http {
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            });
        }

        let parsed: TagsResponse = response
            .json()
            .map_err(|e| GatewayError::ResponseParsing(e.to_string()))?;
        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }

    pub fn is_model_available(&self, model: &str) -> Result<bool, GatewayError> {
        Ok(self.list_models()?.iter().any(|m| m.starts_with(model)))
    }
}

/// Request body for Ollama /api/generate
#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
}

/// Response body from Ollama /api/generate
#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
}

impl ReasoningClient for OllamaClient {
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, GatewayError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model: request.model,
            prompt: request.prompt,
            system: request.system,
            stream: false,
        };

        let response = self
            .client
            .post(&url)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_connect() {
                    GatewayError::Connection(self.base_url.clone())
                } else if e.is_timeout() {
                    GatewayError::Timeout(request.timeout.as_secs())
                } else {
                    GatewayError::HttpClient(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Http {
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .map_err(|e| GatewayError::ResponseParsing(e.to_string()))?;
        Ok(parsed.response)
    }
}

/// Mock client for tests: canned completion, optional leading failures,
/// shared call counter.
pub struct MockReasoningClient {
    response: String,
    failures_before_success: usize,
    calls: Arc<AtomicUsize>,
}

impl MockReasoningClient {
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            failures_before_success: 0,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail the first `n` calls with a timeout, then succeed.
    pub fn with_failures(mut self, n: usize) -> Self {
        self.failures_before_success = n;
        self
    }

    /// Handle onto the call counter, usable after the client is boxed.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl ReasoningClient for MockReasoningClient {
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, GatewayError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures_before_success {
            return Err(GatewayError::Timeout(request.timeout.as_secs()));
        }
        Ok(self.response.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request<'a>() -> CompletionRequest<'a> {
        CompletionRequest {
            model: "medgemma:4b",
            system: "sys",
            prompt: "prompt",
            timeout: Duration::from_secs(15),
        }
    }

    #[test]
    fn ollama_client_trims_trailing_slash() {
        let client = OllamaClient::new("http://localhost:11434/").unwrap();
        assert_eq!(client.base_url, "http://localhost:11434");
    }

    #[test]
    fn default_local_uses_standard_port() {
        let client = OllamaClient::default_local().unwrap();
        assert_eq!(client.base_url, "http://localhost:11434");
    }

    #[test]
    fn mock_returns_configured_response() {
        let mock = MockReasoningClient::new("[]");
        assert_eq!(mock.complete(&request()).unwrap(), "[]");
        assert_eq!(mock.call_counter().load(Ordering::SeqCst), 1);
    }

    #[test]
    fn mock_fails_then_recovers() {
        let mock = MockReasoningClient::new("ok").with_failures(2);
        assert!(mock.complete(&request()).is_err());
        assert!(mock.complete(&request()).is_err());
        assert_eq!(mock.complete(&request()).unwrap(), "ok");
    }
}
