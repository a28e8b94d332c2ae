//! Reasoning-service gateway.
//!
//! Wraps the local model endpoint behind a retry/timeout policy and turns
//! free-form completions into validated [`CandidateAlert`]s. The gateway is
//! deliberately forgiving on the way out: a dead endpoint, exhausted
//! retries or malformed JSON all yield an empty candidate list plus a log
//! line, never an error the pipeline has to handle.

pub mod ollama;
pub mod prompts;

use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::config::EngineConfig;
use crate::context::AnalysisContext;
use crate::models::enums::{AlertSeverity, AlertType, TaskKind};
use crate::models::CandidateAlert;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Cannot reach reasoning service at {0}")]
    Connection(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Reasoning service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Failed to parse response: {0}")]
    ResponseParsing(String),

    #[error("Completion contained no parseable JSON: {0}")]
    JsonParsing(String),
}

/// One completion call. The timeout is per request so real-time and
/// comprehensive calls can share a client.
#[derive(Debug, Clone)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub system: &'a str,
    pub prompt: &'a str,
    pub timeout: Duration,
}

/// Transport seam. The HTTP impl lives in [`ollama`]; tests inject a mock.
pub trait ReasoningClient: Send + Sync {
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, GatewayError>;
}

/// Per-kind call policy derived from the engine config.
#[derive(Debug, Clone, Copy)]
struct CallPolicy {
    attempts: u32,
    timeout: Duration,
    max_alerts: usize,
}

pub struct ReasoningGateway {
    client: Box<dyn ReasoningClient>,
    model_name: String,
    realtime: CallPolicy,
    comprehensive: CallPolicy,
}

impl ReasoningGateway {
    pub fn new(client: Box<dyn ReasoningClient>, config: &EngineConfig) -> Self {
        Self {
            client,
            model_name: config.model_name.clone(),
            realtime: CallPolicy {
                attempts: config.realtime_attempts,
                timeout: config.realtime_timeout,
                max_alerts: config.realtime_max_alerts,
            },
            comprehensive: CallPolicy {
                attempts: config.comprehensive_attempts,
                timeout: config.comprehensive_timeout,
                max_alerts: config.comprehensive_max_alerts,
            },
        }
    }

    /// Run one analysis cycle against the reasoning service.
    ///
    /// Candidates come back capped, confidence-clamped and tagged with the
    /// model that produced them. Every failure mode degrades to an empty
    /// list.
    pub fn generate(&self, context: &AnalysisContext, kind: TaskKind) -> Vec<CandidateAlert> {
        let policy = match kind {
            TaskKind::RealTime => self.realtime,
            TaskKind::PostConsultation => self.comprehensive,
        };
        let (system, prompt) = match kind {
            TaskKind::RealTime => (
                prompts::REALTIME_SYSTEM_PROMPT,
                prompts::build_realtime_prompt(context, policy.max_alerts),
            ),
            TaskKind::PostConsultation => (
                prompts::COMPREHENSIVE_SYSTEM_PROMPT,
                prompts::build_comprehensive_prompt(context, policy.max_alerts),
            ),
        };

        let request = CompletionRequest {
            model: &self.model_name,
            system,
            prompt: &prompt,
            timeout: policy.timeout,
        };

        let response = match self.complete_with_retries(&request, policy.attempts) {
            Some(r) => r,
            None => return Vec::new(),
        };

        match parse_candidates(&response) {
            Ok(mut candidates) => {
                candidates.truncate(policy.max_alerts);
                for candidate in &mut candidates {
                    candidate.model = Some(self.model_name.clone());
                }
                tracing::debug!(
                    kind = kind.as_str(),
                    count = candidates.len(),
                    "Reasoning cycle produced candidates"
                );
                candidates
            }
            Err(e) => {
                tracing::warn!(kind = kind.as_str(), error = %e, "Discarding unparseable completion");
                Vec::new()
            }
        }
    }

    fn complete_with_retries(
        &self,
        request: &CompletionRequest<'_>,
        attempts: u32,
    ) -> Option<String> {
        for attempt in 1..=attempts {
            match self.client.complete(request) {
                Ok(response) => return Some(response),
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        attempts,
                        error = %e,
                        "Reasoning call failed"
                    );
                }
            }
        }
        None
    }
}

// ───────────────────────────────────────────────────────────────────
// Response parsing
// ───────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RawCandidate {
    alert_type: String,
    severity: Option<String>,
    title: String,
    message: String,
    suggestion: Option<String>,
    confidence: Option<f64>,
    reasoning: Option<String>,
}

#[derive(Deserialize)]
struct WrappedCandidates {
    alerts: Vec<serde_json::Value>,
}

/// Strip fences and reasoning tags, then cut down to the JSON payload.
fn sanitize_completion(response: &str) -> String {
    let mut text = response.to_string();

    // Thinking-model preambles arrive in <think> blocks.
    while let (Some(start), Some(end)) = (text.find("<think>"), text.find("</think>")) {
        if end > start {
            text.replace_range(start..end + "</think>".len(), "");
        } else {
            break;
        }
    }

    if let Some(start) = text.find("```json") {
        let inner = &text[start + 7..];
        if let Some(end) = inner.find("```") {
            return inner[..end].trim().to_string();
        }
    }
    if let Some(start) = text.find("```") {
        let inner = &text[start + 3..];
        if let Some(end) = inner.find("```") {
            return inner[..end].trim().to_string();
        }
    }

    // No fences: take from the first JSON opener onward.
    let json_start = text
        .find('[')
        .into_iter()
        .chain(text.find('{'))
        .min()
        .unwrap_or(0);
    text[json_start..].trim().to_string()
}

/// Parse a completion into candidates. Accepts a bare array or an object
/// with an `alerts` array. Items with unknown alert types are skipped;
/// confidence is clamped to [0, 1].
pub fn parse_candidates(response: &str) -> Result<Vec<CandidateAlert>, GatewayError> {
    let json_str = sanitize_completion(response);

    let values: Vec<serde_json::Value> = match serde_json::from_str::<Vec<serde_json::Value>>(
        &json_str,
    ) {
        Ok(array) => array,
        Err(_) => serde_json::from_str::<WrappedCandidates>(&json_str)
            .map(|w| w.alerts)
            .map_err(|e| GatewayError::JsonParsing(e.to_string()))?,
    };

    let mut candidates = Vec::new();
    for value in values {
        let raw: RawCandidate = match serde_json::from_value(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed candidate");
                continue;
            }
        };

        let alert_type = match AlertType::from_str(&raw.alert_type) {
            Ok(t) => t,
            Err(_) => {
                tracing::debug!(alert_type = %raw.alert_type, "Skipping candidate with unknown type");
                continue;
            }
        };
        let severity = raw
            .severity
            .as_deref()
            .and_then(|s| AlertSeverity::from_str(s).ok())
            .unwrap_or(AlertSeverity::Info);

        candidates.push(CandidateAlert {
            alert_type,
            severity,
            title: raw.title,
            message: raw.message,
            suggestion: raw.suggestion,
            confidence: raw.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
            reasoning: raw.reasoning,
            model: None,
        });
    }

    Ok(candidates)
}
