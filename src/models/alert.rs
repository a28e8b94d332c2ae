use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{AlertCategory, AlertSeverity, AlertStatus, AlertType};

/// A persisted unit of clinical attention.
///
/// Created by one of the two analysis pipelines (or manually), then walked
/// through its lifecycle (`active` → `accepted`/`dismissed`/`resolved`) by
/// the clinician or by the comprehensive pass superseding real-time flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub patient_id: String,
    pub encounter_id: String,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub category: AlertCategory,
    pub title: String,
    pub message: String,
    pub suggestion: Option<String>,
    pub confidence_score: f64,
    pub source_reasoning: Option<String>,
    pub processing_model: Option<String>,
    pub context_data: Option<serde_json::Value>,
    pub related_data: Option<serde_json::Value>,
    /// Where the UI should jump when the alert is opened.
    pub navigation_target: Option<String>,
    /// Structured patch the user may apply to the chart.
    pub proposed_edit: Option<serde_json::Value>,
    pub status: AlertStatus,
    pub is_real_time: bool,
    pub is_post_consultation: bool,
    pub acknowledged: bool,
    pub acknowledged_at: Option<NaiveDateTime>,
    pub acknowledged_by: Option<String>,
    pub action_taken: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub expires_at: Option<NaiveDateTime>,
    pub tags: Vec<String>,
    pub extra_data: Option<serde_json::Value>,
}

impl Alert {
    pub fn is_expired(&self, now: NaiveDateTime) -> bool {
        matches!(self.expires_at, Some(exp) if exp <= now)
    }
}

/// Request to create a new alert. The store fills id, status and timestamps.
#[derive(Debug, Clone)]
pub struct CreateAlertRequest {
    pub patient_id: String,
    pub encounter_id: String,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub category: AlertCategory,
    pub title: String,
    pub message: String,
    pub suggestion: Option<String>,
    pub confidence_score: f64,
    pub source_reasoning: Option<String>,
    pub processing_model: Option<String>,
    pub context_data: Option<serde_json::Value>,
    pub related_data: Option<serde_json::Value>,
    pub navigation_target: Option<String>,
    pub proposed_edit: Option<serde_json::Value>,
    pub is_real_time: bool,
    pub is_post_consultation: bool,
    pub expires_at: Option<NaiveDateTime>,
    pub tags: Vec<String>,
}

impl CreateAlertRequest {
    /// Minimal request with required fields only.
    pub fn new(
        patient_id: &str,
        encounter_id: &str,
        alert_type: AlertType,
        severity: AlertSeverity,
        category: AlertCategory,
        title: &str,
        message: &str,
    ) -> Self {
        Self {
            patient_id: patient_id.to_string(),
            encounter_id: encounter_id.to_string(),
            alert_type,
            severity,
            category,
            title: title.to_string(),
            message: message.to_string(),
            suggestion: None,
            confidence_score: 0.0,
            source_reasoning: None,
            processing_model: None,
            context_data: None,
            related_data: None,
            navigation_target: None,
            proposed_edit: None,
            is_real_time: false,
            is_post_consultation: false,
            expires_at: None,
            tags: Vec::new(),
        }
    }
}

/// Partial update. Only lifecycle fields are mutable post-creation;
/// classification and content are immutable.
#[derive(Debug, Clone, Default)]
pub struct AlertUpdate {
    pub status: Option<AlertStatus>,
    pub acknowledged: Option<bool>,
    pub acknowledged_by: Option<String>,
    pub action_taken: Option<String>,
    pub extra_data: Option<serde_json::Value>,
}

impl AlertUpdate {
    pub fn status(status: AlertStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.acknowledged.is_none()
            && self.acknowledged_by.is_none()
            && self.action_taken.is_none()
            && self.extra_data.is_none()
    }
}

/// An unpersisted alert proposal returned by the reasoning service,
/// subject to deduplication before storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateAlert {
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub suggestion: Option<String>,
    /// Clamped to [0, 1] by the gateway.
    pub confidence: f64,
    pub reasoning: Option<String>,
    /// Model identifier stamped by the gateway.
    pub model: Option<String>,
}
