use chrono::NaiveDateTime;

use super::alert::Alert;
use super::enums::{AlertCategory, AlertSeverity, AlertStatus, AlertType};

/// Query filter surface for the alert store.
///
/// Empty vectors mean "no constraint" for that dimension. Expired alerts
/// are excluded unless `include_expired` is set.
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub patient_id: Option<String>,
    pub encounter_id: Option<String>,
    pub alert_types: Vec<AlertType>,
    pub severities: Vec<AlertSeverity>,
    pub categories: Vec<AlertCategory>,
    pub statuses: Vec<AlertStatus>,
    pub is_real_time: Option<bool>,
    pub is_post_consultation: Option<bool>,
    pub created_after: Option<NaiveDateTime>,
    pub created_before: Option<NaiveDateTime>,
    pub include_expired: bool,
    pub limit: Option<u32>,
    pub offset: u32,
}

impl AlertFilter {
    /// Filter scoped to one (patient, encounter) key.
    pub fn for_encounter(patient_id: &str, encounter_id: &str) -> Self {
        Self {
            patient_id: Some(patient_id.to_string()),
            encounter_id: Some(encounter_id.to_string()),
            ..Self::default()
        }
    }

    /// Active alerts for one key — the deduplication comparison set.
    pub fn active_for_encounter(patient_id: &str, encounter_id: &str) -> Self {
        let mut filter = Self::for_encounter(patient_id, encounter_id);
        filter.statuses = vec![AlertStatus::Active];
        filter
    }
}

/// One page of query results.
#[derive(Debug, Clone, Default)]
pub struct AlertPage {
    pub alerts: Vec<Alert>,
    pub total_count: u32,
    pub has_more: bool,
}
