//! Never-throws façade over the alert table.
//!
//! Every operation degrades to `Option`/empty plus a `warn` log on
//! failure: a dead or locked database must never take an analysis cycle
//! down with it. The table stays authoritative; the short-TTL cache in
//! front of the dedup comparison set is invalidated on every write.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{NaiveDateTime, Timelike, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use crate::cache::{alert_cache_key, TtlCache};
use crate::db::repository::{get_alert, insert_alert, query_alerts, update_alert};
use crate::models::{
    Alert, AlertFilter, AlertPage, AlertStatus, AlertUpdate, CreateAlertRequest,
};

/// Wall clock at the schema's one-second resolution, so an alert compares
/// equal before and after a round trip through the table.
fn now() -> NaiveDateTime {
    let now = Utc::now().naive_utc();
    now.with_nanosecond(0).unwrap_or(now)
}

pub struct AlertStore {
    conn: Arc<Mutex<Connection>>,
    query_cache: Mutex<TtlCache<Vec<Alert>>>,
}

impl AlertStore {
    pub fn new(conn: Arc<Mutex<Connection>>, cache_ttl: Duration) -> Self {
        Self {
            conn,
            query_cache: Mutex::new(TtlCache::new(cache_ttl)),
        }
    }

    /// Persist a new alert. `None` means the write failed and was logged;
    /// callers proceed without it.
    pub fn create(&self, request: CreateAlertRequest) -> Option<Alert> {
        let created_at = now();
        let alert = Alert {
            id: Uuid::new_v4(),
            patient_id: request.patient_id,
            encounter_id: request.encounter_id,
            alert_type: request.alert_type,
            severity: request.severity,
            category: request.category,
            title: request.title,
            message: request.message,
            suggestion: request.suggestion,
            confidence_score: request.confidence_score,
            source_reasoning: request.source_reasoning,
            processing_model: request.processing_model,
            context_data: request.context_data,
            related_data: request.related_data,
            navigation_target: request.navigation_target,
            proposed_edit: request.proposed_edit,
            status: AlertStatus::Active,
            is_real_time: request.is_real_time,
            is_post_consultation: request.is_post_consultation,
            acknowledged: false,
            acknowledged_at: None,
            acknowledged_by: None,
            action_taken: None,
            created_at,
            updated_at: created_at,
            expires_at: request.expires_at,
            tags: request.tags,
            extra_data: None,
        };

        let result = match self.conn.lock() {
            Ok(conn) => insert_alert(&conn, &alert),
            Err(_) => {
                tracing::warn!(alert_id = %alert.id, "Alert create skipped: connection lock poisoned");
                return None;
            }
        };

        match result {
            Ok(()) => {
                tracing::info!(
                    alert_id = %alert.id,
                    patient_id = %alert.patient_id,
                    encounter_id = %alert.encounter_id,
                    alert_type = alert.alert_type.as_str(),
                    severity = alert.severity.as_str(),
                    "Alert created"
                );
                self.invalidate_key(&alert.patient_id, &alert.encounter_id);
                Some(alert)
            }
            Err(e) => {
                tracing::warn!(alert_id = %alert.id, error = %e, "Alert create failed");
                None
            }
        }
    }

    /// Apply a lifecycle patch. An empty patch is a no-op returning the
    /// current row.
    pub fn update(&self, id: &Uuid, patch: AlertUpdate) -> Option<Alert> {
        let result = match self.conn.lock() {
            Ok(conn) => update_alert(&conn, id, &patch, now()),
            Err(_) => {
                tracing::warn!(alert_id = %id, "Alert update skipped: connection lock poisoned");
                return None;
            }
        };

        match result {
            Ok(alert) => {
                self.invalidate_key(&alert.patient_id, &alert.encounter_id);
                Some(alert)
            }
            Err(e) => {
                tracing::warn!(alert_id = %id, error = %e, "Alert update failed");
                None
            }
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<Alert> {
        let result = match self.conn.lock() {
            Ok(conn) => get_alert(&conn, id),
            Err(_) => return None,
        };
        match result {
            Ok(alert) => Some(alert),
            Err(e) => {
                tracing::debug!(alert_id = %id, error = %e, "Alert lookup failed");
                None
            }
        }
    }

    /// Filtered page of alerts. Failures yield an empty page.
    pub fn query(&self, filter: &AlertFilter) -> AlertPage {
        let result = match self.conn.lock() {
            Ok(conn) => query_alerts(&conn, filter, now()),
            Err(_) => {
                tracing::warn!("Alert query skipped: connection lock poisoned");
                return AlertPage::default();
            }
        };
        match result {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(error = %e, "Alert query failed");
                AlertPage::default()
            }
        }
    }

    /// Active alerts for one key — the dedup comparison set, served from
    /// the short-TTL cache between writes.
    pub fn active_for_encounter(&self, patient_id: &str, encounter_id: &str) -> Vec<Alert> {
        let key = alert_cache_key(patient_id, encounter_id);
        if let Ok(cache) = self.query_cache.lock() {
            if let Some(alerts) = cache.get(&key) {
                return alerts;
            }
        }

        let page = self.query(&AlertFilter::active_for_encounter(patient_id, encounter_id));
        if let Ok(mut cache) = self.query_cache.lock() {
            cache.set(&key, page.alerts.clone());
        }
        page.alerts
    }

    /// Supersession: flip every active real-time alert for the key to
    /// `resolved`. Returns how many were resolved; rows are preserved for
    /// audit. Individual update failures are logged and skipped.
    pub fn resolve_active_realtime(&self, patient_id: &str, encounter_id: &str) -> usize {
        let mut filter = AlertFilter::active_for_encounter(patient_id, encounter_id);
        filter.is_real_time = Some(true);
        let page = self.query(&filter);

        let mut resolved = 0;
        for alert in &page.alerts {
            if self
                .update(&alert.id, AlertUpdate::status(AlertStatus::Resolved))
                .is_some()
            {
                resolved += 1;
            }
        }
        if resolved > 0 {
            tracing::info!(
                patient_id,
                encounter_id,
                resolved,
                "Superseded active real-time alerts"
            );
        }
        resolved
    }

    /// Drop cached query results for one (patient, encounter).
    pub fn invalidate_key(&self, patient_id: &str, encounter_id: &str) {
        if let Ok(mut cache) = self.query_cache.lock() {
            cache.invalidate(&alert_cache_key(patient_id, encounter_id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use crate::models::enums::{AlertCategory, AlertSeverity, AlertType};

    fn store() -> AlertStore {
        let conn = Arc::new(Mutex::new(open_memory_database().unwrap()));
        AlertStore::new(conn, Duration::from_secs(300))
    }

    fn realtime_request(title: &str) -> CreateAlertRequest {
        let mut req = CreateAlertRequest::new(
            "p1",
            "e1",
            AlertType::DrugInteraction,
            AlertSeverity::Warning,
            AlertCategory::RealTime,
            title,
            "Warfarin with ibuprofen raises bleeding risk",
        );
        req.is_real_time = true;
        req
    }

    #[test]
    fn create_fills_lifecycle_fields() {
        let store = store();
        let alert = store.create(realtime_request("Interaction")).unwrap();

        assert_eq!(alert.status, AlertStatus::Active);
        assert!(!alert.acknowledged);
        assert_eq!(alert.created_at, alert.updated_at);

        let reloaded = store.get(&alert.id).unwrap();
        assert_eq!(reloaded.created_at, alert.created_at);
        assert_eq!(reloaded.title, "Interaction");
    }

    #[test]
    fn update_walks_lifecycle() {
        let store = store();
        let alert = store.create(realtime_request("Interaction")).unwrap();

        let patch = AlertUpdate {
            status: Some(AlertStatus::Accepted),
            acknowledged: Some(true),
            acknowledged_by: Some("dr.chen".into()),
            action_taken: Some("switched analgesic".into()),
            extra_data: None,
        };
        let updated = store.update(&alert.id, patch).unwrap();

        assert_eq!(updated.status, AlertStatus::Accepted);
        assert!(updated.acknowledged);
        assert!(updated.acknowledged_at.is_some());
        assert_eq!(updated.acknowledged_by.as_deref(), Some("dr.chen"));
    }

    #[test]
    fn update_of_missing_alert_is_none_not_panic() {
        let store = store();
        assert!(store
            .update(&Uuid::new_v4(), AlertUpdate::status(AlertStatus::Dismissed))
            .is_none());
    }

    #[test]
    fn writes_invalidate_the_comparison_set_cache() {
        let store = store();
        store.create(realtime_request("First")).unwrap();
        assert_eq!(store.active_for_encounter("p1", "e1").len(), 1);

        // Second write lands after the set was cached.
        store.create(realtime_request("Second")).unwrap();
        assert_eq!(store.active_for_encounter("p1", "e1").len(), 2);
    }

    #[test]
    fn resolve_active_realtime_supersedes_only_realtime_actives() {
        let store = store();
        let rt = store.create(realtime_request("Realtime")).unwrap();
        let mut second = realtime_request("Second realtime");
        second.message = "HbA1c has not been rechecked since dose change".into();
        second.alert_type = AlertType::MissingLab;
        let rt2 = store.create(second).unwrap();

        let mut manual = CreateAlertRequest::new(
            "p1",
            "e1",
            AlertType::MissingLab,
            AlertSeverity::Info,
            AlertCategory::Manual,
            "Manual",
            "HbA1c overdue",
        );
        manual.is_real_time = false;
        let manual = store.create(manual).unwrap();

        let dismissed = store.create(realtime_request("Dismissed")).unwrap();
        store.update(&dismissed.id, AlertUpdate::status(AlertStatus::Dismissed));

        assert_eq!(store.resolve_active_realtime("p1", "e1"), 2);
        assert_eq!(store.get(&rt.id).unwrap().status, AlertStatus::Resolved);
        assert_eq!(store.get(&rt2.id).unwrap().status, AlertStatus::Resolved);
        assert_eq!(store.get(&manual.id).unwrap().status, AlertStatus::Active);
        assert_eq!(
            store.get(&dismissed.id).unwrap().status,
            AlertStatus::Dismissed,
            "audit trail preserved"
        );
    }

    #[test]
    fn query_failure_shapes_are_empty_not_errors() {
        let store = store();
        let page = store.query(&AlertFilter::for_encounter("nobody", "none"));
        assert!(page.alerts.is_empty());
        assert_eq!(page.total_count, 0);
        assert!(!page.has_more);
    }
}
