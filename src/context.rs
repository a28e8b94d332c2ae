//! Patient context assembly for the reasoning service.
//!
//! The context provider is a read-only, cacheable collaborator: it pulls
//! demographics, active conditions and medications, recent labs and recent
//! prior alerts for one patient. Out-of-range labs are flagged against the
//! row's reference range, falling back to a small built-in table of common
//! analytes, so the prompt can highlight them without re-deriving ranges.

use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::cache::{context_cache_key, TtlCache};
use crate::db::repository::{
    get_active_conditions, get_active_medications, get_patient, get_recent_lab_results,
};
use crate::db::DatabaseError;

// ───────────────────────────────────────────────────────────────────
// Context types
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Demographics {
    pub patient_id: String,
    pub name: Option<String>,
    pub gender: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub race: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionSummary {
    pub code: Option<String>,
    pub description: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicationSummary {
    pub name: String,
    pub dose: Option<String>,
    pub frequency: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabFlag {
    Normal,
    Low,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabSummary {
    pub name: String,
    pub value: f64,
    pub units: Option<String>,
    pub flag: LabFlag,
    pub collected_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorAlertSummary {
    pub alert_type: String,
    pub title: String,
    pub status: String,
}

/// Everything the reasoning service gets to know about a patient.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatientContext {
    pub demographics: Demographics,
    pub conditions: Vec<ConditionSummary>,
    pub medications: Vec<MedicationSummary>,
    pub lab_results: Vec<LabSummary>,
    pub prior_alerts: Vec<PriorAlertSummary>,
}

/// One analysis cycle's full input: patient context plus the transcript
/// slice under scrutiny.
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    pub patient_id: String,
    pub encounter_id: String,
    pub patient: PatientContext,
    pub transcript_segment: String,
}

// ───────────────────────────────────────────────────────────────────
// Lab reference ranges
// ───────────────────────────────────────────────────────────────────

/// Fallback reference ranges (low, high) per analyte, used when the lab
/// row carries none. Simplified single-threshold ranges.
const LAB_REFERENCE_RANGES: &[(&str, Option<f64>, Option<f64>)] = &[
    ("GLUCOSE", Some(70.0), Some(100.0)),
    ("WHITE BLOOD CELLS", None, Some(10.5)),
    ("HEMOGLOBIN", Some(12.0), None),
    ("PLATELETS", Some(150.0), None),
    ("CREATININE", None, Some(1.2)),
    ("POTASSIUM", Some(3.5), None),
    ("SODIUM", Some(135.0), None),
    ("ESR", None, Some(20.0)),
    ("CRP", None, Some(1.0)),
];

fn builtin_range(lab_name: &str) -> (Option<f64>, Option<f64>) {
    let upper = lab_name.to_uppercase();
    LAB_REFERENCE_RANGES
        .iter()
        .find(|(name, _, _)| upper.contains(name))
        .map(|(_, low, high)| (*low, *high))
        .unwrap_or((None, None))
}

/// Flag a value against an explicit range, or the built-in table when the
/// row has no range of its own.
pub fn flag_lab_value(
    name: &str,
    value: f64,
    reference_low: Option<f64>,
    reference_high: Option<f64>,
) -> LabFlag {
    let (low, high) = if reference_low.is_some() || reference_high.is_some() {
        (reference_low, reference_high)
    } else {
        builtin_range(name)
    };

    if let Some(low) = low {
        if value < low {
            return LabFlag::Low;
        }
    }
    if let Some(high) = high {
        if value > high {
            return LabFlag::High;
        }
    }
    LabFlag::Normal
}

// ───────────────────────────────────────────────────────────────────
// Provider
// ───────────────────────────────────────────────────────────────────

/// Read-only source of patient context. Trait seam so pipelines can be
/// tested without a database.
pub trait PatientContextProvider: Send + Sync {
    fn fetch(&self, patient_id: &str) -> Result<PatientContext, DatabaseError>;
}

/// SQLite-backed provider over the patient chart tables.
pub struct SqliteContextProvider {
    conn: Arc<Mutex<Connection>>,
    lab_limit: u32,
}

impl SqliteContextProvider {
    pub fn new(conn: Arc<Mutex<Connection>>, lab_limit: u32) -> Self {
        Self { conn, lab_limit }
    }
}

impl PatientContextProvider for SqliteContextProvider {
    fn fetch(&self, patient_id: &str) -> Result<PatientContext, DatabaseError> {
        let conn = self.conn.lock().map_err(|_| {
            DatabaseError::ConstraintViolation("connection lock poisoned".into())
        })?;

        let patient = get_patient(&conn, patient_id)?;
        let conditions = get_active_conditions(&conn, patient_id)?;
        let medications = get_active_medications(&conn, patient_id)?;
        let labs = get_recent_lab_results(&conn, patient_id, self.lab_limit)?;

        let prior_alerts = load_prior_alerts(&conn, patient_id)?;

        Ok(PatientContext {
            demographics: Demographics {
                patient_id: patient.id,
                name: patient.name,
                gender: patient.gender,
                birth_date: patient.birth_date,
                race: patient.race,
            },
            conditions: conditions
                .into_iter()
                .map(|c| ConditionSummary {
                    code: c.code,
                    description: c.description,
                    status: c.status.as_str().to_string(),
                })
                .collect(),
            medications: medications
                .into_iter()
                .map(|m| MedicationSummary {
                    name: m.name,
                    dose: m.dose,
                    frequency: m.frequency,
                })
                .collect(),
            lab_results: labs
                .into_iter()
                .map(|l| LabSummary {
                    flag: flag_lab_value(&l.name, l.value, l.reference_low, l.reference_high),
                    name: l.name,
                    value: l.value,
                    units: l.units,
                    collected_at: l.collected_at,
                })
                .collect(),
            prior_alerts,
        })
    }
}

fn load_prior_alerts(
    conn: &Connection,
    patient_id: &str,
) -> Result<Vec<PriorAlertSummary>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT alert_type, title, status FROM alerts
         WHERE patient_id = ?1
         ORDER BY created_at DESC
         LIMIT 10",
    )?;
    let rows = stmt.query_map(rusqlite::params![patient_id], |row| {
        Ok(PriorAlertSummary {
            alert_type: row.get(0)?,
            title: row.get(1)?,
            status: row.get(2)?,
        })
    })?;

    let mut alerts = Vec::new();
    for row in rows {
        alerts.push(row?);
    }
    Ok(alerts)
}

// ───────────────────────────────────────────────────────────────────
// Cache-backed builder
// ───────────────────────────────────────────────────────────────────

/// Read-through context assembly: provider behind the long-TTL cache.
pub struct ContextBuilder {
    provider: Box<dyn PatientContextProvider>,
    cache: Mutex<TtlCache<PatientContext>>,
}

impl ContextBuilder {
    pub fn new(provider: Box<dyn PatientContextProvider>, cache: TtlCache<PatientContext>) -> Self {
        Self {
            provider,
            cache: Mutex::new(cache),
        }
    }

    /// Assembled context for one patient, from cache when fresh.
    /// Returns None (logged) when the provider fails; the caller skips
    /// the cycle rather than surfacing an error.
    pub fn get(&self, patient_id: &str) -> Option<PatientContext> {
        let key = context_cache_key(patient_id);

        if let Ok(cache) = self.cache.lock() {
            if let Some(ctx) = cache.get(&key) {
                return Some(ctx);
            }
        }

        match self.provider.fetch(patient_id) {
            Ok(ctx) => {
                if let Ok(mut cache) = self.cache.lock() {
                    cache.set(&key, ctx.clone());
                }
                Some(ctx)
            }
            Err(e) => {
                tracing::warn!(patient_id, error = %e, "Patient context fetch failed");
                None
            }
        }
    }

    pub fn invalidate(&self, patient_id: &str) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.invalidate(&context_cache_key(patient_id));
        }
    }

    /// Build the full input for one analysis cycle.
    pub fn analysis_context(
        &self,
        patient_id: &str,
        encounter_id: &str,
        transcript_segment: &str,
    ) -> Option<AnalysisContext> {
        let patient = self.get(patient_id)?;
        Some(AnalysisContext {
            patient_id: patient_id.to_string(),
            encounter_id: encounter_id.to_string(),
            patient,
            transcript_segment: transcript_segment.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use std::time::Duration;

    fn seeded_conn() -> Arc<Mutex<Connection>> {
        let conn = open_memory_database().unwrap();
        conn.execute(
            "INSERT INTO patients (id, name, gender, birth_date, race)
             VALUES ('p1', 'Jane Rivera', 'female', '1968-04-12', NULL)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO conditions (id, patient_id, code, description, status)
             VALUES ('c1', 'p1', 'E11.9', 'Type 2 diabetes', 'active')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO medications (id, patient_id, name, dose, frequency, status)
             VALUES ('m1', 'p1', 'Metformin', '500mg', 'twice daily', 'active')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO lab_results (id, patient_id, name, value, units, collected_at)
             VALUES ('l1', 'p1', 'GLUCOSE', 126.0, 'mg/dL', '2026-02-20 08:00:00')",
            [],
        )
        .unwrap();
        Arc::new(Mutex::new(conn))
    }

    #[test]
    fn lab_flagging_uses_explicit_range_first() {
        assert_eq!(flag_lab_value("GLUCOSE", 95.0, Some(100.0), None), LabFlag::Low);
        assert_eq!(flag_lab_value("GLUCOSE", 95.0, None, Some(90.0)), LabFlag::High);
    }

    #[test]
    fn lab_flagging_falls_back_to_builtin_ranges() {
        assert_eq!(flag_lab_value("METABOLIC: GLUCOSE", 126.0, None, None), LabFlag::High);
        assert_eq!(flag_lab_value("METABOLIC: GLUCOSE", 60.0, None, None), LabFlag::Low);
        assert_eq!(flag_lab_value("METABOLIC: GLUCOSE", 85.0, None, None), LabFlag::Normal);
        assert_eq!(flag_lab_value("CBC: HEMOGLOBIN", 10.0, None, None), LabFlag::Low);
    }

    #[test]
    fn unknown_analyte_defaults_to_normal() {
        assert_eq!(flag_lab_value("OBSCURE TEST", 9999.0, None, None), LabFlag::Normal);
    }

    #[test]
    fn provider_assembles_full_context() {
        let provider = SqliteContextProvider::new(seeded_conn(), 20);
        let ctx = provider.fetch("p1").unwrap();

        assert_eq!(ctx.demographics.name.as_deref(), Some("Jane Rivera"));
        assert_eq!(ctx.conditions.len(), 1);
        assert_eq!(ctx.medications[0].name, "Metformin");
        assert_eq!(ctx.lab_results.len(), 1);
        assert_eq!(ctx.lab_results[0].flag, LabFlag::High);
        assert!(ctx.prior_alerts.is_empty());
    }

    #[test]
    fn builder_caches_and_invalidates() {
        let conn = seeded_conn();
        let provider = SqliteContextProvider::new(conn.clone(), 20);
        let builder = ContextBuilder::new(
            Box::new(provider),
            TtlCache::new(Duration::from_secs(600)),
        );

        let first = builder.get("p1").unwrap();
        assert_eq!(first.medications.len(), 1);

        // Mutate behind the cache; the cached copy must win until invalidated.
        conn.lock()
            .unwrap()
            .execute(
                "INSERT INTO medications (id, patient_id, name, status)
                 VALUES ('m2', 'p1', 'Lisinopril', 'active')",
                [],
            )
            .unwrap();
        assert_eq!(builder.get("p1").unwrap().medications.len(), 1);

        builder.invalidate("p1");
        assert_eq!(builder.get("p1").unwrap().medications.len(), 2);
    }

    #[test]
    fn missing_patient_yields_none() {
        let provider = SqliteContextProvider::new(seeded_conn(), 20);
        let builder = ContextBuilder::new(
            Box::new(provider),
            TtlCache::new(Duration::from_secs(600)),
        );
        assert!(builder.get("ghost").is_none());
        assert!(builder.analysis_context("ghost", "e1", "text").is_none());
    }

    #[test]
    fn analysis_context_carries_segment() {
        let provider = SqliteContextProvider::new(seeded_conn(), 20);
        let builder = ContextBuilder::new(
            Box::new(provider),
            TtlCache::new(Duration::from_secs(600)),
        );
        let ctx = builder
            .analysis_context("p1", "e1", "patient reports dizziness")
            .unwrap();
        assert_eq!(ctx.encounter_id, "e1");
        assert_eq!(ctx.transcript_segment, "patient reports dizziness");
    }
}
