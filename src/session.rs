//! Live consultation session registry.
//!
//! Tracks which (patient, encounter) pairs are mid-consultation. The
//! engine consults this registry to decide whether the periodic enqueue
//! timer has work to do; the timer itself lives in the engine.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use crate::delta::{encounter_key, EncounterKey};

#[derive(Debug)]
pub struct ConsultationSession {
    pub patient_id: String,
    pub encounter_id: String,
    pub started_at: Instant,
    /// Trailing buffer of recently raised alert titles, oldest trimmed.
    recent_alert_titles: VecDeque<String>,
    title_buffer_cap: usize,
}

impl ConsultationSession {
    fn new(patient_id: &str, encounter_id: &str, title_buffer_cap: usize) -> Self {
        Self {
            patient_id: patient_id.to_string(),
            encounter_id: encounter_id.to_string(),
            started_at: Instant::now(),
            recent_alert_titles: VecDeque::new(),
            title_buffer_cap,
        }
    }

    pub fn record_alert_title(&mut self, title: &str) {
        if self.recent_alert_titles.len() == self.title_buffer_cap {
            self.recent_alert_titles.pop_front();
        }
        self.recent_alert_titles.push_back(title.to_string());
    }

    pub fn recent_alert_titles(&self) -> impl Iterator<Item = &str> {
        self.recent_alert_titles.iter().map(String::as_str)
    }
}

#[derive(Debug)]
pub struct SessionManager {
    sessions: HashMap<EncounterKey, ConsultationSession>,
    title_buffer_cap: usize,
}

impl SessionManager {
    pub fn new(title_buffer_cap: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            title_buffer_cap,
        }
    }

    /// Register a session. Re-starting an existing key replaces the old
    /// session state. Returns true when this is the first active session,
    /// i.e. the periodic timer should start.
    pub fn start(&mut self, patient_id: &str, encounter_id: &str) -> bool {
        let was_empty = self.sessions.is_empty();
        self.sessions.insert(
            encounter_key(patient_id, encounter_id),
            ConsultationSession::new(patient_id, encounter_id, self.title_buffer_cap),
        );
        tracing::info!(patient_id, encounter_id, "Consultation session started");
        was_empty
    }

    /// Remove a session. Returns true when no sessions remain, i.e. the
    /// periodic timer should stop.
    pub fn end(&mut self, patient_id: &str, encounter_id: &str) -> bool {
        if self
            .sessions
            .remove(&encounter_key(patient_id, encounter_id))
            .is_some()
        {
            tracing::info!(patient_id, encounter_id, "Consultation session ended");
        }
        self.sessions.is_empty()
    }

    pub fn is_active(&self, patient_id: &str, encounter_id: &str) -> bool {
        self.sessions
            .contains_key(&encounter_key(patient_id, encounter_id))
    }

    pub fn get_mut(
        &mut self,
        patient_id: &str,
        encounter_id: &str,
    ) -> Option<&mut ConsultationSession> {
        self.sessions
            .get_mut(&encounter_key(patient_id, encounter_id))
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// Keys of every live session, for the periodic enqueue sweep.
    pub fn active_keys(&self) -> Vec<EncounterKey> {
        self.sessions.keys().cloned().collect()
    }
}
