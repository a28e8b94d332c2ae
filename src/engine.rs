//! Alert engine orchestration.
//!
//! Ties the collaborators together: sessions feed the transcript tracker,
//! the queue feeds a serial drain loop, and the two pipelines (real-time
//! and comprehensive) run context → gateway → dedup → persist. Ticks are
//! plain methods so tests drive them synchronously; production wiring
//! runs them from the background threads in [`EngineHandle`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;
use thiserror::Error;

use crate::cache::TtlCache;
use crate::config::EngineConfig;
use crate::context::{ContextBuilder, SqliteContextProvider};
use crate::db::sqlite::open_database;
use crate::db::DatabaseError;
use crate::dedup::Deduplicator;
use crate::delta::TranscriptDeltaTracker;
use crate::gateway::ollama::OllamaClient;
use crate::gateway::{GatewayError, ReasoningClient, ReasoningGateway};
use crate::models::enums::{AlertCategory, TaskKind};
use crate::models::{CandidateAlert, CreateAlertRequest};
use crate::queue::{QueueTask, TaskQueue};
use crate::session::SessionManager;
use crate::store::AlertStore;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

pub struct AlertEngine {
    config: EngineConfig,
    store: AlertStore,
    context: ContextBuilder,
    gateway: ReasoningGateway,
    dedup: Deduplicator,
    tracker: Mutex<TranscriptDeltaTracker>,
    sessions: Mutex<SessionManager>,
    queue: Mutex<TaskQueue>,
    /// In-flight guard: the drain is serial by construction.
    processing: AtomicBool,
}

impl AlertEngine {
    /// Wire an engine over an existing connection and reasoning client.
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        client: Box<dyn ReasoningClient>,
        config: EngineConfig,
    ) -> Self {
        let store = AlertStore::new(Arc::clone(&conn), config.alert_cache_ttl);
        let context = ContextBuilder::new(
            Box::new(SqliteContextProvider::new(
                Arc::clone(&conn),
                config.context_lab_limit,
            )),
            TtlCache::new(config.context_cache_ttl),
        );
        let gateway = ReasoningGateway::new(client, &config);
        let dedup = Deduplicator::token_set(config.dedup_threshold);

        Self {
            store,
            context,
            gateway,
            dedup,
            tracker: Mutex::new(TranscriptDeltaTracker::new(config.max_batch_chars)),
            sessions: Mutex::new(SessionManager::new(config.session_alert_buffer)),
            queue: Mutex::new(TaskQueue::new()),
            processing: AtomicBool::new(false),
            config,
        }
    }

    /// Open the database at `path` and wire the engine against the local
    /// Ollama endpoint.
    pub fn open(path: impl AsRef<std::path::Path>, config: EngineConfig) -> Result<Self, EngineError> {
        let conn = open_database(path.as_ref())?;
        let client = OllamaClient::default_local()?;
        Ok(Self::new(
            Arc::new(Mutex::new(conn)),
            Box::new(client),
            config,
        ))
    }

    pub fn store(&self) -> &AlertStore {
        &self.store
    }

    // ── Session surface ────────────────────────────────────────────

    /// Begin tracking a consultation: fresh transcript cursor, session
    /// state, and an immediate high-priority analysis pass.
    pub fn start_session(&self, patient_id: &str, encounter_id: &str) {
        if let Ok(mut tracker) = self.tracker.lock() {
            tracker.reset(patient_id, encounter_id);
        }

        let first = match self.sessions.lock() {
            Ok(mut sessions) => sessions.start(patient_id, encounter_id),
            Err(_) => return,
        };
        if first {
            tracing::info!("First live session; periodic analysis is now active");
        }

        self.enqueue(QueueTask::new(
            TaskKind::RealTime,
            patient_id,
            encounter_id,
            self.config.priority_immediate,
        ));
    }

    /// Refresh the stored transcript for a live session.
    pub fn update_transcript(&self, patient_id: &str, encounter_id: &str, full_transcript: &str) {
        let active = self
            .sessions
            .lock()
            .map(|s| s.is_active(patient_id, encounter_id))
            .unwrap_or(false);
        if !active {
            tracing::debug!(patient_id, encounter_id, "Transcript update for inactive session ignored");
            return;
        }
        if let Ok(mut tracker) = self.tracker.lock() {
            tracker.update(patient_id, encounter_id, full_transcript);
        }
    }

    /// Close a consultation and queue the post-consultation review. Tasks
    /// already queued or in flight for this key still persist their
    /// results; transcript state is released once the review completes.
    pub fn end_session(&self, patient_id: &str, encounter_id: &str) {
        self.enqueue(QueueTask::new(
            TaskKind::PostConsultation,
            patient_id,
            encounter_id,
            self.config.priority_comprehensive,
        ));

        let last = match self.sessions.lock() {
            Ok(mut sessions) => sessions.end(patient_id, encounter_id),
            Err(_) => return,
        };
        if last {
            tracing::info!("Last session ended; periodic analysis is idle");
        }
    }

    pub fn active_session_count(&self) -> usize {
        self.sessions.lock().map(|s| s.active_count()).unwrap_or(0)
    }

    // ── Queue surface ──────────────────────────────────────────────

    fn enqueue(&self, task: QueueTask) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.enqueue(task);
        }
    }

    pub fn queued_tasks(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// One periodic sweep: queue a standard-priority real-time pass for
    /// every live session.
    pub fn enqueue_realtime_tick(&self) {
        let keys = match self.sessions.lock() {
            Ok(sessions) => sessions.active_keys(),
            Err(_) => return,
        };
        for (patient_id, encounter_id) in keys {
            self.enqueue(QueueTask::new(
                TaskKind::RealTime,
                &patient_id,
                &encounter_id,
                self.config.priority_standard,
            ));
        }
    }

    /// One drain step: pop and run at most one task. Returns whether a
    /// task ran. A tick that finds the engine already processing (or the
    /// queue empty) is a no-op.
    pub fn drain_tick(&self) -> bool {
        if self
            .processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        let task = self.queue.lock().ok().and_then(|mut q| q.pop());
        let ran = match task {
            Some(task) => {
                self.dispatch(&task);
                true
            }
            None => false,
        };

        self.processing.store(false, Ordering::SeqCst);
        ran
    }

    /// Drain until the queue is empty. Test and shutdown helper.
    pub fn drain_all(&self) {
        while self.drain_tick() {}
    }

    fn dispatch(&self, task: &QueueTask) {
        tracing::debug!(
            task_id = %task.id,
            kind = task.kind.as_str(),
            patient_id = %task.patient_id,
            encounter_id = %task.encounter_id,
            "Processing task"
        );
        match task.kind {
            TaskKind::RealTime => self.run_realtime(&task.patient_id, &task.encounter_id),
            TaskKind::PostConsultation => {
                self.run_comprehensive(&task.patient_id, &task.encounter_id)
            }
        }
        self.store.invalidate_key(&task.patient_id, &task.encounter_id);
        self.context.invalidate(&task.patient_id);
    }

    // ── Pipelines ──────────────────────────────────────────────────

    /// Real-time pass: unseen transcript only, gated on minimum content.
    fn run_realtime(&self, patient_id: &str, encounter_id: &str) {
        let delta = {
            let Ok(mut tracker) = self.tracker.lock() else {
                return;
            };
            let pending = tracker.pending_chars(patient_id, encounter_id);
            if pending < self.config.min_delta_chars {
                tracing::debug!(
                    patient_id,
                    encounter_id,
                    pending,
                    minimum = self.config.min_delta_chars,
                    "Real-time pass skipped: not enough new transcript"
                );
                return;
            }
            tracker.consume_delta(patient_id, encounter_id)
        };

        let Some(context) = self
            .context
            .analysis_context(patient_id, encounter_id, &delta)
        else {
            return;
        };

        let candidates = self.gateway.generate(&context, TaskKind::RealTime);
        if candidates.is_empty() {
            return;
        }

        let existing = self.store.active_for_encounter(patient_id, encounter_id);
        let kept = self.dedup.filter_candidates(candidates, &existing);
        let persisted = self.persist_candidates(patient_id, encounter_id, kept, TaskKind::RealTime);

        tracing::info!(
            patient_id,
            encounter_id,
            persisted,
            delta_chars = delta.chars().count(),
            "Real-time cycle complete"
        );
    }

    /// Post-consultation review: full transcript, no content gate. Active
    /// real-time alerts for the key are superseded before survivors are
    /// persisted, so the review's output replaces the live stream's.
    fn run_comprehensive(&self, patient_id: &str, encounter_id: &str) {
        let transcript = self
            .tracker
            .lock()
            .ok()
            .and_then(|t| t.full_transcript(patient_id, encounter_id).map(String::from))
            .unwrap_or_default();

        let Some(context) = self
            .context
            .analysis_context(patient_id, encounter_id, &transcript)
        else {
            return;
        };

        let candidates = self.gateway.generate(&context, TaskKind::PostConsultation);

        let superseded = self
            .store
            .resolve_active_realtime(patient_id, encounter_id);

        let existing = self.store.active_for_encounter(patient_id, encounter_id);
        let kept = self.dedup.filter_candidates(candidates, &existing);
        let persisted =
            self.persist_candidates(patient_id, encounter_id, kept, TaskKind::PostConsultation);

        tracing::info!(
            patient_id,
            encounter_id,
            superseded,
            persisted,
            "Post-consultation review complete"
        );

        // The session is gone; transcript state has served its purpose.
        let session_active = self
            .sessions
            .lock()
            .map(|s| s.is_active(patient_id, encounter_id))
            .unwrap_or(false);
        if !session_active {
            if let Ok(mut tracker) = self.tracker.lock() {
                tracker.remove(patient_id, encounter_id);
            }
        }
    }

    /// Store each surviving candidate; creates are independent, one
    /// failure never blocks the rest.
    fn persist_candidates(
        &self,
        patient_id: &str,
        encounter_id: &str,
        candidates: Vec<CandidateAlert>,
        kind: TaskKind,
    ) -> usize {
        let (category, is_real_time) = match kind {
            TaskKind::RealTime => (AlertCategory::RealTime, true),
            TaskKind::PostConsultation => (AlertCategory::PostConsultation, false),
        };

        let mut persisted = 0;
        for candidate in candidates {
            let mut request = CreateAlertRequest::new(
                patient_id,
                encounter_id,
                candidate.alert_type,
                candidate.severity,
                category,
                &candidate.title,
                &candidate.message,
            );
            request.suggestion = candidate.suggestion;
            request.confidence_score = candidate.confidence;
            request.source_reasoning = candidate.reasoning;
            request.processing_model = candidate.model;
            request.is_real_time = is_real_time;
            request.is_post_consultation = !is_real_time;

            if let Some(alert) = self.store.create(request) {
                persisted += 1;
                if let Ok(mut sessions) = self.sessions.lock() {
                    if let Some(session) = sessions.get_mut(patient_id, encounter_id) {
                        session.record_alert_title(&alert.title);
                    }
                }
            }
        }
        persisted
    }
}

// ───────────────────────────────────────────────────────────────────
// Background wiring
// ───────────────────────────────────────────────────────────────────

/// Sleep granularity for shutdown responsiveness.
const SLEEP_GRANULARITY: Duration = Duration::from_millis(250);

/// Handle over the engine's two background threads (queue drain and
/// periodic real-time enqueue). Graceful shutdown via `shutdown()` or
/// automatic cleanup on `Drop`.
pub struct EngineHandle {
    engine: Arc<AlertEngine>,
    shutdown: Arc<AtomicBool>,
    drain: Option<std::thread::JoinHandle<()>>,
    enqueue: Option<std::thread::JoinHandle<()>>,
}

impl EngineHandle {
    pub fn start(engine: Arc<AlertEngine>) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));

        let drain = {
            let engine = Arc::clone(&engine);
            let flag = Arc::clone(&shutdown);
            let interval = engine.config.drain_interval;
            std::thread::spawn(move || {
                tracing::info!(interval_ms = interval.as_millis() as u64, "Drain loop started");
                while sleep_until_shutdown(&flag, interval) {
                    engine.drain_tick();
                }
                tracing::info!("Drain loop shutting down");
            })
        };

        let enqueue = {
            let engine = Arc::clone(&engine);
            let flag = Arc::clone(&shutdown);
            let interval = engine.config.realtime_enqueue_interval;
            std::thread::spawn(move || {
                tracing::info!(
                    interval_ms = interval.as_millis() as u64,
                    "Periodic enqueue loop started"
                );
                while sleep_until_shutdown(&flag, interval) {
                    if engine.active_session_count() > 0 {
                        engine.enqueue_realtime_tick();
                    }
                }
                tracing::info!("Periodic enqueue loop shutting down");
            })
        };

        Self {
            engine,
            shutdown,
            drain: Some(drain),
            enqueue: Some(enqueue),
        }
    }

    pub fn engine(&self) -> &Arc<AlertEngine> {
        &self.engine
    }

    /// Request graceful shutdown. The task in flight, if any, completes.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(h) = self.drain.take() {
            let _ = h.join();
        }
        if let Some(h) = self.enqueue.take() {
            let _ = h.join();
        }
    }
}

/// Sleep `interval` in small increments. Returns false once shutdown is
/// requested.
fn sleep_until_shutdown(shutdown: &AtomicBool, interval: Duration) -> bool {
    let mut remaining = interval;
    while !remaining.is_zero() {
        if shutdown.load(Ordering::Relaxed) {
            return false;
        }
        let step = remaining.min(SLEEP_GRANULARITY);
        std::thread::sleep(step);
        remaining -= step;
    }
    !shutdown.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use crate::gateway::ollama::MockReasoningClient;
    use crate::models::enums::AlertStatus;
    use crate::models::AlertFilter;
    use std::sync::atomic::AtomicUsize;

    fn interaction_json() -> &'static str {
        r#"[{"alert_type": "drug_interaction", "severity": "warning",
             "title": "NSAID interaction", "message": "Warfarin with ibuprofen raises bleeding risk",
             "suggestion": "Consider acetaminophen", "confidence": 0.9,
             "reasoning": "anticoagulant plus NSAID"}]"#
    }

    fn seeded_conn() -> Arc<Mutex<Connection>> {
        let conn = open_memory_database().unwrap();
        conn.execute(
            "INSERT INTO patients (id, name, gender, birth_date, race)
             VALUES ('p1', 'Jane Rivera', 'female', '1968-04-12', NULL)",
            [],
        )
        .unwrap();
        Arc::new(Mutex::new(conn))
    }

    fn engine_with(response: &str) -> (AlertEngine, Arc<AtomicUsize>) {
        let mock = MockReasoningClient::new(response);
        let calls = mock.call_counter();
        let engine = AlertEngine::new(seeded_conn(), Box::new(mock), EngineConfig::default());
        (engine, calls)
    }

    fn long_transcript() -> String {
        "Patient reports she has started taking ibuprofen 400mg for knee pain \
         roughly three times per day over the last two weeks. She remains on \
         warfarin following the valve replacement and has not had an INR check \
         since the previous visit. Also mentions intermittent dizziness when \
         standing and some dark stools earlier this week, which she attributed \
         to diet. No chest pain. Appetite normal. Sleep unchanged."
            .to_string()
    }

    #[test]
    fn below_gate_transcript_makes_no_reasoning_calls() {
        let (engine, calls) = engine_with(interaction_json());

        engine.start_session("p1", "e1");
        engine.update_transcript("p1", "e1", "Hi there");
        engine.drain_all();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let page = engine.store().query(&AlertFilter::for_encounter("p1", "e1"));
        assert!(page.alerts.is_empty());
    }

    #[test]
    fn realtime_cycle_persists_one_active_alert() {
        let (engine, calls) = engine_with(interaction_json());

        engine.start_session("p1", "e1");
        engine.update_transcript("p1", "e1", &long_transcript());
        engine.drain_all();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let alerts = engine.store().active_for_encounter("p1", "e1");
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].status, AlertStatus::Active);
        assert!(alerts[0].is_real_time);
        assert_eq!(alerts[0].category, AlertCategory::RealTime);
        assert_eq!(alerts[0].processing_model.as_deref(), Some("medgemma:4b"));
    }

    #[test]
    fn repeated_cycles_do_not_duplicate_alerts() {
        let (engine, _) = engine_with(interaction_json());

        engine.start_session("p1", "e1");
        engine.update_transcript("p1", "e1", &long_transcript());
        engine.drain_all();

        // More transcript, same canned concern from the model.
        let extended = format!(
            "{} Doctor asks about bruising; patient denies any new bruises.",
            long_transcript()
        );
        engine.update_transcript("p1", "e1", &extended);
        engine.enqueue_realtime_tick();
        engine.drain_all();

        assert_eq!(engine.store().active_for_encounter("p1", "e1").len(), 1);
    }

    #[test]
    fn comprehensive_supersedes_realtime_and_persists_review() {
        let (engine, _) = engine_with(interaction_json());

        engine.start_session("p1", "e1");
        engine.update_transcript("p1", "e1", &long_transcript());
        engine.drain_all();
        let realtime_id = engine.store().active_for_encounter("p1", "e1")[0].id;

        engine.end_session("p1", "e1");
        engine.drain_all();

        let superseded = engine.store().get(&realtime_id).unwrap();
        assert_eq!(superseded.status, AlertStatus::Resolved, "audit preserved");

        let active = engine.store().active_for_encounter("p1", "e1");
        assert_eq!(active.len(), 1);
        assert!(active[0].is_post_consultation);
        assert_eq!(active[0].category, AlertCategory::PostConsultation);
    }

    #[test]
    fn work_queued_before_session_end_still_persists() {
        let (engine, calls) = engine_with(interaction_json());

        engine.start_session("p1", "e1");
        engine.update_transcript("p1", "e1", &long_transcript());
        // Session ends with the immediate task still queued.
        engine.end_session("p1", "e1");
        engine.drain_all();

        // Both the real-time pass and the review ran.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let page = engine.store().query(&AlertFilter::for_encounter("p1", "e1"));
        assert_eq!(page.total_count, 2);
    }

    #[test]
    fn session_lifecycle_drives_queue_and_timer_state() {
        let (engine, _) = engine_with("[]");

        engine.start_session("p1", "e1");
        assert_eq!(engine.active_session_count(), 1);
        assert_eq!(engine.queued_tasks(), 1, "immediate task queued");

        engine.enqueue_realtime_tick();
        assert_eq!(engine.queued_tasks(), 2);

        engine.end_session("p1", "e1");
        assert_eq!(engine.active_session_count(), 0);
        assert_eq!(engine.queued_tasks(), 3, "review task queued");
    }

    #[test]
    fn drain_tick_is_a_noop_when_queue_is_empty() {
        let (engine, _) = engine_with("[]");
        assert!(!engine.drain_tick());
    }

    #[test]
    fn malformed_model_output_degrades_to_no_alerts() {
        let (engine, calls) = engine_with("the model rambled instead of emitting JSON");

        engine.start_session("p1", "e1");
        engine.update_transcript("p1", "e1", &long_transcript());
        engine.drain_all();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(engine.store().active_for_encounter("p1", "e1").is_empty());
    }

    #[test]
    fn transcript_update_for_inactive_session_is_ignored() {
        let (engine, calls) = engine_with(interaction_json());

        engine.update_transcript("p1", "e1", &long_transcript());
        engine.enqueue_realtime_tick();
        engine.drain_all();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handle_shutdown_joins_cleanly() {
        let (engine, _) = engine_with("[]");
        let handle = EngineHandle::start(Arc::new(engine));
        handle.engine().start_session("p1", "e1");
        handle.shutdown();
        drop(handle);
    }

    #[test]
    fn sleep_until_shutdown_honors_preset_flag() {
        let flag = AtomicBool::new(true);
        assert!(!sleep_until_shutdown(&flag, Duration::from_secs(60)));
    }
}
