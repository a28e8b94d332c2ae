use std::time::Duration;

/// Every tunable of the alert engine in one place, dependency-injected
/// into the orchestrator rather than read from globals.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Model to use for reasoning calls (e.g., "medgemma:4b").
    pub model_name: String,
    /// Queue drain tick period.
    pub drain_interval: Duration,
    /// Periodic real-time enqueue period while at least one session is live.
    pub realtime_enqueue_interval: Duration,
    /// Minimum unseen transcript characters before a real-time call is worth it.
    pub min_delta_chars: usize,
    /// Delta truncation: keep at most this many of the most recent characters.
    pub max_batch_chars: usize,
    /// TTL for assembled patient context (changes slowly).
    pub context_cache_ttl: Duration,
    /// TTL for alert query results (churns with every processing cycle).
    pub alert_cache_ttl: Duration,
    /// Message similarity at or above this is a duplicate.
    pub dedup_threshold: f64,
    /// Attempts per real-time gateway call.
    pub realtime_attempts: u32,
    /// Attempts per comprehensive gateway call.
    pub comprehensive_attempts: u32,
    /// Per-call timeout for real-time analysis.
    pub realtime_timeout: Duration,
    /// Per-call timeout for comprehensive analysis.
    pub comprehensive_timeout: Duration,
    /// Candidate cap per real-time cycle (alert-fatigue guard).
    pub realtime_max_alerts: usize,
    /// Candidate cap per comprehensive run.
    pub comprehensive_max_alerts: usize,
    /// Priority of the immediate task enqueued on session start.
    pub priority_immediate: i32,
    /// Priority of comprehensive (post-consultation) tasks.
    pub priority_comprehensive: i32,
    /// Priority of periodic real-time tasks.
    pub priority_standard: i32,
    /// Lab results pulled into the reasoning context.
    pub context_lab_limit: u32,
    /// Recent alert titles kept per session (oldest trimmed first).
    pub session_alert_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_name: "medgemma:4b".to_string(),
            drain_interval: Duration::from_secs(2),
            realtime_enqueue_interval: Duration::from_secs(30),
            min_delta_chars: 20,
            max_batch_chars: 4000,
            context_cache_ttl: Duration::from_secs(600),
            alert_cache_ttl: Duration::from_secs(300),
            dedup_threshold: 0.8,
            realtime_attempts: 2,
            comprehensive_attempts: 3,
            realtime_timeout: Duration::from_secs(15),
            comprehensive_timeout: Duration::from_secs(60),
            realtime_max_alerts: 3,
            comprehensive_max_alerts: 10,
            priority_immediate: 10,
            priority_comprehensive: 8,
            priority_standard: 5,
            context_lab_limit: 20,
            session_alert_buffer: 20,
        }
    }
}

/// Default log filter when RUST_LOG is not set.
pub fn default_log_filter() -> &'static str {
    "consult_sentinel=info"
}
