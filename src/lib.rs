//! Consult Sentinel — background clinical alert engine.
//!
//! Watches live consultation transcripts and raises clinician-facing
//! alerts through two pipelines: an incremental real-time pass over
//! unseen transcript while the session is live, and a comprehensive
//! post-consultation review that supersedes the real-time stream.
//!
//! Typical wiring:
//!
//! ```no_run
//! use std::sync::Arc;
//! use consult_sentinel::config::EngineConfig;
//! use consult_sentinel::engine::{AlertEngine, EngineHandle};
//!
//! consult_sentinel::init_tracing();
//! let engine = Arc::new(AlertEngine::open("clinic.db", EngineConfig::default()).unwrap());
//! let handle = EngineHandle::start(Arc::clone(&engine));
//!
//! engine.start_session("patient-1", "encounter-7");
//! engine.update_transcript("patient-1", "encounter-7", "Patient reports ...");
//! // ... consultation proceeds ...
//! engine.end_session("patient-1", "encounter-7");
//! drop(handle); // joins background threads
//! ```

pub mod cache;
pub mod config;
pub mod context;
pub mod db;
pub mod dedup;
pub mod delta;
pub mod engine;
pub mod gateway;
pub mod models;
pub mod queue;
pub mod session;
pub mod store;

use tracing_subscriber::EnvFilter;

/// Initialize tracing from `RUST_LOG`, falling back to the crate default.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();
}
