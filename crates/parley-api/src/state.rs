//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use parley_chat::ConversationOrchestrator;
use parley_core::config::ParleyConfig;

/// Shared application state, passed to handlers via axum's `State` extractor.
///
/// Everything is behind `Arc`, so cloning per request is cheap.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ParleyConfig>,
    pub orchestrator: Arc<ConversationOrchestrator>,
    /// Server start time for uptime reporting.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: ParleyConfig, orchestrator: Arc<ConversationOrchestrator>) -> Self {
        Self {
            config: Arc::new(config),
            orchestrator,
            start_time: Instant::now(),
        }
    }
}
