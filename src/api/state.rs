use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::orchestrator::TransferOrchestrator;
use crate::registry::ConnectionRegistry;

/// Shared application state for API handlers
#[derive(Clone)]
pub struct AppState {
    /// Live agent connections
    pub registry: Arc<ConnectionRegistry>,

    /// Transfer table owner
    pub orchestrator: Arc<TransferOrchestrator>,

    /// Application start time
    pub start_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(registry: Arc<ConnectionRegistry>, orchestrator: Arc<TransferOrchestrator>) -> Self {
        Self {
            registry,
            orchestrator,
            start_time: Utc::now(),
        }
    }

    /// Get process uptime in seconds
    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.start_time).num_seconds()
    }
}
