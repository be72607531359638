//! Shared application state for the API server

use kernel_orchestrator::{OperationOrchestrator, TimingCoordinator};
use std::sync::Arc;

/// Shared application state passed to all handlers
#[derive(Clone)]
pub struct AppState {
    /// Operation lifecycle service
    pub orchestrator: Arc<OperationOrchestrator>,
    /// Clock used for timestamps and certificates
    pub timing: Arc<TimingCoordinator>,
}

impl AppState {
    /// Create new application state around a built orchestrator
    pub fn new(orchestrator: Arc<OperationOrchestrator>) -> Self {
        let timing = Arc::clone(orchestrator.timing());
        Self {
            orchestrator,
            timing,
        }
    }
}
