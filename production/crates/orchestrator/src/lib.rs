//! Kernel Operation Orchestration
//!
//! This crate drives an operation from admission to settlement:
//!
//! 1. **Admission**: `OperationOrchestrator::create_operation` validates the
//!    request, persists the operation with its unified metadata and queues it
//! 2. **Pipeline**: a dispatcher runs each queued operation through the
//!    witness, contract and settlement collaborators
//! 3. **Lifecycle**: every status change goes through the `StateManager`,
//!    which serializes transitions per operation
//! 4. **Timing**: the `TimingCoordinator` stamps, measures and certifies
//! 5. **Expiry**: the `TtlSweeper` cancels operations that waited too long

pub mod callback;
pub mod config;
pub mod error;
pub mod metadata;
pub mod service;
pub mod state_manager;
pub mod timing;
pub mod ttl_sweeper;

pub use callback::{CallbackNotifier, HttpCallbackNotifier};
pub use config::{OrchestrationConfig, OrchestrationConfigBuilder};
pub use error::{OrchestrationError, Result};
pub use metadata::{MetadataRegistry, TimelineEntry};
pub use service::{
    ListParams, OperationOrchestrator, OperationOrchestratorBuilder, OperationPage,
    OperationSummary,
};
pub use state_manager::StateManager;
pub use timing::{
    ComplianceCheck, ComplianceLevel, LatencyMeasurement, SyncStatus, TimestampCertificate,
    TimestampReading, TimingCoordinator,
};
pub use ttl_sweeper::{TtlSweeper, TtlSweeperBuilder};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::OrchestrationConfig;
    pub use crate::error::{OrchestrationError, Result};
    pub use crate::service::OperationOrchestrator;
    pub use crate::state_manager::StateManager;
    pub use crate::timing::TimingCoordinator;
    pub use crate::ttl_sweeper::TtlSweeper;
}
