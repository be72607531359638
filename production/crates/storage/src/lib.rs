pub mod memory;
pub mod postgres;

pub use memory::MemoryStorage;
pub use postgres::{PostgresConfig, PostgresStorage};

use async_trait::async_trait;
use kernel_types::{
    Operation, OperationId, OperationQuery, OperationStatus, OperationType, Result,
    StateTransitionRecord, UnifiedOperationMetadata,
};
use std::collections::HashMap;

/// Persistence for operations, their metadata and transition history.
///
/// Implementations only store what they are given; lifecycle rules and
/// per-operation serialization are enforced by the caller.
#[async_trait]
pub trait OperationRepository: Send + Sync {
    /// Persist a new operation together with its metadata record.
    async fn insert_operation(
        &self,
        operation: &Operation,
        metadata: &UnifiedOperationMetadata,
    ) -> Result<()>;

    async fn get_operation(&self, id: OperationId) -> Result<Option<Operation>>;

    /// Overwrite a stored operation and its metadata as one unit.
    async fn update_operation(
        &self,
        operation: &Operation,
        metadata: &UnifiedOperationMetadata,
    ) -> Result<()>;

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Operation>>;

    /// Filtered window, newest first, plus the filtered total.
    async fn list_operations(&self, query: &OperationQuery) -> Result<(Vec<Operation>, usize)>;

    async fn get_metadata(&self, id: OperationId) -> Result<Option<UnifiedOperationMetadata>>;

    /// Write operation, metadata and the new history record as one unit.
    async fn commit_transition(
        &self,
        operation: &Operation,
        metadata: &UnifiedOperationMetadata,
        record: &StateTransitionRecord,
    ) -> Result<()>;

    async fn get_transitions(&self, id: OperationId) -> Result<Vec<StateTransitionRecord>>;

    async fn count_by_status(&self) -> Result<HashMap<OperationStatus, usize>>;

    async fn count_by_type(&self) -> Result<HashMap<OperationType, usize>>;
}
