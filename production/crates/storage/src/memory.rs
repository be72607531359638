use async_trait::async_trait;
use kernel_types::{
    Error, Operation, OperationId, OperationQuery, OperationStatus, OperationType, Result,
    StateTransitionRecord, UnifiedOperationMetadata,
};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::OperationRepository;

#[derive(Default)]
struct MemoryState {
    operations: HashMap<OperationId, Operation>,
    metadata: HashMap<OperationId, UnifiedOperationMetadata>,
    transitions: HashMap<OperationId, Vec<StateTransitionRecord>>,
    idempotency: HashMap<String, OperationId>,
}

/// Process-local repository backed by hash maps.
#[derive(Default)]
pub struct MemoryStorage {
    state: RwLock<MemoryState>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OperationRepository for MemoryStorage {
    async fn insert_operation(
        &self,
        operation: &Operation,
        metadata: &UnifiedOperationMetadata,
    ) -> Result<()> {
        let mut state = self.state.write().await;

        if state.operations.contains_key(&operation.id) {
            return Err(Error::DuplicateOperation(operation.id));
        }
        if let Some(key) = &operation.idempotency_key {
            if state.idempotency.contains_key(key) {
                return Err(Error::DuplicateIdempotencyKey(key.clone()));
            }
            state.idempotency.insert(key.clone(), operation.id);
        }

        state.operations.insert(operation.id, operation.clone());
        state.metadata.insert(operation.id, metadata.clone());
        state.transitions.insert(operation.id, Vec::new());

        debug!("Stored operation {} in memory", operation.id);
        Ok(())
    }

    async fn get_operation(&self, id: OperationId) -> Result<Option<Operation>> {
        Ok(self.state.read().await.operations.get(&id).cloned())
    }

    async fn update_operation(
        &self,
        operation: &Operation,
        metadata: &UnifiedOperationMetadata,
    ) -> Result<()> {
        let mut state = self.state.write().await;

        if !state.operations.contains_key(&operation.id) {
            return Err(Error::OperationNotFound(operation.id));
        }
        if !state.metadata.contains_key(&operation.id) {
            return Err(Error::MetadataNotFound(operation.id));
        }

        state.operations.insert(operation.id, operation.clone());
        state.metadata.insert(operation.id, metadata.clone());
        Ok(())
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Operation>> {
        let state = self.state.read().await;
        Ok(state
            .idempotency
            .get(key)
            .and_then(|id| state.operations.get(id))
            .cloned())
    }

    async fn list_operations(&self, query: &OperationQuery) -> Result<(Vec<Operation>, usize)> {
        let state = self.state.read().await;

        let mut matching: Vec<&Operation> = state
            .operations
            .values()
            .filter(|op| query.matches(op))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));

        let total = matching.len();
        let page = matching
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect();

        Ok((page, total))
    }

    async fn get_metadata(&self, id: OperationId) -> Result<Option<UnifiedOperationMetadata>> {
        Ok(self.state.read().await.metadata.get(&id).cloned())
    }

    async fn commit_transition(
        &self,
        operation: &Operation,
        metadata: &UnifiedOperationMetadata,
        record: &StateTransitionRecord,
    ) -> Result<()> {
        let mut state = self.state.write().await;

        if !state.operations.contains_key(&operation.id) {
            return Err(Error::OperationNotFound(operation.id));
        }
        if !state.metadata.contains_key(&operation.id) {
            return Err(Error::MetadataNotFound(operation.id));
        }

        state.operations.insert(operation.id, operation.clone());
        state.metadata.insert(operation.id, metadata.clone());
        state
            .transitions
            .entry(operation.id)
            .or_default()
            .push(record.clone());

        Ok(())
    }

    async fn get_transitions(&self, id: OperationId) -> Result<Vec<StateTransitionRecord>> {
        let state = self.state.read().await;
        if !state.operations.contains_key(&id) {
            return Err(Error::OperationNotFound(id));
        }
        Ok(state.transitions.get(&id).cloned().unwrap_or_default())
    }

    async fn count_by_status(&self) -> Result<HashMap<OperationStatus, usize>> {
        let state = self.state.read().await;
        let mut counts = HashMap::new();
        for op in state.operations.values() {
            *counts.entry(op.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn count_by_type(&self) -> Result<HashMap<OperationType, usize>> {
        let state = self.state.read().await;
        let mut counts = HashMap::new();
        for op in state.operations.values() {
            *counts.entry(op.operation_type).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use kernel_types::{
        BlockchainRefs, ClockSource, OperationTiming, Priority, SecurityMode, SyncQuality,
        TimingContext,
    };

    fn sample(operation_type: OperationType, key: Option<&str>) -> (Operation, UnifiedOperationMetadata) {
        let id = OperationId::new();
        let now = Utc::now();
        let op = Operation {
            id,
            batch_ref: "BATCH-20260101000000-1".to_string(),
            kernel_op_id: format!("KOP-{}-{}-1", operation_type.tag(), id.short()),
            operation_type,
            security_mode: SecurityMode::default(),
            priority: Priority::default(),
            status: OperationStatus::Pending,
            payment_context: None,
            data_context: None,
            blockchain_targets: Vec::new(),
            blockchain_refs: BlockchainRefs::default(),
            timing: OperationTiming::new(now),
            error_info: None,
            callback_url: None,
            idempotency_key: key.map(str::to_string),
            ttl_seconds: 3600,
            retry_count: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        let metadata = UnifiedOperationMetadata {
            protocol_version: "1.0".to_string(),
            operation_id: id,
            batch_ref: op.batch_ref.clone(),
            kernel_op_id: op.kernel_op_id.clone(),
            operation_type,
            security_mode: op.security_mode,
            payment_context: None,
            data_context: None,
            timing_context: TimingContext {
                batch_start_ts: now,
                batch_end_ts: None,
                duration_ns: None,
                clock_source: ClockSource::LogicalMonotonic,
                sync_quality: SyncQuality::Synchronized,
            },
            blockchain_refs: BlockchainRefs::default(),
            audit_trail: Vec::new(),
        };
        (op, metadata)
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let storage = MemoryStorage::new();
        let (op, metadata) = sample(OperationType::DataAttestation, None);

        storage.insert_operation(&op, &metadata).await.unwrap();

        assert_eq!(storage.get_operation(op.id).await.unwrap(), Some(op.clone()));
        assert_eq!(storage.get_metadata(op.id).await.unwrap(), Some(metadata));
        assert!(storage.get_transitions(op.id).await.unwrap().is_empty());
        assert!(matches!(
            storage.insert_operation(&op, &sample(OperationType::DataAttestation, None).1).await,
            Err(Error::DuplicateOperation(_))
        ));
    }

    #[tokio::test]
    async fn test_update_writes_operation_and_metadata() {
        let storage = MemoryStorage::new();
        let (mut op, mut metadata) = sample(OperationType::StateTransition, None);
        storage.insert_operation(&op, &metadata).await.unwrap();

        op.priority = Priority::High;
        metadata.protocol_version = "1.1".to_string();
        storage.update_operation(&op, &metadata).await.unwrap();

        assert_eq!(
            storage.get_operation(op.id).await.unwrap().unwrap().priority,
            Priority::High
        );
        assert_eq!(
            storage.get_metadata(op.id).await.unwrap().unwrap().protocol_version,
            "1.1"
        );
        assert!(storage.get_transitions(op.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_idempotency_key_is_unique() {
        let storage = MemoryStorage::new();
        let (first, first_meta) = sample(OperationType::PaymentWitness, Some("order-1"));
        let (second, second_meta) = sample(OperationType::PaymentWitness, Some("order-1"));

        storage.insert_operation(&first, &first_meta).await.unwrap();
        let err = storage.insert_operation(&second, &second_meta).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateIdempotencyKey(_)));

        let found = storage.find_by_idempotency_key("order-1").await.unwrap().unwrap();
        assert_eq!(found.id, first.id);
        assert!(storage.find_by_idempotency_key("order-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_newest_first_with_filters() {
        let storage = MemoryStorage::new();
        let mut ids = Vec::new();
        for i in 0..5 {
            let kind = if i % 2 == 0 {
                OperationType::DataAttestation
            } else {
                OperationType::PaymentWitness
            };
            let (mut op, meta) = sample(kind, None);
            op.created_at = Utc::now() + Duration::seconds(i);
            storage.insert_operation(&op, &meta).await.unwrap();
            ids.push(op.id);
        }

        let (page, total) = storage
            .list_operations(&OperationQuery {
                limit: 2,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.iter().map(|o| o.id).collect::<Vec<_>>(), vec![ids[4], ids[3]]);

        let (page, total) = storage
            .list_operations(&OperationQuery {
                operation_type: Some(OperationType::PaymentWitness),
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert!(page.iter().all(|o| o.operation_type == OperationType::PaymentWitness));
    }

    #[tokio::test]
    async fn test_commit_transition_appends_history() {
        let storage = MemoryStorage::new();
        let (mut op, meta) = sample(OperationType::StateTransition, None);
        storage.insert_operation(&op, &meta).await.unwrap();

        op.status = OperationStatus::Queued;
        let record = StateTransitionRecord {
            from: OperationStatus::Pending,
            to: OperationStatus::Queued,
            timestamp: Utc::now(),
            reason: None,
        };
        storage.commit_transition(&op, &meta, &record).await.unwrap();

        assert_eq!(storage.get_transitions(op.id).await.unwrap(), vec![record]);
        let counts = storage.count_by_status().await.unwrap();
        assert_eq!(counts.get(&OperationStatus::Queued), Some(&1));
        assert_eq!(counts.get(&OperationStatus::Pending), None);
    }

    #[tokio::test]
    async fn test_unknown_operation() {
        let storage = MemoryStorage::new();
        let (op, meta) = sample(OperationType::ConsensusRound, None);

        assert!(storage.get_operation(op.id).await.unwrap().is_none());
        assert!(matches!(
            storage.update_operation(&op, &meta).await,
            Err(Error::OperationNotFound(_))
        ));
    }
}
