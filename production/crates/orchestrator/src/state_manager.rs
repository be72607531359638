//! Operation lifecycle state machine.
//!
//! Every status change goes through here. Transitions for one operation are
//! serialized by a per-operation async mutex held in a lock table; a waiter
//! re-reads the stored status after acquiring the lock, so a stale `from`
//! is rejected instead of overwriting a newer state. Operations with
//! different ids never contend.

use crate::error::{OrchestrationError, Result};
use crate::metadata::{actors, events, MetadataRegistry};
use kernel_storage::OperationRepository;
use kernel_types::{
    Operation, OperationId, OperationStatus, StateTransitionRecord, UnifiedOperationMetadata,
};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use OperationStatus::*;

/// Statuses reachable in one step from `status`.
pub fn allowed_transitions(status: OperationStatus) -> &'static [OperationStatus] {
    match status {
        Pending => &[Queued, Cancelled],
        Queued => &[Processing, Cancelled],
        Processing => &[Witnessed, Failed],
        Witnessed => &[Settled, Failed],
        Failed => &[Pending, Cancelled],
        Settled | Cancelled => &[],
    }
}

pub fn is_valid_transition(from: OperationStatus, to: OperationStatus) -> bool {
    allowed_transitions(from).contains(&to)
}

/// Statuses from which a cancel is accepted.
pub fn is_cancellable(status: OperationStatus) -> bool {
    matches!(status, Pending | Queued | Failed)
}

/// Holds the per-operation mutex; drops the table entry once nobody else
/// is waiting on it.
struct OperationLock<'a> {
    manager: &'a StateManager,
    id: OperationId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for OperationLock<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.manager.release(self.id);
    }
}

pub struct StateManager {
    repository: Arc<dyn OperationRepository>,
    metadata: Arc<MetadataRegistry>,
    locks: StdMutex<HashMap<OperationId, Arc<Mutex<()>>>>,
}

impl StateManager {
    pub fn new(repository: Arc<dyn OperationRepository>, metadata: Arc<MetadataRegistry>) -> Self {
        Self {
            repository,
            metadata,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    async fn lock(&self, id: OperationId) -> Result<OperationLock<'_>> {
        let mutex = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|_| OrchestrationError::Internal("lock table poisoned".to_string()))?;
            locks.entry(id).or_default().clone()
        };

        let guard = mutex.lock_owned().await;
        Ok(OperationLock {
            manager: self,
            id,
            guard: Some(guard),
        })
    }

    fn release(&self, id: OperationId) {
        if let Ok(mut locks) = self.locks.lock() {
            let idle = locks
                .get(&id)
                .map(|m| Arc::strong_count(m) == 1)
                .unwrap_or(false);
            if idle {
                locks.remove(&id);
            }
        }
    }

    /// Number of operations with a live lock entry.
    pub fn active_locks(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }

    async fn load(&self, id: OperationId) -> Result<(Operation, UnifiedOperationMetadata)> {
        let operation = self
            .repository
            .get_operation(id)
            .await?
            .ok_or(OrchestrationError::OperationNotFound(id))?;
        let metadata = self
            .repository
            .get_metadata(id)
            .await?
            .ok_or(kernel_types::Error::MetadataNotFound(id))?;
        Ok((operation, metadata))
    }

    /// Core transition: under the operation's lock, `check` validates the
    /// stored status, `mutate` applies field updates, and the new status,
    /// history record and audit entry are committed together.
    async fn apply<C, F>(
        &self,
        id: OperationId,
        to: OperationStatus,
        reason: Option<String>,
        check: C,
        mutate: F,
    ) -> Result<Operation>
    where
        C: FnOnce(OperationStatus) -> Result<()> + Send,
        F: FnOnce(&mut Operation, &mut UnifiedOperationMetadata) + Send,
    {
        let _lock = self.lock(id).await?;

        let (mut operation, mut metadata) = self.load(id).await?;
        let from = operation.status;
        check(from)?;
        if !is_valid_transition(from, to) {
            return Err(OrchestrationError::InvalidTransition { id, from, to });
        }

        let now = self.metadata_now();
        self.metadata.add_audit_entry(
            &mut metadata,
            events::STATE_TRANSITION,
            actors::STATE_MANAGER,
            json!({
                "from": from,
                "to": to,
                "reason": reason,
            }),
        );

        mutate(&mut operation, &mut metadata);

        operation.status = to;
        operation.updated_at = now;
        operation.completed_at = if to.is_completed() { Some(now) } else { None };

        let record = StateTransitionRecord {
            from,
            to,
            timestamp: now,
            reason,
        };
        self.repository
            .commit_transition(&operation, &metadata, &record)
            .await?;

        info!("Operation {} transitioned {} -> {}", id, from, to);
        Ok(operation)
    }

    fn metadata_now(&self) -> chrono::DateTime<chrono::Utc> {
        self.metadata.timing().now()
    }

    /// Move `id` from `from` to `to`.
    pub async fn transition(
        &self,
        id: OperationId,
        from: OperationStatus,
        to: OperationStatus,
        reason: Option<String>,
    ) -> Result<Operation> {
        self.transition_with(id, from, to, reason, |_, _| {}).await
    }

    /// Like `transition`, applying `mutate` inside the same critical section.
    pub async fn transition_with<F>(
        &self,
        id: OperationId,
        from: OperationStatus,
        to: OperationStatus,
        reason: Option<String>,
        mutate: F,
    ) -> Result<Operation>
    where
        F: FnOnce(&mut Operation, &mut UnifiedOperationMetadata) + Send,
    {
        if !is_valid_transition(from, to) {
            return Err(OrchestrationError::InvalidTransition { id, from, to });
        }

        self.apply(
            id,
            to,
            reason,
            |actual| {
                if actual == from {
                    Ok(())
                } else {
                    Err(OrchestrationError::StateMismatch {
                        id,
                        expected: from,
                        actual,
                    })
                }
            },
            mutate,
        )
        .await
    }

    /// Field updates that do not change the status.
    pub async fn update<F>(&self, id: OperationId, mutate: F) -> Result<Operation>
    where
        F: FnOnce(&mut Operation, &mut UnifiedOperationMetadata) + Send,
    {
        let _lock = self.lock(id).await?;

        let (mut operation, mut metadata) = self.load(id).await?;
        let status = operation.status;
        mutate(&mut operation, &mut metadata);
        operation.status = status;
        operation.updated_at = self.metadata_now();

        self.repository.update_operation(&operation, &metadata).await?;

        debug!("Updated operation {}", id);
        Ok(operation)
    }

    pub async fn cancel(&self, id: OperationId, reason: Option<String>) -> Result<Operation> {
        self.cancel_with(id, reason, |_, _| {}).await
    }

    /// Cancel from pending, queued or failed.
    pub async fn cancel_with<F>(
        &self,
        id: OperationId,
        reason: Option<String>,
        mutate: F,
    ) -> Result<Operation>
    where
        F: FnOnce(&mut Operation, &mut UnifiedOperationMetadata) + Send,
    {
        self.apply(
            id,
            Cancelled,
            reason,
            |status| {
                if is_cancellable(status) {
                    Ok(())
                } else {
                    Err(OrchestrationError::NotCancellable { id, status })
                }
            },
            mutate,
        )
        .await
    }

    pub async fn retry(&self, id: OperationId) -> Result<Operation> {
        self.retry_with(id, |_, _| {}).await
    }

    /// failed -> pending, counting the retry.
    pub async fn retry_with<F>(&self, id: OperationId, mutate: F) -> Result<Operation>
    where
        F: FnOnce(&mut Operation, &mut UnifiedOperationMetadata) + Send,
    {
        self.apply(
            id,
            Pending,
            Some("retry".to_string()),
            |status| {
                if status == Failed {
                    Ok(())
                } else {
                    Err(OrchestrationError::NotRetryable { id, status })
                }
            },
            |operation, metadata| {
                operation.retry_count = operation.retry_count.saturating_add(1);
                mutate(operation, metadata);
            },
        )
        .await
    }

    pub async fn current_state(&self, id: OperationId) -> Result<OperationStatus> {
        self.repository
            .get_operation(id)
            .await?
            .map(|op| op.status)
            .ok_or(OrchestrationError::OperationNotFound(id))
    }

    pub async fn history(&self, id: OperationId) -> Result<Vec<StateTransitionRecord>> {
        if self.repository.get_operation(id).await?.is_none() {
            return Err(OrchestrationError::OperationNotFound(id));
        }
        Ok(self.repository.get_transitions(id).await?)
    }

    pub async fn valid_next_states(&self, id: OperationId) -> Result<Vec<OperationStatus>> {
        let status = self.current_state(id).await?;
        Ok(allowed_transitions(status).to_vec())
    }

    /// Operation count per status; every status is present.
    pub async fn counts_by_state(&self) -> Result<BTreeMap<OperationStatus, usize>> {
        let counts = self.repository.count_by_status().await?;
        Ok(OperationStatus::ALL
            .iter()
            .map(|status| (*status, counts.get(status).copied().unwrap_or(0)))
            .collect())
    }
}
