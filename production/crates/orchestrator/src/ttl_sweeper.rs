//! TTL enforcement for operations that never left the queue.
//!
//! Every sweep cancels `pending` and `queued` operations whose
//! `createdAt + ttlSeconds` has passed. A pipeline that claims the operation
//! first wins; the sweeper's cancel then fails in the state manager and is
//! ignored.

use crate::config::OrchestrationConfig;
use crate::error::{OrchestrationError, Result};
use crate::metadata::{actors, events, MetadataRegistry};
use crate::state_manager::StateManager;
use futures::future::join_all;
use kernel_storage::OperationRepository;
use kernel_types::{Operation, OperationQuery, OperationStatus};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// TTL sweeper service.
pub struct TtlSweeper {
    config: OrchestrationConfig,
    repository: Arc<dyn OperationRepository>,
    state: Arc<StateManager>,
    metadata: Arc<MetadataRegistry>,
    shutdown: Arc<RwLock<bool>>,
}

impl TtlSweeper {
    /// Start the sweeper in the background
    pub fn start(self: Arc<Self>) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            info!("TTL sweeper started");

            match self.run().await {
                Ok(()) => {
                    info!("TTL sweeper stopped normally");
                    Ok(())
                }
                Err(e) => {
                    error!("TTL sweeper error: {}", e);
                    Err(e)
                }
            }
        })
    }

    async fn run(&self) -> Result<()> {
        let mut interval = interval(self.config.ttl_sweep_interval);

        loop {
            if *self.shutdown.read().await {
                info!("Shutdown signal received, stopping TTL sweeper");
                return Ok(());
            }

            interval.tick().await;

            if let Err(e) = self.sweep_once().await {
                error!("Error sweeping expired operations: {}", e);
            }
        }
    }

    /// Cancel every expired operation still waiting to run. Returns how many
    /// were cancelled.
    pub async fn sweep_once(&self) -> Result<usize> {
        let now = self.metadata.timing().now();
        let mut expired = Vec::new();

        for status in [OperationStatus::Pending, OperationStatus::Queued] {
            let query = OperationQuery {
                status: Some(status),
                operation_type: None,
                offset: 0,
                limit: usize::MAX,
            };
            let (operations, _) = self.repository.list_operations(&query).await?;
            expired.extend(operations.into_iter().filter(|op| op.is_expired(now)));
        }

        if expired.is_empty() {
            return Ok(0);
        }

        let results = join_all(expired.iter().map(|op| self.expire(op))).await;
        let cancelled = results.into_iter().filter(|cancelled| *cancelled).count();

        if cancelled > 0 {
            info!("TTL sweep cancelled {} expired operations", cancelled);
        }
        Ok(cancelled)
    }

    async fn expire(&self, operation: &Operation) -> bool {
        let registry = &self.metadata;
        let ttl_seconds = operation.ttl_seconds;

        let result = self
            .state
            .cancel_with(operation.id, Some("ttl_expired".to_string()), move |_, meta| {
                registry.add_audit_entry(
                    meta,
                    events::OPERATION_CANCELLED,
                    actors::TTL_SWEEPER,
                    json!({
                        "reason": "ttl_expired",
                        "ttlSeconds": ttl_seconds,
                    }),
                );
            })
            .await;

        match result {
            Ok(_) => {
                warn!(
                    "Operation {} expired after {}s without completing",
                    operation.id, ttl_seconds
                );
                true
            }
            Err(OrchestrationError::NotCancellable { status, .. }) => {
                debug!(
                    "Operation {} moved to {} before it could be expired",
                    operation.id, status
                );
                false
            }
            Err(e) => {
                error!("Failed to expire operation {}: {}", operation.id, e);
                false
            }
        }
    }

    /// Initiate graceful shutdown
    pub async fn shutdown(&self) {
        info!("Initiating TTL sweeper shutdown");
        *self.shutdown.write().await = true;
    }
}

/// Builder for TtlSweeper
pub struct TtlSweeperBuilder {
    config: Option<OrchestrationConfig>,
    repository: Option<Arc<dyn OperationRepository>>,
    state: Option<Arc<StateManager>>,
    metadata: Option<Arc<MetadataRegistry>>,
}

impl TtlSweeperBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            repository: None,
            state: None,
            metadata: None,
        }
    }

    pub fn with_config(mut self, config: OrchestrationConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_repository(mut self, repository: Arc<dyn OperationRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn with_state_manager(mut self, state: Arc<StateManager>) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_metadata_registry(mut self, metadata: Arc<MetadataRegistry>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn build(self) -> Result<Arc<TtlSweeper>> {
        let config = self.config.unwrap_or_default();
        let repository = self
            .repository
            .ok_or_else(|| OrchestrationError::Config("OperationRepository is required".to_string()))?;
        let state = self
            .state
            .ok_or_else(|| OrchestrationError::Config("StateManager is required".to_string()))?;
        let metadata = self
            .metadata
            .ok_or_else(|| OrchestrationError::Config("MetadataRegistry is required".to_string()))?;

        Ok(Arc::new(TtlSweeper {
            config,
            repository,
            state,
            metadata,
            shutdown: Arc::new(RwLock::new(false)),
        }))
    }
}

impl Default for TtlSweeperBuilder {
    fn default() -> Self {
        Self::new()
    }
}
