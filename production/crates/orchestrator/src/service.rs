//! Operation lifecycle orchestration service
//!
//! Admits operations, hands them to a background dispatcher and drives each
//! one through the witness, contract and settlement collaborators.

use crate::callback::CallbackNotifier;
use crate::config::OrchestrationConfig;
use crate::error::{OrchestrationError, Result};
use crate::metadata::{actors, events, MetadataRegistry, TimelineEntry};
use crate::state_manager::{self, StateManager};
use crate::timing::TimingCoordinator;
use kernel_ledger::{
    ContractCallRequest, ContractClient, LedgerError, SettlementClient, SettlementRequest,
    WitnessClient, WitnessRequest,
};
use kernel_storage::OperationRepository;
use kernel_types::registry::{self, codes};
use kernel_types::{
    BlockchainRefs, CreateOperationRequest, ErrorInfo, LedgerKind, Operation, OperationAck,
    OperationId, OperationQuery, OperationStatus, OperationTiming, OperationType,
    StateTransitionRecord, UnifiedOperationMetadata,
};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use OperationStatus::*;

/// How often an idle dispatcher re-checks the shutdown flag and backfills
/// the queue from storage.
const DISPATCH_IDLE_TICK: Duration = Duration::from_millis(250);
const MAX_PAGE_LIMIT: usize = 100;

/// Paging and filters for `list_operations`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListParams {
    pub page: usize,
    pub limit: usize,
    pub status: Option<OperationStatus>,
    pub operation_type: Option<OperationType>,
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 20,
            status: None,
            operation_type: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationPage {
    pub items: Vec<Operation>,
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub total_pages: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSummary {
    pub total: usize,
    pub by_status: BTreeMap<OperationStatus, usize>,
    pub by_type: BTreeMap<OperationType, usize>,
    /// Mean `totalLatencyMs` over settled operations.
    pub average_completion_ms: Option<f64>,
}

/// Main orchestration service.
pub struct OperationOrchestrator {
    config: OrchestrationConfig,

    repository: Arc<dyn OperationRepository>,

    state: Arc<StateManager>,

    metadata: Arc<MetadataRegistry>,

    timing: Arc<TimingCoordinator>,

    witness: Arc<dyn WitnessClient>,

    settlement: Arc<dyn SettlementClient>,

    /// Only called for operations that target the contract ledger.
    contract: Option<Arc<dyn ContractClient>>,

    notifier: Option<Arc<dyn CallbackNotifier>>,

    queue_tx: mpsc::Sender<OperationId>,

    /// Taken by the dispatcher on start.
    queue_rx: Mutex<Option<mpsc::Receiver<OperationId>>>,

    /// Bounds the number of pipelines in flight.
    semaphore: Arc<Semaphore>,

    shutdown: Arc<RwLock<bool>>,
}

impl OperationOrchestrator {
    /// Start the pipeline dispatcher in the background.
    pub fn start(self: Arc<Self>) -> JoinHandle<Result<()>> {
        info!("Starting operation pipeline dispatcher");

        tokio::spawn(async move {
            match self.run().await {
                Ok(()) => {
                    info!("Pipeline dispatcher stopped normally");
                    Ok(())
                }
                Err(e) => {
                    error!("Pipeline dispatcher error: {}", e);
                    Err(e)
                }
            }
        })
    }

    async fn run(self: Arc<Self>) -> Result<()> {
        let mut rx = self
            .queue_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| OrchestrationError::Internal("Dispatcher already started".to_string()))?;
        let mut ticker = interval(DISPATCH_IDLE_TICK);

        loop {
            if *self.shutdown.read().await {
                info!("Pipeline dispatcher shutting down gracefully");
                return Ok(());
            }

            tokio::select! {
                received = rx.recv() => {
                    let Some(id) = received else {
                        return Ok(());
                    };

                    let permit = self
                        .semaphore
                        .clone()
                        .acquire_owned()
                        .await
                        .map_err(|_| OrchestrationError::Shutdown)?;
                    let service = Arc::clone(&self);
                    tokio::spawn(async move {
                        service.run_pipeline(id).await;
                        drop(permit);
                    });
                }
                _ = ticker.tick() => {
                    if rx.is_empty() {
                        if let Err(e) = self.backfill().await {
                            warn!("Queue backfill failed: {}", e);
                        }
                    }
                }
            }
        }
    }

    /// Queue operations that are `queued` in storage but were admitted while
    /// the queue was full. Oldest first. An id that is already being
    /// processed is skipped by the pipeline.
    async fn backfill(&self) -> Result<usize> {
        if self.queue_tx.capacity() == 0 {
            return Ok(0);
        }

        let query = OperationQuery {
            status: Some(Queued),
            operation_type: None,
            offset: 0,
            limit: usize::MAX,
        };
        let (queued, _) = self.repository.list_operations(&query).await?;

        let mut sent = 0;
        for operation in queued.iter().rev() {
            if self.queue_tx.try_send(operation.id).is_err() {
                break;
            }
            sent += 1;
        }

        if sent > 0 {
            debug!("Backfilled {} queued operations from storage", sent);
        }
        Ok(sent)
    }

    /// Stop the dispatcher. Pipelines already running finish on their own.
    pub async fn shutdown(&self) {
        info!("Initiating pipeline dispatcher shutdown");
        *self.shutdown.write().await = true;
    }

    /// Validate and admit an operation, returning as soon as it is queued.
    pub async fn create_operation(&self, request: CreateOperationRequest) -> Result<OperationAck> {
        let ttl_seconds = self.validate(&request)?;

        if let Some(key) = &request.idempotency_key {
            if let Some(existing) = self.repository.find_by_idempotency_key(key).await? {
                info!(
                    "Idempotency key {} matched existing operation {}",
                    key, existing.id
                );
                return Ok(self.ack_for(&existing));
            }
        }

        let slot = self.reserve_slot().await?;

        let id = OperationId::new();
        let now = self.timing.now();
        let security_mode = request.security_mode.unwrap_or_default();

        let mut metadata =
            self.metadata
                .create_unified_metadata(id, request.operation_type, security_mode, now);
        metadata.payment_context = request.payment_context.clone();
        metadata.data_context = request.data_context.clone();

        let operation = Operation {
            id,
            batch_ref: metadata.batch_ref.clone(),
            kernel_op_id: metadata.kernel_op_id.clone(),
            operation_type: request.operation_type,
            security_mode,
            priority: request.priority.unwrap_or_default(),
            status: Pending,
            payment_context: request.payment_context,
            data_context: request.data_context,
            blockchain_targets: request.blockchain_targets,
            blockchain_refs: BlockchainRefs::default(),
            timing: OperationTiming::new(now),
            error_info: None,
            callback_url: request.callback_url,
            idempotency_key: request.idempotency_key,
            ttl_seconds,
            retry_count: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        match self.repository.insert_operation(&operation, &metadata).await {
            Ok(()) => {}
            Err(kernel_types::Error::DuplicateIdempotencyKey(key)) => {
                let existing = self
                    .repository
                    .find_by_idempotency_key(&key)
                    .await?
                    .ok_or_else(|| {
                        OrchestrationError::Internal(format!(
                            "Idempotency key {} conflicted but no operation holds it",
                            key
                        ))
                    })?;
                debug!("Lost idempotency race for key {} to operation {}", key, existing.id);
                return Ok(self.ack_for(&existing));
            }
            Err(e) => return Err(e.into()),
        }

        let targets = effective_targets(&operation);
        let estimate = self.estimate_completion_ms(&operation);
        let timing = &self.timing;
        let registry = &self.metadata;

        let queued = self
            .state
            .transition_with(id, Pending, Queued, Some("admitted".to_string()), move |op, meta| {
                op.timing.queued_at = Some(timing.now());
                registry.add_audit_entry(
                    meta,
                    events::QUEUE_ESTIMATE,
                    actors::ORCHESTRATOR,
                    json!({
                        "estimatedCompletionMs": estimate,
                        "targets": targets,
                    }),
                );
            })
            .await?;

        self.hand_off(slot, id);

        info!(
            "Operation {} ({}) queued, estimated completion {}ms",
            id, queued.kernel_op_id, estimate
        );
        Ok(self.ack_for(&queued))
    }

    /// Claim a queue slot before anything is persisted. Never waits; `None`
    /// means the queue is full and the dispatcher backfills from storage.
    async fn reserve_slot(&self) -> Result<Option<mpsc::Permit<'_, OperationId>>> {
        if *self.shutdown.read().await {
            return Err(OrchestrationError::Shutdown);
        }

        match self.queue_tx.try_reserve() {
            Ok(permit) => Ok(Some(permit)),
            Err(TrySendError::Full(())) => Ok(None),
            Err(TrySendError::Closed(())) => Err(OrchestrationError::Shutdown),
        }
    }

    fn hand_off(&self, slot: Option<mpsc::Permit<'_, OperationId>>, id: OperationId) {
        match slot {
            Some(permit) => permit.send(id),
            None => debug!("Queue full, operation {} left for backfill", id),
        }
    }

    fn validate(&self, request: &CreateOperationRequest) -> Result<u64> {
        let ttl = request.ttl_seconds.unwrap_or(self.config.default_ttl_secs);
        if ttl == 0 || ttl > self.config.max_ttl_secs {
            return Err(OrchestrationError::Validation(format!(
                "ttlSeconds must be between 1 and {}",
                self.config.max_ttl_secs
            )));
        }

        if let Some(payment) = &request.payment_context {
            if payment.amount <= Decimal::ZERO {
                return Err(OrchestrationError::Validation(
                    "paymentContext.amount must be greater than zero".to_string(),
                ));
            }
            if payment.currency.len() != 3
                || !payment.currency.chars().all(|c| c.is_ascii_uppercase())
            {
                return Err(OrchestrationError::Validation(format!(
                    "paymentContext.currency must be a 3-letter uppercase code, got '{}'",
                    payment.currency
                )));
            }
            if payment.gateway.trim().is_empty() {
                return Err(OrchestrationError::Validation(
                    "paymentContext.gateway is required".to_string(),
                ));
            }
        }

        if let Some(data) = &request.data_context {
            if data.content_hash.trim().is_empty() {
                return Err(OrchestrationError::Validation(
                    "dataContext.contentHash is required".to_string(),
                ));
            }
        }

        if let Some(url) = &request.callback_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(OrchestrationError::Validation(
                    "callbackUrl must be an http or https URL".to_string(),
                ));
            }
        }

        if let Some(key) = &request.idempotency_key {
            if key.trim().is_empty() {
                return Err(OrchestrationError::Validation(
                    "idempotencyKey must not be blank".to_string(),
                ));
            }
        }

        Ok(ttl)
    }

    fn estimate_completion_ms(&self, operation: &Operation) -> u64 {
        let targets = effective_targets(operation).len() as u64;
        self.config
            .base_completion_estimate_ms
            .saturating_add(self.config.per_target_estimate_ms.saturating_mul(targets))
    }

    fn ack_for(&self, operation: &Operation) -> OperationAck {
        OperationAck {
            operation_id: operation.id,
            batch_ref: operation.batch_ref.clone(),
            kernel_op_id: operation.kernel_op_id.clone(),
            status: operation.status,
            queued_at: operation.timing.queued_at.unwrap_or(operation.created_at),
            estimated_completion_ms: self.estimate_completion_ms(operation),
            tracking_url: format!(
                "{}/{}",
                self.config.tracking_base_path.trim_end_matches('/'),
                operation.id
            ),
        }
    }

    /// Run one operation's pipeline and record the outcome.
    async fn run_pipeline(self: Arc<Self>, id: OperationId) {
        let timed = self.timing.measure_operation_timing(self.process(id)).await;

        match timed.result {
            Ok(Some(operation)) => {
                info!(
                    "Operation {} settled in {}",
                    id, timed.timing.human
                );
                self.notify(&operation);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(
                    "Operation {} failed after {}: {}",
                    id, timed.timing.human, e
                );
                self.record_failure(id, &e).await;
            }
        }
    }

    /// Returns `None` when the operation left `queued` before it was picked up.
    async fn process(&self, id: OperationId) -> Result<Option<Operation>> {
        let timing = &self.timing;
        let registry = &self.metadata;

        let operation = match self
            .state
            .transition_with(id, Queued, Processing, Some("dispatched".to_string()), move |op, _| {
                op.timing.processing_started_at = Some(timing.now());
            })
            .await
        {
            Ok(operation) => operation,
            Err(OrchestrationError::StateMismatch { actual, .. }) => {
                debug!("Operation {} is {} and will not be processed", id, actual);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if !self.config.processing_delay.is_zero() {
            tokio::time::sleep(self.config.processing_delay).await;
        }

        // Witness
        let request = WitnessRequest {
            operation_id: id,
            batch_ref: operation.batch_ref.clone(),
            data_hash: data_hash(&operation),
            timestamp: self.timing.now(),
            security_mode: operation.security_mode,
        };
        let receipt = call_ledger(
            "witness",
            self.config.witness_timeout,
            self.witness.witness(&request),
        )
        .await?;

        let operation = self
            .state
            .transition_with(
                id,
                Processing,
                Witnessed,
                Some("witness_recorded".to_string()),
                move |op, meta| {
                    op.blockchain_refs.witness = Some(receipt.clone());
                    op.timing.witnessed_at = Some(timing.now());
                    registry.add_audit_entry(
                        meta,
                        events::WITNESS_RECORDED,
                        actors::WITNESS_LEDGER,
                        json!({
                            "ledgerTopicId": receipt.ledger_topic_id,
                            "sequenceNumber": receipt.sequence_number,
                            "transactionId": receipt.transaction_id,
                        }),
                    );
                    registry.record_witness(meta, receipt);
                },
            )
            .await?;

        // Contract
        if operation.blockchain_targets.contains(&LedgerKind::Contract) {
            match &self.contract {
                Some(contract) => {
                    let witness_tx = operation
                        .blockchain_refs
                        .witness
                        .as_ref()
                        .map(|w| w.transaction_id.clone());
                    let request = ContractCallRequest {
                        operation_id: id,
                        app_id: self.config.contract_app_id,
                        method: self.config.contract_method.clone(),
                        args: vec![json!(operation.kernel_op_id), json!(witness_tx)],
                    };
                    let receipt = call_ledger(
                        "contract",
                        self.config.contract_timeout,
                        contract.invoke(&request),
                    )
                    .await?;

                    self.state
                        .update(id, move |op, meta| {
                            op.blockchain_refs.contract = Some(receipt.clone());
                            registry.add_audit_entry(
                                meta,
                                events::CONTRACT_INVOKED,
                                actors::CONTRACT_LEDGER,
                                json!({
                                    "round": receipt.round,
                                    "txId": receipt.tx_id,
                                }),
                            );
                            registry.record_contract(meta, receipt);
                        })
                        .await?;
                }
                None => {
                    warn!(
                        "Operation {} targets the contract ledger but no contract client is configured",
                        id
                    );
                }
            }
        }

        // Settlement
        let settled = match operation.payment_context.clone() {
            Some(payment) => {
                let request = SettlementRequest {
                    operation_id: id,
                    amount: payment.amount,
                    currency: payment.currency.clone(),
                    destination: payment
                        .destination
                        .clone()
                        .unwrap_or_else(|| self.config.default_settlement_destination.clone()),
                    memo: Some(operation.kernel_op_id.clone()),
                };
                let receipt = call_ledger(
                    "settlement",
                    self.config.settlement_timeout,
                    self.settlement.settle(&request),
                )
                .await?;

                self.state
                    .transition_with(
                        id,
                        Witnessed,
                        Settled,
                        Some("settlement_recorded".to_string()),
                        move |op, meta| {
                            let now = timing.now();
                            op.blockchain_refs.settlement = Some(receipt.clone());
                            op.timing.settled_at = Some(now);
                            if let Some(payment) = op.payment_context.as_mut() {
                                payment.settled_at = Some(now);
                            }
                            if let Some(payment) = meta.payment_context.as_mut() {
                                payment.settled_at = Some(now);
                            }
                            registry.add_audit_entry(
                                meta,
                                events::SETTLEMENT_RECORDED,
                                actors::SETTLEMENT_LEDGER,
                                json!({
                                    "ledgerIndex": receipt.ledger_index,
                                    "transactionHash": receipt.transaction_hash,
                                    "fee": receipt.fee,
                                }),
                            );
                            registry.record_settlement(meta, receipt);
                            self.finalize(op, meta);
                        },
                    )
                    .await?
            }
            None => {
                self.state
                    .transition_with(
                        id,
                        Witnessed,
                        Settled,
                        Some("no_settlement_required".to_string()),
                        move |op, meta| {
                            op.timing.settled_at = Some(timing.now());
                            self.finalize(op, meta);
                        },
                    )
                    .await?
            }
        };

        Ok(Some(settled))
    }

    fn finalize(&self, operation: &mut Operation, metadata: &mut UnifiedOperationMetadata) {
        let latency = self.timing.calculate_latency(operation.created_at, None);
        operation.timing.total_latency_ms = Some(latency.elapsed_ms);
        operation.error_info = None;
        self.metadata.complete_operation(metadata);
    }

    async fn record_failure(&self, id: OperationId, error: &OrchestrationError) {
        let code = match error {
            OrchestrationError::Ledger(e) => e.code().unwrap_or(codes::PROCESSING_FAILED),
            _ => codes::PROCESSING_FAILED,
        }
        .to_string();
        let retryable = registry::is_retryable(&code);
        let max_retries = registry::lookup(&code).map(|d| d.max_attempts).unwrap_or(0);
        let message = error.to_string();

        let current = match self.state.current_state(id).await {
            Ok(status) => status,
            Err(e) => {
                error!("Failed to load operation {} to record failure: {}", id, e);
                return;
            }
        };
        if !state_manager::is_valid_transition(current, Failed) {
            error!(
                "Operation {} failed while {} and cannot be marked failed: {}",
                id, current, message
            );
            return;
        }

        let registry = &self.metadata;
        let result = self
            .state
            .transition_with(id, current, Failed, Some(code.clone()), |op, meta| {
                op.error_info = Some(ErrorInfo {
                    code: code.clone(),
                    message: message.clone(),
                    retryable,
                    retry_count: op.retry_count,
                    max_retries,
                });
                registry.add_audit_entry(
                    meta,
                    events::OPERATION_FAILED,
                    actors::ORCHESTRATOR,
                    json!({
                        "code": code,
                        "message": message,
                        "retryable": retryable,
                        "failedIn": current,
                    }),
                );
            })
            .await;

        match result {
            Ok(operation) => {
                info!("Operation {} marked failed with {}", id, operation_code(&operation));
                self.notify(&operation);
            }
            Err(e) => error!("Failed to record failure for operation {}: {}", id, e),
        }
    }

    fn notify(&self, operation: &Operation) {
        let (Some(notifier), Some(url)) = (self.notifier.clone(), operation.callback_url.clone())
        else {
            return;
        };
        let operation = operation.clone();

        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&url, &operation).await {
                warn!("Callback for operation {} failed: {}", operation.id, e);
            }
        });
    }

    /// failed -> pending -> queued, then run the pipeline again from the top.
    pub async fn retry_operation(&self, id: OperationId) -> Result<Operation> {
        let slot = self.reserve_slot().await?;
        let timing = &self.timing;
        let registry = &self.metadata;

        self.state
            .retry_with(id, move |op, meta| {
                registry.add_audit_entry(
                    meta,
                    events::OPERATION_RETRIED,
                    actors::CLIENT,
                    json!({
                        "retryCount": op.retry_count,
                        "previousError": op.error_info.as_ref().map(|e| e.code.clone()),
                    }),
                );
            })
            .await?;

        let queued = self
            .state
            .transition_with(id, Pending, Queued, Some("retry".to_string()), move |op, _| {
                op.timing.queued_at = Some(timing.now());
            })
            .await?;

        self.hand_off(slot, id);

        info!("Operation {} re-queued (retry {})", id, queued.retry_count);
        Ok(queued)
    }

    pub async fn cancel_operation(&self, id: OperationId, reason: Option<String>) -> Result<Operation> {
        let reason = reason.unwrap_or_else(|| "client_request".to_string());
        let registry = &self.metadata;

        let cancelled = self
            .state
            .cancel_with(id, Some(reason.clone()), |_, meta| {
                registry.add_audit_entry(
                    meta,
                    events::OPERATION_CANCELLED,
                    actors::CLIENT,
                    json!({ "reason": reason }),
                );
            })
            .await?;

        info!("Operation {} cancelled: {}", id, reason);
        self.notify(&cancelled);
        Ok(cancelled)
    }

    pub async fn get_operation(&self, id: OperationId) -> Result<Operation> {
        self.repository
            .get_operation(id)
            .await?
            .ok_or(OrchestrationError::OperationNotFound(id))
    }

    pub async fn get_metadata(&self, id: OperationId) -> Result<UnifiedOperationMetadata> {
        self.repository
            .get_metadata(id)
            .await?
            .ok_or(OrchestrationError::OperationNotFound(id))
    }

    pub async fn history(&self, id: OperationId) -> Result<Vec<StateTransitionRecord>> {
        self.state.history(id).await
    }

    pub async fn timeline(&self, id: OperationId) -> Result<Vec<TimelineEntry>> {
        let metadata = self.get_metadata(id).await?;
        Ok(self.metadata.timeline(&metadata))
    }

    /// Newest first.
    pub async fn list_operations(&self, params: ListParams) -> Result<OperationPage> {
        if params.page == 0 {
            return Err(OrchestrationError::Validation(
                "page must be at least 1".to_string(),
            ));
        }
        if params.limit == 0 || params.limit > MAX_PAGE_LIMIT {
            return Err(OrchestrationError::Validation(format!(
                "limit must be between 1 and {}",
                MAX_PAGE_LIMIT
            )));
        }

        let query = OperationQuery {
            status: params.status,
            operation_type: params.operation_type,
            offset: (params.page - 1).saturating_mul(params.limit),
            limit: params.limit,
        };
        let (items, total) = self.repository.list_operations(&query).await?;

        Ok(OperationPage {
            items,
            page: params.page,
            limit: params.limit,
            total,
            total_pages: total.div_ceil(params.limit),
        })
    }

    pub async fn summary(&self) -> Result<OperationSummary> {
        let by_status = self.state.counts_by_state().await?;
        let type_counts = self.repository.count_by_type().await?;
        let by_type = OperationType::ALL
            .iter()
            .map(|t| (*t, type_counts.get(t).copied().unwrap_or(0)))
            .collect();

        let settled_query = OperationQuery {
            status: Some(Settled),
            operation_type: None,
            offset: 0,
            limit: usize::MAX,
        };
        let (settled, _) = self.repository.list_operations(&settled_query).await?;
        let latencies: Vec<u64> = settled
            .iter()
            .filter_map(|op| op.timing.total_latency_ms)
            .collect();
        let average_completion_ms = if latencies.is_empty() {
            None
        } else {
            Some(latencies.iter().sum::<u64>() as f64 / latencies.len() as f64)
        };

        Ok(OperationSummary {
            total: by_status.values().sum(),
            by_status,
            by_type,
            average_completion_ms,
        })
    }

    pub fn state_manager(&self) -> &Arc<StateManager> {
        &self.state
    }

    pub fn timing(&self) -> &Arc<TimingCoordinator> {
        &self.timing
    }

    pub fn metadata_registry(&self) -> &Arc<MetadataRegistry> {
        &self.metadata
    }

    pub fn repository(&self) -> &Arc<dyn OperationRepository> {
        &self.repository
    }

    pub fn config(&self) -> &OrchestrationConfig {
        &self.config
    }
}

/// Requested targets, or witness (plus settlement for payments) when none are.
pub fn effective_targets(operation: &Operation) -> Vec<LedgerKind> {
    if !operation.blockchain_targets.is_empty() {
        return operation.blockchain_targets.clone();
    }
    let mut targets = vec![LedgerKind::Witness];
    if operation.payment_context.is_some() {
        targets.push(LedgerKind::Settlement);
    }
    targets
}

/// Hash handed to the witness ledger.
fn data_hash(operation: &Operation) -> String {
    if let Some(data) = &operation.data_context {
        return data.content_hash.clone();
    }

    let mut hasher = Sha256::new();
    hasher.update(operation.id.to_string().as_bytes());
    if let Some(payment) = &operation.payment_context {
        if let Ok(bytes) = serde_json::to_vec(payment) {
            hasher.update(&bytes);
        }
    }
    hex::encode(hasher.finalize())
}

fn operation_code(operation: &Operation) -> &str {
    operation
        .error_info
        .as_ref()
        .map(|e| e.code.as_str())
        .unwrap_or(codes::PROCESSING_FAILED)
}

async fn call_ledger<T, F>(ledger: &str, limit: Duration, call: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, LedgerError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(LedgerError::Timeout(format!(
            "{} call exceeded {}ms",
            ledger,
            limit.as_millis()
        ))
        .into()),
    }
}

/// Builder for OperationOrchestrator
pub struct OperationOrchestratorBuilder {
    config: Option<OrchestrationConfig>,
    repository: Option<Arc<dyn OperationRepository>>,
    timing: Option<Arc<TimingCoordinator>>,
    witness: Option<Arc<dyn WitnessClient>>,
    settlement: Option<Arc<dyn SettlementClient>>,
    contract: Option<Arc<dyn ContractClient>>,
    notifier: Option<Arc<dyn CallbackNotifier>>,
}

impl OperationOrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            repository: None,
            timing: None,
            witness: None,
            settlement: None,
            contract: None,
            notifier: None,
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

    pub fn with_timing(mut self, timing: Arc<TimingCoordinator>) -> Self {
        self.timing = Some(timing);
        self
    }

    pub fn with_witness(mut self, witness: Arc<dyn WitnessClient>) -> Self {
        self.witness = Some(witness);
        self
    }

    pub fn with_settlement(mut self, settlement: Arc<dyn SettlementClient>) -> Self {
        self.settlement = Some(settlement);
        self
    }

    pub fn with_contract(mut self, contract: Arc<dyn ContractClient>) -> Self {
        self.contract = Some(contract);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn CallbackNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn build(self) -> Result<Arc<OperationOrchestrator>> {
        let config = self.config.unwrap_or_default();
        let repository = self
            .repository
            .ok_or_else(|| OrchestrationError::Config("OperationRepository is required".to_string()))?;
        let witness = self
            .witness
            .ok_or_else(|| OrchestrationError::Config("WitnessClient is required".to_string()))?;
        let settlement = self
            .settlement
            .ok_or_else(|| OrchestrationError::Config("SettlementClient is required".to_string()))?;

        if config.queue_capacity == 0 {
            return Err(OrchestrationError::Config(
                "queue_capacity must be greater than zero".to_string(),
            ));
        }
        if config.max_concurrent_ops == 0 {
            return Err(OrchestrationError::Config(
                "max_concurrent_ops must be greater than zero".to_string(),
            ));
        }

        let timing = self
            .timing
            .unwrap_or_else(|| Arc::new(TimingCoordinator::new(config.sync_refresh_interval)));
        let metadata = Arc::new(MetadataRegistry::new(
            timing.clone(),
            config.protocol_version.clone(),
        ));
        let state = Arc::new(StateManager::new(repository.clone(), metadata.clone()));
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);

        Ok(Arc::new(OperationOrchestrator {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_ops)),
            config,
            repository,
            state,
            metadata,
            timing,
            witness,
            settlement,
            contract: self.contract,
            notifier: self.notifier,
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            shutdown: Arc::new(RwLock::new(false)),
        }))
    }
}

impl Default for OperationOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
