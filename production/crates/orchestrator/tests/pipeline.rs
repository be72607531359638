//! End-to-end pipeline tests against simulated collaborators and the
//! in-memory repository.

use async_trait::async_trait;
use kernel_ledger::{SimulatedContract, SimulatedFault, SimulatedSettlement, SimulatedWitness};
use kernel_orchestrator::metadata::events;
use kernel_orchestrator::{
    CallbackNotifier, ListParams, OperationOrchestrator, OperationOrchestratorBuilder,
    OrchestrationConfig, OrchestrationConfigBuilder, OrchestrationError,
};
use kernel_storage::MemoryStorage;
use kernel_types::registry::codes;
use kernel_types::{
    CreateOperationRequest, DataContext, LedgerKind, Operation, OperationId, OperationStatus,
    OperationType, PaymentContext,
};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct Harness {
    orchestrator: Arc<OperationOrchestrator>,
    witness: Arc<SimulatedWitness>,
    settlement: Arc<SimulatedSettlement>,
    contract: Arc<SimulatedContract>,
    callbacks: Arc<RecordingNotifier>,
}

#[derive(Default)]
struct RecordingNotifier {
    delivered: Mutex<Vec<(String, OperationStatus)>>,
}

#[async_trait]
impl CallbackNotifier for RecordingNotifier {
    async fn notify(&self, url: &str, operation: &Operation) -> kernel_orchestrator::Result<()> {
        self.delivered
            .lock()
            .unwrap()
            .push((url.to_string(), operation.status));
        Ok(())
    }
}

fn harness_with(witness_timeout: Duration, start: bool) -> Harness {
    harness_with_config(
        OrchestrationConfigBuilder::new()
            .max_concurrent_ops(4)
            .witness_timeout(witness_timeout)
            .build(),
        start,
    )
}

fn harness_with_config(config: OrchestrationConfig, start: bool) -> Harness {
    let witness = Arc::new(SimulatedWitness::default());
    let settlement = Arc::new(SimulatedSettlement::default());
    let contract = Arc::new(SimulatedContract::default());
    let callbacks = Arc::new(RecordingNotifier::default());

    let orchestrator = OperationOrchestratorBuilder::new()
        .with_config(config)
        .with_repository(Arc::new(MemoryStorage::new()))
        .with_witness(witness.clone())
        .with_settlement(settlement.clone())
        .with_contract(contract.clone())
        .with_notifier(callbacks.clone())
        .build()
        .unwrap();

    if start {
        orchestrator.clone().start();
    }

    Harness {
        orchestrator,
        witness,
        settlement,
        contract,
        callbacks,
    }
}

fn harness() -> Harness {
    harness_with(Duration::from_secs(5), true)
}

fn payment(amount: i64, currency: &str) -> PaymentContext {
    PaymentContext {
        gateway: "interac".to_string(),
        external_payment_id: "pay-001".to_string(),
        amount: Decimal::new(amount, 0),
        currency: currency.to_string(),
        destination: None,
        memo: None,
        settled_at: None,
    }
}

fn data(hash: &str) -> DataContext {
    DataContext {
        representation: "json".to_string(),
        content_hash: hash.to_string(),
        compressed: false,
    }
}

/// Poll until the operation is settled, failed or cancelled.
async fn wait_for_outcome(orchestrator: &OperationOrchestrator, id: OperationId) -> Operation {
    for _ in 0..200 {
        let operation = orchestrator.get_operation(id).await.unwrap();
        if matches!(
            operation.status,
            OperationStatus::Settled | OperationStatus::Failed | OperationStatus::Cancelled
        ) {
            return operation;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("operation {} did not reach an outcome", id);
}

fn assert_valid_walk(history: &[kernel_types::StateTransitionRecord]) {
    let mut current = OperationStatus::Pending;
    for record in history {
        assert_eq!(record.from, current);
        assert!(kernel_orchestrator::state_manager::is_valid_transition(
            record.from,
            record.to
        ));
        current = record.to;
    }
}

#[tokio::test]
async fn test_data_attestation_settles_without_settlement_call() {
    let h = harness();

    let ack = h
        .orchestrator
        .create_operation(
            CreateOperationRequest::new(OperationType::DataAttestation).with_data(data("a1b2c3")),
        )
        .await
        .unwrap();
    assert_eq!(ack.status, OperationStatus::Queued);

    let operation = wait_for_outcome(&h.orchestrator, ack.operation_id).await;
    assert_eq!(operation.status, OperationStatus::Settled);
    assert!(operation.blockchain_refs.witness.is_some());
    assert!(operation.blockchain_refs.settlement.is_none());
    assert!(operation.completed_at.is_some());
    assert!(operation.timing.total_latency_ms.is_some());
    assert_eq!(h.witness.calls(), 1);
    assert_eq!(h.settlement.calls(), 0);

    let history = h.orchestrator.history(ack.operation_id).await.unwrap();
    let path: Vec<_> = history.iter().map(|r| r.to).collect();
    assert_eq!(
        path,
        vec![
            OperationStatus::Queued,
            OperationStatus::Processing,
            OperationStatus::Witnessed,
            OperationStatus::Settled
        ]
    );
    assert_valid_walk(&history);

    let metadata = h.orchestrator.get_metadata(ack.operation_id).await.unwrap();
    assert!(metadata.timing_context.batch_end_ts.is_some());
    assert_eq!(
        metadata.audit_trail.last().map(|e| e.event.as_str()),
        Some(events::OPERATION_COMPLETED)
    );
}

#[tokio::test]
async fn test_payment_walks_full_pipeline() {
    let h = harness();

    let ack = h
        .orchestrator
        .create_operation(
            CreateOperationRequest::new(OperationType::PaymentWitness)
                .with_payment(payment(100, "CAD"))
                .with_callback("https://client.example/hooks/ops"),
        )
        .await
        .unwrap();

    let operation = wait_for_outcome(&h.orchestrator, ack.operation_id).await;
    assert_eq!(operation.status, OperationStatus::Settled);
    assert!(operation.blockchain_refs.witness.is_some());
    assert!(operation.blockchain_refs.settlement.is_some());
    assert!(operation.error_info.is_none());
    assert!(operation.timing.settled_at.is_some());
    assert!(operation
        .payment_context
        .as_ref()
        .and_then(|p| p.settled_at)
        .is_some());
    assert_eq!(h.settlement.calls(), 1);

    let metadata = h.orchestrator.get_metadata(ack.operation_id).await.unwrap();
    assert_eq!(metadata.blockchain_refs, operation.blockchain_refs);
    let events: Vec<_> = metadata.audit_trail.iter().map(|e| e.event.as_str()).collect();
    for expected in [
        events::OPERATION_CREATED,
        events::QUEUE_ESTIMATE,
        events::WITNESS_RECORDED,
        events::SETTLEMENT_RECORDED,
        events::OPERATION_COMPLETED,
    ] {
        assert!(events.contains(&expected), "missing {}", expected);
    }

    for _ in 0..100 {
        if !h.callbacks.delivered.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let delivered = h.callbacks.delivered.lock().unwrap().clone();
    assert_eq!(
        delivered,
        vec![(
            "https://client.example/hooks/ops".to_string(),
            OperationStatus::Settled
        )]
    );
}

#[tokio::test]
async fn test_contract_target_records_contract_receipt() {
    let h = harness();

    let ack = h
        .orchestrator
        .create_operation(
            CreateOperationRequest::new(OperationType::StateTransition)
                .with_data(data("ff00"))
                .with_targets(vec![LedgerKind::Witness, LedgerKind::Contract]),
        )
        .await
        .unwrap();

    let operation = wait_for_outcome(&h.orchestrator, ack.operation_id).await;
    assert_eq!(operation.status, OperationStatus::Settled);
    assert!(operation.blockchain_refs.contract.is_some());
    assert_eq!(h.contract.calls(), 1);

    let timeline = h.orchestrator.timeline(ack.operation_id).await.unwrap();
    assert!(timeline.iter().any(|e| e.event == events::CONTRACT_INVOKED));
}

#[tokio::test]
async fn test_witness_failure_then_retry() {
    let h = harness();
    h.witness.fail_always(SimulatedFault::Generic);

    let ack = h
        .orchestrator
        .create_operation(
            CreateOperationRequest::new(OperationType::DataAttestation).with_data(data("beef")),
        )
        .await
        .unwrap();

    let failed = wait_for_outcome(&h.orchestrator, ack.operation_id).await;
    assert_eq!(failed.status, OperationStatus::Failed);
    let error = failed.error_info.clone().unwrap();
    assert_eq!(error.code, codes::PROCESSING_FAILED);
    assert!(error.retryable);
    assert_eq!(error.retry_count, 0);
    assert!(failed.blockchain_refs.witness.is_none());

    h.witness.recover();
    let requeued = h.orchestrator.retry_operation(ack.operation_id).await.unwrap();
    assert_eq!(requeued.retry_count, 1);

    let settled = wait_for_outcome(&h.orchestrator, ack.operation_id).await;
    assert_eq!(settled.status, OperationStatus::Settled);
    assert!(settled.error_info.is_none());

    let history = h.orchestrator.history(ack.operation_id).await.unwrap();
    assert_valid_walk(&history);
    assert!(history
        .iter()
        .any(|r| r.from == OperationStatus::Failed && r.to == OperationStatus::Pending));
}

#[tokio::test]
async fn test_settlement_rejection_fails_from_witnessed() {
    let h = harness();
    h.settlement
        .fail_always(SimulatedFault::Rejected(codes::INSUFFICIENT_FUNDS.to_string()));

    let ack = h
        .orchestrator
        .create_operation(
            CreateOperationRequest::new(OperationType::PaymentWitness)
                .with_payment(payment(250, "USD")),
        )
        .await
        .unwrap();

    let failed = wait_for_outcome(&h.orchestrator, ack.operation_id).await;
    assert_eq!(failed.status, OperationStatus::Failed);
    assert!(failed.blockchain_refs.witness.is_some());
    let error = failed.error_info.unwrap();
    assert_eq!(error.code, codes::INSUFFICIENT_FUNDS);
    assert!(!error.retryable);

    let last = h
        .orchestrator
        .history(ack.operation_id)
        .await
        .unwrap()
        .pop()
        .unwrap();
    assert_eq!(
        (last.from, last.to),
        (OperationStatus::Witnessed, OperationStatus::Failed)
    );
}

#[tokio::test]
async fn test_witness_timeout_is_reported_as_ledger_timeout() {
    let h = harness_with(Duration::from_millis(20), true);
    h.witness.set_latency(Duration::from_millis(500));

    let ack = h
        .orchestrator
        .create_operation(CreateOperationRequest::new(OperationType::ConsensusRound))
        .await
        .unwrap();

    let failed = wait_for_outcome(&h.orchestrator, ack.operation_id).await;
    assert_eq!(failed.status, OperationStatus::Failed);
    assert_eq!(failed.error_info.unwrap().code, codes::LEDGER_TIMEOUT);
}

#[tokio::test]
async fn test_create_round_trip_without_dispatcher() {
    let h = harness_with(Duration::from_secs(5), false);

    let ack = h
        .orchestrator
        .create_operation(
            CreateOperationRequest::new(OperationType::PaymentWitness)
                .with_payment(payment(100, "CAD")),
        )
        .await
        .unwrap();

    let operation = h.orchestrator.get_operation(ack.operation_id).await.unwrap();
    assert_eq!(operation.status, OperationStatus::Queued);
    assert!(operation.created_at <= operation.timing.queued_at.unwrap());
    assert!(operation.completed_at.is_none());
    assert_eq!(operation.batch_ref, ack.batch_ref);
    assert_eq!(operation.kernel_op_id, ack.kernel_op_id);
    assert!(ack.kernel_op_id.starts_with("KOP-PWT-"));

    let first = h.orchestrator.get_metadata(ack.operation_id).await.unwrap();
    let second = h.orchestrator.get_metadata(ack.operation_id).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(
        h.orchestrator.get_operation(ack.operation_id).await.unwrap(),
        operation
    );

    let cancelled = h
        .orchestrator
        .cancel_operation(ack.operation_id, Some("changed my mind".to_string()))
        .await
        .unwrap();
    assert_eq!(cancelled.status, OperationStatus::Cancelled);

    let err = h
        .orchestrator
        .cancel_operation(ack.operation_id, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::OPERATION_NOT_CANCELLABLE);
}

#[tokio::test]
async fn test_cancelled_while_queued_is_skipped_by_pipeline() {
    let h = harness_with(Duration::from_secs(5), false);

    let ack = h
        .orchestrator
        .create_operation(CreateOperationRequest::new(OperationType::DataAttestation))
        .await
        .unwrap();
    h.orchestrator
        .cancel_operation(ack.operation_id, None)
        .await
        .unwrap();

    h.orchestrator.clone().start();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let operation = h.orchestrator.get_operation(ack.operation_id).await.unwrap();
    assert_eq!(operation.status, OperationStatus::Cancelled);
    assert_eq!(h.witness.calls(), 0);
}

#[tokio::test]
async fn test_idempotency_key_returns_existing_operation() {
    let h = harness_with(Duration::from_secs(5), false);
    let request = CreateOperationRequest::new(OperationType::PaymentWitness)
        .with_payment(payment(42, "EUR"))
        .with_idempotency_key("order-7781");

    let first = h.orchestrator.create_operation(request.clone()).await.unwrap();
    let second = h.orchestrator.create_operation(request).await.unwrap();

    assert_eq!(first.operation_id, second.operation_id);
    assert_eq!(first.kernel_op_id, second.kernel_op_id);
    assert_eq!(h.orchestrator.summary().await.unwrap().total, 1);
}

#[tokio::test]
async fn test_unknown_operation_is_not_found() {
    let h = harness_with(Duration::from_secs(5), false);
    let id = OperationId::new();

    for err in [
        h.orchestrator.get_operation(id).await.unwrap_err(),
        h.orchestrator.get_metadata(id).await.unwrap_err(),
        h.orchestrator.history(id).await.unwrap_err(),
        h.orchestrator.retry_operation(id).await.map(|_| ()).unwrap_err(),
    ] {
        assert!(matches!(err, OrchestrationError::OperationNotFound(_)), "{}", err);
        assert_eq!(err.code(), codes::OPERATION_NOT_FOUND);
    }
}

#[tokio::test]
async fn test_summary_and_listing() {
    let h = harness();
    h.settlement
        .fail_always(SimulatedFault::Rejected(codes::INSUFFICIENT_FUNDS.to_string()));

    let mut ids = Vec::new();
    for _ in 0..3 {
        let ack = h
            .orchestrator
            .create_operation(CreateOperationRequest::new(OperationType::DataAttestation))
            .await
            .unwrap();
        ids.push(ack.operation_id);
    }
    let ack = h
        .orchestrator
        .create_operation(
            CreateOperationRequest::new(OperationType::PaymentWitness)
                .with_payment(payment(5, "CAD")),
        )
        .await
        .unwrap();
    ids.push(ack.operation_id);

    for id in &ids {
        wait_for_outcome(&h.orchestrator, *id).await;
    }

    let summary = h.orchestrator.summary().await.unwrap();
    assert_eq!(summary.total, 4);
    assert_eq!(summary.total, summary.by_status.values().sum::<usize>());
    assert_eq!(summary.by_status.len(), OperationStatus::ALL.len());
    assert_eq!(summary.by_status[&OperationStatus::Settled], 3);
    assert_eq!(summary.by_status[&OperationStatus::Failed], 1);
    assert_eq!(summary.by_type[&OperationType::DataAttestation], 3);
    assert_eq!(summary.by_type[&OperationType::ConsensusRound], 0);
    assert!(summary.average_completion_ms.is_some());

    let page = h
        .orchestrator
        .list_operations(ListParams {
            page: 1,
            limit: 2,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.total, 4);
    assert_eq!(page.total_pages, 2);
    assert!(page.items[0].created_at >= page.items[1].created_at);

    let failed = h
        .orchestrator
        .list_operations(ListParams {
            status: Some(OperationStatus::Failed),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(failed.total, 1);
    assert_eq!(failed.items[0].id, ack.operation_id);
}

#[tokio::test]
async fn test_full_queue_admits_without_blocking() {
    let h = harness_with_config(
        OrchestrationConfigBuilder::new().queue_capacity(1).build(),
        false,
    );

    let mut ids = Vec::new();
    for hash in ["f1", "f2", "f3"] {
        let ack = tokio::time::timeout(
            Duration::from_millis(500),
            h.orchestrator.create_operation(
                CreateOperationRequest::new(OperationType::DataAttestation).with_data(data(hash)),
            ),
        )
        .await
        .expect("admission waited on a full queue")
        .unwrap();
        assert_eq!(ack.status, OperationStatus::Queued);
        ids.push(ack.operation_id);
    }

    let summary = h.orchestrator.summary().await.unwrap();
    assert_eq!(summary.by_status[&OperationStatus::Queued], 3);

    // Operations admitted past capacity are picked up from storage.
    h.orchestrator.clone().start();
    for id in ids {
        let operation = wait_for_outcome(&h.orchestrator, id).await;
        assert_eq!(operation.status, OperationStatus::Settled);
        let history = h.orchestrator.history(id).await.unwrap();
        assert_valid_walk(&history);
        assert_eq!(
            history
                .iter()
                .filter(|r| r.to == OperationStatus::Processing)
                .count(),
            1
        );
    }
    assert_eq!(h.witness.calls(), 3);
}

#[tokio::test]
async fn test_create_after_shutdown_stores_nothing() {
    let h = harness();
    h.orchestrator.shutdown().await;

    let err = h
        .orchestrator
        .create_operation(
            CreateOperationRequest::new(OperationType::DataAttestation).with_data(data("late")),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::Shutdown));

    let summary = h.orchestrator.summary().await.unwrap();
    assert_eq!(summary.total, 0);
}

#[tokio::test]
async fn test_retry_after_shutdown_leaves_operation_failed() {
    let h = harness();
    h.witness.fail_always(SimulatedFault::Generic);

    let ack = h
        .orchestrator
        .create_operation(
            CreateOperationRequest::new(OperationType::DataAttestation).with_data(data("dead")),
        )
        .await
        .unwrap();
    wait_for_outcome(&h.orchestrator, ack.operation_id).await;

    h.orchestrator.shutdown().await;
    let err = h
        .orchestrator
        .retry_operation(ack.operation_id)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::Shutdown));

    let operation = h.orchestrator.get_operation(ack.operation_id).await.unwrap();
    assert_eq!(operation.status, OperationStatus::Failed);
    assert_eq!(operation.retry_count, 0);
}
