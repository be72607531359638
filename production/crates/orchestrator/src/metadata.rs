//! Unified operation metadata: correlation references, ledger receipts and
//! the append-only audit trail.

use crate::timing::TimingCoordinator;
use chrono::{DateTime, Utc};
use kernel_types::{
    AuditEntry, ContractReceipt, OperationId, OperationType, SecurityMode, SettlementReceipt,
    TimingContext, UnifiedOperationMetadata, WitnessReceipt,
};
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Shared by every registry in the process so references never collide.
static CORRELATION_SEQUENCE: AtomicU64 = AtomicU64::new(1);

pub mod events {
    pub const OPERATION_CREATED: &str = "operation_created";
    pub const STATE_TRANSITION: &str = "state_transition";
    pub const QUEUE_ESTIMATE: &str = "queue_estimate";
    pub const WITNESS_RECORDED: &str = "witness_recorded";
    pub const CONTRACT_INVOKED: &str = "contract_invoked";
    pub const SETTLEMENT_RECORDED: &str = "settlement_recorded";
    pub const OPERATION_COMPLETED: &str = "operation_completed";
    pub const OPERATION_FAILED: &str = "operation_failed";
    pub const OPERATION_RETRIED: &str = "operation_retried";
    pub const OPERATION_CANCELLED: &str = "operation_cancelled";
}

pub mod actors {
    pub const ORCHESTRATOR: &str = "orchestrator";
    pub const STATE_MANAGER: &str = "state-manager";
    pub const WITNESS_LEDGER: &str = "witness-ledger";
    pub const SETTLEMENT_LEDGER: &str = "settlement-ledger";
    pub const CONTRACT_LEDGER: &str = "contract-ledger";
    pub const TTL_SWEEPER: &str = "ttl-sweeper";
    pub const CLIENT: &str = "client";
}

/// Audit entry annotated with its position in time
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    pub event: String,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
    /// Milliseconds since the first entry.
    pub elapsed_ms: u64,
    /// Milliseconds since the previous entry.
    pub delta_ms: u64,
    pub details: serde_json::Value,
}

pub struct MetadataRegistry {
    timing: Arc<TimingCoordinator>,
    protocol_version: String,
}

impl MetadataRegistry {
    pub fn new(timing: Arc<TimingCoordinator>, protocol_version: impl Into<String>) -> Self {
        Self {
            timing,
            protocol_version: protocol_version.into(),
        }
    }

    pub fn timing(&self) -> &Arc<TimingCoordinator> {
        &self.timing
    }

    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    pub fn create_unified_metadata(
        &self,
        operation_id: OperationId,
        operation_type: OperationType,
        security_mode: SecurityMode,
        created_at: DateTime<Utc>,
    ) -> UnifiedOperationMetadata {
        let seq = CORRELATION_SEQUENCE.fetch_add(1, Ordering::SeqCst);
        let batch_ref = format!("BATCH-{}-{:06}", created_at.format("%Y%m%d%H%M%S"), seq);
        let kernel_op_id = format!(
            "KOP-{}-{}-{:06}",
            operation_type.tag(),
            operation_id.short().to_uppercase(),
            seq
        );
        let sync = self.timing.get_sync_status();

        let mut metadata = UnifiedOperationMetadata {
            protocol_version: self.protocol_version.clone(),
            operation_id,
            batch_ref,
            kernel_op_id,
            operation_type,
            security_mode,
            payment_context: None,
            data_context: None,
            timing_context: TimingContext {
                batch_start_ts: created_at,
                batch_end_ts: None,
                duration_ns: None,
                clock_source: sync.clock_source,
                sync_quality: sync.status,
            },
            blockchain_refs: Default::default(),
            audit_trail: Vec::new(),
        };

        let details = json!({
            "operationType": operation_type,
            "securityMode": security_mode,
            "batchRef": metadata.batch_ref,
            "kernelOpId": metadata.kernel_op_id,
        });
        self.add_audit_entry(
            &mut metadata,
            events::OPERATION_CREATED,
            actors::ORCHESTRATOR,
            details,
        );

        debug!(
            "Created metadata for operation {} ({})",
            operation_id, metadata.kernel_op_id
        );
        metadata
    }

    pub fn add_audit_entry(
        &self,
        metadata: &mut UnifiedOperationMetadata,
        event: &str,
        actor: &str,
        details: serde_json::Value,
    ) {
        metadata.audit_trail.push(AuditEntry {
            timestamp: self.timing.now(),
            event: event.to_string(),
            actor: actor.to_string(),
            details,
        });
    }

    pub fn record_witness(&self, metadata: &mut UnifiedOperationMetadata, receipt: WitnessReceipt) {
        metadata.blockchain_refs.witness = Some(receipt);
    }

    pub fn record_settlement(
        &self,
        metadata: &mut UnifiedOperationMetadata,
        receipt: SettlementReceipt,
    ) {
        metadata.blockchain_refs.settlement = Some(receipt);
    }

    pub fn record_contract(&self, metadata: &mut UnifiedOperationMetadata, receipt: ContractReceipt) {
        metadata.blockchain_refs.contract = Some(receipt);
    }

    pub fn complete_operation(&self, metadata: &mut UnifiedOperationMetadata) {
        let end = self.timing.now();
        let latency = self
            .timing
            .calculate_latency(metadata.timing_context.batch_start_ts, Some(end));

        metadata.timing_context.batch_end_ts = Some(end);
        metadata.timing_context.duration_ns = Some(latency.elapsed_ns);
        metadata.timing_context.sync_quality = self.timing.get_sync_status().status;

        self.add_audit_entry(
            metadata,
            events::OPERATION_COMPLETED,
            actors::ORCHESTRATOR,
            json!({
                "durationNs": latency.elapsed_ns,
                "duration": latency.human,
                "clockSkew": latency.clock_skew,
            }),
        );
    }

    pub fn timeline(&self, metadata: &UnifiedOperationMetadata) -> Vec<TimelineEntry> {
        let Some(first) = metadata.audit_trail.first() else {
            return Vec::new();
        };

        let mut previous = first.timestamp;
        metadata
            .audit_trail
            .iter()
            .map(|entry| {
                let elapsed = self.timing.calculate_latency(first.timestamp, Some(entry.timestamp));
                let delta = self.timing.calculate_latency(previous, Some(entry.timestamp));
                previous = entry.timestamp;
                TimelineEntry {
                    event: entry.event.clone(),
                    actor: entry.actor.clone(),
                    timestamp: entry.timestamp,
                    elapsed_ms: elapsed.elapsed_ms,
                    delta_ms: delta.elapsed_ms,
                    details: entry.details.clone(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn registry() -> MetadataRegistry {
        MetadataRegistry::new(Arc::new(TimingCoordinator::default()), "1.0")
    }

    #[test]
    fn test_correlation_references() {
        let registry = registry();
        let id = OperationId::new();
        let created_at = Utc::now();

        let metadata = registry.create_unified_metadata(
            id,
            OperationType::PaymentWitness,
            SecurityMode::Maximum,
            created_at,
        );

        let expected_prefix = format!("BATCH-{}-", created_at.format("%Y%m%d%H%M%S"));
        assert!(metadata.batch_ref.starts_with(&expected_prefix));
        assert!(metadata
            .kernel_op_id
            .starts_with(&format!("KOP-PWT-{}-", id.short().to_uppercase())));
        assert_eq!(metadata.audit_trail.len(), 1);
        assert_eq!(metadata.audit_trail[0].event, events::OPERATION_CREATED);

        let details = &metadata.audit_trail[0].details;
        assert_eq!(details["batchRef"], metadata.batch_ref.as_str());
        assert_eq!(details["kernelOpId"], metadata.kernel_op_id.as_str());
        assert_eq!(details["securityMode"], "maximum");
    }

    #[test]
    fn test_references_never_collide() {
        let registry = registry();
        let created_at = Utc::now();
        let mut seen = HashSet::new();

        for _ in 0..500 {
            let metadata = registry.create_unified_metadata(
                OperationId::new(),
                OperationType::DataAttestation,
                SecurityMode::Standard,
                created_at,
            );
            assert!(seen.insert(metadata.batch_ref));
        }
    }

    #[test]
    fn test_record_overwrites_only_its_ledger() {
        let registry = registry();
        let mut metadata = registry.create_unified_metadata(
            OperationId::new(),
            OperationType::StateTransition,
            SecurityMode::Enhanced,
            Utc::now(),
        );
        let receipt = WitnessReceipt {
            ledger_topic_id: "0.0.1".to_string(),
            sequence_number: 1,
            transaction_id: "tx-1".to_string(),
            consensus_timestamp: "1.0".to_string(),
            running_hash: None,
        };

        registry.record_witness(&mut metadata, receipt.clone());
        assert_eq!(metadata.blockchain_refs.witness, Some(receipt.clone()));
        assert!(metadata.blockchain_refs.settlement.is_none());

        let replacement = WitnessReceipt {
            sequence_number: 2,
            ..receipt
        };
        registry.record_witness(&mut metadata, replacement.clone());
        assert_eq!(metadata.blockchain_refs.witness, Some(replacement));
    }

    #[test]
    fn test_complete_and_timeline() {
        let registry = registry();
        let mut metadata = registry.create_unified_metadata(
            OperationId::new(),
            OperationType::ConsensusRound,
            SecurityMode::Maximum,
            Utc::now(),
        );
        registry.add_audit_entry(&mut metadata, events::QUEUE_ESTIMATE, actors::ORCHESTRATOR, json!({}));
        registry.complete_operation(&mut metadata);

        assert!(metadata.timing_context.batch_end_ts.is_some());
        assert!(metadata.timing_context.duration_ns.is_some());

        let timeline = registry.timeline(&metadata);
        let names: Vec<_> = timeline.iter().map(|e| e.event.as_str()).collect();
        assert_eq!(
            names,
            vec![
                events::OPERATION_CREATED,
                events::QUEUE_ESTIMATE,
                events::OPERATION_COMPLETED
            ]
        );
        assert_eq!(timeline[0].elapsed_ms, 0);
        assert!(timeline.windows(2).all(|w| w[0].elapsed_ms <= w[1].elapsed_ms));
    }
}
