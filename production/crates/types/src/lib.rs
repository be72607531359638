//! Shared types for the kernel operation orchestrator.
//!
//! The operation record, its unified metadata, ledger receipts and the
//! request/ack shapes live here so every crate in the workspace agrees on
//! a single data model.

pub mod registry;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a kernel operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(pub Uuid);

impl OperationId {
    pub fn new() -> Self {
        OperationId(Uuid::new_v4())
    }

    /// First eight hex digits, used inside correlation references.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for OperationId {
    fn from(id: Uuid) -> Self {
        OperationId(id)
    }
}

impl FromStr for OperationId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(OperationId)
            .map_err(|_| Error::InvalidOperationId(s.to_string()))
    }
}

/// Kind of work an operation performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    PaymentWitness,
    #[serde(rename = "data_attest")]
    DataAttestation,
    StateTransition,
    ConsensusRound,
}

impl OperationType {
    pub const ALL: [OperationType; 4] = [
        OperationType::PaymentWitness,
        OperationType::DataAttestation,
        OperationType::StateTransition,
        OperationType::ConsensusRound,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::PaymentWitness => "payment_witness",
            OperationType::DataAttestation => "data_attest",
            OperationType::StateTransition => "state_transition",
            OperationType::ConsensusRound => "consensus_round",
        }
    }

    /// Three-letter tag embedded in kernel operation ids.
    pub fn tag(&self) -> &'static str {
        match self {
            OperationType::PaymentWitness => "PWT",
            OperationType::DataAttestation => "DAT",
            OperationType::StateTransition => "STR",
            OperationType::ConsensusRound => "CNR",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        OperationType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::InvalidOperationType(s.to_string()))
    }
}

/// Cryptographic/consensus assurance level requested for an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    Standard,
    Enhanced,
    #[default]
    Maximum,
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityMode::Standard => write!(f, "standard"),
            SecurityMode::Enhanced => write!(f, "enhanced"),
            SecurityMode::Maximum => write!(f, "maximum"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Lifecycle status of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Queued,
    Processing,
    Witnessed,
    Settled,
    Failed,
    Cancelled,
}

impl OperationStatus {
    pub const ALL: [OperationStatus; 7] = [
        OperationStatus::Pending,
        OperationStatus::Queued,
        OperationStatus::Processing,
        OperationStatus::Witnessed,
        OperationStatus::Settled,
        OperationStatus::Failed,
        OperationStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Queued => "queued",
            OperationStatus::Processing => "processing",
            OperationStatus::Witnessed => "witnessed",
            OperationStatus::Settled => "settled",
            OperationStatus::Failed => "failed",
            OperationStatus::Cancelled => "cancelled",
        }
    }

    /// No transition leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::Settled | OperationStatus::Cancelled)
    }

    /// Statuses that carry a `completed_at` timestamp.
    pub fn is_completed(&self) -> bool {
        matches!(
            self,
            OperationStatus::Settled | OperationStatus::Failed | OperationStatus::Cancelled
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        OperationStatus::ALL
            .iter()
            .copied()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| Error::InvalidStatus(s.to_string()))
    }
}

/// External ledger an operation can touch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    Witness,
    Settlement,
    Contract,
}

impl fmt::Display for LedgerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerKind::Witness => write!(f, "witness"),
            LedgerKind::Settlement => write!(f, "settlement"),
            LedgerKind::Contract => write!(f, "contract"),
        }
    }
}

/// Payment confirmed by an external gateway and settled on the value ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentContext {
    pub gateway: String,
    #[serde(default)]
    pub external_payment_id: String,
    pub amount: Decimal,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<DateTime<Utc>>,
}

/// Payload description for attestation-style operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataContext {
    /// Representation tag of the payload (e.g. "binary", "json").
    pub representation: String,
    pub content_hash: String,
    #[serde(default)]
    pub compressed: bool,
}

/// Receipt returned by the witnessing (consensus) ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WitnessReceipt {
    pub ledger_topic_id: String,
    pub sequence_number: u64,
    pub transaction_id: String,
    pub consensus_timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_hash: Option<String>,
}

/// Receipt returned by the settlement (value-transfer) ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementReceipt {
    pub ledger_index: u64,
    pub transaction_hash: String,
    pub validated: bool,
    pub fee: Decimal,
    pub result: String,
}

/// Receipt returned by the smart-contract ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractReceipt {
    pub round: u64,
    pub tx_id: String,
    pub confirmed_round: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_state_delta: Option<serde_json::Value>,
}

/// Per-ledger references, filled in as pipeline stages succeed
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockchainRefs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub witness: Option<WitnessReceipt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement: Option<SettlementReceipt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<ContractReceipt>,
}

impl BlockchainRefs {
    pub fn is_set(&self, ledger: LedgerKind) -> bool {
        match ledger {
            LedgerKind::Witness => self.witness.is_some(),
            LedgerKind::Settlement => self.settlement.is_some(),
            LedgerKind::Contract => self.contract.is_some(),
        }
    }
}

/// Stage timestamps of an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationTiming {
    pub received_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub witnessed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_latency_ms: Option<u64>,
}

impl OperationTiming {
    pub fn new(received_at: DateTime<Utc>) -> Self {
        Self {
            received_at,
            queued_at: None,
            processing_started_at: None,
            witnessed_at: None,
            settled_at: None,
            total_latency_ms: None,
        }
    }
}

/// Structured failure attached to a failed operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
    pub retryable: bool,
    pub retry_count: u32,
    pub max_retries: u32,
}

/// Operation record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: OperationId,
    pub batch_ref: String,
    pub kernel_op_id: String,
    pub operation_type: OperationType,
    pub security_mode: SecurityMode,
    pub priority: Priority,
    pub status: OperationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_context: Option<PaymentContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_context: Option<DataContext>,
    #[serde(default)]
    pub blockchain_targets: Vec<LedgerKind>,
    #[serde(default)]
    pub blockchain_refs: BlockchainRefs,
    pub timing: OperationTiming,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_info: Option<ErrorInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub ttl_seconds: u64,
    /// Number of explicit retries (failed -> pending) so far.
    #[serde(default)]
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Operation {
    /// When the operation last started waiting to run: `queuedAt` while
    /// queued, the creation or retry time while pending.
    pub fn waiting_since(&self) -> DateTime<Utc> {
        match self.status {
            OperationStatus::Queued => self.timing.queued_at.unwrap_or(self.created_at),
            OperationStatus::Pending => self.updated_at,
            _ => self.created_at,
        }
    }

    /// Whether the TTL has elapsed at `now`, measured from `waiting_since`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let ttl = i64::try_from(self.ttl_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds);
        match ttl.and_then(|ttl| self.waiting_since().checked_add_signed(ttl)) {
            Some(deadline) => deadline < now,
            None => false,
        }
    }
}

/// Declared source of the kernel's clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockSource {
    /// Monotonic counter anchored to the wall clock at startup.
    LogicalMonotonic,
    SystemRealtime,
    NetworkPeer,
}

impl fmt::Display for ClockSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockSource::LogicalMonotonic => write!(f, "logical_monotonic"),
            ClockSource::SystemRealtime => write!(f, "system_realtime"),
            ClockSource::NetworkPeer => write!(f, "network_peer"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrecisionTier {
    Millisecond,
    Microsecond,
    Nanosecond,
}

impl PrecisionTier {
    /// Accuracy the tier declares, in nanoseconds.
    pub fn declared_accuracy_ns(&self) -> u64 {
        match self {
            PrecisionTier::Millisecond => 1_000_000,
            PrecisionTier::Microsecond => 1_000,
            PrecisionTier::Nanosecond => 1,
        }
    }
}

/// Quality of clock synchronization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncQuality {
    Synchronized,
    Degraded,
    Holdover,
    Unsynchronized,
}

impl fmt::Display for SyncQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncQuality::Synchronized => write!(f, "synchronized"),
            SyncQuality::Degraded => write!(f, "degraded"),
            SyncQuality::Holdover => write!(f, "holdover"),
            SyncQuality::Unsynchronized => write!(f, "unsynchronized"),
        }
    }
}

/// Timing context of the metadata record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingContext {
    pub batch_start_ts: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_end_ts: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ns: Option<u64>,
    pub clock_source: ClockSource,
    pub sync_quality: SyncQuality,
}

/// Single entry of the append-only audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub actor: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

/// Audit/compliance record kept 1:1 with each operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedOperationMetadata {
    pub protocol_version: String,
    pub operation_id: OperationId,
    pub batch_ref: String,
    pub kernel_op_id: String,
    pub operation_type: OperationType,
    pub security_mode: SecurityMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_context: Option<PaymentContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_context: Option<DataContext>,
    pub timing_context: TimingContext,
    #[serde(default)]
    pub blockchain_refs: BlockchainRefs,
    #[serde(default)]
    pub audit_trail: Vec<AuditEntry>,
}

/// One recorded edge of an operation's state history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateTransitionRecord {
    pub from: OperationStatus,
    pub to: OperationStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Request to create a new operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOperationRequest {
    pub operation_type: OperationType,
    #[serde(default)]
    pub security_mode: Option<SecurityMode>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub payment_context: Option<PaymentContext>,
    #[serde(default)]
    pub data_context: Option<DataContext>,
    #[serde(default)]
    pub blockchain_targets: Vec<LedgerKind>,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

impl CreateOperationRequest {
    pub fn new(operation_type: OperationType) -> Self {
        Self {
            operation_type,
            security_mode: None,
            priority: None,
            payment_context: None,
            data_context: None,
            blockchain_targets: Vec::new(),
            callback_url: None,
            idempotency_key: None,
            ttl_seconds: None,
        }
    }

    pub fn with_payment(mut self, payment: PaymentContext) -> Self {
        self.payment_context = Some(payment);
        self
    }

    pub fn with_data(mut self, data: DataContext) -> Self {
        self.data_context = Some(data);
        self
    }

    pub fn with_targets(mut self, targets: Vec<LedgerKind>) -> Self {
        self.blockchain_targets = targets;
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_ttl(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = Some(ttl_seconds);
        self
    }

    pub fn with_callback(mut self, url: impl Into<String>) -> Self {
        self.callback_url = Some(url.into());
        self
    }
}

/// Acknowledgement returned by a successful create
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationAck {
    pub operation_id: OperationId,
    pub batch_ref: String,
    pub kernel_op_id: String,
    pub status: OperationStatus,
    pub queued_at: DateTime<Utc>,
    pub estimated_completion_ms: u64,
    pub tracking_url: String,
}

/// Filter and window for listing operations, newest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationQuery {
    pub status: Option<OperationStatus>,
    pub operation_type: Option<OperationType>,
    pub offset: usize,
    pub limit: usize,
}

impl OperationQuery {
    pub fn matches(&self, op: &Operation) -> bool {
        self.status.map_or(true, |s| op.status == s)
            && self.operation_type.map_or(true, |t| op.operation_type == t)
    }
}

/// Result type for storage and model operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Operation not found: {0}")]
    OperationNotFound(OperationId),

    #[error("Metadata not found for operation: {0}")]
    MetadataNotFound(OperationId),

    #[error("Operation already exists: {0}")]
    DuplicateOperation(OperationId),

    #[error("Idempotency key already bound to another operation: {0}")]
    DuplicateIdempotencyKey(String),

    #[error("Invalid operation id: {0}")]
    InvalidOperationId(String),

    #[error("Invalid operation type: {0}")]
    InvalidOperationType(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in OperationStatus::ALL {
            assert_eq!(status.as_str().parse::<OperationStatus>().unwrap(), status);
        }
        assert!("archived".parse::<OperationStatus>().is_err());
    }

    #[test]
    fn test_completed_and_terminal_sets() {
        assert!(OperationStatus::Failed.is_completed());
        assert!(!OperationStatus::Failed.is_terminal());
        assert!(OperationStatus::Settled.is_terminal());
        assert!(OperationStatus::Cancelled.is_terminal());
        assert!(!OperationStatus::Witnessed.is_completed());
    }

    #[test]
    fn test_operation_type_wire_names() {
        let json = serde_json::to_string(&OperationType::DataAttestation).unwrap();
        assert_eq!(json, "\"data_attest\"");
        let parsed: OperationType = serde_json::from_str("\"payment_witness\"").unwrap();
        assert_eq!(parsed, OperationType::PaymentWitness);
        assert_eq!("consensus_round".parse::<OperationType>().unwrap(), OperationType::ConsensusRound);
    }

    #[test]
    fn test_defaults() {
        assert_eq!(SecurityMode::default(), SecurityMode::Maximum);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn test_create_request_from_minimal_json() {
        let req: CreateOperationRequest = serde_json::from_str(
            r#"{"operationType":"payment_witness","paymentContext":{"gateway":"stripe","amount":100,"currency":"CAD"}}"#,
        )
        .unwrap();

        assert_eq!(req.operation_type, OperationType::PaymentWitness);
        let payment = req.payment_context.unwrap();
        assert_eq!(payment.amount, Decimal::from(100));
        assert_eq!(payment.currency, "CAD");
        assert!(req.security_mode.is_none());
        assert!(req.blockchain_targets.is_empty());
    }

    #[test]
    fn test_operation_id_parse() {
        let id = OperationId::new();
        assert_eq!(id.to_string().parse::<OperationId>().unwrap(), id);
        assert_eq!(id.short().len(), 8);
        assert!("not-a-uuid".parse::<OperationId>().is_err());
    }
}
