//! Request bodies spoken to the ledger collaborators.

use chrono::{DateTime, Utc};
use kernel_types::{OperationId, SecurityMode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WitnessRequest {
    pub operation_id: OperationId,
    pub batch_ref: String,
    /// Hex digest being witnessed.
    pub data_hash: String,
    pub timestamp: DateTime<Utc>,
    pub security_mode: SecurityMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementRequest {
    pub operation_id: OperationId,
    pub amount: Decimal,
    pub currency: String,
    pub destination: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractCallRequest {
    pub operation_id: OperationId,
    pub app_id: u64,
    pub method: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
}

/// Error body a ledger returns alongside a 4xx status.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RejectionBody {
    pub code: String,
    #[serde(default)]
    pub message: String,
}
