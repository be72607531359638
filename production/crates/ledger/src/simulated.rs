//! In-process ledger collaborators.
//!
//! Receipts are derived from SHA-256 digests of the request and cached per
//! operation id, so repeating a call for the same operation returns the same
//! receipt. Faults and latency can be injected for tests and local runs.

use async_trait::async_trait;
use chrono::Utc;
use kernel_types::registry::codes;
use kernel_types::{ContractReceipt, OperationId, SettlementReceipt, WitnessReceipt};
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::client::LedgerError;
use crate::types::{ContractCallRequest, SettlementRequest, WitnessRequest};
use crate::{ContractClient, SettlementClient, WitnessClient};

/// Fault a simulated collaborator can be told to return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulatedFault {
    /// Failure without a collaborator-supplied code.
    Generic,
    Unavailable,
    Timeout,
    Rejected(String),
}

impl SimulatedFault {
    fn into_error(self, ledger: &str) -> LedgerError {
        match self {
            SimulatedFault::Generic => LedgerError::Failed(format!("simulated {} failure", ledger)),
            SimulatedFault::Unavailable => {
                LedgerError::Unavailable(format!("simulated {} outage", ledger))
            }
            SimulatedFault::Timeout => LedgerError::Timeout(format!("simulated {} timeout", ledger)),
            SimulatedFault::Rejected(code) => LedgerError::from_rejection(crate::RejectionBody {
                code,
                message: format!("simulated {} rejection", ledger),
            }),
        }
    }
}

/// Shared call accounting and fault injection.
#[derive(Default)]
struct FaultPlan {
    calls: AtomicU32,
    remaining_failures: AtomicU32,
    fault: StdMutex<Option<SimulatedFault>>,
    latency: StdMutex<Duration>,
}

impl FaultPlan {
    fn set(&self, fault: SimulatedFault, count: u32) {
        if let Ok(mut slot) = self.fault.lock() {
            *slot = Some(fault);
        }
        self.remaining_failures.store(count, Ordering::SeqCst);
    }

    fn clear(&self) {
        self.remaining_failures.store(0, Ordering::SeqCst);
    }

    fn set_latency(&self, latency: Duration) {
        if let Ok(mut slot) = self.latency.lock() {
            *slot = latency;
        }
    }

    /// Count the call, wait out the latency, then return the injected fault
    /// if one is pending.
    async fn enter(&self, ledger: &str) -> Result<(), LedgerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let latency = self.latency.lock().map(|l| *l).unwrap_or_default();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let consumed = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if consumed {
            let fault = self
                .fault
                .lock()
                .ok()
                .and_then(|f| f.clone())
                .unwrap_or(SimulatedFault::Generic);
            warn!("Injecting {:?} into simulated {} call", fault, ledger);
            return Err(fault.into_error(ledger));
        }

        Ok(())
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

fn digest(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

macro_rules! fault_controls {
    ($ty:ty) => {
        impl $ty {
            /// Fail the next `count` calls with `fault`.
            pub fn fail_next(&self, count: u32, fault: SimulatedFault) {
                self.faults.set(fault, count);
            }

            /// Fail every call until `recover` is called.
            pub fn fail_always(&self, fault: SimulatedFault) {
                self.faults.set(fault, u32::MAX);
            }

            pub fn recover(&self) {
                self.faults.clear();
            }

            pub fn set_latency(&self, latency: Duration) {
                self.faults.set_latency(latency);
            }

            /// Number of calls received, including failed ones.
            pub fn calls(&self) -> u32 {
                self.faults.calls()
            }
        }
    };
}

struct WitnessLedgerState {
    next_sequence: u64,
    running_hash: [u8; 32],
    receipts: HashMap<OperationId, WitnessReceipt>,
}

/// Simulated append-only consensus ledger.
pub struct SimulatedWitness {
    topic_id: String,
    faults: FaultPlan,
    state: Mutex<WitnessLedgerState>,
}

impl SimulatedWitness {
    pub fn new(topic_id: impl Into<String>) -> Self {
        Self {
            topic_id: topic_id.into(),
            faults: FaultPlan::default(),
            state: Mutex::new(WitnessLedgerState {
                next_sequence: 1,
                running_hash: [0u8; 32],
                receipts: HashMap::new(),
            }),
        }
    }
}

impl Default for SimulatedWitness {
    fn default() -> Self {
        Self::new("0.0.4800")
    }
}

fault_controls!(SimulatedWitness);

#[async_trait]
impl WitnessClient for SimulatedWitness {
    async fn witness(&self, request: &WitnessRequest) -> Result<WitnessReceipt, LedgerError> {
        self.faults.enter("witness").await?;

        let mut state = self.state.lock().await;
        if let Some(receipt) = state.receipts.get(&request.operation_id) {
            return Ok(receipt.clone());
        }

        let running_hash = digest(&[&state.running_hash[..], request.data_hash.as_bytes()]);
        let tx_digest = digest(&[
            self.topic_id.as_bytes(),
            &request.operation_id.0.as_bytes()[..],
        ]);
        let now = Utc::now();

        let receipt = WitnessReceipt {
            ledger_topic_id: self.topic_id.clone(),
            sequence_number: state.next_sequence,
            transaction_id: hex::encode(&tx_digest[..16]),
            consensus_timestamp: format!("{}.{:09}", now.timestamp(), now.timestamp_subsec_nanos()),
            running_hash: Some(hex::encode(running_hash)),
        };

        state.next_sequence += 1;
        state.running_hash = running_hash;
        state.receipts.insert(request.operation_id, receipt.clone());

        debug!(
            "Simulated witness recorded operation {} at sequence {}",
            request.operation_id, receipt.sequence_number
        );
        Ok(receipt)
    }
}

/// Simulated value-transfer ledger.
pub struct SimulatedSettlement {
    fee: Decimal,
    next_index: AtomicU64,
    faults: FaultPlan,
    receipts: Mutex<HashMap<OperationId, SettlementReceipt>>,
}

impl SimulatedSettlement {
    pub fn new(fee: Decimal) -> Self {
        Self {
            fee,
            next_index: AtomicU64::new(1_000_000),
            faults: FaultPlan::default(),
            receipts: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for SimulatedSettlement {
    fn default() -> Self {
        Self::new(Decimal::new(12, 6))
    }
}

fault_controls!(SimulatedSettlement);

#[async_trait]
impl SettlementClient for SimulatedSettlement {
    async fn settle(&self, request: &SettlementRequest) -> Result<SettlementReceipt, LedgerError> {
        self.faults.enter("settlement").await?;

        if request.amount <= Decimal::ZERO {
            return Err(LedgerError::Rejected {
                code: codes::LEDGER_REJECTED.to_string(),
                message: "amount must be positive".to_string(),
            });
        }

        let mut receipts = self.receipts.lock().await;
        if let Some(receipt) = receipts.get(&request.operation_id) {
            return Ok(receipt.clone());
        }

        let amount = request.amount.to_string();
        let tx_digest = digest(&[
            &request.operation_id.0.as_bytes()[..],
            amount.as_bytes(),
            request.currency.as_bytes(),
            request.destination.as_bytes(),
        ]);

        let receipt = SettlementReceipt {
            ledger_index: self.next_index.fetch_add(1, Ordering::SeqCst),
            transaction_hash: hex::encode_upper(tx_digest),
            validated: true,
            fee: self.fee,
            result: "SUCCESS".to_string(),
        };
        receipts.insert(request.operation_id, receipt.clone());

        debug!(
            "Simulated settlement of {} {} for operation {}",
            request.amount, request.currency, request.operation_id
        );
        Ok(receipt)
    }
}

/// Simulated smart-contract ledger.
pub struct SimulatedContract {
    next_round: AtomicU64,
    faults: FaultPlan,
    receipts: Mutex<HashMap<OperationId, ContractReceipt>>,
}

impl SimulatedContract {
    pub fn new() -> Self {
        Self {
            next_round: AtomicU64::new(1),
            faults: FaultPlan::default(),
            receipts: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for SimulatedContract {
    fn default() -> Self {
        Self::new()
    }
}

fault_controls!(SimulatedContract);

#[async_trait]
impl ContractClient for SimulatedContract {
    async fn invoke(&self, request: &ContractCallRequest) -> Result<ContractReceipt, LedgerError> {
        self.faults.enter("contract").await?;

        let mut receipts = self.receipts.lock().await;
        if let Some(receipt) = receipts.get(&request.operation_id) {
            return Ok(receipt.clone());
        }

        let round = self.next_round.fetch_add(1, Ordering::SeqCst);
        let tx_digest = digest(&[
            &request.app_id.to_be_bytes()[..],
            request.method.as_bytes(),
            &request.operation_id.0.as_bytes()[..],
        ]);

        let receipt = ContractReceipt {
            round,
            tx_id: hex::encode_upper(&tx_digest[..26]),
            confirmed_round: round,
            global_state_delta: Some(serde_json::json!({
                "method": request.method,
                "argCount": request.args.len(),
            })),
        };
        receipts.insert(request.operation_id, receipt.clone());

        Ok(receipt)
    }
}
