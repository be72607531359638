//! Ledger collaborators for the kernel orchestrator.
//!
//! This crate provides:
//! - The witness, settlement and contract collaborator contracts
//! - `HttpLedgerClient`, a JSON-over-HTTP implementation of all three
//! - Deterministic simulated collaborators with failure injection
//!
//! # Integration Flow
//!
//! 1. **Witness**: the orchestrator sends a `WitnessRequest` and stores the
//!    returned `WitnessReceipt` on the operation
//! 2. **Contract** (optional): a `ContractCallRequest` yields a `ContractReceipt`
//! 3. **Settlement**: payment operations send a `SettlementRequest` and
//!    store the `SettlementReceipt`
//!
//! Every failure is a `LedgerError`, which knows its registry code and
//! whether a retry may help.

pub mod client;
pub mod simulated;
pub mod types;

use async_trait::async_trait;
use kernel_types::{ContractReceipt, SettlementReceipt, WitnessReceipt};

pub use client::{HttpLedgerClient, LedgerError};
pub use simulated::{SimulatedContract, SimulatedFault, SimulatedSettlement, SimulatedWitness};
pub use types::{ContractCallRequest, RejectionBody, SettlementRequest, WitnessRequest};

/// Records a data hash on the append-only consensus ledger.
#[async_trait]
pub trait WitnessClient: Send + Sync {
    async fn witness(&self, request: &WitnessRequest) -> Result<WitnessReceipt, LedgerError>;
}

/// Moves value on the settlement ledger.
#[async_trait]
pub trait SettlementClient: Send + Sync {
    async fn settle(&self, request: &SettlementRequest) -> Result<SettlementReceipt, LedgerError>;
}

/// Invokes an application method on the contract ledger.
#[async_trait]
pub trait ContractClient: Send + Sync {
    async fn invoke(&self, request: &ContractCallRequest) -> Result<ContractReceipt, LedgerError>;
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
