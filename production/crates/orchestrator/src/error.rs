//! Error types for the orchestration service

use kernel_ledger::LedgerError;
use kernel_types::registry::{self, codes};
use kernel_types::{OperationId, OperationStatus};
use thiserror::Error;

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Errors that can occur during orchestration
#[derive(Error, Debug)]
pub enum OrchestrationError {
    #[error("Operation {0} not found")]
    OperationNotFound(OperationId),

    #[error("Invalid state transition for operation {id}: {from} -> {to}")]
    InvalidTransition {
        id: OperationId,
        from: OperationStatus,
        to: OperationStatus,
    },

    #[error("Operation {id} is {actual}, expected {expected}")]
    StateMismatch {
        id: OperationId,
        expected: OperationStatus,
        actual: OperationStatus,
    },

    #[error("Operation {id} cannot be cancelled while {status}")]
    NotCancellable {
        id: OperationId,
        status: OperationStatus,
    },

    #[error("Operation {id} cannot be retried while {status}; only failed operations can be retried")]
    NotRetryable {
        id: OperationId,
        status: OperationStatus,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(#[from] kernel_types::Error),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Shutdown signal received")]
    Shutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestrationError {
    /// Registry code describing this error.
    pub fn code(&self) -> &str {
        match self {
            OrchestrationError::OperationNotFound(_) => codes::OPERATION_NOT_FOUND,
            OrchestrationError::InvalidTransition { .. }
            | OrchestrationError::StateMismatch { .. } => codes::INVALID_STATE_TRANSITION,
            OrchestrationError::NotCancellable { .. } => codes::OPERATION_NOT_CANCELLABLE,
            OrchestrationError::NotRetryable { .. } => codes::OPERATION_NOT_RETRYABLE,
            OrchestrationError::Validation(_) => codes::VALIDATION_FAILED,
            OrchestrationError::Storage(kernel_types::Error::OperationNotFound(_))
            | OrchestrationError::Storage(kernel_types::Error::MetadataNotFound(_)) => {
                codes::OPERATION_NOT_FOUND
            }
            OrchestrationError::Storage(kernel_types::Error::InvalidOperationId(_))
            | OrchestrationError::Storage(kernel_types::Error::InvalidOperationType(_))
            | OrchestrationError::Storage(kernel_types::Error::InvalidStatus(_)) => {
                codes::VALIDATION_FAILED
            }
            OrchestrationError::Storage(_) => codes::STORAGE_ERROR,
            OrchestrationError::Ledger(e) => e.code().unwrap_or(codes::PROCESSING_FAILED),
            OrchestrationError::Config(_)
            | OrchestrationError::Shutdown
            | OrchestrationError::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    pub fn is_retryable(&self) -> bool {
        registry::is_retryable(self.code())
    }

    /// Operation the error refers to, when there is one.
    pub fn operation_id(&self) -> Option<OperationId> {
        match self {
            OrchestrationError::OperationNotFound(id)
            | OrchestrationError::InvalidTransition { id, .. }
            | OrchestrationError::StateMismatch { id, .. }
            | OrchestrationError::NotCancellable { id, .. }
            | OrchestrationError::NotRetryable { id, .. } => Some(*id),
            OrchestrationError::Storage(kernel_types::Error::OperationNotFound(id))
            | OrchestrationError::Storage(kernel_types::Error::MetadataNotFound(id)) => Some(*id),
            _ => None,
        }
    }
}

impl From<tokio::task::JoinError> for OrchestrationError {
    fn from(err: tokio::task::JoinError) -> Self {
        OrchestrationError::Internal(format!("Task join error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        let id = OperationId::new();
        assert_eq!(
            OrchestrationError::OperationNotFound(id).code(),
            codes::OPERATION_NOT_FOUND
        );
        assert_eq!(
            OrchestrationError::NotCancellable {
                id,
                status: OperationStatus::Processing
            }
            .code(),
            codes::OPERATION_NOT_CANCELLABLE
        );
        assert_eq!(
            OrchestrationError::Ledger(LedgerError::Failed("boom".into())).code(),
            codes::PROCESSING_FAILED
        );
        assert_eq!(
            OrchestrationError::Ledger(LedgerError::Timeout("slow".into())).code(),
            codes::LEDGER_TIMEOUT
        );
        assert_eq!(
            OrchestrationError::Storage(kernel_types::Error::StorageError("down".into())).code(),
            codes::STORAGE_ERROR
        );
    }

    #[test]
    fn test_retryability_follows_registry() {
        let id = OperationId::new();
        assert!(!OrchestrationError::Validation("bad".into()).is_retryable());
        assert!(!OrchestrationError::InvalidTransition {
            id,
            from: OperationStatus::Settled,
            to: OperationStatus::Pending
        }
        .is_retryable());
        assert!(OrchestrationError::Ledger(LedgerError::Unavailable("x".into())).is_retryable());
        assert_eq!(OrchestrationError::OperationNotFound(id).operation_id(), Some(id));
    }
}
