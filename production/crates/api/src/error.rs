//! API error type and its JSON rendering

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use kernel_orchestrator::OrchestrationError;
use kernel_types::registry::{self, codes};
use kernel_types::OperationId;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Unknown error code: {0}")]
    UnknownErrorCode(String),

    #[error(transparent)]
    Orchestration(#[from] OrchestrationError),

    #[error("{0}")]
    InternalError(String),
}

impl ApiError {
    /// Registry code reported to the client.
    pub fn code(&self) -> &str {
        match self {
            ApiError::BadRequest(_) | ApiError::UnknownErrorCode(_) => codes::VALIDATION_FAILED,
            ApiError::NotFound(_) => codes::OPERATION_NOT_FOUND,
            ApiError::Orchestration(e) => e.code(),
            ApiError::InternalError(_) => codes::INTERNAL_ERROR,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::UnknownErrorCode(_) => StatusCode::NOT_FOUND,
            ApiError::Orchestration(OrchestrationError::Shutdown) => StatusCode::SERVICE_UNAVAILABLE,
            _ => status_for_code(self.code()),
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            ApiError::Orchestration(OrchestrationError::InvalidTransition { from, to, .. }) => {
                Some(json!({ "from": from, "to": to }))
            }
            ApiError::Orchestration(OrchestrationError::StateMismatch {
                expected, actual, ..
            }) => Some(json!({ "expected": expected, "actual": actual })),
            ApiError::Orchestration(OrchestrationError::NotCancellable { status, .. })
            | ApiError::Orchestration(OrchestrationError::NotRetryable { status, .. }) => {
                Some(json!({ "status": status }))
            }
            _ => None,
        }
    }

    fn operation_id(&self) -> Option<OperationId> {
        match self {
            ApiError::Orchestration(e) => e.operation_id(),
            _ => None,
        }
    }
}

/// HTTP status for a registry code.
pub fn status_for_code(code: &str) -> StatusCode {
    match code {
        codes::VALIDATION_FAILED => StatusCode::BAD_REQUEST,
        codes::OPERATION_NOT_FOUND => StatusCode::NOT_FOUND,
        codes::INVALID_STATE_TRANSITION
        | codes::OPERATION_NOT_CANCELLABLE
        | codes::OPERATION_NOT_RETRYABLE
        | codes::ALREADY_PROCESSED => StatusCode::CONFLICT,
        codes::INSUFFICIENT_FUNDS | codes::INVALID_SIGNATURE | codes::LEDGER_REJECTED => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        codes::NETWORK_CONGESTION => StatusCode::TOO_MANY_REQUESTS,
        codes::LEDGER_UNAVAILABLE => StatusCode::SERVICE_UNAVAILABLE,
        codes::LEDGER_TIMEOUT => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code().to_string();

        if status.is_server_error() {
            error!("API error {} ({}): {}", status, code, self);
        } else {
            warn!("API error {} ({}): {}", status, code, self);
        }

        let mut error = json!({
            "code": code,
            "message": self.to_string(),
            "retryable": registry::is_retryable(&code),
        });
        if let Some(details) = self.details() {
            error["details"] = details;
        }
        if let Some(after) = registry::suggested_retry_after(&code) {
            error["suggestedRetryAfterMs"] = json!(after.as_millis() as u64);
        }

        let mut body = json!({
            "error": error,
            "requestId": Uuid::new_v4().to_string(),
            "timestamp": Utc::now(),
        });
        if let Some(id) = self.operation_id() {
            body["operationId"] = json!(id);
        }

        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<kernel_types::Error> for ApiError {
    fn from(err: kernel_types::Error) -> Self {
        ApiError::Orchestration(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_types::OperationStatus;

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for_code(codes::VALIDATION_FAILED), StatusCode::BAD_REQUEST);
        assert_eq!(status_for_code(codes::OPERATION_NOT_FOUND), StatusCode::NOT_FOUND);
        assert_eq!(status_for_code(codes::OPERATION_NOT_CANCELLABLE), StatusCode::CONFLICT);
        assert_eq!(status_for_code(codes::LEDGER_TIMEOUT), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status_for_code("SOMETHING_NEW"), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_not_found_body() {
        let id = OperationId::new();
        let response = ApiError::from(OrchestrationError::OperationNotFound(id)).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], codes::OPERATION_NOT_FOUND);
        assert_eq!(body["error"]["retryable"], false);
        assert!(body["error"].get("suggestedRetryAfterMs").is_none());
        assert_eq!(body["operationId"], json!(id));
        assert!(body["requestId"].is_string());
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_state_fault_carries_details() {
        let id = OperationId::new();
        let response = ApiError::from(OrchestrationError::NotCancellable {
            id,
            status: OperationStatus::Processing,
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], codes::OPERATION_NOT_CANCELLABLE);
        assert_eq!(body["error"]["details"]["status"], "processing");
    }

    #[tokio::test]
    async fn test_retryable_error_suggests_delay() {
        let response = ApiError::from(OrchestrationError::Storage(
            kernel_types::Error::StorageError("pool exhausted".to_string()),
        ))
        .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], codes::STORAGE_ERROR);
        assert_eq!(body["error"]["retryable"], true);
        assert_eq!(body["error"]["suggestedRetryAfterMs"], 1000);
    }
}
