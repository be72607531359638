//! Request parsing for the operation endpoints

use kernel_orchestrator::ListParams;
use kernel_types::{OperationId, OperationStatus, OperationType};
use serde::Deserialize;
use std::str::FromStr;

use crate::error::ApiError;

/// Query parameters for listing operations
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOperationsQuery {
    /// 1-based page (default: 1)
    pub page: Option<usize>,
    /// Page size, 1..=100 (default: 20)
    pub limit: Option<usize>,
    pub status: Option<String>,
    pub operation_type: Option<String>,
}

/// Body of a cancel request
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    pub reason: Option<String>,
}

pub fn parse_operation_id(raw: &str) -> Result<OperationId, ApiError> {
    OperationId::from_str(raw)
        .map_err(|_| ApiError::BadRequest(format!("Invalid operation id: {}", raw)))
}

pub fn list_params(query: ListOperationsQuery) -> Result<ListParams, ApiError> {
    let defaults = ListParams::default();

    let status = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(OperationStatus::from_str)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let operation_type = query
        .operation_type
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(OperationType::from_str)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    Ok(ListParams {
        page: query.page.unwrap_or(defaults.page),
        limit: query.limit.unwrap_or(defaults.limit),
        status,
        operation_type,
    })
}

/// An empty body means no reason was given.
pub fn parse_cancel_body(body: &[u8]) -> Result<CancelRequest, ApiError> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(CancelRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid cancel request: {}", e)))
}
