//! Operation endpoints

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use kernel_orchestrator::{OperationPage, OperationSummary, TimelineEntry};
use kernel_types::{
    CreateOperationRequest, Operation, OperationAck, StateTransitionRecord,
    UnifiedOperationMetadata,
};
use tracing::info;

use crate::handlers::operations::{
    list_params, parse_cancel_body, parse_operation_id, ListOperationsQuery,
};
use crate::{state::AppState, ApiResult};

/// Create operation routes, mounted under `/api/v1/operations`
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_operation).get(list_operations))
        .route("/summary", get(summary))
        .route("/{id}", get(get_operation))
        .route("/{id}/metadata", get(get_metadata))
        .route("/{id}/timeline", get(get_timeline))
        .route("/{id}/history", get(get_history))
        .route("/{id}/cancel", post(cancel_operation))
        .route("/{id}/retry", post(retry_operation))
}

/// POST /api/v1/operations - Admit a new operation
///
/// Returns 202 as soon as the operation is queued; the pipeline runs in
/// the background.
pub async fn create_operation(
    State(state): State<AppState>,
    payload: Result<Json<CreateOperationRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<OperationAck>)> {
    let Json(request) = payload?;
    let ack = state.orchestrator.create_operation(request).await?;
    info!("Accepted operation {} ({})", ack.operation_id, ack.kernel_op_id);
    Ok((StatusCode::ACCEPTED, Json(ack)))
}

/// GET /api/v1/operations - List operations, newest first
///
/// Query parameters: `page`, `limit`, `status`, `operationType`
pub async fn list_operations(
    State(state): State<AppState>,
    query: Result<Query<ListOperationsQuery>, QueryRejection>,
) -> ApiResult<Json<OperationPage>> {
    let Query(query) = query?;
    let params = list_params(query)?;
    Ok(Json(state.orchestrator.list_operations(params).await?))
}

/// GET /api/v1/operations/summary - Counts by status and type
pub async fn summary(State(state): State<AppState>) -> ApiResult<Json<OperationSummary>> {
    Ok(Json(state.orchestrator.summary().await?))
}

/// GET /api/v1/operations/{id}
pub async fn get_operation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Operation>> {
    let id = parse_operation_id(&id)?;
    Ok(Json(state.orchestrator.get_operation(id).await?))
}

/// GET /api/v1/operations/{id}/metadata - Unified metadata with audit trail
pub async fn get_metadata(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<UnifiedOperationMetadata>> {
    let id = parse_operation_id(&id)?;
    Ok(Json(state.orchestrator.get_metadata(id).await?))
}

/// GET /api/v1/operations/{id}/timeline
pub async fn get_timeline(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<TimelineEntry>>> {
    let id = parse_operation_id(&id)?;
    Ok(Json(state.orchestrator.timeline(id).await?))
}

/// GET /api/v1/operations/{id}/history - State transitions in order
pub async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<StateTransitionRecord>>> {
    let id = parse_operation_id(&id)?;
    Ok(Json(state.orchestrator.history(id).await?))
}

/// POST /api/v1/operations/{id}/cancel - Body `{reason?}`, may be empty
pub async fn cancel_operation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Operation>> {
    let id = parse_operation_id(&id)?;
    let request = parse_cancel_body(&body)?;
    Ok(Json(
        state.orchestrator.cancel_operation(id, request.reason).await?,
    ))
}

/// POST /api/v1/operations/{id}/retry - Re-run a failed operation
pub async fn retry_operation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<Operation>)> {
    let id = parse_operation_id(&id)?;
    let operation = state.orchestrator.retry_operation(id).await?;
    Ok((StatusCode::ACCEPTED, Json(operation)))
}
