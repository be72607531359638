//! Timing, error catalog and health endpoints

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use kernel_orchestrator::{SyncStatus, TimestampCertificate, TimestampReading};
use kernel_types::registry::{self, ErrorDefinition};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::handlers::operations::parse_operation_id;
use crate::{state::AppState, ApiResult};

/// Create timing routes, mounted under `/api/v1/timing`
pub fn timing_routes() -> Router<AppState> {
    Router::new()
        .route("/status", get(timing_status))
        .route("/timestamp", get(timestamp))
        .route("/certify", post(certify))
}

/// Create error catalog routes, mounted under `/api/v1/errors`
pub fn error_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_errors))
        .route("/{code}", get(get_error))
}

/// Request to certify a timestamp for an operation
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertifyRequest {
    pub operation_id: String,
    /// Defaults to the current logical time.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: DateTime<Utc>,
    pub sync: SyncStatus,
}

/// GET /api/v1/timing/status - Current clock synchronization
pub async fn timing_status(State(state): State<AppState>) -> Json<SyncStatus> {
    Json(state.timing.get_sync_status())
}

/// GET /api/v1/timing/timestamp - One strictly increasing timestamp
pub async fn timestamp(State(state): State<AppState>) -> Json<TimestampReading> {
    Json(state.timing.get_timestamp())
}

/// POST /api/v1/timing/certify - Certify a timestamp for an existing operation
pub async fn certify(
    State(state): State<AppState>,
    payload: Result<Json<CertifyRequest>, JsonRejection>,
) -> ApiResult<Json<TimestampCertificate>> {
    let Json(request) = payload?;
    let id = parse_operation_id(&request.operation_id)?;

    // 404 for unknown operations
    state.orchestrator.get_operation(id).await?;

    let timestamp = request.timestamp.unwrap_or_else(|| state.timing.now());
    Ok(Json(state.timing.certify_timestamp(timestamp, id)))
}

/// GET /api/v1/errors - The full error registry
pub async fn list_errors() -> Json<&'static [ErrorDefinition]> {
    Json(registry::all())
}

/// GET /api/v1/errors/{code}
pub async fn get_error(Path(code): Path<String>) -> ApiResult<Json<ErrorDefinition>> {
    registry::lookup(&code)
        .copied()
        .map(Json)
        .ok_or(ApiError::UnknownErrorCode(code))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let sync = state.timing.get_sync_status();
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: state.timing.now(),
        sync,
    })
}
