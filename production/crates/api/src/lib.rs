//! Kernel Orchestrator API
//!
//! REST surface over the operation orchestrator:
//! - `/api/v1/operations` - admission, queries, cancel and retry
//! - `/api/v1/timing` - clock status, timestamps and certificates
//! - `/api/v1/errors` - the error registry
//! - `/health`

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

use axum::{routing::get, Router};
use std::net::SocketAddr;
use tracing::info;

pub use error::ApiError;
pub use state::AppState;

/// Result type for route handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// Build the full router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1/operations", routes::operations::routes())
        .nest("/api/v1/timing", routes::system::timing_routes())
        .nest("/api/v1/errors", routes::system::error_routes())
        .route("/health", get(routes::system::health))
        .with_state(state)
}

/// Serve the API on `addr` until the task is aborted
pub async fn start_server(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("API server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
