//! Route definitions for the HTTP server.
//!
//! This module sets up the routing for the REST API endpoints.

use axum::{
    routing::{get, post},
    Router,
};

use super::{handlers, state::ServerState};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates a new router with all API endpoints configured
///
/// ## Arguments
/// * `state` - The shared server state
///
/// # Returns
/// A configured Router instance
pub fn create_router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/api/launch/cold", post(handlers::launch_cold_handler))
        .route("/api/launch/warm", post(handlers::launch_warm_handler))
        .route(
            "/api/sandbox/{run_id}",
            get(handlers::get_sandbox_handler).delete(handlers::delete_sandbox_handler),
        )
        .route("/api/stream/{run_id}", get(handlers::stream_handler))
        .route("/api/status", get(handlers::status_handler))
        .route("/api/limits", get(handlers::limits_handler))
        .route("/api/pool/status", get(handlers::pool_status_handler))
        .route("/api/history", get(handlers::history_handler))
        .route("/api/stats", get(handlers::stats_handler))
        .with_state(state)
}
