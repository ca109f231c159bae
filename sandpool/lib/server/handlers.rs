//! HTTP request handlers for the REST API.
//!
//! This module implements the handlers for each API endpoint. The handlers
//! coordinate with the Orchestrator to perform the requested operations.

use std::convert::Infallible;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use chrono::Utc;
use futures::Stream;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::{
    registry::{DeleteReason, RunKind},
    SandpoolError, SandpoolResult,
};

use super::{
    state::ServerState,
    types::{
        ActiveCounts, ErrorResponse, HealthResponse, HistoryQuery, HistoryResponse, LaunchRequest,
        LaunchResponse, LimitsResponse, PoolStatusResponse, StatusResponse,
    },
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Keepalive cadence on idle SSE connections, preventing intermediary
/// timeouts from severing long-lived streams.
const SSE_KEEPALIVE_SECS: u64 = 15;

/// Default and maximum row counts for the history endpoint.
const DEFAULT_HISTORY_LIMIT: u32 = 100;
const MAX_HISTORY_LIMIT: u32 = 1000;

//--------------------------------------------------------------------------------------------------
// Functions: Handlers
//--------------------------------------------------------------------------------------------------

/// Handler for the GET /health endpoint
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now(),
    })
}

/// Handler for the POST /api/launch/cold endpoint
pub async fn launch_cold_handler(
    State(state): State<ServerState>,
    Json(req): Json<LaunchRequest>,
) -> Response {
    launch(state, RunKind::Cold, req).await
}

/// Handler for the POST /api/launch/warm endpoint
pub async fn launch_warm_handler(
    State(state): State<ServerState>,
    Json(req): Json<LaunchRequest>,
) -> Response {
    launch(state, RunKind::Warm, req).await
}

/// Handler for the GET /api/sandbox/{run_id} endpoint
pub async fn get_sandbox_handler(
    State(state): State<ServerState>,
    Path(run_id): Path<Uuid>,
) -> Response {
    match state.orchestrator().registry().get(run_id) {
        Some(run) => (StatusCode::OK, Json(run)).into_response(),
        None => error_response(&SandpoolError::RunNotFound(run_id)),
    }
}

/// Handler for the DELETE /api/sandbox/{run_id} endpoint
///
/// Idempotent: deleting an already-deleted run succeeds with no effect.
pub async fn delete_sandbox_handler(
    State(state): State<ServerState>,
    Path(run_id): Path<Uuid>,
) -> Response {
    match state
        .orchestrator()
        .delete(run_id, DeleteReason::UserRequested)
        .await
    {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(&e),
    }
}

/// Handler for the GET /api/stream/{run_id} endpoint
///
/// Streams the run's full buffered history first, then live events, with a
/// periodic keepalive. Closing the connection stops delivery to this
/// subscriber only; it never cancels the underlying provisioning work.
pub async fn stream_handler(
    State(state): State<ServerState>,
    Path(run_id): Path<Uuid>,
) -> Response {
    if state.orchestrator().registry().get(run_id).is_none() {
        return error_response(&SandpoolError::RunNotFound(run_id));
    }

    let subscription = state.orchestrator().events().subscribe(run_id);

    Sse::new(event_stream(subscription))
        .keep_alive(
            KeepAlive::new()
                .interval(std::time::Duration::from_secs(SSE_KEEPALIVE_SECS))
                .text("keepalive"),
        )
        .into_response()
}

/// Handler for the GET /api/status endpoint
pub async fn status_handler(State(state): State<ServerState>) -> Response {
    match handle_status(state).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Handler for the GET /api/limits endpoint
pub async fn limits_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let orchestrator = state.orchestrator();
    let config = orchestrator.config();

    Json(LimitsResponse {
        max_per_hour: *config.get_max_per_hour(),
        max_concurrent_cold: *config.get_max_concurrent_cold(),
        max_concurrent_warm: *config.get_max_concurrent_warm(),
        rate: orchestrator.limiter().status(),
    })
}

/// Handler for the GET /api/pool/status endpoint
pub async fn pool_status_handler(State(state): State<ServerState>) -> Response {
    match handle_pool_status(&state).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Handler for the GET /api/history endpoint
pub async fn history_handler(
    State(state): State<ServerState>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);

    match state.orchestrator().history().recent_runs(limit).await {
        Ok(history) => {
            let count = history.len();
            (StatusCode::OK, Json(HistoryResponse { history, count })).into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// Handler for the GET /api/stats endpoint
pub async fn stats_handler(State(state): State<ServerState>) -> Response {
    match state.orchestrator().history().stats().await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(e) => error_response(&e),
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Shared implementation of the launch endpoints.
async fn launch(state: ServerState, kind: RunKind, req: LaunchRequest) -> Response {
    match state
        .orchestrator()
        .launch(kind, &req.resource_class, req.use_snapshot)
        .await
    {
        Ok((run_id, stream_url)) => {
            let snapshot_text = if req.use_snapshot {
                "from snapshot"
            } else {
                "from fresh build"
            };
            (
                StatusCode::OK,
                Json(LaunchResponse {
                    run_id,
                    stream_url,
                    message: format!(
                        "Launching {kind} sandbox {snapshot_text} for {}",
                        req.resource_class
                    ),
                }),
            )
                .into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// Implementation of the status operation
async fn handle_status(state: ServerState) -> SandpoolResult<StatusResponse> {
    let orchestrator = state.orchestrator();
    let active = orchestrator.registry().list_active();

    let cold = active.iter().filter(|r| r.kind == RunKind::Cold).count();
    let warm = active.iter().filter(|r| r.kind == RunKind::Warm).count();
    let total = active.len();

    let pool = handle_pool_status(&state).await?;

    Ok(StatusResponse {
        active,
        active_counts: ActiveCounts { cold, warm, total },
        pool,
        rate: orchestrator.limiter().status(),
        recent: orchestrator.registry().list_recent_terminal(10),
    })
}

/// Implementation of the pool status operation
async fn handle_pool_status(state: &ServerState) -> SandpoolResult<PoolStatusResponse> {
    let orchestrator = state.orchestrator();
    let classes = orchestrator.coordinator().reconciled_snapshot().await?;

    let ready = classes.values().map(|m| m.ready).sum();
    let creating = classes.values().map(|m| m.creating).sum();
    let in_use = orchestrator
        .registry()
        .list_active()
        .iter()
        .filter(|r| r.kind == RunKind::Warm)
        .count();

    Ok(PoolStatusResponse {
        ready,
        creating,
        in_use,
        classes,
    })
}

/// Adapts a bus subscription into an SSE event stream: replay first, then
/// live events until the run's channel closes.
fn event_stream(
    subscription: crate::events::Subscription,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let crate::events::Subscription { replay, mut live } = subscription;

    async_stream::stream! {
        for event in replay {
            yield Ok(to_sse_event(&event));
        }

        loop {
            match live.recv().await {
                Ok(event) => yield Ok(to_sse_event(&event)),
                // A lagged subscriber missed broadcast entries; the stream
                // continues with what is still current.
                Err(RecvError::Lagged(missed)) => {
                    tracing::debug!(missed, "sse subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}

fn to_sse_event(event: &crate::events::RunEvent) -> Event {
    match Event::default().event(event.kind()).json_data(event) {
        Ok(sse) => sse,
        Err(e) => {
            tracing::warn!(error = %e, "failed to serialize run event");
            Event::default().event(event.kind())
        }
    }
}

/// Maps a `SandpoolError` to its HTTP representation.
fn error_response(error: &SandpoolError) -> Response {
    let status = match error {
        e if e.is_admission_denial() => StatusCode::TOO_MANY_REQUESTS,
        SandpoolError::RunNotFound(_) => StatusCode::NOT_FOUND,
        SandpoolError::InvalidTransition { .. } => StatusCode::CONFLICT,
        SandpoolError::ProvisionTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}
