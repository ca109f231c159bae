//! Type definitions for the server module.
//!
//! This module contains request and response types used by the REST API
//! endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::DEFAULT_RESOURCE_CLASS,
    history::HistoryRun,
    limiter::RateStatus,
    pool::PoolSnapshot,
    registry::Run,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Request body for the launch endpoints.
#[derive(Debug, Deserialize)]
pub struct LaunchRequest {
    /// The sandbox image/flavor to provision.
    #[serde(default = "default_resource_class")]
    pub resource_class: String,

    /// Use a snapshot (fast restore) or a fresh build (slow).
    #[serde(default = "default_use_snapshot")]
    pub use_snapshot: bool,
}

/// Response body for the launch endpoints.
#[derive(Debug, Serialize)]
pub struct LaunchResponse {
    /// The admitted run.
    pub run_id: Uuid,

    /// Where to stream this run's events.
    pub stream_url: String,

    /// Human-readable summary of what was launched.
    pub message: String,
}

/// Active run counts by kind.
#[derive(Debug, Serialize)]
pub struct ActiveCounts {
    /// Active cold runs.
    pub cold: usize,

    /// Active warm runs.
    pub warm: usize,

    /// All active runs.
    pub total: usize,
}

/// Reconciled pool state for the status endpoints.
#[derive(Debug, Serialize)]
pub struct PoolStatusResponse {
    /// Ready sandboxes across all classes, after reconciliation.
    pub ready: u32,

    /// Sandboxes reported mid-creation across all classes.
    pub creating: u32,

    /// Active warm runs currently holding pool-acquired sandboxes.
    pub in_use: usize,

    /// Per-class reconciled counters.
    pub classes: PoolSnapshot,
}

/// Response body for the `/api/status` endpoint.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// All runs in `creating` or `running`.
    pub active: Vec<Run>,

    /// Active run counts by kind.
    pub active_counts: ActiveCounts,

    /// Reconciled pool state.
    pub pool: PoolStatusResponse,

    /// Admission status.
    pub rate: RateStatus,

    /// Recently terminal runs still held in memory.
    pub recent: Vec<Run>,
}

/// Response body for the `/api/limits` endpoint.
#[derive(Debug, Serialize)]
pub struct LimitsResponse {
    /// Hourly launch ceiling.
    pub max_per_hour: u32,

    /// Concurrency ceiling for cold runs.
    pub max_concurrent_cold: u32,

    /// Concurrency ceiling for warm runs.
    pub max_concurrent_warm: u32,

    /// Current usage against those ceilings.
    pub rate: RateStatus,
}

/// Query parameters for the `/api/history` endpoint.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Maximum rows to return.
    pub limit: Option<u32>,
}

/// Response body for the `/api/history` endpoint.
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    /// Recorded terminal runs, newest first.
    pub history: Vec<HistoryRun>,

    /// Number of rows returned.
    pub count: usize,
}

/// Response body for the `/health` endpoint.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `"healthy"` when the process is serving.
    pub status: &'static str,

    /// Server time.
    pub timestamp: DateTime<Utc>,
}

/// Error response returned when an operation fails.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong.
    pub error: String,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn default_resource_class() -> String {
    DEFAULT_RESOURCE_CLASS.to_string()
}

fn default_use_snapshot() -> bool {
    true
}
