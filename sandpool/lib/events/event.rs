use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::registry::RunState;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A progress event published for a single run.
///
/// Events are serialized with a `type` tag matching the SSE event name the
/// UI subscribes to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RunEvent {
    /// A human-readable progress line.
    Log {
        /// The run the event belongs to.
        run_id: Uuid,
        /// The log line.
        message: String,
        /// When the event was produced.
        timestamp: DateTime<Utc>,
    },

    /// A lifecycle state change.
    Status {
        /// The run the event belongs to.
        run_id: Uuid,
        /// The state the run entered.
        status: RunState,
        /// When the event was produced.
        timestamp: DateTime<Utc>,
    },

    /// The terminal success event carrying the endpoint and timing breakdown.
    Ready {
        /// The run the event belongs to.
        run_id: Uuid,
        /// The externally reachable URL of the sandbox.
        ingress_endpoint: String,
        /// Time to obtain a usable compute unit.
        bootstrap_ms: u64,
        /// Time to materialize application state, when measured.
        restore_ms: Option<u64>,
        /// End-to-end provisioning time.
        total_ms: u64,
        /// When the event was produced.
        timestamp: DateTime<Utc>,
    },

    /// The terminal failure event.
    Error {
        /// The run the event belongs to.
        run_id: Uuid,
        /// The failure detail.
        message: String,
        /// When the event was produced.
        timestamp: DateTime<Utc>,
    },

    /// Emitted once when a run is deleted, with its total wall-clock runtime.
    Complete {
        /// The run the event belongs to.
        run_id: Uuid,
        /// Wall-clock milliseconds from admission to deletion.
        duration_ms: u64,
        /// When the event was produced.
        timestamp: DateTime<Utc>,
    },
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RunEvent {
    /// Creates a log event.
    pub fn log(run_id: Uuid, message: impl Into<String>) -> Self {
        RunEvent::Log {
            run_id,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Creates a status event.
    pub fn status(run_id: Uuid, status: RunState) -> Self {
        RunEvent::Status {
            run_id,
            status,
            timestamp: Utc::now(),
        }
    }

    /// Creates a ready event.
    pub fn ready(
        run_id: Uuid,
        ingress_endpoint: impl Into<String>,
        bootstrap_ms: u64,
        restore_ms: Option<u64>,
        total_ms: u64,
    ) -> Self {
        RunEvent::Ready {
            run_id,
            ingress_endpoint: ingress_endpoint.into(),
            bootstrap_ms,
            restore_ms,
            total_ms,
            timestamp: Utc::now(),
        }
    }

    /// Creates an error event.
    pub fn error(run_id: Uuid, message: impl Into<String>) -> Self {
        RunEvent::Error {
            run_id,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Creates a complete event.
    pub fn complete(run_id: Uuid, duration_ms: u64) -> Self {
        RunEvent::Complete {
            run_id,
            duration_ms,
            timestamp: Utc::now(),
        }
    }

    /// The SSE event name of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            RunEvent::Log { .. } => "log",
            RunEvent::Status { .. } => "status",
            RunEvent::Ready { .. } => "ready",
            RunEvent::Error { .. } => "error",
            RunEvent::Complete { .. } => "complete",
        }
    }

    /// Whether the event is terminal and must never be evicted from the
    /// replay buffer.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunEvent::Ready { .. } | RunEvent::Error { .. } | RunEvent::Complete { .. }
        )
    }
}
