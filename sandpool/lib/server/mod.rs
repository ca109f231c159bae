//! HTTP/SSE surface for the orchestrator.
//!
//! This module implements the thin REST API in front of the orchestrator
//! core. It provides endpoints to:
//! - Launch cold and warm sandboxes
//! - Stream per-run provisioning events (replay + live)
//! - Inspect status, limits, pool state and run history
//! - Delete sandboxes (idempotent)

mod handlers;
mod routes;
mod state;
mod types;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use handlers::*;
pub use routes::*;
pub use state::*;
pub use types::*;
