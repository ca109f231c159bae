//! Server state management.

use std::sync::Arc;

use crate::orchestration::Orchestrator;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Shared server state handed to every HTTP request handler.
///
/// A thin clone-able wrapper around the orchestrator context; the
/// orchestrator itself is built once in the binary and shared here.
#[derive(Clone)]
pub struct ServerState {
    orchestrator: Arc<Orchestrator>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ServerState {
    /// Creates a new server state over an orchestrator.
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// The orchestrator context.
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }
}
