use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pool::ProviderHandle;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The provisioning path of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    /// On-demand provisioning with no pre-warming.
    Cold,

    /// Acquisition from the pre-warmed pool, falling back to on-demand creation.
    Warm,
}

/// The lifecycle state of a run.
///
/// Transitions are monotonic: `Creating -> {Running, Failed}` and
/// `Running -> Deleted`. `Failed` and `Deleted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// The sandbox is being acquired or created.
    Creating,

    /// The sandbox is reachable and serving.
    Running,

    /// Provisioning failed; terminal.
    Failed,

    /// The sandbox was deleted; terminal.
    Deleted,
}

/// Why a run was deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteReason {
    /// The run outlived its assigned lifetime window.
    Expired,

    /// An explicit user-initiated deletion.
    UserRequested,

    /// The run was marked gone although the provider-side delete failed.
    FailedCleanup,
}

/// One provisioning attempt and its resulting sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Unique identifier, generated at admission.
    pub run_id: Uuid,

    /// The provisioning path of the run.
    pub kind: RunKind,

    /// Identifier of the sandbox image/flavor, e.g. `"python"`.
    pub resource_class: String,

    /// Whether the restore phase uses a snapshot or a fresh build.
    pub use_snapshot: bool,

    /// The lifecycle state of the run.
    pub state: RunState,

    /// Opaque reference to the provisioned resource, set once acquired.
    pub provider_handle: Option<ProviderHandle>,

    /// Externally reachable URL, set only when running.
    pub ingress_endpoint: Option<String>,

    /// Time to obtain a usable compute unit, by pool hit or creation.
    pub bootstrap_ms: Option<u64>,

    /// Time to materialize application state onto the compute unit.
    pub restore_ms: Option<u64>,

    /// End-to-end provisioning time.
    pub total_ms: Option<u64>,

    /// Whether the compute unit came from the warm pool, once known.
    pub pool_hit: Option<bool>,

    /// Failure detail, surfaced on status queries for failed runs.
    pub error: Option<String>,

    /// Timestamp at admission.
    pub created_at: DateTime<Utc>,

    /// Auto-cleanup deadline, assigned once on entry to running.
    pub expires_at: Option<DateTime<Utc>>,

    /// Why the run was deleted, for terminal deleted runs.
    pub deleted_reason: Option<DeleteReason>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RunState {
    /// Whether no further transition is possible from this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Failed | RunState::Deleted)
    }
}

impl Run {
    /// Creates a new run in the `Creating` state.
    pub fn new(kind: RunKind, resource_class: impl Into<String>, use_snapshot: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            kind,
            resource_class: resource_class.into(),
            use_snapshot,
            state: RunState::Creating,
            provider_handle: None,
            ingress_endpoint: None,
            bootstrap_ms: None,
            restore_ms: None,
            total_ms: None,
            pool_hit: None,
            error: None,
            created_at: Utc::now(),
            expires_at: None,
            deleted_reason: None,
        }
    }

    /// Whether the run occupies an active slot (`Creating` or `Running`).
    pub fn is_active(&self) -> bool {
        matches!(self.state, RunState::Creating | RunState::Running)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunKind::Cold => write!(f, "cold"),
            RunKind::Warm => write!(f, "warm"),
        }
    }
}

impl Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Creating => write!(f, "creating"),
            RunState::Running => write!(f, "running"),
            RunState::Failed => write!(f, "failed"),
            RunState::Deleted => write!(f, "deleted"),
        }
    }
}

impl Display for DeleteReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeleteReason::Expired => write!(f, "expired"),
            DeleteReason::UserRequested => write!(f, "user_requested"),
            DeleteReason::FailedCleanup => write!(f, "failed_cleanup"),
        }
    }
}
