use std::{
    error::Error,
    fmt::{self, Display},
};
use thiserror::Error;

use uuid::Uuid;

use crate::registry::{RunKind, RunState};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a sandpool-related operation.
pub type SandpoolResult<T> = Result<T, SandpoolError>;

/// An error that occurred during a sandpool operation.
#[derive(Debug, Error)]
pub enum SandpoolError {
    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An error that can represent any error.
    #[error(transparent)]
    Custom(#[from] AnyError),

    /// The hourly launch budget is exhausted.
    #[error("rate limit exceeded: {used}/{limit} runs this hour, resets in {reset_in_seconds}s")]
    RateLimitExceeded {
        /// Launches admitted in the current hour window.
        used: u32,
        /// The configured hourly ceiling.
        limit: u32,
        /// Seconds until the window rolls over.
        reset_in_seconds: u64,
    },

    /// The per-kind concurrency ceiling is reached.
    #[error("max {kind} sandboxes reached: {active}/{limit}")]
    ConcurrencyLimitExceeded {
        /// The kind of launch that was denied.
        kind: RunKind,
        /// Currently active runs of that kind.
        active: u32,
        /// The configured ceiling for that kind.
        limit: u32,
    },

    /// A provider call exceeded its deadline.
    #[error("provisioning timed out after {0}s")]
    ProvisionTimeout(u64),

    /// An opaque failure reported by the external provisioner.
    #[error("provider error: {0}")]
    Provider(String),

    /// The requested run does not exist in the registry.
    #[error("run not found: {0}")]
    RunNotFound(Uuid),

    /// A run with this ID already exists in the registry.
    #[error("duplicate run: {0}")]
    DuplicateRun(Uuid),

    /// The requested lifecycle edge is not in the transition table.
    #[error("invalid transition for run {run_id}: {state} -> {event}")]
    InvalidTransition {
        /// The run whose transition was rejected.
        run_id: Uuid,
        /// The state the run was in.
        state: RunState,
        /// The requested transition event.
        event: &'static str,
    },

    /// Configuration failed validation.
    #[error("configuration validation errors: {}", .0.join(", "))]
    ConfigValidation(Vec<String>),

    /// An error that occurred during a database operation.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// An error that occurred while running database migrations.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// An error that occurred during an HTTP request.
    #[error("http request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// An error that occurred during an HTTP middleware operation.
    #[error("http middleware error: {0}")]
    HttpMiddleware(#[from] reqwest_middleware::Error),

    /// An error that occurred when a join handle returned an error.
    #[error("join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SandpoolError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> SandpoolError {
        SandpoolError::Custom(AnyError {
            error: error.into(),
        })
    }

    /// Whether the error is an admission denial that should surface as HTTP 429.
    pub fn is_admission_denial(&self) -> bool {
        matches!(
            self,
            SandpoolError::RateLimitExceeded { .. } | SandpoolError::ConcurrencyLimitExceeded { .. }
        )
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates an `Ok` `SandpoolResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> SandpoolResult<T> {
    Result::Ok(value)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}
