use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::SandpoolResult;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Opaque reference to an externally provisioned resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderHandle(pub String);

/// A provisioned resource visible in the provider's listing, tagged to this
/// service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnedResource {
    /// The resource handle.
    pub handle: ProviderHandle,

    /// The resource class the resource was provisioned for.
    pub resource_class: String,

    /// Whether the resource sits idle in the warm pool.
    pub pooled: bool,
}

/// Self-reported pool counters for one resource class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolClassMetrics {
    /// Sandboxes reported ready for acquisition.
    pub ready: u32,

    /// Sandboxes reported mid-creation.
    pub creating: u32,
}

/// Point-in-time view of the provider's pool, keyed by resource class.
///
/// Treated as an untrusted hint: reported counts are reconciled against
/// [`ProviderApi::list_owned`] before any scaling decision.
pub type PoolSnapshot = HashMap<String, PoolClassMetrics>;

/// The boundary to the external ephemeral-compute provisioner.
///
/// Every call is wrapped with a deadline by the caller; implementations are
/// not expected to enforce one themselves.
#[async_trait]
pub trait ProviderApi: Send + Sync {
    /// Attempts to acquire a pre-warmed sandbox of the given class.
    ///
    /// Returns `None` on a pool miss (empty pool); the caller falls back to
    /// on-demand creation.
    async fn acquire(&self, resource_class: &str) -> SandpoolResult<Option<ProviderHandle>>;

    /// Creates a sandbox of the given class on demand.
    async fn create(&self, resource_class: &str) -> SandpoolResult<ProviderHandle>;

    /// Materializes application state onto an acquired sandbox, by snapshot
    /// restore or fresh build, and returns its ingress endpoint.
    async fn deploy(
        &self,
        handle: &ProviderHandle,
        resource_class: &str,
        use_snapshot: bool,
    ) -> SandpoolResult<String>;

    /// Deletes the underlying resource.
    async fn delete(&self, handle: &ProviderHandle) -> SandpoolResult<()>;

    /// Lists provisioned resources tagged to this service.
    ///
    /// This is the ground truth reported pool metrics are reconciled against.
    async fn list_owned(&self) -> SandpoolResult<Vec<OwnedResource>>;

    /// Returns the provider's self-reported pool counters.
    async fn pool_metrics(&self) -> SandpoolResult<PoolSnapshot>;
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl std::fmt::Display for ProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
