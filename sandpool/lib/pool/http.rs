use async_trait::async_trait;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::Deserialize;

use crate::{SandpoolError, SandpoolResult};

use super::{OwnedResource, PoolSnapshot, ProviderApi, ProviderHandle};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Tag under which this service's resources are registered with the
/// provisioner, and by which `list_owned` filters.
const DEFAULT_OWNER_TAG: &str = "sandpool";

/// Transient-failure retries on idempotent read calls.
const READ_RETRIES: u32 = 2;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// [`ProviderApi`] implementation over the provisioner's REST API.
///
/// Reads (`list_owned`, `pool_metrics`) go through a client with transient
/// retry; mutations (`acquire`, `create`, `deploy`, `delete`) use a plain
/// client so a creation is never silently replayed by middleware.
pub struct HttpProvider {
    reads: ClientWithMiddleware,
    writes: ClientWithMiddleware,
    base_url: String,
    token: Option<String>,
    owner_tag: String,
}

#[derive(Debug, Deserialize)]
struct HandleResponse {
    handle: String,
}

#[derive(Debug, Deserialize)]
struct DeployResponse {
    ingress_endpoint: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl HttpProvider {
    /// Creates a provider client against `base_url`, optionally sending a
    /// bearer `token` with each request.
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> SandpoolResult<Self> {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(READ_RETRIES);
        let reads = ClientBuilder::new(reqwest::Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();
        let writes = ClientBuilder::new(reqwest::Client::new()).build();

        Ok(Self {
            reads,
            writes,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            owner_tag: DEFAULT_OWNER_TAG.to_string(),
        })
    }

    /// Overrides the owner tag resources are registered and listed under.
    pub fn with_owner_tag(mut self, owner_tag: impl Into<String>) -> Self {
        self.owner_tag = owner_tag.into();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(
        &self,
        builder: reqwest_middleware::RequestBuilder,
    ) -> reqwest_middleware::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl ProviderApi for HttpProvider {
    async fn acquire(&self, resource_class: &str) -> SandpoolResult<Option<ProviderHandle>> {
        let url = self.url(&format!("/v1/pool/{resource_class}/acquire"));
        let response = self.authed(self.writes.post(&url)).send().await?;

        // An empty pool is a miss, not a failure.
        if response.status() == reqwest::StatusCode::NOT_FOUND
            || response.status() == reqwest::StatusCode::NO_CONTENT
        {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(SandpoolError::Provider(format!(
                "acquire {resource_class} returned {}",
                response.status()
            )));
        }

        let body: HandleResponse = response.json().await?;
        Ok(Some(ProviderHandle(body.handle)))
    }

    async fn create(&self, resource_class: &str) -> SandpoolResult<ProviderHandle> {
        let url = self.url("/v1/sandboxes");
        let response = self
            .authed(self.writes.post(&url))
            .json(&serde_json::json!({
                "resource_class": resource_class,
                "owner": self.owner_tag,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SandpoolError::Provider(format!(
                "create {resource_class} returned {}",
                response.status()
            )));
        }

        let body: HandleResponse = response.json().await?;
        Ok(ProviderHandle(body.handle))
    }

    async fn deploy(
        &self,
        handle: &ProviderHandle,
        resource_class: &str,
        use_snapshot: bool,
    ) -> SandpoolResult<String> {
        let url = self.url(&format!("/v1/sandboxes/{handle}/deploy"));
        let response = self
            .authed(self.writes.post(&url))
            .json(&serde_json::json!({
                "resource_class": resource_class,
                "use_snapshot": use_snapshot,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SandpoolError::Provider(format!(
                "deploy {handle} returned {}",
                response.status()
            )));
        }

        let body: DeployResponse = response.json().await?;
        Ok(body.ingress_endpoint)
    }

    async fn delete(&self, handle: &ProviderHandle) -> SandpoolResult<()> {
        let url = self.url(&format!("/v1/sandboxes/{handle}"));
        let response = self.authed(self.writes.delete(&url)).send().await?;

        // Deleting an already-gone resource is a success from our side.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        if !response.status().is_success() {
            return Err(SandpoolError::Provider(format!(
                "delete {handle} returned {}",
                response.status()
            )));
        }

        Ok(())
    }

    async fn list_owned(&self) -> SandpoolResult<Vec<OwnedResource>> {
        let url = self.url("/v1/sandboxes");
        let response = self
            .authed(self.reads.get(&url))
            .query(&[("owner", self.owner_tag.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SandpoolError::Provider(format!(
                "list_owned returned {}",
                response.status()
            )));
        }

        let body: Vec<OwnedResource> = response.json().await?;
        Ok(body)
    }

    async fn pool_metrics(&self) -> SandpoolResult<PoolSnapshot> {
        let url = self.url("/v1/pool/metrics");
        let response = self.authed(self.reads.get(&url)).send().await?;

        if !response.status().is_success() {
            return Err(SandpoolError::Provider(format!(
                "pool_metrics returned {}",
                response.status()
            )));
        }

        let body: PoolSnapshot = response.json().await?;
        Ok(body)
    }
}
