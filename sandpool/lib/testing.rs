//! Shared test doubles.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    pool::{OwnedResource, PoolClassMetrics, PoolSnapshot, ProviderApi, ProviderHandle},
    SandpoolError, SandpoolResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// In-memory provider double with scriptable behavior.
///
/// Models the externally provisioned fleet as a list of owned resources, a
/// warm pool of acquirable handles, and an optional fabricated metrics
/// report for exercising reconciliation against lying counters.
pub(crate) struct MockProvider {
    pool: Mutex<Vec<ProviderHandle>>,
    owned: Mutex<Vec<OwnedResource>>,
    deleted: Mutex<Vec<ProviderHandle>>,
    reported: Mutex<Option<PoolSnapshot>>,
    create_delay: Duration,
    deploy_delay: Duration,
    fail_create: bool,
    fail_deploy: bool,
    next_id: AtomicUsize,
    acquire_calls: AtomicUsize,
    create_calls: AtomicUsize,
    creates_in_flight: AtomicUsize,
    max_creates_in_flight: AtomicUsize,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl MockProvider {
    pub(crate) fn new() -> Self {
        Self {
            pool: Mutex::new(Vec::new()),
            owned: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            reported: Mutex::new(None),
            create_delay: Duration::from_millis(5),
            deploy_delay: Duration::from_millis(5),
            fail_create: false,
            fail_deploy: false,
            next_id: AtomicUsize::new(0),
            acquire_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            creates_in_flight: AtomicUsize::new(0),
            max_creates_in_flight: AtomicUsize::new(0),
        }
    }

    /// Seeds `count` ready sandboxes of `resource_class` into the warm pool.
    pub(crate) fn with_pool(self, resource_class: &str, count: usize) -> Self {
        for _ in 0..count {
            let handle = self.mint_handle();
            self.pool.lock().unwrap().push(handle.clone());
            self.owned.lock().unwrap().push(OwnedResource {
                handle,
                resource_class: resource_class.to_string(),
                pooled: true,
            });
        }
        self
    }

    /// Makes `pool_metrics` report the given counters instead of the truth.
    pub(crate) fn with_reported(self, resource_class: &str, ready: u32, creating: u32) -> Self {
        let mut snapshot = PoolSnapshot::new();
        snapshot.insert(
            resource_class.to_string(),
            PoolClassMetrics { ready, creating },
        );
        *self.reported.lock().unwrap() = Some(snapshot);
        self
    }

    pub(crate) fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = delay;
        self
    }

    pub(crate) fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub(crate) fn failing_deploy(mut self) -> Self {
        self.fail_deploy = true;
        self
    }

    pub(crate) fn acquire_calls(&self) -> usize {
        self.acquire_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_creates_in_flight(&self) -> usize {
        self.max_creates_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn deleted_handles(&self) -> Vec<ProviderHandle> {
        self.deleted.lock().unwrap().clone()
    }

    pub(crate) fn owned_count(&self) -> usize {
        self.owned.lock().unwrap().len()
    }

    fn mint_handle(&self) -> ProviderHandle {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        ProviderHandle(format!("sbx-{n}"))
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl ProviderApi for MockProvider {
    async fn acquire(&self, resource_class: &str) -> SandpoolResult<Option<ProviderHandle>> {
        self.acquire_calls.fetch_add(1, Ordering::SeqCst);

        let popped = {
            let owned = self.owned.lock().unwrap();
            let mut pool = self.pool.lock().unwrap();
            let idx = pool.iter().position(|h| {
                owned
                    .iter()
                    .any(|o| &o.handle == h && o.resource_class == resource_class)
            });
            idx.map(|i| pool.remove(i))
        };

        if let Some(handle) = &popped {
            let mut owned = self.owned.lock().unwrap();
            if let Some(entry) = owned.iter_mut().find(|o| &o.handle == handle) {
                entry.pooled = false;
            }
        }

        Ok(popped)
    }

    async fn create(&self, resource_class: &str) -> SandpoolResult<ProviderHandle> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.creates_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_creates_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);

        tokio::time::sleep(self.create_delay).await;
        self.creates_in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_create {
            return Err(SandpoolError::Provider("create failed".to_string()));
        }

        let handle = self.mint_handle();
        self.owned.lock().unwrap().push(OwnedResource {
            handle: handle.clone(),
            resource_class: resource_class.to_string(),
            pooled: true,
        });

        Ok(handle)
    }

    async fn deploy(
        &self,
        handle: &ProviderHandle,
        _resource_class: &str,
        _use_snapshot: bool,
    ) -> SandpoolResult<String> {
        tokio::time::sleep(self.deploy_delay).await;

        if self.fail_deploy {
            return Err(SandpoolError::Provider("deploy failed".to_string()));
        }

        let mut owned = self.owned.lock().unwrap();
        if let Some(entry) = owned.iter_mut().find(|o| &o.handle == handle) {
            entry.pooled = false;
        }

        Ok(format!("http://{handle}.sandbox.test"))
    }

    async fn delete(&self, handle: &ProviderHandle) -> SandpoolResult<()> {
        self.deleted.lock().unwrap().push(handle.clone());
        self.owned.lock().unwrap().retain(|o| &o.handle != handle);
        Ok(())
    }

    async fn list_owned(&self) -> SandpoolResult<Vec<OwnedResource>> {
        Ok(self.owned.lock().unwrap().clone())
    }

    async fn pool_metrics(&self) -> SandpoolResult<PoolSnapshot> {
        if let Some(reported) = self.reported.lock().unwrap().clone() {
            return Ok(reported);
        }

        let mut snapshot = PoolSnapshot::new();
        for resource in self.owned.lock().unwrap().iter().filter(|o| o.pooled) {
            snapshot
                .entry(resource.resource_class.clone())
                .or_insert_with(PoolClassMetrics::default)
                .ready += 1;
        }

        Ok(snapshot)
    }
}
