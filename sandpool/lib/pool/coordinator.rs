use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::{
    config::OrchestratorConfig,
    events::{EventBus, RunEvent},
    registry::RunKind,
    SandpoolError, SandpoolResult,
};

use super::{PoolSnapshot, ProviderApi, ProviderHandle};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Warm-pool acquisition and on-demand creation in front of the external
/// provisioner.
///
/// Two defensive measures live here, both born of observed provider
/// misbehavior:
///
/// - All creation calls for a resource class pass through a class-scoped
///   semaphore bounded by `max_concurrent_creates`. The provisioner's own
///   concurrency accounting has double-created under parallel load;
///   serializing at this layer does not depend on whatever it claims to
///   enforce internally.
/// - Self-reported pool metrics are never acted on directly. Before any
///   scale-up decision they are reconciled against an explicit listing of
///   owned resources; discrepancies are logged and the observed truth wins.
pub struct PoolCoordinator {
    provider: Arc<dyn ProviderApi>,
    events: Arc<EventBus>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    max_concurrent_creates: u32,
    target_ready: u32,
    max_ready: u32,
    deadline: Duration,
}

/// The product of a successful acquisition: a deployed sandbox and its
/// timing breakdown.
#[derive(Debug, Clone)]
pub struct Acquisition {
    /// The provider resource backing the sandbox.
    pub handle: ProviderHandle,

    /// The externally reachable URL of the sandbox.
    pub ingress_endpoint: String,

    /// Time to obtain a usable compute unit, by pool hit or creation.
    pub bootstrap_ms: u64,

    /// Time to materialize application state onto it.
    pub restore_ms: Option<u64>,

    /// Whether the compute unit came from the warm pool.
    pub pool_hit: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl PoolCoordinator {
    /// Creates a new coordinator over `provider`, publishing progress events
    /// to `events`.
    pub fn new(
        provider: Arc<dyn ProviderApi>,
        events: Arc<EventBus>,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            provider,
            events,
            gates: Mutex::new(HashMap::new()),
            max_concurrent_creates: *config.get_max_concurrent_creates(),
            target_ready: *config.get_target_ready(),
            max_ready: *config.get_max_ready(),
            deadline: config.create_deadline(),
        }
    }

    /// Obtains a deployed sandbox for a run: warm acquisition with cold
    /// fallback, or straight on-demand creation.
    ///
    /// Both phases are measured independently: `bootstrap_ms` covers
    /// obtaining the compute unit, `restore_ms` covers materializing
    /// application state onto it. Failures are not retried here; retry
    /// policy belongs to the caller.
    pub async fn acquire_or_create(
        &self,
        run_id: Uuid,
        kind: RunKind,
        resource_class: &str,
        use_snapshot: bool,
    ) -> SandpoolResult<Acquisition> {
        let bootstrap_start = Instant::now();

        let (handle, pool_hit) = match kind {
            RunKind::Warm => self.acquire_with_fallback(run_id, resource_class).await?,
            RunKind::Cold => (self.create_gated(resource_class).await?, false),
        };

        let bootstrap_ms = elapsed_ms(bootstrap_start);
        self.events.publish(
            run_id,
            RunEvent::log(
                run_id,
                format!("Sandbox {handle} ready in {bootstrap_ms}ms"),
            ),
        );

        // Restore phase. A sandbox that cannot take its application state is
        // useless; release it rather than leak it.
        let restore_start = Instant::now();
        let deploy = self
            .with_deadline(self.provider.deploy(&handle, resource_class, use_snapshot))
            .await;

        let ingress_endpoint = match deploy {
            Ok(endpoint) => endpoint,
            Err(e) => {
                if let Err(cleanup_err) = self.with_deadline(self.provider.delete(&handle)).await {
                    tracing::warn!(
                        %handle,
                        error = %cleanup_err,
                        "failed to release sandbox after deploy failure"
                    );
                }
                return Err(e);
            }
        };
        let restore_ms = elapsed_ms(restore_start);

        self.events.publish(
            run_id,
            RunEvent::log(run_id, format!("Application state restored in {restore_ms}ms")),
        );

        Ok(Acquisition {
            handle,
            ingress_endpoint,
            bootstrap_ms,
            restore_ms: Some(restore_ms),
            pool_hit,
        })
    }

    /// Returns the pool snapshot with reported counts corrected against the
    /// observed listing of owned resources.
    ///
    /// Runs on every pool-status query and before every replenish decision.
    pub async fn reconciled_snapshot(&self) -> SandpoolResult<PoolSnapshot> {
        let reported = self.with_deadline(self.provider.pool_metrics()).await?;
        let owned = self.with_deadline(self.provider.list_owned()).await?;

        let mut observed_ready: HashMap<&str, u32> = HashMap::new();
        for resource in owned.iter().filter(|o| o.pooled) {
            *observed_ready
                .entry(resource.resource_class.as_str())
                .or_insert(0) += 1;
        }

        let mut snapshot = PoolSnapshot::new();
        let classes: std::collections::HashSet<&str> = reported
            .keys()
            .map(String::as_str)
            .chain(observed_ready.keys().copied())
            .collect();

        for class in classes {
            let mut metrics = reported.get(class).copied().unwrap_or_default();
            let observed = observed_ready.get(class).copied().unwrap_or(0);

            if metrics.ready != observed {
                tracing::warn!(
                    resource_class = class,
                    reported = metrics.ready,
                    observed,
                    "provider inconsistency: reported pool count disagrees with owned listing, \
                     adopting observed truth"
                );
                metrics.ready = observed;
            }

            snapshot.insert(class.to_string(), metrics);
        }

        Ok(snapshot)
    }

    /// Tops the warm pool of each given class up to `target_ready`.
    ///
    /// Scaling decisions are taken from the reconciled snapshot only;
    /// in-flight creations count toward the target so a slow creation is
    /// never doubled up on. Creation failures are logged and abandoned; the
    /// next pass retries naturally.
    pub async fn replenish(&self, classes: &[String]) -> SandpoolResult<u32> {
        let snapshot = self.reconciled_snapshot().await?;
        let mut created = 0;

        for class in classes {
            let metrics = snapshot.get(class).copied().unwrap_or_default();
            let have = metrics.ready + metrics.creating;

            let want = self
                .target_ready
                .min(self.max_ready)
                .saturating_sub(have);

            for _ in 0..want {
                match self.create_gated(class).await {
                    Ok(handle) => {
                        tracing::info!(%handle, resource_class = %class, "replenished warm pool");
                        created += 1;
                    }
                    Err(e) => {
                        tracing::warn!(resource_class = %class, error = %e, "pool replenish failed");
                        break;
                    }
                }
            }
        }

        Ok(created)
    }

    /// Deletes a provider resource, with the standard deadline.
    pub async fn delete(&self, handle: &ProviderHandle) -> SandpoolResult<()> {
        self.with_deadline(self.provider.delete(handle)).await
    }

    /// Warm path: try the pool first, fall back to creation on a miss or an
    /// acquisition error.
    async fn acquire_with_fallback(
        &self,
        run_id: Uuid,
        resource_class: &str,
    ) -> SandpoolResult<(ProviderHandle, bool)> {
        match self.with_deadline(self.provider.acquire(resource_class)).await {
            Ok(Some(handle)) => {
                self.events.publish(
                    run_id,
                    RunEvent::log(run_id, "Acquired sandbox from warm pool"),
                );
                return Ok((handle, true));
            }
            Ok(None) => {
                self.events.publish(
                    run_id,
                    RunEvent::log(run_id, "Pool empty, falling back to cold start..."),
                );
            }
            Err(e) => {
                tracing::warn!(resource_class = %resource_class, error = %e, "pool acquisition failed");
                self.events.publish(
                    run_id,
                    RunEvent::log(run_id, "Pool acquisition failed, falling back to cold start..."),
                );
            }
        }

        Ok((self.create_gated(resource_class).await?, false))
    }

    /// Creates a sandbox through the class-scoped creation gate.
    async fn create_gated(&self, resource_class: &str) -> SandpoolResult<ProviderHandle> {
        let gate = self.gate(resource_class);
        let _permit = gate
            .acquire_owned()
            .await
            .map_err(SandpoolError::custom)?;

        self.with_deadline(self.provider.create(resource_class)).await
    }

    fn gate(&self, resource_class: &str) -> Arc<Semaphore> {
        let mut gates = self.gates.lock().unwrap();
        gates
            .entry(resource_class.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.max_concurrent_creates as usize)))
            .clone()
    }

    async fn with_deadline<T>(
        &self,
        fut: impl std::future::Future<Output = SandpoolResult<T>>,
    ) -> SandpoolResult<T> {
        match tokio::time::timeout(self.deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(SandpoolError::ProvisionTimeout(self.deadline.as_secs())),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProvider;

    fn coordinator(provider: Arc<MockProvider>, config: &OrchestratorConfig) -> PoolCoordinator {
        PoolCoordinator::new(provider, Arc::new(EventBus::new()), config)
    }

    fn config() -> OrchestratorConfig {
        OrchestratorConfig::builder()
            .create_deadline_secs(5)
            .build()
    }

    #[tokio::test]
    async fn test_warm_launch_hits_the_pool() {
        let provider = Arc::new(MockProvider::new().with_pool("python", 1));
        let coordinator = coordinator(provider.clone(), &config());

        let acq = coordinator
            .acquire_or_create(Uuid::new_v4(), RunKind::Warm, "python", true)
            .await
            .unwrap();

        assert!(acq.pool_hit);
        assert!(acq.restore_ms.is_some());
        assert_eq!(provider.create_calls(), 0);
        assert!(acq.ingress_endpoint.starts_with("http://"));
    }

    #[tokio::test]
    async fn test_warm_launch_on_empty_pool_falls_back_to_creation() {
        let provider = Arc::new(MockProvider::new());
        let coordinator = coordinator(provider.clone(), &config());

        let acq = coordinator
            .acquire_or_create(Uuid::new_v4(), RunKind::Warm, "python", true)
            .await
            .unwrap();

        assert!(!acq.pool_hit);
        assert!(acq.restore_ms.is_some());
        assert_eq!(provider.acquire_calls(), 1);
        assert_eq!(provider.create_calls(), 1);
    }

    #[tokio::test]
    async fn test_cold_launch_never_touches_the_pool() {
        let provider = Arc::new(MockProvider::new().with_pool("python", 3));
        let coordinator = coordinator(provider.clone(), &config());

        coordinator
            .acquire_or_create(Uuid::new_v4(), RunKind::Cold, "python", false)
            .await
            .unwrap();

        assert_eq!(provider.acquire_calls(), 0);
        assert_eq!(provider.create_calls(), 1);
    }

    #[tokio::test]
    async fn test_creation_deadline_maps_to_provision_timeout() {
        let provider =
            Arc::new(MockProvider::new().with_create_delay(Duration::from_millis(200)));
        let config = OrchestratorConfig::builder().create_deadline_secs(5).build();
        let mut coordinator = coordinator(provider, &config);
        coordinator.deadline = Duration::from_millis(20);

        let err = coordinator
            .acquire_or_create(Uuid::new_v4(), RunKind::Cold, "python", false)
            .await
            .unwrap_err();

        assert!(matches!(err, SandpoolError::ProvisionTimeout(_)));
    }

    #[tokio::test]
    async fn test_creations_are_serialized_per_class() {
        let provider =
            Arc::new(MockProvider::new().with_create_delay(Duration::from_millis(20)));
        let coordinator = Arc::new(coordinator(provider.clone(), &config()));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let coordinator = coordinator.clone();
            handles.push(tokio::spawn(async move {
                coordinator
                    .acquire_or_create(Uuid::new_v4(), RunKind::Cold, "python", false)
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(provider.create_calls(), 4);
        assert_eq!(
            provider.max_creates_in_flight(),
            1,
            "creations for one class must pass the gate one at a time"
        );
    }

    #[tokio::test]
    async fn test_deploy_failure_releases_the_sandbox() {
        let provider = Arc::new(MockProvider::new().failing_deploy());
        let coordinator = coordinator(provider.clone(), &config());

        let err = coordinator
            .acquire_or_create(Uuid::new_v4(), RunKind::Cold, "python", true)
            .await
            .unwrap_err();

        assert!(matches!(err, SandpoolError::Provider(_)));
        assert_eq!(provider.deleted_handles().len(), 1);
    }

    #[tokio::test]
    async fn test_reconciliation_adopts_observed_truth_over_reported() {
        // Provider claims 5 ready, but only 3 owned resources actually exist.
        let provider = Arc::new(
            MockProvider::new()
                .with_pool("python", 3)
                .with_reported("python", 5, 0),
        );
        let coordinator = coordinator(provider, &config());

        let snapshot = coordinator.reconciled_snapshot().await.unwrap();
        assert_eq!(snapshot.get("python").unwrap().ready, 3);
    }

    #[tokio::test]
    async fn test_replenish_ignores_phantom_ready_counts() {
        // Reported ready=5 would suppress scale-up entirely; the observed
        // truth (nothing owned) must win and trigger creation to target.
        let provider = Arc::new(MockProvider::new().with_reported("python", 5, 0));
        let config = OrchestratorConfig::builder()
            .target_ready(2)
            .max_ready(4)
            .create_deadline_secs(5)
            .build();
        let coordinator = coordinator(provider.clone(), &config);

        let created = coordinator
            .replenish(&["python".to_string()])
            .await
            .unwrap();

        assert_eq!(created, 2);
        assert_eq!(provider.owned_count(), 2);
    }

    #[tokio::test]
    async fn test_replenish_is_a_noop_at_target() {
        let provider = Arc::new(MockProvider::new().with_pool("python", 2));
        let config = OrchestratorConfig::builder()
            .target_ready(2)
            .max_ready(4)
            .create_deadline_secs(5)
            .build();
        let coordinator = coordinator(provider.clone(), &config);

        let created = coordinator
            .replenish(&["python".to_string()])
            .await
            .unwrap();

        assert_eq!(created, 0);
        assert_eq!(provider.create_calls(), 0);
    }
}
