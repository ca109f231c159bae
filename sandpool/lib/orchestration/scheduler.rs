use std::{sync::Arc, time::Duration};

use tokio::{sync::Notify, task::JoinHandle, time::MissedTickBehavior};

use super::Orchestrator;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Periodic sweep that expires and deletes runs past their lifetime window.
///
/// An explicit scheduled task with its own shutdown hook, not an implicit
/// process-wide interval. Each tick funnels expired runs through the same
/// deletion entry point as user-initiated deletes.
pub struct CleanupScheduler {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

/// Periodic reconcile-then-replenish pass over the warm pool.
///
/// The cadence is a tunable, not a derived constant; every pass reconciles
/// reported pool metrics against observed truth before creating anything.
pub struct PoolMaintainer {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CleanupScheduler {
    /// Spawns the sweep loop at the given interval.
    pub fn spawn(orchestrator: Arc<Orchestrator>, interval: Duration) -> Self {
        let shutdown = Arc::new(Notify::new());
        let notify = shutdown.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = notify.notified() => break,
                    _ = ticker.tick() => {
                        let deleted = orchestrator.cleanup_expired().await;
                        if deleted > 0 {
                            tracing::info!(deleted, "cleaned up expired sandboxes");
                        }
                    }
                }
            }

            tracing::debug!("cleanup scheduler stopped");
        });

        Self { shutdown, handle }
    }

    /// Stops the sweep loop and waits for it to finish.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        let _ = self.handle.await;
    }
}

impl PoolMaintainer {
    /// Spawns the reconcile/replenish loop at the given interval, maintaining
    /// the configured pool classes.
    pub fn spawn(orchestrator: Arc<Orchestrator>, interval: Duration) -> Self {
        let shutdown = Arc::new(Notify::new());
        let notify = shutdown.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let classes = orchestrator.config().get_pool_classes().clone();

            loop {
                tokio::select! {
                    _ = notify.notified() => break,
                    _ = ticker.tick() => {
                        match orchestrator.coordinator().replenish(&classes).await {
                            Ok(created) if created > 0 => {
                                tracing::info!(created, "warm pool replenished");
                            }
                            Ok(_) => {}
                            Err(e) => {
                                tracing::warn!(error = %e, "pool maintenance pass failed");
                            }
                        }
                    }
                }
            }

            tracing::debug!("pool maintainer stopped");
        });

        Self { shutdown, handle }
    }

    /// Stops the maintenance loop and waits for it to finish.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        let _ = self.handle.await;
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::{
        config::OrchestratorConfig,
        history::HistoryStore,
        registry::{DeleteReason, RunKind, RunState},
        testing::MockProvider,
    };

    async fn orchestrator(config: OrchestratorConfig) -> (Arc<Orchestrator>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let history = HistoryStore::open(dir.path().join("history.db"))
            .await
            .unwrap();
        let provider = Arc::new(MockProvider::new());
        (
            Arc::new(Orchestrator::new(config, provider, history)),
            dir,
        )
    }

    #[test_log::test(tokio::test)]
    async fn test_cleanup_scheduler_deletes_expired_runs() {
        let config = OrchestratorConfig::builder()
            .max_per_hour(100)
            .min_lifetime_secs(0)
            .max_lifetime_secs(0)
            .create_deadline_secs(5)
            .build();
        let (orchestrator, _dir) = orchestrator(config).await;

        let (run_id, _) = orchestrator
            .launch(RunKind::Cold, "python", true)
            .await
            .unwrap();

        let scheduler =
            CleanupScheduler::spawn(orchestrator.clone(), Duration::from_millis(20));

        // Expires immediately on running; the next sweep deletes it.
        let mut deleted = false;
        for _ in 0..100 {
            let run = orchestrator.registry().get(run_id).unwrap();
            if run.state == RunState::Deleted {
                assert_eq!(run.deleted_reason, Some(DeleteReason::Expired));
                deleted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(deleted, "scheduler never swept the expired run");

        scheduler.shutdown().await;
    }

    #[test_log::test(tokio::test)]
    async fn test_pool_maintainer_fills_to_target() {
        let dir = tempdir().unwrap();
        let history = HistoryStore::open(dir.path().join("history.db"))
            .await
            .unwrap();
        let provider = Arc::new(MockProvider::new());
        let config = OrchestratorConfig::builder()
            .target_ready(2)
            .max_ready(4)
            .create_deadline_secs(5)
            .build();
        let orchestrator = Arc::new(Orchestrator::new(config, provider.clone(), history));

        let maintainer =
            PoolMaintainer::spawn(orchestrator.clone(), Duration::from_millis(20));

        let mut filled = false;
        for _ in 0..100 {
            if provider.owned_count() == 2 {
                filled = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(filled, "maintainer never reached target_ready");

        maintainer.shutdown().await;

        // Steady state: no further creations beyond the target.
        assert_eq!(provider.owned_count(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_stops_ticking() {
        let config = OrchestratorConfig::builder().create_deadline_secs(5).build();
        let (orchestrator, _dir) = orchestrator(config).await;

        let scheduler =
            CleanupScheduler::spawn(orchestrator.clone(), Duration::from_millis(10));
        scheduler.shutdown().await;
    }
}
