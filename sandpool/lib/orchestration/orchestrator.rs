use std::{
    sync::Arc,
    time::Instant,
};

use chrono::Utc;
use uuid::Uuid;

use crate::{
    config::OrchestratorConfig,
    events::{EventBus, RunEvent},
    history::HistoryStore,
    limiter::{hour_key, RateLimiter},
    pool::{PoolCoordinator, ProviderApi},
    registry::{Applied, DeleteReason, LifecycleRegistry, Run, RunKind, RunState, TransitionEvent},
    SandpoolResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The orchestrator context: every shared component, constructed once per
/// process and passed explicitly to request handlers and schedulers.
///
/// Control flow for a launch: admit at the [`RateLimiter`], register with the
/// [`LifecycleRegistry`], then hand off to a background provisioning task
/// that drives the [`PoolCoordinator`] and reports progress through the
/// [`EventBus`]. Terminal transitions release the admission slot and write
/// history exactly once.
pub struct Orchestrator {
    config: OrchestratorConfig,
    limiter: RateLimiter,
    registry: LifecycleRegistry,
    events: Arc<EventBus>,
    coordinator: PoolCoordinator,
    history: HistoryStore,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Orchestrator {
    /// Assembles the orchestrator from its configuration, a provider client
    /// and an opened history store.
    pub fn new(
        config: OrchestratorConfig,
        provider: Arc<dyn ProviderApi>,
        history: HistoryStore,
    ) -> Self {
        let events = Arc::new(EventBus::new());
        let registry = LifecycleRegistry::new(
            events.clone(),
            *config.get_min_lifetime_secs(),
            *config.get_max_lifetime_secs(),
        );
        let limiter = RateLimiter::new(
            *config.get_max_per_hour(),
            *config.get_max_concurrent_cold(),
            *config.get_max_concurrent_warm(),
        );
        let coordinator = PoolCoordinator::new(provider, events.clone(), &config);

        Self {
            config,
            limiter,
            registry,
            events,
            coordinator,
            history,
        }
    }

    /// Admits and starts a launch, returning the run ID and its event stream
    /// URL immediately. Provisioning continues in a background task that is
    /// independent of any observer.
    ///
    /// Admission failures are returned synchronously, before any run state
    /// exists.
    pub async fn launch(
        self: &Arc<Self>,
        kind: RunKind,
        resource_class: &str,
        use_snapshot: bool,
    ) -> SandpoolResult<(Uuid, String)> {
        self.limiter.admit(kind)?;

        let run = match self.registry.create(kind, resource_class, use_snapshot) {
            Ok(run) => run,
            Err(e) => {
                // No run was registered; the admitted slot must not leak.
                self.limiter.release(kind);
                return Err(e);
            }
        };

        // Durable mirror of the hourly counter; best-effort only.
        if let Err(e) = self
            .history
            .increment_rate_window(&hour_key(Utc::now()))
            .await
        {
            tracing::warn!(error = %e, "failed to persist rate window increment");
        }

        let snapshot_text = if use_snapshot {
            "from snapshot"
        } else {
            "from fresh build"
        };
        self.events.publish(
            run.run_id,
            RunEvent::log(
                run.run_id,
                format!("Launch request: {kind} sandbox for {resource_class} {snapshot_text}"),
            ),
        );
        tracing::info!(
            run_id = %run.run_id,
            %kind,
            resource_class,
            "admitted launch"
        );

        let ctx = Arc::clone(self);
        let run_id = run.run_id;
        tokio::spawn(async move {
            ctx.provision(run).await;
        });

        Ok((run_id, format!("/api/stream/{run_id}")))
    }

    /// Deletes a run: best-effort provider delete, then the registry
    /// transition. Both the user-facing call and the cleanup sweep converge
    /// here, which is what makes deletion idempotent and keeps one source of
    /// truth for "is this run still active".
    pub async fn delete(&self, run_id: Uuid, reason: DeleteReason) -> SandpoolResult<Run> {
        let run = self
            .registry
            .get(run_id)
            .ok_or(crate::SandpoolError::RunNotFound(run_id))?;

        let mut reason = reason;
        if run.state == RunState::Running {
            if let Some(handle) = &run.provider_handle {
                if let Err(e) = self.coordinator.delete(handle).await {
                    // Leaving the run active forever on a transient delete
                    // failure is worse than marking it gone; record that the
                    // external resource may have leaked.
                    tracing::warn!(
                        run_id = %run_id,
                        %handle,
                        error = %e,
                        "provider delete failed, marking run deleted anyway"
                    );
                    reason = DeleteReason::FailedCleanup;
                }
            }
        }

        // Creating runs are rejected by the transition table; terminal runs
        // resolve to an idempotent no-op. Either way the registry decides.
        match self
            .registry
            .transition(run_id, TransitionEvent::Delete { reason })?
        {
            Applied::AlreadyTerminal(run) => Ok(run),
            Applied::Transitioned {
                run,
                newly_terminal,
            } => {
                if newly_terminal {
                    self.finalize_terminal(&run).await;
                }
                Ok(run)
            }
        }
    }

    /// Sweeps running runs past their expiry. Returns how many were deleted.
    pub async fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<Uuid> = self
            .registry
            .list_active()
            .into_iter()
            .filter(|run| {
                run.state == RunState::Running
                    && run.expires_at.map(|at| at <= now).unwrap_or(false)
            })
            .map(|run| run.run_id)
            .collect();

        let mut deleted = 0;
        for run_id in expired {
            match self.delete(run_id, DeleteReason::Expired).await {
                Ok(_) => deleted += 1,
                Err(e) => {
                    tracing::warn!(run_id = %run_id, error = %e, "expiry sweep failed for run")
                }
            }
        }

        deleted
    }

    /// The configuration the orchestrator was built with.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// The admission gate.
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// The run table and state machine.
    pub fn registry(&self) -> &LifecycleRegistry {
        &self.registry
    }

    /// The per-run event bus.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// The pool coordination layer.
    pub fn coordinator(&self) -> &PoolCoordinator {
        &self.coordinator
    }

    /// The durable history store.
    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Background provisioning of one admitted run.
    async fn provision(&self, run: Run) {
        let run_id = run.run_id;
        let started = Instant::now();

        self.events.publish(
            run_id,
            RunEvent::log(
                run_id,
                match run.kind {
                    RunKind::Cold => "Creating cold sandbox...",
                    RunKind::Warm => "Acquiring sandbox from warm pool...",
                },
            ),
        );

        let result = self
            .coordinator
            .acquire_or_create(run_id, run.kind, &run.resource_class, run.use_snapshot)
            .await;

        match result {
            Ok(acq) => {
                let total_ms = started.elapsed().as_millis() as u64;
                let transitioned = self.registry.transition(
                    run_id,
                    TransitionEvent::Ready {
                        handle: acq.handle.clone(),
                        ingress_endpoint: acq.ingress_endpoint.clone(),
                        bootstrap_ms: acq.bootstrap_ms,
                        restore_ms: acq.restore_ms,
                        total_ms,
                        pool_hit: acq.pool_hit,
                    },
                );

                match transitioned {
                    Ok(_) => {
                        self.events.publish(
                            run_id,
                            RunEvent::log(
                                run_id,
                                format!(
                                    "Sandbox live at {} (total {total_ms}ms)",
                                    acq.ingress_endpoint
                                ),
                            ),
                        );
                        tracing::info!(
                            run_id = %run_id,
                            handle = %acq.handle,
                            bootstrap_ms = acq.bootstrap_ms,
                            restore_ms = ?acq.restore_ms,
                            total_ms,
                            pool_hit = acq.pool_hit,
                            "sandbox running"
                        );
                    }
                    Err(e) => {
                        // The run left `creating` underneath us; the acquired
                        // resource has no owner and must not leak.
                        tracing::warn!(run_id = %run_id, error = %e, "late acquisition discarded");
                        if let Err(cleanup_err) = self.coordinator.delete(&acq.handle).await {
                            tracing::warn!(
                                handle = %acq.handle,
                                error = %cleanup_err,
                                "failed to release orphaned sandbox"
                            );
                        }
                    }
                }
            }
            Err(e) => {
                let message = e.to_string();
                self.events
                    .publish(run_id, RunEvent::log(run_id, format!("ERROR: {message}")));
                tracing::error!(run_id = %run_id, error = %message, "provisioning failed");

                match self
                    .registry
                    .transition(run_id, TransitionEvent::Fail { error: message })
                {
                    Ok(Applied::Transitioned {
                        run,
                        newly_terminal: true,
                    }) => self.finalize_terminal(&run).await,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(run_id = %run_id, error = %e, "failure transition rejected")
                    }
                }
            }
        }
    }

    /// Terminal side effects, performed exactly once per run: the admission
    /// slot is released and the terminal record written.
    async fn finalize_terminal(&self, run: &Run) {
        self.limiter.release(run.kind);

        if let Err(e) = self.history.record_terminal(run).await {
            tracing::warn!(run_id = %run.run_id, error = %e, "failed to record terminal run");
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
