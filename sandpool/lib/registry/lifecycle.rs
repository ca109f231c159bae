use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use chrono::{Duration as ChronoDuration, Utc};
use rand::Rng;
use uuid::Uuid;

use crate::{
    events::{EventBus, RunEvent},
    pool::ProviderHandle,
    SandpoolError, SandpoolResult,
};

use super::{DeleteReason, Run, RunKind, RunState};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// How many recently terminal runs are retained for status reporting before
/// being evicted together with their event channels.
pub const DEFAULT_RECENT_TERMINAL: usize = 20;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The authoritative in-memory table of in-flight and recently terminal runs.
///
/// Owns the lifecycle state machine: `Creating -> {Running, Failed}` and
/// `Running -> Deleted`. Every transition is reported to the [`EventBus`] as
/// a `status` event; entering `Running` additionally publishes `ready`,
/// entering `Failed` publishes `error`, and deletion publishes `complete`.
pub struct LifecycleRegistry {
    state: Mutex<RegistryState>,
    events: Arc<EventBus>,
    min_lifetime_secs: u64,
    max_lifetime_secs: u64,
    recent_capacity: usize,
}

/// A lifecycle transition request.
#[derive(Debug, Clone)]
pub enum TransitionEvent {
    /// The provider produced a usable sandbox with a known endpoint.
    Ready {
        /// The provider resource backing the run.
        handle: ProviderHandle,
        /// The externally reachable URL.
        ingress_endpoint: String,
        /// Time to obtain the compute unit.
        bootstrap_ms: u64,
        /// Time to materialize application state.
        restore_ms: Option<u64>,
        /// End-to-end provisioning time.
        total_ms: u64,
        /// Whether the compute unit came from the warm pool.
        pool_hit: bool,
    },

    /// Provisioning failed.
    Fail {
        /// The failure detail.
        error: String,
    },

    /// The run is being deleted, by a user or the cleanup sweep.
    Delete {
        /// Why the run is being deleted.
        reason: DeleteReason,
    },
}

/// The outcome of a transition request.
#[derive(Debug, Clone)]
pub enum Applied {
    /// The transition was applied.
    Transitioned {
        /// The run after the transition.
        run: Run,
        /// Whether this transition moved the run into a terminal state.
        /// The caller performs terminal side effects (limiter release,
        /// history write) exactly once, keyed off this flag.
        newly_terminal: bool,
    },

    /// A delete of an already-terminal run: an idempotent no-op carrying the
    /// existing record.
    AlreadyTerminal(Run),
}

struct RegistryState {
    runs: HashMap<Uuid, Run>,
    recent_terminal: VecDeque<Uuid>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LifecycleRegistry {
    /// Creates a new registry publishing to `events`, assigning lifetimes
    /// uniformly from `[min_lifetime_secs, max_lifetime_secs]`.
    pub fn new(events: Arc<EventBus>, min_lifetime_secs: u64, max_lifetime_secs: u64) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                runs: HashMap::new(),
                recent_terminal: VecDeque::new(),
            }),
            events,
            min_lifetime_secs,
            max_lifetime_secs,
            recent_capacity: DEFAULT_RECENT_TERMINAL,
        }
    }

    /// Registers a new run in the `Creating` state and publishes its first
    /// status event.
    ///
    /// Fails with `DuplicateRun` if the ID already exists. This should not
    /// occur under v4 ID generation.
    pub fn create(
        &self,
        kind: RunKind,
        resource_class: &str,
        use_snapshot: bool,
    ) -> SandpoolResult<Run> {
        let run = Run::new(kind, resource_class, use_snapshot);

        {
            let mut state = self.state.lock().unwrap();
            if state.runs.contains_key(&run.run_id) {
                return Err(SandpoolError::DuplicateRun(run.run_id));
            }
            state.runs.insert(run.run_id, run.clone());
        }

        self.events
            .publish(run.run_id, RunEvent::status(run.run_id, RunState::Creating));

        Ok(run)
    }

    /// Applies a lifecycle transition.
    ///
    /// Invalid edges fail with `InvalidTransition`; a delete of an
    /// already-terminal run is idempotent and returns the existing record.
    pub fn transition(&self, run_id: Uuid, event: TransitionEvent) -> SandpoolResult<Applied> {
        let mut to_publish = Vec::new();

        let mut state = self.state.lock().unwrap();
        let applied = {
            let run = state
                .runs
                .get_mut(&run_id)
                .ok_or(SandpoolError::RunNotFound(run_id))?;

            match (&event, run.state) {
                (
                    TransitionEvent::Ready {
                        handle,
                        ingress_endpoint,
                        bootstrap_ms,
                        restore_ms,
                        total_ms,
                        pool_hit,
                    },
                    RunState::Creating,
                ) => {
                    run.state = RunState::Running;
                    run.provider_handle = Some(handle.clone());
                    run.ingress_endpoint = Some(ingress_endpoint.clone());
                    run.bootstrap_ms = Some(*bootstrap_ms);
                    run.restore_ms = *restore_ms;
                    run.total_ms = Some(*total_ms);
                    run.pool_hit = Some(*pool_hit);
                    run.expires_at = Some(
                        Utc::now()
                            + ChronoDuration::seconds(self.draw_lifetime_secs() as i64),
                    );

                    to_publish.push(RunEvent::status(run_id, RunState::Running));
                    to_publish.push(RunEvent::ready(
                        run_id,
                        ingress_endpoint.clone(),
                        *bootstrap_ms,
                        *restore_ms,
                        *total_ms,
                    ));

                    Applied::Transitioned {
                        run: run.clone(),
                        newly_terminal: false,
                    }
                }

                (TransitionEvent::Fail { error }, RunState::Creating) => {
                    run.state = RunState::Failed;
                    run.error = Some(error.clone());

                    to_publish.push(RunEvent::status(run_id, RunState::Failed));
                    to_publish.push(RunEvent::error(run_id, error.clone()));

                    let run = run.clone();
                    Self::remember_terminal(&mut state, run_id, self.recent_capacity, &self.events);
                    Applied::Transitioned {
                        run,
                        newly_terminal: true,
                    }
                }

                (TransitionEvent::Delete { reason }, RunState::Running) => {
                    run.state = RunState::Deleted;
                    run.deleted_reason = Some(*reason);

                    let duration_ms = (Utc::now() - run.created_at).num_milliseconds().max(0) as u64;
                    to_publish.push(RunEvent::status(run_id, RunState::Deleted));
                    to_publish.push(RunEvent::complete(run_id, duration_ms));

                    let run = run.clone();
                    Self::remember_terminal(&mut state, run_id, self.recent_capacity, &self.events);
                    Applied::Transitioned {
                        run,
                        newly_terminal: true,
                    }
                }

                // Deletion is idempotent at this boundary: a second delete
                // returns the existing terminal record instead of erroring.
                (TransitionEvent::Delete { .. }, RunState::Failed | RunState::Deleted) => {
                    Applied::AlreadyTerminal(run.clone())
                }

                (event, current) => {
                    return Err(SandpoolError::InvalidTransition {
                        run_id,
                        state: current,
                        event: event.name(),
                    });
                }
            }
        };

        // Published while still holding the registry lock, so a concurrent
        // transition of the same run cannot interleave its events. Publishing
        // never blocks; subscriber fan-out is a lossy broadcast.
        for event in to_publish {
            self.events.publish(run_id, event);
        }
        drop(state);

        Ok(applied)
    }

    /// Returns a run by ID.
    pub fn get(&self, run_id: Uuid) -> Option<Run> {
        self.state.lock().unwrap().runs.get(&run_id).cloned()
    }

    /// Returns all runs in `Creating` or `Running`.
    pub fn list_active(&self) -> Vec<Run> {
        self.state
            .lock()
            .unwrap()
            .runs
            .values()
            .filter(|r| r.is_active())
            .cloned()
            .collect()
    }

    /// Returns up to `n` recently terminal runs, newest first.
    pub fn list_recent_terminal(&self, n: usize) -> Vec<Run> {
        let state = self.state.lock().unwrap();
        state
            .recent_terminal
            .iter()
            .rev()
            .take(n)
            .filter_map(|id| state.runs.get(id).cloned())
            .collect()
    }

    fn draw_lifetime_secs(&self) -> u64 {
        rand::rng().random_range(self.min_lifetime_secs..=self.max_lifetime_secs)
    }

    /// Records a run as terminal, evicting the oldest remembered terminal run
    /// (and its event channel) once the ring is full.
    fn remember_terminal(
        state: &mut RegistryState,
        run_id: Uuid,
        capacity: usize,
        events: &EventBus,
    ) {
        state.recent_terminal.push_back(run_id);
        while state.recent_terminal.len() > capacity {
            if let Some(evicted) = state.recent_terminal.pop_front() {
                state.runs.remove(&evicted);
                events.remove(evicted);
            }
        }
    }
}

impl TransitionEvent {
    /// The name of the transition, used in error reporting.
    pub fn name(&self) -> &'static str {
        match self {
            TransitionEvent::Ready { .. } => "ready",
            TransitionEvent::Fail { .. } => "fail",
            TransitionEvent::Delete { .. } => "delete",
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> LifecycleRegistry {
        LifecycleRegistry::new(Arc::new(EventBus::new()), 60, 120)
    }

    fn ready_event() -> TransitionEvent {
        TransitionEvent::Ready {
            handle: ProviderHandle("sbx-1".into()),
            ingress_endpoint: "http://sbx-1.example".into(),
            bootstrap_ms: 1200,
            restore_ms: Some(800),
            total_ms: 2000,
            pool_hit: false,
        }
    }

    #[tokio::test]
    async fn test_create_then_ready_sets_expiry_within_window() {
        let registry = registry();
        let run = registry.create(RunKind::Cold, "python", true).unwrap();
        assert_eq!(run.state, RunState::Creating);
        assert!(run.expires_at.is_none());

        let before = Utc::now();
        let applied = registry.transition(run.run_id, ready_event()).unwrap();
        let Applied::Transitioned {
            run,
            newly_terminal,
        } = applied
        else {
            panic!("expected Transitioned");
        };

        assert!(!newly_terminal, "running is not terminal");
        assert_eq!(run.state, RunState::Running);
        let expires_at = run.expires_at.unwrap();
        let lower = before + ChronoDuration::seconds(60);
        let upper = Utc::now() + ChronoDuration::seconds(120);
        assert!(expires_at >= lower && expires_at <= upper);
    }

    #[tokio::test]
    async fn test_transitions_are_monotonic() {
        let registry = registry();
        let run = registry.create(RunKind::Cold, "python", true).unwrap();
        registry.transition(run.run_id, ready_event()).unwrap();

        // A running run can never re-enter creating via another ready.
        let err = registry.transition(run.run_id, ready_event()).unwrap_err();
        assert!(matches!(err, SandpoolError::InvalidTransition { .. }));

        // Nor can it fail; failure is an edge out of creating only.
        let err = registry
            .transition(
                run.run_id,
                TransitionEvent::Fail {
                    error: "late".into(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, SandpoolError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_delete_of_creating_run_is_rejected() {
        let registry = registry();
        let run = registry.create(RunKind::Warm, "python", true).unwrap();

        let err = registry
            .transition(
                run.run_id,
                TransitionEvent::Delete {
                    reason: DeleteReason::UserRequested,
                },
            )
            .unwrap_err();
        assert!(matches!(err, SandpoolError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_double_delete_is_idempotent() {
        let registry = registry();
        let run = registry.create(RunKind::Cold, "python", true).unwrap();
        registry.transition(run.run_id, ready_event()).unwrap();

        let first = registry
            .transition(
                run.run_id,
                TransitionEvent::Delete {
                    reason: DeleteReason::UserRequested,
                },
            )
            .unwrap();
        assert!(matches!(
            first,
            Applied::Transitioned {
                newly_terminal: true,
                ..
            }
        ));

        let second = registry
            .transition(
                run.run_id,
                TransitionEvent::Delete {
                    reason: DeleteReason::Expired,
                },
            )
            .unwrap();
        let Applied::AlreadyTerminal(run) = second else {
            panic!("expected AlreadyTerminal");
        };
        // The original reason survives the no-op second delete.
        assert_eq!(run.deleted_reason, Some(DeleteReason::UserRequested));
    }

    #[tokio::test]
    async fn test_transition_of_unknown_run_is_not_found() {
        let registry = registry();
        let err = registry
            .transition(
                Uuid::new_v4(),
                TransitionEvent::Fail {
                    error: "boom".into(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, SandpoolError::RunNotFound(_)));
    }

    #[tokio::test]
    async fn test_transitions_publish_events_in_order() {
        let events = Arc::new(EventBus::new());
        let registry = LifecycleRegistry::new(events.clone(), 60, 120);

        let run = registry.create(RunKind::Cold, "python", true).unwrap();
        registry.transition(run.run_id, ready_event()).unwrap();

        let sub = events.subscribe(run.run_id);
        let kinds: Vec<&str> = sub.replay.iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["status", "status", "ready"]);
    }

    #[tokio::test]
    async fn test_list_active_excludes_terminal_runs() {
        let registry = registry();
        let active = registry.create(RunKind::Cold, "python", true).unwrap();
        let failed = registry.create(RunKind::Cold, "python", true).unwrap();
        registry
            .transition(
                failed.run_id,
                TransitionEvent::Fail {
                    error: "boom".into(),
                },
            )
            .unwrap();

        let ids: Vec<Uuid> = registry.list_active().iter().map(|r| r.run_id).collect();
        assert!(ids.contains(&active.run_id));
        assert!(!ids.contains(&failed.run_id));

        let recent = registry.list_recent_terminal(10);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].run_id, failed.run_id);
    }
}
