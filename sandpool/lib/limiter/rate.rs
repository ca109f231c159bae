use std::{collections::HashMap, sync::Mutex};

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::{registry::RunKind, SandpoolError, SandpoolResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The admission gate in front of every launch.
///
/// Enforces two independent ceilings, checked and committed atomically:
/// - a rolling hourly budget, bucketed by wall-clock hour boundary
/// - live per-kind concurrency ceilings
///
/// A single admitted call increments both the hourly counter and the
/// relevant concurrency counter; a denial increments neither. Concurrency
/// counters are decremented exactly once, when a run reaches a terminal
/// state, never on entry to running, since the resource still occupies a
/// slot.
pub struct RateLimiter {
    state: Mutex<LimiterState>,
    max_per_hour: u32,
    max_concurrent_cold: u32,
    max_concurrent_warm: u32,
}

/// Read-only snapshot of the limiter, for status reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateStatus {
    /// Launches admitted in the current hour window.
    pub used: u32,

    /// The configured hourly ceiling.
    pub limit: u32,

    /// Seconds until the hour window rolls over.
    pub reset_in_seconds: u64,

    /// Currently active cold runs.
    pub active_cold: u32,

    /// Currently active warm runs.
    pub active_warm: u32,
}

struct LimiterState {
    hourly: HashMap<String, u32>,
    active_cold: u32,
    active_warm: u32,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RateLimiter {
    /// Creates a new limiter with the given ceilings.
    pub fn new(max_per_hour: u32, max_concurrent_cold: u32, max_concurrent_warm: u32) -> Self {
        Self {
            state: Mutex::new(LimiterState {
                hourly: HashMap::new(),
                active_cold: 0,
                active_warm: 0,
            }),
            max_per_hour,
            max_concurrent_cold,
            max_concurrent_warm,
        }
    }

    /// Admits or denies a launch of the given kind.
    ///
    /// Both ceilings are evaluated under one lock: admission increments the
    /// hourly counter and the kind's concurrency counter together; denial
    /// leaves every counter untouched.
    pub fn admit(&self, kind: RunKind) -> SandpoolResult<()> {
        let now = Utc::now();
        let key = hour_key(now);
        let mut state = self.state.lock().unwrap();

        let used = state.hourly.get(&key).copied().unwrap_or(0);
        if used >= self.max_per_hour {
            return Err(SandpoolError::RateLimitExceeded {
                used,
                limit: self.max_per_hour,
                reset_in_seconds: seconds_until_reset(now),
            });
        }

        let (active, limit) = match kind {
            RunKind::Cold => (state.active_cold, self.max_concurrent_cold),
            RunKind::Warm => (state.active_warm, self.max_concurrent_warm),
        };
        if active >= limit {
            return Err(SandpoolError::ConcurrencyLimitExceeded {
                kind,
                active,
                limit,
            });
        }

        *state.hourly.entry(key.clone()).or_insert(0) += 1;
        match kind {
            RunKind::Cold => state.active_cold += 1,
            RunKind::Warm => state.active_warm += 1,
        }

        // Drop buckets older than the previous hour; they can never be read
        // again.
        let cutoff = previous_hour_key(now);
        state.hourly.retain(|k, _| k >= &cutoff);

        Ok(())
    }

    /// Releases the concurrency slot held by a run of the given kind.
    ///
    /// Called exactly once per admitted run, on its terminal transition.
    /// The hourly counter is never decremented.
    pub fn release(&self, kind: RunKind) {
        let mut state = self.state.lock().unwrap();
        match kind {
            RunKind::Cold => state.active_cold = state.active_cold.saturating_sub(1),
            RunKind::Warm => state.active_warm = state.active_warm.saturating_sub(1),
        }
    }

    /// Returns the current admission status without perturbing any counter.
    pub fn status(&self) -> RateStatus {
        let now = Utc::now();
        let state = self.state.lock().unwrap();

        RateStatus {
            used: state.hourly.get(&hour_key(now)).copied().unwrap_or(0),
            limit: self.max_per_hour,
            reset_in_seconds: seconds_until_reset(now),
            active_cold: state.active_cold,
            active_warm: state.active_warm,
        }
    }

    /// The configured hourly ceiling.
    pub fn max_per_hour(&self) -> u32 {
        self.max_per_hour
    }

    /// The configured concurrency ceiling for a kind.
    pub fn max_concurrent(&self, kind: RunKind) -> u32 {
        match kind {
            RunKind::Cold => self.max_concurrent_cold,
            RunKind::Warm => self.max_concurrent_warm,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// The rate-window key for the clock hour containing `now`.
pub fn hour_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d-%H").to_string()
}

fn previous_hour_key(now: DateTime<Utc>) -> String {
    hour_key(now - chrono::Duration::hours(1))
}

fn seconds_until_reset(now: DateTime<Utc>) -> u64 {
    3600 - (u64::from(now.minute()) * 60 + u64::from(now.second()))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_admission_stops_at_concurrency_ceiling() {
        let limiter = RateLimiter::new(100, 3, 3);

        for _ in 0..3 {
            limiter.admit(RunKind::Cold).unwrap();
        }

        let err = limiter.admit(RunKind::Cold).unwrap_err();
        assert!(matches!(
            err,
            SandpoolError::ConcurrencyLimitExceeded {
                kind: RunKind::Cold,
                active: 3,
                limit: 3,
            }
        ));

        // A slot freed by a terminal run re-opens admission.
        limiter.release(RunKind::Cold);
        limiter.admit(RunKind::Cold).unwrap();
    }

    #[test]
    fn test_kinds_have_independent_concurrency_ceilings() {
        let limiter = RateLimiter::new(100, 1, 1);

        limiter.admit(RunKind::Cold).unwrap();
        limiter.admit(RunKind::Warm).unwrap();

        assert!(limiter.admit(RunKind::Cold).is_err());
        assert!(limiter.admit(RunKind::Warm).is_err());
    }

    #[test]
    fn test_hourly_budget_counts_admissions_only() {
        let limiter = RateLimiter::new(2, 10, 10);

        limiter.admit(RunKind::Cold).unwrap();
        limiter.admit(RunKind::Warm).unwrap();

        let err = limiter.admit(RunKind::Cold).unwrap_err();
        assert!(matches!(err, SandpoolError::RateLimitExceeded { used: 2, .. }));

        // Releasing slots never refunds the hourly budget.
        limiter.release(RunKind::Cold);
        limiter.release(RunKind::Warm);
        assert!(limiter.admit(RunKind::Cold).is_err());
    }

    #[test]
    fn test_denial_increments_nothing() {
        let limiter = RateLimiter::new(10, 1, 1);

        limiter.admit(RunKind::Cold).unwrap();
        for _ in 0..5 {
            let _ = limiter.admit(RunKind::Cold);
        }

        let status = limiter.status();
        assert_eq!(status.used, 1);
        assert_eq!(status.active_cold, 1);
    }

    #[test]
    fn test_status_read_does_not_perturb_counters() {
        let limiter = RateLimiter::new(10, 2, 2);
        limiter.admit(RunKind::Warm).unwrap();

        let before = limiter.status();
        let after = limiter.status();
        assert_eq!(before.used, after.used);
        assert_eq!(before.active_warm, after.active_warm);
        assert!(before.reset_in_seconds <= 3600);
    }

    #[tokio::test]
    async fn test_concurrent_admissions_never_exceed_ceiling() {
        let limiter = Arc::new(RateLimiter::new(1000, 4, 4));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(
                async move { limiter.admit(RunKind::Cold).is_ok() },
            ));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 4);
        assert_eq!(limiter.status().active_cold, 4);
    }
}
