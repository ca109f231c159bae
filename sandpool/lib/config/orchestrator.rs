use std::time::Duration;

use getset::Getters;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    utils::{env_opt, env_or},
    SandpoolError, SandpoolResult,
};

use super::{
    DEFAULT_CLEANUP_INTERVAL_SECS, DEFAULT_CREATE_DEADLINE_SECS, DEFAULT_MAX_CONCURRENT_COLD,
    DEFAULT_MAX_CONCURRENT_CREATES, DEFAULT_MAX_CONCURRENT_WARM, DEFAULT_MAX_LIFETIME_SECS,
    DEFAULT_MAX_PER_HOUR, DEFAULT_MAX_READY, DEFAULT_MIN_LIFETIME_SECS,
    DEFAULT_RECONCILE_INTERVAL_SECS, DEFAULT_RESOURCE_CLASS, DEFAULT_TARGET_READY,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The orchestrator configuration.
///
/// Constructed once per process, either from the environment with
/// [`OrchestratorConfig::from_env`] or explicitly through the builder, and
/// passed to the components that need it. There is no ambient global config.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder, PartialEq, Eq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct OrchestratorConfig {
    /// Ceiling on launches admitted per clock hour.
    #[builder(default = DEFAULT_MAX_PER_HOUR)]
    pub(crate) max_per_hour: u32,

    /// Ceiling on concurrently active cold runs.
    #[builder(default = DEFAULT_MAX_CONCURRENT_COLD)]
    pub(crate) max_concurrent_cold: u32,

    /// Ceiling on concurrently active warm runs.
    #[builder(default = DEFAULT_MAX_CONCURRENT_WARM)]
    pub(crate) max_concurrent_warm: u32,

    /// Number of ready sandboxes the pool maintainer aims for.
    #[builder(default = DEFAULT_TARGET_READY)]
    pub(crate) target_ready: u32,

    /// Hard ceiling on ready sandboxes in the pool.
    #[builder(default = DEFAULT_MAX_READY)]
    pub(crate) max_ready: u32,

    /// Bound on concurrent creation calls per resource class.
    #[builder(default = DEFAULT_MAX_CONCURRENT_CREATES)]
    pub(crate) max_concurrent_creates: u32,

    /// Lower bound of the run lifetime window, in seconds.
    #[builder(default = DEFAULT_MIN_LIFETIME_SECS)]
    pub(crate) min_lifetime_secs: u64,

    /// Upper bound of the run lifetime window, in seconds.
    #[builder(default = DEFAULT_MAX_LIFETIME_SECS)]
    pub(crate) max_lifetime_secs: u64,

    /// Interval between cleanup sweeps, in seconds.
    #[builder(default = DEFAULT_CLEANUP_INTERVAL_SECS)]
    pub(crate) cleanup_interval_secs: u64,

    /// Interval between pool reconcile/replenish passes, in seconds.
    #[builder(default = DEFAULT_RECONCILE_INTERVAL_SECS)]
    pub(crate) reconcile_interval_secs: u64,

    /// Deadline on any single provider call, in seconds.
    #[builder(default = DEFAULT_CREATE_DEADLINE_SECS)]
    pub(crate) create_deadline_secs: u64,

    /// Resource classes the pool maintainer keeps warm.
    #[builder(default = vec![DEFAULT_RESOURCE_CLASS.to_string()])]
    pub(crate) pool_classes: Vec<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl OrchestratorConfig {
    /// Loads the configuration from `SANDPOOL_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> SandpoolResult<Self> {
        let config = Self::builder()
            .max_per_hour(env_or("SANDPOOL_MAX_PER_HOUR", DEFAULT_MAX_PER_HOUR))
            .max_concurrent_cold(env_or(
                "SANDPOOL_MAX_CONCURRENT_COLD",
                DEFAULT_MAX_CONCURRENT_COLD,
            ))
            .max_concurrent_warm(env_or(
                "SANDPOOL_MAX_CONCURRENT_WARM",
                DEFAULT_MAX_CONCURRENT_WARM,
            ))
            .target_ready(env_or("SANDPOOL_TARGET_READY", DEFAULT_TARGET_READY))
            .max_ready(env_or("SANDPOOL_MAX_READY", DEFAULT_MAX_READY))
            .max_concurrent_creates(env_or(
                "SANDPOOL_MAX_CONCURRENT_CREATES",
                DEFAULT_MAX_CONCURRENT_CREATES,
            ))
            .min_lifetime_secs(env_or(
                "SANDPOOL_MIN_LIFETIME_SECS",
                DEFAULT_MIN_LIFETIME_SECS,
            ))
            .max_lifetime_secs(env_or(
                "SANDPOOL_MAX_LIFETIME_SECS",
                DEFAULT_MAX_LIFETIME_SECS,
            ))
            .cleanup_interval_secs(env_or(
                "SANDPOOL_CLEANUP_INTERVAL_SECS",
                DEFAULT_CLEANUP_INTERVAL_SECS,
            ))
            .reconcile_interval_secs(env_or(
                "SANDPOOL_RECONCILE_INTERVAL_SECS",
                DEFAULT_RECONCILE_INTERVAL_SECS,
            ))
            .create_deadline_secs(env_or(
                "SANDPOOL_CREATE_DEADLINE_SECS",
                DEFAULT_CREATE_DEADLINE_SECS,
            ))
            .pool_classes(pool_classes_from_env())
            .build();

        config.validate()?;

        Ok(config)
    }

    /// Performs validation of the configuration.
    ///
    /// This includes checking that:
    /// - The lifetime window is well-formed
    /// - Pool targets do not exceed the pool ceiling
    /// - Intervals and deadlines are non-zero
    pub fn validate(&self) -> SandpoolResult<()> {
        let mut errors = Vec::new();

        if self.min_lifetime_secs > self.max_lifetime_secs {
            errors.push(format!(
                "min_lifetime_secs ({}) exceeds max_lifetime_secs ({})",
                self.min_lifetime_secs, self.max_lifetime_secs
            ));
        }

        if self.target_ready > self.max_ready {
            errors.push(format!(
                "target_ready ({}) exceeds max_ready ({})",
                self.target_ready, self.max_ready
            ));
        }

        if self.max_concurrent_creates == 0 {
            errors.push("max_concurrent_creates must be at least 1".to_string());
        }

        if self.cleanup_interval_secs == 0 {
            errors.push("cleanup_interval_secs must be non-zero".to_string());
        }

        if self.reconcile_interval_secs == 0 {
            errors.push("reconcile_interval_secs must be non-zero".to_string());
        }

        if self.create_deadline_secs == 0 {
            errors.push("create_deadline_secs must be non-zero".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SandpoolError::ConfigValidation(errors))
        }
    }

    /// The deadline applied to any single provider call.
    pub fn create_deadline(&self) -> Duration {
        Duration::from_secs(self.create_deadline_secs)
    }

    /// The interval between cleanup sweeps.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// The interval between pool reconcile/replenish passes.
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Parses `SANDPOOL_POOL_CLASSES` as a comma-separated list of resource
/// classes to keep warm.
fn pool_classes_from_env() -> Vec<String> {
    match env_opt("SANDPOOL_POOL_CLASSES") {
        Some(raw) => raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        None => vec![DEFAULT_RESOURCE_CLASS.to_string()],
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = OrchestratorConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_inverted_lifetime_window_is_rejected() {
        let config = OrchestratorConfig::builder()
            .min_lifetime_secs(600)
            .max_lifetime_secs(60)
            .build();

        let err = config.validate().unwrap_err();
        assert!(matches!(err, SandpoolError::ConfigValidation(_)));
    }

    #[test]
    fn test_target_above_max_ready_is_rejected() {
        let config = OrchestratorConfig::builder()
            .target_ready(5)
            .max_ready(2)
            .build();

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_creation_gate_is_rejected() {
        let config = OrchestratorConfig::builder()
            .max_concurrent_creates(0)
            .build();

        assert!(config.validate().is_err());
    }
}
