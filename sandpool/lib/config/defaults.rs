//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Default port for the HTTP server.
pub const DEFAULT_SERVER_PORT: u16 = 8000;

/// Default ceiling on launches admitted per clock hour.
pub const DEFAULT_MAX_PER_HOUR: u32 = 10;

/// Default ceiling on concurrently active cold runs.
pub const DEFAULT_MAX_CONCURRENT_COLD: u32 = 2;

/// Default ceiling on concurrently active warm runs.
pub const DEFAULT_MAX_CONCURRENT_WARM: u32 = 2;

/// Default number of ready sandboxes the pool maintainer aims for.
pub const DEFAULT_TARGET_READY: u32 = 2;

/// Default hard ceiling on ready sandboxes in the pool.
pub const DEFAULT_MAX_READY: u32 = 4;

/// Default bound on concurrent creation calls per resource class.
///
/// Kept at 1: the provisioner's own concurrency accounting has been observed
/// to double-create under parallel load, so creations are serialized here.
pub const DEFAULT_MAX_CONCURRENT_CREATES: u32 = 1;

/// Default lower bound of the run lifetime window, in seconds.
pub const DEFAULT_MIN_LIFETIME_SECS: u64 = 180;

/// Default upper bound of the run lifetime window, in seconds.
pub const DEFAULT_MAX_LIFETIME_SECS: u64 = 360;

/// Default interval between cleanup sweeps, in seconds.
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 30;

/// Default interval between pool reconcile/replenish passes, in seconds.
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 60;

/// Default deadline on any single provider call, in seconds.
pub const DEFAULT_CREATE_DEADLINE_SECS: u64 = 120;

/// Default resource class used when a launch request does not name one.
pub const DEFAULT_RESOURCE_CLASS: &str = "python";
