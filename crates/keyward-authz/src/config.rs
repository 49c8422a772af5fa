//! Authorization engine configuration.

use std::time::Duration;

/// Configuration for the authorization service.
#[derive(Debug, Clone)]
pub struct AuthzConfig {
    /// Maximum number of users whose resolved permission sets are cached
    /// (default: 10_000).
    pub cache_capacity: u64,
    /// Lifetime of a cached permission set in seconds (default: 60).
    pub cache_ttl_secs: u64,
    /// Interval between expiry sweeps in seconds (default: 300 = 5 minutes).
    pub sweep_interval_secs: u64,
    /// Rows fetched per sweep query (default: 500).
    pub sweep_batch_size: u64,
    /// Deadline for the preparation phase of a bulk operation. `None`
    /// waits indefinitely.
    pub bulk_timeout_secs: Option<u64>,
}

impl AuthzConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn bulk_timeout(&self) -> Option<Duration> {
        self.bulk_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 10_000,
            cache_ttl_secs: 60,
            sweep_interval_secs: 300,
            sweep_batch_size: 500,
            bulk_timeout_secs: None,
        }
    }
}
