//! Configuration for the loyalty data broker.
//!
//! # Example
//!
//! ```
//! use loyalty_broker::BrokerConfig;
//!
//! // Minimal config (uses defaults)
//! let config = BrokerConfig::default();
//! assert_eq!(config.cache_max_entries, 1000);
//!
//! // Full config
//! let config = BrokerConfig {
//!     cache_max_entries: 500,
//!     queue_max_ops: 200,
//!     recovery_interval_secs: 15,
//!     ..Default::default()
//! };
//! ```

use serde::Deserialize;
use std::time::Duration;

/// Configuration for the data broker.
///
/// All fields have sensible defaults. The recovery interval and retry
/// budget are the knobs most deployments end up tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Max entries held by the local cache before a batch eviction pass
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,

    /// Max deferred operations held by the queue (oldest half dropped on overflow)
    #[serde(default = "default_queue_max_ops")]
    pub queue_max_ops: usize,

    /// Retry budget per queued operation before it is logged and dropped
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Timeout for a single health probe round-trip (ms)
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Timeout for a single backing-store operation (ms)
    #[serde(default = "default_store_call_timeout_ms")]
    pub store_call_timeout_ms: u64,

    /// Base interval between recovery-loop drain passes (secs)
    #[serde(default = "default_recovery_interval_secs")]
    pub recovery_interval_secs: u64,

    /// Interval the recovery loop backs off to after an unproductive pass (secs)
    #[serde(default = "default_recovery_max_backoff_secs")]
    pub recovery_max_backoff_secs: u64,

    /// Random jitter added to each recovery tick (ms)
    #[serde(default = "default_recovery_jitter_ms")]
    pub recovery_jitter_ms: u64,

    /// TTL stamped on identity-link edges (secs). Advisory only; effectively
    /// permanent within process lifetime.
    #[serde(default = "default_link_ttl_secs")]
    pub link_ttl_secs: u64,
}

fn default_cache_max_entries() -> usize { 1000 }
fn default_queue_max_ops() -> usize { 500 }
fn default_max_retries() -> u32 { 3 }
fn default_probe_timeout_ms() -> u64 { 2000 }
fn default_store_call_timeout_ms() -> u64 { 3000 }
fn default_recovery_interval_secs() -> u64 { 30 }
fn default_recovery_max_backoff_secs() -> u64 { 60 }
fn default_recovery_jitter_ms() -> u64 { 500 }
fn default_link_ttl_secs() -> u64 { 365 * 24 * 3600 } // 1 year

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            cache_max_entries: default_cache_max_entries(),
            queue_max_ops: default_queue_max_ops(),
            max_retries: default_max_retries(),
            probe_timeout_ms: default_probe_timeout_ms(),
            store_call_timeout_ms: default_store_call_timeout_ms(),
            recovery_interval_secs: default_recovery_interval_secs(),
            recovery_max_backoff_secs: default_recovery_max_backoff_secs(),
            recovery_jitter_ms: default_recovery_jitter_ms(),
            link_ttl_secs: default_link_ttl_secs(),
        }
    }
}

impl BrokerConfig {
    /// Probe timeout as a [`Duration`].
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Store-call timeout as a [`Duration`].
    #[must_use]
    pub fn store_call_timeout(&self) -> Duration {
        Duration::from_millis(self.store_call_timeout_ms)
    }

    /// Recovery base interval as a [`Duration`].
    #[must_use]
    pub fn recovery_interval(&self) -> Duration {
        Duration::from_secs(self.recovery_interval_secs)
    }

    /// Recovery backoff ceiling as a [`Duration`].
    #[must_use]
    pub fn recovery_max_backoff(&self) -> Duration {
        Duration::from_secs(self.recovery_max_backoff_secs)
    }

    /// Link-edge TTL as a [`Duration`].
    #[must_use]
    pub fn link_ttl(&self) -> Duration {
        Duration::from_secs(self.link_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BrokerConfig::default();
        assert_eq!(config.cache_max_entries, 1000);
        assert_eq!(config.queue_max_ops, 500);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.recovery_interval_secs, 30);
        assert_eq!(config.recovery_max_backoff_secs, 60);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: BrokerConfig = serde_json::from_str(r#"{"queue_max_ops": 42}"#).unwrap();
        assert_eq!(config.queue_max_ops, 42);
        assert_eq!(config.cache_max_entries, 1000); // default preserved
    }

    #[test]
    fn test_duration_accessors() {
        let config = BrokerConfig::default();
        assert_eq!(config.probe_timeout(), Duration::from_secs(2));
        assert_eq!(config.recovery_interval(), Duration::from_secs(30));
    }
}
