// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Health monitoring for the backing stores.
//!
//! The monitor probes each store with a bounded round-trip and keeps the
//! latest [`HealthRecord`] per store (overwritten on every probe, never
//! historized). A probe failure or timeout is recorded as `Unhealthy`;
//! probing itself never returns an error to the caller.
//!
//! [`SystemMode`] is derived on demand from the current records, with no
//! hysteresis: any probe can flip the mode immediately.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::now_millis;
use crate::store::{BackingStore, StoreId};

/// Probe outcome for one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreStatus {
    /// Last probe succeeded
    Healthy,
    /// Last probe failed or timed out
    Unhealthy,
    /// Never probed
    Unknown,
}

/// Latest probe result for one store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthRecord {
    /// Which store
    pub store: StoreId,
    /// Probe outcome
    pub status: StoreStatus,
    /// When the store was last probed (epoch millis), `None` if never
    pub last_checked: Option<i64>,
    /// Probe round-trip latency in millis, `None` on failure
    pub latency_ms: Option<u64>,
    /// Error text from a failed probe
    pub error: Option<String>,
}

impl HealthRecord {
    fn unknown(store: StoreId) -> Self {
        Self {
            store,
            status: StoreStatus::Unknown,
            last_checked: None,
            latency_ms: None,
            error: None,
        }
    }
}

/// Aggregated mode of the broker, derived from the latest health records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SystemMode {
    /// All stores healthy
    Normal,
    /// Some but not all stores healthy
    Degraded,
    /// No store healthy
    Emergency,
}

impl std::fmt::Display for SystemMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "NORMAL"),
            Self::Degraded => write!(f, "DEGRADED"),
            Self::Emergency => write!(f, "EMERGENCY"),
        }
    }
}

/// Snapshot of all health records plus the derived aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemHealthReport {
    /// Per-store records, in store registration order
    pub records: Vec<HealthRecord>,
    /// At least one store healthy
    pub overall_healthy: bool,
}

impl SystemHealthReport {
    /// Whether a specific store is currently healthy.
    #[must_use]
    pub fn is_healthy(&self, store: StoreId) -> bool {
        self.records
            .iter()
            .any(|r| r.store == store && r.status == StoreStatus::Healthy)
    }

    /// Number of stores currently healthy.
    #[must_use]
    pub fn healthy_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.status == StoreStatus::Healthy)
            .count()
    }

    /// Derive the system mode from this report.
    #[must_use]
    pub fn mode(&self) -> SystemMode {
        let healthy = self.healthy_count();
        if healthy == 0 {
            SystemMode::Emergency
        } else if healthy == self.records.len() {
            SystemMode::Normal
        } else {
            SystemMode::Degraded
        }
    }
}

/// Probes the backing stores and holds the latest record per store.
pub struct HealthMonitor {
    stores: Vec<Arc<dyn BackingStore>>,
    records: RwLock<HashMap<StoreId, HealthRecord>>,
    probe_timeout: Duration,
}

impl HealthMonitor {
    /// Create a monitor over the given stores.
    #[must_use]
    pub fn new(stores: Vec<Arc<dyn BackingStore>>, probe_timeout: Duration) -> Self {
        let records = stores
            .iter()
            .map(|s| (s.id(), HealthRecord::unknown(s.id())))
            .collect();
        Self {
            stores,
            records: RwLock::new(records),
            probe_timeout,
        }
    }

    /// Probe every store once and return the fresh report.
    ///
    /// Each probe is bounded by the configured timeout so one slow store
    /// cannot stall the pass. Never returns an error.
    pub async fn probe_all(&self) -> SystemHealthReport {
        for store in &self.stores {
            let record = self.probe_store(store.as_ref()).await;
            match record.status {
                StoreStatus::Healthy => {
                    debug!(store = %record.store, latency_ms = ?record.latency_ms, "Store probe ok");
                }
                _ => {
                    warn!(store = %record.store, error = ?record.error, "Store probe failed");
                }
            }
            crate::metrics::record_probe(
                record.store.as_str(),
                record.status == StoreStatus::Healthy,
            );
            self.records.write().insert(record.store, record);
        }
        self.report()
    }

    /// Latest report without probing (read-only view of current records).
    #[must_use]
    pub fn report(&self) -> SystemHealthReport {
        let records = self.records.read();
        let ordered: Vec<HealthRecord> = self
            .stores
            .iter()
            .map(|s| {
                records
                    .get(&s.id())
                    .cloned()
                    .unwrap_or_else(|| HealthRecord::unknown(s.id()))
            })
            .collect();
        let overall_healthy = ordered.iter().any(|r| r.status == StoreStatus::Healthy);
        SystemHealthReport {
            records: ordered,
            overall_healthy,
        }
    }

    /// Current system mode, derived from the latest records.
    #[must_use]
    pub fn mode(&self) -> SystemMode {
        self.report().mode()
    }

    async fn probe_store(&self, store: &dyn BackingStore) -> HealthRecord {
        let start = std::time::Instant::now();
        let result = tokio::time::timeout(self.probe_timeout, store.ping()).await;
        let last_checked = Some(now_millis());

        match result {
            Ok(Ok(())) => HealthRecord {
                store: store.id(),
                status: StoreStatus::Healthy,
                last_checked,
                latency_ms: Some(start.elapsed().as_millis() as u64),
                error: None,
            },
            Ok(Err(e)) => HealthRecord {
                store: store.id(),
                status: StoreStatus::Unhealthy,
                last_checked,
                latency_ms: None,
                error: Some(e.to_string()),
            },
            Err(_) => HealthRecord {
                store: store.id(),
                status: StoreStatus::Unhealthy,
                last_checked,
                latency_ms: None,
                error: Some(format!(
                    "probe timed out after {}ms",
                    self.probe_timeout.as_millis()
                )),
            },
        }
    }
}
