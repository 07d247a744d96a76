// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Status reporting, queue draining, and data export for [`DataBroker`].

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::DataBroker;
use crate::cache::{now_millis, CacheStats};
use crate::health::{SystemHealthReport, SystemMode};
use crate::queue::{OperationKind, QueueStats};

/// One-shot snapshot of broker state. Read-only: building it never
/// probes the stores, mutates the cache, or touches the queue.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    /// Aggregate mode derived from the latest health records
    pub mode: SystemMode,
    /// Per-store health records
    pub health: SystemHealthReport,
    /// Cache counters
    pub cache: CacheStats,
    /// Queue counters
    pub queue: QueueStats,
    /// Seconds since the broker was constructed
    pub uptime_secs: u64,
}

/// Result of one drain pass over the deferred-operation queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Operations replayed successfully
    pub processed: usize,
    /// Operations that exhausted their retry budget this pass
    pub failed: usize,
    /// Operations attempted (pending snapshot minus paused kinds)
    pub total: usize,
}

impl DataBroker {
    /// Snapshot the broker without side effects. Health records are the
    /// latest probe results (possibly `Unknown` before the first probe).
    #[must_use]
    pub fn get_system_status(&self) -> SystemStatus {
        let health = self.health.report();
        SystemStatus {
            mode: health.mode(),
            health,
            cache: self.cache.stats(),
            queue: self.queue.stats(),
            uptime_secs: self.uptime_secs(),
        }
    }

    /// Drain the deferred queue once, synchronously.
    ///
    /// Works over a snapshot of pending operations in FIFO order, skipping
    /// paused kinds. Each operation gets exactly one replay attempt per
    /// pass, so its retry budget spans multiple passes and a store that is
    /// still down when a pass runs cannot burn a whole budget at once. An
    /// operation that exhausts its budget is dropped by the queue.
    pub async fn force_sync_all_pending(&self) -> SyncReport {
        let snapshot = self.queue.pending();
        let paused: Vec<OperationKind> = self.paused_kinds.read().iter().copied().collect();
        let runnable: Vec<_> = snapshot
            .into_iter()
            .filter(|op| !paused.contains(&op.kind))
            .collect();

        let total = runnable.len();
        if total == 0 {
            return SyncReport {
                processed: 0,
                failed: 0,
                total: 0,
            };
        }
        info!(total, "Draining deferred operations");

        let mut processed = 0;
        let mut failed = 0;
        for op in runnable {
            match self.dispatch(&op.payload).await {
                Ok(()) => {
                    self.queue.mark_completed(op.id);
                    processed += 1;
                }
                Err(e) => {
                    debug!(id = %op.id, kind = %op.kind, error = %e, "Replay attempt failed");
                    self.queue.mark_failed(op.id);
                    failed += 1;
                }
            }
        }

        crate::metrics::record_drain_pass(processed, failed);
        info!(processed, failed, total, "Drain pass complete");
        SyncReport {
            processed,
            failed,
            total,
        }
    }

    /// Export broker state as a JSON document for offline inspection.
    ///
    /// Includes everything needed to reconstruct the picture at a glance:
    /// mode, health records, cache entries with expiry flags, the pending
    /// queue, and the link graph.
    #[must_use]
    pub fn export_system_data(&self) -> Value {
        let health = self.health.report();
        let cache_entries: Vec<Value> = self
            .cache
            .entries()
            .into_iter()
            .map(|(key, entry)| {
                json!({
                    "key": key,
                    "value": entry.value,
                    "stored_at": entry.stored_at,
                    "ttl_ms": entry.ttl_ms,
                    "expired": entry.is_expired(),
                })
            })
            .collect();

        json!({
            "exported_at": now_millis(),
            "mode": health.mode(),
            "health": health,
            "cache": {
                "stats": self.cache.stats(),
                "entries": cache_entries,
            },
            "queue": {
                "stats": self.queue.stats(),
                "pending": self.queue.pending(),
            },
            "links": self.links.edges(),
        })
    }
}
