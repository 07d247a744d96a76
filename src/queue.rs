// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Deferred-write operation queue.
//!
//! When a backing store rejects a write, the facade parks the operation
//! here and the recovery loop replays it once the store is back. The queue
//! is bounded and lossy: at capacity the oldest half is dropped with a
//! warning rather than failing the caller.
//!
//! Nothing here is persisted. Queue contents are lost on process restart;
//! the backing stores remain the system of record.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, warn};
use uuid::Uuid;

use crate::cache::now_millis;
use crate::identity::{CreateIdentityRequest, OrderRequest};

/// Kind of a deferred operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Deferred identity creation against the CRM
    CreateUser,
    /// Deferred order write against the CRM
    RecordOrder,
}

impl OperationKind {
    /// Canonical tag used in logs, metrics, and exports.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateUser => "create_user",
            Self::RecordOrder => "record_order",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed payload of a deferred operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationPayload {
    /// Replay of [`CreateIdentityRequest`]
    CreateUser(CreateIdentityRequest),
    /// Replay of [`OrderRequest`]
    RecordOrder(OrderRequest),
}

impl OperationPayload {
    /// The kind tag for this payload.
    #[must_use]
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::CreateUser(_) => OperationKind::CreateUser,
            Self::RecordOrder(_) => OperationKind::RecordOrder,
        }
    }
}

/// One deferred write awaiting replay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuedOperation {
    /// Unique operation id
    pub id: Uuid,
    /// Operation kind
    pub kind: OperationKind,
    /// Typed payload
    pub payload: OperationPayload,
    /// When the operation was enqueued (epoch millis)
    pub enqueued_at: i64,
    /// Failed replay attempts so far
    pub retry_count: u32,
    /// Retry budget; at this count the operation is logged and dropped
    pub max_retries: u32,
}

/// Counter snapshot for [`OperationQueue`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStats {
    /// Operations currently pending replay
    pub pending: usize,
    /// Total operations ever enqueued
    pub total_enqueued: u64,
    /// Total operations replayed successfully
    pub total_completed: u64,
    /// Operations dropped by the overflow policy
    pub dropped_overflow: u64,
    /// Operations dropped after exhausting their retry budget
    pub dropped_exhausted: u64,
}

/// Bounded FIFO queue of deferred writes.
pub struct OperationQueue {
    ops: Mutex<Vec<QueuedOperation>>,
    max_ops: usize,
    max_retries: u32,
    total_enqueued: AtomicU64,
    total_completed: AtomicU64,
    dropped_overflow: AtomicU64,
    dropped_exhausted: AtomicU64,
}

impl OperationQueue {
    /// Create a queue bounded to `max_ops` with a per-operation retry budget.
    #[must_use]
    pub fn new(max_ops: usize, max_retries: u32) -> Self {
        Self {
            ops: Mutex::new(Vec::new()),
            max_ops: max_ops.max(2),
            max_retries: max_retries.max(1),
            total_enqueued: AtomicU64::new(0),
            total_completed: AtomicU64::new(0),
            dropped_overflow: AtomicU64::new(0),
            dropped_exhausted: AtomicU64::new(0),
        }
    }

    /// Enqueue a deferred operation; returns its id.
    ///
    /// At capacity the oldest half of the queue is dropped first (lossy
    /// backpressure, logged as a warning, never an error to the caller).
    pub fn enqueue(&self, payload: OperationPayload) -> Uuid {
        let op = QueuedOperation {
            id: Uuid::new_v4(),
            kind: payload.kind(),
            payload,
            enqueued_at: now_millis(),
            retry_count: 0,
            max_retries: self.max_retries,
        };
        let id = op.id;

        let mut ops = self.ops.lock();
        if ops.len() >= self.max_ops {
            let drop_count = ops.len() / 2;
            ops.drain(0..drop_count);
            self.dropped_overflow
                .fetch_add(drop_count as u64, Ordering::Relaxed);
            warn!(
                dropped = drop_count,
                capacity = self.max_ops,
                "Operation queue saturated, dropped oldest half"
            );
            crate::metrics::record_queue_overflow(drop_count);
        }
        ops.push(op);
        self.total_enqueued.fetch_add(1, Ordering::Relaxed);
        id
    }

    /// Pending operations in FIFO order, filtered to those with retry
    /// budget remaining.
    #[must_use]
    pub fn pending(&self) -> Vec<QueuedOperation> {
        self.ops
            .lock()
            .iter()
            .filter(|op| op.retry_count < op.max_retries)
            .cloned()
            .collect()
    }

    /// Remove an operation after a successful replay.
    pub fn mark_completed(&self, id: Uuid) {
        let mut ops = self.ops.lock();
        let before = ops.len();
        ops.retain(|op| op.id != id);
        if ops.len() < before {
            self.total_completed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a failed replay attempt; returns the new retry count.
    ///
    /// An operation that exhausts its budget is logged at error level and
    /// dropped. No dead-letter store, no caller notification.
    pub fn mark_failed(&self, id: Uuid) -> u32 {
        let mut ops = self.ops.lock();
        let Some(pos) = ops.iter().position(|op| op.id == id) else {
            return 0;
        };
        ops[pos].retry_count += 1;
        let retries = ops[pos].retry_count;
        if retries >= ops[pos].max_retries {
            let op = ops.remove(pos);
            self.dropped_exhausted.fetch_add(1, Ordering::Relaxed);
            error!(
                id = %op.id,
                kind = %op.kind,
                retries,
                "Deferred operation exhausted retry budget, dropping"
            );
            crate::metrics::record_queue_exhausted(op.kind.as_str());
        }
        retries
    }

    /// Current queue length (including operations out of budget that have
    /// not yet been dropped).
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.lock().len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.len(),
            total_enqueued: self.total_enqueued.load(Ordering::Relaxed),
            total_completed: self.total_completed.load(Ordering::Relaxed),
            dropped_overflow: self.dropped_overflow.load(Ordering::Relaxed),
            dropped_exhausted: self.dropped_exhausted.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Platform, PlatformIdentity};
    use serde_json::json;

    fn create_payload(id: &str) -> OperationPayload {
        OperationPayload::CreateUser(CreateIdentityRequest {
            identity: PlatformIdentity::new(Platform::Chat, id),
            attributes: json!({}),
        })
    }

    #[test]
    fn test_enqueue_and_pending_fifo() {
        let queue = OperationQueue::new(10, 3);
        let first = queue.enqueue(create_payload("1"));
        let second = queue.enqueue(create_payload("2"));

        let pending = queue.pending();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, first);
        assert_eq!(pending[1].id, second);
        assert_eq!(pending[0].kind, OperationKind::CreateUser);
    }

    #[test]
    fn test_mark_completed_removes() {
        let queue = OperationQueue::new(10, 3);
        let id = queue.enqueue(create_payload("1"));
        queue.mark_completed(id);

        assert!(queue.is_empty());
        assert_eq!(queue.stats().total_completed, 1);
    }

    #[test]
    fn test_mark_failed_increments_then_drops() {
        let queue = OperationQueue::new(10, 2);
        let id = queue.enqueue(create_payload("1"));

        assert_eq!(queue.mark_failed(id), 1);
        assert_eq!(queue.pending().len(), 1);

        // Second failure exhausts the budget; operation is dropped
        assert_eq!(queue.mark_failed(id), 2);
        assert!(queue.is_empty());
        assert_eq!(queue.stats().dropped_exhausted, 1);
    }

    #[test]
    fn test_overflow_drops_oldest_half() {
        let queue = OperationQueue::new(10, 3);
        let ids: Vec<Uuid> = (0..10).map(|i| queue.enqueue(create_payload(&i.to_string()))).collect();

        // 11th enqueue triggers the overflow policy: oldest 5 dropped,
        // then the new op is appended
        let newest = queue.enqueue(create_payload("10"));

        let pending = queue.pending();
        assert_eq!(pending.len(), 6);
        assert_eq!(pending[0].id, ids[5]);
        assert_eq!(pending.last().unwrap().id, newest);
        assert_eq!(queue.stats().dropped_overflow, 5);
    }

    #[test]
    fn test_mark_failed_unknown_id_is_noop() {
        let queue = OperationQueue::new(10, 3);
        queue.enqueue(create_payload("1"));
        assert_eq!(queue.mark_failed(Uuid::new_v4()), 0);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_payload_kind_tags() {
        assert_eq!(create_payload("1").kind(), OperationKind::CreateUser);
        let order = OperationPayload::RecordOrder(OrderRequest {
            identity: PlatformIdentity::new(Platform::Web, "7"),
            order: json!({"total": 100}),
        });
        assert_eq!(order.kind(), OperationKind::RecordOrder);
        assert_eq!(order.kind().as_str(), "record_order");
    }

    #[test]
    fn test_stats_counters() {
        let queue = OperationQueue::new(10, 3);
        let id = queue.enqueue(create_payload("1"));
        queue.enqueue(create_payload("2"));
        queue.mark_completed(id);

        let stats = queue.stats();
        assert_eq!(stats.total_enqueued, 2);
        assert_eq!(stats.total_completed, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.dropped_overflow, 0);
    }
}
