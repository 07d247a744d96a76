// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Broker facade.
//!
//! [`DataBroker`] is the single entry point collaborators call. It composes
//! the health monitor, local cache, operation queue, and link registry in
//! front of the two backing stores, and owns the fallback policy:
//!
//! 1. Attempt the operation against the relevant store (bounded by the
//!    per-call timeout).
//! 2. On success, update the local cache and return success.
//! 3. On failure, enqueue a deferred operation, update the cache
//!    speculatively for read-after-write, and return a deferred result.
//!
//! Transient store failures never propagate as errors to collaborators;
//! they see immediate vs. deferred success. Consistency is eventual, not
//! linearizable: a queued write can be overtaken by a later direct write
//! to the same identity.
//!
//! [`BrokerContext`] wraps construction and lifecycle: it starts the
//! supervised recovery worker and exposes an explicit shutdown that stops
//! the worker and drains the queue once.

mod recovery;
mod status;

pub use recovery::RecoveryWorker;
pub use status::{SyncReport, SystemStatus};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::adapter::{AdapterSet, BrokerOps, CreateOrderOutcome, WriteOutcome};
use crate::cache::{now_millis, LocalCache};
use crate::config::BrokerConfig;
use crate::health::{HealthMonitor, SystemHealthReport, SystemMode};
use crate::identity::{
    CreateIdentityRequest, IdentityRecord, LoyaltyView, OrderRequest, PlatformIdentity,
};
use crate::links::{unify_loyalty, IdentityLinkRegistry};
use crate::queue::{OperationKind, OperationPayload, OperationQueue};
use crate::store::{BackingStore, StoreError, StoreId};

/// The broker facade. See the module docs for the fallback algorithm.
///
/// Owns the cache, queue, and link registry exclusively; adapters hold no
/// state of their own. `Send + Sync`, designed for concurrent access.
pub struct DataBroker {
    config: BrokerConfig,
    /// CRM database: system of record for identities and orders
    crm: Arc<dyn BackingStore>,
    /// ERP: owns loyalty balances
    erp: Arc<dyn BackingStore>,
    health: HealthMonitor,
    cache: Arc<LocalCache>,
    queue: Arc<OperationQueue>,
    links: IdentityLinkRegistry,
    /// Operation kinds currently excluded from recovery drains
    paused_kinds: RwLock<HashSet<OperationKind>>,
    started_at: Instant,
}

impl DataBroker {
    /// Create a broker over the CRM and ERP stores.
    pub fn new(
        config: BrokerConfig,
        crm: Arc<dyn BackingStore>,
        erp: Arc<dyn BackingStore>,
    ) -> Self {
        let cache = Arc::new(LocalCache::new(config.cache_max_entries));
        let queue = Arc::new(OperationQueue::new(config.queue_max_ops, config.max_retries));
        let links = IdentityLinkRegistry::new(Arc::clone(&cache), config.link_ttl());
        let health = HealthMonitor::new(
            vec![Arc::clone(&crm), Arc::clone(&erp)],
            config.probe_timeout(),
        );
        Self {
            config,
            crm,
            erp,
            health,
            cache,
            queue,
            links,
            paused_kinds: RwLock::new(HashSet::new()),
            started_at: Instant::now(),
        }
    }

    /// Broker configuration.
    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// The local cache (owned by the broker; exposed for stats and tests).
    #[must_use]
    pub fn cache(&self) -> &Arc<LocalCache> {
        &self.cache
    }

    /// The deferred-operation queue.
    #[must_use]
    pub fn queue(&self) -> &Arc<OperationQueue> {
        &self.queue
    }

    /// The health monitor.
    #[must_use]
    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    /// Probe both stores now and return the fresh report.
    pub async fn probe_now(&self) -> SystemHealthReport {
        self.health.probe_all().await
    }

    /// Current system mode from the latest health records.
    #[must_use]
    pub fn mode(&self) -> SystemMode {
        self.health.mode()
    }

    /// Seconds since the broker was constructed.
    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Exclude an operation kind from recovery drains.
    pub fn pause_kind(&self, kind: OperationKind) {
        self.paused_kinds.write().insert(kind);
        info!(%kind, "Recovery paused for kind");
    }

    /// Re-include an operation kind in recovery drains.
    pub fn resume_kind(&self, kind: OperationKind) {
        self.paused_kinds.write().remove(&kind);
        info!(%kind, "Recovery resumed for kind");
    }

    /// Whether a kind is currently excluded from drains.
    #[must_use]
    pub fn is_kind_paused(&self, kind: OperationKind) -> bool {
        self.paused_kinds.read().contains(&kind)
    }

    /// Link two platform identities as the same real user. Idempotent.
    #[must_use]
    pub fn link_accounts(&self, a: PlatformIdentity, b: PlatformIdentity) -> bool {
        self.links.link(a, b)
    }

    /// Identities directly linked to `identity`.
    #[must_use]
    pub fn find_linked(&self, identity: &PlatformIdentity) -> Vec<PlatformIdentity> {
        self.links.find_linked(identity)
    }

    /// Loyalty view unified across `identity` and everything linked to it.
    ///
    /// Each contributing view is fetched through the fallback path, so a
    /// degraded ERP yields cached (possibly stale) contributions rather
    /// than holes.
    #[tracing::instrument(skip(self), fields(identity = %identity))]
    pub async fn get_unified_loyalty(&self, identity: &PlatformIdentity) -> LoyaltyView {
        let linked = self.links.find_linked(identity);
        let mut views = Vec::with_capacity(1 + linked.len());
        views.push(self.get_loyalty_with_fallback(identity).await);
        for other in &linked {
            views.push(self.get_loyalty_with_fallback(other).await);
        }
        unify_loyalty(views)
    }

    /// Push current cache/queue/mode gauges. Call before metric snapshots.
    pub fn update_gauge_metrics(&self) {
        crate::metrics::set_cache_entries(self.cache.len());
        crate::metrics::set_queue_depth(self.queue.len());
        crate::metrics::set_system_mode(match self.mode() {
            SystemMode::Normal => 0,
            SystemMode::Degraded => 1,
            SystemMode::Emergency => 2,
        });
    }

    /// Bound a store call by the configured per-call timeout.
    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.config.store_call_timeout(), fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.config.store_call_timeout_ms)),
        }
    }

    /// Apply a create-identity write against the CRM and cache the record.
    /// Shared by the direct path and the recovery drain.
    pub(crate) async fn apply_create_user(
        &self,
        request: &CreateIdentityRequest,
    ) -> Result<(), StoreError> {
        let start = Instant::now();
        let record = self.bounded(self.crm.create_identity(request)).await?;
        crate::metrics::record_latency("crm", "create_identity", start.elapsed());
        if let Ok(value) = serde_json::to_value(&record) {
            self.cache.set(request.identity.cache_key(), value, None);
        }
        Ok(())
    }

    /// Apply an order write against the CRM and cache it under the
    /// identity's `last_order` field. Shared with the recovery drain.
    pub(crate) async fn apply_record_order(
        &self,
        request: &OrderRequest,
    ) -> Result<String, StoreError> {
        let start = Instant::now();
        let order_id = self.bounded(self.crm.record_order(request)).await?;
        crate::metrics::record_latency("crm", "record_order", start.elapsed());
        self.cache.set(
            request.identity.field_key("last_order"),
            json!({"order_id": order_id, "order": request.order}),
            None,
        );
        Ok(order_id)
    }

    /// Store a queued operation kind replays against. The recovery worker
    /// uses this to hold the queue while an operation's target is down.
    pub(crate) fn replay_store(kind: OperationKind) -> StoreId {
        match kind {
            OperationKind::CreateUser | OperationKind::RecordOrder => StoreId::Crm,
        }
    }

    /// Replay one queued payload against its store.
    pub(crate) async fn dispatch(&self, payload: &OperationPayload) -> Result<(), StoreError> {
        match payload {
            OperationPayload::CreateUser(request) => self.apply_create_user(request).await,
            OperationPayload::RecordOrder(request) => {
                self.apply_record_order(request).await.map(|_| ())
            }
        }
    }
}

#[async_trait]
impl BrokerOps for DataBroker {
    #[tracing::instrument(skip(self, request), fields(identity = %request.identity))]
    async fn create_user_with_fallback(&self, request: CreateIdentityRequest) -> WriteOutcome {
        match self.apply_create_user(&request).await {
            Ok(()) => {
                debug!("User created against CRM");
                crate::metrics::record_operation("crm", "create_identity", "success");
                WriteOutcome::Applied
            }
            Err(e) => {
                warn!(error = %e, "CRM create failed, deferring");
                // Speculative record so a read-after-write sees the user
                let provisional = IdentityRecord {
                    identity: request.identity.clone(),
                    attributes: request.attributes.clone(),
                    created_at: now_millis(),
                };
                if let Ok(value) = serde_json::to_value(&provisional) {
                    self.cache.set(request.identity.cache_key(), value, None);
                }
                let operation_id = self.queue.enqueue(OperationPayload::CreateUser(request));
                crate::metrics::record_operation("crm", "create_identity", "deferred");
                WriteOutcome::Deferred { operation_id }
            }
        }
    }

    #[tracing::instrument(skip(self), fields(identity = %identity))]
    async fn get_user_with_fallback(&self, identity: &PlatformIdentity) -> Option<IdentityRecord> {
        match self.bounded(self.crm.get_identity(identity)).await {
            Ok(Some(record)) => {
                crate::metrics::record_operation("crm", "get_identity", "success");
                if let Ok(value) = serde_json::to_value(&record) {
                    self.cache.set(identity.cache_key(), value, None);
                }
                Some(record)
            }
            Ok(None) => {
                crate::metrics::record_operation("crm", "get_identity", "miss");
                None
            }
            Err(e) => {
                warn!(error = %e, "CRM read failed, serving from cache");
                crate::metrics::record_operation("crm", "get_identity", "fallback");
                self.cache
                    .get(&identity.cache_key())
                    .and_then(|entry| serde_json::from_value(entry.value).ok())
            }
        }
    }

    #[tracing::instrument(skip(self, request), fields(identity = %request.identity))]
    async fn create_order_with_fallback(&self, request: OrderRequest) -> CreateOrderOutcome {
        match self.apply_record_order(&request).await {
            Ok(order_id) => {
                debug!(order_id = %order_id, "Order recorded against CRM");
                crate::metrics::record_operation("crm", "record_order", "success");
                CreateOrderOutcome::Applied { order_id }
            }
            Err(e) => {
                warn!(error = %e, "CRM order write failed, deferring");
                // Speculative entry: no order id yet, but the order is visible
                self.cache.set(
                    request.identity.field_key("last_order"),
                    json!({"order_id": null, "order": request.order}),
                    None,
                );
                let operation_id = self.queue.enqueue(OperationPayload::RecordOrder(request));
                crate::metrics::record_operation("crm", "record_order", "deferred");
                CreateOrderOutcome::Deferred { operation_id }
            }
        }
    }

    #[tracing::instrument(skip(self), fields(identity = %identity))]
    async fn get_loyalty_with_fallback(&self, identity: &PlatformIdentity) -> LoyaltyView {
        match self.bounded(self.erp.get_loyalty(identity)).await {
            Ok(Some(view)) => {
                crate::metrics::record_operation("erp", "get_loyalty", "success");
                if let Ok(value) = serde_json::to_value(&view) {
                    self.cache.set(identity.field_key("loyalty"), value, None);
                }
                view
            }
            Ok(None) => {
                crate::metrics::record_operation("erp", "get_loyalty", "miss");
                LoyaltyView::empty()
            }
            Err(e) => {
                warn!(error = %e, "ERP read failed, serving loyalty from cache");
                crate::metrics::record_operation("erp", "get_loyalty", "fallback");
                self.cache
                    .get(&identity.field_key("loyalty"))
                    .and_then(|entry| serde_json::from_value(entry.value).ok())
                    .unwrap_or_else(LoyaltyView::empty)
            }
        }
    }
}

/// Owns a [`DataBroker`] and its recovery worker.
///
/// Replaces ambient global state: collaborators receive the context (or an
/// [`AdapterSet`] from it) by reference, and lifecycle is explicit.
pub struct BrokerContext {
    broker: Arc<DataBroker>,
    recovery: RecoveryWorker,
}

impl BrokerContext {
    /// Build the broker, take an initial health sample, and start the
    /// recovery worker.
    pub async fn start(
        config: BrokerConfig,
        crm: Arc<dyn BackingStore>,
        erp: Arc<dyn BackingStore>,
    ) -> Self {
        let broker = Arc::new(DataBroker::new(config, crm, erp));
        let report = broker.probe_now().await;
        info!(mode = %report.mode(), "Broker context started");
        let recovery = RecoveryWorker::spawn(Arc::clone(&broker));
        Self { broker, recovery }
    }

    /// The broker facade.
    #[must_use]
    pub fn broker(&self) -> &Arc<DataBroker> {
        &self.broker
    }

    /// Platform adapters over this broker.
    #[must_use]
    pub fn adapters(&self) -> AdapterSet {
        AdapterSet::new(Arc::clone(&self.broker) as Arc<dyn BrokerOps>)
    }

    /// Stop the recovery worker and run one final synchronous drain.
    pub async fn shutdown(self) {
        info!("Broker context shutting down");
        self.recovery.stop().await;
        let report = self.broker.force_sync_all_pending().await;
        info!(
            processed = report.processed,
            failed = report.failed,
            remaining = self.broker.queue().len(),
            "Final drain complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Platform;
    use crate::store::{InMemoryStore, StoreId};
    use serde_json::json;

    fn test_config() -> BrokerConfig {
        BrokerConfig {
            probe_timeout_ms: 100,
            store_call_timeout_ms: 100,
            ..Default::default()
        }
    }

    fn broker_with_stores() -> (DataBroker, Arc<InMemoryStore>, Arc<InMemoryStore>) {
        let crm = Arc::new(InMemoryStore::new(StoreId::Crm));
        let erp = Arc::new(InMemoryStore::new(StoreId::Erp));
        let broker = DataBroker::new(
            test_config(),
            crm.clone() as Arc<dyn BackingStore>,
            erp.clone() as Arc<dyn BackingStore>,
        );
        (broker, crm, erp)
    }

    fn chat(id: &str) -> PlatformIdentity {
        PlatformIdentity::new(Platform::Chat, id)
    }

    #[tokio::test]
    async fn test_create_user_applied_when_store_up() {
        let (broker, crm, _erp) = broker_with_stores();
        let outcome = broker
            .create_user_with_fallback(CreateIdentityRequest {
                identity: chat("42"),
                attributes: json!({"name": "Dana"}),
            })
            .await;

        assert_eq!(outcome, WriteOutcome::Applied);
        assert_eq!(crm.identity_count(), 1);
        assert!(broker.cache().get("chat:42").is_some());
        assert!(broker.queue().is_empty());
    }

    #[tokio::test]
    async fn test_create_user_deferred_when_store_down() {
        let (broker, crm, _erp) = broker_with_stores();
        crm.set_available(false);

        let outcome = broker
            .create_user_with_fallback(CreateIdentityRequest {
                identity: chat("42"),
                attributes: json!({"name": "Dana"}),
            })
            .await;

        assert!(outcome.is_deferred());
        assert_eq!(crm.identity_count(), 0);
        // Speculative cache entry + one queued operation
        assert!(broker.cache().get("chat:42").is_some());
        let pending = broker.queue().pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, OperationKind::CreateUser);
    }

    #[tokio::test]
    async fn test_read_after_deferred_write_sees_user() {
        let (broker, crm, _erp) = broker_with_stores();
        crm.set_available(false);

        broker
            .create_user_with_fallback(CreateIdentityRequest {
                identity: chat("42"),
                attributes: json!({"name": "Dana"}),
            })
            .await;

        let record = broker.get_user_with_fallback(&chat("42")).await.unwrap();
        assert_eq!(record.attributes, json!({"name": "Dana"}));
    }

    #[tokio::test]
    async fn test_get_user_store_miss_is_none() {
        let (broker, _crm, _erp) = broker_with_stores();
        assert!(broker.get_user_with_fallback(&chat("nobody")).await.is_none());
    }

    #[tokio::test]
    async fn test_order_applied_and_deferred() {
        let (broker, crm, _erp) = broker_with_stores();

        let applied = broker
            .create_order_with_fallback(OrderRequest {
                identity: chat("42"),
                order: json!({"total": 450, "points": 45}),
            })
            .await;
        assert!(applied.order_id().is_some());

        crm.set_available(false);
        let deferred = broker
            .create_order_with_fallback(OrderRequest {
                identity: chat("42"),
                order: json!({"total": 100, "points": 10}),
            })
            .await;
        assert!(deferred.order_id().is_none());
        assert_eq!(broker.queue().pending().len(), 1);
        // Speculative last_order entry has no id yet
        let entry = broker.cache().get("chat:42:last_order").unwrap();
        assert!(entry.value["order_id"].is_null());
    }

    #[tokio::test]
    async fn test_loyalty_fallback_serves_cached_view() {
        let (broker, _crm, erp) = broker_with_stores();
        let identity = chat("42");
        erp.set_loyalty(&identity, 120, vec![json!({"order": 1})], vec!["C1".into()]);

        // Warm the cache while the ERP is up
        let live = broker.get_loyalty_with_fallback(&identity).await;
        assert_eq!(live.points, 120);

        erp.set_available(false);
        let cached = broker.get_loyalty_with_fallback(&identity).await;
        assert_eq!(cached.points, 120);
        assert_eq!(cached.cards, vec!["C1".to_string()]);
    }

    #[tokio::test]
    async fn test_loyalty_unknown_identity_is_empty() {
        let (broker, _crm, erp) = broker_with_stores();
        let view = broker.get_loyalty_with_fallback(&chat("nobody")).await;
        assert_eq!(view.points, 0);

        // Down with a cold cache: still an empty view, never an error
        erp.set_available(false);
        let view = broker.get_loyalty_with_fallback(&chat("nobody2")).await;
        assert_eq!(view.points, 0);
    }

    #[tokio::test]
    async fn test_slow_store_call_times_out_and_defers() {
        let (broker, crm, _erp) = broker_with_stores();
        crm.set_latency(std::time::Duration::from_millis(500));

        let outcome = broker
            .create_user_with_fallback(CreateIdentityRequest {
                identity: chat("42"),
                attributes: json!({}),
            })
            .await;
        assert!(outcome.is_deferred());
    }

    #[tokio::test]
    async fn test_unified_loyalty_across_links() {
        let (broker, _crm, erp) = broker_with_stores();
        let a = chat("42");
        let b = PlatformIdentity::new(Platform::Web, "acct-7");
        erp.set_loyalty(&a, 50, vec![json!({"order": 1})], vec!["C1".into()]);
        erp.set_loyalty(&b, 70, vec![json!({"order": 2})], vec![]);

        assert!(broker.link_accounts(a.clone(), b.clone()));

        let unified = broker.get_unified_loyalty(&a).await;
        assert_eq!(unified.points, 120);
        assert_eq!(unified.history.len(), 2);
        assert_eq!(unified.source, crate::identity::LoyaltySource::Unified);

        // Direction-independent
        let from_b = broker.get_unified_loyalty(&b).await;
        assert_eq!(from_b.points, 120);
        assert_eq!(from_b.source, crate::identity::LoyaltySource::Unified);
    }

    #[tokio::test]
    async fn test_unlinked_loyalty_is_single() {
        let (broker, _crm, erp) = broker_with_stores();
        let a = chat("42");
        erp.set_loyalty(&a, 50, vec![], vec![]);

        let view = broker.get_unified_loyalty(&a).await;
        assert_eq!(view.points, 50);
        assert_eq!(view.source, crate::identity::LoyaltySource::Single);
    }

    #[tokio::test]
    async fn test_pause_and_resume_kind() {
        let (broker, _crm, _erp) = broker_with_stores();
        assert!(!broker.is_kind_paused(OperationKind::CreateUser));
        broker.pause_kind(OperationKind::CreateUser);
        assert!(broker.is_kind_paused(OperationKind::CreateUser));
        broker.resume_kind(OperationKind::CreateUser);
        assert!(!broker.is_kind_paused(OperationKind::CreateUser));
    }
}
