//! In-memory backing store with failure injection.
//!
//! Stands in for the CRM database or ERP in tests and demos. Outages are
//! simulated with [`set_available`](InMemoryStore::set_available); every
//! call checks availability before touching state, so a "down" store fails
//! exactly the way the broker's fallback path expects.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use uuid::Uuid;

use super::traits::{BackingStore, StoreError, StoreId};
use crate::identity::{
    CreateIdentityRequest, IdentityRecord, LoyaltySource, LoyaltyView, OrderRequest,
    PlatformIdentity,
};

/// Loyalty account state held by the in-memory ERP.
#[derive(Debug, Clone)]
struct LoyaltyAccount {
    points: i64,
    history: Vec<Value>,
    cards: Vec<String>,
}

/// In-memory [`BackingStore`] keyed by `{platform}:{identifier}`.
pub struct InMemoryStore {
    id: StoreId,
    identities: DashMap<String, IdentityRecord>,
    orders: DashMap<String, Vec<(String, Value)>>,
    loyalty: DashMap<String, LoyaltyAccount>,
    available: AtomicBool,
    latency_ms: AtomicU64,
}

impl InMemoryStore {
    /// Create an empty, healthy store.
    #[must_use]
    pub fn new(id: StoreId) -> Self {
        Self {
            id,
            identities: DashMap::new(),
            orders: DashMap::new(),
            loyalty: DashMap::new(),
            available: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
        }
    }

    /// Simulate an outage (`false`) or recovery (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    /// Whether the store currently accepts calls.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Add artificial latency to every call (0 disables).
    pub fn set_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(ms, Ordering::Release);
    }

    /// Seed a loyalty account (test/demo helper).
    pub fn set_loyalty(
        &self,
        identity: &PlatformIdentity,
        points: i64,
        history: Vec<Value>,
        cards: Vec<String>,
    ) {
        self.loyalty.insert(
            identity.cache_key(),
            LoyaltyAccount { points, history, cards },
        );
    }

    /// Number of identities on record.
    #[must_use]
    pub fn identity_count(&self) -> usize {
        self.identities.len()
    }

    /// Number of orders recorded for an identity.
    #[must_use]
    pub fn order_count(&self, identity: &PlatformIdentity) -> usize {
        self.orders
            .get(&identity.cache_key())
            .map_or(0, |orders| orders.len())
    }

    async fn checkpoint(&self) -> Result<(), StoreError> {
        let latency = self.latency_ms.load(Ordering::Acquire);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if !self.is_available() {
            return Err(StoreError::Unavailable(format!(
                "{} store is down (simulated outage)",
                self.id
            )));
        }
        Ok(())
    }

    fn now_millis() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }
}

#[async_trait]
impl BackingStore for InMemoryStore {
    fn id(&self) -> StoreId {
        self.id
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.checkpoint().await
    }

    async fn create_identity(
        &self,
        request: &CreateIdentityRequest,
    ) -> Result<IdentityRecord, StoreError> {
        self.checkpoint().await?;
        let record = IdentityRecord {
            identity: request.identity.clone(),
            attributes: request.attributes.clone(),
            created_at: Self::now_millis(),
        };
        self.identities
            .insert(request.identity.cache_key(), record.clone());
        Ok(record)
    }

    async fn get_identity(
        &self,
        identity: &PlatformIdentity,
    ) -> Result<Option<IdentityRecord>, StoreError> {
        self.checkpoint().await?;
        Ok(self
            .identities
            .get(&identity.cache_key())
            .map(|r| r.value().clone()))
    }

    async fn record_order(&self, request: &OrderRequest) -> Result<String, StoreError> {
        self.checkpoint().await?;
        let order_id = Uuid::new_v4().to_string();
        let key = request.identity.cache_key();

        self.orders
            .entry(key.clone())
            .or_default()
            .push((order_id.clone(), request.order.clone()));

        // Accrue points if the payload carries them
        let points = request.order.get("points").and_then(Value::as_i64).unwrap_or(0);
        let mut account = self.loyalty.entry(key).or_insert_with(|| LoyaltyAccount {
            points: 0,
            history: Vec::new(),
            cards: Vec::new(),
        });
        account.points += points;
        account.history.push(request.order.clone());

        Ok(order_id)
    }

    async fn get_loyalty(
        &self,
        identity: &PlatformIdentity,
    ) -> Result<Option<LoyaltyView>, StoreError> {
        self.checkpoint().await?;
        Ok(self.loyalty.get(&identity.cache_key()).map(|account| LoyaltyView {
            points: account.points,
            history: account.history.clone(),
            cards: account.cards.clone(),
            source: LoyaltySource::Single,
        }))
    }
}
