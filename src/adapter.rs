//! Platform adapters: one thin, stateless translator per client surface.
//!
//! An adapter turns a platform-specific identifier plus a raw payload into
//! a typed request tagged with its [`Platform`], then delegates to the
//! facade through [`BrokerOps`]. Adapters never retry and never fall back;
//! that policy lives entirely in the facade, which keeps adapters trivially
//! testable against a fake.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::BrokerError;
use crate::identity::{
    CreateIdentityRequest, IdentityRecord, LoyaltyView, OrderRequest, Platform, PlatformIdentity,
};

/// Outcome of a fallback-aware write.
///
/// Both variants are success from the collaborator's point of view; a
/// deferred write has been queued and cached speculatively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum WriteOutcome {
    /// Applied directly against the backing store
    Applied,
    /// Store was down; operation queued for replay
    Deferred {
        /// Id of the queued operation
        operation_id: Uuid,
    },
}

impl WriteOutcome {
    /// Whether the write was deferred to the queue.
    #[must_use]
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred { .. })
    }

    /// The write was accepted, immediately or deferred. Always true today;
    /// exists so collaborators branch on acceptance, not on variants.
    #[must_use]
    pub fn accepted(&self) -> bool {
        true
    }
}

/// Outcome of a fallback-aware order write.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum CreateOrderOutcome {
    /// Stored directly; the store assigned an order id
    Applied {
        /// Store-assigned order id
        order_id: String,
    },
    /// Store was down; no order id yet
    Deferred {
        /// Id of the queued operation
        operation_id: Uuid,
    },
}

impl CreateOrderOutcome {
    /// Order id if the write was applied immediately.
    #[must_use]
    pub fn order_id(&self) -> Option<&str> {
        match self {
            Self::Applied { order_id } => Some(order_id),
            Self::Deferred { .. } => None,
        }
    }
}

/// The generic fallback-aware operations adapters delegate to.
///
/// Implemented by the broker facade; tests substitute a fake.
#[async_trait]
pub trait BrokerOps: Send + Sync {
    /// Create a user identity, queueing on store failure.
    async fn create_user_with_fallback(&self, request: CreateIdentityRequest) -> WriteOutcome;

    /// Fetch a user record, serving from cache on store failure.
    async fn get_user_with_fallback(&self, identity: &PlatformIdentity) -> Option<IdentityRecord>;

    /// Record an order, queueing on store failure.
    async fn create_order_with_fallback(&self, request: OrderRequest) -> CreateOrderOutcome;

    /// Fetch a loyalty view, serving from cache on store failure.
    async fn get_loyalty_with_fallback(&self, identity: &PlatformIdentity) -> LoyaltyView;
}

/// Stateless translator for one platform.
#[derive(Clone)]
pub struct PlatformAdapter {
    platform: Platform,
    ops: Arc<dyn BrokerOps>,
}

impl std::fmt::Debug for PlatformAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformAdapter")
            .field("platform", &self.platform)
            .finish_non_exhaustive()
    }
}

impl PlatformAdapter {
    /// Create an adapter for `platform` over the given facade.
    pub fn new(platform: Platform, ops: Arc<dyn BrokerOps>) -> Self {
        Self { platform, ops }
    }

    /// The platform this adapter serves.
    #[must_use]
    pub fn platform(&self) -> Platform {
        self.platform
    }

    fn identity(&self, identifier: impl Into<String>) -> PlatformIdentity {
        PlatformIdentity::new(self.platform, identifier)
    }

    /// Create an identity for this platform. Returns the identity reference;
    /// a store outage defers the write but still yields the reference.
    pub async fn create_identity(
        &self,
        identifier: impl Into<String> + Send,
        attributes: Value,
    ) -> Option<PlatformIdentity> {
        let identity = self.identity(identifier);
        let outcome = self
            .ops
            .create_user_with_fallback(CreateIdentityRequest {
                identity: identity.clone(),
                attributes,
            })
            .await;
        outcome.accepted().then_some(identity)
    }

    /// Fetch the identity record for this platform's identifier.
    pub async fn get_identity(
        &self,
        identifier: impl Into<String> + Send,
    ) -> Option<IdentityRecord> {
        self.ops.get_user_with_fallback(&self.identity(identifier)).await
    }

    /// Record an order. Returns the store-assigned order id, or `None` when
    /// the write was deferred (it is queued, not lost).
    pub async fn record_order(
        &self,
        identifier: impl Into<String> + Send,
        order: Value,
    ) -> Option<String> {
        let outcome = self
            .ops
            .create_order_with_fallback(OrderRequest {
                identity: self.identity(identifier),
                order,
            })
            .await;
        outcome.order_id().map(ToOwned::to_owned)
    }

    /// Fetch the loyalty view for this platform's identifier.
    pub async fn get_loyalty(&self, identifier: impl Into<String> + Send) -> LoyaltyView {
        self.ops.get_loyalty_with_fallback(&self.identity(identifier)).await
    }
}

/// Lookup table of adapters over the closed platform set.
#[derive(Clone)]
pub struct AdapterSet {
    ops: Arc<dyn BrokerOps>,
}

impl AdapterSet {
    /// Create the adapter set over the given facade.
    pub fn new(ops: Arc<dyn BrokerOps>) -> Self {
        Self { ops }
    }

    /// Adapter for a platform. Exhaustive by construction; no string
    /// dispatch anywhere past this point.
    #[must_use]
    pub fn adapter(&self, platform: Platform) -> PlatformAdapter {
        PlatformAdapter::new(platform, Arc::clone(&self.ops))
    }

    /// Resolve an adapter from an external platform tag.
    ///
    /// This is where [`BrokerError::UnknownPlatform`] is raised; everything
    /// behind it works with the enum.
    pub fn resolve(&self, tag: &str) -> Result<PlatformAdapter, BrokerError> {
        let platform: Platform = tag.parse()?;
        Ok(self.adapter(platform))
    }
}
