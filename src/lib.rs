//! # Loyalty Broker
//!
//! A resilient data broker for a multi-platform loyalty and rewards
//! platform. Collaborators (chat bots, web portals, mobile apps, partner
//! integrations) go through one facade that absorbs outages of the two
//! backing stores instead of surfacing them.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Platform Adapters                       │
//! │  • One thin adapter per collaborator platform              │
//! │  • Uniform API: identity, orders, loyalty                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     DataBroker Facade                       │
//! │  • Fallback policy: try store, else cache + defer          │
//! │  • Identity link registry for cross-platform users         │
//! │  • Health monitor deriving NORMAL/DEGRADED/EMERGENCY       │
//! └─────────────────────────────────────────────────────────────┘
//!                 │                            │
//!                 ▼                            ▼
//! ┌───────────────────────────┐  ┌───────────────────────────────┐
//! │       Local Cache         │  │     Operation Queue           │
//! │  • Bounded, insertion     │  │  • Bounded FIFO of deferred   │
//! │    order, batch eviction  │  │    writes, lossy at capacity  │
//! │  • Advisory TTL           │  │  • Per-op retry budget        │
//! └───────────────────────────┘  └───────────────────────────────┘
//!                 │                            │
//!                 ▼                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │            Backing Stores (CRM + ERP)                       │
//! │  • CRM: system of record for identities and orders         │
//! │  • ERP: owns loyalty balances, history, and cards          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use loyalty_broker::{
//!     BrokerConfig, BrokerContext, InMemoryStore, Platform, PlatformIdentity, StoreId,
//! };
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let crm = Arc::new(InMemoryStore::new(StoreId::Crm));
//!     let erp = Arc::new(InMemoryStore::new(StoreId::Erp));
//!     let ctx = BrokerContext::start(BrokerConfig::default(), crm, erp).await;
//!
//!     let adapters = ctx.adapters();
//!     let chat = adapters.adapter(Platform::Chat);
//!     let identity = chat
//!         .create_identity("42", json!({"name": "Dana"}))
//!         .await;
//!     assert!(identity.is_some());
//!
//!     let loyalty = ctx
//!         .broker()
//!         .get_unified_loyalty(&PlatformIdentity::new(Platform::Chat, "42"))
//!         .await;
//!     println!("points: {}", loyalty.points);
//!
//!     ctx.shutdown().await;
//! }
//! ```
//!
//! ## Guarantees
//!
//! - **Availability over consistency**: reads and writes succeed (possibly
//!   stale, possibly deferred) whenever at least the cache is warm.
//! - **Bounded memory**: the cache and queue are both capacity-bounded
//!   with explicit, logged shedding policies.
//! - **Self-healing**: a supervised recovery worker probes the stores and
//!   replays deferred writes once they come back.
//!
//! ## Modules
//!
//! - [`broker`]: The [`DataBroker`] facade and [`BrokerContext`] lifecycle
//! - [`adapter`]: Per-platform adapters over the facade
//! - [`store`]: The [`BackingStore`] trait and in-memory implementation
//! - [`health`]: Store probing and system mode derivation
//! - [`cache`]: Bounded insertion-order cache
//! - [`queue`]: Deferred-write queue with retry budgets
//! - [`links`]: Cross-platform identity links and loyalty unification

pub mod adapter;
pub mod broker;
pub mod cache;
pub mod config;
pub mod error;
pub mod health;
pub mod identity;
pub mod links;
pub mod metrics;
pub mod queue;
pub mod store;

pub use adapter::{AdapterSet, BrokerOps, CreateOrderOutcome, PlatformAdapter, WriteOutcome};
pub use broker::{BrokerContext, DataBroker, RecoveryWorker, SyncReport, SystemStatus};
pub use cache::{CacheEntry, CacheStats, LocalCache};
pub use config::BrokerConfig;
pub use error::BrokerError;
pub use health::{HealthMonitor, HealthRecord, StoreStatus, SystemHealthReport, SystemMode};
pub use identity::{
    CreateIdentityRequest, IdentityRecord, LoyaltySource, LoyaltyView, OrderRequest, Platform,
    PlatformIdentity,
};
pub use links::{IdentityLinkRegistry, LinkEdge};
pub use queue::{OperationKind, OperationPayload, OperationQueue, QueueStats, QueuedOperation};
pub use store::{BackingStore, InMemoryStore, StoreError, StoreId};
