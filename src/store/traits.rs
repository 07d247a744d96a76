use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::{CreateIdentityRequest, IdentityRecord, LoyaltyView, OrderRequest, PlatformIdentity};

/// The two backing stores the broker fronts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreId {
    /// CRM database: system of record for identities and orders
    Crm,
    /// ERP: owns loyalty balances, cards, and accrual history
    Erp,
}

impl StoreId {
    /// Canonical name used in logs and metrics labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Crm => "crm",
            Self::Erp => "erp",
        }
    }
}

impl std::fmt::Display for StoreId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by backing-store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store could not be reached (outage, network failure)
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// Store responded but the operation failed
    #[error("store backend error: {0}")]
    Backend(String),
    /// Operation exceeded the configured per-call timeout
    #[error("store call timed out after {0}ms")]
    Timeout(u64),
}

/// One backing store behind the broker.
///
/// Implementations must not retry or fall back internally; the facade owns
/// that policy. Every method is a single round-trip against the store.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Which store this is (for health records and metric labels).
    fn id(&self) -> StoreId;

    /// Lightweight liveness round-trip used by the health monitor.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Create an identity record; returns the stored record.
    async fn create_identity(
        &self,
        request: &CreateIdentityRequest,
    ) -> Result<IdentityRecord, StoreError>;

    /// Fetch an identity record, `None` if the store has never seen it.
    async fn get_identity(
        &self,
        identity: &PlatformIdentity,
    ) -> Result<Option<IdentityRecord>, StoreError>;

    /// Record an order; returns the store-assigned order id.
    async fn record_order(&self, request: &OrderRequest) -> Result<String, StoreError>;

    /// Fetch the loyalty state for an identity, `None` if no account exists.
    async fn get_loyalty(
        &self,
        identity: &PlatformIdentity,
    ) -> Result<Option<LoyaltyView>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_id_display() {
        assert_eq!(StoreId::Crm.to_string(), "crm");
        assert_eq!(StoreId::Erp.to_string(), "erp");
    }

    #[test]
    fn test_store_id_serializes_lowercase() {
        assert_eq!(serde_json::to_value(StoreId::Erp).unwrap(), serde_json::json!("erp"));
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::Timeout(3000);
        assert_eq!(err.to_string(), "store call timed out after 3000ms");
    }
}
