//! Broker error taxonomy.
//!
//! Deliberately small. Transient store failures ([`crate::store::StoreError`])
//! are absorbed by the cache/queue fallback path and never surface to
//! collaborators; queue overflow is a logged shedding policy, not an error.
//! What remains is input validation at the outer boundary.

use thiserror::Error;

/// Errors surfaced to broker callers.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// An adapter was handed a platform tag outside the supported set.
    /// Rejected at the adapter boundary; everything behind it works with
    /// the [`crate::identity::Platform`] enum.
    #[error("unknown platform tag '{0}'")]
    UnknownPlatform(String),
}
