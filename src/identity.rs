//! Core data model: platforms, identities, and typed operation payloads.
//!
//! Every client surface (chat bot, website, mobile apps, desktop, partner
//! API) addresses the same user through a platform-specific identifier.
//! The broker works exclusively in terms of [`PlatformIdentity`] values and
//! the typed request records defined here; duck-typed payload maps never
//! cross the adapter/facade boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use crate::error::BrokerError;

/// A client surface the broker serves.
///
/// Closed set by design: adding a surface is a source change, and platform
/// dispatch is exhaustiveness-checked by the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// Chat bot (the original surface)
    Chat,
    /// Website backend
    Web,
    /// iOS mobile app
    MobileIos,
    /// Android mobile app
    MobileAndroid,
    /// Desktop client
    Desktop,
    /// Partner API integrations
    PartnerApi,
}

impl Platform {
    /// All supported platforms, in a stable order.
    pub const ALL: [Platform; 6] = [
        Platform::Chat,
        Platform::Web,
        Platform::MobileIos,
        Platform::MobileAndroid,
        Platform::Desktop,
        Platform::PartnerApi,
    ];

    /// Canonical tag used in cache keys and exports.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Web => "web",
            Self::MobileIos => "mobile_ios",
            Self::MobileAndroid => "mobile_android",
            Self::Desktop => "desktop",
            Self::PartnerApi => "partner_api",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(Self::Chat),
            "web" => Ok(Self::Web),
            "mobile_ios" | "ios" => Ok(Self::MobileIos),
            "mobile_android" | "android" => Ok(Self::MobileAndroid),
            "desktop" => Ok(Self::Desktop),
            "partner_api" | "partner" => Ok(Self::PartnerApi),
            other => Err(BrokerError::UnknownPlatform(other.to_string())),
        }
    }
}

/// A platform-qualified user identifier.
///
/// The identifier is opaque to the broker (chat user id, web account id,
/// device id, partner key); only the backing stores interpret it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlatformIdentity {
    /// The surface this identity belongs to
    pub platform: Platform,
    /// Opaque platform-specific identifier
    pub identifier: String,
}

impl PlatformIdentity {
    /// Create a new identity reference.
    pub fn new(platform: Platform, identifier: impl Into<String>) -> Self {
        Self {
            platform,
            identifier: identifier.into(),
        }
    }

    /// Cache key for this identity: `{platform}:{identifier}`.
    #[must_use]
    pub fn cache_key(&self) -> String {
        format!("{}:{}", self.platform, self.identifier)
    }

    /// Cache key for a named field: `{platform}:{identifier}:{field}`.
    #[must_use]
    pub fn field_key(&self, field: &str) -> String {
        format!("{}:{}:{}", self.platform, self.identifier, field)
    }
}

impl std::fmt::Display for PlatformIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.platform, self.identifier)
    }
}

/// Typed request to create a platform identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateIdentityRequest {
    /// The identity being created
    pub identity: PlatformIdentity,
    /// Arbitrary attributes supplied by the surface (name, locale, consent flags)
    pub attributes: Value,
}

/// Typed request to record an order against an identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// The identity placing the order
    pub identity: PlatformIdentity,
    /// Order payload as the surface submitted it
    pub order: Value,
}

/// An identity record as held by (or speculatively cached for) the CRM store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// The identity this record describes
    pub identity: PlatformIdentity,
    /// Stored attributes
    pub attributes: Value,
    /// Creation timestamp (epoch millis)
    pub created_at: i64,
}

/// Provenance of a loyalty view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoyaltySource {
    /// Data from a single identity
    Single,
    /// Aggregated across linked identities
    Unified,
}

impl LoyaltySource {
    /// Canonical tag (`"single"` / `"unified"`).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Unified => "unified",
        }
    }
}

/// A user's loyalty state as seen through one identity (or unified across
/// linked identities).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoyaltyView {
    /// Current points balance
    pub points: i64,
    /// Order/accrual history entries
    pub history: Vec<Value>,
    /// Loyalty card numbers
    pub cards: Vec<String>,
    /// Whether this view is single-identity or unified
    pub source: LoyaltySource,
}

impl LoyaltyView {
    /// An empty single-identity view (no loyalty data on record).
    #[must_use]
    pub fn empty() -> Self {
        Self {
            points: 0,
            history: Vec::new(),
            cards: Vec::new(),
            source: LoyaltySource::Single,
        }
    }
}
