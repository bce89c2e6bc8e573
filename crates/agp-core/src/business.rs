//! Owner-scoped business profiles.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a [`Business`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BusinessStatus {
    /// Visible in public discovery and usable in gateway calls.
    Active,
    /// Temporarily hidden; gateway calls are refused.
    Suspended,
    /// Soft-deleted.
    Deleted,
}

/// A business profile an owner has connected to a platform.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Business {
    /// Slug id, derived from `name` with collision-suffixing.
    pub id: String,
    /// Owning principal id.
    pub owner_id: String,
    /// Display name.
    pub name: String,
    /// Adapter platform slug this business is integrated with.
    pub platform: String,
    /// Free-text location.
    #[serde(default)]
    pub location: Option<String>,
    /// Free-text description.
    #[serde(default)]
    pub description: Option<String>,
    /// Free-text category.
    #[serde(default)]
    pub category: Option<String>,
    /// Arbitrary owner preferences, opaque to the gateway.
    #[serde(default)]
    pub preferences: Option<serde_json::Value>,
    /// Lifecycle status.
    pub status: BusinessStatus,
}
