use serde::{Deserialize, Serialize};

use super::{Rect, RegionId};

/// A time-bound, owner-scoped soft claim on a single cell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Lock {
    /// Opaque owner token supplied by the client
    pub owner_id: String,
    /// When the lock stops being valid (ms since epoch)
    pub expires_at: u64,
}

impl Lock {
    pub fn new(owner_id: impl Into<String>, expires_at: u64) -> Self {
        Self {
            owner_id: owner_id.into(),
            expires_at,
        }
    }

    /// A lock is valid iff `expires_at > now`
    pub fn is_live(&self, now: u64) -> bool {
        self.expires_at > now
    }

    pub fn is_owned_by(&self, owner_id: &str) -> bool {
        self.owner_id == owner_id
    }
}

/// Sale metadata supplied by the checkout flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalePayload {
    /// Display name of the buyer
    #[serde(default)]
    pub name: String,
    /// Link target shown on the sold region
    pub link: String,
    /// Extra data stored verbatim on every sold record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl SalePayload {
    pub fn new(name: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            link: link.into(),
            metadata: None,
        }
    }
}

/// Permanent assignment of a cell. Never mutated once committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SoldRecord {
    pub owner_id: String,
    pub name: String,
    pub link: String,
    /// Bounding box of every cell sold by the same finalize call
    pub rect: Rect,
    pub region_id: RegionId,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Cells sold together, enriched later by the asset pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Region {
    pub owner_id: String,
    pub rect: Rect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_url: Option<String>,
}
