use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use gridlease_core::types::{CellId, GridStats, Lock, Region, RegionId, SalePayload, SoldRecord};
use gridlease_core::GridError;

// ─── Validation Helpers ─────────────────────────────────────────────────────

fn require_owner(owner_id: &str) -> Result<(), String> {
    if owner_id.trim().is_empty() {
        return Err("owner_id is required".to_string());
    }
    Ok(())
}

fn require_cells(cells: &[CellId]) -> Result<(), String> {
    if cells.is_empty() {
        return Err("cells must not be empty".to_string());
    }
    Ok(())
}

// ─── Request Types ──────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
pub struct ReserveRequest {
    pub owner_id: String,
    pub cells: Vec<CellId>,
    /// Falls back to the server's default TTL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
}

impl ReserveRequest {
    pub fn validate(&self) -> Result<(), String> {
        require_owner(&self.owner_id)?;
        require_cells(&self.cells)?;
        if self.ttl_ms == Some(0) {
            return Err("ttl_ms must be greater than 0".to_string());
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
pub struct UnlockRequest {
    pub owner_id: String,
    pub cells: Vec<CellId>,
}

impl UnlockRequest {
    pub fn validate(&self) -> Result<(), String> {
        require_owner(&self.owner_id)?;
        require_cells(&self.cells)
    }
}

#[derive(Serialize, Deserialize)]
pub struct FinalizeRequest {
    pub owner_id: String,
    pub cells: Vec<CellId>,
    pub payload: SalePayload,
}

impl FinalizeRequest {
    pub fn validate(&self) -> Result<(), String> {
        require_owner(&self.owner_id)?;
        require_cells(&self.cells)?;
        if self.payload.link.trim().is_empty() {
            return Err("payload.link is required".to_string());
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
pub struct AssetRequest {
    pub url: String,
}

// ─── Response Types ─────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set on failures: whether the same request may succeed if re-sent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            retryable: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
            retryable: Some(false),
        }
    }

    pub fn from_error(err: &GridError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.to_string()),
            retryable: Some(err.is_retryable()),
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct StatusResponse {
    pub sold: BTreeMap<CellId, SoldRecord>,
    pub locks: BTreeMap<CellId, Lock>,
    pub regions: BTreeMap<RegionId, Region>,
    pub stats: GridStats,
    pub version: String,
}

#[derive(Serialize, Deserialize)]
pub struct AssetResponse {
    pub region_id: String,
    pub asset_url: String,
}

#[derive(Serialize, Deserialize)]
pub struct PruneResponse {
    pub pruned: usize,
}

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub storage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<GridStats>,
}
