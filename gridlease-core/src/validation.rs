//! Request validation. Everything here runs before the store is touched.

use std::collections::BTreeSet;

use url::Url;

use crate::config::GridConfig;
use crate::error::{GridError, GridResult};
use crate::types::{CellId, SalePayload};

pub fn validate_owner(owner_id: &str, config: &GridConfig) -> GridResult<()> {
    if owner_id.trim().is_empty() {
        return Err(GridError::validation("owner_id is required"));
    }
    if owner_id.len() > config.max_owner_len {
        return Err(GridError::validation(format!(
            "owner_id longer than {} bytes",
            config.max_owner_len
        )));
    }
    Ok(())
}

/// Rejects empty lists, out-of-range indices, duplicates and oversized requests.
pub fn validate_cells(cells: &[CellId], config: &GridConfig) -> GridResult<()> {
    if cells.is_empty() {
        return Err(GridError::validation("cells must not be empty"));
    }
    if cells.len() > config.max_cells_per_request {
        return Err(GridError::validation(format!(
            "too many cells: {} (max {})",
            cells.len(),
            config.max_cells_per_request
        )));
    }
    let mut seen = BTreeSet::new();
    for cell in cells {
        if !config.dims.contains(*cell) {
            return Err(GridError::validation(format!(
                "cell {} out of range for {}x{} grid",
                cell, config.dims.width, config.dims.height
            )));
        }
        if !seen.insert(*cell) {
            return Err(GridError::validation(format!("cell {} listed twice", cell)));
        }
    }
    Ok(())
}

pub fn validate_ttl(ttl_ms: u64, config: &GridConfig) -> GridResult<()> {
    if ttl_ms == 0 {
        return Err(GridError::validation("ttl must be greater than 0"));
    }
    if ttl_ms > config.max_ttl_ms {
        return Err(GridError::validation(format!(
            "ttl {}ms exceeds maximum {}ms",
            ttl_ms, config.max_ttl_ms
        )));
    }
    Ok(())
}

/// Accepts only absolute http(s) URLs. Returns the URL without its fragment.
pub fn normalize_link(raw: &str) -> GridResult<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(GridError::validation("link is required"));
    }
    let mut url = Url::parse(raw).map_err(|e| GridError::validation(format!("invalid link '{}': {}", raw, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(GridError::validation(format!(
            "link scheme '{}' not allowed (http or https only)",
            url.scheme()
        )));
    }
    url.set_fragment(None);
    Ok(url.to_string())
}

/// Trims, strips angle brackets and control characters, and truncates.
pub fn sanitize_name(raw: &str, max_len: usize) -> String {
    raw.trim()
        .chars()
        .filter(|c| !matches!(c, '<' | '>') && !c.is_control())
        .take(max_len)
        .collect::<String>()
        .trim()
        .to_string()
}

/// Validates a finalize payload and returns its normalized form.
/// The name may end up empty; the link may not.
pub fn normalize_payload(payload: &SalePayload, config: &GridConfig) -> GridResult<SalePayload> {
    Ok(SalePayload {
        name: sanitize_name(&payload.name, config.max_name_len),
        link: normalize_link(&payload.link)?,
        metadata: payload.metadata.clone(),
    })
}
