use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::types::GridDims;

/// Deploy-time settings shared by every operation.
#[derive(Debug, Clone)]
pub struct GridConfig {
    pub dims: GridDims,
    /// TTL applied when a reserve request does not name one
    pub default_ttl_ms: u64,
    /// Upper bound accepted for a requested TTL
    pub max_ttl_ms: u64,
    /// Largest cell list accepted in one request
    pub max_cells_per_request: usize,
    pub max_owner_len: usize,
    pub max_name_len: usize,
    pub retry: RetryPolicy,
    /// Bound on every remote store call
    pub store_timeout: Duration,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            dims: GridDims::default(),
            default_ttl_ms: 3 * 60 * 1000,
            max_ttl_ms: 15 * 60 * 1000,
            max_cells_per_request: 3000,
            max_owner_len: 128,
            max_name_len: 40,
            retry: RetryPolicy::default(),
            store_timeout: Duration::from_secs(10),
        }
    }
}
