//! High-level client that wires the coordinator and committer to a store.
//! The CLI server and the `hold` session both go through this.

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::GridConfig;
use crate::coordinator::ReservationCoordinator;
use crate::error::{GridError, GridResult};
use crate::finalize::FinalizationCommitter;
use crate::infrastructure::{CasOutcome, VersionedStore};
use crate::infrastructure_in_memory::InMemoryGridStore;
use crate::state::{FinalizeOutcome, ReserveOutcome, UnlockOutcome};
use crate::types::document;
use crate::types::{CellId, GridSnapshot, GridStats, SalePayload, Version};

/// The operations a checkout session needs, whether they run in-process
/// or against a remote `gridlease serve`.
pub trait ReservationApi {
    /// Current grid with expired locks removed
    fn status(&self) -> GridResult<GridSnapshot>;

    fn reserve(&self, owner_id: &str, cells: &[CellId], ttl_ms: u64) -> GridResult<ReserveOutcome>;

    fn unlock(&self, owner_id: &str, cells: &[CellId]) -> GridResult<UnlockOutcome>;

    fn finalize(&self, owner_id: &str, cells: &[CellId], payload: &SalePayload) -> GridResult<FinalizeOutcome>;
}

/// The main entry point: every grid operation through a single API.
#[derive(Clone)]
pub struct GridClient {
    store: Arc<dyn VersionedStore>,
    clock: Arc<dyn Clock>,
    config: GridConfig,
    coordinator: ReservationCoordinator,
    committer: FinalizationCommitter,
}

impl GridClient {
    /// Client over an empty in-memory store with default settings.
    pub fn new() -> Self {
        Self::with_store(
            Arc::new(InMemoryGridStore::new()),
            Arc::new(SystemClock),
            GridConfig::default(),
        )
    }

    pub fn with_store(store: Arc<dyn VersionedStore>, clock: Arc<dyn Clock>, config: GridConfig) -> Self {
        let coordinator = ReservationCoordinator::new(store.clone(), clock.clone(), config.clone());
        let committer = FinalizationCommitter::new(store.clone(), clock.clone(), config.clone());
        Self {
            store,
            clock,
            config,
            coordinator,
            committer,
        }
    }

    /// Client backed by SQLite at the given path.
    /// The grid survives server restarts.
    #[cfg(feature = "sqlite")]
    pub fn with_sqlite(path: &str, config: GridConfig) -> GridResult<Self> {
        let store = crate::infrastructure_sqlite::SqliteGridStore::open(path, config.dims, config.store_timeout)
            .map_err(|e| {
                GridError::StoreUnavailable(format!("failed to open SQLite database at '{}': {}", path, e))
            })?;
        Ok(Self::with_store(Arc::new(store), Arc::new(SystemClock), config))
    }

    /// Client whose document lives behind an ETag-aware HTTP endpoint.
    #[cfg(feature = "http")]
    pub fn with_http(url: &str, bearer: Option<&str>, config: GridConfig) -> Self {
        let mut store = crate::infrastructure_http::HttpDocumentStore::new(url, config.dims, config.store_timeout);
        if let Some(token) = bearer {
            store = store.with_bearer(token);
        }
        Self::with_store(Arc::new(store), Arc::new(SystemClock), config)
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn describe_store(&self) -> String {
        self.store.describe()
    }

    /// Pruned snapshot, its version and derived counts
    pub fn status_with_stats(&self) -> GridResult<(GridSnapshot, Version, GridStats)> {
        let (snapshot, version) = self.coordinator.status()?;
        let stats = snapshot.stats(self.config.dims, self.clock.now_ms());
        Ok((snapshot, version, stats))
    }

    pub fn prune_expired(&self) -> GridResult<usize> {
        self.coordinator.prune_expired()
    }

    pub fn set_asset_url(&self, region_id: &str, url: &str) -> GridResult<String> {
        self.committer.set_asset_url(region_id, url)
    }

    /// The stored document exactly as written, with its version.
    pub fn document(&self) -> GridResult<(String, Version)> {
        let (snapshot, version) = self.store.read()?;
        Ok((document::encode(&snapshot)?, version))
    }

    /// Replace the stored document iff the store is still at `expected`.
    ///
    /// The body must decode under the current schema and keep sold and
    /// locked cells disjoint.
    pub fn replace_document(&self, body: &str, expected: &Version) -> GridResult<CasOutcome> {
        let snapshot = document::decode(Some(body), self.config.dims)?;
        // Writers prune against their own clocks, so lock liveness is not checked here
        snapshot.check_exclusive().map_err(GridError::Validation)?;
        let outcome = self.store.compare_and_swap(&snapshot, expected)?;
        if let CasOutcome::Committed(version) = &outcome {
            tracing::info!(version = %version, "Document replaced");
        }
        Ok(outcome)
    }
}

impl Default for GridClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ReservationApi for GridClient {
    fn status(&self) -> GridResult<GridSnapshot> {
        self.coordinator.status().map(|(snapshot, _)| snapshot)
    }

    fn reserve(&self, owner_id: &str, cells: &[CellId], ttl_ms: u64) -> GridResult<ReserveOutcome> {
        self.coordinator.reserve(owner_id, cells, ttl_ms)
    }

    fn unlock(&self, owner_id: &str, cells: &[CellId]) -> GridResult<UnlockOutcome> {
        self.coordinator.unlock(owner_id, cells)
    }

    fn finalize(&self, owner_id: &str, cells: &[CellId], payload: &SalePayload) -> GridResult<FinalizeOutcome> {
        self.committer.finalize(owner_id, cells, payload)
    }
}
