use std::sync::Mutex;

use crate::error::{GridError, GridResult};
use crate::infrastructure::{CasOutcome, VersionedStore};
use crate::types::{GridSnapshot, Version};

struct Document {
    snapshot: GridSnapshot,
    // 0 = document not written yet
    version: u64,
}

/// Process-local store with a monotonically increasing numeric version.
pub struct InMemoryGridStore {
    doc: Mutex<Document>,
}

impl InMemoryGridStore {
    pub fn new() -> Self {
        Self {
            doc: Mutex::new(Document {
                snapshot: GridSnapshot::new(),
                version: 0,
            }),
        }
    }

    /// Store pre-populated with `snapshot` at version 1
    pub fn with_snapshot(snapshot: GridSnapshot) -> Self {
        Self {
            doc: Mutex::new(Document {
                snapshot,
                version: 1,
            }),
        }
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> u64 {
        self.doc.lock().map(|d| d.version).unwrap_or(0)
    }

    fn version_token(version: u64) -> Version {
        if version == 0 {
            Version::initial()
        } else {
            Version::new(version.to_string())
        }
    }
}

impl Default for InMemoryGridStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionedStore for InMemoryGridStore {
    fn read(&self) -> GridResult<(GridSnapshot, Version)> {
        let doc = self
            .doc
            .lock()
            .map_err(|_| GridError::StoreUnavailable("in-memory store poisoned".into()))?;
        Ok((doc.snapshot.clone(), Self::version_token(doc.version)))
    }

    fn compare_and_swap(&self, snapshot: &GridSnapshot, expected: &Version) -> GridResult<CasOutcome> {
        let mut doc = self
            .doc
            .lock()
            .map_err(|_| GridError::StoreUnavailable("in-memory store poisoned".into()))?;

        if Self::version_token(doc.version) != *expected {
            return Ok(CasOutcome::Conflict);
        }

        doc.snapshot = snapshot.clone();
        doc.version += 1;
        Ok(CasOutcome::Committed(Self::version_token(doc.version)))
    }

    fn describe(&self) -> String {
        "in-memory".to_string()
    }
}
