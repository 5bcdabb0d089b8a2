use crate::error::GridResult;
use crate::types::{GridSnapshot, Version};

/// Result of a compare-and-swap write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The write landed; the store now holds this version
    Committed(Version),
    /// The store moved past the expected version; nothing was written
    Conflict,
}

/// Defines the contract for grid document backends.
///
/// The store only knows whole documents. All coordination happens through
/// `compare_and_swap`, which must be atomic with respect to other writers.
/// Implementations bound every call with a timeout and report it as
/// `GridError::Timeout` / `GridError::StoreUnavailable`, never as success.
pub trait VersionedStore: Send + Sync {
    /// Latest known document and its version
    fn read(&self) -> GridResult<(GridSnapshot, Version)>;

    /// Replace the document iff the current version equals `expected`
    fn compare_and_swap(&self, snapshot: &GridSnapshot, expected: &Version) -> GridResult<CasOutcome>;

    /// Short human-readable backend description for logs
    fn describe(&self) -> String;
}

impl<S: VersionedStore + ?Sized> VersionedStore for std::sync::Arc<S> {
    fn read(&self) -> GridResult<(GridSnapshot, Version)> {
        (**self).read()
    }

    fn compare_and_swap(&self, snapshot: &GridSnapshot, expected: &Version) -> GridResult<CasOutcome> {
        (**self).compare_and_swap(snapshot, expected)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

impl<S: VersionedStore + ?Sized> VersionedStore for Box<S> {
    fn read(&self) -> GridResult<(GridSnapshot, Version)> {
        (**self).read()
    }

    fn compare_and_swap(&self, snapshot: &GridSnapshot, expected: &Version) -> GridResult<CasOutcome> {
        (**self).compare_and_swap(snapshot, expected)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
