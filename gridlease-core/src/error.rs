use std::time::Duration;

use thiserror::Error;

/// Every failure a grid operation can surface.
///
/// Business conflicts (cell already sold or locked by someone else) are not
/// errors: they come back as `conflicted` / `taken` lists in the outcome.
/// Version conflicts are retried internally and only show up as
/// [`GridError::Contention`] once the retry budget is spent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    /// Request rejected before any store access
    #[error("validation failed: {0}")]
    Validation(String),

    /// The backing store could not be reached or answered with an error
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A store call exceeded its timeout; the write may or may not have landed
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    /// Every compare-and-swap attempt lost against a concurrent writer
    #[error("gave up after {attempts} conflicting compare-and-swap attempts")]
    Contention { attempts: u32 },

    /// The stored document does not match the expected schema
    #[error("malformed grid document: {0}")]
    MalformedDocument(String),

    #[error("unknown region '{0}'")]
    UnknownRegion(String),
}

impl GridError {
    /// Whether the caller should prompt the user to try again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GridError::StoreUnavailable(_) | GridError::Timeout(_) | GridError::Contention { .. }
        )
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        GridError::Validation(msg.into())
    }
}

pub type GridResult<T> = Result<T, GridError>;
