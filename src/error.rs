//! Crate-scoped error handling for crash-buckets.
//!
//! Store implementations report [`StoreError`]; the bucketing layer wraps it in
//! [`Error`] together with the context a caller needs to resume a run.

use crate::model::{BucketId, ReportId};
use crate::store::StoreError;

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type exposed to users of the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid bucketing configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The stores could not be queried before the first window; nothing was
    /// processed.
    #[error("bucketing could not start: {0}")]
    Startup(#[source] StoreError),

    /// The bucket id allocator ran past `u64::MAX`.
    #[error("bucket id space exhausted after {last}")]
    IdSpaceExhausted { last: BucketId },

    /// A window failed for good. The cursor still points before the window,
    /// so a later run resumes from `start_after`.
    #[error(
        "window after report {start_after:?} (limit {limit}) failed after {attempts} attempt(s): {source}"
    )]
    Window {
        start_after: Option<ReportId>,
        limit: usize,
        attempts: u32,
        #[source]
        source: StoreError,
    },

    /// Errors from a store operation
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Error {
    /// Whether the failed operation may succeed if retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Store(err) => err.is_retryable(),
            _ => false,
        }
    }
}
