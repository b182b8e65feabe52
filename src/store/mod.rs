//! Report and bucket store contracts.
//!
//! The bucketing core reaches persistence only through [`ReportStore`] and
//! [`BucketStore`]. Two implementations ship with the crate: [`RedbStore`], an
//! embedded redb database, and [`MemoryStore`], an in-process store used for
//! tests and small workloads.

use crate::encoding::EncodingError;
use crate::model::{Bucket, BucketId, NewReport, Report, ReportId};
use crate::signature::Signature;
use chrono::{DateTime, Utc};

pub mod embedded;
pub mod memory;

pub use embedded::RedbStore;
pub use memory::{MemoryStore, StoreStats};

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by store implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Timeout or lost connection; the operation may succeed if retried.
    #[error("store operation `{operation}` failed transiently: {message}")]
    Transient {
        operation: &'static str,
        message: String,
    },

    /// A bucket with this signature already exists.
    #[error("a bucket already exists for signature {0}")]
    Conflict(Signature),

    /// The bucket id handed to `insert` is already in use.
    #[error("bucket id {0} is already taken")]
    BucketIdTaken(BucketId),

    #[error("bucket {0} not found")]
    BucketNotFound(BucketId),

    #[error("report {0} not found")]
    ReportNotFound(ReportId),

    /// Refused attempt to change a report's bucket reference.
    #[error("report {report_id} already references bucket {existing}, refusing {requested}")]
    ReferenceMismatch {
        report_id: ReportId,
        existing: BucketId,
        requested: BucketId,
    },

    /// A stored record could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(#[from] EncodingError),

    /// Non-retryable failure of the underlying storage engine.
    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transient { .. })
    }
}

/// Read/write access to the report collection.
pub trait ReportStore: Send + Sync {
    fn count_reports(&self) -> StoreResult<u64>;

    /// Returns up to `limit` reports with ids strictly greater than
    /// `start_after` (all ids when `None`), in ascending id order.
    fn fetch_window(&self, start_after: Option<ReportId>, limit: usize)
        -> StoreResult<Vec<Report>>;

    /// Applies a batch of report → bucket back-references atomically.
    ///
    /// Writing the value a report already holds is a no-op; changing an
    /// existing reference fails with [`StoreError::ReferenceMismatch`].
    fn set_bucket_references(&self, references: &[(ReportId, BucketId)]) -> StoreResult<()>;

    fn get_report(&self, id: ReportId) -> StoreResult<Option<Report>>;

    /// Last report id recorded for the named bucketing run.
    fn load_checkpoint(&self, name: &str) -> StoreResult<Option<ReportId>>;

    fn save_checkpoint(&self, name: &str, last_report_id: ReportId) -> StoreResult<()>;
}

/// Read/write access to buckets.
pub trait BucketStore: Send + Sync {
    /// Exact match on all five signature fields.
    fn find_by_signature(&self, signature: &Signature) -> StoreResult<Option<Bucket>>;

    /// Persists a new bucket; fails with [`StoreError::Conflict`] when the
    /// signature is already present.
    fn insert(&self, bucket: &Bucket) -> StoreResult<()>;

    /// Atomically bumps crash and unique-step counts by one and raises the
    /// last-crash timestamp to `crashed_at` if it is later.
    fn increment_aggregate(&self, id: BucketId, crashed_at: DateTime<Utc>) -> StoreResult<()>;

    fn max_bucket_id(&self) -> StoreResult<Option<BucketId>>;

    fn get_bucket(&self, id: BucketId) -> StoreResult<Option<Bucket>>;
}

/// Batch ingestion of new reports.
pub trait ReportIngest {
    /// Appends `reports` in order, assigning ids that continue from the
    /// current maximum (starting at 1), and returns the assigned ids.
    fn ingest(&self, reports: Vec<NewReport>) -> StoreResult<Vec<ReportId>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_errors_are_retryable() {
        let transient = StoreError::Transient {
            operation: "fetch_window",
            message: "timed out".to_string(),
        };
        assert!(transient.is_retryable());

        assert!(!StoreError::Conflict(Signature::new("a", "b", "c", "d", 0)).is_retryable());
        assert!(!StoreError::Backend("disk full".to_string()).is_retryable());
        assert!(!StoreError::BucketNotFound(3).is_retryable());
    }
}
