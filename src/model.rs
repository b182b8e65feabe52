//! Report and bucket records.
//!
//! Timestamps are carried as `DateTime<Utc>` at millisecond precision, the
//! precision both stores persist. Constructors here truncate finer values.

use crate::signature::Signature;
use chrono::{DateTime, SubsecRound, Utc};

/// Identifier of an ingested crash report.
pub type ReportId = u64;

/// Surrogate identifier of a bucket.
pub type BucketId = u64;

/// A single crash event.
///
/// Everything except `bucket_id` is fixed at ingestion. The bucket reference
/// is written once by the bucketing run and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub id: ReportId,
    pub product: String,
    pub version: String,
    pub build: String,
    pub module: String,
    pub offset: i64,
    /// Millisecond precision; the redb store drops anything finer.
    pub crashed_at: DateTime<Utc>,
    pub bucket_id: Option<BucketId>,
}

/// A report submitted for ingestion, before the store assigns its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReport {
    pub product: String,
    pub version: String,
    pub build: String,
    pub module: String,
    pub offset: i64,
    pub crashed_at: DateTime<Utc>,
}

impl NewReport {
    pub fn new(
        product: impl Into<String>,
        version: impl Into<String>,
        build: impl Into<String>,
        module: impl Into<String>,
        offset: i64,
        crashed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            product: product.into(),
            version: version.into(),
            build: build.into(),
            module: module.into(),
            offset,
            crashed_at: crashed_at.trunc_subsecs(3),
        }
    }

    /// Turns the submission into a stored, not yet bucketed, report.
    pub fn into_report(self, id: ReportId) -> Report {
        Report {
            id,
            product: self.product,
            version: self.version,
            build: self.build,
            module: self.module,
            offset: self.offset,
            crashed_at: self.crashed_at,
            bucket_id: None,
        }
    }
}

/// An aggregate cluster of reports sharing one signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub id: BucketId,
    pub signature: Signature,
    pub crash_count: u64,
    pub unique_steps_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_crash_at: DateTime<Utc>,
}

impl Bucket {
    /// Creates the record for the first report seen with `signature`.
    pub fn first_occurrence(id: BucketId, signature: Signature, now: DateTime<Utc>) -> Self {
        let now = now.trunc_subsecs(3);
        Self {
            id,
            signature,
            crash_count: 1,
            unique_steps_count: 1,
            created_at: now,
            last_crash_at: now,
        }
    }

    /// Folds one more report into the aggregate fields.
    ///
    /// The last-crash timestamp only ever moves forward.
    pub fn absorb(&mut self, crashed_at: DateTime<Utc>) {
        self.crash_count += 1;
        self.unique_steps_count += 1;
        let crashed_at = crashed_at.trunc_subsecs(3);
        if crashed_at > self.last_crash_at {
            self.last_crash_at = crashed_at;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    #[test]
    fn test_first_occurrence() {
        let signature = Signature::new("Photoshop", "2024.3", "7", "PhotoshopCore", 4096);
        let bucket = Bucket::first_occurrence(10_000, signature.clone(), at(1_000));

        assert_eq!(bucket.crash_count, 1);
        assert_eq!(bucket.unique_steps_count, 1);
        assert_eq!(bucket.created_at, at(1_000));
        assert_eq!(bucket.last_crash_at, at(1_000));
        assert_eq!(bucket.signature, signature);
    }

    #[test]
    fn test_absorb_never_moves_last_crash_backwards() {
        let signature = Signature::new("XD", "2024.1", "1", "XDCore", 1024);
        let mut bucket = Bucket::first_occurrence(1, signature, at(5_000));

        bucket.absorb(at(9_000));
        assert_eq!(bucket.last_crash_at, at(9_000));

        bucket.absorb(at(2_000));
        assert_eq!(bucket.last_crash_at, at(9_000));
        assert_eq!(bucket.crash_count, 3);
        assert_eq!(bucket.unique_steps_count, 3);
        assert_eq!(bucket.created_at, at(5_000));
    }

    #[test]
    fn test_new_report_starts_unbucketed() {
        let report = NewReport::new("Animate", "2024.2", "3", "AnimateCore", 2048, at(7)).into_report(42);

        assert_eq!(report.id, 42);
        assert_eq!(report.bucket_id, None);
        assert_eq!(report.crashed_at, at(7));
    }

    #[test]
    fn test_timestamps_truncated_to_millis() {
        let precise = at(1_234) + chrono::Duration::microseconds(567);

        let report = NewReport::new("Bridge", "2024.1", "1", "BridgeCore", 0, precise);
        assert_eq!(report.crashed_at, at(1_234));

        let signature = Signature::new("Bridge", "2024.1", "1", "BridgeCore", 0);
        let mut bucket = Bucket::first_occurrence(1, signature, precise);
        assert_eq!(bucket.created_at, at(1_234));

        bucket.absorb(at(2_000) + chrono::Duration::microseconds(999));
        assert_eq!(bucket.last_crash_at, at(2_000));
    }
}
