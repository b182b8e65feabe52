//! Incremental bucket statistics.

use crate::model::BucketId;
use crate::store::{BucketStore, StoreResult};
use chrono::{DateTime, Utc};
use tracing::trace;

/// Folds reports into buckets that already existed.
///
/// Each call is a single atomic store operation, never a read followed by a
/// write, so concurrent aggregators cannot lose updates.
pub struct BucketAggregator<'s, B: BucketStore + ?Sized> {
    store: &'s B,
}

impl<'s, B: BucketStore + ?Sized> BucketAggregator<'s, B> {
    pub fn new(store: &'s B) -> Self {
        Self { store }
    }

    /// Counts one more report against `bucket_id`.
    pub fn apply_report(&self, bucket_id: BucketId, crashed_at: DateTime<Utc>) -> StoreResult<()> {
        trace!(bucket_id, %crashed_at, "aggregating report");
        self.store.increment_aggregate(bucket_id, crashed_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Bucket;
    use crate::signature::Signature;
    use crate::store::{MemoryStore, StoreError};

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    #[test]
    fn test_last_crash_is_monotonic() {
        let store = MemoryStore::new();
        let signature = Signature::new("Dreamweaver", "2024.8", "2", "DreamweaverCore", 6144);
        store
            .insert(&Bucket::first_occurrence(10_000, signature, at(500)))
            .unwrap();
        let aggregator = BucketAggregator::new(&store);

        let mut previous = at(500);
        for millis in [900, 100, 700, 1_200, 1_100] {
            aggregator.apply_report(10_000, at(millis)).unwrap();
            let bucket = store.get_bucket(10_000).unwrap().unwrap();
            assert!(bucket.last_crash_at >= previous);
            previous = bucket.last_crash_at;
        }

        let bucket = store.get_bucket(10_000).unwrap().unwrap();
        assert_eq!(bucket.last_crash_at, at(1_200));
        assert_eq!(bucket.crash_count, 6);
        assert_eq!(bucket.unique_steps_count, 6);
    }

    #[test]
    fn test_unknown_bucket() {
        let store = MemoryStore::new();
        let aggregator = BucketAggregator::new(&store);

        assert!(matches!(
            aggregator.apply_report(1, at(0)),
            Err(StoreError::BucketNotFound(1))
        ));
    }
}
