//! redb-backed report and bucket store.
//!
//! All data lives in one database file:
//!
//! - `reports`: report id → encoded report
//! - `buckets`: bucket id → encoded bucket
//! - `bucket_signatures`: encoded signature → bucket id (unique index)
//! - `bucket_members`: bucket id → bitmap of referencing report ids
//! - `checkpoints`: run name → last processed report id
//!
//! Every mutation runs in a single write transaction. redb admits one writer
//! at a time, which makes `increment_aggregate` and the batched reference
//! update atomic.

use super::{BucketStore, ReportIngest, ReportStore, StoreError, StoreResult};
use crate::encoding::{
    decode_bucket, decode_report, encode_bucket, encode_report, encode_signature_key,
};
use crate::members::MemberSet;
use crate::model::{Bucket, BucketId, NewReport, Report, ReportId};
use crate::signature::Signature;
use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use roaring::RoaringTreemap;
use std::collections::BTreeMap;
use std::path::Path;

const REPORTS: TableDefinition<u64, &[u8]> = TableDefinition::new("reports");
const BUCKETS: TableDefinition<u64, &[u8]> = TableDefinition::new("buckets");
const BUCKET_SIGNATURES: TableDefinition<&[u8], u64> = TableDefinition::new("bucket_signatures");
const BUCKET_MEMBERS: TableDefinition<u64, &[u8]> = TableDefinition::new("bucket_members");
const CHECKPOINTS: TableDefinition<&str, u64> = TableDefinition::new("checkpoints");

impl From<redb::Error> for StoreError {
    fn from(err: redb::Error) -> Self {
        match err {
            redb::Error::Io(io) => StoreError::Transient {
                operation: "io",
                message: io.to_string(),
            },
            other => StoreError::Backend(other.to_string()),
        }
    }
}

macro_rules! redb_error_into_store_error {
    ($($err:ty),* $(,)?) => {
        $(
            impl From<$err> for StoreError {
                fn from(err: $err) -> Self {
                    redb::Error::from(err).into()
                }
            }
        )*
    };
}

redb_error_into_store_error!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

/// Report and bucket store on top of a redb database.
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Creates or opens the database at `path` and makes sure every table exists.
    pub fn create(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db = Database::create(path)?;
        Self::from_database(db)
    }

    /// Wraps an already opened database.
    pub fn from_database(db: Database) -> StoreResult<Self> {
        let write_txn = db.begin_write()?;
        {
            write_txn.open_table(REPORTS)?;
            write_txn.open_table(BUCKETS)?;
            write_txn.open_table(BUCKET_SIGNATURES)?;
            write_txn.open_table(BUCKET_MEMBERS)?;
            write_txn.open_table(CHECKPOINTS)?;
        }
        write_txn.commit()?;
        Ok(Self { db })
    }

    /// Returns the underlying database.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Report ids currently referencing `bucket_id`.
    pub fn bucket_members(&self, bucket_id: BucketId) -> StoreResult<RoaringTreemap> {
        let read_txn = self.db.begin_read()?;
        let members = read_txn.open_table(BUCKET_MEMBERS)?;
        let bitmap = match members.get(bucket_id)? {
            Some(guard) => MemberSet::decode(guard.value())?.into_bitmap(),
            None => RoaringTreemap::new(),
        };
        Ok(bitmap)
    }

    /// Number of buckets in the store.
    pub fn bucket_count(&self) -> StoreResult<u64> {
        let read_txn = self.db.begin_read()?;
        let buckets = read_txn.open_table(BUCKETS)?;
        Ok(buckets.len()?)
    }

    /// All buckets in id order.
    pub fn buckets(&self) -> StoreResult<Vec<Bucket>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(BUCKETS)?;
        let mut buckets = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            buckets.push(decode_bucket(key.value(), value.value())?);
        }
        Ok(buckets)
    }
}

impl ReportStore for RedbStore {
    fn count_reports(&self) -> StoreResult<u64> {
        let read_txn = self.db.begin_read()?;
        let reports = read_txn.open_table(REPORTS)?;
        Ok(reports.len()?)
    }

    fn fetch_window(
        &self,
        start_after: Option<ReportId>,
        limit: usize,
    ) -> StoreResult<Vec<Report>> {
        let start = match start_after {
            None => 0,
            Some(id) => match id.checked_add(1) {
                Some(next) => next,
                None => return Ok(Vec::new()),
            },
        };

        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(REPORTS)?;
        let mut window = Vec::with_capacity(limit.min(4096));
        for entry in table.range(start..)?.take(limit) {
            let (key, value) = entry?;
            window.push(decode_report(key.value(), value.value())?);
        }
        Ok(window)
    }

    fn set_bucket_references(&self, references: &[(ReportId, BucketId)]) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut reports = write_txn.open_table(REPORTS)?;
            let buckets = write_txn.open_table(BUCKETS)?;
            let mut members = write_txn.open_table(BUCKET_MEMBERS)?;

            let mut new_members: BTreeMap<BucketId, Vec<ReportId>> = BTreeMap::new();
            for &(report_id, bucket_id) in references {
                let mut report = match reports.get(report_id)? {
                    Some(guard) => decode_report(report_id, guard.value())?,
                    None => return Err(StoreError::ReportNotFound(report_id)),
                };

                match report.bucket_id {
                    Some(existing) if existing == bucket_id => continue,
                    Some(existing) => {
                        return Err(StoreError::ReferenceMismatch {
                            report_id,
                            existing,
                            requested: bucket_id,
                        })
                    }
                    None => {}
                }

                if !new_members.contains_key(&bucket_id) && buckets.get(bucket_id)?.is_none() {
                    return Err(StoreError::BucketNotFound(bucket_id));
                }

                report.bucket_id = Some(bucket_id);
                let encoded = encode_report(&report)?;
                reports.insert(report_id, encoded.as_slice())?;
                new_members.entry(bucket_id).or_default().push(report_id);
            }

            for (bucket_id, report_ids) in new_members {
                let mut set = match members.get(bucket_id)? {
                    Some(guard) => MemberSet::decode(guard.value())?,
                    None => MemberSet::new(),
                };
                for report_id in report_ids {
                    set.insert(report_id);
                }
                let encoded = set.encode()?;
                members.insert(bucket_id, encoded.as_slice())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    fn get_report(&self, id: ReportId) -> StoreResult<Option<Report>> {
        let read_txn = self.db.begin_read()?;
        let reports = read_txn.open_table(REPORTS)?;
        match reports.get(id)? {
            Some(guard) => Ok(Some(decode_report(id, guard.value())?)),
            None => Ok(None),
        }
    }

    fn load_checkpoint(&self, name: &str) -> StoreResult<Option<ReportId>> {
        let read_txn = self.db.begin_read()?;
        let checkpoints = read_txn.open_table(CHECKPOINTS)?;
        let last_report_id = checkpoints.get(name)?.map(|guard| guard.value());
        Ok(last_report_id)
    }

    fn save_checkpoint(&self, name: &str, last_report_id: ReportId) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut checkpoints = write_txn.open_table(CHECKPOINTS)?;
            checkpoints.insert(name, last_report_id)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

impl BucketStore for RedbStore {
    fn find_by_signature(&self, signature: &Signature) -> StoreResult<Option<Bucket>> {
        let key = encode_signature_key(signature)?;
        let read_txn = self.db.begin_read()?;
        let signatures = read_txn.open_table(BUCKET_SIGNATURES)?;
        let Some(bucket_id) = signatures.get(key.as_slice())?.map(|guard| guard.value()) else {
            return Ok(None);
        };

        let buckets = read_txn.open_table(BUCKETS)?;
        let bucket = match buckets.get(bucket_id)? {
            Some(guard) => decode_bucket(bucket_id, guard.value())?,
            None => {
                return Err(StoreError::Backend(format!(
                    "signature index points at missing bucket {}",
                    bucket_id
                )))
            }
        };

        if bucket.signature != *signature {
            return Err(StoreError::Backend(format!(
                "signature index for bucket {} does not match its record",
                bucket_id
            )));
        }
        Ok(Some(bucket))
    }

    fn insert(&self, bucket: &Bucket) -> StoreResult<()> {
        let key = encode_signature_key(&bucket.signature)?;
        let encoded = encode_bucket(bucket)?;

        let write_txn = self.db.begin_write()?;
        {
            let mut signatures = write_txn.open_table(BUCKET_SIGNATURES)?;
            let mut buckets = write_txn.open_table(BUCKETS)?;

            if signatures.get(key.as_slice())?.is_some() {
                return Err(StoreError::Conflict(bucket.signature.clone()));
            }
            if buckets.get(bucket.id)?.is_some() {
                return Err(StoreError::BucketIdTaken(bucket.id));
            }

            signatures.insert(key.as_slice(), bucket.id)?;
            buckets.insert(bucket.id, encoded.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn increment_aggregate(&self, id: BucketId, crashed_at: DateTime<Utc>) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut buckets = write_txn.open_table(BUCKETS)?;
            let mut bucket = match buckets.get(id)? {
                Some(guard) => decode_bucket(id, guard.value())?,
                None => return Err(StoreError::BucketNotFound(id)),
            };
            bucket.absorb(crashed_at);
            let encoded = encode_bucket(&bucket)?;
            buckets.insert(id, encoded.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn max_bucket_id(&self) -> StoreResult<Option<BucketId>> {
        let read_txn = self.db.begin_read()?;
        let buckets = read_txn.open_table(BUCKETS)?;
        let max = buckets.last()?.map(|(key, _)| key.value());
        Ok(max)
    }

    fn get_bucket(&self, id: BucketId) -> StoreResult<Option<Bucket>> {
        let read_txn = self.db.begin_read()?;
        let buckets = read_txn.open_table(BUCKETS)?;
        match buckets.get(id)? {
            Some(guard) => Ok(Some(decode_bucket(id, guard.value())?)),
            None => Ok(None),
        }
    }
}

impl ReportIngest for RedbStore {
    fn ingest(&self, reports: Vec<NewReport>) -> StoreResult<Vec<ReportId>> {
        let write_txn = self.db.begin_write()?;
        let mut ids = Vec::with_capacity(reports.len());
        {
            let mut table = write_txn.open_table(REPORTS)?;
            let mut next_id = table.last()?.map_or(1, |(key, _)| key.value() + 1);
            for new_report in reports {
                let report = new_report.into_report(next_id);
                let encoded = encode_report(&report)?;
                table.insert(next_id, encoded.as_slice())?;
                ids.push(next_id);
                next_id += 1;
            }
        }
        write_txn.commit()?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    fn new_report(product: &str, offset: i64) -> NewReport {
        NewReport::new(product, "2024.2", "5", format!("{}Core", product), offset, at(offset))
    }

    #[test]
    fn test_ingest_and_fetch_window() -> Result<(), Box<dyn std::error::Error>> {
        let temp_file = NamedTempFile::new()?;
        let store = RedbStore::create(temp_file.path())?;

        let ids = store.ingest((0..5).map(|i| new_report("Photoshop", i)).collect())?;
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(store.count_reports()?, 5);

        let window = store.fetch_window(Some(2), 2)?;
        let window_ids: Vec<_> = window.iter().map(|r| r.id).collect();
        assert_eq!(window_ids, vec![3, 4]);
        assert_eq!(window[0].offset, 2);
        assert!(store.fetch_window(Some(u64::MAX), 10)?.is_empty());

        Ok(())
    }

    #[test]
    fn test_signature_index_enforces_uniqueness() -> Result<(), Box<dyn std::error::Error>> {
        let temp_file = NamedTempFile::new()?;
        let store = RedbStore::create(temp_file.path())?;
        let signature = Signature::new("Lightroom", "2024.3", "2", "LightroomCore", 2048);

        store.insert(&Bucket::first_occurrence(10_000, signature.clone(), at(1)))?;
        let conflict = store.insert(&Bucket::first_occurrence(10_001, signature.clone(), at(1)));
        assert!(matches!(conflict, Err(StoreError::Conflict(_))));

        let found = store.find_by_signature(&signature)?.unwrap();
        assert_eq!(found.id, 10_000);
        assert_eq!(store.bucket_count()?, 1);
        assert_eq!(store.max_bucket_id()?, Some(10_000));

        let other = Signature::new("Lightroom", "2024.3", "2", "LightroomCore", 3072);
        assert!(store.find_by_signature(&other)?.is_none());

        Ok(())
    }

    #[test]
    fn test_increment_aggregate() -> Result<(), Box<dyn std::error::Error>> {
        let temp_file = NamedTempFile::new()?;
        let store = RedbStore::create(temp_file.path())?;
        let signature = Signature::new("InDesign", "2024.7", "9", "InDesignCore", 1024);
        store.insert(&Bucket::first_occurrence(7, signature, at(100)))?;

        store.increment_aggregate(7, at(300))?;
        store.increment_aggregate(7, at(200))?;

        let bucket = store.get_bucket(7)?.unwrap();
        assert_eq!(bucket.crash_count, 3);
        assert_eq!(bucket.unique_steps_count, 3);
        assert_eq!(bucket.last_crash_at, at(300));
        assert_eq!(bucket.created_at, at(100));

        assert!(matches!(
            store.increment_aggregate(8, at(0)),
            Err(StoreError::BucketNotFound(8))
        ));

        Ok(())
    }

    #[test]
    fn test_references_update_members() -> Result<(), Box<dyn std::error::Error>> {
        let temp_file = NamedTempFile::new()?;
        let store = RedbStore::create(temp_file.path())?;
        store.ingest((0..3).map(|i| new_report("XD", i)).collect())?;
        let signature = Signature::new("XD", "2024.2", "5", "XDCore", 0);
        store.insert(&Bucket::first_occurrence(10_000, signature, at(0)))?;

        store.set_bucket_references(&[(1, 10_000), (3, 10_000)])?;
        store.set_bucket_references(&[(1, 10_000)])?;

        let members = store.bucket_members(10_000)?;
        assert_eq!(members.iter().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(store.get_report(1)?.unwrap().bucket_id, Some(10_000));
        assert_eq!(store.get_report(2)?.unwrap().bucket_id, None);

        Ok(())
    }

    #[test]
    fn test_failed_reference_batch_is_rolled_back() -> Result<(), Box<dyn std::error::Error>> {
        let temp_file = NamedTempFile::new()?;
        let store = RedbStore::create(temp_file.path())?;
        store.ingest((0..2).map(|i| new_report("XD", i)).collect())?;
        let signature = Signature::new("XD", "2024.2", "5", "XDCore", 0);
        store.insert(&Bucket::first_occurrence(10_000, signature, at(0)))?;

        let result = store.set_bucket_references(&[(1, 10_000), (2, 99)]);
        assert!(matches!(result, Err(StoreError::BucketNotFound(99))));

        assert_eq!(store.get_report(1)?.unwrap().bucket_id, None);
        assert!(store.bucket_members(10_000)?.is_empty());

        Ok(())
    }

    #[test]
    fn test_max_bucket_id() -> Result<(), Box<dyn std::error::Error>> {
        let temp_file = NamedTempFile::new()?;
        let store = RedbStore::create(temp_file.path())?;
        assert_eq!(store.max_bucket_id()?, None);

        for (id, offset) in [(10_003, 0), (10_000, 1024), (10_001, 2048)] {
            let signature = Signature::new("Animate", "2024.1", "3", "AnimateCore", offset);
            store.insert(&Bucket::first_occurrence(id, signature, at(0)))?;
        }
        assert_eq!(store.max_bucket_id()?, Some(10_003));

        Ok(())
    }

    #[test]
    fn test_corrupt_members_are_reported() -> Result<(), Box<dyn std::error::Error>> {
        let temp_file = NamedTempFile::new()?;
        let store = RedbStore::create(temp_file.path())?;
        store.ingest((0..2).map(|i| new_report("XD", i)).collect())?;
        let signature = Signature::new("XD", "2024.2", "5", "XDCore", 0);
        store.insert(&Bucket::first_occurrence(10_000, signature, at(0)))?;
        store.set_bucket_references(&[(1, 10_000)])?;

        let write_txn = store.database().begin_write()?;
        {
            let mut members = write_txn.open_table(BUCKET_MEMBERS)?;
            members.insert(10_000u64, [99u8, 1, 2, 3].as_slice())?;
        }
        write_txn.commit()?;

        assert!(matches!(
            store.bucket_members(10_000),
            Err(StoreError::Corrupt(_))
        ));
        assert!(matches!(
            store.set_bucket_references(&[(2, 10_000)]),
            Err(StoreError::Corrupt(_))
        ));
        assert_eq!(store.get_report(2)?.unwrap().bucket_id, None);

        Ok(())
    }

    #[test]
    fn test_checkpoints_survive_reopen() -> Result<(), Box<dyn std::error::Error>> {
        let temp_file = NamedTempFile::new()?;
        {
            let store = RedbStore::create(temp_file.path())?;
            assert_eq!(store.load_checkpoint("bucketing")?, None);
            store.save_checkpoint("bucketing", 100)?;
        }

        let store = RedbStore::create(temp_file.path())?;
        assert_eq!(store.load_checkpoint("bucketing")?, Some(100));
        assert_eq!(store.load_checkpoint("other")?, None);

        Ok(())
    }
}
