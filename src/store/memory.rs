//! In-process store.
//!
//! Keeps reports, buckets and checkpoints in `Mutex`-guarded maps with the
//! same semantics as the redb store, and counts the operations it serves so
//! callers can observe store traffic.

use super::{BucketStore, ReportIngest, ReportStore, StoreError, StoreResult};
use crate::model::{Bucket, BucketId, NewReport, Report, ReportId};
use crate::signature::Signature;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

/// Operation counters of a [`MemoryStore`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// `count_reports` calls.
    pub counts: u64,
    /// Every other read: windows, lookups, checkpoint loads.
    pub reads: u64,
    /// Every mutation: inserts, increments, references, checkpoints, ingests.
    pub writes: u64,
}

#[derive(Debug, Default)]
struct MemoryState {
    reports: BTreeMap<ReportId, Report>,
    buckets: BTreeMap<BucketId, Bucket>,
    signatures: HashMap<Signature, BucketId>,
    checkpoints: HashMap<String, ReportId>,
    stats: StoreStats,
}

/// In-memory report and bucket store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Snapshot of the operation counters.
    pub fn stats(&self) -> StoreStats {
        self.lock().stats
    }

    pub fn reset_stats(&self) {
        self.lock().stats = StoreStats::default();
    }

    /// All buckets in id order.
    pub fn buckets(&self) -> Vec<Bucket> {
        self.lock().buckets.values().cloned().collect()
    }

    /// All reports in id order.
    pub fn reports(&self) -> Vec<Report> {
        self.lock().reports.values().cloned().collect()
    }
}

impl ReportStore for MemoryStore {
    fn count_reports(&self) -> StoreResult<u64> {
        let mut state = self.lock();
        state.stats.counts += 1;
        Ok(state.reports.len() as u64)
    }

    fn fetch_window(
        &self,
        start_after: Option<ReportId>,
        limit: usize,
    ) -> StoreResult<Vec<Report>> {
        let mut state = self.lock();
        state.stats.reads += 1;

        let window = match start_after {
            Some(id) => state
                .reports
                .range((std::ops::Bound::Excluded(id), std::ops::Bound::Unbounded))
                .take(limit)
                .map(|(_, report)| report.clone())
                .collect(),
            None => state
                .reports
                .values()
                .take(limit)
                .cloned()
                .collect(),
        };
        Ok(window)
    }

    fn set_bucket_references(&self, references: &[(ReportId, BucketId)]) -> StoreResult<()> {
        let mut state = self.lock();
        state.stats.writes += 1;

        // Validate the whole batch before applying any of it.
        for &(report_id, bucket_id) in references {
            if !state.buckets.contains_key(&bucket_id) {
                return Err(StoreError::BucketNotFound(bucket_id));
            }
            let report = state
                .reports
                .get(&report_id)
                .ok_or(StoreError::ReportNotFound(report_id))?;
            if let Some(existing) = report.bucket_id {
                if existing != bucket_id {
                    return Err(StoreError::ReferenceMismatch {
                        report_id,
                        existing,
                        requested: bucket_id,
                    });
                }
            }
        }

        for &(report_id, bucket_id) in references {
            if let Some(report) = state.reports.get_mut(&report_id) {
                report.bucket_id = Some(bucket_id);
            }
        }
        Ok(())
    }

    fn get_report(&self, id: ReportId) -> StoreResult<Option<Report>> {
        let mut state = self.lock();
        state.stats.reads += 1;
        Ok(state.reports.get(&id).cloned())
    }

    fn load_checkpoint(&self, name: &str) -> StoreResult<Option<ReportId>> {
        let mut state = self.lock();
        state.stats.reads += 1;
        Ok(state.checkpoints.get(name).copied())
    }

    fn save_checkpoint(&self, name: &str, last_report_id: ReportId) -> StoreResult<()> {
        let mut state = self.lock();
        state.stats.writes += 1;
        state.checkpoints.insert(name.to_string(), last_report_id);
        Ok(())
    }
}

impl BucketStore for MemoryStore {
    fn find_by_signature(&self, signature: &Signature) -> StoreResult<Option<Bucket>> {
        let mut state = self.lock();
        state.stats.reads += 1;
        let bucket = state
            .signatures
            .get(signature)
            .and_then(|id| state.buckets.get(id))
            .cloned();
        Ok(bucket)
    }

    fn insert(&self, bucket: &Bucket) -> StoreResult<()> {
        let mut state = self.lock();
        state.stats.writes += 1;

        if state.signatures.contains_key(&bucket.signature) {
            return Err(StoreError::Conflict(bucket.signature.clone()));
        }
        if state.buckets.contains_key(&bucket.id) {
            return Err(StoreError::BucketIdTaken(bucket.id));
        }

        state.signatures.insert(bucket.signature.clone(), bucket.id);
        state.buckets.insert(bucket.id, bucket.clone());
        Ok(())
    }

    fn increment_aggregate(&self, id: BucketId, crashed_at: DateTime<Utc>) -> StoreResult<()> {
        let mut state = self.lock();
        state.stats.writes += 1;
        let bucket = state
            .buckets
            .get_mut(&id)
            .ok_or(StoreError::BucketNotFound(id))?;
        bucket.absorb(crashed_at);
        Ok(())
    }

    fn max_bucket_id(&self) -> StoreResult<Option<BucketId>> {
        let mut state = self.lock();
        state.stats.reads += 1;
        Ok(state.buckets.keys().next_back().copied())
    }

    fn get_bucket(&self, id: BucketId) -> StoreResult<Option<Bucket>> {
        let mut state = self.lock();
        state.stats.reads += 1;
        Ok(state.buckets.get(&id).cloned())
    }
}

impl ReportIngest for MemoryStore {
    fn ingest(&self, reports: Vec<NewReport>) -> StoreResult<Vec<ReportId>> {
        let mut state = self.lock();
        state.stats.writes += 1;

        let mut next_id = state.reports.keys().next_back().map_or(1, |id| id + 1);
        let mut ids = Vec::with_capacity(reports.len());
        for report in reports {
            state.reports.insert(next_id, report.into_report(next_id));
            ids.push(next_id);
            next_id += 1;
        }
        Ok(ids)
    }
}
