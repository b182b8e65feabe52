//! Window-by-window bucketing of the report store.
//!
//! For every window the orchestrator builds each report's signature, resolves
//! it to a bucket, aggregates into buckets that already existed, and flushes
//! all back-references of the window as one batch. The cursor moves past a
//! window only after that batch (and the checkpoint, when enabled) is
//! written, so an interrupted run resumes at the first unflushed window.

use crate::bucketing::aggregator::BucketAggregator;
use crate::bucketing::config::BucketingConfig;
use crate::bucketing::paginator::{Paginator, Window, WindowCursor};
use crate::bucketing::resolver::{BucketResolver, IdAllocator, Resolution};
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::model::{BucketId, ReportId};
use crate::signature::{KeyBuilder, MalformedReport};
use crate::store::{BucketStore, ReportStore};
use roaring::RoaringTreemap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Cooperative cancellation, observed between windows.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What one flushed window did.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowOutcome {
    pub start_after: Option<ReportId>,
    pub last_report_id: Option<ReportId>,
    /// Reports fetched in the window.
    pub fetched: usize,
    /// Reports assigned a bucket in this window.
    pub processed: u64,
    /// Reports that already carried a bucket reference.
    pub already_bucketed: u64,
    pub skipped: Vec<MalformedReport>,
    /// Buckets created in this window.
    pub created: u64,
    /// Distinct buckets the window's reports resolved to.
    pub touched: RoaringTreemap,
    pub attempts: u32,
}

impl WindowOutcome {
    fn new(window: &Window) -> Self {
        Self {
            start_after: window.start_after,
            last_report_id: window.last_report_id(),
            fetched: window.len(),
            processed: 0,
            already_bucketed: 0,
            skipped: Vec::new(),
            created: 0,
            touched: RoaringTreemap::new(),
            attempts: 0,
        }
    }

    fn record(&mut self, resolution: Resolution) {
        self.processed += 1;
        if resolution.is_created() {
            self.created += 1;
        }
        self.touched.insert(resolution.bucket_id);
    }
}

/// Totals over every window flushed by one orchestrator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Reports in the store when the run started.
    pub total_reports: u64,
    pub windows: u64,
    pub processed: u64,
    pub already_bucketed: u64,
    pub skipped: Vec<MalformedReport>,
    pub buckets_created: u64,
    /// Distinct buckets touched, created or reused.
    pub touched: RoaringTreemap,
    pub last_report_id: Option<ReportId>,
    /// The run stopped at a window boundary because it was cancelled.
    pub cancelled: bool,
}

impl RunSummary {
    fn absorb(&mut self, outcome: &WindowOutcome) {
        self.windows += 1;
        self.processed += outcome.processed;
        self.already_bucketed += outcome.already_bucketed;
        self.skipped.extend(outcome.skipped.iter().cloned());
        self.buckets_created += outcome.created;
        self.touched |= &outcome.touched;
        if outcome.last_report_id.is_some() {
            self.last_report_id = outcome.last_report_id;
        }
    }

    pub fn unique_buckets(&self) -> u64 {
        self.touched.len()
    }

    /// Distinct pre-existing buckets that received reports.
    pub fn buckets_reused(&self) -> u64 {
        self.touched.len() - self.buckets_created
    }
}

/// Drives a bucketing run over a report store and a bucket store.
pub struct Orchestrator<'s, R: ReportStore + ?Sized, B: BucketStore + ?Sized> {
    reports: &'s R,
    buckets: &'s B,
    config: BucketingConfig,
    key_builder: KeyBuilder,
    resolver: BucketResolver<'s, B>,
    paginator: Paginator<'s, R>,
    cancel: CancelToken,
    /// Resolutions of the window in flight, kept across retries of that
    /// window so a retry never aggregates the same report twice.
    pending: HashMap<ReportId, Resolution>,
    summary: RunSummary,
    finished: bool,
}

impl<'s, R: ReportStore + ?Sized, B: BucketStore + ?Sized> Orchestrator<'s, R, B> {
    /// Prepares a run: validates `config`, counts the reports, seeds the
    /// bucket id allocator and loads the checkpoint.
    ///
    /// Any failure here is fatal and happens before a window is touched.
    pub fn new(reports: &'s R, buckets: &'s B, config: BucketingConfig) -> Result<Self> {
        config.validate()?;

        let total_reports = reports.count_reports().map_err(Error::Startup)?;
        let allocator = IdAllocator::seeded(buckets, config.first_bucket_id)?;
        let cursor = match &config.checkpoint_name {
            Some(name) => reports
                .load_checkpoint(name)
                .map_err(Error::Startup)?
                .map_or_else(WindowCursor::start, WindowCursor::after),
            None => WindowCursor::start(),
        };

        debug!(
            total_reports,
            next_bucket_id = allocator.peek(),
            resume_after = ?cursor.last_report_id(),
            "bucketing run prepared"
        );

        Ok(Self {
            reports,
            buckets,
            key_builder: KeyBuilder::new().require_complete(config.require_complete_signature),
            resolver: BucketResolver::new(buckets, allocator, Arc::new(SystemClock)),
            paginator: Paginator::new(reports, config.window_size, cursor),
            cancel: CancelToken::new(),
            pending: HashMap::new(),
            summary: RunSummary {
                total_reports,
                ..RunSummary::default()
            },
            finished: false,
            config,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.resolver.set_clock(clock);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Starts from an explicit cursor instead of the stored checkpoint.
    pub fn resume_from(mut self, cursor: WindowCursor) -> Self {
        self.paginator.reset(cursor);
        self
    }

    pub fn cursor(&self) -> WindowCursor {
        self.paginator.cursor()
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Processes windows until the store is exhausted or the run is cancelled.
    pub fn run(&mut self) -> Result<RunSummary> {
        info!(
            total_reports = self.summary.total_reports,
            window_size = self.config.window_size,
            resume_after = ?self.cursor().last_report_id(),
            "bucketing run started"
        );

        while !self.finished {
            if self.cancel.is_cancelled() {
                self.summary.cancelled = true;
                info!(
                    last_report_id = ?self.cursor().last_report_id(),
                    "bucketing run cancelled"
                );
                break;
            }
            self.step()?;
        }

        info!(
            windows = self.summary.windows,
            processed = self.summary.processed,
            created = self.summary.buckets_created,
            reused = self.summary.buckets_reused(),
            already_bucketed = self.summary.already_bucketed,
            skipped = self.summary.skipped.len(),
            "bucketing run finished"
        );
        Ok(self.summary.clone())
    }

    /// Processes exactly one window, retrying it after transient failures.
    ///
    /// Returns `None` when there is nothing left to process.
    pub fn step(&mut self) -> Result<Option<WindowOutcome>> {
        if self.finished {
            return Ok(None);
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.process_window() {
                Ok(Some(mut outcome)) => {
                    outcome.attempts = attempts;
                    self.summary.absorb(&outcome);
                    if self.paginator.is_exhausted() {
                        self.finished = true;
                    }
                    return Ok(Some(outcome));
                }
                Ok(None) => {
                    self.finished = true;
                    return Ok(None);
                }
                Err(err) if err.is_retryable() && attempts <= self.config.max_window_retries => {
                    let backoff = self.config.retry_backoff * attempts;
                    warn!(
                        start_after = ?self.cursor().last_report_id(),
                        attempt = attempts,
                        ?backoff,
                        error = %err,
                        "window failed, retrying"
                    );
                    std::thread::sleep(backoff);
                }
                Err(err) => return Err(self.window_error(err, attempts)),
            }
        }
    }

    fn window_error(&self, err: Error, attempts: u32) -> Error {
        match err {
            Error::Store(source) => Error::Window {
                start_after: self.cursor().last_report_id(),
                limit: self.config.window_size,
                attempts,
                source,
            },
            other => other,
        }
    }

    fn process_window(&mut self) -> Result<Option<WindowOutcome>> {
        let Some(window) = self.paginator.current()? else {
            return Ok(None);
        };

        let aggregator = BucketAggregator::new(self.buckets);
        let mut outcome = WindowOutcome::new(&window);
        let mut references: Vec<(ReportId, BucketId)> = Vec::with_capacity(window.len());

        for report in &window.reports {
            // A retry after a failed checkpoint sees references this run
            // already flushed; they still count as this run's work.
            if let Some(resolution) = self.pending.get(&report.id).copied() {
                match report.bucket_id {
                    None => references.push((report.id, resolution.bucket_id)),
                    Some(bucket_id) if bucket_id == resolution.bucket_id => {}
                    Some(_) => {
                        outcome.already_bucketed += 1;
                        continue;
                    }
                }
                outcome.record(resolution);
                continue;
            }

            if report.bucket_id.is_some() {
                outcome.already_bucketed += 1;
                continue;
            }

            let signature = match self.key_builder.build(report) {
                Ok(signature) => signature,
                Err(malformed) => {
                    warn!(report_id = report.id, field = malformed.field, "skipping malformed report");
                    outcome.skipped.push(malformed);
                    continue;
                }
            };

            let resolution = self.resolver.resolve(&signature)?;
            if !resolution.is_created() {
                aggregator.apply_report(resolution.bucket_id, report.crashed_at)?;
            }
            self.pending.insert(report.id, resolution);

            outcome.record(resolution);
            references.push((report.id, resolution.bucket_id));
        }

        if !references.is_empty() {
            self.reports.set_bucket_references(&references)?;
        }
        if let (Some(name), Some(last)) = (&self.config.checkpoint_name, window.last_report_id()) {
            self.reports.save_checkpoint(name, last)?;
        }

        self.pending.clear();
        self.paginator.advance(&window);

        debug!(
            start_after = ?window.start_after,
            last_report_id = ?outcome.last_report_id,
            fetched = outcome.fetched,
            processed = outcome.processed,
            created = outcome.created,
            "window flushed"
        );
        Ok(Some(outcome))
    }
}
