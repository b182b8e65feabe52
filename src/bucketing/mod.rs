//! The bucketing pipeline: windows of reports in, bucket references out.

pub mod aggregator;
pub mod config;
pub mod orchestrator;
pub mod paginator;
pub mod resolver;

pub use aggregator::BucketAggregator;
pub use config::BucketingConfig;
pub use orchestrator::{CancelToken, Orchestrator, RunSummary, WindowOutcome};
pub use paginator::{Paginator, Window, WindowCursor};
pub use resolver::{BucketResolver, IdAllocator, Resolution, ResolutionKind};
