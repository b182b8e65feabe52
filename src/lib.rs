pub mod bucketing;
pub mod clock;
pub mod encoding;
pub mod error;
pub mod members;
pub mod model;
pub mod signature;
pub mod store;

// Re-export common types for convenience
pub use bucketing::{BucketingConfig, CancelToken, Orchestrator, RunSummary, WindowCursor};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{Error, Result};
pub use model::{Bucket, BucketId, NewReport, Report, ReportId};
pub use signature::{build_signature, KeyBuilder, MalformedReport, Signature};
pub use store::{BucketStore, MemoryStore, RedbStore, ReportIngest, ReportStore, StoreError};
