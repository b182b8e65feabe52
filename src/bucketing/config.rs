//! Configuration for bucketing runs.

use crate::error::{Error, Result};
use crate::model::BucketId;
use std::time::Duration;

/// Reports fetched per window.
pub const DEFAULT_WINDOW_SIZE: usize = 1000;

/// Lowest id handed out to a new bucket.
pub const DEFAULT_FIRST_BUCKET_ID: BucketId = 10_000;

/// Retries of a window after a transient store failure.
pub const DEFAULT_MAX_WINDOW_RETRIES: u32 = 3;

/// Base delay between window retries; attempt `n` waits `n` times this.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Checkpoint name used when none is configured.
pub const DEFAULT_CHECKPOINT_NAME: &str = "bucketing";

/// Configuration for a bucketing run.
#[derive(Debug, Clone)]
pub struct BucketingConfig {
    /// Number of reports per window. Must be greater than 0.
    pub window_size: usize,

    /// Floor of the bucket id allocator. The allocator starts at the larger of
    /// this value and one past the highest id already stored.
    pub first_bucket_id: BucketId,

    /// How many times a window is retried after a transient failure.
    pub max_window_retries: u32,

    pub retry_backoff: Duration,

    /// Skip reports whose product, version, build or module is blank.
    pub require_complete_signature: bool,

    /// Name under which the cursor is persisted after every window, or `None`
    /// to run without checkpoints.
    pub checkpoint_name: Option<String>,
}

impl BucketingConfig {
    /// Creates a configuration with the given window size and defaults for
    /// everything else.
    ///
    /// # Arguments
    /// * `window_size` - Reports per window (must be > 0)
    ///
    /// # Returns
    /// Validated configuration or error
    pub fn new(window_size: usize) -> Result<Self> {
        let config = Self {
            window_size,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_first_bucket_id(mut self, first_bucket_id: BucketId) -> Self {
        self.first_bucket_id = first_bucket_id;
        self
    }

    pub fn with_retries(mut self, max_window_retries: u32, retry_backoff: Duration) -> Self {
        self.max_window_retries = max_window_retries;
        self.retry_backoff = retry_backoff;
        self
    }

    pub fn with_complete_signatures(mut self, require_complete_signature: bool) -> Self {
        self.require_complete_signature = require_complete_signature;
        self
    }

    pub fn with_checkpoint(mut self, name: impl Into<String>) -> Self {
        self.checkpoint_name = Some(name.into());
        self
    }

    pub fn without_checkpoint(mut self) -> Self {
        self.checkpoint_name = None;
        self
    }

    /// Checks the invariants `new` enforces; fields are public, so the
    /// orchestrator validates again before starting.
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(Error::Config("window size must be greater than 0".to_string()));
        }
        if matches!(&self.checkpoint_name, Some(name) if name.is_empty()) {
            return Err(Error::Config("checkpoint name must not be empty".to_string()));
        }
        Ok(())
    }
}

impl Default for BucketingConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            first_bucket_id: DEFAULT_FIRST_BUCKET_ID,
            max_window_retries: DEFAULT_MAX_WINDOW_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            require_complete_signature: false,
            checkpoint_name: Some(DEFAULT_CHECKPOINT_NAME.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = BucketingConfig::new(100).unwrap();
        assert_eq!(config.window_size, 100);
        assert_eq!(config.first_bucket_id, DEFAULT_FIRST_BUCKET_ID);
        assert_eq!(config.checkpoint_name.as_deref(), Some("bucketing"));
    }

    #[test]
    fn test_invalid_window_size() {
        assert!(matches!(BucketingConfig::new(0), Err(Error::Config(_))));
    }

    #[test]
    fn test_empty_checkpoint_name_rejected() {
        let config = BucketingConfig::default().with_checkpoint("");
        assert!(config.validate().is_err());
        assert!(config.without_checkpoint().validate().is_ok());
    }

    #[test]
    fn test_default_config() {
        let config = BucketingConfig::default();
        assert_eq!(config.window_size, 1000);
        assert_eq!(config.first_bucket_id, 10_000);
        assert_eq!(config.max_window_retries, 3);
        assert_eq!(config.retry_backoff, Duration::from_millis(100));
        assert!(!config.require_complete_signature);
    }
}
