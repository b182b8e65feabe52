//! Bucket signatures and the key builder that derives them from reports.
//!
//! A signature is the natural key of a bucket: the positional tuple
//! (product, version, build, module, offset). Two signatures are equal only
//! when every field is equal, so delimiter characters inside a field can never
//! make two different tuples collide.

use crate::model::{Report, ReportId};
use std::fmt;

/// The (product, version, build, module, offset) tuple identifying a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature {
    pub product: String,
    pub version: String,
    pub build: String,
    pub module: String,
    pub offset: i64,
}

impl Signature {
    pub fn new(
        product: impl Into<String>,
        version: impl Into<String>,
        build: impl Into<String>,
        module: impl Into<String>,
        offset: i64,
    ) -> Self {
        Self {
            product: product.into(),
            version: version.into(),
            build: build.into(),
            module: module.into(),
            offset,
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {:?} build {:?} {:?}+{:#x}",
            self.product, self.version, self.build, self.module, self.offset
        )
    }
}

/// Derives the signature of a report.
///
/// Total over well-formed reports: blank fields are legal components and
/// simply form their own buckets.
pub fn build_signature(report: &Report) -> Signature {
    Signature {
        product: report.product.clone(),
        version: report.version.clone(),
        build: report.build.clone(),
        module: report.module.clone(),
        offset: report.offset,
    }
}

/// A report rejected because a required signature field is blank.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("report {report_id} has a blank `{field}` signature field")]
pub struct MalformedReport {
    pub report_id: ReportId,
    pub field: &'static str,
}

/// Key builder with a configurable blank-field policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyBuilder {
    require_complete: bool,
}

impl KeyBuilder {
    /// Creates a builder that accepts blank fields.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects reports whose product, version, build or module is blank.
    pub fn require_complete(mut self, require_complete: bool) -> Self {
        self.require_complete = require_complete;
        self
    }

    pub fn requires_complete(&self) -> bool {
        self.require_complete
    }

    /// Builds the signature of `report` under this builder's policy.
    pub fn build(&self, report: &Report) -> Result<Signature, MalformedReport> {
        if self.require_complete {
            let fields = [
                ("product", &report.product),
                ("version", &report.version),
                ("build", &report.build),
                ("module", &report.module),
            ];
            if let Some((field, _)) = fields.into_iter().find(|(_, value)| value.trim().is_empty()) {
                return Err(MalformedReport {
                    report_id: report.id,
                    field,
                });
            }
        }

        Ok(build_signature(report))
    }
}
