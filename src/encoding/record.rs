//! Versioned report and bucket records.
//!
//! Report value: [version][product][version][build][module][offset][crashed_at][has_bucket][bucket_id?]
//! Bucket value: [version][signature][crash_count][unique_steps][created_at][last_crash_at]
//!
//! Timestamps are stored as big-endian i64 milliseconds since the Unix epoch.
//! Record ids are the table keys and are not repeated in the value.

use super::key::{read_signature, write_signature};
use super::{put_string, EncodingError, FieldReader, Result, VALUE_VERSION};
use crate::model::{Bucket, BucketId, Report, ReportId};
use chrono::{DateTime, Utc};

fn check_version(reader: &mut FieldReader<'_>) -> Result<()> {
    let version = reader.u8()?;
    if version != VALUE_VERSION {
        return Err(EncodingError::UnsupportedVersion(version));
    }
    Ok(())
}

fn read_timestamp(reader: &mut FieldReader<'_>) -> Result<DateTime<Utc>> {
    let millis = reader.i64()?;
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        EncodingError::InvalidValueEncoding(format!("timestamp {} out of range", millis))
    })
}

fn expect_end(reader: &FieldReader<'_>, what: &str) -> Result<()> {
    if reader.is_exhausted() {
        Ok(())
    } else {
        Err(EncodingError::InvalidValueEncoding(format!(
            "trailing bytes after {} record",
            what
        )))
    }
}

/// Encodes a report record.
pub fn encode_report(report: &Report) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(
        1 + 4 * 4
            + report.product.len()
            + report.version.len()
            + report.build.len()
            + report.module.len()
            + 8
            + 8
            + 9,
    );
    buf.push(VALUE_VERSION);
    put_string(&mut buf, &report.product)?;
    put_string(&mut buf, &report.version)?;
    put_string(&mut buf, &report.build)?;
    put_string(&mut buf, &report.module)?;
    buf.extend_from_slice(&report.offset.to_be_bytes());
    buf.extend_from_slice(&report.crashed_at.timestamp_millis().to_be_bytes());
    match report.bucket_id {
        Some(bucket_id) => {
            buf.push(1);
            buf.extend_from_slice(&bucket_id.to_be_bytes());
        }
        None => buf.push(0),
    }
    Ok(buf)
}

/// Decodes the report record stored under `id`.
pub fn decode_report(id: ReportId, data: &[u8]) -> Result<Report> {
    let mut reader = FieldReader::new(data);
    check_version(&mut reader)?;

    let product = reader.string()?;
    let version = reader.string()?;
    let build = reader.string()?;
    let module = reader.string()?;
    let offset = reader.i64()?;
    let crashed_at = read_timestamp(&mut reader)?;
    let bucket_id: Option<BucketId> = match reader.u8()? {
        0 => None,
        1 => Some(reader.u64()?),
        flag => {
            return Err(EncodingError::InvalidValueEncoding(format!(
                "invalid bucket flag {} on report {}",
                flag, id
            )))
        }
    };
    expect_end(&reader, "report")?;

    Ok(Report {
        id,
        product,
        version,
        build,
        module,
        offset,
        crashed_at,
        bucket_id,
    })
}

/// Encodes a bucket record.
pub fn encode_bucket(bucket: &Bucket) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(64);
    buf.push(VALUE_VERSION);
    write_signature(&mut buf, &bucket.signature)?;
    buf.extend_from_slice(&bucket.crash_count.to_be_bytes());
    buf.extend_from_slice(&bucket.unique_steps_count.to_be_bytes());
    buf.extend_from_slice(&bucket.created_at.timestamp_millis().to_be_bytes());
    buf.extend_from_slice(&bucket.last_crash_at.timestamp_millis().to_be_bytes());
    Ok(buf)
}

/// Decodes the bucket record stored under `id`.
pub fn decode_bucket(id: BucketId, data: &[u8]) -> Result<Bucket> {
    let mut reader = FieldReader::new(data);
    check_version(&mut reader)?;

    let signature = read_signature(&mut reader)?;
    let crash_count = reader.u64()?;
    let unique_steps_count = reader.u64()?;
    let created_at = read_timestamp(&mut reader)?;
    let last_crash_at = read_timestamp(&mut reader)?;
    expect_end(&reader, "bucket")?;

    Ok(Bucket {
        id,
        signature,
        crash_count,
        unique_steps_count,
        created_at,
        last_crash_at,
    })
}
