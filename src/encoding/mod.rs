//! Binary encoding of signatures and stored records.
//!
//! This module handles the on-disk format used by the redb store: the
//! signature index key and the versioned report and bucket records.

pub mod key;
pub mod record;

pub use key::{decode_signature_key, encode_signature_key};
pub use record::{decode_bucket, decode_report, encode_bucket, encode_report};

/// Current encoding version for stored records.
pub const VALUE_VERSION: u8 = 1;

/// Errors raised while encoding or decoding stored bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodingError {
    /// A key could not be encoded or decoded.
    #[error("invalid key encoding: {0}")]
    InvalidKeyEncoding(String),

    /// A stored value is truncated or malformed.
    #[error("invalid value encoding: {0}")]
    InvalidValueEncoding(String),

    /// A stored value carries an unknown version prefix.
    #[error("unsupported value version {0}")]
    UnsupportedVersion(u8),
}

pub type Result<T> = std::result::Result<T, EncodingError>;

/// Cursor over encoded bytes.
pub(crate) struct FieldReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                EncodingError::InvalidValueEncoding(format!(
                    "need {} bytes at position {}, only {} available",
                    len,
                    self.pos,
                    self.data.len() - self.pos
                ))
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub(crate) fn u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(buf))
    }

    pub(crate) fn i64(&mut self) -> Result<i64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(i64::from_be_bytes(buf))
    }

    /// Reads a `[len: u32][utf8 bytes]` field.
    pub(crate) fn string(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| EncodingError::InvalidValueEncoding(format!("field is not utf-8: {}", e)))
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.pos == self.data.len()
    }
}

/// Appends a `[len: u32][utf8 bytes]` field.
pub(crate) fn put_string(buf: &mut Vec<u8>, value: &str) -> Result<()> {
    let len: u32 = value
        .len()
        .try_into()
        .map_err(|_| EncodingError::InvalidKeyEncoding("Field too long".to_string()))?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(value.as_bytes());
    Ok(())
}
