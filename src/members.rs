//! Bucket membership bitmaps.
//!
//! Each bucket keeps the set of report ids that reference it as a
//! `RoaringTreemap`. The set is stored as versioned bytes next to the bucket
//! record, and a bitmap that fails to decode is an error rather than an
//! empty set.

use crate::encoding::{EncodingError, VALUE_VERSION};
use crate::model::ReportId;
use roaring::RoaringTreemap;

/// Report ids referencing one bucket.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MemberSet {
    bitmap: RoaringTreemap,
}

impl MemberSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a reference to the underlying bitmap.
    pub fn bitmap(&self) -> &RoaringTreemap {
        &self.bitmap
    }

    /// Consumes the set and returns the underlying bitmap.
    pub fn into_bitmap(self) -> RoaringTreemap {
        self.bitmap
    }

    /// Adds a report id, returning `false` when it was already present.
    pub fn insert(&mut self, report_id: ReportId) -> bool {
        self.bitmap.insert(report_id)
    }

    pub fn contains(&self, report_id: ReportId) -> bool {
        self.bitmap.contains(report_id)
    }

    pub fn len(&self) -> u64 {
        self.bitmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bitmap.is_empty()
    }

    /// Encodes the set into storage format: [version][roaring bytes].
    pub fn encode(&self) -> Result<Vec<u8>, EncodingError> {
        let mut buf = Vec::with_capacity(1 + self.bitmap.serialized_size());
        buf.push(VALUE_VERSION);
        self.bitmap
            .serialize_into(&mut buf)
            .map_err(|e| EncodingError::InvalidValueEncoding(e.to_string()))?;
        Ok(buf)
    }

    /// Decodes storage bytes into a member set.
    pub fn decode(data: &[u8]) -> Result<Self, EncodingError> {
        let Some((&version, bitmap_bytes)) = data.split_first() else {
            return Err(EncodingError::InvalidValueEncoding("Empty data".to_string()));
        };
        if version != VALUE_VERSION {
            return Err(EncodingError::UnsupportedVersion(version));
        }

        let bitmap = RoaringTreemap::deserialize_from(bitmap_bytes)
            .map_err(|e| EncodingError::InvalidValueEncoding(e.to_string()))?;
        Ok(Self { bitmap })
    }
}

impl From<RoaringTreemap> for MemberSet {
    fn from(bitmap: RoaringTreemap) -> Self {
        Self { bitmap }
    }
}

impl FromIterator<ReportId> for MemberSet {
    fn from_iter<I: IntoIterator<Item = ReportId>>(iter: I) -> Self {
        Self {
            bitmap: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let members: MemberSet = [1u64, 5, 250].into_iter().collect();

        let encoded = members.encode().unwrap();
        assert_eq!(encoded[0], VALUE_VERSION);

        let decoded = MemberSet::decode(&encoded).unwrap();
        assert_eq!(decoded, members);
        assert_eq!(decoded.len(), 3);
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut members = MemberSet::new();
        assert!(members.insert(42));
        assert!(!members.insert(42));
        assert_eq!(members.len(), 1);
        assert!(members.contains(42));
    }

    #[test]
    fn test_empty_data_rejected() {
        assert!(MemberSet::decode(&[]).is_err());
    }

    #[test]
    fn test_invalid_version() {
        let mut invalid_data = vec![99];
        invalid_data.extend_from_slice(b"fake_data");

        assert_eq!(
            MemberSet::decode(&invalid_data),
            Err(EncodingError::UnsupportedVersion(99))
        );
    }
}
