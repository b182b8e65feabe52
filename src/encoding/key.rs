//! Signature index key encoding.
//!
//! Every string field is length-prefixed so arbitrary field contents are safe:
//!
//! Signature key: [len][product][len][version][len][build][len][module][offset]

use super::{put_string, EncodingError, FieldReader, Result};
use crate::signature::Signature;

/// Encodes a signature as the key of the unique signature index.
///
/// # Arguments
/// * `signature` - The bucket signature
///
/// # Returns
/// Encoded key bytes
pub fn encode_signature_key(signature: &Signature) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(
        4 * 4
            + signature.product.len()
            + signature.version.len()
            + signature.build.len()
            + signature.module.len()
            + 8,
    );
    write_signature(&mut buf, signature)?;
    Ok(buf)
}

/// Decodes a signature index key.
///
/// # Arguments
/// * `encoded` - Bytes produced by [`encode_signature_key`]
///
/// # Returns
/// The decoded signature
pub fn decode_signature_key(encoded: &[u8]) -> Result<Signature> {
    let mut reader = FieldReader::new(encoded);
    let signature = read_signature(&mut reader)?;
    if !reader.is_exhausted() {
        return Err(EncodingError::InvalidKeyEncoding(
            "Trailing bytes after signature".to_string(),
        ));
    }
    Ok(signature)
}

pub(crate) fn write_signature(buf: &mut Vec<u8>, signature: &Signature) -> Result<()> {
    put_string(buf, &signature.product)?;
    put_string(buf, &signature.version)?;
    put_string(buf, &signature.build)?;
    put_string(buf, &signature.module)?;
    buf.extend_from_slice(&signature.offset.to_be_bytes());
    Ok(())
}

pub(crate) fn read_signature(reader: &mut FieldReader<'_>) -> Result<Signature> {
    Ok(Signature {
        product: reader.string()?,
        version: reader.string()?,
        build: reader.string()?,
        module: reader.string()?,
        offset: reader.i64()?,
    })
}
