//! The pluggable object codec for reference-typed dataset elements.
//!
//! A reference-typed (or reference-carrying compound) dataset stores opaque
//! object slots. The object codec turns a sequence of JSON-representable
//! elements into self-contained chunk bytes and back. The codec id is
//! recorded in the array metadata filter slot so a reader can select the
//! matching codec.

use thiserror::Error;

/// An object codec error.
#[derive(Debug, Error)]
#[error("object codec {id}: {reason}")]
pub struct ObjectCodecError {
    /// The codec id.
    pub id: &'static str,
    /// What went wrong.
    pub reason: String,
}

/// Object codec traits.
pub trait ObjectCodecTraits: Send + Sync + core::fmt::Debug {
    /// The codec id recorded in array metadata.
    fn id(&self) -> &'static str;

    /// Encode elements into chunk bytes.
    ///
    /// # Errors
    /// Returns an [`ObjectCodecError`] if an element cannot be encoded.
    fn encode(&self, elements: &[serde_json::Value]) -> Result<Vec<u8>, ObjectCodecError>;

    /// Decode chunk bytes into elements.
    ///
    /// # Errors
    /// Returns an [`ObjectCodecError`] on malformed bytes.
    fn decode(&self, bytes: &[u8]) -> Result<Vec<serde_json::Value>, ObjectCodecError>;
}

/// The default object codec: length-prefixed JSON records.
///
/// Layout: a little-endian `u32` element count, then per element a
/// little-endian `u32` byte length followed by the element's JSON text.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonObjectCodec;

/// The codec id of [`JsonObjectCodec`].
pub const JSON_OBJECT_CODEC_ID: &str = "vlen-json";

impl ObjectCodecTraits for JsonObjectCodec {
    fn id(&self) -> &'static str {
        JSON_OBJECT_CODEC_ID
    }

    fn encode(&self, elements: &[serde_json::Value]) -> Result<Vec<u8>, ObjectCodecError> {
        let count = u32::try_from(elements.len()).map_err(|_| ObjectCodecError {
            id: JSON_OBJECT_CODEC_ID,
            reason: format!("element count {} exceeds u32", elements.len()),
        })?;
        let mut out = count.to_le_bytes().to_vec();
        for element in elements {
            let text = serde_json::to_vec(element).map_err(|err| ObjectCodecError {
                id: JSON_OBJECT_CODEC_ID,
                reason: err.to_string(),
            })?;
            let len = u32::try_from(text.len()).map_err(|_| ObjectCodecError {
                id: JSON_OBJECT_CODEC_ID,
                reason: format!("element length {} exceeds u32", text.len()),
            })?;
            out.extend_from_slice(&len.to_le_bytes());
            out.extend_from_slice(&text);
        }
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<serde_json::Value>, ObjectCodecError> {
        let malformed = |reason: &str| ObjectCodecError {
            id: JSON_OBJECT_CODEC_ID,
            reason: reason.to_string(),
        };
        let header: [u8; 4] = bytes
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| malformed("truncated header"))?;
        let count = u32::from_le_bytes(header) as usize;
        let mut elements = Vec::with_capacity(count);
        let mut offset = 4usize;
        for _ in 0..count {
            let len_bytes: [u8; 4] = bytes
                .get(offset..offset + 4)
                .and_then(|b| b.try_into().ok())
                .ok_or_else(|| malformed("truncated element length"))?;
            offset += 4;
            let len = u32::from_le_bytes(len_bytes) as usize;
            let text = bytes
                .get(offset..offset + len)
                .ok_or_else(|| malformed("truncated element"))?;
            offset += len;
            elements.push(serde_json::from_slice(text).map_err(|err| ObjectCodecError {
                id: JSON_OBJECT_CODEC_ID,
                reason: err.to_string(),
            })?);
        }
        if offset != bytes.len() {
            return Err(malformed("trailing bytes after final element"));
        }
        Ok(elements)
    }
}
