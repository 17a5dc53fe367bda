//! Per-dataset storage overrides.

use std::sync::Arc;

use thiserror::Error;

use crate::{dtype::ObjectCodecTraits, meta::DimensionSeparator};

use super::ScalarValue;

/// A chunk compressor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compressor {
    /// The gzip compressor (requires the `gzip` feature).
    Gzip {
        /// Compression level, 0 to 9.
        level: u32,
    },
}

/// A compressor error.
#[derive(Debug, Error)]
pub enum CompressorError {
    /// The compressor is not available in this build.
    #[error("compressor {0} is not enabled in this build")]
    Disabled(&'static str),
    /// An IO error while compressing or decompressing.
    #[error(transparent)]
    IOError(#[from] std::io::Error),
}

impl Compressor {
    /// The compressor configuration written to array metadata.
    #[must_use]
    pub fn to_config(self) -> serde_json::Value {
        match self {
            Self::Gzip { level } => serde_json::json!({ "id": "gzip", "level": level }),
        }
    }

    /// Parse a compressor configuration from array metadata.
    ///
    /// Returns [`None`] for configurations this backend cannot produce;
    /// callers keep the raw configuration as an opaque hint in that case.
    #[must_use]
    pub fn from_config(config: &serde_json::Value) -> Option<Self> {
        match config.get("id").and_then(serde_json::Value::as_str)? {
            "gzip" => Some(Self::Gzip {
                level: config
                    .get("level")
                    .and_then(serde_json::Value::as_u64)
                    .map_or(4, |level| u32::try_from(level).unwrap_or(4)),
            }),
            _ => None,
        }
    }

    /// Compress chunk bytes.
    ///
    /// # Errors
    /// Returns a [`CompressorError`] if the compressor is disabled or fails.
    pub fn compress(self, bytes: &[u8]) -> Result<Vec<u8>, CompressorError> {
        match self {
            #[cfg(feature = "gzip")]
            Self::Gzip { level } => {
                use std::io::Write;
                let mut encoder = flate2::write::GzEncoder::new(
                    Vec::new(),
                    flate2::Compression::new(level.min(9)),
                );
                encoder.write_all(bytes)?;
                Ok(encoder.finish()?)
            }
            #[cfg(not(feature = "gzip"))]
            Self::Gzip { .. } => Err(CompressorError::Disabled("gzip")),
        }
    }

    /// Decompress chunk bytes.
    ///
    /// # Errors
    /// Returns a [`CompressorError`] if the compressor is disabled or the
    /// bytes are malformed.
    pub fn decompress(self, bytes: &[u8]) -> Result<Vec<u8>, CompressorError> {
        match self {
            #[cfg(feature = "gzip")]
            Self::Gzip { .. } => {
                use std::io::Read;
                let mut decoder = flate2::read::GzDecoder::new(bytes);
                let mut out = Vec::new();
                decoder.read_to_end(&mut out)?;
                Ok(out)
            }
            #[cfg(not(feature = "gzip"))]
            Self::Gzip { .. } => Err(CompressorError::Disabled("gzip")),
        }
    }
}

/// Per-dataset storage overrides: chunk shape, compressor, fill value,
/// object codec, and chunk-key layout.
///
/// Every field defaults to "let the engine decide".
#[derive(Clone, Debug, Default)]
pub struct DatasetIo {
    /// Chunk shape override. Defaults to a single chunk spanning the dataset.
    pub chunk_shape: Option<Vec<u64>>,
    /// Chunk compressor. Defaults to uncompressed.
    pub compressor: Option<Compressor>,
    /// Fill value override for unwritten and padded elements.
    pub fill_value: Option<ScalarValue>,
    /// Object codec override for reference-typed elements. Defaults to the
    /// codec configured at open.
    pub object_codec: Option<Arc<dyn ObjectCodecTraits>>,
    /// Chunk-key separator override (flat `.` vs nested `/` layout).
    pub dimension_separator: Option<DimensionSeparator>,
}
