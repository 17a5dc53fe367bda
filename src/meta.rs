//! On-disk metadata documents and key layout.
//!
//! Every group carries a group marker (`.zgroup`) and every dataset an array
//! metadata document (`.zarray`); both may carry an attributes document
//! (`.zattrs`). Chunk files live under the dataset path, keyed by their grid
//! indices joined with the dataset's dimension separator.

use serde::{Deserialize, Serialize};

use crate::{
    node::NodePath,
    reserved::{ZARRAY, ZATTRS, ZGROUP},
    storage::StoreKey,
};

/// The storage format version written by this backend.
pub const ZARR_FORMAT: u32 = 2;

/// A group marker document (`.zgroup`).
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct GroupMetadata {
    /// Storage format version.
    pub zarr_format: u32,
}

impl Default for GroupMetadata {
    fn default() -> Self {
        Self {
            zarr_format: ZARR_FORMAT,
        }
    }
}

impl GroupMetadata {
    /// Returns true if the format version is one this backend reads.
    #[must_use]
    pub fn is_supported(&self) -> bool {
        self.zarr_format == ZARR_FORMAT
    }
}

/// The separator joining chunk grid indices into chunk keys.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DimensionSeparator {
    /// Flat layout: chunk files named `0.0` beneath the dataset.
    #[serde(rename = ".")]
    #[default]
    Dot,
    /// Nested layout: chunk files at `0/0` beneath the dataset.
    #[serde(rename = "/")]
    Slash,
}

impl DimensionSeparator {
    /// The separator character.
    #[must_use]
    pub fn as_char(self) -> char {
        match self {
            Self::Dot => '.',
            Self::Slash => '/',
        }
    }
}

/// An array metadata document (`.zarray`).
///
/// The `dtype` is either a typestring (e.g. `"<i4"`) or a structured field
/// list; `compressor` and `filters` configurations are carried as raw JSON so
/// that configurations from other producers survive a round trip untouched.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ArrayMetadata {
    /// Storage format version.
    pub zarr_format: u32,
    /// Array shape.
    pub shape: Vec<u64>,
    /// Chunk shape.
    pub chunks: Vec<u64>,
    /// Physical dtype: a typestring or a structured field list.
    pub dtype: serde_json::Value,
    /// Compressor configuration, or [`None`] for uncompressed chunks.
    #[serde(default)]
    pub compressor: Option<serde_json::Value>,
    /// Fill value for unwritten chunks.
    pub fill_value: serde_json::Value,
    /// Memory layout of each chunk.
    pub order: char,
    /// Filter configurations applied before compression.
    #[serde(default)]
    pub filters: Option<Vec<serde_json::Value>>,
    /// Separator of chunk grid indices in chunk keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension_separator: Option<DimensionSeparator>,
}

impl ArrayMetadata {
    /// Create array metadata with this backend's defaults (C order, no
    /// filters, flat chunk keys).
    #[must_use]
    pub fn new(
        shape: Vec<u64>,
        chunks: Vec<u64>,
        dtype: serde_json::Value,
        fill_value: serde_json::Value,
    ) -> Self {
        Self {
            zarr_format: ZARR_FORMAT,
            shape,
            chunks,
            dtype,
            compressor: None,
            fill_value,
            order: 'C',
            filters: None,
            dimension_separator: None,
        }
    }

    /// The dimension separator, defaulting to [`DimensionSeparator::Dot`].
    #[must_use]
    pub fn separator(&self) -> DimensionSeparator {
        self.dimension_separator.unwrap_or_default()
    }

    /// The number of chunks along each dimension.
    #[must_use]
    pub fn chunk_grid_shape(&self) -> Vec<u64> {
        self.shape
            .iter()
            .zip(&self.chunks)
            .map(|(&size, &chunk)| if chunk == 0 { 0 } else { size.div_ceil(chunk) })
            .collect()
    }
}

/// The chunk grid indices of an array of `shape` chunked by `chunks`, in C
/// order. An empty shape has a single (empty) index.
#[must_use]
pub fn chunk_grid(shape: &[u64], chunks: &[u64]) -> Vec<Vec<u64>> {
    use itertools::Itertools;
    if shape.is_empty() {
        return vec![vec![]];
    }
    shape
        .iter()
        .zip(chunks)
        .map(|(&dim, &chunk)| 0..dim.div_ceil(chunk.max(1)))
        .multi_cartesian_product()
        .collect()
}

/// Return the metadata key for `metadata_file_name` at a node path.
#[must_use]
fn meta_key_any(path: &NodePath, metadata_file_name: &str) -> StoreKey {
    let path = path.as_str();
    if path.eq("/") {
        unsafe { StoreKey::new_unchecked(metadata_file_name.to_string()) }
    } else {
        let path = path.strip_prefix('/').unwrap_or(path);
        unsafe { StoreKey::new_unchecked(format!("{path}/{metadata_file_name}")) }
    }
}

/// Return the group marker key (`.zgroup`) for a node path.
#[must_use]
pub fn group_key(path: &NodePath) -> StoreKey {
    meta_key_any(path, ZGROUP)
}

/// Return the array metadata key (`.zarray`) for a node path.
#[must_use]
pub fn array_key(path: &NodePath) -> StoreKey {
    meta_key_any(path, ZARRAY)
}

/// Return the attributes key (`.zattrs`) for a node path.
#[must_use]
pub fn attrs_key(path: &NodePath) -> StoreKey {
    meta_key_any(path, ZATTRS)
}

/// Return the chunk key for grid indices of the dataset at a node path.
///
/// Zero-dimensional datasets have a single chunk keyed `0`.
#[must_use]
pub fn chunk_key(path: &NodePath, indices: &[u64], separator: DimensionSeparator) -> StoreKey {
    let encoded = if indices.is_empty() {
        "0".to_string()
    } else {
        indices
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(&separator.as_char().to_string())
    };
    meta_key_any(path, &encoded)
}
