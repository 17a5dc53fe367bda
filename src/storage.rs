//! Storage for hierarchy files ([stores](store) and the store abstraction).
//!
//! A store is a byte-level key/value container holding the chunked-array
//! format: group and array markers, attribute documents, and chunk files.
//! This module defines the abstract store interfaces, the built-in stores
//! ([memory](store::MemoryStore), [directory](store::DirectoryStore), and
//! [temporary](store::TempStore)), and [consolidated-metadata](consolidate)
//! maintenance.
//!
//! The store does not interpret attribute contents; it only ferries bytes
//! and JSON.

pub mod consolidate;
mod storage_sync;
pub mod store;
mod store_key;
mod store_prefix;

use std::sync::Arc;

use thiserror::Error;

use crate::node::{NodeNameError, NodePathError};

pub use self::consolidate::{consolidate_metadata, read_consolidated, ConsolidatedMetadata};
pub use self::storage_sync::{
    ListableStore, ReadableListableStore, ReadableStore, ReadableWritableListableStore,
    WritableStore,
};
pub use store_key::{StoreKey, StoreKeyError, StoreKeys};
pub use store_prefix::{StorePrefix, StorePrefixError, StorePrefixes};

/// [`Arc`] wrapped readable storage.
pub type ReadableStorage = Arc<dyn ReadableStore>;

/// [`Arc`] wrapped readable and listable storage.
pub type ReadableListableStorage = Arc<dyn ReadableListableStore>;

/// [`Arc`] wrapped readable, writable, and listable storage.
pub type ReadableWritableListableStorage = Arc<dyn ReadableWritableListableStore>;

/// [`StoreKeys`] and [`StorePrefixes`] returned by a directory listing.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct StoreKeysPrefixes {
    keys: StoreKeys,
    prefixes: StorePrefixes,
}

impl StoreKeysPrefixes {
    /// Create a new [`StoreKeysPrefixes`].
    #[must_use]
    pub fn new(keys: StoreKeys, prefixes: StorePrefixes) -> Self {
        Self { keys, prefixes }
    }

    /// Returns the keys.
    #[must_use]
    pub fn keys(&self) -> &StoreKeys {
        &self.keys
    }

    /// Returns the prefixes.
    #[must_use]
    pub fn prefixes(&self) -> &StorePrefixes {
        &self.prefixes
    }
}

/// A storage error.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A write operation was attempted on a read only store.
    #[error("a write operation was attempted on a read only store")]
    ReadOnly,
    /// An IO error.
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    /// An error parsing the metadata for a key.
    #[error("error parsing metadata for {0}: {1}")]
    InvalidMetadata(StoreKey, String),
    /// An invalid store prefix.
    #[error("invalid store prefix {0}")]
    StorePrefixError(#[from] StorePrefixError),
    /// An invalid store key.
    #[error("invalid store key {0}")]
    InvalidStoreKey(#[from] StoreKeyError),
    /// An invalid node path.
    #[error("invalid node path {0}")]
    NodePathError(#[from] NodePathError),
    /// An invalid node name.
    #[error("invalid node name {0}")]
    NodeNameError(#[from] NodeNameError),
    /// The requested store kind or method is not supported.
    #[error("{0}")]
    Unsupported(String),
    /// Any other error.
    #[error("{0}")]
    Other(String),
}

impl From<&str> for StorageError {
    fn from(err: &str) -> Self {
        Self::Other(err.to_string())
    }
}

impl From<String> for StorageError {
    fn from(err: String) -> Self {
        Self::Other(err)
    }
}

/// Returns true if a group or dataset exists at `path` in `storage`.
///
/// # Errors
/// Returns a [`StorageError`] if the store fails.
pub fn node_exists<TStorage: ?Sized + ReadableStore>(
    storage: &TStorage,
    path: &crate::node::NodePath,
) -> Result<bool, StorageError> {
    Ok(storage.get(&crate::meta::group_key(path))?.is_some()
        || storage.get(&crate::meta::array_key(path))?.is_some())
}
