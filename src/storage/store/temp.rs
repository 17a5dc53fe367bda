//! A temporary directory store.

use std::path::Path;

use tempfile::TempDir;

use crate::storage::{
    ListableStore, ReadableStore, StorageError, StoreKey, StoreKeys, StoreKeysPrefixes,
    StorePrefix, WritableStore,
};

use super::{DirectoryStore, DirectoryStoreCreateError};

/// A [`DirectoryStore`] rooted in a temporary directory.
///
/// The directory and everything in it is removed when the store is dropped.
#[derive(Debug)]
pub struct TempStore {
    inner: DirectoryStore,
    // Held for its Drop impl, which removes the directory.
    _tempdir: TempDir,
}

impl TempStore {
    /// Create a new temporary directory store.
    ///
    /// # Errors
    /// Returns a [`DirectoryStoreCreateError`] if the temporary directory
    /// cannot be created.
    pub fn new() -> Result<Self, DirectoryStoreCreateError> {
        let tempdir = TempDir::new()?;
        let inner = DirectoryStore::new(tempdir.path())?;
        Ok(Self {
            inner,
            _tempdir: tempdir,
        })
    }
}

impl ReadableStore for TempStore {
    fn get(&self, key: &StoreKey) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.get(key)
    }

    fn size_key(&self, key: &StoreKey) -> Result<Option<u64>, StorageError> {
        self.inner.size_key(key)
    }

    fn source_path(&self) -> Option<&Path> {
        self.inner.source_path()
    }
}

impl WritableStore for TempStore {
    fn set(&self, key: &StoreKey, value: &[u8]) -> Result<(), StorageError> {
        self.inner.set(key, value)
    }

    fn erase(&self, key: &StoreKey) -> Result<bool, StorageError> {
        self.inner.erase(key)
    }

    fn erase_prefix(&self, prefix: &StorePrefix) -> Result<bool, StorageError> {
        self.inner.erase_prefix(prefix)
    }
}

impl ListableStore for TempStore {
    fn list(&self) -> Result<StoreKeys, StorageError> {
        self.inner.list()
    }

    fn list_prefix(&self, prefix: &StorePrefix) -> Result<StoreKeys, StorageError> {
        self.inner.list_prefix(prefix)
    }

    fn list_dir(&self, prefix: &StorePrefix) -> Result<StoreKeysPrefixes, StorageError> {
        self.inner.list_dir(prefix)
    }
}
