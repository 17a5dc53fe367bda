use std::path::Path;

use super::{StorageError, StoreKey, StoreKeys, StoreKeysPrefixes, StorePrefix};

/// Readable storage traits.
pub trait ReadableStore: Send + Sync {
    /// Retrieve the value (bytes) associated with a given [`StoreKey`].
    ///
    /// Returns [`None`] if the key is not found.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an error with the underlying
    /// store.
    fn get(&self, key: &StoreKey) -> Result<Option<Vec<u8>>, StorageError>;

    /// Return the size in bytes of the value at `key`, or [`None`] if the key
    /// is not found.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an underlying storage error.
    fn size_key(&self, key: &StoreKey) -> Result<Option<u64>, StorageError>;

    /// The filesystem path backing this store, if any.
    ///
    /// Path-backed stores return their base directory; it is used as the
    /// origin when computing relative link sources. Stores without a path
    /// (e.g. in-memory) return [`None`] and rely on a caller-provided
    /// synthetic source.
    fn source_path(&self) -> Option<&Path> {
        None
    }
}

/// Writable storage traits.
pub trait WritableStore: Send + Sync + ReadableStore {
    /// Store bytes at a [`StoreKey`].
    ///
    /// # Errors
    /// Returns a [`StorageError`] on failure to store.
    fn set(&self, key: &StoreKey, value: &[u8]) -> Result<(), StorageError>;

    /// Erase a [`StoreKey`].
    ///
    /// Returns true if the key existed and was erased.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an underlying storage error.
    fn erase(&self, key: &StoreKey) -> Result<bool, StorageError>;

    /// Erase all keys under [`StorePrefix`].
    ///
    /// Returns true if any key was erased.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if the erase fails.
    fn erase_prefix(&self, prefix: &StorePrefix) -> Result<bool, StorageError>;
}

/// Listable storage traits.
pub trait ListableStore: Send + Sync {
    /// Retrieve all [`StoreKeys`] in the store.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an underlying error with the
    /// store.
    fn list(&self) -> Result<StoreKeys, StorageError>;

    /// Retrieve all [`StoreKeys`] with a given [`StorePrefix`].
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an underlying error with the
    /// store.
    fn list_prefix(&self, prefix: &StorePrefix) -> Result<StoreKeys, StorageError>;

    /// Retrieve the keys and prefixes which are direct children of
    /// [`StorePrefix`].
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an underlying error with the
    /// store.
    fn list_dir(&self, prefix: &StorePrefix) -> Result<StoreKeysPrefixes, StorageError>;
}

/// A supertrait of [`ReadableStore`] and [`ListableStore`].
pub trait ReadableListableStore: ReadableStore + ListableStore {}

impl<T> ReadableListableStore for T where T: ReadableStore + ListableStore {}

/// A supertrait of [`ReadableStore`], [`WritableStore`], and [`ListableStore`].
pub trait ReadableWritableListableStore: WritableStore + ListableStore {}

impl<T> ReadableWritableListableStore for T where T: WritableStore + ListableStore {}
