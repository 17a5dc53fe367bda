//! A filesystem directory store.

use thiserror::Error;
use walkdir::WalkDir;

use crate::storage::{
    ListableStore, ReadableStore, StorageError, StoreKey, StoreKeyError, StoreKeys,
    StoreKeysPrefixes, StorePrefix, WritableStore,
};

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

/// A filesystem directory store.
///
/// Every store key maps to a file below the base directory; a whole file is
/// a directory tree that can be moved or renamed as a unit.
#[derive(Debug)]
pub struct DirectoryStore {
    base_path: PathBuf,
    readonly: bool,
}

/// A directory store creation error.
#[derive(Debug, Error)]
pub enum DirectoryStoreCreateError {
    /// An IO error.
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    /// The base path is not valid.
    #[error("base path {0} is not valid")]
    InvalidBasePath(PathBuf),
}

impl DirectoryStore {
    /// Create a new directory store at `base_path`.
    ///
    /// The base directory is created if it does not exist.
    ///
    /// # Errors
    /// Returns a [`DirectoryStoreCreateError`] if `base_path` is not valid or
    /// points to an existing file rather than a directory.
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self, DirectoryStoreCreateError> {
        let base_path = base_path.as_ref().to_path_buf();
        if base_path.to_str().is_none() || base_path.is_file() {
            return Err(DirectoryStoreCreateError::InvalidBasePath(base_path));
        }

        let readonly = if base_path.exists() {
            let md = std::fs::metadata(&base_path)?;
            md.permissions().readonly()
        } else {
            std::fs::create_dir_all(&base_path)?;
            false
        };

        Ok(Self {
            base_path,
            readonly,
        })
    }

    /// Maps a [`StoreKey`] to a filesystem path.
    #[must_use]
    pub fn key_to_fspath(&self, key: &StoreKey) -> PathBuf {
        let mut path = self.base_path.clone();
        path.push(key.as_str());
        path
    }

    /// Maps a filesystem path to a [`StoreKey`].
    fn fspath_to_key(&self, path: &Path) -> Result<StoreKey, StoreKeyError> {
        let path = pathdiff::diff_paths(path, &self.base_path).ok_or_else(|| {
            StoreKeyError::from(path.to_str().unwrap_or_default().to_string())
        })?;
        let mut components = vec![];
        for component in path.components() {
            components.push(component.as_os_str().to_string_lossy());
        }
        StoreKey::new(components.join("/"))
    }

    /// Maps a [`StorePrefix`] to a filesystem path.
    #[must_use]
    pub fn prefix_to_fspath(&self, prefix: &StorePrefix) -> PathBuf {
        let mut path = self.base_path.clone();
        path.push(prefix.as_str());
        path
    }
}

impl ReadableStore for DirectoryStore {
    fn get(&self, key: &StoreKey) -> Result<Option<Vec<u8>>, StorageError> {
        match std::fs::read(self.key_to_fspath(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn size_key(&self, key: &StoreKey) -> Result<Option<u64>, StorageError> {
        match std::fs::metadata(self.key_to_fspath(key)) {
            Ok(md) if md.is_file() => Ok(Some(md.len())),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn source_path(&self) -> Option<&Path> {
        Some(&self.base_path)
    }
}

impl WritableStore for DirectoryStore {
    fn set(&self, key: &StoreKey, value: &[u8]) -> Result<(), StorageError> {
        if self.readonly {
            return Err(StorageError::ReadOnly);
        }
        let key_path = self.key_to_fspath(key);
        if let Some(parent) = key_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(key_path, value)?;
        Ok(())
    }

    fn erase(&self, key: &StoreKey) -> Result<bool, StorageError> {
        if self.readonly {
            return Err(StorageError::ReadOnly);
        }
        match std::fs::remove_file(self.key_to_fspath(key)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn erase_prefix(&self, prefix: &StorePrefix) -> Result<bool, StorageError> {
        if self.readonly {
            return Err(StorageError::ReadOnly);
        }
        let path = self.prefix_to_fspath(prefix);
        match std::fs::remove_dir_all(path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

impl ListableStore for DirectoryStore {
    fn list(&self) -> Result<StoreKeys, StorageError> {
        self.list_prefix(&StorePrefix::root())
    }

    fn list_prefix(&self, prefix: &StorePrefix) -> Result<StoreKeys, StorageError> {
        let prefix_path = self.prefix_to_fspath(prefix);
        if !prefix_path.exists() {
            return Ok(vec![]);
        }
        let mut keys = vec![];
        for entry in WalkDir::new(&prefix_path).sort_by_file_name() {
            let entry = entry.map_err(|err| StorageError::Other(err.to_string()))?;
            if entry.file_type().is_file() {
                if let Ok(key) = self.fspath_to_key(entry.path()) {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }

    fn list_dir(&self, prefix: &StorePrefix) -> Result<StoreKeysPrefixes, StorageError> {
        let prefix_path = self.prefix_to_fspath(prefix);
        if !prefix_path.exists() {
            return Ok(StoreKeysPrefixes::default());
        }
        let mut keys = vec![];
        let mut prefixes = BTreeSet::new();
        for entry in std::fs::read_dir(prefix_path)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type()?.is_dir() {
                prefixes.insert(StorePrefix::new(
                    prefix.as_str().to_string() + &name + "/",
                )?);
            } else if let Ok(key) = StoreKey::new(prefix.as_str().to_string() + &name) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(StoreKeysPrefixes::new(
            keys,
            prefixes.into_iter().collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn directory_set_get_list() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::TempDir::new()?;
        let store = DirectoryStore::new(dir.path())?;
        let key = "group/array/.zarray".try_into()?;
        store.set(&key, br#"{"zarr_format":2}"#)?;
        assert_eq!(store.get(&key)?.unwrap(), br#"{"zarr_format":2}"#);
        assert_eq!(store.list()?, vec![key.clone()]);

        let list_dir = store.list_dir(&StorePrefix::root())?;
        assert!(list_dir.keys().is_empty());
        assert_eq!(list_dir.prefixes(), &["group/".try_into()?]);

        assert!(store.erase(&key)?);
        assert!(store.get(&key)?.is_none());
        Ok(())
    }

    #[test]
    fn directory_source_path() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::TempDir::new()?;
        let store = DirectoryStore::new(dir.path())?;
        assert_eq!(store.source_path(), Some(dir.path()));
        Ok(())
    }

    #[test]
    fn directory_missing_prefix_lists_empty() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::TempDir::new()?;
        let store = DirectoryStore::new(dir.path())?;
        assert!(store.list_prefix(&"missing/".try_into()?)?.is_empty());
        Ok(())
    }
}
