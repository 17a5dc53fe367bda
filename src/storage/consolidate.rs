//! Consolidated metadata.
//!
//! The consolidated metadata index aggregates every metadata document in a
//! file (group markers, array metadata, and attributes) under a single
//! reserved top-level key, so that readers can traverse a hierarchy without
//! listing the store. The index must be refreshed after any mutation;
//! readers fall back to per-node metadata when it is absent.

use serde::{Deserialize, Serialize};

use crate::reserved::{CONSOLIDATED_METADATA, ZARRAY, ZATTRS, ZGROUP};

use super::{
    ListableStore, ReadableStore, StorageError, StoreKey, StorePrefix, WritableStore,
};

/// The consolidated metadata index of a file.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ConsolidatedMetadata {
    /// Parsed metadata documents keyed by store key.
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Index format version.
    pub zarr_consolidated_format: u32,
}

impl ConsolidatedMetadata {
    /// Returns the document at `key`, if indexed.
    #[must_use]
    pub fn get(&self, key: &StoreKey) -> Option<&serde_json::Value> {
        self.metadata.get(key.as_str())
    }
}

fn is_metadata_key(key: &StoreKey) -> bool {
    let name = key.as_str().rsplit('/').next().unwrap_or_default();
    name == ZGROUP || name == ZARRAY || name == ZATTRS
}

/// Build the consolidated metadata index of `storage` and store it under the
/// reserved top-level key.
///
/// # Errors
/// Returns a [`StorageError`] if listing, reading, or writing the store
/// fails, or if a metadata document is not valid JSON.
pub fn consolidate_metadata<TStorage: ?Sized + WritableStore + ListableStore>(
    storage: &TStorage,
) -> Result<ConsolidatedMetadata, StorageError> {
    let mut metadata = serde_json::Map::new();
    for key in storage.list_prefix(&StorePrefix::root())? {
        if !is_metadata_key(&key) {
            continue;
        }
        let Some(bytes) = storage.get(&key)? else {
            continue;
        };
        let value: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|err| StorageError::InvalidMetadata(key.clone(), err.to_string()))?;
        metadata.insert(key.as_str().to_string(), value);
    }

    let consolidated = ConsolidatedMetadata {
        metadata,
        zarr_consolidated_format: 1,
    };
    let key = unsafe { StoreKey::new_unchecked(CONSOLIDATED_METADATA) };
    let bytes = serde_json::to_vec(&consolidated)
        .map_err(|err| StorageError::Other(err.to_string()))?;
    storage.set(&key, &bytes)?;
    Ok(consolidated)
}

/// Read the consolidated metadata index of `storage`, if present.
///
/// Returns [`None`] when the index is missing; a present but unparsable
/// index is an error.
///
/// # Errors
/// Returns a [`StorageError`] if the store fails or the index is invalid.
pub fn read_consolidated<TStorage: ?Sized + ReadableStore>(
    storage: &TStorage,
) -> Result<Option<ConsolidatedMetadata>, StorageError> {
    let key = unsafe { StoreKey::new_unchecked(CONSOLIDATED_METADATA) };
    let Some(bytes) = storage.get(&key)? else {
        return Ok(None);
    };
    let consolidated: ConsolidatedMetadata = serde_json::from_slice(&bytes)
        .map_err(|err| StorageError::InvalidMetadata(key, err.to_string()))?;
    Ok(Some(consolidated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::store::MemoryStore;

    #[test]
    fn consolidate_and_read_back() {
        let store = MemoryStore::new();
        store
            .set(&".zgroup".try_into().unwrap(), br#"{"zarr_format":2}"#)
            .unwrap();
        store
            .set(&"g1/.zgroup".try_into().unwrap(), br#"{"zarr_format":2}"#)
            .unwrap();
        store
            .set(&"g1/.zattrs".try_into().unwrap(), br#"{"n":3}"#)
            .unwrap();
        store.set(&"g1/d1/0.0".try_into().unwrap(), &[0; 16]).unwrap();

        let consolidated = consolidate_metadata(&store).unwrap();
        assert_eq!(consolidated.metadata.len(), 3);
        assert!(consolidated
            .get(&"g1/.zattrs".try_into().unwrap())
            .is_some());
        assert!(consolidated.get(&"g1/d1/0.0".try_into().unwrap()).is_none());

        let read = read_consolidated(&store).unwrap().unwrap();
        assert_eq!(read, consolidated);
    }

    #[test]
    fn read_consolidated_missing() {
        let store = MemoryStore::new();
        assert!(read_consolidated(&store).unwrap().is_none());
    }
}
