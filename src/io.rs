//! The builder I/O engine.
//!
//! A [`ZarrIo`] handle owns an open store and orchestrates whole-file
//! operations: [`write`](ZarrIo::write) serializes a builder tree,
//! [`read`](ZarrIo::read) opens a lazy view of a stored tree, and
//! [`export`](crate::export::export) rewrites one file into another.
//!
//! Writes are single-threaded from the caller's perspective; parallelism
//! appears only inside chunk-stream writes when
//! [`OpenOptions::parallel_workers`] is raised. Concurrent writers on the
//! same store are not supported; the backend takes no filesystem lock.
//!
//! There is no cooperative cancellation: a long write can only be
//! interrupted by tearing down the call, which leaves the store in an
//! indeterminate state. [`OpenOptions::progress`] exposes per-chunk progress
//! so callers can run their own watchdogs.

mod options;
pub mod read;
pub mod spec_cache;
pub mod write;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use thiserror::Error;

use crate::{
    meta::group_key,
    node::NodePath,
    storage::{
        store::{DirectoryStore, DirectoryStoreCreateError, MemoryStore, TempStore},
        ReadableStore, StorageError,
    },
};

pub use options::{
    Mode, OpenOptions, ProgressCallback, SyncGuard, Synchronizer, ThreadSynchronizer,
};
pub use read::{ChildNode, DatasetHandle, GroupHandle, ReadError, ReadSession};
pub use write::WriteError;

/// An open error.
#[derive(Debug, Error)]
pub enum OpenError {
    /// Create mode was asked to open a non-empty store.
    #[error("store at {0} already exists and is not empty")]
    AlreadyExists(String),
    /// Read or read-write mode was asked to open a missing or foreign store.
    #[error("no readable file at {0}")]
    NotFound(String),
    /// A store kind this backend does not accept.
    #[error("{0}")]
    Unsupported(String),
    /// A storage error.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// A store creation error.
    #[error(transparent)]
    StoreCreate(#[from] DirectoryStoreCreateError),
}

/// An open file handle, generic over the storage.
#[derive(Debug)]
pub struct ZarrIo<TStorage: ?Sized> {
    storage: Arc<TStorage>,
    source: String,
    fs_root: Option<PathBuf>,
    options: OpenOptions,
}

impl<TStorage: ?Sized> ZarrIo<TStorage> {
    /// The open options.
    #[must_use]
    pub fn options(&self) -> &OpenOptions {
        &self.options
    }

    /// The open mode.
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.options.mode
    }

    /// The source identity of this file, used as the origin of relative link
    /// sources: the store path, or the synthetic source provided at open.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The filesystem root of this file, if the store has one.
    #[must_use]
    pub fn fs_root(&self) -> Option<&Path> {
        self.fs_root.as_deref()
    }

    /// The underlying storage.
    #[must_use]
    pub fn storage(&self) -> &Arc<TStorage> {
        &self.storage
    }

    /// Close the handle, releasing the store.
    ///
    /// Stores that own resources release them on drop; a subsequent open of
    /// the same location succeeds.
    pub fn close(self) {
        drop(self);
    }
}

impl<TStorage: ?Sized + ReadableStore> ZarrIo<TStorage> {
    /// Wrap an already-constructed store.
    ///
    /// Mode preconditions (empty store for create, readable file for read)
    /// are the caller's responsibility for hand-built stores; the path-based
    /// constructors enforce them.
    #[must_use]
    pub fn from_store(storage: Arc<TStorage>, options: OpenOptions) -> Self {
        let fs_root = storage.source_path().map(Path::to_path_buf);
        let source = options.source_name.clone().unwrap_or_else(|| {
            fs_root
                .as_deref()
                .map_or_else(|| "<memory>".to_string(), |p| p.display().to_string())
        });
        Self {
            storage,
            source,
            fs_root,
            options,
        }
    }

    /// Returns true iff the store appears to be in this backend's format
    /// (root group marker present).
    ///
    /// # Errors
    /// Returns a [`StorageError`] if the store fails.
    pub fn can_read(&self) -> Result<bool, StorageError> {
        Ok(self.storage.get(&group_key(&NodePath::root()))?.is_some())
    }
}

impl ZarrIo<DirectoryStore> {
    /// Open a file on a filesystem directory.
    ///
    /// URL-shaped paths (e.g. `s3://bucket/key`) name remote store kinds this
    /// build does not accept and are rejected with
    /// [`OpenError::Unsupported`].
    ///
    /// # Errors
    /// Returns an [`OpenError`] per the mode contract: create fails on a
    /// non-empty store, read and read-write fail on a missing or foreign
    /// store.
    pub fn open_directory<P: AsRef<Path>>(
        path: P,
        options: OpenOptions,
    ) -> Result<Self, OpenError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        if let Some((scheme, _)) = display.split_once("://") {
            return Err(OpenError::Unsupported(format!(
                "store scheme {scheme}:// is not supported by this build"
            )));
        }

        match options.mode {
            Mode::Create => {
                if path.exists()
                    && std::fs::read_dir(path)
                        .map_err(StorageError::from)?
                        .next()
                        .is_some()
                {
                    return Err(OpenError::AlreadyExists(display));
                }
            }
            Mode::Read | Mode::ReadWrite => {
                if !path.is_dir() {
                    return Err(OpenError::NotFound(display));
                }
            }
            Mode::Append => {}
        }

        let storage = Arc::new(DirectoryStore::new(path)?);
        let io = Self::from_store(storage, options);
        if matches!(io.mode(), Mode::Read | Mode::ReadWrite) && !io.can_read()? {
            return Err(OpenError::NotFound(display));
        }
        Ok(io)
    }
}

impl ZarrIo<MemoryStore> {
    /// Open a file on a fresh in-memory store.
    #[must_use]
    pub fn open_memory(options: OpenOptions) -> Self {
        Self::from_store(Arc::new(MemoryStore::new()), options)
    }
}

impl ZarrIo<TempStore> {
    /// Open a file on a temporary directory store, removed when the handle
    /// and its read sessions are dropped.
    ///
    /// # Errors
    /// Returns an [`OpenError`] if the temporary directory cannot be created.
    pub fn open_temp(options: OpenOptions) -> Result<Self, OpenError> {
        Ok(Self::from_store(Arc::new(TempStore::new()?), options))
    }
}
