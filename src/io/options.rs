//! Open options.

use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use parking_lot::{Condvar, Mutex};

use crate::{
    dtype::{JsonObjectCodec, ObjectCodecTraits},
    typemap::TypeMap,
};

/// The open mode of a file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Create a new file; the store must be empty.
    Create,
    /// Open an existing file for writing, creating it if missing.
    Append,
    /// Open an existing file read-only.
    Read,
    /// Open an existing file for reading and writing.
    ReadWrite,
}

impl Mode {
    /// Returns true if the mode permits writes.
    #[must_use]
    pub fn is_writable(self) -> bool {
        !matches!(self, Self::Read)
    }
}

/// A progress callback for chunk-stream writes: dataset path, chunks
/// written so far, and the total chunk count when known.
pub type ProgressCallback = Arc<dyn Fn(&str, u64, Option<u64>) + Send + Sync>;

/// An opaque lock guard; dropping it releases the lock.
pub struct SyncGuard(#[allow(dead_code)] Box<dyn std::any::Any + Send>);

impl SyncGuard {
    /// Wrap a guard value.
    #[must_use]
    pub fn new(guard: Box<dyn std::any::Any + Send>) -> Self {
        Self(guard)
    }
}

/// A lock provider serializing access to store keys.
///
/// The engine takes the lock for a chunk key around each chunk write during
/// parallel chunk-stream writes. Cross-process coordination is out of scope;
/// a synchronizer protects callers sharing one process.
pub trait Synchronizer: Send + Sync + core::fmt::Debug {
    /// Acquire the lock for `key`, blocking until available.
    fn lock(&self, key: &str) -> SyncGuard;
}

#[derive(Debug, Default)]
struct ThreadSyncInner {
    held: Mutex<HashSet<String>>,
    available: Condvar,
}

/// An in-process [`Synchronizer`] over named keys.
#[derive(Debug, Default)]
pub struct ThreadSynchronizer {
    inner: Arc<ThreadSyncInner>,
}

impl ThreadSynchronizer {
    /// Create a new thread synchronizer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

struct ThreadSyncGuard {
    inner: Arc<ThreadSyncInner>,
    key: String,
}

impl Drop for ThreadSyncGuard {
    fn drop(&mut self) {
        self.inner.held.lock().remove(&self.key);
        self.inner.available.notify_all();
    }
}

impl Synchronizer for ThreadSynchronizer {
    fn lock(&self, key: &str) -> SyncGuard {
        let mut held = self.inner.held.lock();
        while held.contains(key) {
            self.inner.available.wait(&mut held);
        }
        held.insert(key.to_string());
        drop(held);
        SyncGuard::new(Box::new(ThreadSyncGuard {
            inner: self.inner.clone(),
            key: key.to_string(),
        }))
    }
}

/// Options recognized by open and write.
#[derive(Clone)]
pub struct OpenOptions {
    /// The open mode.
    pub mode: Mode,
    /// Write the schema cache on write (default true).
    pub cache_spec: bool,
    /// Refresh the consolidated metadata index after write (default true).
    pub consolidate_metadata: bool,
    /// Worker count for chunk-stream writes (default 1: serial).
    pub parallel_workers: usize,
    /// The object codec for reference-typed dataset elements.
    pub object_codec: Arc<dyn ObjectCodecTraits>,
    /// Optional lock provider for the underlying store.
    pub synchronizer: Option<Arc<dyn Synchronizer>>,
    /// Opaque options forwarded to stores that accept them.
    pub storage_options: BTreeMap<String, String>,
    /// Synthetic source identity for stores without a filesystem path.
    pub source_name: Option<String>,
    /// The schema namespaces loaded by the caller.
    pub type_map: TypeMap,
    /// Optional progress callback for chunk-stream writes.
    pub progress: Option<ProgressCallback>,
}

impl OpenOptions {
    /// Create options with `mode` and defaults for everything else.
    #[must_use]
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            cache_spec: true,
            consolidate_metadata: true,
            parallel_workers: 1,
            object_codec: Arc::new(JsonObjectCodec),
            synchronizer: None,
            storage_options: BTreeMap::new(),
            source_name: None,
            type_map: TypeMap::new(),
            progress: None,
        }
    }

    /// Set whether the schema cache is written.
    #[must_use]
    pub fn cache_spec(mut self, cache_spec: bool) -> Self {
        self.cache_spec = cache_spec;
        self
    }

    /// Set whether the consolidated index is refreshed after write.
    #[must_use]
    pub fn consolidate_metadata(mut self, consolidate: bool) -> Self {
        self.consolidate_metadata = consolidate;
        self
    }

    /// Set the worker count for chunk-stream writes.
    #[must_use]
    pub fn parallel_workers(mut self, workers: usize) -> Self {
        self.parallel_workers = workers.max(1);
        self
    }

    /// Set the object codec.
    #[must_use]
    pub fn object_codec(mut self, codec: Arc<dyn ObjectCodecTraits>) -> Self {
        self.object_codec = codec;
        self
    }

    /// Set the store synchronizer.
    #[must_use]
    pub fn synchronizer(mut self, synchronizer: Arc<dyn Synchronizer>) -> Self {
        self.synchronizer = Some(synchronizer);
        self
    }

    /// Set an opaque storage option.
    #[must_use]
    pub fn storage_option(mut self, key: &str, value: &str) -> Self {
        self.storage_options
            .insert(key.to_string(), value.to_string());
        self
    }

    /// Set the synthetic source identity.
    #[must_use]
    pub fn source_name(mut self, source: &str) -> Self {
        self.source_name = Some(source.to_string());
        self
    }

    /// Set the schema namespaces.
    #[must_use]
    pub fn type_map(mut self, type_map: TypeMap) -> Self {
        self.type_map = type_map;
        self
    }

    /// Set the progress callback.
    #[must_use]
    pub fn progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self::new(Mode::Create)
    }
}

impl core::fmt::Debug for OpenOptions {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OpenOptions")
            .field("mode", &self.mode)
            .field("cache_spec", &self.cache_spec)
            .field("consolidate_metadata", &self.consolidate_metadata)
            .field("parallel_workers", &self.parallel_workers)
            .field("object_codec", &self.object_codec.id())
            .field("synchronizer", &self.synchronizer)
            .field("storage_options", &self.storage_options)
            .field("source_name", &self.source_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = OpenOptions::new(Mode::Create);
        assert!(options.cache_spec);
        assert!(options.consolidate_metadata);
        assert_eq!(options.parallel_workers, 1);
        assert_eq!(options.object_codec.id(), "vlen-json");
        assert!(options.mode.is_writable());
        assert!(!Mode::Read.is_writable());
    }

    #[test]
    fn thread_synchronizer_excludes() {
        let sync = Arc::new(ThreadSynchronizer::new());
        let guard = sync.lock("chunk/0.0");
        let other = sync.clone();
        let handle = std::thread::spawn(move || {
            let _guard = other.lock("chunk/0.0");
        });
        // The spawned thread can only finish after the guard drops.
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(!handle.is_finished());
        drop(guard);
        handle.join().unwrap();
    }
}
