//! The read path.
//!
//! A read opens a [`ReadSession`] and hands back a lazy [`GroupHandle`] for
//! the root. Group children are listed only when traversed; a
//! [`DatasetHandle`] loads metadata and attributes but no chunk until its
//! data is asked for; reference elements stay unresolved until dereferenced
//! through the link engine.

use std::{
    collections::{BTreeMap, HashMap},
    path::PathBuf,
    sync::Arc,
};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::warn;

use crate::{
    builder::{
        num_elements, ArrayValue, BuilderId, BuilderTree, CompoundValue, Compressor,
        CompressorError, DatasetBuilder, DatasetIo, DatasetValue, ElementBuffer, ExternalTarget,
        FieldValue, GroupBuilder, LinkBuilder, LinkTarget, RefTarget, ScalarValue, TypeTag,
        ValueError,
    },
    dtype::{
        decode_attributes,
        encode::{compound_from_bytes, fixed_from_bytes, vlen_decode},
        Attributes, Dtype, DtypeError, ObjectCodecError, ObjectCodecTraits,
    },
    link::{resolve_source, LinkRecord, RefSlot, ReferenceRecord, ResolveError, ResolvedNode, SAME_FILE},
    meta::{array_key, attrs_key, chunk_grid, chunk_key, group_key, ArrayMetadata},
    node::{NodeNameError, NodePath, NodePathError},
    reserved::{self, SPECLOC, ZARR_DTYPE, ZARR_LINK},
    storage::{
        read_consolidated, store::DirectoryStore, ConsolidatedMetadata, ListableStore,
        ReadableListableStorage, ReadableStore, StorageError, StoreKey, StorePrefix,
    },
    typemap::TypeMap,
};

use super::{spec_cache, ZarrIo};

/// A read error.
#[derive(Debug, Error)]
pub enum ReadError {
    /// A storage error.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// A dtype reconstruction error.
    #[error(transparent)]
    Dtype(#[from] DtypeError),
    /// An object codec error.
    #[error(transparent)]
    ObjectCodec(#[from] ObjectCodecError),
    /// A compressor error.
    #[error(transparent)]
    Compressor(#[from] CompressorError),
    /// A value layout error.
    #[error(transparent)]
    Value(#[from] ValueError),
    /// An invalid node path.
    #[error(transparent)]
    NodePath(#[from] NodePathError),
    /// An invalid node name.
    #[error(transparent)]
    NodeName(#[from] NodeNameError),
    /// A reference or link resolution error.
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    /// No group or dataset at a path.
    #[error("no group or dataset at {0}")]
    NodeNotFound(String),
    /// The store is not in this backend's format.
    #[error("{0} is not in this backend's format")]
    NotThisFormat(String),
    /// A bug: an internal invariant was violated.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

/// One read session over a file.
///
/// Holds the store, the consolidated index (when present), and the
/// per-session reference-resolution cache. Sessions of external files are
/// opened lazily and kept for the life of this session; the cache is never
/// shared across sessions.
pub struct ReadSession {
    storage: ReadableListableStorage,
    source: String,
    fs_root: Option<PathBuf>,
    consolidated: Option<ConsolidatedMetadata>,
    object_codec: Arc<dyn ObjectCodecTraits>,
    resolve_cache: Mutex<HashMap<(String, String), ResolvedNode>>,
    external_sessions: Mutex<HashMap<String, Arc<ReadSession>>>,
}

impl core::fmt::Debug for ReadSession {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReadSession")
            .field("source", &self.source)
            .field("consolidated", &self.consolidated.is_some())
            .finish_non_exhaustive()
    }
}

impl ReadSession {
    /// Open a session over `storage`.
    ///
    /// # Errors
    /// Returns [`ReadError::NotThisFormat`] if the root group marker is
    /// missing, or a [`ReadError`] on storage failure.
    pub fn open(
        storage: ReadableListableStorage,
        source: String,
        fs_root: Option<PathBuf>,
        object_codec: Arc<dyn ObjectCodecTraits>,
    ) -> Result<Arc<Self>, ReadError> {
        if storage.get(&group_key(&NodePath::root()))?.is_none() {
            return Err(ReadError::NotThisFormat(source));
        }
        // A broken consolidated index is not fatal; fall back to per-node
        // metadata.
        let consolidated = match read_consolidated(&*storage) {
            Ok(consolidated) => consolidated,
            Err(err) => {
                warn!("ignoring unreadable consolidated metadata in {source}: {err}");
                None
            }
        };
        Ok(Arc::new(Self {
            storage,
            source,
            fs_root,
            consolidated,
            object_codec,
            resolve_cache: Mutex::new(HashMap::new()),
            external_sessions: Mutex::new(HashMap::new()),
        }))
    }

    /// The source identity of this session's file.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The filesystem root of this session's file, if it has one.
    #[must_use]
    pub fn source_root(&self) -> Option<PathBuf> {
        self.fs_root.clone()
    }

    /// Read and parse the metadata document at `key`, via the consolidated
    /// index when available.
    fn meta_json(&self, key: &StoreKey) -> Result<Option<serde_json::Value>, ReadError> {
        if let Some(consolidated) = &self.consolidated {
            return Ok(consolidated.get(key).cloned());
        }
        match self.storage.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(|err| {
                StorageError::InvalidMetadata(key.clone(), err.to_string())
            })?)),
            None => Ok(None),
        }
    }

    fn raw_attributes(
        &self,
        path: &NodePath,
    ) -> Result<serde_json::Map<String, serde_json::Value>, ReadError> {
        match self.meta_json(&attrs_key(path))? {
            Some(serde_json::Value::Object(map)) => Ok(map),
            Some(other) => Err(StorageError::InvalidMetadata(
                attrs_key(path),
                format!("attributes document is not an object: {other}"),
            )
            .into()),
            None => Ok(serde_json::Map::new()),
        }
    }

    /// Resolve a reference record to a node handle, consulting and filling
    /// the per-session cache.
    ///
    /// A mismatch between the record's `object_id` and the resolved node's
    /// is logged as a warning; the node is still returned.
    ///
    /// # Errors
    /// Returns a [`ResolveError`] if the record's file is unavailable or its
    /// target path is missing.
    pub fn resolve_record(
        self: &Arc<Self>,
        record: &ReferenceRecord,
    ) -> Result<ResolvedNode, ResolveError> {
        let cache_key = record.cache_key();
        if let Some(node) = self.resolve_cache.lock().get(&cache_key) {
            return Ok(node.clone());
        }

        let session = if record.source == SAME_FILE {
            self.clone()
        } else {
            self.external_session(&record.source)?
        };

        let path = NodePath::new(&record.path).map_err(ReadError::from)?;
        let node = if session.meta_json(&group_key(&path)).map_err(boxed)?.is_some() {
            ResolvedNode::Group(GroupHandle::open(session, path)?)
        } else if session.meta_json(&array_key(&path)).map_err(boxed)?.is_some() {
            ResolvedNode::Dataset(DatasetHandle::open(session, path)?)
        } else {
            return Err(ResolveError::BrokenLink {
                file: record.source.clone(),
                path: record.path.clone(),
            });
        };

        if let (Some(expected), Ok(Some(actual))) = (&record.object_id, node.object_id()) {
            if *expected != actual {
                warn!(
                    "object id mismatch at {} in {}: expected {expected}, found {actual}",
                    record.path, record.source
                );
            }
        }

        self.resolve_cache.lock().insert(cache_key, node.clone());
        Ok(node)
    }

    /// The session of an external file named by `source`, opened on first
    /// use.
    fn external_session(self: &Arc<Self>, source: &str) -> Result<Arc<Self>, ResolveError> {
        if let Some(session) = self.external_sessions.lock().get(source) {
            return Ok(session.clone());
        }

        let Some(fs_root) = &self.fs_root else {
            return Err(ResolveError::ExternalUnavailable {
                file: source.to_string(),
                reason: "the containing file has no filesystem root".to_string(),
            });
        };
        let target_root = resolve_source(fs_root, source);
        if !target_root.is_dir() {
            return Err(ResolveError::ExternalUnavailable {
                file: source.to_string(),
                reason: format!("{} does not exist", target_root.display()),
            });
        }
        let storage = DirectoryStore::new(&target_root).map_err(|err| {
            ResolveError::ExternalUnavailable {
                file: source.to_string(),
                reason: err.to_string(),
            }
        })?;
        let session = Self::open(
            Arc::new(storage),
            target_root.display().to_string(),
            Some(target_root),
            self.object_codec.clone(),
        )
        .map_err(|err| ResolveError::ExternalUnavailable {
            file: source.to_string(),
            reason: err.to_string(),
        })?;
        self.external_sessions
            .lock()
            .insert(source.to_string(), session.clone());
        Ok(session)
    }
}

fn boxed(err: ReadError) -> ResolveError {
    ResolveError::from(err)
}

/// A child of a group.
#[derive(Debug, Clone)]
pub enum ChildNode {
    /// A subgroup.
    Group(GroupHandle),
    /// A dataset.
    Dataset(DatasetHandle),
}

/// A lazy handle on a stored group.
#[derive(Debug, Clone)]
pub struct GroupHandle {
    session: Arc<ReadSession>,
    path: NodePath,
}

impl GroupHandle {
    /// Open the group at `path`.
    ///
    /// # Errors
    /// Returns [`ReadError::NodeNotFound`] if there is no group marker at
    /// `path`.
    pub fn open(session: Arc<ReadSession>, path: NodePath) -> Result<Self, ReadError> {
        if session.meta_json(&group_key(&path))?.is_none() {
            return Err(ReadError::NodeNotFound(path.as_str().to_string()));
        }
        Ok(Self { session, path })
    }

    /// The group's path.
    #[must_use]
    pub fn path(&self) -> &NodePath {
        &self.path
    }

    /// The session this handle reads through.
    #[must_use]
    pub fn session(&self) -> &Arc<ReadSession> {
        &self.session
    }

    /// The raw attributes document, reserved names included.
    ///
    /// # Errors
    /// Returns a [`ReadError`] on storage failure.
    pub fn raw_attributes(
        &self,
    ) -> Result<serde_json::Map<String, serde_json::Value>, ReadError> {
        self.session.raw_attributes(&self.path)
    }

    /// The user attributes, decoded, with reserved names stripped.
    ///
    /// # Errors
    /// Returns a [`ReadError`] on storage failure.
    pub fn attributes(&self) -> Result<Attributes, ReadError> {
        Ok(decode_attributes(&strip_reserved(self.raw_attributes()?)))
    }

    /// The group's object id, if present.
    ///
    /// # Errors
    /// Returns a [`ReadError`] on storage failure.
    pub fn object_id(&self) -> Result<Option<String>, ReadError> {
        Ok(read_object_id(&self.raw_attributes()?))
    }

    /// The group's semantic type, if typed.
    ///
    /// # Errors
    /// Returns a [`ReadError`] on storage failure.
    pub fn type_tag(&self) -> Result<Option<TypeTag>, ReadError> {
        Ok(read_type_tag(&self.raw_attributes()?))
    }

    /// The group's link records, in stored order.
    ///
    /// # Errors
    /// Returns a [`ReadError`] on storage failure or a malformed `zarr_link`.
    pub fn link_records(&self) -> Result<Vec<LinkRecord>, ReadError> {
        match self.raw_attributes()?.get(ZARR_LINK) {
            Some(value) => Ok(serde_json::from_value(value.clone()).map_err(|err| {
                StorageError::InvalidMetadata(attrs_key(&self.path), err.to_string())
            })?),
            None => Ok(vec![]),
        }
    }

    /// The names of the group's subgroups and datasets, sorted, excluding
    /// the schema-cache subtree at the root.
    ///
    /// # Errors
    /// Returns a [`ReadError`] on storage failure.
    pub fn child_names(&self) -> Result<Vec<String>, ReadError> {
        Ok(self.child_entries()?.into_keys().collect())
    }

    fn child_entries(&self) -> Result<BTreeMap<String, bool>, ReadError> {
        let prefix = StorePrefix::try_from(&self.path)
            .map_err(|err| ReadError::Internal(err.to_string()))?;
        let mut entries = BTreeMap::new();

        if let Some(consolidated) = &self.session.consolidated {
            for key in consolidated.metadata.keys() {
                let Some(rest) = key.strip_prefix(prefix.as_str()) else {
                    continue;
                };
                let parts: Vec<&str> = rest.split('/').collect();
                if parts.len() == 2 {
                    if parts[1] == reserved::ZGROUP {
                        entries.insert(parts[0].to_string(), true);
                    } else if parts[1] == reserved::ZARRAY {
                        entries.insert(parts[0].to_string(), false);
                    }
                }
            }
        } else {
            for child_prefix in self.session.storage.list_dir(&prefix)?.prefixes() {
                let Some(name) = child_prefix.name() else {
                    continue;
                };
                let child_path = self.path.child(name)?;
                if self.session.meta_json(&group_key(&child_path))?.is_some() {
                    entries.insert(name.to_string(), true);
                } else if self.session.meta_json(&array_key(&child_path))?.is_some() {
                    entries.insert(name.to_string(), false);
                }
            }
        }

        // The schema cache is a reserved subtree, not user data.
        if self.path.is_root() {
            if let Some(serde_json::Value::String(specloc)) = self.raw_attributes()?.get(SPECLOC)
            {
                entries.remove(specloc.trim_start_matches('/'));
            }
        }
        Ok(entries)
    }

    /// Open the subgroup named `name`.
    ///
    /// # Errors
    /// Returns [`ReadError::NodeNotFound`] if there is no such group.
    pub fn group(&self, name: &str) -> Result<GroupHandle, ReadError> {
        GroupHandle::open(self.session.clone(), self.path.child(name)?)
    }

    /// Open the dataset named `name`.
    ///
    /// # Errors
    /// Returns [`ReadError::NodeNotFound`] if there is no such dataset.
    pub fn dataset(&self, name: &str) -> Result<DatasetHandle, ReadError> {
        DatasetHandle::open(self.session.clone(), self.path.child(name)?)
    }

    /// Open the child named `name`: a subgroup, a dataset, or a link
    /// (resolved through the link engine on this call).
    ///
    /// # Errors
    /// Returns [`ReadError::NodeNotFound`] if no child has the name, or a
    /// resolution error for a broken or unavailable link target.
    pub fn child(&self, name: &str) -> Result<ChildNode, ReadError> {
        let path = self.path.child(name)?;
        if self.session.meta_json(&group_key(&path))?.is_some() {
            return Ok(ChildNode::Group(GroupHandle::open(
                self.session.clone(),
                path,
            )?));
        }
        if self.session.meta_json(&array_key(&path))?.is_some() {
            return Ok(ChildNode::Dataset(DatasetHandle::open(
                self.session.clone(),
                path,
            )?));
        }
        for record in self.link_records()? {
            if record.name == name {
                return Ok(match self.session.resolve_record(&record.to_reference())? {
                    ResolvedNode::Group(group) => ChildNode::Group(group),
                    ResolvedNode::Dataset(dataset) => ChildNode::Dataset(dataset),
                });
            }
        }
        Err(ReadError::NodeNotFound(path.as_str().to_string()))
    }

    /// Return a tree representation of the hierarchy below this group.
    ///
    /// Datasets are annotated with their shape and dtype:
    /// ```text
    /// /
    ///   g1
    ///     d1 [2, 2] int32
    /// ```
    ///
    /// # Errors
    /// Returns a [`ReadError`] on storage failure.
    pub fn hierarchy_tree(&self) -> Result<String, ReadError> {
        fn visit(group: &GroupHandle, out: &mut String, depth: usize) -> Result<(), ReadError> {
            for (name, is_group) in group.child_entries()? {
                out.push_str(&"  ".repeat(depth));
                if is_group {
                    out.push_str(&name);
                    out.push('\n');
                    visit(&group.group(&name)?, out, depth + 1)?;
                } else {
                    let dataset = group.dataset(&name)?;
                    out.push_str(&format!(
                        "{name} {:?} {}\n",
                        dataset.shape(),
                        dataset.dtype().declared_name()
                    ));
                }
            }
            Ok(())
        }

        let mut out = String::new();
        out.push_str(self.path.as_str());
        out.push('\n');
        visit(self, &mut out, 1)?;
        Ok(out)
    }

    /// Materialize the stored tree below this group as builders.
    ///
    /// Datasets are read in full; reference elements come back as records,
    /// and links as external targets (`"."` naming this file). Chunk shapes
    /// and compressors are carried as per-dataset overrides so a rewrite
    /// preserves them.
    ///
    /// # Errors
    /// Returns a [`ReadError`] on the first node that cannot be read.
    pub fn materialize(&self) -> Result<BuilderTree, ReadError> {
        let mut tree = BuilderTree::new();
        let root = tree.root;
        self.fill_group(&mut tree, root)?;
        Ok(tree)
    }

    fn fill_group(&self, tree: &mut BuilderTree, id: BuilderId) -> Result<(), ReadError> {
        {
            let Some(group) = tree.arena.group(id) else {
                return Err(ReadError::Internal(format!("builder {id} is not a group")));
            };
            debug_assert!(group.children.is_empty());
        }
        let attributes = self.attributes()?;
        let object_id = self.object_id()?;
        let type_tag = self.type_tag()?;
        match tree.arena.node_mut(id) {
            Ok(crate::builder::BuilderNode::Group(group)) => {
                group.attributes = attributes;
                group.object_id = object_id;
                group.type_tag = type_tag;
            }
            _ => return Err(ReadError::Internal(format!("builder {id} is not a group"))),
        }

        for (name, is_group) in self.child_entries()? {
            if is_group {
                let child = tree.arena.insert_group(GroupBuilder::new(&name));
                tree.arena
                    .add_child(id, child)
                    .map_err(|err| ReadError::Internal(err.to_string()))?;
                self.group(&name)?.fill_group(tree, child)?;
            } else {
                let dataset = self.dataset(&name)?.materialize_dataset()?;
                let child = tree.arena.insert_dataset(dataset);
                tree.arena
                    .add_child(id, child)
                    .map_err(|err| ReadError::Internal(err.to_string()))?;
            }
        }

        for record in self.link_records()? {
            let link = LinkBuilder::new(
                &record.name,
                LinkTarget::External(ExternalTarget {
                    file: PathBuf::from(&record.source),
                    path: record.path.clone(),
                    object_id: record.object_id.clone(),
                    source_object_id: record.source_object_id.clone(),
                    extra: record.extra.clone(),
                }),
            );
            let child = tree.arena.insert_link(link);
            tree.arena
                .add_child(id, child)
                .map_err(|err| ReadError::Internal(err.to_string()))?;
        }
        Ok(())
    }
}

/// A lazy handle on a stored dataset.
///
/// Opening a handle reads the array metadata and attributes; chunk data is
/// not touched until one of the readers is called.
#[derive(Debug, Clone)]
pub struct DatasetHandle {
    session: Arc<ReadSession>,
    path: NodePath,
    metadata: ArrayMetadata,
    dtype: Dtype,
    raw_attrs: serde_json::Map<String, serde_json::Value>,
}

impl DatasetHandle {
    /// Open the dataset at `path`.
    ///
    /// # Errors
    /// Returns [`ReadError::NodeNotFound`] if there is no array metadata at
    /// `path`, or a [`ReadError`] if the metadata cannot be interpreted.
    pub fn open(session: Arc<ReadSession>, path: NodePath) -> Result<Self, ReadError> {
        let Some(metadata) = session.meta_json(&array_key(&path))? else {
            return Err(ReadError::NodeNotFound(path.as_str().to_string()));
        };
        let metadata: ArrayMetadata = serde_json::from_value(metadata).map_err(|err| {
            StorageError::InvalidMetadata(array_key(&path), err.to_string())
        })?;
        let raw_attrs = session.raw_attributes(&path)?;
        let dtype = Dtype::from_storage(
            &metadata.dtype,
            metadata.filters.as_deref(),
            raw_attrs.get(ZARR_DTYPE),
        )?;
        Ok(Self {
            session,
            path,
            metadata,
            dtype,
            raw_attrs,
        })
    }

    /// The dataset's path.
    #[must_use]
    pub fn path(&self) -> &NodePath {
        &self.path
    }

    /// The dataset's shape.
    #[must_use]
    pub fn shape(&self) -> &[u64] {
        &self.metadata.shape
    }

    /// The dataset's chunk shape.
    #[must_use]
    pub fn chunk_shape(&self) -> &[u64] {
        &self.metadata.chunks
    }

    /// The dataset's semantic dtype.
    #[must_use]
    pub fn dtype(&self) -> &Dtype {
        &self.dtype
    }

    /// The stored array metadata.
    #[must_use]
    pub fn metadata(&self) -> &ArrayMetadata {
        &self.metadata
    }

    /// The user attributes, decoded, with reserved names stripped.
    #[must_use]
    pub fn attributes(&self) -> Attributes {
        decode_attributes(&strip_reserved(self.raw_attrs.clone()))
    }

    /// The dataset's object id, if present.
    #[must_use]
    pub fn object_id(&self) -> Option<String> {
        read_object_id(&self.raw_attrs)
    }

    /// The dataset's semantic type, if typed.
    #[must_use]
    pub fn type_tag(&self) -> Option<TypeTag> {
        read_type_tag(&self.raw_attrs)
    }

    /// Read one chunk's bytes, decompressed, or [`None`] for an unwritten
    /// chunk.
    fn read_chunk_bytes(&self, indices: &[u64]) -> Result<Option<Vec<u8>>, ReadError> {
        let key = chunk_key(&self.path, indices, self.metadata.separator());
        let Some(bytes) = self.session.storage.get(&key)? else {
            return Ok(None);
        };
        match &self.metadata.compressor {
            None => Ok(Some(bytes)),
            Some(config) => match Compressor::from_config(config) {
                Some(compressor) => Ok(Some(compressor.decompress(&bytes)?)),
                None => Err(StorageError::Unsupported(format!(
                    "compressor {config} is not supported by this build"
                ))
                .into()),
            },
        }
    }

    /// Read the whole dataset as an array value.
    ///
    /// Unwritten chunks read back as the fill value.
    ///
    /// # Errors
    /// Returns a [`ReadError`] if the dataset is reference- or
    /// compound-typed, or on a storage or decoding failure.
    pub fn read_array(&self) -> Result<ArrayValue, ReadError> {
        if matches!(self.dtype, Dtype::Reference(_) | Dtype::Compound(_)) {
            return Err(DtypeError::UnsupportedStorage(format!(
                "dataset {} holds {} data",
                self.path,
                self.dtype.declared_name()
            ))
            .into());
        }

        let shape = &self.metadata.shape;
        let chunks = &self.metadata.chunks;
        let fill = ScalarValue::from_json(&self.metadata.fill_value);
        let mut buffer = ElementBuffer::filled(&self.dtype, num_elements(shape), fill.as_ref())
            .ok_or_else(|| {
                ReadError::Internal(format!("no buffer variant for {}", self.dtype.declared_name()))
            })?;

        for indices in chunk_grid(shape, chunks) {
            let Some(bytes) = self.read_chunk_bytes(&indices)? else {
                continue;
            };
            let block = if self.dtype.is_vlen_string() {
                ElementBuffer::Str(vlen_decode(&bytes)?)
            } else {
                fixed_from_bytes(&self.dtype, &bytes)?
            };
            let origin: Vec<u64> = indices
                .iter()
                .zip(chunks)
                .map(|(&index, &chunk)| index * chunk)
                .collect();
            buffer.place_block(shape, &origin, chunks, &block)?;
        }
        ArrayValue::new(shape.clone(), buffer).map_err(Into::into)
    }

    /// Read a zero-dimensional dataset as a scalar.
    ///
    /// # Errors
    /// Returns a [`ReadError`] if the dataset is not zero-dimensional.
    pub fn read_scalar(&self) -> Result<ScalarValue, ReadError> {
        if !self.metadata.shape.is_empty() {
            return Err(ReadError::Internal(format!(
                "dataset {} has shape {:?}, not a scalar",
                self.path, self.metadata.shape
            )));
        }
        let array = self.read_array()?;
        buffer_first_scalar(&array.elements).ok_or_else(|| {
            ReadError::Internal(format!("scalar dataset {} is empty", self.path))
        })
    }

    /// Read the elements of an object-coded dataset.
    fn object_elements(&self) -> Result<Vec<serde_json::Value>, ReadError> {
        let filter_id = self
            .metadata
            .filters
            .as_deref()
            .and_then(<[serde_json::Value]>::first)
            .and_then(|filter| filter.get("id"))
            .and_then(serde_json::Value::as_str);
        let codec = &self.session.object_codec;
        if filter_id != Some(codec.id()) {
            return Err(StorageError::Unsupported(format!(
                "object codec {filter_id:?} of {} does not match the session codec {}",
                self.path,
                codec.id()
            ))
            .into());
        }

        let total = self.metadata.shape.first().copied().unwrap_or(0) as usize;
        let mut elements = Vec::with_capacity(total);
        for indices in chunk_grid(&self.metadata.shape, &self.metadata.chunks) {
            let Some(bytes) = self.read_chunk_bytes(&indices)? else {
                continue;
            };
            elements.extend(codec.decode(&bytes)?);
        }
        elements.truncate(total);
        Ok(elements)
    }

    /// Read the reference records of a reference-typed dataset.
    ///
    /// # Errors
    /// Returns a [`ReadError`] if the dataset is not reference-typed or on a
    /// storage or codec failure.
    pub fn reference_records(&self) -> Result<Vec<ReferenceRecord>, ReadError> {
        if !matches!(self.dtype, Dtype::Reference(_)) {
            return Err(DtypeError::UnsupportedStorage(format!(
                "dataset {} is not reference-typed",
                self.path
            ))
            .into());
        }
        self.object_elements()?
            .into_iter()
            .map(|element| {
                serde_json::from_value(element).map_err(|err| {
                    DtypeError::MalformedChunk(format!(
                        "reference element of {}: {err}",
                        self.path
                    ))
                    .into()
                })
            })
            .collect()
    }

    /// The reference slots of a reference-typed dataset; each resolves
    /// lazily on first dereference.
    ///
    /// # Errors
    /// Returns a [`ReadError`] if the dataset is not reference-typed or on a
    /// storage or codec failure.
    pub fn references(&self) -> Result<Vec<RefSlot>, ReadError> {
        Ok(self
            .reference_records()?
            .into_iter()
            .map(RefSlot::new)
            .collect())
    }

    /// Read a compound dataset's records.
    ///
    /// # Errors
    /// Returns a [`ReadError`] if the dataset is not compound-typed or on a
    /// storage or decoding failure.
    pub fn read_compound(&self) -> Result<CompoundValue, ReadError> {
        let Dtype::Compound(fields) = &self.dtype else {
            return Err(DtypeError::UnsupportedStorage(format!(
                "dataset {} is not compound-typed",
                self.path
            ))
            .into());
        };

        // Packed records are a structured physical dtype; everything else
        // went through the object codec.
        if self.metadata.dtype.is_array() {
            let mut bytes = vec![];
            for indices in chunk_grid(&self.metadata.shape, &self.metadata.chunks) {
                if let Some(chunk) = self.read_chunk_bytes(&indices)? {
                    bytes.extend(chunk);
                }
            }
            let mut rows = compound_from_bytes(fields, &bytes)?;
            rows.truncate(self.metadata.shape.first().copied().unwrap_or(0) as usize);
            return Ok(CompoundValue { rows });
        }

        let mut rows = Vec::new();
        for element in self.object_elements()? {
            let serde_json::Value::Object(object) = element else {
                return Err(DtypeError::MalformedChunk(format!(
                    "compound record of {} is not an object",
                    self.path
                ))
                .into());
            };
            let mut row = Vec::with_capacity(fields.len());
            for field in fields {
                let value = object.get(&field.name).ok_or_else(|| {
                    DtypeError::MalformedChunk(format!(
                        "compound record of {} is missing field {}",
                        self.path, field.name
                    ))
                })?;
                row.push(match &field.dtype {
                    Dtype::Reference(_) => {
                        let record: ReferenceRecord = serde_json::from_value(value.clone())
                            .map_err(|err| {
                                DtypeError::MalformedChunk(format!(
                                    "reference field {} of {}: {err}",
                                    field.name, self.path
                                ))
                            })?;
                        FieldValue::Ref(RefTarget::Record(record))
                    }
                    _ => FieldValue::Scalar(ScalarValue::from_json(value).ok_or_else(|| {
                        DtypeError::MalformedChunk(format!(
                            "field {} of {} is not a scalar",
                            field.name, self.path
                        ))
                    })?),
                });
            }
            rows.push(row);
        }
        Ok(CompoundValue { rows })
    }

    /// Read the dataset's full value, dispatching on its dtype and shape.
    ///
    /// # Errors
    /// Returns a [`ReadError`] on a storage or decoding failure.
    pub fn read_value(&self) -> Result<DatasetValue, ReadError> {
        Ok(match &self.dtype {
            Dtype::Reference(_) => DatasetValue::References(
                self.reference_records()?
                    .into_iter()
                    .map(RefTarget::Record)
                    .collect(),
            ),
            Dtype::Compound(_) => DatasetValue::Compound(self.read_compound()?),
            _ if self.metadata.shape.is_empty() => DatasetValue::Scalar(self.read_scalar()?),
            _ => DatasetValue::Array(self.read_array()?),
        })
    }

    /// Rebuild a dataset builder from the stored dataset, carrying chunk
    /// shape, compressor, and layout as overrides.
    fn materialize_dataset(&self) -> Result<DatasetBuilder, ReadError> {
        let name = self
            .path
            .name()
            .ok_or_else(|| ReadError::Internal("dataset at root path".to_string()))?;
        let mut dataset = DatasetBuilder::new(name, self.dtype.clone(), self.read_value()?);
        dataset.attributes = self.attributes();
        dataset.object_id = self.object_id();
        dataset.type_tag = self.type_tag();
        dataset.io = DatasetIo {
            chunk_shape: (!self.metadata.shape.is_empty()).then(|| self.metadata.chunks.clone()),
            compressor: self
                .metadata
                .compressor
                .as_ref()
                .and_then(Compressor::from_config),
            fill_value: None,
            object_codec: None,
            dimension_separator: self.metadata.dimension_separator,
        };
        Ok(dataset)
    }
}

impl<TStorage: ReadableStore + ListableStore + 'static> ZarrIo<TStorage> {
    /// Open a read session and return the lazy root group.
    ///
    /// # Errors
    /// Returns a [`ReadError`] if the store is missing, not in this
    /// backend's format, or fails.
    pub fn read(&self) -> Result<GroupHandle, ReadError> {
        let storage: ReadableListableStorage = self.storage().clone();
        let session = ReadSession::open(
            storage,
            self.source().to_string(),
            self.fs_root().map(std::path::Path::to_path_buf),
            self.options().object_codec.clone(),
        )?;
        GroupHandle::open(session, NodePath::root())
    }

    /// Load the schema namespaces cached in the file.
    ///
    /// # Errors
    /// Returns a [`ReadError`] if the cache subtree cannot be read.
    pub fn load_type_map(&self) -> Result<TypeMap, ReadError> {
        spec_cache::read_spec_cache(&self.read()?)
    }
}

fn strip_reserved(
    mut attrs: serde_json::Map<String, serde_json::Value>,
) -> serde_json::Map<String, serde_json::Value> {
    attrs.retain(|name, _| !reserved::is_reserved_attribute(name));
    attrs
}

fn read_object_id(attrs: &serde_json::Map<String, serde_json::Value>) -> Option<String> {
    attrs
        .get(reserved::OBJECT_ID)
        .and_then(serde_json::Value::as_str)
        .map(ToString::to_string)
}

fn read_type_tag(attrs: &serde_json::Map<String, serde_json::Value>) -> Option<TypeTag> {
    let type_name = attrs
        .get(reserved::NEURODATA_TYPE)
        .and_then(serde_json::Value::as_str)?;
    let namespace = attrs
        .get(reserved::NAMESPACE)
        .and_then(serde_json::Value::as_str)?;
    Some(TypeTag {
        type_name: type_name.to_string(),
        namespace: namespace.to_string(),
    })
}

fn buffer_first_scalar(buffer: &ElementBuffer) -> Option<ScalarValue> {
    Some(match buffer {
        ElementBuffer::Int8(v) => ScalarValue::Int(i64::from(*v.first()?)),
        ElementBuffer::Int16(v) => ScalarValue::Int(i64::from(*v.first()?)),
        ElementBuffer::Int32(v) => ScalarValue::Int(i64::from(*v.first()?)),
        ElementBuffer::Int64(v) => ScalarValue::Int(*v.first()?),
        ElementBuffer::UInt8(v) => ScalarValue::Uint(u64::from(*v.first()?)),
        ElementBuffer::UInt16(v) => ScalarValue::Uint(u64::from(*v.first()?)),
        ElementBuffer::UInt32(v) => ScalarValue::Uint(u64::from(*v.first()?)),
        ElementBuffer::UInt64(v) => ScalarValue::Uint(*v.first()?),
        ElementBuffer::Float32(v) => ScalarValue::Float(f64::from(*v.first()?)),
        ElementBuffer::Float64(v) => ScalarValue::Float(*v.first()?),
        ElementBuffer::Bool(v) => ScalarValue::Bool(*v.first()?),
        ElementBuffer::Str(v) => ScalarValue::Str(v.first()?.clone()),
    })
}
