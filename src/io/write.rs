//! The write path.
//!
//! A write traverses the builder tree in pre-order. A node's attributes are
//! durable before its children are written; link records are merged into
//! their group's attributes in a second pass, after every target exists.
//! Schema-cache and consolidation failures are logged and non-fatal; any
//! other error aborts the call and leaves the store partial (there is no
//! rollback).

use std::{
    collections::{HashMap, HashSet},
    sync::atomic::{AtomicU64, Ordering},
};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::warn;

use crate::{
    builder::{
        num_elements, BuilderId, BuilderNode, BuilderTree, Chunk, ChunkIterator, Compressor,
        CompressorError, CompoundValue, DatasetBuilder, DatasetIo, DatasetValue, ElementBuffer,
        FieldValue, GroupBuilder, LinkTarget, RefTarget, ScalarValue, UnknownBuilderId,
        ValueError,
    },
    dtype::{
        encode::{compound_to_bytes, fixed_to_bytes, vlen_encode},
        encode_attributes, AttributeEncodeError, Attributes, Dtype, DtypeError, ObjectCodecError,
        RefKind,
    },
    link::{relative_source, LinkRecord, ReferenceRecord},
    meta::{array_key, attrs_key, chunk_grid, chunk_key, group_key, ArrayMetadata, GroupMetadata},
    node::{NodeName, NodeNameError, NodePath},
    reserved::{self, SPECLOC, ZARR_DTYPE, ZARR_LINK},
    storage::{consolidate_metadata, ListableStore, StorageError, WritableStore},
};

use super::{spec_cache, ZarrIo};

/// A write error.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The handle was opened in read mode.
    #[error("file opened in read mode cannot be written")]
    ReadOnlyMode,
    /// A storage error.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// An attribute encoding error.
    #[error(transparent)]
    Attribute(#[from] AttributeEncodeError),
    /// A dtype mapping error.
    #[error(transparent)]
    Dtype(#[from] DtypeError),
    /// An object codec error.
    #[error(transparent)]
    ObjectCodec(#[from] ObjectCodecError),
    /// A value layout error.
    #[error(transparent)]
    Value(#[from] ValueError),
    /// A compressor error.
    #[error(transparent)]
    Compressor(#[from] CompressorError),
    /// An invalid node name in the builder tree.
    #[error(transparent)]
    NodeName(#[from] NodeNameError),
    /// A builder id not in the tree arena.
    #[error(transparent)]
    UnknownBuilder(#[from] UnknownBuilderId),
    /// A user attribute shadowing a reserved name.
    #[error("user attribute {name} at {path} collides with a reserved name")]
    ReservedAttribute {
        /// Path of the node carrying the attribute.
        path: String,
        /// The reserved name.
        name: String,
    },
    /// An append wrote a different value for an existing attribute.
    #[error("attribute {name} at {path} conflicts with the existing value")]
    AttributeConflict {
        /// Path of the node carrying the attribute.
        path: String,
        /// Attribute name.
        name: String,
    },
    /// A chunk coordinate written twice by one stream.
    #[error("chunk {indices:?} of {path} was written twice")]
    OverlappingChunks {
        /// Dataset path.
        path: String,
        /// The duplicated chunk grid indices.
        indices: Vec<u64>,
    },
    /// A chunk outside the declared dataset shape.
    #[error("chunk {indices:?} of {path} is outside the declared shape")]
    ChunkOutOfBounds {
        /// Dataset path.
        path: String,
        /// The offending chunk grid indices.
        indices: Vec<u64>,
    },
    /// A chunk stream failed.
    #[error("chunk stream for {path} failed: {reason}")]
    ChunkSource {
        /// Dataset path.
        path: String,
        /// The stream's error.
        reason: String,
    },
    /// A region-reference dataset; reserved but unsupported.
    #[error("region references are reserved but not supported (dataset {path})")]
    RegionReference {
        /// Dataset path.
        path: String,
    },
    /// A link whose target cannot be encoded.
    #[error("link {name} at {path} cannot be encoded: {reason}")]
    UnresolvableLink {
        /// Path of the group holding the link.
        path: String,
        /// Link name.
        name: String,
        /// Why the target has no record.
        reason: String,
    },
    /// A bug: an internal invariant was violated.
    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
}

/// Read-only facts about the tree, computed up front so that reference
/// resolution never needs the arena during the mutable traversal.
struct TreeIndex {
    /// Pre-order ids of groups and datasets, with their paths.
    ordered: Vec<(BuilderId, NodePath)>,
    paths: HashMap<BuilderId, NodePath>,
    object_ids: HashMap<BuilderId, Option<String>>,
    root_object_id: String,
}

impl TreeIndex {
    fn build(tree: &BuilderTree, root_object_id: String) -> Result<Self, WriteError> {
        let mut index = Self {
            ordered: vec![],
            paths: HashMap::new(),
            object_ids: HashMap::new(),
            root_object_id,
        };
        index.visit_group(tree, tree.root, NodePath::root())?;
        Ok(index)
    }

    fn visit_group(
        &mut self,
        tree: &BuilderTree,
        id: BuilderId,
        path: NodePath,
    ) -> Result<(), WriteError> {
        let group = tree
            .arena
            .group(id)
            .ok_or_else(|| WriteError::InternalInvariant(format!("builder {id} is not a group")))?;
        self.record(id, path.clone(), group.object_id.clone())?;

        let mut names = HashSet::new();
        for &child in &group.children {
            let node = tree.arena.node(child)?;
            if !names.insert(node.name().to_string()) {
                return Err(WriteError::InternalInvariant(format!(
                    "duplicate child name {} in group {path}",
                    node.name()
                )));
            }
            match node {
                BuilderNode::Group(child_group) => {
                    let name = NodeName::new(&child_group.name)?;
                    self.visit_group(tree, child, path.child_name(&name))?;
                }
                BuilderNode::Dataset(dataset) => {
                    let name = NodeName::new(&dataset.name)?;
                    self.record(child, path.child_name(&name), dataset.object_id.clone())?;
                }
                BuilderNode::Link(link) => {
                    // Links occupy a name but have no on-disk node.
                    NodeName::new(&link.name)?;
                }
            }
        }
        Ok(())
    }

    fn record(
        &mut self,
        id: BuilderId,
        path: NodePath,
        object_id: Option<String>,
    ) -> Result<(), WriteError> {
        if self.paths.insert(id, path.clone()).is_some() {
            return Err(WriteError::InternalInvariant(format!(
                "builder {id} appears under two parents"
            )));
        }
        self.ordered.push((id, path));
        self.object_ids.insert(id, object_id);
        Ok(())
    }

    /// Turn a reference target into a stored record.
    fn reference_record(
        &self,
        target: &RefTarget,
        fs_root: Option<&std::path::Path>,
    ) -> Result<ReferenceRecord, String> {
        match target {
            RefTarget::Local(id) => {
                let path = self
                    .paths
                    .get(id)
                    .ok_or_else(|| format!("builder {id} is not part of the written tree"))?;
                let object_id = self.object_ids.get(id).cloned().flatten();
                Ok(ReferenceRecord::same_file(
                    path.as_str(),
                    object_id,
                    Some(self.root_object_id.clone()),
                ))
            }
            RefTarget::External(target) => {
                let source = match fs_root {
                    Some(root) => relative_source(root, &target.file),
                    None => target.file.display().to_string(),
                };
                Ok(ReferenceRecord {
                    source,
                    path: target.path.clone(),
                    object_id: target.object_id.clone(),
                    source_object_id: target.source_object_id.clone(),
                    extra: target.extra.clone(),
                })
            }
            RefTarget::Record(record) => Ok(record.clone()),
        }
    }
}

impl<TStorage: ?Sized + WritableStore + ListableStore> ZarrIo<TStorage> {
    /// Write `tree` into the store.
    ///
    /// In append and read-write modes existing nodes are merged: identical
    /// attribute values are a no-op and divergent values fail with
    /// [`WriteError::AttributeConflict`]; existing dataset data is left
    /// untouched.
    ///
    /// The root group is assigned an object id if the builder has none; the
    /// id is written back into `tree`.
    ///
    /// # Errors
    /// Returns a [`WriteError`] on the first failure. The store may be left
    /// partial; callers should treat a failed write as a dirty file.
    pub fn write(&self, tree: &mut BuilderTree) -> Result<(), WriteError> {
        if !self.mode().is_writable() {
            return Err(WriteError::ReadOnlyMode);
        }

        // The root carries an object id; mint one when the builder has none.
        let root_object_id = match &tree.root_group().object_id {
            Some(id) => id.clone(),
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                tree.root_group_mut().object_id = Some(id.clone());
                id
            }
        };

        let index = TreeIndex::build(tree, root_object_id)?;

        // Pass 1: groups and datasets, parents before children.
        for (id, path) in &index.ordered {
            match tree.arena.node_mut(*id)? {
                BuilderNode::Group(group) => {
                    let attrs = self.group_attributes(group, path, &index)?;
                    self.put_group(path, attrs)?;
                }
                BuilderNode::Dataset(dataset) => {
                    self.put_dataset(path, dataset, &index)?;
                }
                BuilderNode::Link(_) => {
                    return Err(WriteError::InternalInvariant(format!(
                        "link builder {id} assigned a node path"
                    )))
                }
            }
        }

        // Pass 2: link records, now that every target exists.
        for (id, path) in &index.ordered {
            if let BuilderNode::Group(group) = tree.arena.node(*id)? {
                let records = self.link_records(group, path, tree, &index)?;
                if !records.is_empty() {
                    self.merge_link_records(path, records)?;
                }
            }
        }

        // The schema cache is best-effort: failures are logged, the tree is
        // already written.
        if self.options().cache_spec && !self.options().type_map.is_empty() {
            if let Err(err) =
                spec_cache::write_spec_cache(&**self.storage(), &self.options().type_map)
            {
                warn!("schema cache write failed: {err}");
            }
        }

        if self.options().consolidate_metadata {
            if let Err(err) = consolidate_metadata(&**self.storage()) {
                warn!("consolidated metadata refresh failed: {err}");
            }
        }

        Ok(())
    }

    fn group_attributes(
        &self,
        group: &GroupBuilder,
        path: &NodePath,
        index: &TreeIndex,
    ) -> Result<serde_json::Map<String, serde_json::Value>, WriteError> {
        check_reserved(&group.attributes, path)?;
        let fs_root = self.fs_root();
        let mut resolve = |target: &RefTarget| index.reference_record(target, fs_root);
        let mut attrs = encode_attributes(&group.attributes, path, &mut resolve)?;
        if let Some(object_id) = &group.object_id {
            attrs.insert(reserved::OBJECT_ID.to_string(), object_id.clone().into());
        }
        if let Some(tag) = &group.type_tag {
            attrs.insert(
                reserved::NEURODATA_TYPE.to_string(),
                tag.type_name.clone().into(),
            );
            attrs.insert(reserved::NAMESPACE.to_string(), tag.namespace.clone().into());
        }
        if path.is_root() && self.options().cache_spec && !self.options().type_map.is_empty() {
            attrs.insert(SPECLOC.to_string(), reserved::SPECIFICATIONS.into());
        }
        Ok(attrs)
    }

    fn put_group(
        &self,
        path: &NodePath,
        attrs: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), WriteError> {
        let marker = group_key(path);
        if self.storage().get(&marker)?.is_none() {
            let metadata = serde_json::to_vec(&GroupMetadata::default())
                .map_err(|err| WriteError::InternalInvariant(err.to_string()))?;
            self.storage().set(&marker, &metadata)?;
        }
        self.put_attributes(path, attrs)
    }

    /// Write `attrs` at `path`, merging with any existing document.
    fn put_attributes(
        &self,
        path: &NodePath,
        attrs: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), WriteError> {
        let key = attrs_key(path);
        let merged = match self.storage().get(&key)? {
            Some(existing) => {
                let existing: serde_json::Map<String, serde_json::Value> =
                    serde_json::from_slice(&existing).map_err(|err| {
                        StorageError::InvalidMetadata(key.clone(), err.to_string())
                    })?;
                merge_attribute_documents(existing, attrs, path)?
            }
            None => attrs,
        };
        let bytes = serde_json::to_vec(&merged)
            .map_err(|err| WriteError::InternalInvariant(err.to_string()))?;
        self.storage().set(&key, &bytes)?;
        Ok(())
    }

    fn link_records(
        &self,
        group: &GroupBuilder,
        path: &NodePath,
        tree: &BuilderTree,
        index: &TreeIndex,
    ) -> Result<Vec<LinkRecord>, WriteError> {
        let mut records = vec![];
        for &child in &group.children {
            if let BuilderNode::Link(link) = tree.arena.node(child)? {
                let target = match &link.target {
                    LinkTarget::Local(id) => RefTarget::Local(*id),
                    LinkTarget::External(target) => RefTarget::External(target.clone()),
                };
                let reference = index
                    .reference_record(&target, self.fs_root())
                    .map_err(|reason| WriteError::UnresolvableLink {
                        path: path.as_str().to_string(),
                        name: link.name.clone(),
                        reason,
                    })?;
                records.push(LinkRecord {
                    name: link.name.clone(),
                    source: reference.source,
                    path: reference.path,
                    object_id: reference.object_id,
                    source_object_id: reference.source_object_id,
                    extra: reference.extra,
                });
            }
        }
        Ok(records)
    }

    /// Merge `records` into the group's `zarr_link` attribute.
    fn merge_link_records(
        &self,
        path: &NodePath,
        records: Vec<LinkRecord>,
    ) -> Result<(), WriteError> {
        let key = attrs_key(path);
        let mut attrs: serde_json::Map<String, serde_json::Value> =
            match self.storage().get(&key)? {
                Some(existing) => serde_json::from_slice(&existing)
                    .map_err(|err| StorageError::InvalidMetadata(key.clone(), err.to_string()))?,
                None => serde_json::Map::new(),
            };

        let mut merged: Vec<LinkRecord> = match attrs.get(ZARR_LINK) {
            Some(existing) => serde_json::from_value(existing.clone())
                .map_err(|err| StorageError::InvalidMetadata(key.clone(), err.to_string()))?,
            None => vec![],
        };
        for record in records {
            match merged.iter().find(|existing| existing.name == record.name) {
                Some(existing) if *existing == record => {}
                Some(_) => {
                    return Err(WriteError::AttributeConflict {
                        path: path.as_str().to_string(),
                        name: record.name,
                    })
                }
                None => merged.push(record),
            }
        }

        attrs.insert(
            ZARR_LINK.to_string(),
            serde_json::to_value(&merged)
                .map_err(|err| WriteError::InternalInvariant(err.to_string()))?,
        );
        let bytes = serde_json::to_vec(&attrs)
            .map_err(|err| WriteError::InternalInvariant(err.to_string()))?;
        self.storage().set(&key, &bytes)?;
        Ok(())
    }

    fn put_dataset(
        &self,
        path: &NodePath,
        dataset: &mut DatasetBuilder,
        index: &TreeIndex,
    ) -> Result<(), WriteError> {
        check_reserved(&dataset.attributes, path)?;
        if has_region_reference(&dataset.dtype) {
            return Err(WriteError::RegionReference {
                path: path.as_str().to_string(),
            });
        }

        let dtype = dataset.dtype.clone();
        let io = dataset.io.clone();

        // Append mode: an existing dataset keeps its data, only attributes
        // merge.
        let exists = self.storage().get(&array_key(path))?.is_some();
        if !exists {
            match &mut dataset.value {
                DatasetValue::Scalar(scalar) => {
                    self.write_array_data(path, &dtype, &io, &[], Some(scalar), None)?;
                }
                DatasetValue::Array(array) => {
                    if !array.elements.matches_dtype(&dtype) {
                        return Err(ValueError::MismatchedBuffer(format!(
                            "dataset {path} buffer does not store dtype {}",
                            dtype.declared_name()
                        ))
                        .into());
                    }
                    let expected = num_elements(&array.shape);
                    if array.elements.len() != expected {
                        return Err(ValueError::ShapeMismatch {
                            shape: array.shape.clone(),
                            expected,
                            actual: array.elements.len(),
                        }
                        .into());
                    }
                    self.write_array_data(
                        path,
                        &dtype,
                        &io,
                        &array.shape,
                        None,
                        Some(&array.elements),
                    )?;
                }
                DatasetValue::Compound(compound) => {
                    self.write_compound_data(path, &dtype, &io, compound, index)?;
                }
                DatasetValue::References(targets) => {
                    self.write_reference_data(path, &dtype, &io, targets, index)?;
                }
                DatasetValue::Stream(iterator) => {
                    self.write_stream_data(path, &dtype, &io, iterator.as_mut())?;
                }
            }
        }

        let fs_root = self.fs_root();
        let mut resolve = |target: &RefTarget| index.reference_record(target, fs_root);
        let mut attrs = encode_attributes(&dataset.attributes, path, &mut resolve)?;
        if let Some(zarr_dtype) = dtype.zarr_dtype_value() {
            attrs.insert(ZARR_DTYPE.to_string(), zarr_dtype);
        }
        if let Some(object_id) = &dataset.object_id {
            attrs.insert(reserved::OBJECT_ID.to_string(), object_id.clone().into());
        }
        if let Some(tag) = &dataset.type_tag {
            attrs.insert(
                reserved::NEURODATA_TYPE.to_string(),
                tag.type_name.clone().into(),
            );
            attrs.insert(reserved::NAMESPACE.to_string(), tag.namespace.clone().into());
        }
        self.put_attributes(path, attrs)
    }

    /// Write scalar, fixed, and variable-length string array data.
    fn write_array_data(
        &self,
        path: &NodePath,
        dtype: &Dtype,
        io: &DatasetIo,
        shape: &[u64],
        scalar: Option<&ScalarValue>,
        elements: Option<&ElementBuffer>,
    ) -> Result<(), WriteError> {
        let owned;
        let buffer = match (scalar, elements) {
            (Some(scalar), None) => {
                owned = ElementBuffer::filled(dtype, 1, Some(scalar)).ok_or_else(|| {
                    WriteError::InternalInvariant(format!(
                        "scalar value for non-scalar dtype {} at {path}",
                        dtype.declared_name()
                    ))
                })?;
                &owned
            }
            (None, Some(elements)) => elements,
            _ => {
                return Err(WriteError::InternalInvariant(
                    "array write needs exactly one of scalar or elements".to_string(),
                ))
            }
        };

        let chunks = chunk_shape_for(shape, io);
        let metadata = array_metadata_for(dtype, shape, &chunks, io);
        self.put_array_metadata(path, &metadata)?;

        if shape.is_empty() {
            let bytes = encode_buffer(dtype, buffer)?;
            return self.store_chunk(path, &[], &bytes, io);
        }

        for indices in chunk_grid(shape, &chunks) {
            let origin: Vec<u64> = indices
                .iter()
                .zip(&chunks)
                .map(|(&index, &chunk)| index * chunk)
                .collect();
            let block = buffer.extract_block(shape, &origin, &chunks, io.fill_value.as_ref());
            let bytes = encode_buffer(dtype, &block)?;
            self.store_chunk(path, &indices, &bytes, io)?;
        }
        Ok(())
    }

    fn write_compound_data(
        &self,
        path: &NodePath,
        dtype: &Dtype,
        io: &DatasetIo,
        compound: &CompoundValue,
        index: &TreeIndex,
    ) -> Result<(), WriteError> {
        let Dtype::Compound(fields) = dtype else {
            return Err(WriteError::InternalInvariant(format!(
                "compound value with dtype {} at {path}",
                dtype.declared_name()
            )));
        };
        let rows = compound.rows.len() as u64;
        let shape = vec![rows];
        let chunks = vec![rows.max(1)];

        let packable = dtype.fixed_size().is_some()
            && compound
                .rows
                .iter()
                .all(|row| row.iter().all(|field| matches!(field, FieldValue::Scalar(_))));

        if packable {
            let metadata = array_metadata_for(dtype, &shape, &chunks, io);
            self.put_array_metadata(path, &metadata)?;
            let bytes = compound_to_bytes(fields, &compound.rows)?;
            return self.store_chunk(path, &[0], &bytes, io);
        }

        // Mixed or reference-bearing compounds go through the object codec,
        // one JSON object per record.
        let mut elements = Vec::with_capacity(compound.rows.len());
        for row in &compound.rows {
            if row.len() != fields.len() {
                return Err(DtypeError::MalformedChunk(format!(
                    "record has {} fields, dtype declares {}",
                    row.len(),
                    fields.len()
                ))
                .into());
            }
            let mut object = serde_json::Map::new();
            for (field, value) in fields.iter().zip(row) {
                let json = match value {
                    FieldValue::Scalar(scalar) => scalar.to_json(),
                    FieldValue::Ref(target) => {
                        let record = index
                            .reference_record(target, self.fs_root())
                            .map_err(WriteError::InternalInvariant)?;
                        serde_json::to_value(&record)
                            .map_err(|err| WriteError::InternalInvariant(err.to_string()))?
                    }
                };
                object.insert(field.name.clone(), json);
            }
            elements.push(serde_json::Value::Object(object));
        }
        self.write_object_data(path, dtype, io, &shape, &chunks, &elements)
    }

    fn write_reference_data(
        &self,
        path: &NodePath,
        dtype: &Dtype,
        io: &DatasetIo,
        targets: &[RefTarget],
        index: &TreeIndex,
    ) -> Result<(), WriteError> {
        let shape = vec![targets.len() as u64];
        let chunks = match &io.chunk_shape {
            Some(chunks) => chunks.clone(),
            None => vec![(targets.len() as u64).max(1)],
        };
        let mut elements = Vec::with_capacity(targets.len());
        for target in targets {
            let record = index
                .reference_record(target, self.fs_root())
                .map_err(WriteError::InternalInvariant)?;
            elements.push(
                serde_json::to_value(&record)
                    .map_err(|err| WriteError::InternalInvariant(err.to_string()))?,
            );
        }
        self.write_object_data(path, dtype, io, &shape, &chunks, &elements)
    }

    /// Write one-dimensional object-coded data.
    fn write_object_data(
        &self,
        path: &NodePath,
        dtype: &Dtype,
        io: &DatasetIo,
        shape: &[u64],
        chunks: &[u64],
        elements: &[serde_json::Value],
    ) -> Result<(), WriteError> {
        let codec = io
            .object_codec
            .as_ref()
            .unwrap_or(&self.options().object_codec);
        let mut metadata = array_metadata_for(dtype, shape, chunks, io);
        metadata.filters = Some(vec![serde_json::json!({ "id": codec.id() })]);
        self.put_array_metadata(path, &metadata)?;

        let chunk_len = chunks.first().copied().unwrap_or(1).max(1);
        let grid = shape.first().copied().unwrap_or(0).div_ceil(chunk_len);
        for index in 0..grid {
            let start = (index * chunk_len) as usize;
            let end = (start + chunk_len as usize).min(elements.len());
            let mut chunk: Vec<serde_json::Value> = elements[start..end].to_vec();
            chunk.resize(chunk_len as usize, serde_json::Value::Null);
            let bytes = codec.encode(&chunk)?;
            self.store_chunk(path, &[index], &bytes, io)?;
        }
        Ok(())
    }

    /// Drain a chunk stream into the dataset, serially or via a worker pool.
    fn write_stream_data(
        &self,
        path: &NodePath,
        dtype: &Dtype,
        io: &DatasetIo,
        iterator: &mut dyn ChunkIterator,
    ) -> Result<(), WriteError> {
        let maxshape = iterator.maxshape();
        let chunks = iterator.chunk_shape();
        if maxshape.len() != chunks.len() || chunks.iter().any(|&chunk| chunk == 0) {
            return Err(WriteError::InternalInvariant(format!(
                "chunk stream for {path} declares inconsistent shape {maxshape:?} / chunks {chunks:?}"
            )));
        }

        // Unlimited dimensions start at zero and grow to the written extent.
        let initial_shape: Vec<u64> = maxshape.iter().map(|dim| dim.unwrap_or(0)).collect();
        let metadata = array_metadata_for(dtype, &initial_shape, &chunks, io);
        self.put_array_metadata(path, &metadata)?;

        let total_chunks = maxshape
            .iter()
            .zip(&chunks)
            .map(|(&max, &chunk)| max.map(|max| max.div_ceil(chunk)))
            .product::<Option<u64>>();

        let mut written: HashSet<Vec<u64>> = HashSet::new();
        let mut extents = initial_shape.clone();
        let progress_count = AtomicU64::new(0);

        let workers = self.options().parallel_workers;
        if workers > 1 && iterator.parallel_safe() {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .build()
                .map_err(|err| WriteError::InternalInvariant(err.to_string()))?;
            let first_error: Mutex<Option<WriteError>> = Mutex::new(None);
            pool.scope(|scope| loop {
                if first_error.lock().is_some() {
                    break;
                }
                let Some(item) = iterator.next_chunk() else {
                    break;
                };
                let prepared = match item {
                    Err(err) => Err(WriteError::ChunkSource {
                        path: path.as_str().to_string(),
                        reason: err.to_string(),
                    }),
                    Ok(chunk) => self.prepare_stream_chunk(
                        path, dtype, io, &maxshape, &chunks, &mut written, &mut extents, chunk,
                    ),
                };
                match prepared {
                    Err(err) => {
                        set_first_error(&first_error, err);
                        break;
                    }
                    Ok((indices, buffer)) => {
                        let first_error = &first_error;
                        let progress_count = &progress_count;
                        scope.spawn(move |_| {
                            match self.encode_and_store(path, dtype, io, &indices, &buffer) {
                                Ok(()) => {
                                    let done = progress_count.fetch_add(1, Ordering::Relaxed) + 1;
                                    if let Some(progress) = &self.options().progress {
                                        progress(path.as_str(), done, total_chunks);
                                    }
                                }
                                Err(err) => set_first_error(first_error, err),
                            }
                        });
                    }
                }
            });
            if let Some(err) = first_error.into_inner() {
                return Err(err);
            }
        } else {
            while let Some(item) = iterator.next_chunk() {
                let chunk = item.map_err(|err| WriteError::ChunkSource {
                    path: path.as_str().to_string(),
                    reason: err.to_string(),
                })?;
                let (indices, buffer) = self.prepare_stream_chunk(
                    path, dtype, io, &maxshape, &chunks, &mut written, &mut extents, chunk,
                )?;
                self.encode_and_store(path, dtype, io, &indices, &buffer)?;
                let done = progress_count.fetch_add(1, Ordering::Relaxed) + 1;
                if let Some(progress) = &self.options().progress {
                    progress(path.as_str(), done, total_chunks);
                }
            }
        }

        // Fix up the shape now that the written extent is known.
        let final_shape: Vec<u64> = maxshape
            .iter()
            .zip(&extents)
            .map(|(&max, &extent)| max.unwrap_or(extent))
            .collect();
        if final_shape != initial_shape {
            let metadata = ArrayMetadata {
                shape: final_shape,
                ..metadata
            };
            self.put_array_metadata(path, &metadata)?;
        }
        Ok(())
    }

    /// Validate a stream chunk and expand a clipped edge chunk to the full
    /// chunk shape. Runs in the owning task.
    #[allow(clippy::too_many_arguments)]
    fn prepare_stream_chunk(
        &self,
        path: &NodePath,
        dtype: &Dtype,
        io: &DatasetIo,
        maxshape: &[Option<u64>],
        chunks: &[u64],
        written: &mut HashSet<Vec<u64>>,
        extents: &mut [u64],
        chunk: Chunk,
    ) -> Result<(Vec<u64>, ElementBuffer), WriteError> {
        let Chunk { indices, elements } = chunk;
        if indices.len() != chunks.len() {
            return Err(WriteError::InternalInvariant(format!(
                "chunk indices {indices:?} for {path} have wrong dimensionality"
            )));
        }
        if !elements.matches_dtype(dtype) {
            return Err(ValueError::MismatchedBuffer(format!(
                "stream chunk for {path} does not store dtype {}",
                dtype.declared_name()
            ))
            .into());
        }

        // The clipped shape of this chunk against the declared bounds.
        let mut clipped = Vec::with_capacity(chunks.len());
        for ((&index, &chunk_dim), &max) in indices.iter().zip(chunks.iter()).zip(maxshape) {
            let begin = index * chunk_dim;
            let extent = match max {
                Some(max) if begin >= max => 0,
                Some(max) => chunk_dim.min(max - begin),
                None => chunk_dim,
            };
            if extent == 0 {
                return Err(WriteError::ChunkOutOfBounds {
                    path: path.as_str().to_string(),
                    indices: indices.clone(),
                });
            }
            clipped.push(extent);
        }

        if !written.insert(indices.clone()) {
            return Err(WriteError::OverlappingChunks {
                path: path.as_str().to_string(),
                indices,
            });
        }
        for (dim, extent) in extents.iter_mut().enumerate() {
            *extent = (*extent).max(indices[dim] * chunks[dim] + clipped[dim]);
        }

        let full: usize = chunks.iter().product::<u64>() as usize;
        let clipped_len: usize = clipped.iter().product::<u64>() as usize;
        let buffer = if elements.len() == full {
            elements
        } else if elements.len() == clipped_len {
            let mut expanded = ElementBuffer::filled(dtype, full, io.fill_value.as_ref())
                .ok_or_else(|| {
                    WriteError::InternalInvariant(format!(
                        "chunk stream for non-array dtype {} at {path}",
                        dtype.declared_name()
                    ))
                })?;
            let origin = vec![0u64; chunks.len()];
            expanded.place_block(chunks, &origin, &clipped, &elements)?;
            expanded
        } else {
            return Err(ValueError::ShapeMismatch {
                shape: clipped,
                expected: full,
                actual: elements.len(),
            }
            .into());
        };
        Ok((indices, buffer))
    }

    fn encode_and_store(
        &self,
        path: &NodePath,
        dtype: &Dtype,
        io: &DatasetIo,
        indices: &[u64],
        buffer: &ElementBuffer,
    ) -> Result<(), WriteError> {
        let bytes = encode_buffer(dtype, buffer)?;
        self.store_chunk(path, indices, &bytes, io)
    }

    fn put_array_metadata(
        &self,
        path: &NodePath,
        metadata: &ArrayMetadata,
    ) -> Result<(), WriteError> {
        let bytes = serde_json::to_vec(metadata)
            .map_err(|err| WriteError::InternalInvariant(err.to_string()))?;
        self.storage().set(&array_key(path), &bytes)?;
        Ok(())
    }

    fn store_chunk(
        &self,
        path: &NodePath,
        indices: &[u64],
        bytes: &[u8],
        io: &DatasetIo,
    ) -> Result<(), WriteError> {
        let compressed;
        let payload = match io.compressor {
            Some(compressor) => {
                compressed = compressor.compress(bytes)?;
                compressed.as_slice()
            }
            None => bytes,
        };
        let key = chunk_key(path, indices, io.dimension_separator.unwrap_or_default());
        let _guard = self
            .options()
            .synchronizer
            .as_ref()
            .map(|synchronizer| synchronizer.lock(key.as_str()));
        self.storage().set(&key, payload)?;
        Ok(())
    }
}

fn set_first_error(slot: &Mutex<Option<WriteError>>, err: WriteError) {
    let mut guard = slot.lock();
    if guard.is_none() {
        *guard = Some(err);
    }
}

/// Reject user attributes shadowing reserved names.
fn check_reserved(attrs: &Attributes, path: &NodePath) -> Result<(), WriteError> {
    for name in attrs.keys() {
        if reserved::is_reserved_attribute(name) {
            return Err(WriteError::ReservedAttribute {
                path: path.as_str().to_string(),
                name: name.clone(),
            });
        }
    }
    Ok(())
}

fn has_region_reference(dtype: &Dtype) -> bool {
    match dtype {
        Dtype::Reference(RefKind::Region) => true,
        Dtype::Compound(fields) => fields
            .iter()
            .any(|field| has_region_reference(&field.dtype)),
        _ => false,
    }
}

/// The chunk shape of a dataset: the per-dataset override, or one chunk
/// spanning the whole dataset.
fn chunk_shape_for(shape: &[u64], io: &DatasetIo) -> Vec<u64> {
    match &io.chunk_shape {
        Some(chunks) if chunks.len() == shape.len() => {
            chunks.iter().map(|&chunk| chunk.max(1)).collect()
        }
        _ => shape.iter().map(|&dim| dim.max(1)).collect(),
    }
}

fn array_metadata_for(dtype: &Dtype, shape: &[u64], chunks: &[u64], io: &DatasetIo) -> ArrayMetadata {
    let mut metadata = ArrayMetadata::new(
        shape.to_vec(),
        chunks.to_vec(),
        dtype.typestr().unwrap_or_else(|_| "|O".into()),
        io.fill_value
            .as_ref()
            .map_or_else(|| dtype.default_fill_value(), ScalarValue::to_json),
    );
    metadata.compressor = io.compressor.map(Compressor::to_config);
    metadata.filters = dtype
        .vlen_filter_id()
        .map(|id| vec![serde_json::json!({ "id": id })]);
    metadata.dimension_separator = io.dimension_separator;
    metadata
}

fn encode_buffer(dtype: &Dtype, buffer: &ElementBuffer) -> Result<Vec<u8>, WriteError> {
    if dtype.is_vlen_string() {
        let ElementBuffer::Str(strings) = buffer else {
            return Err(ValueError::MismatchedBuffer(format!(
                "dtype {} expects a string buffer",
                dtype.declared_name()
            ))
            .into());
        };
        Ok(vlen_encode(strings))
    } else {
        Ok(fixed_to_bytes(buffer)?)
    }
}

/// Merge a fresh attributes document over an existing one: new keys are
/// added, identical values are a no-op, and divergent values conflict.
fn merge_attribute_documents(
    existing: serde_json::Map<String, serde_json::Value>,
    fresh: serde_json::Map<String, serde_json::Value>,
    path: &NodePath,
) -> Result<serde_json::Map<String, serde_json::Value>, WriteError> {
    let mut merged = existing;
    for (name, value) in fresh {
        match merged.get(&name) {
            Some(current) if *current == value => {}
            Some(_) => {
                return Err(WriteError::AttributeConflict {
                    path: path.as_str().to_string(),
                    name,
                })
            }
            None => {
                merged.insert(name, value);
            }
        }
    }
    Ok(merged)
}
