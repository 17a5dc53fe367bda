//! The schema cache.
//!
//! Every namespace loaded at write time is serialized under the reserved
//! specifications subtree at `/<specifications>/<namespace>/<version>/<source>`,
//! each source a scalar variable-length UTF-8 dataset holding the schema
//! JSON. The root's `.specloc` attribute points at the subtree. The cache is
//! write-once per `(namespace, version)` within a file.

use crate::{
    builder::ScalarValue,
    dtype::{encode::vlen_encode, Dtype},
    meta::{array_key, attrs_key, chunk_key, group_key, ArrayMetadata, DimensionSeparator,
        GroupMetadata},
    node::NodePath,
    reserved::SPECIFICATIONS,
    storage::WritableStore,
    typemap::{Namespace, SpecSource, TypeMap},
};

use super::{
    read::{GroupHandle, ReadError},
    write::WriteError,
};

/// Write the schema cache for every namespace in `type_map`.
///
/// Existing `(namespace, version)` subtrees are left untouched.
///
/// # Errors
/// Returns a [`WriteError`] on storage failure; callers treat cache failures
/// as non-fatal.
pub(crate) fn write_spec_cache<TStorage: ?Sized + WritableStore>(
    storage: &TStorage,
    type_map: &TypeMap,
) -> Result<(), WriteError> {
    let spec_root = NodePath::root().child(SPECIFICATIONS)?;
    for namespace in type_map.namespaces() {
        let namespace_path = spec_root.child(&namespace.name)?;
        let version_path = namespace_path.child(&namespace.version)?;

        // Write-once per (namespace, version).
        if storage.get(&group_key(&version_path))?.is_some() {
            continue;
        }

        for path in [&spec_root, &namespace_path, &version_path] {
            ensure_group(storage, path)?;
        }
        for source in &namespace.sources {
            let source_path = version_path.child(&source.name)?;
            write_scalar_text(storage, &source_path, &source.json)?;
        }
    }
    Ok(())
}

fn ensure_group<TStorage: ?Sized + WritableStore>(
    storage: &TStorage,
    path: &NodePath,
) -> Result<(), WriteError> {
    let key = group_key(path);
    if storage.get(&key)?.is_none() {
        let bytes = serde_json::to_vec(&GroupMetadata::default())
            .map_err(|err| WriteError::InternalInvariant(err.to_string()))?;
        storage.set(&key, &bytes)?;
    }
    Ok(())
}

/// Write a scalar variable-length UTF-8 dataset holding `text`.
fn write_scalar_text<TStorage: ?Sized + WritableStore>(
    storage: &TStorage,
    path: &NodePath,
    text: &str,
) -> Result<(), WriteError> {
    let metadata = ArrayMetadata {
        filters: Some(vec![serde_json::json!({
            "id": Dtype::Utf8.vlen_filter_id().expect("utf8 is vlen")
        })]),
        ..ArrayMetadata::new(
            vec![],
            vec![],
            Dtype::Utf8.typestr().expect("utf8 typestr"),
            Dtype::Utf8.default_fill_value(),
        )
    };
    let bytes = serde_json::to_vec(&metadata)
        .map_err(|err| WriteError::InternalInvariant(err.to_string()))?;
    storage.set(&array_key(path), &bytes)?;
    storage.set(&attrs_key(path), b"{}")?;
    storage.set(
        &chunk_key(path, &[], DimensionSeparator::Dot),
        &vlen_encode(&[text.to_string()]),
    )?;
    Ok(())
}

/// Load the schema cache from a file's root group.
///
/// Returns an empty [`TypeMap`] when the root carries no `.specloc` or the
/// subtree is empty.
///
/// # Errors
/// Returns a [`ReadError`] if the cache subtree exists but cannot be read.
pub fn read_spec_cache(root: &GroupHandle) -> Result<TypeMap, ReadError> {
    let mut type_map = TypeMap::new();
    let Some(serde_json::Value::String(specloc)) =
        root.raw_attributes()?.get(crate::reserved::SPECLOC).cloned()
    else {
        return Ok(type_map);
    };

    let spec_root = match root.group(specloc.trim_start_matches('/')) {
        Ok(group) => group,
        Err(ReadError::NodeNotFound(_)) => return Ok(type_map),
        Err(err) => return Err(err),
    };

    for namespace_name in spec_root.child_names()? {
        let namespace_group = spec_root.group(&namespace_name)?;
        for version in namespace_group.child_names()? {
            let version_group = namespace_group.group(&version)?;
            let mut sources = vec![];
            for source_name in version_group.child_names()? {
                let dataset = version_group.dataset(&source_name)?;
                let ScalarValue::Str(json) = dataset.read_scalar()? else {
                    return Err(ReadError::Internal(format!(
                        "schema source {source_name} is not text"
                    )));
                };
                sources.push(SpecSource {
                    name: source_name,
                    json,
                });
            }
            type_map
                .register(Namespace {
                    name: namespace_name.clone(),
                    version,
                    sources,
                })
                .map_err(|err| ReadError::Internal(err.to_string()))?;
        }
    }
    Ok(type_map)
}
