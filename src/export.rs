//! The export coordinator.
//!
//! An export walks a source file as a read-only builder tree and rewrites it
//! into a destination store, preserving structure, dtypes, chunk shapes,
//! compressor choices, and links and references. Same-file records keep
//! their paths (the walk is an identity map over in-file paths, and object
//! ids are carried over, so `source_object_id` stays valid); external
//! records are re-anchored so that their `source` is relative to the
//! destination root. On error the destination may be incomplete and must be
//! discarded.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::{
    builder::{
        BuilderNode, BuilderTree, DatasetValue, ExternalTarget, LinkTarget, RefTarget,
    },
    dtype::{AttrValue, Dtype},
    io::{read::ReadError, write::WriteError, GroupHandle, ZarrIo},
    link::{resolve_source, ReferenceRecord, SAME_FILE},
    storage::{ListableStore, WritableStore},
};

/// An export error.
#[derive(Debug, Error)]
pub enum ExportError {
    /// Walking the source failed.
    #[error(transparent)]
    Read(#[from] ReadError),
    /// Writing the destination failed.
    #[error(transparent)]
    Write(#[from] WriteError),
    /// The source could not produce a builder tree.
    #[error("source walk failed: {0}")]
    Source(String),
}

/// Export options.
#[derive(Debug, Clone, Copy)]
pub struct ExportOptions {
    /// Normalize byte-string (ASCII) datasets to variable-length UTF-8
    /// (default true). Text that is not valid UTF-8 keeps its dtype.
    pub normalize_text: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            normalize_text: true,
        }
    }
}

/// A readable hierarchical source for an export.
///
/// This backend's [`GroupHandle`] implements it; a foreign hierarchical
/// backend (e.g. an HDF5 reader) joins an export by implementing it too:
/// produce a builder tree with per-dataset chunk and compressor hints
/// attached, and report the filesystem root the tree's external records are
/// relative to.
pub trait SourceTree {
    /// The filesystem root of the source file, if it has one.
    fn source_root(&self) -> Option<PathBuf>;

    /// Walk the source into a builder tree.
    ///
    /// Link targets and reference values must come back as records (or
    /// external targets) whose `source` fields are relative to
    /// [`source_root`](Self::source_root).
    ///
    /// # Errors
    /// Returns [`ExportError`] if the source cannot be walked.
    fn to_tree(&self) -> Result<BuilderTree, ExportError>;
}

impl SourceTree for GroupHandle {
    fn source_root(&self) -> Option<PathBuf> {
        // Relative record sources resolve against the file root recorded at
        // session open; a pathless (memory) session exports same-file
        // records only.
        self.session().source_root()
    }

    fn to_tree(&self) -> Result<BuilderTree, ExportError> {
        Ok(self.materialize()?)
    }
}

/// Export `src` into the destination handle `dst`.
///
/// For each dataset the source's chunk shape and compressor are inherited
/// when compatible with this backend; unknown compressors fall back to the
/// default (uncompressed). Unknown keys inside link records survive the
/// rewrite.
///
/// # Errors
/// Returns an [`ExportError`] on the first failure; the destination is then
/// partial and must be discarded.
pub fn export<TSource, TStorage>(
    src: &TSource,
    dst: &ZarrIo<TStorage>,
    options: &ExportOptions,
) -> Result<(), ExportError>
where
    TSource: SourceTree + ?Sized,
    TStorage: WritableStore + ListableStore + ?Sized,
{
    let mut tree = src.to_tree()?;
    let src_root = src.source_root();
    rewrite_tree(&mut tree, src_root.as_deref(), options);
    dst.write(&mut tree)?;
    Ok(())
}

/// Re-anchor external records against the destination and apply dtype
/// normalizations.
fn rewrite_tree(tree: &mut BuilderTree, src_root: Option<&Path>, options: &ExportOptions) {
    for id in tree.arena.ids() {
        match tree.arena.node_mut(id).expect("id from arena iteration") {
            BuilderNode::Group(group) => {
                for value in group.attributes.values_mut() {
                    rewrite_attr(value, src_root);
                }
            }
            BuilderNode::Dataset(dataset) => {
                for value in dataset.attributes.values_mut() {
                    rewrite_attr(value, src_root);
                }
                match &mut dataset.value {
                    DatasetValue::References(targets) => {
                        for target in targets {
                            rewrite_target(target, src_root);
                        }
                    }
                    DatasetValue::Compound(compound) => {
                        for row in &mut compound.rows {
                            for field in row {
                                if let crate::builder::FieldValue::Ref(target) = field {
                                    rewrite_target(target, src_root);
                                }
                            }
                        }
                    }
                    _ => {}
                }
                if options.normalize_text && dataset.dtype == Dtype::Ascii {
                    // Materialized text is UTF-8 by construction.
                    dataset.dtype = Dtype::Utf8;
                }
            }
            BuilderNode::Link(link) => {
                if let LinkTarget::External(target) = &mut link.target {
                    rewrite_external(target, src_root);
                }
            }
        }
    }
}

fn rewrite_attr(value: &mut AttrValue, src_root: Option<&Path>) {
    match value {
        AttrValue::Ref(reference) => rewrite_target(&mut reference.target, src_root),
        AttrValue::List(values) => {
            for value in values {
                rewrite_attr(value, src_root);
            }
        }
        AttrValue::Map(map) => {
            for value in map.values_mut() {
                rewrite_attr(value, src_root);
            }
        }
        _ => {}
    }
}

fn rewrite_target(target: &mut RefTarget, src_root: Option<&Path>) {
    match target {
        RefTarget::Record(record) => {
            if let Some(external) = external_from_record(record, src_root) {
                *target = RefTarget::External(external);
            }
        }
        RefTarget::External(external) => rewrite_external(external, src_root),
        RefTarget::Local(_) => {}
    }
}

fn rewrite_external(target: &mut ExternalTarget, src_root: Option<&Path>) {
    // A "." file is the same-file marker; the identity map keeps it in-file.
    if target.file == Path::new(SAME_FILE) {
        return;
    }
    // Re-anchor a source-relative location to an absolute one; the write
    // engine recomputes it relative to the destination root (and collapses
    // it to "." when the target is the destination itself).
    if let Some(root) = src_root {
        if target.file.is_relative() {
            target.file = resolve_source(root, &target.file.display().to_string());
        }
    }
}

/// Same-file records pass through unchanged; external records become
/// absolute external targets for the write engine to re-anchor.
fn external_from_record(
    record: &ReferenceRecord,
    src_root: Option<&Path>,
) -> Option<ExternalTarget> {
    if record.source == SAME_FILE {
        return None;
    }
    let file = match src_root {
        Some(root) => resolve_source(root, &record.source),
        None => PathBuf::from(&record.source),
    };
    Some(ExternalTarget {
        file,
        path: record.path.clone(),
        object_id: record.object_id.clone(),
        source_object_id: record.source_object_id.clone(),
        extra: record.extra.clone(),
    })
}
