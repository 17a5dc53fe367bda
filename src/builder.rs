//! The in-memory builder model.
//!
//! A file is described by a [`BuilderTree`]: an arena of group, dataset, and
//! link builders indexed by [`BuilderId`]. Children and reference targets
//! are ids, never owned subtrees, so reference cycles (two datasets
//! referring to each other) are representable and are never traversed
//! recursively.
//!
//! Builders are produced by the upstream data-modeling framework and handed
//! to the backend for a write, append, or export; the backend does not
//! retain them beyond the call.

mod chunks;
mod dataset_io;
mod value;

use std::path::PathBuf;

use derive_more::Display;
use thiserror::Error;

use crate::{dtype::Attributes, dtype::Dtype, link::ReferenceRecord};

pub use chunks::{Chunk, ChunkIterator, ChunkSourceError};
pub use dataset_io::{Compressor, CompressorError, DatasetIo};
pub use value::{
    num_elements, ArrayValue, CompoundValue, DatasetValue, ElementBuffer, FieldValue, ScalarValue,
    ValueError,
};

/// The index of a builder node within its [`BuilderArena`].
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("{_0}")]
pub struct BuilderId(u32);

/// The semantic type of a typed group or dataset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeTag {
    /// The type name.
    pub type_name: String,
    /// The namespace defining the type.
    pub namespace: String,
}

/// A group builder: named, with ordered children and attributes.
#[derive(Debug, Default)]
pub struct GroupBuilder {
    /// Group name within its parent.
    pub name: String,
    /// Group attributes.
    pub attributes: Attributes,
    /// Child builders, in insertion order.
    pub children: Vec<BuilderId>,
    /// Object id, if the group is typed or is the root.
    pub object_id: Option<String>,
    /// Semantic type, if typed.
    pub type_tag: Option<TypeTag>,
}

impl GroupBuilder {
    /// Create a new empty group builder named `name`.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
}

/// A dataset builder: named, with a value, dtype, and attributes.
#[derive(Debug)]
pub struct DatasetBuilder {
    /// Dataset name within its parent.
    pub name: String,
    /// Dataset attributes.
    pub attributes: Attributes,
    /// Declared dtype.
    pub dtype: Dtype,
    /// The dataset value.
    pub value: DatasetValue,
    /// Per-dataset storage overrides.
    pub io: DatasetIo,
    /// Object id, if the dataset is typed.
    pub object_id: Option<String>,
    /// Semantic type, if typed.
    pub type_tag: Option<TypeTag>,
}

impl DatasetBuilder {
    /// Create a new dataset builder named `name` with `dtype` and `value`.
    #[must_use]
    pub fn new(name: &str, dtype: Dtype, value: DatasetValue) -> Self {
        Self {
            name: name.to_string(),
            attributes: Attributes::new(),
            dtype,
            value,
            io: DatasetIo::default(),
            object_id: None,
            type_tag: None,
        }
    }
}

/// A link builder: named, pointing at a target builder or external node.
#[derive(Debug)]
pub struct LinkBuilder {
    /// Link name within its parent group.
    pub name: String,
    /// The link target.
    pub target: LinkTarget,
}

impl LinkBuilder {
    /// Create a new link builder named `name` pointing at `target`.
    #[must_use]
    pub fn new(name: &str, target: LinkTarget) -> Self {
        Self {
            name: name.to_string(),
            target,
        }
    }
}

/// The target of a link.
#[derive(Debug)]
pub enum LinkTarget {
    /// A builder in the same tree (a soft link).
    Local(BuilderId),
    /// A node in another file (an external link).
    External(ExternalTarget),
}

/// A node in another file, named by that file's location and an in-file path.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct ExternalTarget {
    /// The location of the target's file.
    pub file: PathBuf,
    /// Absolute path of the target within its file.
    pub path: String,
    /// The target's object id, if typed.
    pub object_id: Option<String>,
    /// The root object id of the target's file.
    pub source_object_id: Option<String>,
    /// Record keys this backend does not interpret, preserved across
    /// rewrites.
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The target of an object reference.
#[derive(Clone, Debug, PartialEq)]
pub enum RefTarget {
    /// A builder in the same tree. Cycles are expressed as repeated ids.
    Local(BuilderId),
    /// A node in another file.
    External(ExternalTarget),
    /// An already-encoded record (as produced by a read or an export walk).
    Record(ReferenceRecord),
}

/// A node in a [`BuilderArena`].
#[derive(Debug)]
pub enum BuilderNode {
    /// A group.
    Group(GroupBuilder),
    /// A dataset.
    Dataset(DatasetBuilder),
    /// A link.
    Link(LinkBuilder),
}

impl BuilderNode {
    /// The node's name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Group(group) => &group.name,
            Self::Dataset(dataset) => &dataset.name,
            Self::Link(link) => &link.name,
        }
    }
}

/// An unknown [`BuilderId`] error.
#[derive(Debug, Error)]
#[error("unknown builder id {0}")]
pub struct UnknownBuilderId(BuilderId);

/// The arena owning every builder of a tree.
#[derive(Debug, Default)]
pub struct BuilderArena {
    nodes: Vec<BuilderNode>,
}

impl BuilderArena {
    /// Create a new empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node, returning its id.
    ///
    /// # Panics
    /// Panics if the arena holds more than `u32::MAX` nodes.
    pub fn insert(&mut self, node: BuilderNode) -> BuilderId {
        let id = BuilderId(u32::try_from(self.nodes.len()).expect("arena size exceeds u32"));
        self.nodes.push(node);
        id
    }

    /// Insert a group, returning its id.
    pub fn insert_group(&mut self, group: GroupBuilder) -> BuilderId {
        self.insert(BuilderNode::Group(group))
    }

    /// Insert a dataset, returning its id.
    pub fn insert_dataset(&mut self, dataset: DatasetBuilder) -> BuilderId {
        self.insert(BuilderNode::Dataset(dataset))
    }

    /// Insert a link, returning its id.
    pub fn insert_link(&mut self, link: LinkBuilder) -> BuilderId {
        self.insert(BuilderNode::Link(link))
    }

    /// Record `child` as a child of the group `parent`.
    ///
    /// # Errors
    /// Returns [`UnknownBuilderId`] if `parent` is not a group in this arena.
    pub fn add_child(&mut self, parent: BuilderId, child: BuilderId) -> Result<(), UnknownBuilderId> {
        match self.nodes.get_mut(parent.0 as usize) {
            Some(BuilderNode::Group(group)) => {
                group.children.push(child);
                Ok(())
            }
            _ => Err(UnknownBuilderId(parent)),
        }
    }

    /// The node with id `id`.
    ///
    /// # Errors
    /// Returns [`UnknownBuilderId`] if `id` is not in this arena.
    pub fn node(&self, id: BuilderId) -> Result<&BuilderNode, UnknownBuilderId> {
        self.nodes.get(id.0 as usize).ok_or(UnknownBuilderId(id))
    }

    /// The node with id `id`, mutably.
    ///
    /// # Errors
    /// Returns [`UnknownBuilderId`] if `id` is not in this arena.
    pub fn node_mut(&mut self, id: BuilderId) -> Result<&mut BuilderNode, UnknownBuilderId> {
        self.nodes.get_mut(id.0 as usize).ok_or(UnknownBuilderId(id))
    }

    /// The group with id `id`, or [`None`] if `id` is not a group.
    #[must_use]
    pub fn group(&self, id: BuilderId) -> Option<&GroupBuilder> {
        match self.nodes.get(id.0 as usize) {
            Some(BuilderNode::Group(group)) => Some(group),
            _ => None,
        }
    }

    /// The dataset with id `id`, or [`None`] if `id` is not a dataset.
    #[must_use]
    pub fn dataset(&self, id: BuilderId) -> Option<&DatasetBuilder> {
        match self.nodes.get(id.0 as usize) {
            Some(BuilderNode::Dataset(dataset)) => Some(dataset),
            _ => None,
        }
    }

    /// The ids of every node in the arena, in insertion order.
    #[must_use]
    pub fn ids(&self) -> Vec<BuilderId> {
        (0..self.nodes.len())
            .map(|index| BuilderId(u32::try_from(index).expect("arena size fits u32")))
            .collect()
    }

    /// The number of nodes in the arena.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the arena is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// A rooted builder tree: an arena plus the id of its root group.
#[derive(Debug)]
pub struct BuilderTree {
    /// The arena owning every node.
    pub arena: BuilderArena,
    /// The root group id.
    pub root: BuilderId,
}

impl BuilderTree {
    /// Create a tree whose root is a new empty group.
    ///
    /// The root group's name is not used; the root is always at `/`.
    #[must_use]
    pub fn new() -> Self {
        let mut arena = BuilderArena::new();
        let root = arena.insert_group(GroupBuilder::new("root"));
        Self { arena, root }
    }

    /// The root group.
    ///
    /// # Panics
    /// Panics if the root id does not name a group (an arena misuse).
    #[must_use]
    pub fn root_group(&self) -> &GroupBuilder {
        self.arena.group(self.root).expect("root is a group")
    }

    /// The root group, mutably.
    ///
    /// # Panics
    /// Panics if the root id does not name a group (an arena misuse).
    pub fn root_group_mut(&mut self) -> &mut GroupBuilder {
        match self.arena.node_mut(self.root) {
            Ok(BuilderNode::Group(group)) => group,
            _ => panic!("root is a group"),
        }
    }
}

impl Default for BuilderTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_insert_and_lookup() {
        let mut tree = BuilderTree::new();
        let g1 = tree.arena.insert_group(GroupBuilder::new("g1"));
        tree.arena.add_child(tree.root, g1).unwrap();
        let d1 = tree.arena.insert_dataset(DatasetBuilder::new(
            "d1",
            Dtype::Int32,
            DatasetValue::Scalar(ScalarValue::Int(7)),
        ));
        tree.arena.add_child(g1, d1).unwrap();

        assert_eq!(tree.root_group().children, vec![g1]);
        assert_eq!(tree.arena.group(g1).unwrap().children, vec![d1]);
        assert_eq!(tree.arena.dataset(d1).unwrap().name, "d1");
        assert!(tree.arena.group(d1).is_none());
    }

    #[test]
    fn add_child_rejects_non_group() {
        let mut tree = BuilderTree::new();
        let d1 = tree.arena.insert_dataset(DatasetBuilder::new(
            "d1",
            Dtype::Int32,
            DatasetValue::Scalar(ScalarValue::Int(7)),
        ));
        let other = tree.arena.insert_dataset(DatasetBuilder::new(
            "d2",
            Dtype::Int32,
            DatasetValue::Scalar(ScalarValue::Int(8)),
        ));
        assert!(tree.arena.add_child(d1, other).is_err());
    }

    #[test]
    fn reference_cycle_is_representable() {
        let mut tree = BuilderTree::new();
        let a = tree.arena.insert_dataset(DatasetBuilder::new(
            "a",
            Dtype::Reference(crate::dtype::RefKind::Object),
            DatasetValue::References(vec![]),
        ));
        let b = tree.arena.insert_dataset(DatasetBuilder::new(
            "b",
            Dtype::Reference(crate::dtype::RefKind::Object),
            DatasetValue::References(vec![RefTarget::Local(a)]),
        ));
        match tree.arena.node_mut(a).unwrap() {
            BuilderNode::Dataset(dataset) => {
                dataset.value = DatasetValue::References(vec![RefTarget::Local(b)]);
            }
            _ => unreachable!(),
        }
        tree.arena.add_child(tree.root, a).unwrap();
        tree.arena.add_child(tree.root, b).unwrap();
        assert_eq!(tree.arena.len(), 3);
    }
}
