//! A Zarr storage backend for hierarchical scientific data models.
//!
//! `zarrtree` serializes a tree of typed builders — groups, datasets,
//! attributes, links, and object references — onto a chunked-array store
//! (a directory of chunk files plus JSON metadata), and reads such a file
//! back lazily. Links and object references, which the storage format has
//! no native type for, are emulated with reserved attributes and resolved
//! on demand.
//!
//! ## Layout
//!  - [`builder`]: the in-memory model (arena-indexed builder trees, tagged
//!    dataset values, chunk streams).
//!  - [`storage`]: store traits and the built-in memory, directory, and
//!    temporary stores.
//!  - [`dtype`]: the mapping between declared dtypes and physical storage,
//!    the attribute JSON codec, and the pluggable object codec.
//!  - [`link`]: link and reference records, relative sources, and lazy
//!    resolution.
//!  - [`io`]: the engine — open, write, append, and lazy read.
//!  - [`export`]: rewriting one file into another backend or store.
//!
//! ## Example
//! ```
//! use zarrtree::builder::{BuilderTree, DatasetBuilder, DatasetValue, ElementBuffer,
//!     ArrayValue, GroupBuilder};
//! use zarrtree::dtype::Dtype;
//! use zarrtree::io::{Mode, OpenOptions, ZarrIo};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut tree = BuilderTree::new();
//! tree.root_group_mut().attributes.insert("doc".into(), "top".into());
//! let g1 = tree.arena.insert_group(GroupBuilder::new("g1"));
//! tree.arena.add_child(tree.root, g1)?;
//! let d1 = tree.arena.insert_dataset(DatasetBuilder::new(
//!     "d1",
//!     Dtype::Int32,
//!     DatasetValue::Array(ArrayValue::new(
//!         vec![2, 2],
//!         ElementBuffer::Int32(vec![1, 2, 3, 4]),
//!     )?),
//! ));
//! tree.arena.add_child(g1, d1)?;
//!
//! let io = ZarrIo::open_memory(OpenOptions::new(Mode::Create));
//! io.write(&mut tree)?;
//!
//! let root = io.read()?;
//! let d1 = root.group("g1")?.dataset("d1")?;
//! assert_eq!(d1.shape(), &[2, 2]);
//! # Ok(())
//! # }
//! ```

#![warn(unused_variables)]
#![warn(dead_code)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_panics_doc)]

pub mod builder;
pub mod dtype;
pub mod export;
pub mod io;
pub mod link;
pub mod meta;
pub mod node;
pub mod reserved;
pub mod storage;
pub mod typemap;
