//! Hierarchy node paths and names.
//!
//! A [`NodePath`] identifies a group or dataset within a file, always rooted
//! at `/`. A [`NodeName`] is a single path component; names are restricted to
//! characters that are safe on the filesystems backing a directory store.

mod node_name;
mod node_path;

pub use node_name::{NodeName, NodeNameError};
pub use node_path::{NodePath, NodePathError};
