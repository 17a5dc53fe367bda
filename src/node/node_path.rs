use derive_more::Display;
use thiserror::Error;

use super::{NodeName, NodeNameError};

/// A hierarchy node path.
///
/// Paths always start with `/`; a non-root path cannot end with `/` and
/// cannot contain empty components.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display)]
#[display("{_0}")]
pub struct NodePath(String);

/// An invalid node path.
#[derive(Debug, Error)]
#[error("invalid node path {0}")]
pub struct NodePathError(String);

impl NodePath {
    /// Create a new node path from `path`.
    ///
    /// # Errors
    /// Returns [`NodePathError`] if `path` is not valid according to
    /// [`NodePath::validate`].
    pub fn new(path: &str) -> Result<Self, NodePathError> {
        if Self::validate(path) {
            Ok(Self(path.to_string()))
        } else {
            Err(NodePathError(path.to_string()))
        }
    }

    /// The root node path.
    #[must_use]
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Extracts a string slice containing the node path.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Indicates if this is the root path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Returns the name of the node, or [`None`] for the root.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        if self.is_root() {
            None
        } else {
            self.0.rsplit('/').next()
        }
    }

    /// Returns the parent path, or [`None`] for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            None
        } else {
            let (parent, _) = self.0.rsplit_once('/')?;
            Some(if parent.is_empty() {
                Self::root()
            } else {
                Self(parent.to_string())
            })
        }
    }

    /// Returns the path of the child named `name`.
    ///
    /// # Errors
    /// Returns [`NodeNameError`] if `name` is not a valid node name.
    pub fn child(&self, name: &str) -> Result<Self, NodeNameError> {
        let name = NodeName::new(name)?;
        Ok(self.child_name(&name))
    }

    /// Returns the path of the child with validated name `name`.
    #[must_use]
    pub fn child_name(&self, name: &NodeName) -> Self {
        if self.is_root() {
            Self(format!("/{name}"))
        } else {
            Self(format!("{}/{name}", self.0))
        }
    }

    /// Validates a path:
    /// - a path always starts with `/`, and
    /// - a non-root path cannot end with `/` and cannot contain `//`.
    #[must_use]
    pub fn validate(path: &str) -> bool {
        path.eq("/") || (path.starts_with('/') && !path.ends_with('/') && !path.contains("//"))
    }
}

impl TryFrom<&str> for NodePath {
    type Error = NodePathError;

    fn try_from(path: &str) -> Result<Self, Self::Error> {
        Self::new(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_path() {
        assert!(NodePath::new("/").is_ok());
        assert!(NodePath::new("/a/b").is_ok());
        assert_eq!(NodePath::new("/a/b").unwrap().to_string(), "/a/b");
        assert!(NodePath::new("/a/b/").is_err());
        assert_eq!(
            NodePath::new("/a/b/").unwrap_err().to_string(),
            "invalid node path /a/b/"
        );
        assert!(NodePath::new("/a//b").is_err());
        assert!(NodePath::new("a/b").is_err());
    }

    #[test]
    fn node_path_parent_name() {
        let path = NodePath::new("/a/b").unwrap();
        assert_eq!(path.name(), Some("b"));
        assert_eq!(path.parent().unwrap().as_str(), "/a");
        assert_eq!(path.parent().unwrap().parent().unwrap(), NodePath::root());
        assert!(NodePath::root().parent().is_none());
        assert!(NodePath::root().name().is_none());
    }

    #[test]
    fn node_path_child() {
        let root = NodePath::root();
        let a = root.child("a").unwrap();
        assert_eq!(a.as_str(), "/a");
        assert_eq!(a.child("b").unwrap().as_str(), "/a/b");
        assert!(root.child("a/b").is_err());
    }
}
