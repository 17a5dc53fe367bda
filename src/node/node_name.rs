use derive_more::Display;
use thiserror::Error;

/// A hierarchy node name.
///
/// A node name is a non-empty single path component. Because node paths
/// double as store keys on directory-backed stores, names reject `/`, NUL,
/// the filesystem-reserved characters `\ : * ? " < > |`, and the relative
/// components `.` and `..`.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display)]
#[display("{_0}")]
pub struct NodeName(String);

/// An invalid node name.
#[derive(Debug, Error)]
#[error("invalid node name {0}")]
pub struct NodeNameError(String);

impl NodeName {
    /// Create a new node name from `name`.
    ///
    /// # Errors
    /// Returns [`NodeNameError`] if `name` is not valid according to
    /// [`NodeName::validate`].
    pub fn new(name: &str) -> Result<Self, NodeNameError> {
        if Self::validate(name) {
            Ok(Self(name.to_string()))
        } else {
            Err(NodeNameError(name.to_string()))
        }
    }

    /// Create a new node name from `name` without validation.
    ///
    /// # Safety
    /// `name` must be valid according to [`NodeName::validate`].
    #[must_use]
    pub unsafe fn new_unchecked(name: &str) -> Self {
        debug_assert!(Self::validate(name));
        Self(name.to_string())
    }

    /// Extracts a string slice containing the node name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validates a node name.
    #[must_use]
    pub fn validate(name: &str) -> bool {
        !name.is_empty()
            && name != "."
            && name != ".."
            && !name
                .chars()
                .any(|c| matches!(c, '/' | '\0' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
    }
}

impl TryFrom<&str> for NodeName {
    type Error = NodeNameError;

    fn try_from(name: &str) -> Result<Self, Self::Error> {
        Self::new(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_name() {
        assert!(NodeName::new("a").is_ok());
        assert!(NodeName::new("acquisition").is_ok());
        assert!(NodeName::new(".specloc-like").is_ok());
        assert!(NodeName::new("").is_err());
        assert!(NodeName::new(".").is_err());
        assert!(NodeName::new("..").is_err());
        assert!(NodeName::new("a/b").is_err());
        assert!(NodeName::new("a:b").is_err());
        assert_eq!(
            NodeName::new("a/b").unwrap_err().to_string(),
            "invalid node name a/b"
        );
    }
}
