//! The schema-namespace handle.
//!
//! A [`TypeMap`] carries the schema namespaces loaded by the upstream
//! data-modeling framework. It is passed into the engine explicitly at open
//! time (there is no process-wide registry) and is the source of the schema
//! cache written under the reserved specifications subtree.

use thiserror::Error;

/// One named schema source within a namespace (e.g. a schema file), carrying
/// JSON text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpecSource {
    /// Source name (without extension), used as the dataset name in the
    /// cache.
    pub name: String,
    /// The schema JSON text.
    pub json: String,
}

/// A schema namespace: a name, a version, and its sources.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Namespace {
    /// Namespace name.
    pub name: String,
    /// Namespace version.
    pub version: String,
    /// The namespace's schema sources.
    pub sources: Vec<SpecSource>,
}

/// A duplicate namespace registration error.
#[derive(Debug, Error)]
#[error("namespace {name} {version} is already registered")]
pub struct DuplicateNamespaceError {
    /// Namespace name.
    pub name: String,
    /// Namespace version.
    pub version: String,
}

/// The registry of loaded schema namespaces, keyed by `(name, version)`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TypeMap {
    namespaces: Vec<Namespace>,
}

impl TypeMap {
    /// Create an empty type map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a namespace.
    ///
    /// # Errors
    /// Returns [`DuplicateNamespaceError`] if a namespace with the same name
    /// and version is already registered.
    pub fn register(&mut self, namespace: Namespace) -> Result<(), DuplicateNamespaceError> {
        if self.get(&namespace.name, &namespace.version).is_some() {
            return Err(DuplicateNamespaceError {
                name: namespace.name,
                version: namespace.version,
            });
        }
        self.namespaces.push(namespace);
        Ok(())
    }

    /// The namespace named `name` at `version`, if registered.
    #[must_use]
    pub fn get(&self, name: &str, version: &str) -> Option<&Namespace> {
        self.namespaces
            .iter()
            .find(|ns| ns.name == name && ns.version == version)
    }

    /// All registered namespaces, in registration order.
    #[must_use]
    pub fn namespaces(&self) -> &[Namespace] {
        &self.namespaces
    }

    /// Returns true if no namespace is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }
}
