//! Reserved attribute and store-key names.
//!
//! These exact strings are part of the on-disk interchange format: other
//! implementations locate links, semantic dtypes, and the schema cache by
//! them. User attributes must not shadow any reserved attribute name; writes
//! that try are rejected.

/// Group attribute holding the JSON array of link records.
pub const ZARR_LINK: &str = "zarr_link";

/// Attribute giving the semantic dtype of a dataset or attribute carrier when
/// it differs from the physical storage dtype.
pub const ZARR_DTYPE: &str = "zarr_dtype";

/// Root-group attribute holding the path of the schema-cache subtree.
pub const SPECLOC: &str = ".specloc";

/// Default name of the root subtree holding cached schema namespaces.
pub const SPECIFICATIONS: &str = "specifications";

/// Attribute naming the semantic type of a typed group or dataset.
pub const NEURODATA_TYPE: &str = "neurodata_type";

/// Attribute naming the namespace of a typed group or dataset.
pub const NAMESPACE: &str = "namespace";

/// Attribute holding the object id of a group or dataset.
pub const OBJECT_ID: &str = "object_id";

/// Store key of the consolidated metadata index.
pub const CONSOLIDATED_METADATA: &str = ".zmetadata";

/// Group marker metadata file name.
pub const ZGROUP: &str = ".zgroup";

/// Array metadata file name.
pub const ZARRAY: &str = ".zarray";

/// Attributes metadata file name.
pub const ZATTRS: &str = ".zattrs";

/// Returns true if `name` is an attribute name owned by the backend.
#[must_use]
pub fn is_reserved_attribute(name: &str) -> bool {
    matches!(
        name,
        ZARR_LINK | ZARR_DTYPE | SPECLOC | NEURODATA_TYPE | NAMESPACE | OBJECT_ID
    )
}
