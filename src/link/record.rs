use serde::{Deserialize, Serialize};

/// A link record, one element of a group's `zarr_link` attribute.
///
/// `object_id` and `source_object_id` serialize as `null` when absent.
/// Unknown keys written by other producers are preserved across a round
/// trip.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LinkRecord {
    /// Link name within the parent group.
    pub name: String,
    /// Relative path from this file's root to the file containing the
    /// target; `"."` if it is the same file.
    pub source: String,
    /// Absolute path from the target file's root to the target node.
    pub path: String,
    /// The target's object id, if the target is typed.
    #[serde(default)]
    pub object_id: Option<String>,
    /// The root object id of the `source` file.
    #[serde(default)]
    pub source_object_id: Option<String>,
    /// Keys this backend does not interpret, preserved for interchange.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// An object reference record: an element of a reference-typed dataset or
/// the payload of a reference-valued attribute.
///
/// Identical to a [`LinkRecord`] minus `name`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ReferenceRecord {
    /// Relative path from this file's root to the file containing the
    /// target; `"."` if it is the same file.
    pub source: String,
    /// Absolute path from the target file's root to the target node.
    pub path: String,
    /// The target's object id, if the target is typed.
    #[serde(default)]
    pub object_id: Option<String>,
    /// The root object id of the `source` file.
    #[serde(default)]
    pub source_object_id: Option<String>,
    /// Keys this backend does not interpret, preserved for interchange.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ReferenceRecord {
    /// Create a same-file reference record to `path`.
    #[must_use]
    pub fn same_file(path: &str, object_id: Option<String>, root_object_id: Option<String>) -> Self {
        Self {
            source: super::SAME_FILE.to_string(),
            path: path.to_string(),
            object_id,
            source_object_id: root_object_id,
            extra: serde_json::Map::new(),
        }
    }

    /// The per-session resolution cache key of this record.
    #[must_use]
    pub fn cache_key(&self) -> (String, String) {
        (self.source.clone(), self.path.clone())
    }
}

impl LinkRecord {
    /// The reference record naming the same target.
    #[must_use]
    pub fn to_reference(&self) -> ReferenceRecord {
        ReferenceRecord {
            source: self.source.clone(),
            path: self.path.clone(),
            object_id: self.object_id.clone(),
            source_object_id: self.source_object_id.clone(),
            extra: serde_json::Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_record_serializes_null_ids() {
        let record = LinkRecord {
            name: "alias".to_string(),
            source: ".".to_string(),
            path: "/g1/d1".to_string(),
            object_id: None,
            source_object_id: Some("root-id".to_string()),
            extra: serde_json::Map::new(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "name": "alias",
                "source": ".",
                "path": "/g1/d1",
                "object_id": null,
                "source_object_id": "root-id"
            })
        );
    }

    #[test]
    fn link_record_preserves_unknown_keys() {
        let json = serde_json::json!({
            "name": "alias",
            "source": ".",
            "path": "/g1",
            "object_id": null,
            "source_object_id": null,
            "flavour": "strawberry"
        });
        let record: LinkRecord = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(record.extra["flavour"], "strawberry");
        assert_eq!(serde_json::to_value(&record).unwrap(), json);
    }

    #[test]
    fn reference_record_same_file() {
        let record = ReferenceRecord::same_file("/g1", None, Some("root".to_string()));
        assert_eq!(record.source, ".");
        assert_eq!(record.cache_key(), (".".to_string(), "/g1".to_string()));
    }
}
