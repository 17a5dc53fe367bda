//! Attribute values and their JSON codec.
//!
//! Every attribute value must land in the attributes document as plain JSON.
//! Non-finite floats encode as the strings `"NaN"`, `"Infinity"`, and
//! `"-Infinity"` and decode symmetrically (a genuine string attribute with
//! one of those exact values is indistinguishable; this is inherent to the
//! format). Byte strings are UTF-8-decoded when valid, otherwise wrapped as
//! `{"bytes": "<base64>"}`. Reference values are wrapped as
//! `{"zarr_dtype": "object"|"region", "value": <record>}`.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use thiserror::Error;

use crate::{
    builder::RefTarget,
    link::ReferenceRecord,
    node::NodePath,
    reserved::ZARR_DTYPE,
};

use super::RefKind;

/// An attribute map, ordered by name.
pub type Attributes = BTreeMap<String, AttrValue>;

/// A reference-valued attribute.
#[derive(Clone, Debug, PartialEq)]
pub struct RefAttr {
    /// The reference kind.
    pub kind: RefKind,
    /// The reference target.
    pub target: RefTarget,
}

/// An attribute value.
#[derive(Clone, Debug, PartialEq)]
pub enum AttrValue {
    /// An explicit null.
    Null,
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A float. Non-finite values are representable.
    Float(f64),
    /// A text string.
    Str(String),
    /// A byte string.
    Bytes(Vec<u8>),
    /// A list; nested lists encode multi-dimensional values, preserving
    /// shape.
    List(Vec<AttrValue>),
    /// A nested string-keyed container.
    Map(BTreeMap<String, AttrValue>),
    /// A reference to another node.
    Ref(RefAttr),
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// An attribute encoding error.
#[derive(Debug, Error)]
pub enum AttributeEncodeError {
    /// A value with no JSON encoding.
    #[error("attribute {name} at {path} is not serializable: {reason}")]
    NotSerializable {
        /// Path of the node carrying the attribute.
        path: String,
        /// Attribute name.
        name: String,
        /// Why the value cannot be encoded.
        reason: String,
    },
    /// A reference target that cannot be turned into a record.
    #[error("attribute {name} at {path} holds an unresolvable reference: {reason}")]
    UnresolvableReference {
        /// Path of the node carrying the attribute.
        path: String,
        /// Attribute name.
        name: String,
        /// Why the target cannot be resolved.
        reason: String,
    },
}

/// The resolver turning a reference target into a stored record.
pub type RefResolver<'a> =
    dyn FnMut(&RefTarget) -> Result<ReferenceRecord, String> + 'a;

/// Encode an attribute map as a JSON attributes document.
///
/// `resolve` turns reference targets into records; it is only invoked for
/// reference-valued attributes.
///
/// # Errors
/// Returns an [`AttributeEncodeError`] naming the path and attribute on the
/// first value that cannot be encoded.
pub fn encode_attributes(
    attrs: &Attributes,
    path: &NodePath,
    resolve: &mut RefResolver<'_>,
) -> Result<serde_json::Map<String, serde_json::Value>, AttributeEncodeError> {
    let mut out = serde_json::Map::new();
    for (name, value) in attrs {
        out.insert(name.clone(), encode_value(value, path, name, resolve)?);
    }
    Ok(out)
}

fn encode_value(
    value: &AttrValue,
    path: &NodePath,
    name: &str,
    resolve: &mut RefResolver<'_>,
) -> Result<serde_json::Value, AttributeEncodeError> {
    Ok(match value {
        AttrValue::Null => serde_json::Value::Null,
        AttrValue::Bool(b) => (*b).into(),
        AttrValue::Int(i) => (*i).into(),
        AttrValue::Float(f) => encode_float(*f),
        AttrValue::Str(s) => s.clone().into(),
        AttrValue::Bytes(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => text.into(),
            Err(_) => serde_json::json!({ "bytes": BASE64.encode(bytes) }),
        },
        AttrValue::List(values) => serde_json::Value::Array(
            values
                .iter()
                .map(|value| encode_value(value, path, name, resolve))
                .collect::<Result<_, _>>()?,
        ),
        AttrValue::Map(map) => {
            let mut out = serde_json::Map::new();
            for (key, value) in map {
                out.insert(key.clone(), encode_value(value, path, name, resolve)?);
            }
            serde_json::Value::Object(out)
        }
        AttrValue::Ref(reference) => {
            let record = resolve(&reference.target).map_err(|reason| {
                AttributeEncodeError::UnresolvableReference {
                    path: path.as_str().to_string(),
                    name: name.to_string(),
                    reason,
                }
            })?;
            let record = serde_json::to_value(&record).map_err(|err| {
                AttributeEncodeError::NotSerializable {
                    path: path.as_str().to_string(),
                    name: name.to_string(),
                    reason: err.to_string(),
                }
            })?;
            let mut wrapper = serde_json::Map::new();
            wrapper.insert(ZARR_DTYPE.to_string(), reference.kind.as_str().into());
            wrapper.insert("value".to_string(), record);
            serde_json::Value::Object(wrapper)
        }
    })
}

fn encode_float(f: f64) -> serde_json::Value {
    if f.is_nan() {
        "NaN".into()
    } else if f == f64::INFINITY {
        "Infinity".into()
    } else if f == f64::NEG_INFINITY {
        "-Infinity".into()
    } else {
        serde_json::Number::from_f64(f).map_or(serde_json::Value::Null, Into::into)
    }
}

/// Decode a JSON attributes document into an attribute map.
///
/// The inverse of [`encode_attributes`] modulo documented widening: byte
/// strings that were valid UTF-8 come back as text.
#[must_use]
pub fn decode_attributes(map: &serde_json::Map<String, serde_json::Value>) -> Attributes {
    map.iter()
        .map(|(name, value)| (name.clone(), decode_value(value)))
        .collect()
}

/// Decode a single JSON attribute value.
#[must_use]
pub fn decode_value(value: &serde_json::Value) -> AttrValue {
    match value {
        serde_json::Value::Null => AttrValue::Null,
        serde_json::Value::Bool(b) => AttrValue::Bool(*b),
        serde_json::Value::Number(n) => n.as_i64().map_or_else(
            || AttrValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            AttrValue::Int,
        ),
        serde_json::Value::String(s) => match s.as_str() {
            "NaN" => AttrValue::Float(f64::NAN),
            "Infinity" => AttrValue::Float(f64::INFINITY),
            "-Infinity" => AttrValue::Float(f64::NEG_INFINITY),
            _ => AttrValue::Str(s.clone()),
        },
        serde_json::Value::Array(values) => {
            AttrValue::List(values.iter().map(decode_value).collect())
        }
        serde_json::Value::Object(map) => decode_object(map),
    }
}

fn decode_object(map: &serde_json::Map<String, serde_json::Value>) -> AttrValue {
    // The reference wrapper.
    if map.len() == 2 {
        if let (Some(serde_json::Value::String(kind)), Some(value)) =
            (map.get(ZARR_DTYPE), map.get("value"))
        {
            let kind = match kind.as_str() {
                "object" => Some(RefKind::Object),
                "region" => Some(RefKind::Region),
                _ => None,
            };
            if let Some(kind) = kind {
                if let Ok(record) = serde_json::from_value::<ReferenceRecord>(value.clone()) {
                    return AttrValue::Ref(RefAttr {
                        kind,
                        target: RefTarget::Record(record),
                    });
                }
            }
        }
    }

    // The byte-string wrapper.
    if map.len() == 1 {
        if let Some(serde_json::Value::String(b64)) = map.get("bytes") {
            if let Ok(bytes) = BASE64.decode(b64) {
                return AttrValue::Bytes(bytes);
            }
        }
    }

    AttrValue::Map(
        map.iter()
            .map(|(name, value)| (name.clone(), decode_value(value)))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_refs(_: &RefTarget) -> Result<ReferenceRecord, String> {
        Err("no references expected".to_string())
    }

    fn round_trip(attrs: &Attributes) -> Attributes {
        let encoded = encode_attributes(attrs, &NodePath::root(), &mut no_refs).unwrap();
        decode_attributes(&encoded)
    }

    #[test]
    fn scalars_round_trip() {
        let mut attrs = Attributes::new();
        attrs.insert("doc".to_string(), "top".into());
        attrs.insert("n".to_string(), 3i64.into());
        attrs.insert("rate".to_string(), 19.5f64.into());
        attrs.insert("ok".to_string(), true.into());
        assert_eq!(round_trip(&attrs), attrs);
    }

    #[test]
    fn non_finite_floats() {
        let mut attrs = Attributes::new();
        attrs.insert("inf".to_string(), f64::INFINITY.into());
        attrs.insert("ninf".to_string(), f64::NEG_INFINITY.into());
        attrs.insert("nan".to_string(), f64::NAN.into());
        let encoded = encode_attributes(&attrs, &NodePath::root(), &mut no_refs).unwrap();
        assert_eq!(encoded["inf"], "Infinity");
        assert_eq!(encoded["ninf"], "-Infinity");
        assert_eq!(encoded["nan"], "NaN");

        let decoded = decode_attributes(&encoded);
        assert_eq!(decoded["inf"], AttrValue::Float(f64::INFINITY));
        assert_eq!(decoded["ninf"], AttrValue::Float(f64::NEG_INFINITY));
        assert!(matches!(decoded["nan"], AttrValue::Float(f) if f.is_nan()));
    }

    #[test]
    fn nested_lists_preserve_shape() {
        let mut attrs = Attributes::new();
        attrs.insert(
            "grid".to_string(),
            AttrValue::List(vec![
                AttrValue::List(vec![1i64.into(), 2i64.into()]),
                AttrValue::List(vec![3i64.into(), 4i64.into()]),
            ]),
        );
        assert_eq!(round_trip(&attrs), attrs);
    }

    #[test]
    fn bytes_valid_utf8_widen_to_text() {
        let mut attrs = Attributes::new();
        attrs.insert("b".to_string(), AttrValue::Bytes(b"hello".to_vec()));
        let decoded = round_trip(&attrs);
        assert_eq!(decoded["b"], AttrValue::Str("hello".to_string()));
    }

    #[test]
    fn bytes_invalid_utf8_wrap_base64() {
        let mut attrs = Attributes::new();
        attrs.insert("b".to_string(), AttrValue::Bytes(vec![0xff, 0xfe, 0x01]));
        let encoded = encode_attributes(&attrs, &NodePath::root(), &mut no_refs).unwrap();
        assert!(encoded["b"].get("bytes").is_some());
        let decoded = decode_attributes(&encoded);
        assert_eq!(decoded["b"], AttrValue::Bytes(vec![0xff, 0xfe, 0x01]));
    }

    #[test]
    fn reference_wrapper() {
        let record = ReferenceRecord::same_file("/g1", None, Some("root".to_string()));
        let mut attrs = Attributes::new();
        attrs.insert(
            "target".to_string(),
            AttrValue::Ref(RefAttr {
                kind: RefKind::Object,
                target: RefTarget::Record(record.clone()),
            }),
        );
        let mut resolve = |target: &RefTarget| match target {
            RefTarget::Record(record) => Ok(record.clone()),
            _ => Err("unexpected".to_string()),
        };
        let encoded = encode_attributes(&attrs, &NodePath::root(), &mut resolve).unwrap();
        assert_eq!(encoded["target"][ZARR_DTYPE], "object");
        assert_eq!(encoded["target"]["value"]["path"], "/g1");

        let decoded = decode_attributes(&encoded);
        assert_eq!(decoded, attrs);
    }

    #[test]
    fn astral_text_round_trips() {
        let mut attrs = Attributes::new();
        attrs.insert("title".to_string(), "plane 1: 𝒢𝒶𝓊𝓈𝓈 😀".into());
        assert_eq!(round_trip(&attrs), attrs);
    }
}
