//! Dtypes and the codec between semantic and physical types.
//!
//! A dataset or attribute declares a semantic [`Dtype`]; storage knows only
//! physical typestrings, variable-length filters, and opaque object slots.
//! This module maps between the two, encodes attribute values as JSON
//! ([`attribute`]), and encodes reference elements through a pluggable
//! [object codec](object_codec).

pub mod attribute;
pub mod encode;
pub mod object_codec;

use thiserror::Error;

pub use attribute::{
    decode_attributes, encode_attributes, AttrValue, AttributeEncodeError, Attributes, RefAttr,
};
pub use object_codec::{JsonObjectCodec, ObjectCodecError, ObjectCodecTraits};

/// The kind of a stored reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefKind {
    /// A reference to a whole group or dataset.
    Object,
    /// A reference to a subselection of a dataset. Reserved; writes fail.
    Region,
}

impl RefKind {
    /// The `zarr_dtype` discriminator of this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Object => "object",
            Self::Region => "region",
        }
    }
}

/// One field of a compound dtype.
#[derive(Clone, Debug, PartialEq)]
pub struct CompoundField {
    /// Field name.
    pub name: String,
    /// Field dtype.
    pub dtype: Dtype,
}

/// A semantic dtype.
#[derive(Clone, Debug, PartialEq)]
pub enum Dtype {
    /// 8-bit signed integer.
    Int8,
    /// 16-bit signed integer.
    Int16,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 8-bit unsigned integer.
    UInt8,
    /// 16-bit unsigned integer.
    UInt16,
    /// 32-bit unsigned integer.
    UInt32,
    /// 64-bit unsigned integer.
    UInt64,
    /// 32-bit float.
    Float32,
    /// 64-bit float.
    Float64,
    /// 8-bit boolean.
    Bool,
    /// Variable-length UTF-8 text.
    Utf8,
    /// Variable-length ASCII text.
    Ascii,
    /// ISO-8601 datetime, stored as variable-length ASCII.
    IsoDatetime,
    /// A stored reference.
    Reference(RefKind),
    /// A compound record type.
    Compound(Vec<CompoundField>),
}

/// A dtype mapping error.
#[derive(Debug, Error)]
pub enum DtypeError {
    /// A declared dtype name not in the mapping table.
    #[error("unknown declared dtype {0}")]
    UnknownDeclared(String),
    /// A physical dtype this backend cannot reconstruct semantics for.
    #[error("unsupported storage dtype {0}")]
    UnsupportedStorage(String),
    /// An invalid `zarr_dtype` attribute.
    #[error("invalid zarr_dtype attribute: {0}")]
    InvalidZarrDtype(String),
    /// Chunk bytes inconsistent with the dtype.
    #[error("malformed chunk bytes: {0}")]
    MalformedChunk(String),
}

impl Dtype {
    /// Parse a declared dtype name from the mapping table.
    ///
    /// # Errors
    /// Returns [`DtypeError::UnknownDeclared`] for names outside the table.
    pub fn from_declared(name: &str) -> Result<Self, DtypeError> {
        Ok(match name {
            "float" | "float32" => Self::Float32,
            "double" | "float64" => Self::Float64,
            "long" | "int64" => Self::Int64,
            "int" | "int32" => Self::Int32,
            "short" | "int16" => Self::Int16,
            "int8" => Self::Int8,
            "uint64" => Self::UInt64,
            "uint" | "uint32" => Self::UInt32,
            "uint16" => Self::UInt16,
            "uint8" => Self::UInt8,
            "bool" => Self::Bool,
            "text" | "utf" | "utf8" | "utf-8" => Self::Utf8,
            "ascii" | "bytes" | "str" => Self::Ascii,
            "isodatetime" | "datetime" => Self::IsoDatetime,
            "ref" | "reference" | "object" => Self::Reference(RefKind::Object),
            "region" => Self::Reference(RefKind::Region),
            _ => return Err(DtypeError::UnknownDeclared(name.to_string())),
        })
    }

    /// The canonical declared name of this dtype.
    ///
    /// Compound dtypes have no single name; they render as `compound`.
    #[must_use]
    pub fn declared_name(&self) -> &'static str {
        match self {
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Bool => "bool",
            Self::Utf8 => "utf8",
            Self::Ascii => "ascii",
            Self::IsoDatetime => "isodatetime",
            Self::Reference(RefKind::Object) => "object",
            Self::Reference(RefKind::Region) => "region",
            Self::Compound(_) => "compound",
        }
    }

    /// The size in bytes of one element, or [`None`] for variable-length and
    /// reference dtypes. A compound dtype is fixed iff all its fields are.
    #[must_use]
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            Self::Int8 | Self::UInt8 | Self::Bool => Some(1),
            Self::Int16 | Self::UInt16 => Some(2),
            Self::Int32 | Self::UInt32 | Self::Float32 => Some(4),
            Self::Int64 | Self::UInt64 | Self::Float64 => Some(8),
            Self::Utf8 | Self::Ascii | Self::IsoDatetime | Self::Reference(_) => None,
            Self::Compound(fields) => fields
                .iter()
                .map(|field| field.dtype.fixed_size())
                .sum::<Option<usize>>(),
        }
    }

    /// Returns true for the variable-length string dtypes.
    #[must_use]
    pub fn is_vlen_string(&self) -> bool {
        matches!(self, Self::Utf8 | Self::Ascii | Self::IsoDatetime)
    }

    /// The physical dtype written to array metadata.
    ///
    /// Fixed dtypes map to little-endian typestrings, variable-length and
    /// reference dtypes to the object typestring `|O`, and fixed compounds
    /// to a structured field list.
    ///
    /// # Errors
    /// Returns [`DtypeError::UnsupportedStorage`] for a compound dtype mixing
    /// fixed and non-fixed fields outside an object-coded dataset.
    pub fn typestr(&self) -> Result<serde_json::Value, DtypeError> {
        Ok(match self {
            Self::Int8 => "|i1".into(),
            Self::UInt8 => "|u1".into(),
            Self::Bool => "|b1".into(),
            Self::Int16 => "<i2".into(),
            Self::UInt16 => "<u2".into(),
            Self::Int32 => "<i4".into(),
            Self::UInt32 => "<u4".into(),
            Self::Int64 => "<i8".into(),
            Self::UInt64 => "<u8".into(),
            Self::Float32 => "<f4".into(),
            Self::Float64 => "<f8".into(),
            Self::Utf8 | Self::Ascii | Self::IsoDatetime | Self::Reference(_) => "|O".into(),
            Self::Compound(fields) => {
                if self.fixed_size().is_none() {
                    return Err(DtypeError::UnsupportedStorage(
                        "compound with variable-length or reference fields has no structured typestring"
                            .to_string(),
                    ));
                }
                let fields = fields
                    .iter()
                    .map(|field| {
                        Ok(serde_json::json!([field.name, field.dtype.typestr()?]))
                    })
                    .collect::<Result<Vec<_>, DtypeError>>()?;
                serde_json::Value::Array(fields)
            }
        })
    }

    /// The filter id of a variable-length string dtype.
    #[must_use]
    pub fn vlen_filter_id(&self) -> Option<&'static str> {
        match self {
            Self::Utf8 => Some("vlen-utf8"),
            Self::Ascii | Self::IsoDatetime => Some("vlen-bytes"),
            _ => None,
        }
    }

    /// The default fill value written to array metadata.
    #[must_use]
    pub fn default_fill_value(&self) -> serde_json::Value {
        match self {
            Self::Int8
            | Self::Int16
            | Self::Int32
            | Self::Int64
            | Self::UInt8
            | Self::UInt16
            | Self::UInt32
            | Self::UInt64 => 0.into(),
            Self::Float32 | Self::Float64 => serde_json::json!(0.0),
            Self::Bool => false.into(),
            Self::Utf8 | Self::Ascii | Self::IsoDatetime => String::new().into(),
            Self::Reference(_) | Self::Compound(_) => serde_json::Value::Null,
        }
    }

    /// The value of the reserved `zarr_dtype` attribute, or [`None`] when the
    /// physical dtype alone carries the semantics.
    #[must_use]
    pub fn zarr_dtype_value(&self) -> Option<serde_json::Value> {
        match self {
            Self::Reference(kind) => Some(kind.as_str().into()),
            Self::IsoDatetime => Some("isodatetime".into()),
            Self::Compound(fields) => {
                let fields: Vec<serde_json::Value> = fields
                    .iter()
                    .map(|field| {
                        serde_json::json!({
                            "name": field.name,
                            "dtype": field.dtype.zarr_dtype_value()
                                .unwrap_or_else(|| field.dtype.declared_name().into()),
                        })
                    })
                    .collect();
                Some(serde_json::Value::Array(fields))
            }
            _ => None,
        }
    }

    /// Reconstruct the semantic dtype of a stored dataset from its physical
    /// dtype, filters, and `zarr_dtype` attribute.
    ///
    /// # Errors
    /// Returns a [`DtypeError`] if the combination is not one this backend
    /// writes or reads.
    pub fn from_storage(
        physical: &serde_json::Value,
        filters: Option<&[serde_json::Value]>,
        zarr_dtype: Option<&serde_json::Value>,
    ) -> Result<Self, DtypeError> {
        if let Some(zarr_dtype) = zarr_dtype {
            return Self::from_zarr_dtype(zarr_dtype);
        }

        match physical {
            serde_json::Value::String(typestr) => match typestr.as_str() {
                "|O" => {
                    let filter_id = filters
                        .and_then(<[serde_json::Value]>::first)
                        .and_then(|filter| filter.get("id"))
                        .and_then(serde_json::Value::as_str);
                    match filter_id {
                        Some("vlen-utf8") => Ok(Self::Utf8),
                        Some("vlen-bytes") => Ok(Self::Ascii),
                        other => Err(DtypeError::UnsupportedStorage(format!(
                            "object dtype with filter {other:?} and no zarr_dtype attribute"
                        ))),
                    }
                }
                _ => Self::from_typestr(typestr),
            },
            serde_json::Value::Array(fields) => {
                let fields = fields
                    .iter()
                    .map(|field| {
                        let pair = field.as_array().filter(|pair| pair.len() == 2).ok_or_else(
                            || DtypeError::UnsupportedStorage(format!("structured field {field}")),
                        )?;
                        let name = pair[0].as_str().ok_or_else(|| {
                            DtypeError::UnsupportedStorage(format!("structured field {field}"))
                        })?;
                        let typestr = pair[1].as_str().ok_or_else(|| {
                            DtypeError::UnsupportedStorage(format!("structured field {field}"))
                        })?;
                        Ok(CompoundField {
                            name: name.to_string(),
                            dtype: Self::from_typestr(typestr)?,
                        })
                    })
                    .collect::<Result<Vec<_>, DtypeError>>()?;
                Ok(Self::Compound(fields))
            }
            other => Err(DtypeError::UnsupportedStorage(other.to_string())),
        }
    }

    /// Parse a physical typestring.
    fn from_typestr(typestr: &str) -> Result<Self, DtypeError> {
        Ok(match typestr {
            "|i1" | "<i1" => Self::Int8,
            "|u1" | "<u1" => Self::UInt8,
            "|b1" | "<b1" => Self::Bool,
            "<i2" => Self::Int16,
            "<u2" => Self::UInt16,
            "<i4" => Self::Int32,
            "<u4" => Self::UInt32,
            "<i8" => Self::Int64,
            "<u8" => Self::UInt64,
            "<f4" => Self::Float32,
            "<f8" => Self::Float64,
            _ => return Err(DtypeError::UnsupportedStorage(typestr.to_string())),
        })
    }

    /// Parse a `zarr_dtype` attribute value.
    fn from_zarr_dtype(value: &serde_json::Value) -> Result<Self, DtypeError> {
        match value {
            serde_json::Value::String(name) => match name.as_str() {
                "object" => Ok(Self::Reference(RefKind::Object)),
                "region" => Ok(Self::Reference(RefKind::Region)),
                "isodatetime" => Ok(Self::IsoDatetime),
                other => Self::from_declared(other)
                    .map_err(|_| DtypeError::InvalidZarrDtype(other.to_string())),
            },
            serde_json::Value::Array(fields) => {
                let fields = fields
                    .iter()
                    .map(|field| {
                        let name = field
                            .get("name")
                            .and_then(serde_json::Value::as_str)
                            .ok_or_else(|| DtypeError::InvalidZarrDtype(field.to_string()))?;
                        let dtype = field
                            .get("dtype")
                            .ok_or_else(|| DtypeError::InvalidZarrDtype(field.to_string()))?;
                        Ok(CompoundField {
                            name: name.to_string(),
                            dtype: Self::from_zarr_dtype(dtype)?,
                        })
                    })
                    .collect::<Result<Vec<_>, DtypeError>>()?;
                Ok(Self::Compound(fields))
            }
            other => Err(DtypeError::InvalidZarrDtype(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_names() {
        assert_eq!(Dtype::from_declared("float").unwrap(), Dtype::Float32);
        assert_eq!(Dtype::from_declared("double").unwrap(), Dtype::Float64);
        assert_eq!(Dtype::from_declared("long").unwrap(), Dtype::Int64);
        assert_eq!(Dtype::from_declared("int").unwrap(), Dtype::Int32);
        assert_eq!(Dtype::from_declared("text").unwrap(), Dtype::Utf8);
        assert_eq!(Dtype::from_declared("utf-8").unwrap(), Dtype::Utf8);
        assert_eq!(Dtype::from_declared("str").unwrap(), Dtype::Ascii);
        assert_eq!(
            Dtype::from_declared("reference").unwrap(),
            Dtype::Reference(RefKind::Object)
        );
        assert_eq!(Dtype::from_declared("isodatetime").unwrap(), Dtype::IsoDatetime);
        assert!(Dtype::from_declared("quaternion").is_err());
    }

    #[test]
    fn typestrings() {
        assert_eq!(Dtype::Int32.typestr().unwrap(), "<i4");
        assert_eq!(Dtype::Bool.typestr().unwrap(), "|b1");
        assert_eq!(Dtype::Utf8.typestr().unwrap(), "|O");
        let compound = Dtype::Compound(vec![
            CompoundField {
                name: "a".to_string(),
                dtype: Dtype::Int32,
            },
            CompoundField {
                name: "b".to_string(),
                dtype: Dtype::Float64,
            },
        ]);
        assert_eq!(
            compound.typestr().unwrap(),
            serde_json::json!([["a", "<i4"], ["b", "<f8"]])
        );
        assert_eq!(compound.fixed_size(), Some(12));
    }

    #[test]
    fn storage_round_trip() {
        for dtype in [
            Dtype::Int8,
            Dtype::UInt16,
            Dtype::Int64,
            Dtype::Float32,
            Dtype::Bool,
        ] {
            let typestr = dtype.typestr().unwrap();
            assert_eq!(Dtype::from_storage(&typestr, None, None).unwrap(), dtype);
        }
    }

    #[test]
    fn storage_vlen_filters() {
        let filters = [serde_json::json!({"id": "vlen-utf8"})];
        assert_eq!(
            Dtype::from_storage(&"|O".into(), Some(&filters), None).unwrap(),
            Dtype::Utf8
        );
        let filters = [serde_json::json!({"id": "vlen-bytes"})];
        assert_eq!(
            Dtype::from_storage(&"|O".into(), Some(&filters), None).unwrap(),
            Dtype::Ascii
        );
    }

    #[test]
    fn zarr_dtype_reconstruction() {
        assert_eq!(
            Dtype::from_storage(&"|O".into(), None, Some(&"object".into())).unwrap(),
            Dtype::Reference(RefKind::Object)
        );
        let compound = Dtype::Compound(vec![
            CompoundField {
                name: "t".to_string(),
                dtype: Dtype::Float64,
            },
            CompoundField {
                name: "target".to_string(),
                dtype: Dtype::Reference(RefKind::Object),
            },
        ]);
        let zarr_dtype = compound.zarr_dtype_value().unwrap();
        assert_eq!(
            Dtype::from_storage(&"|O".into(), None, Some(&zarr_dtype)).unwrap(),
            compound
        );
    }

    #[test]
    fn big_endian_unsupported() {
        assert!(Dtype::from_storage(&">i4".into(), None, None).is_err());
    }
}
