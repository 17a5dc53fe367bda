//! Dataset values.
//!
//! A dataset value is one of a tagged set of variants: a scalar, an N-d
//! array of typed elements, compound records, a list of reference targets,
//! or a chunk stream. Engines match on the variant exhaustively; there is no
//! per-value runtime type sniffing.

use thiserror::Error;

use crate::dtype::Dtype;

use super::{ChunkIterator, RefTarget};

/// A scalar value.
#[derive(Clone, Debug, PartialEq)]
pub enum ScalarValue {
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// An unsigned integer.
    Uint(u64),
    /// A float.
    Float(f64),
    /// A string.
    Str(String),
}

impl ScalarValue {
    /// Parse a scalar from its JSON rendering (e.g. a stored fill value).
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_u64().map(Self::Uint))
                .or_else(|| n.as_f64().map(Self::Float)),
            serde_json::Value::String(s) => Some(match s.as_str() {
                "NaN" => Self::Float(f64::NAN),
                "Infinity" => Self::Float(f64::INFINITY),
                "-Infinity" => Self::Float(f64::NEG_INFINITY),
                _ => Self::Str(s.clone()),
            }),
            _ => None,
        }
    }

    /// The JSON rendering of this scalar, with non-finite floats as the
    /// strings `"NaN"`, `"Infinity"`, and `"-Infinity"`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(b) => (*b).into(),
            Self::Int(i) => (*i).into(),
            Self::Uint(u) => (*u).into(),
            Self::Float(f) => {
                if f.is_nan() {
                    "NaN".into()
                } else if *f == f64::INFINITY {
                    "Infinity".into()
                } else if *f == f64::NEG_INFINITY {
                    "-Infinity".into()
                } else {
                    serde_json::Number::from_f64(*f).map_or(serde_json::Value::Null, Into::into)
                }
            }
            Self::Str(s) => s.clone().into(),
        }
    }
}

/// A value layout error.
#[derive(Debug, Error)]
pub enum ValueError {
    /// An element buffer variant that does not match its peer or dtype.
    #[error("mismatched element buffer: {0}")]
    MismatchedBuffer(String),
    /// A shape whose element count does not match the buffer length.
    #[error("shape {shape:?} implies {expected} elements, buffer holds {actual}")]
    ShapeMismatch {
        /// The declared shape.
        shape: Vec<u64>,
        /// Elements implied by the shape.
        expected: usize,
        /// Elements in the buffer.
        actual: usize,
    },
}

/// The number of elements of an array of `shape`.
#[must_use]
pub fn num_elements(shape: &[u64]) -> usize {
    shape.iter().product::<u64>() as usize
}

/// Iterate the coordinates of `block` in C order.
///
/// The empty (zero-dimensional) block has exactly one coordinate, the empty
/// one; a block with any zero extent has none.
fn for_each_coord(block: &[u64], mut f: impl FnMut(&[u64])) {
    if block.is_empty() {
        f(&[]);
        return;
    }
    if block.iter().any(|&extent| extent == 0) {
        return;
    }
    let mut coord = vec![0u64; block.len()];
    loop {
        f(&coord);
        let mut dim = block.len();
        loop {
            if dim == 0 {
                return;
            }
            dim -= 1;
            coord[dim] += 1;
            if coord[dim] < block[dim] {
                break;
            }
            coord[dim] = 0;
        }
    }
}

fn linear_index(shape: &[u64], coord: &[u64]) -> usize {
    shape
        .iter()
        .zip(coord)
        .fold(0usize, |acc, (&extent, &c)| {
            acc * extent as usize + c as usize
        })
}

fn extract<T: Clone>(data: &[T], shape: &[u64], origin: &[u64], block: &[u64], fill: T) -> Vec<T> {
    let mut out = Vec::with_capacity(num_elements(block));
    for_each_coord(block, |coord| {
        let src: Vec<u64> = origin.iter().zip(coord).map(|(&o, &c)| o + c).collect();
        let in_bounds = src.iter().zip(shape).all(|(&c, &extent)| c < extent);
        if in_bounds {
            out.push(data[linear_index(shape, &src)].clone());
        } else {
            out.push(fill.clone());
        }
    });
    out
}

fn place<T: Clone>(dst: &mut [T], shape: &[u64], origin: &[u64], block: &[u64], src: &[T]) {
    let mut index = 0usize;
    for_each_coord(block, |coord| {
        let coords: Vec<u64> = origin.iter().zip(coord).map(|(&o, &c)| o + c).collect();
        let in_bounds = coords.iter().zip(shape).all(|(&c, &extent)| c < extent);
        if in_bounds && index < src.len() {
            dst[linear_index(shape, &coords)] = src[index].clone();
        }
        index += 1;
    });
}

macro_rules! int_fill {
    ($fill:expr, $t:ty) => {
        match $fill {
            Some(ScalarValue::Int(i)) => *i as $t,
            Some(ScalarValue::Uint(u)) => *u as $t,
            Some(ScalarValue::Float(f)) => *f as $t,
            _ => 0 as $t,
        }
    };
}

/// A typed buffer of dataset elements, stored flat in C order.
#[derive(Clone, Debug, PartialEq)]
pub enum ElementBuffer {
    /// 8-bit signed integers.
    Int8(Vec<i8>),
    /// 16-bit signed integers.
    Int16(Vec<i16>),
    /// 32-bit signed integers.
    Int32(Vec<i32>),
    /// 64-bit signed integers.
    Int64(Vec<i64>),
    /// 8-bit unsigned integers.
    UInt8(Vec<u8>),
    /// 16-bit unsigned integers.
    UInt16(Vec<u16>),
    /// 32-bit unsigned integers.
    UInt32(Vec<u32>),
    /// 64-bit unsigned integers.
    UInt64(Vec<u64>),
    /// 32-bit floats.
    Float32(Vec<f32>),
    /// 64-bit floats.
    Float64(Vec<f64>),
    /// Booleans.
    Bool(Vec<bool>),
    /// Strings (UTF-8 or ASCII per the declared dtype).
    Str(Vec<String>),
}

impl ElementBuffer {
    /// The number of elements in the buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Int8(v) => v.len(),
            Self::Int16(v) => v.len(),
            Self::Int32(v) => v.len(),
            Self::Int64(v) => v.len(),
            Self::UInt8(v) => v.len(),
            Self::UInt16(v) => v.len(),
            Self::UInt32(v) => v.len(),
            Self::UInt64(v) => v.len(),
            Self::Float32(v) => v.len(),
            Self::Float64(v) => v.len(),
            Self::Bool(v) => v.len(),
            Self::Str(v) => v.len(),
        }
    }

    /// Returns true if the buffer holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if the buffer variant stores elements of `dtype`.
    #[must_use]
    pub fn matches_dtype(&self, dtype: &Dtype) -> bool {
        matches!(
            (self, dtype),
            (Self::Int8(_), Dtype::Int8)
                | (Self::Int16(_), Dtype::Int16)
                | (Self::Int32(_), Dtype::Int32)
                | (Self::Int64(_), Dtype::Int64)
                | (Self::UInt8(_), Dtype::UInt8)
                | (Self::UInt16(_), Dtype::UInt16)
                | (Self::UInt32(_), Dtype::UInt32)
                | (Self::UInt64(_), Dtype::UInt64)
                | (Self::Float32(_), Dtype::Float32)
                | (Self::Float64(_), Dtype::Float64)
                | (Self::Bool(_), Dtype::Bool)
                | (Self::Str(_), Dtype::Utf8 | Dtype::Ascii | Dtype::IsoDatetime)
        )
    }

    /// An empty buffer of the variant storing `dtype`, or [`None`] for
    /// reference and compound dtypes.
    #[must_use]
    pub fn empty(dtype: &Dtype) -> Option<Self> {
        Some(match dtype {
            Dtype::Int8 => Self::Int8(vec![]),
            Dtype::Int16 => Self::Int16(vec![]),
            Dtype::Int32 => Self::Int32(vec![]),
            Dtype::Int64 => Self::Int64(vec![]),
            Dtype::UInt8 => Self::UInt8(vec![]),
            Dtype::UInt16 => Self::UInt16(vec![]),
            Dtype::UInt32 => Self::UInt32(vec![]),
            Dtype::UInt64 => Self::UInt64(vec![]),
            Dtype::Float32 => Self::Float32(vec![]),
            Dtype::Float64 => Self::Float64(vec![]),
            Dtype::Bool => Self::Bool(vec![]),
            Dtype::Utf8 | Dtype::Ascii | Dtype::IsoDatetime => Self::Str(vec![]),
            Dtype::Reference(_) | Dtype::Compound(_) => return None,
        })
    }

    /// A buffer of `len` fill elements of the variant storing `dtype`, or
    /// [`None`] for reference and compound dtypes.
    #[must_use]
    pub fn filled(dtype: &Dtype, len: usize, fill: Option<&ScalarValue>) -> Option<Self> {
        Some(match dtype {
            Dtype::Int8 => Self::Int8(vec![int_fill!(fill, i8); len]),
            Dtype::Int16 => Self::Int16(vec![int_fill!(fill, i16); len]),
            Dtype::Int32 => Self::Int32(vec![int_fill!(fill, i32); len]),
            Dtype::Int64 => Self::Int64(vec![int_fill!(fill, i64); len]),
            Dtype::UInt8 => Self::UInt8(vec![int_fill!(fill, u8); len]),
            Dtype::UInt16 => Self::UInt16(vec![int_fill!(fill, u16); len]),
            Dtype::UInt32 => Self::UInt32(vec![int_fill!(fill, u32); len]),
            Dtype::UInt64 => Self::UInt64(vec![int_fill!(fill, u64); len]),
            Dtype::Float32 => Self::Float32(vec![int_fill!(fill, f32); len]),
            Dtype::Float64 => Self::Float64(vec![int_fill!(fill, f64); len]),
            Dtype::Bool => Self::Bool(vec![
                matches!(fill, Some(ScalarValue::Bool(true)));
                len
            ]),
            Dtype::Utf8 | Dtype::Ascii | Dtype::IsoDatetime => Self::Str(vec![
                match fill {
                    Some(ScalarValue::Str(s)) => s.clone(),
                    _ => String::new(),
                };
                len
            ]),
            Dtype::Reference(_) | Dtype::Compound(_) => return None,
        })
    }

    /// Extract the block at `origin` of `block` shape from this buffer laid
    /// out as `shape`, padding out-of-bounds positions with `fill`.
    #[must_use]
    pub fn extract_block(
        &self,
        shape: &[u64],
        origin: &[u64],
        block: &[u64],
        fill: Option<&ScalarValue>,
    ) -> Self {
        match self {
            Self::Int8(v) => Self::Int8(extract(v, shape, origin, block, int_fill!(fill, i8))),
            Self::Int16(v) => Self::Int16(extract(v, shape, origin, block, int_fill!(fill, i16))),
            Self::Int32(v) => Self::Int32(extract(v, shape, origin, block, int_fill!(fill, i32))),
            Self::Int64(v) => Self::Int64(extract(v, shape, origin, block, int_fill!(fill, i64))),
            Self::UInt8(v) => Self::UInt8(extract(v, shape, origin, block, int_fill!(fill, u8))),
            Self::UInt16(v) => {
                Self::UInt16(extract(v, shape, origin, block, int_fill!(fill, u16)))
            }
            Self::UInt32(v) => {
                Self::UInt32(extract(v, shape, origin, block, int_fill!(fill, u32)))
            }
            Self::UInt64(v) => {
                Self::UInt64(extract(v, shape, origin, block, int_fill!(fill, u64)))
            }
            Self::Float32(v) => {
                Self::Float32(extract(v, shape, origin, block, int_fill!(fill, f32)))
            }
            Self::Float64(v) => {
                Self::Float64(extract(v, shape, origin, block, int_fill!(fill, f64)))
            }
            Self::Bool(v) => Self::Bool(extract(
                v,
                shape,
                origin,
                block,
                matches!(fill, Some(ScalarValue::Bool(true))),
            )),
            Self::Str(v) => Self::Str(extract(
                v,
                shape,
                origin,
                block,
                match fill {
                    Some(ScalarValue::Str(s)) => s.clone(),
                    _ => String::new(),
                },
            )),
        }
    }

    /// Place `block_data` (laid out as `block`) into this buffer (laid out as
    /// `shape`) at `origin`, clipping out-of-bounds positions.
    ///
    /// # Errors
    /// Returns [`ValueError::MismatchedBuffer`] if `block_data` is a
    /// different variant.
    pub fn place_block(
        &mut self,
        shape: &[u64],
        origin: &[u64],
        block: &[u64],
        block_data: &Self,
    ) -> Result<(), ValueError> {
        match (self, block_data) {
            (Self::Int8(dst), Self::Int8(src)) => place(dst, shape, origin, block, src),
            (Self::Int16(dst), Self::Int16(src)) => place(dst, shape, origin, block, src),
            (Self::Int32(dst), Self::Int32(src)) => place(dst, shape, origin, block, src),
            (Self::Int64(dst), Self::Int64(src)) => place(dst, shape, origin, block, src),
            (Self::UInt8(dst), Self::UInt8(src)) => place(dst, shape, origin, block, src),
            (Self::UInt16(dst), Self::UInt16(src)) => place(dst, shape, origin, block, src),
            (Self::UInt32(dst), Self::UInt32(src)) => place(dst, shape, origin, block, src),
            (Self::UInt64(dst), Self::UInt64(src)) => place(dst, shape, origin, block, src),
            (Self::Float32(dst), Self::Float32(src)) => place(dst, shape, origin, block, src),
            (Self::Float64(dst), Self::Float64(src)) => place(dst, shape, origin, block, src),
            (Self::Bool(dst), Self::Bool(src)) => place(dst, shape, origin, block, src),
            (Self::Str(dst), Self::Str(src)) => place(dst, shape, origin, block, src),
            (dst, src) => {
                return Err(ValueError::MismatchedBuffer(format!(
                    "cannot place {src:?} into {dst:?}"
                )))
            }
        }
        Ok(())
    }
}

/// An N-dimensional array value: a shape and a flat element buffer in C
/// order.
#[derive(Clone, Debug, PartialEq)]
pub struct ArrayValue {
    /// The array shape.
    pub shape: Vec<u64>,
    /// The elements, `shape.iter().product()` of them.
    pub elements: ElementBuffer,
}

impl ArrayValue {
    /// Create an array value.
    ///
    /// # Errors
    /// Returns [`ValueError::ShapeMismatch`] if the element count does not
    /// match the shape.
    pub fn new(shape: Vec<u64>, elements: ElementBuffer) -> Result<Self, ValueError> {
        let expected = num_elements(&shape);
        if elements.len() == expected {
            Ok(Self { shape, elements })
        } else {
            Err(ValueError::ShapeMismatch {
                expected,
                actual: elements.len(),
                shape,
            })
        }
    }
}

/// One field value of a compound record.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    /// A scalar field.
    Scalar(ScalarValue),
    /// A reference field.
    Ref(RefTarget),
}

/// A compound dataset value: a list of records, each a list of field values
/// in field-declaration order.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct CompoundValue {
    /// The records.
    pub rows: Vec<Vec<FieldValue>>,
}

/// A dataset value.
pub enum DatasetValue {
    /// A scalar (zero-dimensional) value.
    Scalar(ScalarValue),
    /// An in-memory N-d array.
    Array(ArrayValue),
    /// Compound records.
    Compound(CompoundValue),
    /// A one-dimensional list of object references.
    References(Vec<RefTarget>),
    /// A chunk stream, written iteratively.
    Stream(Box<dyn ChunkIterator>),
}

impl core::fmt::Debug for DatasetValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Scalar(scalar) => f.debug_tuple("Scalar").field(scalar).finish(),
            Self::Array(array) => f.debug_tuple("Array").field(array).finish(),
            Self::Compound(compound) => f.debug_tuple("Compound").field(compound).finish(),
            Self::References(refs) => f.debug_tuple("References").field(refs).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_value_shape_check() {
        assert!(ArrayValue::new(vec![2, 2], ElementBuffer::Int32(vec![1, 2, 3, 4])).is_ok());
        assert!(ArrayValue::new(vec![2, 3], ElementBuffer::Int32(vec![1, 2, 3, 4])).is_err());
        assert!(ArrayValue::new(vec![], ElementBuffer::Int32(vec![7])).is_ok());
    }

    #[test]
    fn extract_block_interior_and_edge() {
        // 3x3 array, 2x2 blocks.
        let buffer = ElementBuffer::Int32((1..=9).collect());
        let block = buffer.extract_block(&[3, 3], &[0, 0], &[2, 2], None);
        assert_eq!(block, ElementBuffer::Int32(vec![1, 2, 4, 5]));
        // Edge block is padded with the fill value.
        let block = buffer.extract_block(&[3, 3], &[0, 2], &[2, 2], None);
        assert_eq!(block, ElementBuffer::Int32(vec![3, 0, 6, 0]));
        let block =
            buffer.extract_block(&[3, 3], &[2, 2], &[2, 2], Some(&ScalarValue::Int(-1)));
        assert_eq!(block, ElementBuffer::Int32(vec![9, -1, -1, -1]));
    }

    #[test]
    fn place_block_round_trips_extract() {
        let buffer = ElementBuffer::Int32((1..=9).collect());
        let mut out = ElementBuffer::filled(&Dtype::Int32, 9, None).unwrap();
        for origin in [[0u64, 0], [0, 2], [2, 0], [2, 2]] {
            let block = buffer.extract_block(&[3, 3], &origin, &[2, 2], None);
            out.place_block(&[3, 3], &origin, &[2, 2], &block).unwrap();
        }
        assert_eq!(out, buffer);
    }

    #[test]
    fn place_block_rejects_mismatch() {
        let mut out = ElementBuffer::filled(&Dtype::Int32, 4, None).unwrap();
        let block = ElementBuffer::Float64(vec![0.0]);
        assert!(out.place_block(&[2, 2], &[0, 0], &[1, 1], &block).is_err());
    }

    #[test]
    fn zero_dimensional_block() {
        let buffer = ElementBuffer::Str(vec!["only".to_string()]);
        let block = buffer.extract_block(&[], &[], &[], None);
        assert_eq!(block, buffer);
    }

    #[test]
    fn string_fill() {
        let buffer = ElementBuffer::filled(
            &Dtype::Utf8,
            2,
            Some(&ScalarValue::Str("x".to_string())),
        )
        .unwrap();
        assert_eq!(
            buffer,
            ElementBuffer::Str(vec!["x".to_string(), "x".to_string()])
        );
    }
}
