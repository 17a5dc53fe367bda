//! Chunk byte encoding.
//!
//! Fixed-size elements are stored little-endian in C order. Variable-length
//! strings use the vlen layout (a little-endian `u32` item count, then per
//! item a `u32` byte length and the bytes). Fixed compounds pack their
//! fields little-endian per record.

use crate::builder::{ElementBuffer, FieldValue, ScalarValue};

use super::{CompoundField, Dtype, DtypeError};

fn scalar_i64(scalar: &ScalarValue) -> i64 {
    match scalar {
        ScalarValue::Bool(b) => i64::from(*b),
        ScalarValue::Int(i) => *i,
        #[allow(clippy::cast_possible_wrap)]
        ScalarValue::Uint(u) => *u as i64,
        #[allow(clippy::cast_possible_truncation)]
        ScalarValue::Float(f) => *f as i64,
        ScalarValue::Str(_) => 0,
    }
}

fn scalar_u64(scalar: &ScalarValue) -> u64 {
    match scalar {
        ScalarValue::Bool(b) => u64::from(*b),
        #[allow(clippy::cast_sign_loss)]
        ScalarValue::Int(i) => *i as u64,
        ScalarValue::Uint(u) => *u,
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        ScalarValue::Float(f) => *f as u64,
        ScalarValue::Str(_) => 0,
    }
}

fn scalar_f64(scalar: &ScalarValue) -> f64 {
    match scalar {
        ScalarValue::Bool(b) => f64::from(u8::from(*b)),
        #[allow(clippy::cast_precision_loss)]
        ScalarValue::Int(i) => *i as f64,
        #[allow(clippy::cast_precision_loss)]
        ScalarValue::Uint(u) => *u as f64,
        ScalarValue::Float(f) => *f,
        ScalarValue::Str(_) => 0.0,
    }
}

/// Encode a fixed-size element buffer as little-endian bytes.
///
/// # Errors
/// Returns [`DtypeError::UnsupportedStorage`] for a string buffer; strings
/// use [`vlen_encode`].
pub fn fixed_to_bytes(buffer: &ElementBuffer) -> Result<Vec<u8>, DtypeError> {
    macro_rules! pack {
        ($v:expr, $size:literal) => {{
            let mut out = Vec::with_capacity($v.len() * $size);
            for element in $v {
                out.extend_from_slice(&element.to_le_bytes());
            }
            out
        }};
    }
    Ok(match buffer {
        #[allow(clippy::cast_sign_loss)]
        ElementBuffer::Int8(v) => v.iter().map(|&i| i as u8).collect(),
        ElementBuffer::Int16(v) => pack!(v, 2),
        ElementBuffer::Int32(v) => pack!(v, 4),
        ElementBuffer::Int64(v) => pack!(v, 8),
        ElementBuffer::UInt8(v) => v.clone(),
        ElementBuffer::UInt16(v) => pack!(v, 2),
        ElementBuffer::UInt32(v) => pack!(v, 4),
        ElementBuffer::UInt64(v) => pack!(v, 8),
        ElementBuffer::Float32(v) => pack!(v, 4),
        ElementBuffer::Float64(v) => pack!(v, 8),
        ElementBuffer::Bool(v) => v.iter().map(|&b| u8::from(b)).collect(),
        ElementBuffer::Str(_) => {
            return Err(DtypeError::UnsupportedStorage(
                "string buffers have no fixed-size encoding".to_string(),
            ))
        }
    })
}

/// Decode little-endian bytes into a fixed-size element buffer of `dtype`.
///
/// # Errors
/// Returns [`DtypeError::MalformedChunk`] if the byte length is not a
/// multiple of the element size, or [`DtypeError::UnsupportedStorage`] for a
/// dtype without a fixed-size encoding.
pub fn fixed_from_bytes(dtype: &Dtype, bytes: &[u8]) -> Result<ElementBuffer, DtypeError> {
    macro_rules! unpack {
        ($t:ty, $size:literal, $wrap:path) => {{
            if bytes.len() % $size != 0 {
                return Err(DtypeError::MalformedChunk(format!(
                    "{} bytes is not a multiple of element size {}",
                    bytes.len(),
                    $size
                )));
            }
            $wrap(
                bytes
                    .chunks_exact($size)
                    .map(|chunk| <$t>::from_le_bytes(chunk.try_into().expect("exact chunk")))
                    .collect(),
            )
        }};
    }
    Ok(match dtype {
        #[allow(clippy::cast_possible_wrap)]
        Dtype::Int8 => ElementBuffer::Int8(bytes.iter().map(|&b| b as i8).collect()),
        Dtype::Int16 => unpack!(i16, 2, ElementBuffer::Int16),
        Dtype::Int32 => unpack!(i32, 4, ElementBuffer::Int32),
        Dtype::Int64 => unpack!(i64, 8, ElementBuffer::Int64),
        Dtype::UInt8 => ElementBuffer::UInt8(bytes.to_vec()),
        Dtype::UInt16 => unpack!(u16, 2, ElementBuffer::UInt16),
        Dtype::UInt32 => unpack!(u32, 4, ElementBuffer::UInt32),
        Dtype::UInt64 => unpack!(u64, 8, ElementBuffer::UInt64),
        Dtype::Float32 => unpack!(f32, 4, ElementBuffer::Float32),
        Dtype::Float64 => unpack!(f64, 8, ElementBuffer::Float64),
        Dtype::Bool => ElementBuffer::Bool(bytes.iter().map(|&b| b != 0).collect()),
        Dtype::Utf8 | Dtype::Ascii | Dtype::IsoDatetime | Dtype::Reference(_) | Dtype::Compound(_) => {
            return Err(DtypeError::UnsupportedStorage(format!(
                "dtype {} has no fixed-size encoding",
                dtype.declared_name()
            )))
        }
    })
}

/// Encode strings with the vlen layout.
#[must_use]
pub fn vlen_encode(strings: &[String]) -> Vec<u8> {
    let mut out = (strings.len() as u32).to_le_bytes().to_vec();
    for string in strings {
        out.extend_from_slice(&(string.len() as u32).to_le_bytes());
        out.extend_from_slice(string.as_bytes());
    }
    out
}

/// Decode strings from the vlen layout.
///
/// # Errors
/// Returns [`DtypeError::MalformedChunk`] on truncated input or invalid
/// UTF-8.
pub fn vlen_decode(bytes: &[u8]) -> Result<Vec<String>, DtypeError> {
    let malformed = |reason: &str| DtypeError::MalformedChunk(reason.to_string());
    let header: [u8; 4] = bytes
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| malformed("truncated vlen header"))?;
    let count = u32::from_le_bytes(header) as usize;
    let mut strings = Vec::with_capacity(count);
    let mut offset = 4usize;
    for _ in 0..count {
        let len_bytes: [u8; 4] = bytes
            .get(offset..offset + 4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| malformed("truncated vlen item length"))?;
        offset += 4;
        let len = u32::from_le_bytes(len_bytes) as usize;
        let item = bytes
            .get(offset..offset + len)
            .ok_or_else(|| malformed("truncated vlen item"))?;
        offset += len;
        strings.push(
            std::str::from_utf8(item)
                .map_err(|err| malformed(&err.to_string()))?
                .to_string(),
        );
    }
    Ok(strings)
}

/// Pack fixed compound records little-endian, field by field.
///
/// # Errors
/// Returns [`DtypeError::UnsupportedStorage`] if a field is variable-length
/// or a record holds a reference; those datasets go through the object
/// codec.
pub fn compound_to_bytes(
    fields: &[CompoundField],
    rows: &[Vec<FieldValue>],
) -> Result<Vec<u8>, DtypeError> {
    let record_size = Dtype::Compound(fields.to_vec())
        .fixed_size()
        .ok_or_else(|| {
            DtypeError::UnsupportedStorage(
                "compound with variable-length fields has no packed encoding".to_string(),
            )
        })?;
    let mut out = Vec::with_capacity(rows.len() * record_size);
    for row in rows {
        if row.len() != fields.len() {
            return Err(DtypeError::MalformedChunk(format!(
                "record has {} fields, dtype declares {}",
                row.len(),
                fields.len()
            )));
        }
        for (field, value) in fields.iter().zip(row) {
            let FieldValue::Scalar(scalar) = value else {
                return Err(DtypeError::UnsupportedStorage(
                    "reference fields have no packed encoding".to_string(),
                ));
            };
            pack_scalar(&field.dtype, scalar, &mut out)?;
        }
    }
    Ok(out)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn pack_scalar(dtype: &Dtype, scalar: &ScalarValue, out: &mut Vec<u8>) -> Result<(), DtypeError> {
    match dtype {
        Dtype::Int8 => out.push((scalar_i64(scalar) as i8) as u8),
        Dtype::Int16 => out.extend_from_slice(&(scalar_i64(scalar) as i16).to_le_bytes()),
        Dtype::Int32 => out.extend_from_slice(&(scalar_i64(scalar) as i32).to_le_bytes()),
        Dtype::Int64 => out.extend_from_slice(&scalar_i64(scalar).to_le_bytes()),
        Dtype::UInt8 => out.push(scalar_u64(scalar) as u8),
        Dtype::UInt16 => out.extend_from_slice(&(scalar_u64(scalar) as u16).to_le_bytes()),
        Dtype::UInt32 => out.extend_from_slice(&(scalar_u64(scalar) as u32).to_le_bytes()),
        Dtype::UInt64 => out.extend_from_slice(&scalar_u64(scalar).to_le_bytes()),
        #[allow(clippy::cast_possible_truncation)]
        Dtype::Float32 => out.extend_from_slice(&(scalar_f64(scalar) as f32).to_le_bytes()),
        Dtype::Float64 => out.extend_from_slice(&scalar_f64(scalar).to_le_bytes()),
        Dtype::Bool => out.push(u8::from(scalar_i64(scalar) != 0)),
        _ => {
            return Err(DtypeError::UnsupportedStorage(format!(
                "field dtype {} has no packed encoding",
                dtype.declared_name()
            )))
        }
    }
    Ok(())
}

/// Unpack fixed compound records.
///
/// # Errors
/// Returns [`DtypeError::MalformedChunk`] if the byte length is not a
/// multiple of the record size.
pub fn compound_from_bytes(
    fields: &[CompoundField],
    bytes: &[u8],
) -> Result<Vec<Vec<FieldValue>>, DtypeError> {
    let record_size = Dtype::Compound(fields.to_vec())
        .fixed_size()
        .ok_or_else(|| {
            DtypeError::UnsupportedStorage(
                "compound with variable-length fields has no packed encoding".to_string(),
            )
        })?;
    if record_size == 0 || bytes.len() % record_size != 0 {
        return Err(DtypeError::MalformedChunk(format!(
            "{} bytes is not a multiple of record size {record_size}",
            bytes.len()
        )));
    }
    let mut rows = Vec::with_capacity(bytes.len() / record_size);
    for record in bytes.chunks_exact(record_size) {
        let mut row = Vec::with_capacity(fields.len());
        let mut offset = 0usize;
        for field in fields {
            let size = field.dtype.fixed_size().expect("record size checked");
            let field_bytes = &record[offset..offset + size];
            offset += size;
            row.push(FieldValue::Scalar(unpack_scalar(&field.dtype, field_bytes)?));
        }
        rows.push(row);
    }
    Ok(rows)
}

#[allow(clippy::cast_possible_wrap)]
fn unpack_scalar(dtype: &Dtype, bytes: &[u8]) -> Result<ScalarValue, DtypeError> {
    macro_rules! le {
        ($t:ty) => {
            <$t>::from_le_bytes(bytes.try_into().expect("field size checked"))
        };
    }
    Ok(match dtype {
        Dtype::Int8 => ScalarValue::Int(i64::from(bytes[0] as i8)),
        Dtype::Int16 => ScalarValue::Int(i64::from(le!(i16))),
        Dtype::Int32 => ScalarValue::Int(i64::from(le!(i32))),
        Dtype::Int64 => ScalarValue::Int(le!(i64)),
        Dtype::UInt8 => ScalarValue::Uint(u64::from(bytes[0])),
        Dtype::UInt16 => ScalarValue::Uint(u64::from(le!(u16))),
        Dtype::UInt32 => ScalarValue::Uint(u64::from(le!(u32))),
        Dtype::UInt64 => ScalarValue::Uint(le!(u64)),
        Dtype::Float32 => ScalarValue::Float(f64::from(le!(f32))),
        Dtype::Float64 => ScalarValue::Float(le!(f64)),
        Dtype::Bool => ScalarValue::Bool(bytes[0] != 0),
        _ => {
            return Err(DtypeError::UnsupportedStorage(format!(
                "field dtype {} has no packed encoding",
                dtype.declared_name()
            )))
        }
    })
}
