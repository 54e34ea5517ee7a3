//! Dense-or-sparse polymorphic value container.
//!
//! A [`TypedValue`] owns its bytes and stores a vector either densely
//! (`len × width` raw little-endian values) or sparsely (`pairs ×
//! (off_width + val_width)` with the offset array preceding the value
//! array). Offsets in the sparse form are the raw distances between
//! consecutive nonzero positions; the first entry stores its absolute
//! offset.
//!
//! Reserved bit patterns follow BCF v2: the signed minimum of each integer
//! width is MISSING and the signed minimum plus one is END_OF_VECTOR. The
//! float patterns are dedicated NaN payloads (`0x7F800001` / `0x7F800002`
//! for f32). Conversions between widths translate the patterns, never the
//! numeric values, and reads must go through the explicit predicates rather
//! than NaN comparisons.

use std::io::Read;

use crate::error::{Result, ValueError};
use crate::sparse::SparseVector;
use crate::varint::{decode_varint, encode_varint};

pub const MISSING_I8: i8 = i8::MIN;
pub const END_OF_VECTOR_I8: i8 = i8::MIN + 1;
pub const MISSING_I16: i16 = i16::MIN;
pub const END_OF_VECTOR_I16: i16 = i16::MIN + 1;
pub const MISSING_I32: i32 = i32::MIN;
pub const END_OF_VECTOR_I32: i32 = i32::MIN + 1;
pub const MISSING_I64: i64 = i64::MIN;
pub const END_OF_VECTOR_I64: i64 = i64::MIN + 1;

pub const MISSING_F32_BITS: u32 = 0x7F80_0001;
pub const END_OF_VECTOR_F32_BITS: u32 = 0x7F80_0002;
pub const MISSING_F64_BITS: u64 = 0x7FF0_0000_0000_0001;
pub const END_OF_VECTOR_F64_BITS: u64 = 0x7FF0_0000_0000_0002;

/// f32 MISSING sentinel (a dedicated quiet-NaN payload)
#[must_use]
pub fn missing_f32() -> f32 {
    f32::from_bits(MISSING_F32_BITS)
}

/// f32 END_OF_VECTOR sentinel
#[must_use]
pub fn end_of_vector_f32() -> f32 {
    f32::from_bits(END_OF_VECTOR_F32_BITS)
}

/// Wire codes for value and offset widths
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TypeCode {
    Int8 = 1,
    Int16 = 2,
    Int32 = 3,
    Int64 = 4,
    Float32 = 5,
    Float64 = 6,
    Str = 7,
    Sparse = 8,
}

impl TypeCode {
    /// Width of one element in bytes
    #[must_use]
    pub fn width(self) -> usize {
        match self {
            Self::Int8 | Self::Str => 1,
            Self::Int16 => 2,
            Self::Int32 | Self::Float32 => 4,
            Self::Int64 | Self::Float64 => 8,
            Self::Sparse => 0,
        }
    }

    pub fn from_u8(code: u8) -> Result<Self> {
        match code {
            1 => Ok(Self::Int8),
            2 => Ok(Self::Int16),
            3 => Ok(Self::Int32),
            4 => Ok(Self::Int64),
            5 => Ok(Self::Float32),
            6 => Ok(Self::Float64),
            7 => Ok(Self::Str),
            8 => Ok(Self::Sparse),
            other => Err(ValueError::BadWidth(other).into()),
        }
    }

    fn from_u8_offset(code: u8) -> Result<Self> {
        match code {
            1..=4 => Self::from_u8(code),
            other => Err(ValueError::BadWidth(other).into()),
        }
    }

    fn is_int(self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }
}

/// Smallest signed width whose range holds `[min, max]` with both reserved
/// patterns kept distinct
///
/// The low end reserves two slots (MISSING and END_OF_VECTOR), so a width
/// `w` fits when `min >= -2^(w-1)+2` and `max <= 2^(w-1)-1`.
#[must_use]
pub fn narrow_int_code(min: i64, max: i64) -> TypeCode {
    fn fits(bits: u32, min: i64, max: i64) -> bool {
        let lo = -(1i128 << (bits - 1)) + 2;
        let hi = (1i128 << (bits - 1)) - 1;
        i128::from(min) >= lo && i128::from(max) <= hi
    }
    if fits(8, min, max) {
        TypeCode::Int8
    } else if fits(16, min, max) {
        TypeCode::Int16
    } else if fits(32, min, max) {
        TypeCode::Int32
    } else {
        TypeCode::Int64
    }
}

/// Smallest unsigned width holding `value`; used for sparse offsets
#[must_use]
pub fn offset_type_code(value: u64) -> TypeCode {
    if value <= u64::from(u8::MAX) {
        TypeCode::Int8
    } else if value <= u64::from(u16::MAX) {
        TypeCode::Int16
    } else if value <= u64::from(u32::MAX) {
        TypeCode::Int32
    } else {
        TypeCode::Int64
    }
}

/// Source scalar types a [`TypedValue`] can be built from
pub trait Scalar: Copy + Default + PartialEq {
    const TYPE: TypeCode;
    const MISSING: Self;
    const END_OF_VECTOR: Self;

    fn is_missing(self) -> bool;
    fn is_end_of_vector(self) -> bool;

    #[doc(hidden)]
    fn raw(self) -> RawValue;
}

macro_rules! impl_int_scalar {
    ($t:ty, $code:expr, $missing:expr, $eov:expr) => {
        impl Scalar for $t {
            const TYPE: TypeCode = $code;
            const MISSING: Self = $missing;
            const END_OF_VECTOR: Self = $eov;

            fn is_missing(self) -> bool {
                self == Self::MISSING
            }

            fn is_end_of_vector(self) -> bool {
                self == Self::END_OF_VECTOR
            }

            fn raw(self) -> RawValue {
                RawValue::Int(i64::from(self), $code)
            }
        }
    };
}

impl_int_scalar!(i8, TypeCode::Int8, MISSING_I8, END_OF_VECTOR_I8);
impl_int_scalar!(i16, TypeCode::Int16, MISSING_I16, END_OF_VECTOR_I16);
impl_int_scalar!(i32, TypeCode::Int32, MISSING_I32, END_OF_VECTOR_I32);

impl Scalar for i64 {
    const TYPE: TypeCode = TypeCode::Int64;
    const MISSING: Self = MISSING_I64;
    const END_OF_VECTOR: Self = END_OF_VECTOR_I64;

    fn is_missing(self) -> bool {
        self == Self::MISSING
    }

    fn is_end_of_vector(self) -> bool {
        self == Self::END_OF_VECTOR
    }

    fn raw(self) -> RawValue {
        RawValue::Int(self, TypeCode::Int64)
    }
}

impl Scalar for f32 {
    const TYPE: TypeCode = TypeCode::Float32;
    const MISSING: Self = f32::from_bits(MISSING_F32_BITS);
    const END_OF_VECTOR: Self = f32::from_bits(END_OF_VECTOR_F32_BITS);

    fn is_missing(self) -> bool {
        self.to_bits() == MISSING_F32_BITS
    }

    fn is_end_of_vector(self) -> bool {
        self.to_bits() == END_OF_VECTOR_F32_BITS
    }

    fn raw(self) -> RawValue {
        RawValue::F32(self)
    }
}

impl Scalar for f64 {
    const TYPE: TypeCode = TypeCode::Float64;
    const MISSING: Self = f64::from_bits(MISSING_F64_BITS);
    const END_OF_VECTOR: Self = f64::from_bits(END_OF_VECTOR_F64_BITS);

    fn is_missing(self) -> bool {
        self.to_bits() == MISSING_F64_BITS
    }

    fn is_end_of_vector(self) -> bool {
        self.to_bits() == END_OF_VECTOR_F64_BITS
    }

    fn raw(self) -> RawValue {
        RawValue::F64(self)
    }
}

/// A scalar lifted out of a raw byte buffer, tagged with its source width
#[derive(Clone, Copy, Debug)]
pub enum RawValue {
    Int(i64, TypeCode),
    F32(f32),
    F64(f64),
}

impl RawValue {
    fn is_missing(self) -> bool {
        match self {
            Self::Int(v, code) => v == int_missing(code),
            Self::F32(v) => v.to_bits() == MISSING_F32_BITS,
            Self::F64(v) => v.to_bits() == MISSING_F64_BITS,
        }
    }

    fn is_end_of_vector(self) -> bool {
        match self {
            Self::Int(v, code) => v == int_missing(code) + 1,
            Self::F32(v) => v.to_bits() == END_OF_VECTOR_F32_BITS,
            Self::F64(v) => v.to_bits() == END_OF_VECTOR_F64_BITS,
        }
    }

    fn is_zero(self) -> bool {
        match self {
            Self::Int(v, _) => v == 0,
            Self::F32(v) => v == 0.0,
            Self::F64(v) => v == 0.0,
        }
    }

    /// Converts to f32, carrying reserved patterns across by translation
    pub fn to_f32(self) -> f32 {
        if self.is_missing() {
            return missing_f32();
        }
        if self.is_end_of_vector() {
            return end_of_vector_f32();
        }
        match self {
            Self::Int(v, _) => v as f32,
            Self::F32(v) => v,
            Self::F64(v) => v as f32,
        }
    }

    /// Writes this value at `code` width, translating reserved patterns
    fn write_as(self, code: TypeCode, out: &mut Vec<u8>) {
        if self.is_missing() {
            return write_int_pattern(int_missing_target(code), code, out);
        }
        if self.is_end_of_vector() {
            return write_int_pattern(int_missing_target(code) + 1, code, out);
        }
        match (self, code) {
            (Self::F32(v), TypeCode::Float32) => out.extend_from_slice(&v.to_le_bytes()),
            (Self::F32(v), TypeCode::Float64) => {
                out.extend_from_slice(&f64::from(v).to_le_bytes());
            }
            (Self::F64(v), TypeCode::Float64) => out.extend_from_slice(&v.to_le_bytes()),
            (Self::F64(v), TypeCode::Float32) => {
                out.extend_from_slice(&(v as f32).to_le_bytes());
            }
            (Self::Int(v, _), TypeCode::Float32) => {
                out.extend_from_slice(&(v as f32).to_le_bytes());
            }
            (Self::Int(v, _), TypeCode::Float64) => {
                out.extend_from_slice(&(v as f64).to_le_bytes());
            }
            (Self::Int(v, _), _) => write_int_pattern(v, code, out),
            (Self::F32(v), _) => write_int_pattern(v as i64, code, out),
            (Self::F64(v), _) => write_int_pattern(v as i64, code, out),
        }
    }
}

fn int_missing(code: TypeCode) -> i64 {
    match code {
        TypeCode::Int8 => i64::from(MISSING_I8),
        TypeCode::Int16 => i64::from(MISSING_I16),
        TypeCode::Int32 => i64::from(MISSING_I32),
        _ => MISSING_I64,
    }
}

/// MISSING pattern of the target width for reserved-value translation
fn int_missing_target(code: TypeCode) -> i64 {
    match code {
        TypeCode::Float32 => i64::from(MISSING_F32_BITS),
        TypeCode::Float64 => MISSING_F64_BITS as i64,
        other => int_missing(other),
    }
}

fn write_int_pattern(value: i64, code: TypeCode, out: &mut Vec<u8>) {
    match code {
        TypeCode::Int8 | TypeCode::Str => out.push(value as u8),
        TypeCode::Int16 => out.extend_from_slice(&(value as i16).to_le_bytes()),
        TypeCode::Int32 => out.extend_from_slice(&(value as i32).to_le_bytes()),
        TypeCode::Float32 => out.extend_from_slice(&(value as u32).to_le_bytes()),
        TypeCode::Float64 => out.extend_from_slice(&(value as u64).to_le_bytes()),
        _ => out.extend_from_slice(&value.to_le_bytes()),
    }
}

fn read_raw(bytes: &[u8], code: TypeCode, idx: usize) -> RawValue {
    let at = idx * code.width();
    match code {
        TypeCode::Int8 | TypeCode::Str => RawValue::Int(i64::from(bytes[at] as i8), TypeCode::Int8),
        TypeCode::Int16 => RawValue::Int(
            i64::from(i16::from_le_bytes([bytes[at], bytes[at + 1]])),
            TypeCode::Int16,
        ),
        TypeCode::Int32 => RawValue::Int(
            i64::from(i32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())),
            TypeCode::Int32,
        ),
        TypeCode::Int64 => RawValue::Int(
            i64::from_le_bytes(bytes[at..at + 8].try_into().unwrap()),
            TypeCode::Int64,
        ),
        TypeCode::Float32 => {
            RawValue::F32(f32::from_le_bytes(bytes[at..at + 4].try_into().unwrap()))
        }
        TypeCode::Float64 => {
            RawValue::F64(f64::from_le_bytes(bytes[at..at + 8].try_into().unwrap()))
        }
        TypeCode::Sparse => unreachable!("sparse is not an element width"),
    }
}

fn read_offset(bytes: &[u8], code: TypeCode, idx: usize) -> u64 {
    let at = idx * code.width();
    match code {
        TypeCode::Int8 => u64::from(bytes[at]),
        TypeCode::Int16 => u64::from(u16::from_le_bytes([bytes[at], bytes[at + 1]])),
        TypeCode::Int32 => u64::from(u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())),
        _ => u64::from_le_bytes(bytes[at..at + 8].try_into().unwrap()),
    }
}

fn write_offset(value: u64, code: TypeCode, out: &mut Vec<u8>) {
    match code {
        TypeCode::Int8 => out.push(value as u8),
        TypeCode::Int16 => out.extend_from_slice(&(value as u16).to_le_bytes()),
        TypeCode::Int32 => out.extend_from_slice(&(value as u32).to_le_bytes()),
        _ => out.extend_from_slice(&value.to_le_bytes()),
    }
}

/// Polymorphic value container: a dense array or sparse pair array with
/// per-field width selection
#[derive(Clone, Debug, PartialEq)]
pub enum TypedValue {
    Dense {
        /// Element width code
        width: TypeCode,
        /// Logical element count
        len: usize,
        /// `len × width` raw little-endian values
        bytes: Vec<u8>,
    },
    Sparse {
        /// Value width code
        val_width: TypeCode,
        /// Offset width code (unsigned interpretation, codes 1-4)
        off_width: TypeCode,
        /// Logical dense length
        dense_len: usize,
        /// Stored pair count
        pairs: usize,
        /// `pairs × off_width` raw distances
        off_bytes: Vec<u8>,
        /// `pairs × val_width` values
        val_bytes: Vec<u8>,
    },
}

impl TypedValue {
    /// Builds a dense value from a source slice, choosing the narrowest
    /// lossless width for integer sources
    ///
    /// Reserved values are ignored by the width scan and carried across by
    /// pattern translation. Floats keep their own width.
    pub fn from_dense<T: Scalar>(values: &[T]) -> Self {
        let width = if T::TYPE.is_int() {
            let mut min = i64::MAX;
            let mut max = i64::MIN;
            for &v in values {
                if v.is_missing() || v.is_end_of_vector() {
                    continue;
                }
                if let RawValue::Int(i, _) = v.raw() {
                    min = min.min(i);
                    max = max.max(i);
                }
            }
            if min > max {
                TypeCode::Int8
            } else {
                narrow_int_code(min, max)
            }
        } else {
            T::TYPE
        };
        let mut bytes = Vec::with_capacity(values.len() * width.width());
        for &v in values {
            v.raw().write_as(width, &mut bytes);
        }
        Self::Dense {
            width,
            len: values.len(),
            bytes,
        }
    }

    /// Builds a sparse value from an ordered sparse vector
    ///
    /// The offset width is chosen from the maximum stored distance between
    /// consecutive nonzero positions.
    pub fn from_sparse<T: Scalar>(vec: &SparseVector<T>) -> Self {
        let mut max_dist = 0u64;
        let mut prev: Option<usize> = None;
        for (pos, _) in vec.iter() {
            let dist = match prev {
                Some(p) => (pos - p) as u64,
                None => pos as u64,
            };
            max_dist = max_dist.max(dist);
            prev = Some(pos);
        }
        let off_width = offset_type_code(max_dist);

        let mut min = i64::MAX;
        let mut max = i64::MIN;
        if T::TYPE.is_int() {
            for (_, v) in vec.iter() {
                if v.is_missing() || v.is_end_of_vector() {
                    continue;
                }
                if let RawValue::Int(i, _) = v.raw() {
                    min = min.min(i);
                    max = max.max(i);
                }
            }
        }
        let val_width = if T::TYPE.is_int() {
            if min > max {
                TypeCode::Int8
            } else {
                narrow_int_code(min, max)
            }
        } else {
            T::TYPE
        };

        let pairs = vec.non_zero_len();
        let mut off_bytes = Vec::with_capacity(pairs * off_width.width());
        let mut val_bytes = Vec::with_capacity(pairs * val_width.width());
        let mut prev: Option<usize> = None;
        for (pos, v) in vec.iter() {
            let dist = match prev {
                Some(p) => (pos - p) as u64,
                None => pos as u64,
            };
            prev = Some(pos);
            write_offset(dist, off_width, &mut off_bytes);
            v.raw().write_as(val_width, &mut val_bytes);
        }
        Self::Sparse {
            val_width,
            off_width,
            dense_len: vec.len(),
            pairs,
            off_bytes,
            val_bytes,
        }
    }

    /// Logical (dense) element count
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Dense { len, .. } => *len,
            Self::Sparse { dense_len, .. } => *dense_len,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_sparse(&self) -> bool {
        matches!(self, Self::Sparse { .. })
    }

    /// Value width code
    #[must_use]
    pub fn type_code(&self) -> TypeCode {
        match self {
            Self::Dense { width, .. } => *width,
            Self::Sparse { val_width, .. } => *val_width,
        }
    }

    /// Stored pair count (0 when dense)
    #[must_use]
    pub fn sparse_len(&self) -> usize {
        match self {
            Self::Dense { .. } => 0,
            Self::Sparse { pairs, .. } => *pairs,
        }
    }

    /// Iterates stored `(absolute offset, value)` candidates
    ///
    /// Dense values yield every slot (zeros included); sparse values yield
    /// only the stored pairs.
    pub(crate) fn iter_raw(&self) -> RawPairs<'_> {
        RawPairs {
            value: self,
            idx: 0,
            abs: 0,
        }
    }

    /// Materializes the vector as f32, translating reserved patterns
    #[must_use]
    pub fn to_vec_f32(&self) -> Vec<f32> {
        let mut out = vec![0.0f32; self.len()];
        for (pos, v) in self.iter_raw() {
            out[pos as usize] = v.to_f32();
        }
        out
    }

    /// Converts to the dense representation, keeping the value width
    #[must_use]
    pub fn to_dense(&self) -> Self {
        match self {
            Self::Dense { .. } => self.clone(),
            Self::Sparse {
                val_width,
                dense_len,
                ..
            } => {
                let mut bytes = vec![0u8; dense_len * val_width.width()];
                for (pos, v) in self.iter_raw() {
                    let mut slot = Vec::with_capacity(val_width.width());
                    v.write_as(*val_width, &mut slot);
                    let at = pos as usize * val_width.width();
                    bytes[at..at + slot.len()].copy_from_slice(&slot);
                }
                Self::Dense {
                    width: *val_width,
                    len: *dense_len,
                    bytes,
                }
            }
        }
    }

    /// Converts to the sparse representation, dropping zero values
    #[must_use]
    pub fn to_sparse(&self) -> Self {
        match self {
            Self::Sparse { .. } => self.clone(),
            Self::Dense { width, len, .. } => {
                let mut max_dist = 0u64;
                let mut prev: Option<u64> = None;
                let nonzero: Vec<(u64, RawValue)> = self
                    .iter_raw()
                    .filter(|(_, v)| !v.is_zero())
                    .collect();
                for &(pos, _) in &nonzero {
                    let dist = match prev {
                        Some(p) => pos - p,
                        None => pos,
                    };
                    max_dist = max_dist.max(dist);
                    prev = Some(pos);
                }
                let off_width = offset_type_code(max_dist);
                let mut off_bytes = Vec::with_capacity(nonzero.len() * off_width.width());
                let mut val_bytes = Vec::with_capacity(nonzero.len() * width.width());
                let mut prev: Option<u64> = None;
                for &(pos, v) in &nonzero {
                    let dist = match prev {
                        Some(p) => pos - p,
                        None => pos,
                    };
                    prev = Some(pos);
                    write_offset(dist, off_width, &mut off_bytes);
                    v.write_as(*width, &mut val_bytes);
                }
                Self::Sparse {
                    val_width: *width,
                    off_width,
                    dense_len: *len,
                    pairs: nonzero.len(),
                    off_bytes,
                    val_bytes,
                }
            }
        }
    }

    /// Serializes the container: value type code, logical size, and for the
    /// sparse form an `(off_width << 4) | val_width` byte, pair count and
    /// the two raw arrays
    pub fn serialize(&self, out: &mut Vec<u8>) {
        match self {
            Self::Dense { width, len, bytes } => {
                out.push(*width as u8);
                encode_varint(*len as u64, out).expect("vec write is infallible");
                out.extend_from_slice(bytes);
            }
            Self::Sparse {
                val_width,
                off_width,
                dense_len,
                pairs,
                off_bytes,
                val_bytes,
            } => {
                out.push(TypeCode::Sparse as u8);
                encode_varint(*dense_len as u64, out).expect("vec write is infallible");
                out.push(((*off_width as u8) << 4) | (*val_width as u8));
                encode_varint(*pairs as u64, out).expect("vec write is infallible");
                out.extend_from_slice(off_bytes);
                out.extend_from_slice(val_bytes);
            }
        }
    }

    /// Deserializes a container written by [`TypedValue::serialize`]
    ///
    /// A width code outside the reserved set reports
    /// [`ValueError::BadWidth`].
    pub fn deserialize<R: Read>(input: &mut R) -> Result<Self> {
        let code = read_exact_u8(input)?;
        let code = TypeCode::from_u8(code)?;
        let len = decode_varint(input)? as usize;
        if code == TypeCode::Sparse {
            let widths = read_exact_u8(input)?;
            let off_width = TypeCode::from_u8_offset(widths >> 4)?;
            let val_width = TypeCode::from_u8(widths & 0x0F)?;
            if !val_width.is_int() && val_width != TypeCode::Float32 {
                return Err(ValueError::BadWidth(widths & 0x0F).into());
            }
            let pairs = decode_varint(input)? as usize;
            let mut off_bytes = vec![0u8; pairs * off_width.width()];
            read_exact(input, &mut off_bytes)?;
            let mut val_bytes = vec![0u8; pairs * val_width.width()];
            read_exact(input, &mut val_bytes)?;
            Ok(Self::Sparse {
                val_width,
                off_width,
                dense_len: len,
                pairs,
                off_bytes,
                val_bytes,
            })
        } else {
            let mut bytes = vec![0u8; len * code.width()];
            read_exact(input, &mut bytes)?;
            Ok(Self::Dense {
                width: code,
                len,
                bytes,
            })
        }
    }
}

fn read_exact_u8<R: Read>(input: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    read_exact(input, &mut buf)?;
    Ok(buf[0])
}

fn read_exact<R: Read>(input: &mut R, buf: &mut [u8]) -> Result<()> {
    input.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ValueError::Truncated.into()
        } else {
            crate::Error::Io(e)
        }
    })
}

/// Iterator over `(absolute offset, RawValue)` pairs of a [`TypedValue`]
#[derive(Clone)]
pub(crate) struct RawPairs<'a> {
    value: &'a TypedValue,
    idx: usize,
    abs: u64,
}

impl Iterator for RawPairs<'_> {
    type Item = (u64, RawValue);

    fn next(&mut self) -> Option<Self::Item> {
        match self.value {
            TypedValue::Dense { width, len, bytes } => {
                if self.idx >= *len {
                    return None;
                }
                let v = read_raw(bytes, *width, self.idx);
                let pos = self.idx as u64;
                self.idx += 1;
                Some((pos, v))
            }
            TypedValue::Sparse {
                val_width,
                off_width,
                pairs,
                off_bytes,
                val_bytes,
                ..
            } => {
                if self.idx >= *pairs {
                    return None;
                }
                let dist = read_offset(off_bytes, *off_width, self.idx);
                let v = read_raw(val_bytes, *val_width, self.idx);
                self.abs += dist;
                let pos = self.abs;
                self.idx += 1;
                Some((pos, v))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn width_selection_is_smallest_that_fits() {
        assert_eq!(
            TypedValue::from_dense(&[0i64, 1, -1]).type_code(),
            TypeCode::Int8
        );
        // -126 is the lowest value int8 can hold with both sentinels reserved
        assert_eq!(
            TypedValue::from_dense(&[-126i64]).type_code(),
            TypeCode::Int8
        );
        assert_eq!(
            TypedValue::from_dense(&[-127i64]).type_code(),
            TypeCode::Int16
        );
        assert_eq!(
            TypedValue::from_dense(&[127i64]).type_code(),
            TypeCode::Int8
        );
        assert_eq!(
            TypedValue::from_dense(&[128i64]).type_code(),
            TypeCode::Int16
        );
        assert_eq!(
            TypedValue::from_dense(&[i64::from(i16::MAX) + 1]).type_code(),
            TypeCode::Int32
        );
        assert_eq!(
            TypedValue::from_dense(&[i64::from(i32::MIN)]).type_code(),
            TypeCode::Int64
        );
    }

    #[test]
    fn width_scan_ignores_reserved_values() {
        let v = TypedValue::from_dense(&[0i32, 1, MISSING_I32, END_OF_VECTOR_I32]);
        assert_eq!(v.type_code(), TypeCode::Int8);
    }

    #[test]
    fn reserved_patterns_translate_across_widths() {
        let v = TypedValue::from_dense(&[1i32, MISSING_I32, END_OF_VECTOR_I32]);
        let TypedValue::Dense { bytes, .. } = &v else {
            panic!("expected dense");
        };
        assert_eq!(bytes[0] as i8, 1);
        assert_eq!(bytes[1] as i8, MISSING_I8);
        assert_eq!(bytes[2] as i8, END_OF_VECTOR_I8);

        let f = v.to_vec_f32();
        assert_eq!(f[0], 1.0);
        assert_eq!(f[1].to_bits(), MISSING_F32_BITS);
        assert_eq!(f[2].to_bits(), END_OF_VECTOR_F32_BITS);
    }

    #[test]
    fn floats_keep_their_width() {
        assert_eq!(
            TypedValue::from_dense(&[0.5f32]).type_code(),
            TypeCode::Float32
        );
        assert_eq!(
            TypedValue::from_dense(&[0.5f64]).type_code(),
            TypeCode::Float64
        );
    }

    #[test]
    fn dense_sparse_roundtrip() {
        let source = vec![0i32, 5, 0, 0, -3, 0, 0, 0, 7];
        let dense = TypedValue::from_dense(&source);
        let sparse = dense.to_sparse();
        assert!(sparse.is_sparse());
        assert_eq!(sparse.sparse_len(), 3);
        assert_eq!(sparse.len(), source.len());
        let back = sparse.to_dense();
        assert_eq!(back, dense);
    }

    #[test]
    fn sparse_offsets_store_raw_distances() {
        let mut vec = SparseVector::with_len(300);
        vec.set(2, 1.0f32);
        vec.set(3, 1.0);
        vec.set(250, 1.0);
        let v = TypedValue::from_sparse(&vec);
        let TypedValue::Sparse {
            off_width,
            off_bytes,
            ..
        } = &v
        else {
            panic!("expected sparse");
        };
        // distances 2, 1, 247 all fit in one byte
        assert_eq!(*off_width, TypeCode::Int8);
        assert_eq!(off_bytes.as_slice(), &[2, 1, 247]);
        let abs: Vec<u64> = v.iter_raw().map(|(pos, _)| pos).collect();
        assert_eq!(abs, vec![2, 3, 250]);
    }

    #[test]
    fn sparse_offset_width_grows_with_distance() {
        let mut vec = SparseVector::with_len(100_000);
        vec.set(0, 1.0f32);
        vec.set(70_000, 1.0);
        let v = TypedValue::from_sparse(&vec);
        let TypedValue::Sparse { off_width, .. } = &v else {
            panic!("expected sparse");
        };
        assert_eq!(*off_width, TypeCode::Int32);
    }

    #[test]
    fn serialize_roundtrip_dense_and_sparse() {
        let dense = TypedValue::from_dense(&[1i32, 0, MISSING_I32, 400]);
        let mut buf = Vec::new();
        dense.serialize(&mut buf);
        let back = TypedValue::deserialize(&mut buf.as_slice()).unwrap();
        assert_eq!(back, dense);

        let mut vec = SparseVector::with_len(16);
        vec.set(1, 0.5f32);
        vec.set(9, 1.0);
        let sparse = TypedValue::from_sparse(&vec);
        let mut buf = Vec::new();
        sparse.serialize(&mut buf);
        let back = TypedValue::deserialize(&mut buf.as_slice()).unwrap();
        assert_eq!(back, sparse);
    }

    #[test]
    fn deserialize_rejects_bad_width() {
        // dense value claiming type code 9
        let buf = [9u8, 0u8];
        let err = TypedValue::deserialize(&mut buf.as_slice()).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Value(ValueError::BadWidth(9))
        ));

        // sparse value with offset width code 5 (float) is malformed
        let mut buf = Vec::new();
        buf.push(TypeCode::Sparse as u8);
        encode_varint(4, &mut buf).unwrap();
        buf.push((5u8 << 4) | 1);
        encode_varint(0, &mut buf).unwrap();
        let err = TypedValue::deserialize(&mut buf.as_slice()).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Value(ValueError::BadWidth(5))
        ));
    }
}
