//! Positional Burrows-Wheeler permutation for haplotype vectors.
//!
//! A [`PbwtContext`] carries two permutations across successive sites: the
//! order inherited from the previous site and the order after including the
//! current site's values. Each site performs one stable counting-sort pass;
//! equal values keep their previous relative order, which is what makes
//! runs form in later columns and is the entire point of the transform.
//!
//! Sorting and unsorting are symmetric: both sides compute the identical
//! permutation update, so a reader that unsorts every record it decodes
//! stays in lockstep with the writer that sorted them.

use crate::error::{Result, ValueError};
use crate::value::{TypeCode, TypedValue};

/// Per-stream PBWT permutation state
#[derive(Clone, Debug, Default)]
pub struct PbwtContext {
    sort_map: Vec<usize>,
    prev_map: Vec<usize>,
    counts: Vec<usize>,
}

/// Value types narrow enough to histogram by their unsigned bit pattern
trait PbwtScalar: Copy {
    fn bucket(self) -> usize;
}

impl PbwtScalar for i8 {
    fn bucket(self) -> usize {
        self as u8 as usize
    }
}

impl PbwtScalar for i16 {
    fn bucket(self) -> usize {
        self as u16 as usize
    }
}

impl PbwtContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the permutation chain (e.g. at a chromosome change)
    pub fn reset(&mut self) {
        self.sort_map.clear();
        self.prev_map.clear();
        self.counts.clear();
    }

    /// Sorts a dense int8/int16 value by the evolving PBWT permutation
    ///
    /// Returns the permuted vector with the same width; the context advances
    /// to the order that includes this site.
    pub fn sort(&mut self, value: &TypedValue) -> Result<TypedValue> {
        match value {
            TypedValue::Sparse { .. } => Err(ValueError::PbwtSparse.into()),
            TypedValue::Dense {
                width: TypeCode::Int8,
                len,
                bytes,
            } => {
                let data: Vec<i8> = bytes.iter().map(|&b| b as i8).collect();
                let out = self.sort_impl(&data)?;
                Ok(TypedValue::Dense {
                    width: TypeCode::Int8,
                    len: *len,
                    bytes: out.into_iter().map(|v| v as u8).collect(),
                })
            }
            TypedValue::Dense {
                width: TypeCode::Int16,
                len,
                bytes,
            } => {
                let data = i16_from_le(bytes);
                let out = self.sort_impl(&data)?;
                Ok(TypedValue::Dense {
                    width: TypeCode::Int16,
                    len: *len,
                    bytes: i16_to_le(&out),
                })
            }
            other => Err(ValueError::PbwtWidth(other.type_code() as u8).into()),
        }
    }

    /// Inverts [`PbwtContext::sort`] given the decoded sorted vector
    pub fn unsort(&mut self, value: &TypedValue) -> Result<TypedValue> {
        match value {
            TypedValue::Sparse { .. } => Err(ValueError::PbwtSparse.into()),
            TypedValue::Dense {
                width: TypeCode::Int8,
                len,
                bytes,
            } => {
                let data: Vec<i8> = bytes.iter().map(|&b| b as i8).collect();
                let out = self.unsort_impl(&data)?;
                Ok(TypedValue::Dense {
                    width: TypeCode::Int8,
                    len: *len,
                    bytes: out.into_iter().map(|v| v as u8).collect(),
                })
            }
            TypedValue::Dense {
                width: TypeCode::Int16,
                len,
                bytes,
            } => {
                let data = i16_from_le(bytes);
                let out = self.unsort_impl(&data)?;
                Ok(TypedValue::Dense {
                    width: TypeCode::Int16,
                    len: *len,
                    bytes: i16_to_le(&out),
                })
            }
            other => Err(ValueError::PbwtWidth(other.type_code() as u8).into()),
        }
    }

    /// Swaps in the previous permutation and primes both maps for `len`
    fn advance(&mut self, len: usize) -> Result<()> {
        std::mem::swap(&mut self.sort_map, &mut self.prev_map);
        if self.prev_map.is_empty() {
            self.prev_map.extend(0..len);
        }
        if self.sort_map.len() != len {
            self.sort_map.resize(len, 0);
        }
        if self.prev_map.len() != len {
            return Err(ValueError::PbwtLengthMismatch {
                expected: self.prev_map.len(),
                got: len,
            }
            .into());
        }
        Ok(())
    }

    fn histogram<T: PbwtScalar>(&mut self, data: &[T]) {
        self.counts.clear();
        for &v in data {
            let d = v.bucket() + 1;
            if d >= self.counts.len() {
                self.counts.resize(d + 1, 0);
            }
            self.counts[d] += 1;
        }
        for i in 1..self.counts.len() {
            self.counts[i] += self.counts[i - 1];
        }
    }

    fn sort_impl<T: PbwtScalar>(&mut self, data: &[T]) -> Result<Vec<T>> {
        self.advance(data.len())?;
        self.histogram(data);

        let mut out = Vec::with_capacity(data.len());
        for i in 0..data.len() {
            let idx = self.prev_map[i];
            let d = data[idx].bucket();
            self.sort_map[self.counts[d]] = idx;
            self.counts[d] += 1;
            out.push(data[idx]);
        }
        Ok(out)
    }

    fn unsort_impl<T: PbwtScalar + Default>(&mut self, sorted: &[T]) -> Result<Vec<T>> {
        self.advance(sorted.len())?;
        self.histogram(sorted);

        let mut out = vec![T::default(); sorted.len()];
        for i in 0..sorted.len() {
            let idx = self.prev_map[i];
            out[idx] = sorted[i];
            let d = sorted[i].bucket();
            self.sort_map[self.counts[d]] = idx;
            self.counts[d] += 1;
        }
        Ok(out)
    }
}

fn i16_from_le(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect()
}

fn i16_to_le(values: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 2);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}
