//! LEB128-style variable-length integers and the prefixed variant used by
//! the genotype payload.
//!
//! A plain varint stores 7 payload bits per byte, little-endian, with the
//! high bit of each byte set on all but the last. A prefixed varint(N)
//! additionally reserves the low N bits of the *first* byte for an
//! out-of-band payload (the allele code), leaving `7 - N` bits of the first
//! byte for the integer's least significant bits.

use std::io::{Read, Write};

use crate::error::{ReadError, Result};

/// Longest legal encoding of a 64-bit varint
pub const MAX_VARINT_BYTES: usize = 10;

/// Number of allele-code bits carried in the first byte of a prefixed varint
///
/// The width is fixed per file by the FORMAT header and dispatched once per
/// record, so the pair-decoding loop always sees a concrete width.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BitWidth {
    /// No payload; degenerates to a plain varint
    Zero,
    /// One payload bit (biallelic hard calls)
    One,
    /// Seven payload bits (quantized haplotype dosages)
    Seven,
}

impl BitWidth {
    #[must_use]
    pub fn bits(self) -> u8 {
        match self {
            Self::Zero => 0,
            Self::One => 1,
            Self::Seven => 7,
        }
    }

    /// Mask selecting the payload bits of the first byte
    #[must_use]
    pub fn payload_mask(self) -> u8 {
        ((1u16 << self.bits()) - 1) as u8
    }

    /// Number of representable allele codes (`2^N`)
    #[must_use]
    pub fn levels(self) -> u16 {
        1u16 << self.bits()
    }
}

fn read_u8<R: Read>(input: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    match input.read_exact(&mut buf) {
        Ok(()) => Ok(buf[0]),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(ReadError::Truncated.into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Reads one byte, mapping a clean EOF on the first byte to `None`
pub(crate) fn try_read_u8<R: Read>(input: &mut R) -> Result<Option<u8>> {
    let mut buf = [0u8; 1];
    loop {
        return match input.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(buf[0])),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => Err(e.into()),
        };
    }
}

/// Encodes an unsigned integer as a LEB128 varint
pub fn encode_varint<W: Write>(mut value: u64, out: &mut W) -> std::io::Result<()> {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.write_all(&[byte])?;
            return Ok(());
        }
        out.write_all(&[byte | 0x80])?;
    }
}

/// Number of bytes `encode_varint` emits for `value`
#[must_use]
pub fn varint_len(value: u64) -> usize {
    if value == 0 {
        1
    } else {
        (64 - value.leading_zeros() as usize).div_ceil(7)
    }
}

/// Decodes a LEB128 varint
///
/// Sequences longer than [`MAX_VARINT_BYTES`] are rejected, and an EOF in
/// the middle of a varint reports [`ReadError::Truncated`].
pub fn decode_varint<R: Read>(input: &mut R) -> Result<u64> {
    decode_varint_after(input, 0, 0)
}

/// Completes a varint whose first byte was already consumed
pub(crate) fn decode_varint_with_first<R: Read>(first: u8, input: &mut R) -> Result<u64> {
    let value = u64::from(first & 0x7F);
    if first & 0x80 == 0 {
        Ok(value)
    } else {
        decode_varint_after(input, value, 7)
    }
}

/// Decodes a varint given already-consumed leading state
///
/// `value` holds bits already extracted (from a prefixed first byte) and
/// `shift` the bit position where the next byte's payload lands. The byte
/// limit shrinks with the bits already consumed so no legal encoding is
/// rejected and no shift reaches the word width.
fn decode_varint_after<R: Read>(input: &mut R, mut value: u64, mut shift: u32) -> Result<u64> {
    let limit = MAX_VARINT_BYTES - (shift as usize).div_ceil(7);
    for _ in 0..limit {
        let byte = read_u8(input)?;
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
    Err(ReadError::MalformedVarint.into())
}

/// Encodes a prefixed varint: `payload` in the low N bits of the lead byte,
/// `value` in the remaining bits and any continuation bytes
pub fn encode_prefixed_varint<W: Write>(
    width: BitWidth,
    payload: u8,
    value: u64,
    out: &mut W,
) -> std::io::Result<()> {
    debug_assert!(payload <= width.payload_mask());
    let n = width.bits();
    let lead_bits = 7 - n;
    let lead_mask = (1u64 << lead_bits) - 1;
    let mut lead = (payload & width.payload_mask()) | (((value & lead_mask) as u8) << n);
    let rest = value >> lead_bits;
    if rest != 0 {
        lead |= 0x80;
        out.write_all(&[lead])?;
        encode_varint(rest, out)
    } else {
        out.write_all(&[lead])?;
        Ok(())
    }
}

/// Decodes a prefixed varint, returning `(payload, value)`
pub fn decode_prefixed_varint<R: Read>(width: BitWidth, input: &mut R) -> Result<(u8, u64)> {
    let n = width.bits();
    let lead = read_u8(input)?;
    let payload = lead & width.payload_mask();
    let value = u64::from((lead >> n) & (0x7F >> n));
    if lead & 0x80 != 0 {
        let value = decode_prefixed_rest(input, value, 7 - n)?;
        Ok((payload, value))
    } else {
        Ok((payload, value))
    }
}

fn decode_prefixed_rest<R: Read>(input: &mut R, value: u64, shift: u8) -> Result<u64> {
    decode_varint_after(input, value, u32::from(shift))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};
    use std::io::Cursor;

    fn roundtrip(value: u64) -> u64 {
        let mut buf = Vec::new();
        encode_varint(value, &mut buf).unwrap();
        assert_eq!(buf.len(), varint_len(value));
        decode_varint(&mut Cursor::new(buf)).unwrap()
    }

    #[test]
    fn varint_roundtrip_boundaries() {
        for &v in &[
            0u64,
            1,
            0x7F,
            0x80,
            0x3FFF,
            0x4000,
            u64::from(u32::MAX),
            1 << 48,
            (1 << 63) - 1,
            1 << 63,
            u64::MAX,
        ] {
            assert_eq!(roundtrip(v), v);
        }
    }

    #[test]
    fn varint_roundtrip_random() {
        let mut rng = SmallRng::seed_from_u64(42);
        for _ in 0..10_000 {
            let bits = rng.gen_range(0..64);
            let v: u64 = rng.gen::<u64>() >> bits;
            assert_eq!(roundtrip(v), v);
        }
    }

    #[test]
    fn varint_length_is_ceil_bits_over_seven() {
        assert_eq!(varint_len(0), 1);
        assert_eq!(varint_len(0x7F), 1);
        assert_eq!(varint_len(0x80), 2);
        assert_eq!(varint_len(u64::MAX), 10);
    }

    #[test]
    fn varint_rejects_overlong_sequence() {
        let buf = [0x80u8; 11];
        let err = decode_varint(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Read(ReadError::MalformedVarint)
        ));
    }

    #[test]
    fn varint_truncated_reports_error() {
        let buf = [0x80u8, 0x80];
        let err = decode_varint(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, crate::Error::Read(ReadError::Truncated)));
    }

    #[test]
    fn prefixed_roundtrip_exhaustive_payloads() {
        for width in [BitWidth::Zero, BitWidth::One, BitWidth::Seven] {
            for payload in 0..width.levels() as u8 {
                for &v in &[0u64, 1, 63, 64, 127, 128, 0xFFFF, u64::MAX] {
                    let mut buf = Vec::new();
                    encode_prefixed_varint(width, payload, v, &mut buf).unwrap();
                    let (p, got) =
                        decode_prefixed_varint(width, &mut Cursor::new(buf)).unwrap();
                    assert_eq!((p, got), (payload, v), "width {width:?}");
                }
            }
        }
    }

    #[test]
    fn prefixed_roundtrip_random() {
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..10_000 {
            let width = match rng.gen_range(0..3) {
                0 => BitWidth::Zero,
                1 => BitWidth::One,
                _ => BitWidth::Seven,
            };
            let payload = rng.gen_range(0..width.levels()) as u8;
            let value: u64 = rng.gen::<u64>() >> rng.gen_range(0..64);
            let mut buf = Vec::new();
            encode_prefixed_varint(width, payload, value, &mut buf).unwrap();
            let (p, v) = decode_prefixed_varint(width, &mut Cursor::new(buf)).unwrap();
            assert_eq!((p, v), (payload, value));
        }
    }

    #[test]
    fn prefixed_single_byte_when_value_fits() {
        // 6 value bits fit alongside a 1-bit payload
        let mut buf = Vec::new();
        encode_prefixed_varint(BitWidth::One, 1, 63, &mut buf).unwrap();
        assert_eq!(buf.len(), 1);

        // with 7 payload bits the integer always spills to a second byte
        let mut buf = Vec::new();
        encode_prefixed_varint(BitWidth::Seven, 0x55, 1, &mut buf).unwrap();
        assert_eq!(buf.len(), 2);
        let mut buf = Vec::new();
        encode_prefixed_varint(BitWidth::Seven, 0x55, 0, &mut buf).unwrap();
        assert_eq!(buf.len(), 1);
    }
}
