//! On-disk record codec.
//!
//! One record is, in order: the site fields (chromosome, 1-based position,
//! ref and alt alleles, all varint-length-prefixed), one length-prefixed
//! value per declared INFO field, and the genotype payload: `ploidy`,
//! `nonzero_count`, then `nonzero_count` prefixed-varint pairs and a single
//! terminator byte. Each pair carries an allele code in the lead byte's low
//! bits and the distance to the next nonzero haplotype slot in the rest;
//! the decoder reconstructs absolute offsets with the "distance then
//! advance by one" rule, so adjacent nonzero slots encode a zero distance.

use std::collections::HashMap;
use std::io::Read;

use crate::error::{ReadError, Result, WriteError};
use crate::site::SiteInfo;
use crate::sparse::SparseVector;
use crate::value::missing_f32;
use crate::varint::{
    decode_prefixed_varint, decode_varint, decode_varint_with_first, encode_prefixed_varint,
    encode_varint, try_read_u8, BitWidth,
};

/// Shape of the decoded genotype vector
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// One value per haplotype slot (`num_samples × ploidy` long)
    #[default]
    Haplotypes,
    /// One value per sample, haplotype values accumulated additively
    Samples,
}

/// Decode-time sample subset: original index to subset index
#[derive(Clone, Debug)]
pub struct SampleSubset {
    map: Vec<Option<usize>>,
    n_subset: usize,
}

impl SampleSubset {
    /// Builds the subset map for `keep` against the file's sample list
    ///
    /// Returns the map together with the kept ids (the intersection, in
    /// file order).
    pub fn new<S: AsRef<str>>(samples: &[String], keep: &[S]) -> (Self, Vec<String>) {
        let mut map = vec![None; samples.len()];
        let mut kept = Vec::new();
        for (i, sample) in samples.iter().enumerate() {
            if keep.iter().any(|k| k.as_ref() == sample) {
                map[i] = Some(kept.len());
                kept.push(sample.clone());
            }
        }
        let n_subset = kept.len();
        (Self { map, n_subset }, kept)
    }

    #[must_use]
    pub fn n_subset(&self) -> usize {
        self.n_subset
    }

    fn lookup(&self, sample: usize) -> Option<usize> {
        self.map.get(sample).copied().flatten()
    }
}

/// Allele code for `value`, or `None` when the value is not stored
///
/// Hard calls (width 1) store missing as code 0 and the alternate allele as
/// code 1; the reference value is implied by absence. Dosages (width 7)
/// quantize to 128 levels with missing folded onto the `0.5` code.
pub(crate) fn encode_allele(width: BitWidth, value: f32) -> Option<u8> {
    match width {
        BitWidth::One => {
            if value.is_nan() {
                Some(0)
            } else if value == 0.0 {
                None
            } else {
                Some(1)
            }
        }
        BitWidth::Seven => {
            let multiplier = f32::from(width.levels());
            let x = if value.is_nan() { 0.5 } else { value };
            let code = (x * multiplier).round() - 1.0;
            if code < 0.0 {
                None
            } else {
                Some((code as i32).min(0x7F) as u8)
            }
        }
        BitWidth::Zero => None,
    }
}

/// Allele code reserved for MISSING at this width
pub(crate) fn missing_code(width: BitWidth) -> u8 {
    (width.levels() / 2 - 1) as u8
}

/// Value for an allele code
pub(crate) fn decode_allele(width: BitWidth, code: u8) -> f32 {
    if code == missing_code(width) {
        return missing_f32();
    }
    match width {
        BitWidth::One => 1.0,
        BitWidth::Seven => f32::from(u16::from(code) + 1) / f32::from(width.levels()),
        BitWidth::Zero => 1.0,
    }
}

/// Encodes one record into `out`
///
/// `pairs` yields `(absolute offset, value)` candidates over a dense length
/// of `len`; values whose allele code is `None` are skipped, so dense
/// sources may yield every slot.
pub(crate) fn encode_record<I>(
    out: &mut Vec<u8>,
    site: &SiteInfo,
    info_fields: &[String],
    pairs: I,
    len: usize,
    n_samples: usize,
    width: BitWidth,
) -> Result<()>
where
    I: Iterator<Item = (u64, f32)> + Clone,
{
    if n_samples == 0 || len % n_samples != 0 {
        return Err(WriteError::SampleCountMismatch {
            samples: n_samples,
            len,
        }
        .into());
    }
    let ploidy = (len / n_samples) as u64;

    write_bytes(site.chromosome().as_bytes(), out);
    encode_varint(site.position(), out)?;
    write_bytes(site.ref_allele().as_bytes(), out);
    write_bytes(site.alt_allele().as_bytes(), out);
    for key in info_fields {
        write_bytes(site.info(key).as_bytes(), out);
    }

    encode_varint(ploidy, out)?;
    let nonzero = pairs
        .clone()
        .filter(|&(_, v)| encode_allele(width, v).is_some())
        .count() as u64;
    encode_varint(nonzero, out)?;

    let mut last_pos = 0u64;
    for (pos, value) in pairs {
        if let Some(code) = encode_allele(width, value) {
            let offset = pos - last_pos;
            last_pos = pos + 1;
            encode_prefixed_varint(width, code, offset, out)?;
        }
    }

    out.push(0);
    Ok(())
}

fn write_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    encode_varint(bytes.len() as u64, out).expect("vec write is infallible");
    out.extend_from_slice(bytes);
}

/// Decodes the site fields into `site`
///
/// Returns `Ok(false)` on a clean EOF before the first byte; any other
/// truncation is an error.
pub(crate) fn decode_site<R: Read>(
    input: &mut R,
    info_fields: &[String],
    site: &mut SiteInfo,
) -> Result<bool> {
    let Some(first) = try_read_u8(input)? else {
        return Ok(false);
    };
    let chrom_len = decode_varint_with_first(first, input)? as usize;
    let chrom = read_string(input, chrom_len)?;

    let pos = decode_varint(input)?;
    let ref_len = decode_varint(input)? as usize;
    let ref_allele = read_string(input, ref_len)?;
    let alt_len = decode_varint(input)? as usize;
    let alt_allele = read_string(input, alt_len)?;

    let mut info = HashMap::new();
    for key in info_fields {
        let len = decode_varint(input)? as usize;
        if len > 0 {
            info.insert(key.clone(), read_string(input, len)?);
        }
    }

    site.assign(chrom, pos, ref_allele, alt_allele, info);
    Ok(true)
}

fn read_string<R: Read>(input: &mut R, len: usize) -> Result<String> {
    let mut buf = vec![0u8; len];
    input
        .read_exact(&mut buf)
        .map_err(|_| ReadError::Truncated)?;
    Ok(std::str::from_utf8(&buf)?.to_string())
}

/// Decodes the genotype payload into `dest`
///
/// The destination is emptied before any byte is consumed, so a failed
/// decode leaves it empty.
pub(crate) fn decode_genotypes<R: Read>(
    input: &mut R,
    width: BitWidth,
    n_samples: usize,
    subset: Option<&SampleSubset>,
    output: OutputFormat,
    dest: &mut SparseVector<f32>,
) -> Result<()> {
    dest.resize(0);
    match decode_genotypes_impl(input, width, n_samples, subset, output, dest) {
        Ok(()) => Ok(()),
        Err(e) => {
            dest.resize(0);
            Err(e)
        }
    }
}

fn decode_genotypes_impl<R: Read>(
    input: &mut R,
    width: BitWidth,
    n_samples: usize,
    subset: Option<&SampleSubset>,
    output: OutputFormat,
    dest: &mut SparseVector<f32>,
) -> Result<()> {
    let ploidy = decode_varint(input)? as usize;
    let nonzero = decode_varint(input)?;

    let out_samples = subset.map_or(n_samples, SampleSubset::n_subset);
    let dense_len = n_samples * ploidy;
    dest.resize(match output {
        OutputFormat::Haplotypes => out_samples * ploidy,
        OutputFormat::Samples => out_samples,
    });

    let mut total = 0u64;
    for _ in 0..nonzero {
        let (code, offset) = decode_prefixed_varint(width, input)?;
        let abs = total + offset;
        total = abs + 1;
        if abs >= dense_len as u64 {
            return Err(ReadError::CorruptRecord.into());
        }
        let value = decode_allele(width, code);

        let sample = abs as usize / ploidy.max(1);
        let hap = abs as usize % ploidy.max(1);
        let slot = match subset {
            Some(subset) => match subset.lookup(sample) {
                Some(new) => new,
                None => continue,
            },
            None => sample,
        };
        match output {
            OutputFormat::Haplotypes => dest.set(slot * ploidy + hap, value),
            OutputFormat::Samples => *dest.get_mut(slot) += value,
        }
    }

    consume_terminator(input)
}

/// Skips the genotype payload without materializing it
pub(crate) fn discard_genotypes<R: Read>(input: &mut R, width: BitWidth) -> Result<()> {
    let _ploidy = decode_varint(input)?;
    let nonzero = decode_varint(input)?;
    for _ in 0..nonzero {
        decode_prefixed_varint(width, input)?;
    }
    consume_terminator(input)
}

fn consume_terminator<R: Read>(input: &mut R) -> Result<()> {
    let mut buf = [0u8; 1];
    input
        .read_exact(&mut buf)
        .map_err(|_| ReadError::Truncated)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::DataFormat;

    fn encode_dense(
        site: &SiteInfo,
        info_fields: &[String],
        data: &[f32],
        n_samples: usize,
        width: BitWidth,
    ) -> Vec<u8> {
        let mut out = Vec::new();
        let pairs = data.iter().enumerate().map(|(i, &v)| (i as u64, v));
        encode_record(&mut out, site, info_fields, pairs, data.len(), n_samples, width)
            .unwrap();
        out
    }

    #[test]
    fn hard_call_codes() {
        let w = BitWidth::One;
        assert_eq!(encode_allele(w, 0.0), None);
        assert_eq!(encode_allele(w, 1.0), Some(1));
        assert_eq!(encode_allele(w, f32::NAN), Some(0));
        assert_eq!(decode_allele(w, 1), 1.0);
        assert_eq!(decode_allele(w, 0).to_bits(), missing_f32().to_bits());
    }

    #[test]
    fn dosage_codes_quantize_to_128_levels() {
        let w = BitWidth::Seven;
        assert_eq!(encode_allele(w, 0.0), None);
        assert_eq!(encode_allele(w, 1.0), Some(127));
        assert_eq!(encode_allele(w, 0.5), Some(63));
        assert_eq!(encode_allele(w, f32::NAN), Some(63));
        assert_eq!(missing_code(w), 63);

        assert_eq!(decode_allele(w, 127), 1.0);
        assert!(decode_allele(w, 63).is_nan());
        for code in 0..128u8 {
            if code == 63 {
                continue;
            }
            let x = decode_allele(w, code);
            assert_eq!(encode_allele(w, x), Some(code));
        }
    }

    #[test]
    fn record_roundtrip_hard_calls() {
        let mut site = SiteInfo::new("1", 100, "A", "C");
        site.set_info("ID", "rs1");
        let info_fields = vec!["ID".to_string(), "QUAL".to_string()];
        let data = [0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0];
        let bytes = encode_dense(&site, &info_fields, &data, 4, BitWidth::One);

        let mut input = bytes.as_slice();
        let mut got_site = SiteInfo::default();
        assert!(decode_site(&mut input, &info_fields, &mut got_site).unwrap());
        assert_eq!(got_site.chromosome(), "1");
        assert_eq!(got_site.position(), 100);
        assert_eq!(got_site.info("ID"), "rs1");
        assert_eq!(got_site.info("QUAL"), "");

        let mut dest = SparseVector::new();
        decode_genotypes(
            &mut input,
            BitWidth::One,
            4,
            None,
            OutputFormat::Haplotypes,
            &mut dest,
        )
        .unwrap();
        assert_eq!(dest.to_dense(), data);
        assert!(input.is_empty());
    }

    #[test]
    fn adjacent_nonzero_slots_use_zero_distance() {
        let site = SiteInfo::new("1", 1, "A", "C");
        let data = [1.0f32, 1.0];
        let bytes = encode_dense(&site, &[], &data, 2, BitWidth::One);
        // payload bytes: ploidy=1, nonzero=2, pair(code1, off0), pair(code1, off0), term
        let tail = &bytes[bytes.len() - 5..];
        assert_eq!(tail[0], 1); // ploidy
        assert_eq!(tail[1], 2); // nonzero count
        assert_eq!(tail[2], tail[3]); // both pairs: code 1, distance 0
        assert_eq!(tail[4], 0); // terminator
    }

    #[test]
    fn discard_consumes_exactly_one_record_payload() {
        let site = SiteInfo::new("1", 5, "A", "C");
        let data = [0.0, 1.0, f32::NAN, 0.0];
        let mut bytes = encode_dense(&site, &[], &data, 4, BitWidth::One);
        bytes.extend_from_slice(&[0xAB, 0xCD]); // trailing bytes of a next record

        let mut input = bytes.as_slice();
        let mut site2 = SiteInfo::default();
        decode_site(&mut input, &[], &mut site2).unwrap();
        discard_genotypes(&mut input, BitWidth::One).unwrap();
        assert_eq!(input, &[0xAB, 0xCD]);
    }

    #[test]
    fn subset_decode_remaps_slots() {
        let samples: Vec<String> = ["A", "B", "C", "D"].iter().map(|s| s.to_string()).collect();
        let (subset, kept) = SampleSubset::new(&samples, &["B", "D"]);
        assert_eq!(kept, ["B", "D"]);
        assert_eq!(subset.n_subset(), 2);

        let site = SiteInfo::new("1", 10, "A", "C");
        let data = [0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 1.0, 1.0];
        let bytes = encode_dense(&site, &[], &data, 4, BitWidth::One);

        let mut input = bytes.as_slice();
        let mut got_site = SiteInfo::default();
        decode_site(&mut input, &[], &mut got_site).unwrap();
        let mut dest = SparseVector::new();
        decode_genotypes(
            &mut input,
            BitWidth::One,
            4,
            Some(&subset),
            OutputFormat::Haplotypes,
            &mut dest,
        )
        .unwrap();
        assert_eq!(dest.to_dense(), vec![1.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn per_sample_output_accumulates() {
        let site = SiteInfo::new("1", 10, "A", "C");
        let data = [1.0, 1.0, 0.0, 1.0, 0.0, 0.0];
        let bytes = encode_dense(&site, &[], &data, 3, BitWidth::One);

        let mut input = bytes.as_slice();
        let mut got_site = SiteInfo::default();
        decode_site(&mut input, &[], &mut got_site).unwrap();
        let mut dest = SparseVector::new();
        decode_genotypes(
            &mut input,
            BitWidth::One,
            3,
            None,
            OutputFormat::Samples,
            &mut dest,
        )
        .unwrap();
        assert_eq!(dest.to_dense(), vec![2.0, 1.0, 0.0]);
    }

    #[test]
    fn failed_decode_leaves_destination_empty() {
        let site = SiteInfo::new("1", 10, "A", "C");
        let data = [0.0, 1.0];
        let bytes = encode_dense(&site, &[], &data, 2, BitWidth::One);

        // drop the terminator and final pair to force a truncation
        let mut input = &bytes[..bytes.len() - 2];
        let mut got_site = SiteInfo::default();
        decode_site(&mut input, &[], &mut got_site).unwrap();
        let mut dest = SparseVector::new();
        dest.resize(8);
        let err = decode_genotypes(
            &mut input,
            BitWidth::One,
            2,
            None,
            OutputFormat::Haplotypes,
            &mut dest,
        );
        assert!(err.is_err());
        assert_eq!(dest.non_zero_len(), 0);
    }

    #[test]
    fn format_bit_widths_match_declared_format() {
        assert_eq!(DataFormat::Genotype.bit_width(), BitWidth::One);
        assert_eq!(DataFormat::HaplotypeDosage.bit_width(), BitWidth::Seven);
    }
}
