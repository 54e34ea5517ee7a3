//! Multi-input positional merge.
//!
//! Merges `k` position-sorted inputs by `(chrom, pos, ref, alt)`: at each
//! step the minimum current position is taken, every input whose site
//! matches contributes its decoded genotype span, and every other input
//! contributes reference alleles (zeros) across its sample span. The
//! output sample list is the concatenation of the input sample lists in
//! argument order.

use std::collections::HashSet;
use std::io::{Read, Write};
use std::path::PathBuf;

use tracing::info;

use crate::error::Result;
use crate::header::{parse_header_id, DataFormat, FileHeader};
use crate::reader::Reader;
use crate::site::SiteInfo;
use crate::sparse::SparseVector;
use crate::writer::{WriterBuilder, DEFAULT_BLOCK_SIZE, DEFAULT_COMPRESSION_LEVEL};

/// Output configuration of a merge run
pub struct MergeOptions {
    pub data_format: DataFormat,
    pub compression_level: i32,
    pub block_size: u16,
    pub index_path: Option<PathBuf>,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            data_format: DataFormat::Genotype,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            block_size: DEFAULT_BLOCK_SIZE,
            index_path: None,
        }
    }
}

struct MergeInput<R: Read> {
    reader: Reader<R>,
    site: SiteInfo,
    active: bool,
    n_samples: usize,
}

/// Merges `inputs` into `sink`, returning the number of records written
///
/// Headers are unioned with `INFO` declarations deduplicated by id, and
/// `ID`, `QUAL` and `FILTER` are promoted to synthetic INFO declarations
/// when no input declares them.
pub fn merge<R: Read, W: Write>(
    inputs: Vec<Reader<R>>,
    sink: W,
    options: &MergeOptions,
) -> Result<u64> {
    let header = merged_header(&inputs, options.data_format);
    let mut builder = WriterBuilder::new(header)
        .compression_level(options.compression_level)
        .block_size(options.block_size);
    if let Some(path) = &options.index_path {
        builder = builder.index_path(path);
    }
    let mut writer = builder.build(sink)?;

    let mut inputs: Vec<MergeInput<R>> = inputs
        .into_iter()
        .map(|reader| MergeInput {
            n_samples: reader.header().n_samples(),
            reader,
            site: SiteInfo::default(),
            active: false,
        })
        .collect();
    for input in &mut inputs {
        input.active = input.reader.read_site(&mut input.site)?;
    }

    let mut records = 0u64;
    loop {
        let Some(lead) = inputs
            .iter()
            .enumerate()
            .filter(|(_, input)| input.active)
            .min_by_key(|(_, input)| input.site.position())
            .map(|(i, _)| i)
        else {
            break;
        };

        let site = inputs[lead].site.clone();
        let matching: Vec<bool> = inputs
            .iter()
            .map(|input| {
                input.active
                    && input.site.chromosome() == site.chromosome()
                    && input.site.position() == site.position()
                    && input.site.ref_allele() == site.ref_allele()
                    && input.site.alt_allele() == site.alt_allele()
            })
            .collect();

        // decode the matching spans; everyone else stays reference
        let mut pieces: Vec<Option<SparseVector<f32>>> = vec![None; inputs.len()];
        for (i, input) in inputs.iter_mut().enumerate() {
            if matching[i] {
                let mut dest = SparseVector::new();
                input.reader.read_genotypes(&mut dest)?;
                pieces[i] = Some(dest);
            }
        }

        // ploidy comes from the lead input's decoded span (the lead always
        // matches itself) and is assumed uniform across inputs
        let ploidy = pieces[lead]
            .as_ref()
            .map(|v| (v.len() / inputs[lead].n_samples.max(1)).max(1))
            .unwrap_or(2);

        let mut merged = SparseVector::new();
        let mut at = 0usize;
        for (i, piece) in pieces.iter().enumerate() {
            match piece {
                Some(v) => {
                    merged.extend_shifted(v, at);
                    at += v.len();
                }
                None => {
                    at += inputs[i].n_samples * ploidy;
                }
            }
        }
        if merged.len() < at {
            merged.resize(at);
        }

        writer.write_sparse(&site, &merged)?;
        records += 1;

        for (i, input) in inputs.iter_mut().enumerate() {
            if matching[i] {
                input.active = input.reader.read_site(&mut input.site)?;
            }
        }
    }

    writer.finish()?;
    info!(records, "merge complete");
    Ok(records)
}

/// Builds the merged preamble: concatenated samples, unioned headers
fn merged_header<R: Read>(inputs: &[Reader<R>], data_format: DataFormat) -> FileHeader {
    let mut samples = Vec::new();
    let mut headers: Vec<(String, String)> = Vec::new();
    let mut info_ids: HashSet<String> = HashSet::new();

    for reader in inputs {
        samples.extend(reader.header().samples().iter().cloned());
        for (key, value) in reader.header().headers() {
            if key == "FORMAT" {
                continue;
            }
            if key == "INFO" {
                let Some(id) = parse_header_id(value) else {
                    continue;
                };
                if !info_ids.insert(id) {
                    continue;
                }
            }
            headers.push((key.clone(), value.clone()));
        }
    }

    for (id, description) in [
        ("FILTER", "Variant filter"),
        ("QUAL", "Variant quality"),
        ("ID", "Variant ID"),
    ] {
        if info_ids.insert(id.to_string()) {
            headers.insert(
                0,
                (
                    "INFO".to_string(),
                    format!("<ID={id},Description=\"{description}\">"),
                ),
            );
        }
    }

    FileHeader::new(data_format, headers, samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparse::SparseVector;
    use crate::writer::WriterBuilder;

    fn write_input(samples: &[&str], records: &[(u64, &str, &str, &[f32])]) -> Vec<u8> {
        let header = FileHeader::new(
            DataFormat::Genotype,
            vec![],
            samples.iter().map(|s| s.to_string()).collect(),
        );
        let mut writer = WriterBuilder::new(header).build(Vec::new()).unwrap();
        for (pos, r, a, data) in records {
            writer
                .write_dense(&SiteInfo::new("1", *pos, *r, *a), data)
                .unwrap();
        }
        writer.into_inner().unwrap()
    }

    fn read_all(bytes: &[u8]) -> Vec<(SiteInfo, Vec<f32>)> {
        let mut reader = Reader::new(bytes).unwrap();
        let mut out = Vec::new();
        let mut site = SiteInfo::default();
        let mut dest = SparseVector::new();
        while reader.read(&mut site, &mut dest).unwrap() {
            out.push((site.clone(), dest.to_dense()));
        }
        out
    }

    #[test]
    fn merge_concatenates_matching_records() {
        let file1 = write_input(&["A", "B"], &[(100, "A", "C", &[0.0, 1.0, 1.0, 0.0])]);
        let file2 = write_input(&["C", "D"], &[(100, "A", "C", &[1.0, 1.0, 0.0, 0.0])]);

        let inputs = vec![
            Reader::new(file1.as_slice()).unwrap(),
            Reader::new(file2.as_slice()).unwrap(),
        ];
        let mut out = Vec::new();
        let n = merge(inputs, &mut out, &MergeOptions::default()).unwrap();
        assert_eq!(n, 1);

        let reader = Reader::new(out.as_slice()).unwrap();
        assert_eq!(reader.header().samples(), ["A", "B", "C", "D"]);
        drop(reader);

        let records = read_all(&out);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0.position(), 100);
        assert_eq!(
            records[0].1,
            vec![0.0, 1.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0]
        );
    }

    #[test]
    fn non_matching_inputs_contribute_reference() {
        let file1 = write_input(
            &["A"],
            &[(100, "A", "C", &[1.0, 1.0]), (300, "G", "T", &[0.0, 1.0])],
        );
        let file2 = write_input(&["B"], &[(200, "A", "C", &[1.0, 0.0])]);

        let inputs = vec![
            Reader::new(file1.as_slice()).unwrap(),
            Reader::new(file2.as_slice()).unwrap(),
        ];
        let mut out = Vec::new();
        let n = merge(inputs, &mut out, &MergeOptions::default()).unwrap();
        assert_eq!(n, 3);

        let records = read_all(&out);
        let positions: Vec<u64> = records.iter().map(|(s, _)| s.position()).collect();
        assert_eq!(positions, vec![100, 200, 300]);
        // at pos 100 only file1 matches; file2's sample span is reference
        assert_eq!(records[0].1, vec![1.0, 1.0, 0.0, 0.0]);
        assert_eq!(records[1].1, vec![0.0, 0.0, 1.0, 0.0]);
        assert_eq!(records[2].1, vec![0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn merged_header_promotes_synthetic_info_fields() {
        let file1 = write_input(&["A"], &[]);
        let inputs = vec![Reader::new(file1.as_slice()).unwrap()];
        let header = merged_header(&inputs, DataFormat::Genotype);
        assert_eq!(header.info_fields(), ["ID", "QUAL", "FILTER"]);
    }
}
