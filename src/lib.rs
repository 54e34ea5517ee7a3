//! # sav
//!
//! The `sav` library reads and writes a binary, block-compressed container
//! for per-sample allele and dosage values across many variant sites, with
//! a sidecar range index (`.s1r`) for random access by chromosome region.
//!
//! ## Overview
//!
//! * **Sparse genotype codec**: one byte usually carries both an allele
//!   code and the distance to the next nonzero haplotype slot, via a
//!   prefixed variable-length integer encoding.
//! * **Block compression**: records are grouped into blocks (default 2048
//!   records) and each block is one zstd frame, so a reader can seek to a
//!   block boundary and decode from there.
//! * **Region queries**: the sidecar index maps `(chromosome, interval)`
//!   to `(frame offset, record count)` pairs; the [`IndexedReader`] seeks
//!   block by block and filters records under a [`CoordBound`] policy.
//! * **Typed values**: the [`TypedValue`] container stores vectors densely
//!   or as `(offset, value)` pairs with per-field width selection, BCF v2
//!   reserved sentinels, and a PBWT permutation ([`PbwtContext`]) for
//!   haplotype reordering.
//!
//! ## File structure
//!
//! ```text
//! ┌────────────────────┐
//! │      Preamble      │ magic, uuid, headers, samples (uncompressed)
//! ├────────────────────┤
//! │   Record block     │ one zstd frame, up to block_size records
//! ├────────────────────┤
//! │   Record block     │
//! │        ...         │
//! └────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use sav::{DataFormat, FileHeader, Reader, SiteInfo, SparseVector, WriterBuilder};
//!
//! // write two biallelic records for two diploid samples
//! let header = FileHeader::new(
//!     DataFormat::Genotype,
//!     vec![],
//!     vec!["NA001".to_string(), "NA002".to_string()],
//! );
//! let mut writer = WriterBuilder::new(header).build(Vec::new()).unwrap();
//! writer
//!     .write_dense(&SiteInfo::new("1", 100, "A", "C"), &[0.0, 1.0, 0.0, 0.0])
//!     .unwrap();
//! writer
//!     .write_dense(&SiteInfo::new("1", 200, "G", "T"), &[1.0, 1.0, 0.0, 1.0])
//!     .unwrap();
//! let bytes = writer.into_inner().unwrap();
//!
//! // read them back
//! let mut reader = Reader::new(bytes.as_slice()).unwrap();
//! let mut site = SiteInfo::default();
//! let mut genotypes = SparseVector::new();
//! while reader.read(&mut site, &mut genotypes).unwrap() {
//!     println!("{}:{} {} alt alleles", site.chromosome(), site.position(),
//!              genotypes.non_zero_len());
//! }
//! ```

/// Error definitions
pub mod error;

/// File preamble: magic, uuid, headers, samples
pub mod header;

/// S1R sidecar index
pub mod index;

/// Multi-input positional merge
pub mod merge;

/// PBWT permutation for haplotype vectors
pub mod pbwt;

/// Linear and indexed record readers
pub mod reader;

/// Record codec shared by readers and writers
pub mod record;

/// Site annotations, regions and bounding policies
pub mod site;

/// Ordered sparse vectors
pub mod sparse;

/// Dense-or-sparse typed value container
pub mod value;

/// Varint and prefixed-varint codecs
pub mod varint;

/// Block-buffered record writer
pub mod writer;

pub use error::{Error, HeaderError, IndexError, ReadError, Result, ValueError, WriteError};
pub use header::{parse_header_id, DataFormat, FileHeader, MAGIC, MAJOR_VERSION};
pub use index::{
    index_path_for, Entry, Query, S1rReader, S1rWriter, MAX_FRAME_OFFSET, MAX_RECORDS_PER_BLOCK,
};
pub use merge::{merge, MergeOptions};
pub use pbwt::PbwtContext;
pub use reader::{IndexedReader, Reader, StreamStatus};
pub use record::{OutputFormat, SampleSubset};
pub use site::{region_compare, CoordBound, Region, SiteInfo};
pub use sparse::SparseVector;
pub use value::{Scalar, TypeCode, TypedValue};
pub use varint::{
    decode_prefixed_varint, decode_varint, encode_prefixed_varint, encode_varint, varint_len,
    BitWidth,
};
pub use writer::{Writer, WriterBuilder, DEFAULT_BLOCK_SIZE, DEFAULT_COMPRESSION_LEVEL};

#[cfg(test)]
mod testing {
    use super::*;

    #[test]
    fn write_then_read_smoke() {
        let header = FileHeader::new(
            DataFormat::Genotype,
            vec![(
                "INFO".to_string(),
                "<ID=AF,Description=\"Allele frequency\">".to_string(),
            )],
            vec!["A".to_string(), "B".to_string()],
        );
        let mut writer = WriterBuilder::new(header).build(Vec::new()).unwrap();

        let mut site = SiteInfo::new("1", 42, "A", "C");
        site.set_info("AF", "0.25");
        writer.write_dense(&site, &[0.0, 1.0, 0.0, f32::NAN]).unwrap();
        let bytes = writer.into_inner().unwrap();

        let mut reader = Reader::new(bytes.as_slice()).unwrap();
        let mut got_site = SiteInfo::default();
        let mut genotypes = SparseVector::new();
        assert!(reader.read(&mut got_site, &mut genotypes).unwrap());
        assert_eq!(got_site.chromosome(), "1");
        assert_eq!(got_site.position(), 42);
        assert_eq!(got_site.info("AF"), "0.25");

        let dense = genotypes.to_dense();
        assert_eq!(dense[0], 0.0);
        assert_eq!(dense[1], 1.0);
        assert_eq!(dense[2], 0.0);
        assert!(dense[3].is_nan());

        assert!(!reader.read(&mut got_site, &mut genotypes).unwrap());
        assert!(reader.eof());
    }
}
