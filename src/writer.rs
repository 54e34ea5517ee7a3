//! Writer implementation for sav files.
//!
//! The writer buffers encoded records into the open block and flushes the
//! block as one zstd frame when it fills, when the chromosome changes, or
//! at finish. Each flush emits one S1R entry carrying the block's position
//! bounds and the byte offset where its frame begins, so `bytes_written`
//! is tracked on this side of the compressor.
//!
//! # Example
//!
//! ```rust,no_run
//! use sav::{DataFormat, FileHeader, SiteInfo, TypedValue, WriterBuilder};
//! use std::fs::File;
//!
//! let header = FileHeader::new(
//!     DataFormat::Genotype,
//!     vec![],
//!     vec!["NA001".to_string(), "NA002".to_string()],
//! );
//! let file = File::create("example.sav").unwrap();
//! let mut writer = WriterBuilder::new(header)
//!     .index_path("example.sav.s1r")
//!     .build(file)
//!     .unwrap();
//!
//! let site = SiteInfo::new("1", 100, "A", "C");
//! let genotypes = TypedValue::from_dense(&[0.0f32, 1.0, 0.0, 0.0]);
//! writer.write(&site, &genotypes).unwrap();
//! writer.finish().unwrap();
//! ```

use std::io::Write;
use std::path::PathBuf;

use tracing::debug;
use zstd::Encoder as ZstdEncoder;

use crate::error::{Result, WriteError};
use crate::header::FileHeader;
use crate::index::{Entry, S1rWriter, MAX_RECORDS_PER_BLOCK};
use crate::record::encode_record;
use crate::site::SiteInfo;
use crate::sparse::SparseVector;
use crate::value::TypedValue;

/// Default number of records per compression block
pub const DEFAULT_BLOCK_SIZE: u16 = 2048;
/// Default zstd compression level
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// A builder for configured [`Writer`] instances
///
/// Defaults: compression level 3, block size 2048, no index sidecar.
pub struct WriterBuilder {
    header: FileHeader,
    compression_level: i32,
    block_size: u16,
    index_path: Option<PathBuf>,
}

impl WriterBuilder {
    #[must_use]
    pub fn new(header: FileHeader) -> Self {
        Self {
            header,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            block_size: DEFAULT_BLOCK_SIZE,
            index_path: None,
        }
    }

    /// Zstd compression level, clamped to 1..=19
    #[must_use]
    pub fn compression_level(mut self, level: i32) -> Self {
        self.compression_level = level.clamp(1, 19);
        self
    }

    /// Records per block; 0 writes one record per frame
    #[must_use]
    pub fn block_size(mut self, block_size: u16) -> Self {
        self.block_size = block_size;
        self
    }

    /// Enables indexing and sets the sidecar path
    #[must_use]
    pub fn index_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.index_path = Some(path.into());
        self
    }

    /// Writes the preamble and returns the configured writer
    pub fn build<W: Write>(self, mut inner: W) -> Result<Writer<W>> {
        let preamble_len = self.header.write_bytes(&mut inner)?;
        let index = self
            .index_path
            .map(|path| S1rWriter::new(path, *self.header.uuid()));
        Ok(Writer {
            inner: Some(inner),
            block: BlockBuffer::new(self.compression_level),
            index,
            block_size: self.block_size,
            current_chrom: String::new(),
            block_min_pos: u32::MAX,
            block_max_pos: 0,
            records_in_block: 0,
            bytes_written: preamble_len as u64,
            records_written: 0,
            failed: false,
            finished: false,
            header: self.header,
        })
    }
}

/// Streaming writer for sav files
///
/// Single-writer: records append in write order, blocks flush in write
/// order, and the final partial block (plus its index entry) is emitted by
/// [`Writer::finish`] or on drop. The first error poisons the writer and
/// all further writes are refused.
pub struct Writer<W: Write> {
    inner: Option<W>,
    header: FileHeader,
    block: BlockBuffer,
    index: Option<S1rWriter>,
    block_size: u16,
    current_chrom: String,
    block_min_pos: u32,
    block_max_pos: u32,
    records_in_block: usize,
    bytes_written: u64,
    records_written: u64,
    failed: bool,
    finished: bool,
}

impl<W: Write> Writer<W> {
    /// Appends one record
    ///
    /// The genotype vector's dense length must be a multiple of the
    /// declared sample count; the quotient is the record's ploidy.
    pub fn write(&mut self, site: &SiteInfo, value: &TypedValue) -> Result<()> {
        if self.failed {
            return Err(WriteError::Poisoned.into());
        }
        match self.write_impl(site, value) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.failed = true;
                Err(e)
            }
        }
    }

    /// Appends one record from a dense f32 vector
    pub fn write_dense(&mut self, site: &SiteInfo, data: &[f32]) -> Result<()> {
        self.write(site, &TypedValue::from_dense(data))
    }

    /// Appends one record from a sparse f32 vector
    pub fn write_sparse(&mut self, site: &SiteInfo, data: &SparseVector<f32>) -> Result<()> {
        self.write(site, &TypedValue::from_sparse(data))
    }

    fn write_impl(&mut self, site: &SiteInfo, value: &TypedValue) -> Result<()> {
        // block boundaries are evaluated at the start of a write
        let full = self.block_size != 0 && self.records_in_block >= self.block_size as usize;
        if self.records_in_block > 0 && (full || site.chromosome() != self.current_chrom) {
            self.flush_block()?;
        }
        if self.records_in_block == 0 {
            self.current_chrom.clear();
            self.current_chrom.push_str(site.chromosome());
        }
        if self.records_in_block >= MAX_RECORDS_PER_BLOCK {
            return Err(WriteError::BlockOverflow(self.records_in_block + 1).into());
        }

        let width = self.header.data_format().bit_width();
        encode_record(
            &mut self.block.ubuf,
            site,
            self.header.info_fields(),
            value.iter_raw().map(|(pos, v)| (pos, v.to_f32())),
            value.len(),
            self.header.n_samples(),
            width,
        )?;

        self.block_min_pos = self.block_min_pos.min(site.position() as u32);
        self.block_max_pos = self.block_max_pos.max(site.end_position() as u32);
        self.records_in_block += 1;
        self.records_written += 1;

        if self.block_size == 0 {
            self.flush_block()?;
        }
        Ok(())
    }

    /// Compresses the open block into one frame and emits its index entry
    fn flush_block(&mut self) -> Result<()> {
        if self.records_in_block == 0 {
            return Ok(());
        }
        let frame_offset = self.bytes_written;
        // the entry is validated even without an index so that unindexed
        // files never exceed the indexable limits
        let entry = Entry::new(
            self.block_min_pos,
            self.block_max_pos,
            frame_offset,
            self.records_in_block,
        )?;
        if let Some(index) = &mut self.index {
            index.write(&self.current_chrom, entry)?;
        }

        let sink = self.inner.as_mut().expect("writer already consumed");
        let frame_len = self.block.flush(sink)?;
        self.bytes_written += frame_len;
        debug!(
            chrom = %self.current_chrom,
            records = self.records_in_block,
            offset = frame_offset,
            frame_len,
            "flushed block"
        );

        self.records_in_block = 0;
        self.block_min_pos = u32::MAX;
        self.block_max_pos = 0;
        Ok(())
    }

    /// Flushes the final partial block, the output stream and the index
    ///
    /// A poisoned writer refuses to finish; nothing after the last clean
    /// block ever reaches the output.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        if self.failed {
            return Err(WriteError::Poisoned.into());
        }
        self.flush_block()?;
        self.inner
            .as_mut()
            .expect("writer already consumed")
            .flush()?;
        if let Some(index) = &self.index {
            index.finish()?;
        }
        self.finished = true;
        Ok(())
    }

    /// Total records written so far
    #[must_use]
    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Compressed bytes emitted so far (the next frame's offset)
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    #[must_use]
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// False once a write has failed; failed writers refuse further writes
    #[must_use]
    pub fn good(&self) -> bool {
        !self.failed
    }

    #[must_use]
    pub fn fail(&self) -> bool {
        self.failed
    }

    /// Finishes and returns the underlying writer
    pub fn into_inner(mut self) -> Result<W> {
        self.finish()?;
        Ok(self.inner.take().expect("writer already consumed"))
    }
}

impl<W: Write> Drop for Writer<W> {
    fn drop(&mut self) {
        if !self.finished && !self.failed && self.inner.is_some() {
            self.finish().expect("sav::Writer: failed to finish writing");
        }
    }
}

/// Reusable per-block buffers: records accumulate uncompressed in `ubuf`
/// and each flush compresses them into `zbuf` as a standalone frame
struct BlockBuffer {
    ubuf: Vec<u8>,
    zbuf: Vec<u8>,
    level: i32,
}

impl BlockBuffer {
    fn new(level: i32) -> Self {
        Self {
            ubuf: Vec::new(),
            zbuf: Vec::new(),
            level,
        }
    }

    /// Writes the buffered records as one zstd frame, returning its length
    fn flush<W: Write>(&mut self, inner: &mut W) -> Result<u64> {
        if self.ubuf.is_empty() {
            return Ok(0);
        }
        self.zbuf.clear();
        let mut encoder = ZstdEncoder::new(&mut self.zbuf, self.level)?;
        encoder.write_all(&self.ubuf)?;
        encoder.finish()?;

        inner.write_all(&self.zbuf)?;
        let frame_len = self.zbuf.len() as u64;
        self.ubuf.clear();
        Ok(frame_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::DataFormat;
    use crate::index::S1rReader;
    use tempfile::tempdir;

    fn header(samples: &[&str]) -> FileHeader {
        FileHeader::new(
            DataFormat::Genotype,
            vec![],
            samples.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn chromosome_change_forces_flush() {
        let dir = tempdir().unwrap();
        let index_path = dir.path().join("out.sav.s1r");
        let mut writer = WriterBuilder::new(header(&["A", "B"]))
            .block_size(10)
            .index_path(&index_path)
            .build(Vec::new())
            .unwrap();

        for pos in [10, 20, 30] {
            let site = SiteInfo::new("1", pos, "A", "C");
            writer.write_dense(&site, &[0.0, 1.0, 0.0, 0.0]).unwrap();
        }
        let site = SiteInfo::new("2", 5, "G", "T");
        writer.write_dense(&site, &[1.0, 0.0, 0.0, 0.0]).unwrap();
        writer.finish().unwrap();

        let index = S1rReader::from_path(&index_path).unwrap();
        assert_eq!(index.tree_names(), vec!["1", "2"]);
        let trees: Vec<_> = index.trees().collect();
        assert_eq!(trees[0].1.len(), 1);
        assert_eq!(trees[0].1[0].records(), 3);
        assert_eq!(trees[0].1[0].min_pos, 10);
        assert_eq!(trees[0].1[0].max_pos, 30);
        assert_eq!(trees[1].1.len(), 1);
        assert_eq!(trees[1].1[0].records(), 1);
    }

    #[test]
    fn block_bounds_cover_the_variant_span() {
        let dir = tempdir().unwrap();
        let index_path = dir.path().join("span.sav.s1r");
        let mut writer = WriterBuilder::new(header(&["A"]))
            .index_path(&index_path)
            .build(Vec::new())
            .unwrap();

        // a 5-base deletion spans [100, 104]
        let site = SiteInfo::new("1", 100, "ACGTA", "A");
        writer.write_dense(&site, &[1.0]).unwrap();
        writer.finish().unwrap();

        let index = S1rReader::from_path(&index_path).unwrap();
        let entry = index.trees().next().unwrap().1[0];
        assert_eq!(entry.min_pos, 100);
        assert_eq!(entry.max_pos, 104);
    }

    #[test]
    fn zero_block_size_writes_one_record_per_frame() {
        let mut writer = WriterBuilder::new(header(&["A"]))
            .block_size(0)
            .build(Vec::new())
            .unwrap();
        let site = SiteInfo::new("1", 1, "A", "C");
        writer.write_dense(&site, &[1.0]).unwrap();
        let after_one = writer.bytes_written();
        writer.write_dense(&site, &[1.0]).unwrap();
        let after_two = writer.bytes_written();
        // every record flushes a frame immediately
        assert!(after_two > after_one);
        writer.finish().unwrap();
        assert_eq!(writer.bytes_written(), after_two);
    }

    #[test]
    fn block_size_flushes_at_start_of_next_write() {
        let mut writer = WriterBuilder::new(header(&["A"]))
            .block_size(2)
            .build(Vec::new())
            .unwrap();
        let site = SiteInfo::new("1", 1, "A", "C");
        let preamble = writer.bytes_written();
        writer.write_dense(&site, &[1.0]).unwrap();
        writer.write_dense(&site, &[1.0]).unwrap();
        // two records buffered, nothing flushed yet
        assert_eq!(writer.bytes_written(), preamble);
        writer.write_dense(&site, &[1.0]).unwrap();
        assert!(writer.bytes_written() > preamble);
        writer.finish().unwrap();
    }

    #[test]
    fn length_mismatch_poisons_the_writer() {
        let mut writer = WriterBuilder::new(header(&["A", "B"]))
            .build(Vec::new())
            .unwrap();
        let site = SiteInfo::new("1", 1, "A", "C");
        let err = writer.write_dense(&site, &[1.0, 0.0, 0.0]).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Write(WriteError::SampleCountMismatch { .. })
        ));
        assert!(writer.fail());
        let err = writer.write_dense(&site, &[1.0, 0.0]).unwrap_err();
        assert!(matches!(err, crate::Error::Write(WriteError::Poisoned)));
    }
}
