//! Reader implementations for sav files.
//!
//! Two modes exist. The linear [`Reader`] decodes records in file order
//! through a single multi-frame zstd decoder. The [`IndexedReader`] walks
//! the blocks an S1R query yields: it seeks the data file to each block's
//! frame offset, opens a fresh decoder there, and filters the decoded
//! records against the query region under a [`CoordBound`] policy.
//!
//! Both readers carry iostream-style sticky state: a decode error marks
//! the reader bad and every later read reports EOF. Sample subsetting and
//! the per-haplotype / per-sample output choice apply at decode time.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use zstd::Decoder;

use crate::error::{IndexError, ReadError, Result};
use crate::header::FileHeader;
use crate::index::{index_path_for, Query, S1rReader};
use crate::record::{
    decode_genotypes, decode_site, discard_genotypes, OutputFormat, SampleSubset,
};
use crate::site::{region_compare, CoordBound, Region, SiteInfo};
use crate::sparse::SparseVector;

/// Sticky stream state in the iostream tradition
///
/// `fail()` reports both recoverable failures and hard errors, matching
/// the usual `failbit | badbit` reading.
#[derive(Clone, Copy, Debug, Default)]
pub struct StreamStatus {
    eof: bool,
    fail: bool,
    bad: bool,
}

impl StreamStatus {
    #[must_use]
    pub fn good(&self) -> bool {
        !self.eof && !self.fail && !self.bad
    }

    #[must_use]
    pub fn eof(&self) -> bool {
        self.eof
    }

    #[must_use]
    pub fn fail(&self) -> bool {
        self.fail || self.bad
    }

    #[must_use]
    pub fn bad(&self) -> bool {
        self.bad
    }

    fn set_eof(&mut self) {
        self.eof = true;
    }

    fn set_bad(&mut self) {
        self.bad = true;
    }

    fn clear(&mut self) {
        self.eof = false;
        self.fail = false;
        self.bad = false;
    }
}

/// Decode configuration shared by both reader modes
struct ReaderCore {
    header: FileHeader,
    subset: Option<SampleSubset>,
    output: OutputFormat,
    status: StreamStatus,
    scratch: SparseVector<f32>,
}

impl ReaderCore {
    fn new(header: FileHeader) -> Self {
        Self {
            header,
            subset: None,
            output: OutputFormat::default(),
            status: StreamStatus::default(),
            scratch: SparseVector::new(),
        }
    }

    fn subset_samples<S: AsRef<str>>(&mut self, ids: &[S]) -> Vec<String> {
        let (subset, kept) = SampleSubset::new(self.header.samples(), ids);
        self.subset = Some(subset);
        kept
    }

    fn decode_genotypes<R: Read>(
        &mut self,
        input: &mut R,
        dest: &mut SparseVector<f32>,
    ) -> Result<()> {
        decode_genotypes(
            input,
            self.header.data_format().bit_width(),
            self.header.n_samples(),
            self.subset.as_ref(),
            self.output,
            dest,
        )
    }
}

/// Linear record reader
///
/// Decodes records in file order; the zstd decoder reads straight across
/// the block frame boundaries.
pub struct Reader<R: Read> {
    // buffered so the per-byte varint reads never touch the zstd context
    decoder: BufReader<Decoder<'static, BufReader<R>>>,
    core: ReaderCore,
}

impl Reader<BufReader<File>> {
    /// Opens a file for linear reading
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(BufReader::new(File::open(path)?))
    }
}

impl<R: Read> Reader<R> {
    /// Parses the preamble from `inner` and prepares record decoding
    pub fn new(mut inner: R) -> Result<Self> {
        let header = FileHeader::from_reader(&mut inner)?;
        info!(
            samples = header.n_samples(),
            format = ?header.data_format(),
            "opened sav stream"
        );
        let decoder = BufReader::new(Decoder::new(inner)?);
        Ok(Self {
            decoder,
            core: ReaderCore::new(header),
        })
    }

    #[must_use]
    pub fn header(&self) -> &FileHeader {
        &self.core.header
    }

    /// Restricts decoding to `ids`, returning the intersection with the
    /// file's samples in file order
    pub fn subset_samples<S: AsRef<str>>(&mut self, ids: &[S]) -> Vec<String> {
        self.core.subset_samples(ids)
    }

    /// Chooses between per-haplotype and per-sample decoded vectors
    pub fn set_output_format(&mut self, output: OutputFormat) {
        self.core.output = output;
    }

    /// Decodes the next record into the caller's buffers
    ///
    /// Returns `Ok(false)` at end of stream. The first decode error is
    /// returned and marks the reader bad; later calls report EOF.
    pub fn read(&mut self, site: &mut SiteInfo, dest: &mut SparseVector<f32>) -> Result<bool> {
        if !self.read_site(site)? {
            return Ok(false);
        }
        self.read_genotypes(dest)?;
        Ok(true)
    }

    /// Decodes only the next record's site fields
    ///
    /// Must be followed by exactly one [`Reader::read_genotypes`] or
    /// [`Reader::skip_genotypes`] before the next site; the merge engine
    /// uses this split to peek sites across several inputs.
    pub fn read_site(&mut self, site: &mut SiteInfo) -> Result<bool> {
        if !self.core.status.good() {
            return Ok(false);
        }
        match decode_site(&mut self.decoder, self.core.header.info_fields(), site) {
            Ok(true) => Ok(true),
            Ok(false) => {
                self.core.status.set_eof();
                Ok(false)
            }
            Err(e) => {
                self.core.status.set_bad();
                Err(e)
            }
        }
    }

    /// Decodes the genotype payload of the record whose site was just read
    pub fn read_genotypes(&mut self, dest: &mut SparseVector<f32>) -> Result<()> {
        let got = self.core.decode_genotypes(&mut self.decoder, dest);
        if got.is_err() {
            self.core.status.set_bad();
        }
        got
    }

    /// Skips the genotype payload of the record whose site was just read
    pub fn skip_genotypes(&mut self) -> Result<()> {
        let got = discard_genotypes(
            &mut self.decoder,
            self.core.header.data_format().bit_width(),
        );
        if got.is_err() {
            self.core.status.set_bad();
        }
        got
    }

    /// Like [`Reader::read`] but materializes the dense vector
    pub fn read_dense(&mut self, site: &mut SiteInfo, dest: &mut Vec<f32>) -> Result<bool> {
        let mut scratch = std::mem::take(&mut self.core.scratch);
        let got = self.read(site, &mut scratch);
        if matches!(got, Ok(true)) {
            dest.clear();
            dest.extend(scratch.to_dense());
        }
        self.core.scratch = scratch;
        got
    }

    #[must_use]
    pub fn good(&self) -> bool {
        self.core.status.good()
    }

    #[must_use]
    pub fn eof(&self) -> bool {
        self.core.status.eof()
    }

    #[must_use]
    pub fn fail(&self) -> bool {
        self.core.status.fail()
    }

    #[must_use]
    pub fn bad(&self) -> bool {
        self.core.status.bad()
    }
}

impl std::fmt::Debug for IndexedReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexedReader")
            .field("region", &self.region)
            .field("bound", &self.bound)
            .field("remaining_in_block", &self.remaining_in_block)
            .finish_non_exhaustive()
    }
}

/// Region-filtered reader backed by an S1R index
pub struct IndexedReader {
    file: File,
    index: S1rReader,
    core: ReaderCore,
    region: Region,
    bound: CoordBound,
    query: Query,
    decoder: Option<BufReader<Decoder<'static, BufReader<File>>>>,
    remaining_in_block: usize,
}

impl IndexedReader {
    /// Opens `path` with its default `.s1r` sidecar and the `any` policy
    pub fn new(path: impl AsRef<Path>, region: Region) -> Result<Self> {
        Self::with_options(path, None, region, CoordBound::Any)
    }

    /// Opens `path` with an explicit index path and bounding policy
    pub fn with_options(
        path: impl AsRef<Path>,
        index_path: Option<PathBuf>,
        region: Region,
        bound: CoordBound,
    ) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path)?;
        let header = {
            let mut reader = BufReader::new(&mut file);
            FileHeader::from_reader(&mut reader)?
        };

        let index_path = index_path.unwrap_or_else(|| index_path_for(path));
        if !index_path.exists() {
            return Err(ReadError::IndexMissing(path.to_path_buf()).into());
        }
        let index = S1rReader::from_path(&index_path)?;
        if *header.uuid() != [0; 16]
            && *index.uuid() != [0; 16]
            && header.uuid() != index.uuid()
        {
            return Err(IndexError::UuidMismatch.into());
        }

        let query = index.create_query(&region);
        debug!(region = %region, blocks = query.n_blocks(), "indexed query");
        Ok(Self {
            file,
            index,
            core: ReaderCore::new(header),
            region,
            bound,
            query,
            decoder: None,
            remaining_in_block: 0,
        })
    }

    #[must_use]
    pub fn header(&self) -> &FileHeader {
        &self.core.header
    }

    /// Chromosomes present in the index, in file order
    #[must_use]
    pub fn chromosomes(&self) -> Vec<&str> {
        self.index.tree_names()
    }

    /// Restricts decoding to `ids`, returning the intersection with the
    /// file's samples in file order
    pub fn subset_samples<S: AsRef<str>>(&mut self, ids: &[S]) -> Vec<String> {
        self.core.subset_samples(ids)
    }

    /// Chooses between per-haplotype and per-sample decoded vectors
    pub fn set_output_format(&mut self, output: OutputFormat) {
        self.core.output = output;
    }

    /// Re-arms the reader for a new region on the same file
    pub fn reset_region(&mut self, region: Region) {
        self.query = self.index.create_query(&region);
        self.region = region;
        self.decoder = None;
        self.remaining_in_block = 0;
        self.core.status.clear();
    }

    /// Decodes the next record matching the region
    ///
    /// Seeks block by block through the query results and skips records
    /// the bounding policy rejects. Returns `Ok(false)` when the query is
    /// exhausted.
    pub fn read(&mut self, site: &mut SiteInfo, dest: &mut SparseVector<f32>) -> Result<bool> {
        self.read_if(|_| true, site, dest)
    }

    /// Like [`IndexedReader::read`], with a caller predicate evaluated on
    /// the site before the genotypes are decoded
    ///
    /// Records rejected by the predicate or the bounding policy have their
    /// genotype payload skipped, not decoded.
    pub fn read_if<P>(
        &mut self,
        mut pred: P,
        site: &mut SiteInfo,
        dest: &mut SparseVector<f32>,
    ) -> Result<bool>
    where
        P: FnMut(&SiteInfo) -> bool,
    {
        if !self.core.status.good() {
            return Ok(false);
        }
        loop {
            if self.remaining_in_block == 0 {
                match self.query.next() {
                    None => {
                        self.core.status.set_eof();
                        return Ok(false);
                    }
                    Some(entry) => {
                        if let Err(e) = self.enter_block(entry.frame_offset()) {
                            self.core.status.set_bad();
                            return Err(e);
                        }
                        self.remaining_in_block = entry.records();
                    }
                }
            }

            match self.read_one(&mut pred, site, dest) {
                Ok(true) => return Ok(true),
                Ok(false) => continue,
                Err(e) => {
                    self.core.status.set_bad();
                    return Err(e);
                }
            }
        }
    }

    /// Seeks the data file to a block frame and opens a decoder there
    fn enter_block(&mut self, frame_offset: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(frame_offset))?;
        let decoder = BufReader::new(Decoder::new(self.file.try_clone()?)?);
        self.decoder = Some(decoder);
        Ok(())
    }

    /// Decodes one record from the open block; true if it matched
    fn read_one<P>(
        &mut self,
        pred: &mut P,
        site: &mut SiteInfo,
        dest: &mut SparseVector<f32>,
    ) -> Result<bool>
    where
        P: FnMut(&SiteInfo) -> bool,
    {
        let decoder = self.decoder.as_mut().expect("no open block");
        if !decode_site(decoder, self.core.header.info_fields(), site)? {
            // the index promised more records in this frame
            return Err(ReadError::Truncated.into());
        }
        self.remaining_in_block -= 1;

        let wanted = pred(site) && region_compare(self.bound, site, &self.region);
        if wanted {
            decode_genotypes(
                decoder,
                self.core.header.data_format().bit_width(),
                self.core.header.n_samples(),
                self.core.subset.as_ref(),
                self.core.output,
                dest,
            )?;
        } else {
            discard_genotypes(decoder, self.core.header.data_format().bit_width())?;
        }
        Ok(wanted)
    }

    /// Like [`IndexedReader::read`] but materializes the dense vector
    pub fn read_dense(&mut self, site: &mut SiteInfo, dest: &mut Vec<f32>) -> Result<bool> {
        let mut scratch = std::mem::take(&mut self.core.scratch);
        let got = self.read(site, &mut scratch);
        if matches!(got, Ok(true)) {
            dest.clear();
            dest.extend(scratch.to_dense());
        }
        self.core.scratch = scratch;
        got
    }

    #[must_use]
    pub fn good(&self) -> bool {
        self.core.status.good()
    }

    #[must_use]
    pub fn eof(&self) -> bool {
        self.core.status.eof()
    }

    #[must_use]
    pub fn fail(&self) -> bool {
        self.core.status.fail()
    }

    #[must_use]
    pub fn bad(&self) -> bool {
        self.core.status.bad()
    }
}
