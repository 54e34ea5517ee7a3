//! S1R sidecar index.
//!
//! The index maps genomic regions to the blocks that may contain them. It
//! holds one tree per chromosome; each tree is an ordered run of
//! [`Entry`] values describing one block: its position bounds and a packed
//! `(frame_offset << 16) | (records - 1)` locator. The 48-bit offset field
//! caps indexable files at 256 TiB and the 16-bit count field caps blocks
//! at 65,536 records.
//!
//! On disk the index is a 32-byte header (magic, the data file's UUID,
//! reserved bytes) followed by a zstd-compressed run of trees. Any
//! structure honoring the overlap-query contract would do; a sorted run
//! per chromosome keeps the reader trivial because the block writer
//! already emits entries in non-decreasing `min_pos` order.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use tracing::debug;
use zstd::{Decoder, Encoder};

use crate::error::{IndexError, Result, WriteError};
use crate::site::Region;

/// Magic number designating an S1R index file ("S1RINDEX")
pub const INDEX_MAGIC: u64 = u64::from_le_bytes(*b"S1RINDEX");
/// Size of the uncompressed index header in bytes
pub const SIZE_INDEX_HEADER: usize = 32;
/// Size of one serialized [`Entry`] in bytes
pub const SIZE_ENTRY: usize = 16;
/// Hard cap on records per block imposed by the 16-bit count field
pub const MAX_RECORDS_PER_BLOCK: usize = 0x1_0000;
/// Hard cap on frame offsets imposed by the 48-bit offset field
pub const MAX_FRAME_OFFSET: u64 = 0x0000_FFFF_FFFF_FFFF;

/// Sidecar path for a data file: the data path with `.s1r` appended
#[must_use]
pub fn index_path_for(data_path: &Path) -> PathBuf {
    let mut os = data_path.as_os_str().to_os_string();
    os.push(".s1r");
    PathBuf::from(os)
}

/// One block's index entry: position bounds plus a packed locator
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Entry {
    pub min_pos: u32,
    pub max_pos: u32,
    /// `(frame_offset << 16) | (records_in_block - 1)`
    pub value: u64,
}

impl Entry {
    /// Packs an entry, rejecting counts and offsets the field widths
    /// cannot hold
    pub fn new(min_pos: u32, max_pos: u32, frame_offset: u64, records: usize) -> Result<Self> {
        if records == 0 || records > MAX_RECORDS_PER_BLOCK {
            return Err(WriteError::BlockOverflow(records).into());
        }
        if frame_offset > MAX_FRAME_OFFSET {
            return Err(WriteError::OffsetOverflow(frame_offset).into());
        }
        Ok(Self {
            min_pos,
            max_pos,
            value: (frame_offset << 16) | (records as u64 - 1),
        })
    }

    /// Byte offset of the block's zstd frame
    #[must_use]
    pub fn frame_offset(self) -> u64 {
        (self.value >> 16) & MAX_FRAME_OFFSET
    }

    /// Number of records in the block
    #[must_use]
    pub fn records(self) -> usize {
        (self.value & 0xFFFF) as usize + 1
    }

    fn overlaps(self, beg: u32, end: u32) -> bool {
        self.min_pos <= end && self.max_pos >= beg
    }

    fn write_bytes<W: Write>(self, writer: &mut W) -> Result<()> {
        let mut buf = [0u8; SIZE_ENTRY];
        LittleEndian::write_u32(&mut buf[0..4], self.min_pos);
        LittleEndian::write_u32(&mut buf[4..8], self.max_pos);
        LittleEndian::write_u64(&mut buf[8..16], self.value);
        writer.write_all(&buf)?;
        Ok(())
    }

    fn from_bytes(buf: &[u8]) -> Self {
        Self {
            min_pos: LittleEndian::read_u32(&buf[0..4]),
            max_pos: LittleEndian::read_u32(&buf[4..8]),
            value: LittleEndian::read_u64(&buf[8..16]),
        }
    }
}

/// Accumulates index entries and writes the sidecar file at finish
///
/// Entries for a chromosome must arrive in non-decreasing `min_pos` order;
/// the block writer guarantees this for position-sorted input.
pub struct S1rWriter {
    path: PathBuf,
    uuid: [u8; 16],
    trees: Vec<(String, Vec<Entry>)>,
}

impl S1rWriter {
    pub fn new(path: impl Into<PathBuf>, uuid: [u8; 16]) -> Self {
        Self {
            path: path.into(),
            uuid,
            trees: Vec::new(),
        }
    }

    /// Appends an entry under `chrom`
    pub fn write(&mut self, chrom: &str, entry: Entry) -> Result<()> {
        let idx = match self.trees.iter().position(|(name, _)| name == chrom) {
            Some(idx) => idx,
            None => {
                self.trees.push((chrom.to_string(), Vec::new()));
                self.trees.len() - 1
            }
        };
        let tree = &mut self.trees[idx].1;
        if tree.last().is_some_and(|last| last.min_pos > entry.min_pos) {
            return Err(IndexError::UnsortedEntry(chrom.to_string()).into());
        }
        tree.push(entry);
        Ok(())
    }

    /// Writes the sidecar file
    pub fn finish(&self) -> Result<()> {
        let mut writer = File::create(&self.path).map(BufWriter::new)?;

        let mut header = [0u8; SIZE_INDEX_HEADER];
        LittleEndian::write_u64(&mut header[0..8], INDEX_MAGIC);
        header[8..24].copy_from_slice(&self.uuid);
        writer.write_all(&header)?;

        let mut encoder = Encoder::new(writer, 3)?.auto_finish();
        for (name, entries) in &self.trees {
            let mut buf = [0u8; 4];
            LittleEndian::write_u32(&mut buf, name.len() as u32);
            encoder.write_all(&buf)?;
            encoder.write_all(name.as_bytes())?;
            let mut buf = [0u8; 8];
            LittleEndian::write_u64(&mut buf, entries.len() as u64);
            encoder.write_all(&buf)?;
            for entry in entries {
                entry.write_bytes(&mut encoder)?;
            }
        }
        encoder.flush()?;

        debug!(
            path = %self.path.display(),
            trees = self.trees.len(),
            "wrote s1r index"
        );
        Ok(())
    }
}

/// In-memory view of a sidecar index
#[derive(Clone, Debug)]
pub struct S1rReader {
    uuid: [u8; 16],
    trees: Vec<(String, Vec<Entry>)>,
}

impl S1rReader {
    /// Memory-maps and parses an index file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let mmap = unsafe { memmap2::Mmap::map(&file)? };
        if mmap.len() < SIZE_INDEX_HEADER {
            return Err(IndexError::Truncated.into());
        }
        let magic = LittleEndian::read_u64(&mmap[0..8]);
        if magic != INDEX_MAGIC {
            return Err(IndexError::InvalidMagicNumber(magic).into());
        }
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&mmap[8..24]);

        let buffer = {
            let mut buffer = Vec::new();
            let mut decoder = Decoder::new(&mmap[SIZE_INDEX_HEADER..])?;
            decoder.read_to_end(&mut buffer)?;
            buffer
        };

        let mut trees = Vec::new();
        let mut pos = 0usize;
        while pos < buffer.len() {
            if pos + 4 > buffer.len() {
                return Err(IndexError::Truncated.into());
            }
            let name_len = LittleEndian::read_u32(&buffer[pos..pos + 4]) as usize;
            pos += 4;
            if pos + name_len + 8 > buffer.len() {
                return Err(IndexError::Truncated.into());
            }
            let name = std::str::from_utf8(&buffer[pos..pos + name_len])?.to_string();
            pos += name_len;
            let count = LittleEndian::read_u64(&buffer[pos..pos + 8]) as usize;
            pos += 8;
            if pos + count * SIZE_ENTRY > buffer.len() {
                return Err(IndexError::Truncated.into());
            }
            let mut entries = Vec::with_capacity(count);
            for i in 0..count {
                entries.push(Entry::from_bytes(&buffer[pos + i * SIZE_ENTRY..]));
            }
            pos += count * SIZE_ENTRY;
            trees.push((name, entries));
        }

        Ok(Self { uuid, trees })
    }

    /// UUID of the data file this index was written for
    #[must_use]
    pub fn uuid(&self) -> &[u8; 16] {
        &self.uuid
    }

    /// Chromosome names in file order
    #[must_use]
    pub fn tree_names(&self) -> Vec<&str> {
        self.trees.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Iterates `(chromosome, entries)` trees in file order
    pub fn trees(&self) -> impl Iterator<Item = (&str, &[Entry])> {
        self.trees
            .iter()
            .map(|(name, entries)| (name.as_str(), entries.as_slice()))
    }

    /// All entries whose bounds overlap `region`, in file-offset order
    #[must_use]
    pub fn create_query(&self, region: &Region) -> Query {
        let entries = self
            .trees
            .iter()
            .find(|(name, _)| name == region.chrom())
            .map(|(_, entries)| {
                entries
                    .iter()
                    .copied()
                    .filter(|e| e.overlaps(region.beg(), region.end()))
                    .collect()
            })
            .unwrap_or_default();
        Query { entries, next: 0 }
    }
}

/// Cursor over the blocks matching one region query
#[derive(Clone, Debug)]
pub struct Query {
    entries: Vec<Entry>,
    next: usize,
}

impl Query {
    #[must_use]
    pub fn n_blocks(&self) -> usize {
        self.entries.len()
    }
}

impl Iterator for Query {
    type Item = Entry;

    fn next(&mut self) -> Option<Entry> {
        let entry = self.entries.get(self.next).copied()?;
        self.next += 1;
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn entry_packs_offset_and_count() {
        let e = Entry::new(5, 9, 0x1234, 3).unwrap();
        assert_eq!(e.frame_offset(), 0x1234);
        assert_eq!(e.records(), 3);
        assert_eq!(e.value, (0x1234 << 16) | 2);
    }

    #[test]
    fn entry_rejects_overflow() {
        let err = Entry::new(0, 0, 0, MAX_RECORDS_PER_BLOCK + 1).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Write(WriteError::BlockOverflow(_))
        ));
        // the maximum legal count still packs
        assert!(Entry::new(0, 0, 0, MAX_RECORDS_PER_BLOCK).is_ok());

        let err = Entry::new(0, 0, MAX_FRAME_OFFSET + 1, 1).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Write(WriteError::OffsetOverflow(_))
        ));
        assert!(Entry::new(0, 0, MAX_FRAME_OFFSET, 1).is_ok());
    }

    #[test]
    fn roundtrip_and_query() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sav.s1r");

        let mut writer = S1rWriter::new(&path, [7u8; 16]);
        writer
            .write("1", Entry::new(10, 19, 100, 4).unwrap())
            .unwrap();
        writer
            .write("1", Entry::new(20, 29, 200, 4).unwrap())
            .unwrap();
        writer
            .write("2", Entry::new(1, 99, 300, 1).unwrap())
            .unwrap();
        writer.finish().unwrap();

        let reader = S1rReader::from_path(&path).unwrap();
        assert_eq!(reader.uuid(), &[7u8; 16]);
        assert_eq!(reader.tree_names(), vec!["1", "2"]);

        let hits: Vec<Entry> = reader.create_query(&Region::new("1", 15, 25)).collect();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].frame_offset(), 100);
        assert_eq!(hits[1].frame_offset(), 200);

        let hits: Vec<Entry> = reader.create_query(&Region::new("1", 30, 40)).collect();
        assert!(hits.is_empty());

        let hits: Vec<Entry> = reader.create_query(&Region::chromosome("2")).collect();
        assert_eq!(hits.len(), 1);

        let hits: Vec<Entry> = reader.create_query(&Region::chromosome("3")).collect();
        assert!(hits.is_empty());
    }

    #[test]
    fn unsorted_entries_are_rejected() {
        let mut writer = S1rWriter::new("unused.s1r", [0u8; 16]);
        writer
            .write("1", Entry::new(50, 60, 0, 1).unwrap())
            .unwrap();
        let err = writer
            .write("1", Entry::new(40, 45, 100, 1).unwrap())
            .unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Index(IndexError::UnsortedEntry(_))
        ));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.s1r");
        let mut writer = S1rWriter::new(&path, [0u8; 16]);
        writer.write("1", Entry::new(1, 2, 0, 1).unwrap()).unwrap();
        writer.finish().unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let err = S1rReader::from_path(&path).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Index(IndexError::InvalidMagicNumber(_))
        ));
    }
}
