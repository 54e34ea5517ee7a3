//! File preamble definitions.
//!
//! Every sav file opens with a fixed 7-byte magic (`"sav"` plus a
//! major.minor.patch triple), a 16-byte UUID linking the file to its
//! sidecar index, the header key/value section and the sample list. The
//! preamble is stored uncompressed; the record section that follows is a
//! sequence of zstd frames.

use std::io::{Read, Write};

use crate::error::{Error, HeaderError, ReadError, Result};
use crate::varint::{decode_varint, encode_varint};
use crate::BitWidth;

/// Leading file bytes: "sav", then major=1, minor=0, patch=0
pub const MAGIC: [u8; 7] = *b"sav\x00\x01\x00\x00";

/// Major version this implementation reads and writes
///
/// Minor and patch are ignored on read; only a major mismatch is fatal.
pub const MAJOR_VERSION: u8 = 1;

const GT_HEADER: &str = "<ID=GT,Description=\"Genotype\">";
const HDS_HEADER: &str = "<ID=HDS,Description=\"Haplotype dosages\">";

/// Per-file genotype payload format, fixed by the FORMAT header
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DataFormat {
    /// Biallelic hard calls; one payload bit per pair
    #[default]
    Genotype,
    /// Quantized haplotype dosages; seven payload bits per pair
    HaplotypeDosage,
}

impl DataFormat {
    /// Allele-code width of the prefixed varint pairs
    #[must_use]
    pub fn bit_width(self) -> BitWidth {
        match self {
            Self::Genotype => BitWidth::One,
            Self::HaplotypeDosage => BitWidth::Seven,
        }
    }

    /// The canonical FORMAT header value the writer emits
    #[must_use]
    pub fn header_value(self) -> &'static str {
        match self {
            Self::Genotype => GT_HEADER,
            Self::HaplotypeDosage => HDS_HEADER,
        }
    }

    fn from_header_value(value: &str) -> Result<Self> {
        match parse_header_id(value) {
            Some(id) if id == "GT" => Ok(Self::Genotype),
            Some(id) if id == "HDS" => Ok(Self::HaplotypeDosage),
            _ => Err(HeaderError::UnrecognizedFormat(value.to_string()).into()),
        }
    }
}

/// Extracts the `ID=` field from a `<ID=...,Description=...>` header value
#[must_use]
pub fn parse_header_id(value: &str) -> Option<String> {
    let inner = value.strip_prefix('<')?.strip_suffix('>')?;
    for field in inner.split(',') {
        if let Some(id) = field.split_once('=').and_then(|(k, v)| (k == "ID").then_some(v)) {
            return Some(id.to_string());
        }
    }
    None
}

/// Parsed (or to-be-written) file preamble
#[derive(Clone, Debug, PartialEq)]
pub struct FileHeader {
    uuid: [u8; 16],
    headers: Vec<(String, String)>,
    info_fields: Vec<String>,
    samples: Vec<String>,
    data_format: DataFormat,
}

impl FileHeader {
    /// Builds a preamble for writing
    ///
    /// Incoming `FORMAT` headers are stripped and replaced with the single
    /// canonical one for `data_format`. `INFO` headers declare the
    /// per-record INFO field list in their given order.
    pub fn new(
        data_format: DataFormat,
        headers: impl IntoIterator<Item = (String, String)>,
        samples: Vec<String>,
    ) -> Self {
        let mut kept: Vec<(String, String)> = headers
            .into_iter()
            .filter(|(key, _)| key != "FORMAT")
            .collect();
        kept.push(("FORMAT".to_string(), data_format.header_value().to_string()));
        let info_fields = info_fields_of(&kept);
        Self {
            uuid: [0; 16],
            headers: kept,
            info_fields,
            samples,
            data_format,
        }
    }

    #[must_use]
    pub fn data_format(&self) -> DataFormat {
        self.data_format
    }

    #[must_use]
    pub fn uuid(&self) -> &[u8; 16] {
        &self.uuid
    }

    pub fn set_uuid(&mut self, uuid: [u8; 16]) {
        self.uuid = uuid;
    }

    /// All header pairs, canonical FORMAT included
    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Declared INFO field ids in declaration order
    #[must_use]
    pub fn info_fields(&self) -> &[String] {
        &self.info_fields
    }

    #[must_use]
    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    #[must_use]
    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    /// Serializes the preamble to its byte form
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&self.uuid);
        encode_varint(self.headers.len() as u64, &mut out).expect("vec write is infallible");
        for (key, value) in &self.headers {
            write_string(key, &mut out);
            write_string(value, &mut out);
        }
        encode_varint(self.samples.len() as u64, &mut out).expect("vec write is infallible");
        for sample in &self.samples {
            write_string(sample, &mut out);
        }
        out
    }

    /// Writes the preamble, returning the number of bytes emitted
    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<usize> {
        let bytes = self.to_bytes();
        writer.write_all(&bytes)?;
        Ok(bytes.len())
    }

    /// Parses a preamble from a reader positioned at byte zero
    pub fn from_reader<R: Read>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 7];
        reader
            .read_exact(&mut magic)
            .map_err(|_| HeaderError::Truncated)?;
        if magic[..4] != MAGIC[..4] {
            return Err(HeaderError::InvalidMagicNumber(magic).into());
        }
        if magic[4] != MAJOR_VERSION {
            return Err(HeaderError::UnsupportedVersion(magic[4]).into());
        }

        let mut uuid = [0u8; 16];
        reader
            .read_exact(&mut uuid)
            .map_err(|_| HeaderError::Truncated)?;

        let n_headers = header_varint(reader)? as usize;
        let mut headers = Vec::with_capacity(n_headers);
        let mut data_format = None;
        for _ in 0..n_headers {
            let key = read_string(reader)?;
            let value = read_string(reader)?;
            if key == "FORMAT" {
                data_format = Some(DataFormat::from_header_value(&value)?);
            }
            headers.push((key, value));
        }
        let Some(data_format) = data_format else {
            return Err(HeaderError::MissingFormatHeader.into());
        };

        let n_samples = header_varint(reader)? as usize;
        let mut samples = Vec::with_capacity(n_samples);
        for _ in 0..n_samples {
            samples.push(read_string(reader)?);
        }

        let info_fields = info_fields_of(&headers);
        Ok(Self {
            uuid,
            headers,
            info_fields,
            samples,
            data_format,
        })
    }
}

fn info_fields_of(headers: &[(String, String)]) -> Vec<String> {
    headers
        .iter()
        .filter(|(key, _)| key == "INFO")
        .filter_map(|(_, value)| parse_header_id(value))
        .collect()
}

fn write_string(s: &str, out: &mut Vec<u8>) {
    encode_varint(s.len() as u64, out).expect("vec write is infallible");
    out.extend_from_slice(s.as_bytes());
}

/// Varint read with EOF remapped to the preamble error kind
fn header_varint<R: Read>(reader: &mut R) -> Result<u64> {
    match decode_varint(reader) {
        Ok(v) => Ok(v),
        Err(Error::Read(ReadError::Truncated)) => Err(HeaderError::Truncated.into()),
        Err(e) => Err(e),
    }
}

fn read_string<R: Read>(reader: &mut R) -> Result<String> {
    let len = header_varint(reader)? as usize;
    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .map_err(|_| HeaderError::Truncated)?;
    Ok(std::str::from_utf8(&buf)?.to_string())
}
