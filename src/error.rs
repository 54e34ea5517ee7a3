use std::path::PathBuf;

/// Custom Result type for sav operations, wrapping the crate [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the sav library
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Error processing header: {0}")]
    Header(#[from] HeaderError),

    #[error("Error reading file: {0}")]
    Read(#[from] ReadError),

    #[error("Error writing file: {0}")]
    Write(#[from] WriteError),

    #[error("Error processing index: {0}")]
    Index(#[from] IndexError),

    #[error("Error processing typed value: {0}")]
    Value(#[from] ValueError),

    #[error("Error with IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("Error with UTF8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

#[derive(thiserror::Error, Debug)]
pub enum HeaderError {
    #[error("Invalid magic number: {0:02x?}")]
    InvalidMagicNumber([u8; 7]),

    #[error("Unsupported major version: {0}")]
    UnsupportedVersion(u8),

    #[error("Missing FORMAT header")]
    MissingFormatHeader,

    #[error("Unrecognized FORMAT header value: {0}")]
    UnrecognizedFormat(String),

    #[error("Unexpected end of stream in file preamble")]
    Truncated,
}

#[derive(thiserror::Error, Debug)]
pub enum ReadError {
    #[error("Unexpected end of stream mid-record")]
    Truncated,

    #[error("Varint exceeds maximum encoded length")]
    MalformedVarint,

    #[error("Record payload references an out-of-range haplotype slot")]
    CorruptRecord,

    #[error("Genotype payload length {len} is not a multiple of sample count {samples}")]
    SampleCountMismatch { samples: usize, len: usize },

    #[error("Requested a region on a file opened without an index: {0}")]
    IndexMissing(PathBuf),

    #[error("Invalid region string: {0}")]
    InvalidRegion(String),
}

#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    #[error("Block holds {0} records; maximum is 65536")]
    BlockOverflow(usize),

    #[error("Frame offset {0} exceeds the 2^48-1 index limit")]
    OffsetOverflow(u64),

    #[error("Genotype vector length {len} is not a multiple of sample count {samples}")]
    SampleCountMismatch { samples: usize, len: usize },

    #[error("Writer is in a failed state; refusing further writes")]
    Poisoned,
}

#[derive(thiserror::Error, Debug)]
pub enum IndexError {
    #[error("Invalid index magic number: {0:#018x}")]
    InvalidMagicNumber(u64),

    #[error("Index UUID does not match the data file")]
    UuidMismatch,

    #[error("Entries for chromosome {0} arrived out of min_pos order")]
    UnsortedEntry(String),

    #[error("Index file is truncated")]
    Truncated,
}

#[derive(thiserror::Error, Debug)]
pub enum ValueError {
    #[error("Width code {0} is not one of {{1,2,3,4,5,7,8}}")]
    BadWidth(u8),

    #[error("PBWT requires int8 or int16 values; got width code {0}")]
    PbwtWidth(u8),

    #[error("PBWT is not supported for sparse vectors")]
    PbwtSparse,

    #[error("Vector length {got} does not match permutation length {expected}")]
    PbwtLengthMismatch { expected: usize, got: usize },

    #[error("Serialized value is truncated")]
    Truncated,
}
