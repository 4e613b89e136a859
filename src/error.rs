//! Error types reported by the library.

use std::fmt;
use std::path::PathBuf;

use crate::btf::Kind;

pub type Result<T> = std::result::Result<T, Error>;

/// Byte range of the input a decoding error refers to. For record-level
/// errors this covers the whole record, fixed header included.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FileRange {
    pub offset: u64,
    pub size: usize,
}

impl fmt::Display for FileRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.offset, self.offset + self.size as u64)
    }
}

#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Input file does not exist. Kept apart from [`Error::Io`] so callers
    /// can tell a typo from a truncated blob.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),
    /// Short read or out-of-range seek, with the attempted range.
    #[error("i/o error, file range: {0}")]
    Io(FileRange),
    /// The allocator refused to reserve room for a record list.
    #[error("memory allocation failure")]
    MemoryAllocation,
    /// The input does not start with the BTF magic marker.
    #[error("invalid magic value")]
    InvalidMagic,
    /// On-wire kind ordinal outside the known range.
    #[error("invalid BTF kind, file range: {0}")]
    InvalidKind(FileRange),
    /// Kind ordinal is reserved but no parser handles it.
    #[error("unsupported BTF kind, file range: {0}")]
    UnsupportedKind(FileRange),
    /// A type record failed its per-kind validation.
    #[error("invalid encoding for `{kind}` type, file range: {range}")]
    InvalidEncoding { kind: Kind, range: FileRange },
    /// A string offset resolves outside every blob's string section.
    #[error("invalid string offset {0}")]
    InvalidStringOffset(u64),
    /// The decoded type graph cannot be turned into a C header.
    #[error("header generation failed: {0}")]
    Generation(String),
    /// Invalid input file or section layout.
    #[error("{0}")]
    Format(String),
}
