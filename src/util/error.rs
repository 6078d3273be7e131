//! Error types for the tiffstack library.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for stack file operations.
///
/// Three families with different recovery rules: format errors are always
/// fatal to the open, I/O errors on the read path are retried exactly once
/// through a transparent re-open, and usage errors signal caller bugs that
/// no retry can fix.
#[derive(Error, Debug)]
pub enum Error {
    /// File does not exist or cannot be accessed
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Byte-order marker is neither "II" nor "MM"
    #[error("Corrupt header: unrecognized byte-order marker {0:#06x}")]
    BadByteOrderMarker(u16),

    /// Version marker other than 42 (classic) or 43 (wide)
    #[error("Unrecognized version marker: {0}")]
    BadVersionMarker(u16),

    /// Wide-format offset-size field must be 8
    #[error("Unsupported offset size in wide-format file: {0}")]
    BadOffsetSize(u16),

    /// A directory declared an implausible number of entries
    #[error("Aberrant number of directory entries: {0}")]
    AberrantEntryCount(u64),

    /// An on-disk offset had its sign bit set
    #[error("Negative offset")]
    NegativeOffset,

    /// Unexpected magic number inside a nested metadata block
    #[error("Unrecognized magic number in vendor metadata block: {0:#010x}")]
    BadVendorMagic(u32),

    /// Pixel encoding this reader does not support
    #[error("Unsupported pixel encoding: {0}")]
    UnsupportedPixelKind(String),

    /// Compression scheme this reader does not support
    #[error("Unsupported compression scheme: {0}")]
    UnsupportedCompression(u32),

    /// No directories could be decoded from the file
    #[error("No image directories found")]
    EmptyDirectoryChain,

    /// Invalid structure in the file
    #[error("Invalid file structure: {0}")]
    InvalidStructure(String),

    /// Pre-declared dimensions did not match the decoded file
    #[error("{axis} set before opening ({expected}) does not match the file ({actual})")]
    DimensionMismatch {
        axis: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A positioned read returned fewer bytes than one slice needs
    #[error("Read {read} bytes instead of the {expected} expected from {}", path.display())]
    ShortRead {
        read: usize,
        expected: usize,
        path: PathBuf,
    },

    /// Reading a slice that has not been written yet
    #[error("Cannot read slice {0} before it has been written")]
    SliceNotWritten(usize),

    /// Slices must be written in strictly increasing index order
    #[error("Non-sequential slice write: expected {expected}, got {got}")]
    NonSequentialWrite { expected: usize, got: usize },

    /// Operation requires a descriptor table that does not exist yet
    #[error("No descriptor table: file was never decoded or opened for writing")]
    NoDescriptorTable,

    /// Operation only valid while a write pass is active
    #[error("Not writing: {0}")]
    NotWriting(&'static str),

    /// Write operation failed on the worker thread
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create an invalid structure error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidStructure(msg.into())
    }

    /// True for format-level corruption: always fatal to the open.
    pub fn is_format(&self) -> bool {
        matches!(
            self,
            Self::BadByteOrderMarker(_)
                | Self::BadVersionMarker(_)
                | Self::BadOffsetSize(_)
                | Self::AberrantEntryCount(_)
                | Self::NegativeOffset
                | Self::BadVendorMagic(_)
                | Self::UnsupportedPixelKind(_)
                | Self::UnsupportedCompression(_)
                | Self::EmptyDirectoryChain
                | Self::InvalidStructure(_)
        )
    }

    /// True for caller programming errors: unrecoverable by retry.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Self::SliceNotWritten(_)
                | Self::NonSequentialWrite { .. }
                | Self::NoDescriptorTable
                | Self::NotWriting(_)
                | Self::DimensionMismatch { .. }
        )
    }
}

/// Result type alias for stack file operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::BadByteOrderMarker(0x4242);
        assert!(e.to_string().contains("byte-order"));

        let e = Error::NonSequentialWrite { expected: 4, got: 7 };
        assert!(e.to_string().contains("4"));
        assert!(e.to_string().contains("7"));
    }

    #[test]
    fn test_taxonomy() {
        assert!(Error::AberrantEntryCount(5000).is_format());
        assert!(!Error::AberrantEntryCount(5000).is_usage());
        assert!(Error::SliceNotWritten(3).is_usage());
        let io: Error = std::io::Error::new(std::io::ErrorKind::Other, "x").into();
        assert!(!io.is_format());
        assert!(!io.is_usage());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
