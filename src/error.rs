use std::io;

use thiserror::Error;

/// Errors surfaced by the cache's public operations.
///
/// Every operation reports failure through one of these variants; none
/// is recovered internally. `Miss` and `TooLarge` are ordinary lookup
/// outcomes rather than faults — `read` turns a `Miss` into a
/// filesystem read and a possible admission.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backing file could not be opened on the miss path.
    #[error("file not found")]
    NotFound,

    /// Zero-length file, file larger than the destination buffer, or a
    /// path exceeding the bounded key length.
    #[error("invalid size or path")]
    Invalid,

    /// A cached entry is larger than the destination buffer.
    #[error("cached entry exceeds destination buffer")]
    TooLarge,

    /// The path has no directory entry.
    #[error("not cached")]
    Miss,

    /// An item exceeds the configured per-item size limit.
    #[error("item exceeds max item size")]
    TooBig,

    /// Entry-slot or byte-capacity exhaustion.
    #[error("cache out of space")]
    OutOfMemory,

    /// Segment creation or file I/O failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

pub type CacheResult<T> = Result<T, CacheError>;
