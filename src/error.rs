use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("chunk type must be exactly 4 bytes, got {len}")]
    InvalidChunkType { len: usize },

    #[error("chunk payload of {len} bytes does not fit a 32-bit length field")]
    PayloadTooLarge { len: usize },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("compression error: {0}")]
    Compress(#[source] io::Error),

    #[error("logical payload size overflows u64")]
    LogicalSizeOverflow,

    #[error("malformed chunk: {0}")]
    Decode(&'static str),

    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
}

pub type Result<T> = std::result::Result<T, Error>;
