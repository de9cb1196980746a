//! Error types for bl-media.

use std::io;
use thiserror::Error;

/// Result type for bl-media operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for bl-media operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error while reading the segment buffer (usually truncation).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid ISO BMFF structure.
    #[error("Invalid MP4: {0}")]
    InvalidMp4(String),

    /// Invalid MPEG-2 transport stream.
    #[error("Invalid TS: {0}")]
    InvalidTs(String),

    /// Invalid ID3 tag.
    #[error("Invalid ID3: {0}")]
    InvalidId3(String),

    /// Buffer too small for operation.
    #[error("Buffer underflow: need {need} bytes, have {have}")]
    BufferUnderflow { need: usize, have: usize },
}

impl Error {
    /// Create an invalid MP4 error.
    pub fn invalid_mp4(msg: impl Into<String>) -> Self {
        Self::InvalidMp4(msg.into())
    }

    /// Create an invalid TS error.
    pub fn invalid_ts(msg: impl Into<String>) -> Self {
        Self::InvalidTs(msg.into())
    }
}
