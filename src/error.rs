//! Errors

use std::{io, string};

use thiserror::Error;

use crate::compressor::Compressor;

/// Errors generated while building a SquashFS image
#[derive(Error, Debug)]
pub enum MkfsError {
    #[error("std io error: {0}")]
    StdIo(#[from] io::Error),

    #[error("deku error: {0:?}")]
    Deku(#[from] deku::DekuError),

    #[error("string error: {0:?}")]
    StringUtf8(#[from] string::FromUtf8Error),

    #[error("string error: {0:?}")]
    StrUtf8(#[from] std::str::Utf8Error),

    #[error("unsupported compressor: {0:?}")]
    UnsupportedCompression(Compressor),

    #[error("invalid squashfs compression options")]
    InvalidCompressionOption,

    #[error("branch was thought to be unreachable")]
    Unreachable,

    #[error("inode was unexpected in this position")]
    UnexpectedInode,

    #[error("Invalid file path in the squashfs image: {0}")]
    InvalidFilePath(String),

    #[error("file inside squashfs image has no name")]
    UndefinedFileName,

    #[error("file duplicated in squashfs image: {0}")]
    DuplicatedFileName(String),

    #[error("tree invariant violated: {0}")]
    TreeInvariant(String),

    #[error("field overflows even the extended inode form: {0}")]
    Overflow(String),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("invalid pack-file entry on line {line}: {reason}")]
    PackFileInvalid { line: usize, reason: String },

    #[error("block processor was cancelled by a prior error")]
    Cancelled,

    #[error("truncated read: expected more data but got 0 bytes before EOF")]
    Truncated,
}

impl From<MkfsError> for io::Error {
    fn from(value: MkfsError) -> Self {
        use MkfsError::*;
        match value {
            StdIo(io) => io,
            Deku(e) => e.into(),
            StringUtf8(e) => Self::new(io::ErrorKind::InvalidData, e),
            StrUtf8(e) => Self::new(io::ErrorKind::InvalidData, e),
            e @ UnsupportedCompression(_) => Self::new(io::ErrorKind::Unsupported, e),
            e @ (Unreachable
            | UnexpectedInode
            | InvalidCompressionOption
            | InvalidFilePath(_)
            | UndefinedFileName
            | DuplicatedFileName(_)
            | TreeInvariant(_)
            | Overflow(_)
            | ConfigInvalid(_)
            | PackFileInvalid { .. }
            | Truncated) => Self::new(io::ErrorKind::InvalidData, e),
            e @ Cancelled => Self::new(io::ErrorKind::Other, e),
        }
    }
}
