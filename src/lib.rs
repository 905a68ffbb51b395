#![doc = include_str!("../README.md")]

mod block;
pub mod compressor;
mod data;
mod dir;
mod entry;
pub mod error;
mod export;
pub mod filesystem;
mod flags;
mod fragment;
mod id;
mod inode;
pub mod metadata;
pub mod pack;
pub mod scan;
pub mod squashfs;
mod xattr;

pub use crate::compressor::{CompressionOptions, Compressor};
pub use crate::error::MkfsError;
pub use crate::filesystem::node::{
    NodeHeader, SquashfsBlockDevice, SquashfsCharacterDevice, SquashfsSymlink,
};
pub use crate::filesystem::writer::{CompressionExtra, FilesystemCompressor, FilesystemWriter};
pub use crate::id::Id;
pub use crate::pack::{PackEntry, PackKind};
