//! Directory table: [`Dir`] headers, delta-encoded [`DirEntry`] records, and
//! [`DirectoryIndex`] (unused by this writer, kept for on-disk-format fidelity).

use core::fmt;

use deku::prelude::*;

use crate::inode::InodeId;

/// A directory listing header covering at most 256 following entries, all of
/// which share `start` (the block in the inode table their inode lives in).
#[derive(Debug, DekuRead, DekuWrite, Clone, PartialEq, Eq)]
#[deku(endian = "little")]
pub struct Dir {
    /// one less than the number of entries that follow; at most 256 entries
    /// may share a single header
    #[deku(assert = "*count < 256")]
    pub(crate) count: u32,
    pub(crate) start: u32,
    /// base inode number; entries store their inode number as a delta from this
    pub(crate) inode_num: u32,
    #[deku(count = "*count + 1")]
    pub(crate) dir_entries: Vec<DirEntry>,
}

impl Dir {
    pub fn new(lowest_inode: u32) -> Self {
        Self {
            count: 0,
            start: 0,
            inode_num: lowest_inode,
            dir_entries: vec![],
        }
    }

    pub fn push(&mut self, entry: DirEntry) {
        self.dir_entries.push(entry);
        self.count = (self.dir_entries.len() - 1) as u32;
    }
}

#[derive(DekuRead, DekuWrite, Clone, PartialEq, Eq)]
#[deku(endian = "little")]
pub struct DirEntry {
    pub(crate) offset: u16,
    pub(crate) inode_offset: i16,
    pub(crate) t: InodeId,
    /// one less than the length of `name`
    pub(crate) name_size: u16,
    #[deku(count = "*name_size + 1")]
    pub(crate) name: Vec<u8>,
}

impl DirEntry {
    pub fn name(&self) -> String {
        std::str::from_utf8(&self.name).unwrap().to_string()
    }
}

impl fmt::Debug for DirEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirEntry")
            .field("offset", &self.offset)
            .field("inode_offset", &self.inode_offset)
            .field("t", &self.t)
            .field("name_size", &self.name_size)
            .field("name", &self.name())
            .finish()
    }
}

/// Directory index entries accelerate lookups into large listings. This
/// writer never emits any (`index_count` is always 0 on extended directories)
/// but the type is kept so the extended-directory inode shape stays complete.
#[derive(Debug, DekuRead, DekuWrite, Clone, PartialEq, Eq)]
#[deku(endian = "little")]
pub struct DirectoryIndex {
    pub(crate) index: u32,
    pub(crate) start: u32,
    pub(crate) name_size: u32,
    #[deku(count = "*name_size + 1")]
    pub(crate) name: Vec<u8>,
}
