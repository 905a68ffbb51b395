//! Builds the [`Inode`] for each filesystem node and turns the resulting
//! stream of [`Entry`] records into delta-encoded [`Dir`] listings (C9).

use core::fmt;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;

use crate::data::Added;
use crate::dir::{Dir, DirEntry};
use crate::filesystem::node::{NodeHeader, SquashfsBlockDevice, SquashfsCharacterDevice, SquashfsSymlink};
use crate::id::Id;
use crate::inode::{
    BasicDeviceSpecialFile, BasicDirectory, BasicFile, BasicIpc, BasicSymlink, ExtendedDirectory,
    ExtendedFile, Inode, InodeHeader, InodeId, InodeInner,
};
use crate::metadata::MetadataWriter;
use crate::MkfsError;

#[derive(Clone)]
pub(crate) struct Entry<'a> {
    pub start: u32,
    pub offset: u16,
    pub inode: u32,
    pub t: InodeId,
    pub name_size: u16,
    pub name: &'a [u8],
}

impl<'a> Entry<'a> {
    pub fn name(&self) -> Result<String, MkfsError> {
        Ok(core::str::from_utf8(self.name).map_err(|_| MkfsError::StrUtf8)?.to_string())
    }

    fn find_id_index(id_table: &[Id], id: u32) -> Result<u16, MkfsError> {
        id_table
            .iter()
            .position(|a| a.num == id)
            .and_then(|pos| u16::try_from(pos).ok())
            .ok_or_else(|| MkfsError::TreeInvariant(format!("id {id} not found in id table")))
    }

    fn header(header: NodeHeader, inode: u32, id_table: &[Id]) -> Result<InodeHeader, MkfsError> {
        Ok(InodeHeader {
            inode_number: inode,
            uid: Self::find_id_index(id_table, header.uid)?,
            gid: Self::find_id_index(id_table, header.gid)?,
            permissions: header.permissions,
            mtime: header.mtime,
        })
    }

    /// Write a directory inode (basic or extended, depending on `file_size`
    /// or the presence of xattrs, which only the extended form can carry).
    #[allow(clippy::too_many_arguments)]
    pub fn path(
        name: &'a OsStr,
        header: NodeHeader,
        inode: u32,
        children_num: usize,
        parent_inode: u32,
        inode_writer: &mut MetadataWriter,
        file_size: usize,
        block_offset: u16,
        block_index: u32,
        block_size: u32,
        block_log: u16,
        id_table: &[Id],
        xattr_index: u32,
    ) -> Result<Self, MkfsError> {
        let inode_header = Self::header(header, inode, id_table)?;

        let link_count = |extra: usize| -> Result<u32, MkfsError> {
            2u32.checked_add(u32::try_from(extra).map_err(|_| {
                MkfsError::Overflow(format!("directory link_count overflow for {} children", extra))
            })?)
            .ok_or_else(|| MkfsError::Overflow("directory link_count overflow".into()))
        };

        let dir_inode = if file_size > u16::MAX as usize || xattr_index != crate::squashfs::NOT_SET as u32 {
            Inode::new(
                InodeId::ExtendedDirectory,
                inode_header,
                InodeInner::ExtendedDirectory(ExtendedDirectory {
                    link_count: link_count(children_num)?,
                    file_size: file_size.try_into().map_err(|_| {
                        MkfsError::Overflow(format!("ExtendedDirectory file_size {file_size}"))
                    })?,
                    block_index,
                    parent_inode,
                    index_count: 0,
                    block_offset,
                    xattr_index,
                    dir_index: vec![],
                }),
            )
        } else {
            Inode::new(
                InodeId::BasicDirectory,
                inode_header,
                InodeInner::BasicDirectory(BasicDirectory {
                    block_index,
                    link_count: link_count(children_num)?,
                    file_size: file_size.try_into().map_err(|_| {
                        MkfsError::Overflow(format!("BasicDirectory file_size {file_size}"))
                    })?,
                    block_offset,
                    parent_inode,
                }),
            )
        };

        Ok(dir_inode.to_bytes(name.as_bytes(), inode_writer, block_size, block_log))
    }

    /// Write a file inode: basic or extended, with either real data blocks or
    /// a sole fragment tail.
    #[allow(clippy::too_many_arguments)]
    #[allow(clippy::too_many_arguments)]
    pub fn file(
        node_path: &'a OsStr,
        header: NodeHeader,
        inode: u32,
        inode_writer: &mut MetadataWriter,
        file_size: usize,
        added: &Added,
        block_size: u32,
        block_log: u16,
        id_table: &[Id],
        xattr_index: u32,
    ) -> Result<Self, MkfsError> {
        let inode_header = Self::header(header, inode, id_table)?;
        let has_xattr = xattr_index != crate::squashfs::NOT_SET as u32;

        match added {
            Added::Data { blocks_start, block_sizes } => {
                match (u32::try_from(file_size), u32::try_from(*blocks_start)) {
                    (Ok(file_size), Ok(blocks_start)) if !has_xattr => {
                        let file_inode = Inode::new(
                            InodeId::BasicFile,
                            inode_header,
                            InodeInner::BasicFile(BasicFile {
                                blocks_start,
                                frag_index: 0xffff_ffff,
                                block_offset: 0,
                                file_size,
                                block_sizes: block_sizes.to_vec(),
                            }),
                        );
                        Ok(file_inode.to_bytes(node_path.as_bytes(), inode_writer, block_size, block_log))
                    }
                    _ => {
                        let file_inode = Inode::new(
                            InodeId::ExtendedFile,
                            inode_header,
                            InodeInner::ExtendedFile(ExtendedFile {
                                blocks_start: *blocks_start,
                                frag_index: 0xffff_ffff,
                                block_offset: 0,
                                file_size: file_size as u64,
                                sparse: 0,
                                block_sizes: block_sizes.to_vec(),
                                link_count: 1,
                                xattr_index,
                            }),
                        );
                        Ok(file_inode.to_bytes(node_path.as_bytes(), inode_writer, block_size, block_log))
                    }
                }
            }
            Added::Fragment { frag_index, block_offset } if !has_xattr => {
                let file_inode = Inode::new(
                    InodeId::BasicFile,
                    inode_header,
                    InodeInner::BasicFile(BasicFile {
                        blocks_start: 0,
                        frag_index: *frag_index,
                        block_offset: *block_offset,
                        file_size: file_size.try_into().map_err(|_| {
                            MkfsError::Overflow(format!("BasicFile file_size {file_size}"))
                        })?,
                        block_sizes: vec![],
                    }),
                );
                Ok(file_inode.to_bytes(node_path.as_bytes(), inode_writer, block_size, block_log))
            }
            Added::Fragment { frag_index, block_offset } => {
                let file_inode = Inode::new(
                    InodeId::ExtendedFile,
                    inode_header,
                    InodeInner::ExtendedFile(ExtendedFile {
                        blocks_start: 0,
                        frag_index: *frag_index,
                        block_offset: *block_offset,
                        file_size: file_size as u64,
                        sparse: 0,
                        block_sizes: vec![],
                        link_count: 1,
                        xattr_index,
                    }),
                );
                Ok(file_inode.to_bytes(node_path.as_bytes(), inode_writer, block_size, block_log))
            }
        }
    }

    pub fn symlink(
        node_path: &'a OsStr,
        header: NodeHeader,
        symlink: &SquashfsSymlink,
        inode: u32,
        inode_writer: &mut MetadataWriter,
        block_size: u32,
        block_log: u16,
        id_table: &[Id],
    ) -> Result<Self, MkfsError> {
        let inode_header = Self::header(header, inode, id_table)?;
        let link = symlink.link.as_os_str().as_bytes();
        let sym_inode = Inode::new(
            InodeId::BasicSymlink,
            inode_header,
            InodeInner::BasicSymlink(BasicSymlink {
                link_count: 1,
                target_size: link.len().try_into().map_err(|_| {
                    MkfsError::Overflow(format!("symlink target_size {}", link.len()))
                })?,
                target_path: link.to_vec(),
            }),
        );
        Ok(sym_inode.to_bytes(node_path.as_bytes(), inode_writer, block_size, block_log))
    }

    pub fn char_device(
        node_path: &'a OsStr,
        header: NodeHeader,
        dev: &SquashfsCharacterDevice,
        inode: u32,
        inode_writer: &mut MetadataWriter,
        block_size: u32,
        block_log: u16,
        id_table: &[Id],
    ) -> Result<Self, MkfsError> {
        let inode_header = Self::header(header, inode, id_table)?;
        let dev_inode = Inode::new(
            InodeId::BasicCharacterDevice,
            inode_header,
            InodeInner::BasicCharacterDevice(BasicDeviceSpecialFile {
                link_count: 1,
                device_number: dev.device_number,
            }),
        );
        Ok(dev_inode.to_bytes(node_path.as_bytes(), inode_writer, block_size, block_log))
    }

    pub fn block_device(
        node_path: &'a OsStr,
        header: NodeHeader,
        dev: &SquashfsBlockDevice,
        inode: u32,
        inode_writer: &mut MetadataWriter,
        block_size: u32,
        block_log: u16,
        id_table: &[Id],
    ) -> Result<Self, MkfsError> {
        let inode_header = Self::header(header, inode, id_table)?;
        let dev_inode = Inode::new(
            InodeId::BasicBlockDevice,
            inode_header,
            InodeInner::BasicBlockDevice(BasicDeviceSpecialFile {
                link_count: 1,
                device_number: dev.device_number,
            }),
        );
        Ok(dev_inode.to_bytes(node_path.as_bytes(), inode_writer, block_size, block_log))
    }

    pub fn fifo(
        node_path: &'a OsStr,
        header: NodeHeader,
        inode: u32,
        inode_writer: &mut MetadataWriter,
        block_size: u32,
        block_log: u16,
        id_table: &[Id],
    ) -> Result<Self, MkfsError> {
        let inode_header = Self::header(header, inode, id_table)?;
        let ipc_inode =
            Inode::new(InodeId::BasicFifo, inode_header, InodeInner::BasicFifo(BasicIpc { link_count: 1 }));
        Ok(ipc_inode.to_bytes(node_path.as_bytes(), inode_writer, block_size, block_log))
    }

    pub fn socket(
        node_path: &'a OsStr,
        header: NodeHeader,
        inode: u32,
        inode_writer: &mut MetadataWriter,
        block_size: u32,
        block_log: u16,
        id_table: &[Id],
    ) -> Result<Self, MkfsError> {
        let inode_header = Self::header(header, inode, id_table)?;
        let ipc_inode =
            Inode::new(InodeId::BasicSocket, inode_header, InodeInner::BasicSocket(BasicIpc { link_count: 1 }));
        Ok(ipc_inode.to_bytes(node_path.as_bytes(), inode_writer, block_size, block_log))
    }
}

impl fmt::Debug for Entry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("start", &self.start)
            .field("offset", &self.offset)
            .field("inode", &self.inode)
            .field("t", &self.t)
            .field("name", &self.name().unwrap_or_else(|_| "<invalid utf8>".to_string()))
            .finish()
    }
}

impl Entry<'_> {
    fn create_dir(creating_dir: &[&Self], start: u32, lowest_inode: u32) -> Result<Dir, MkfsError> {
        let mut dir = Dir::new(lowest_inode);
        dir.start = start;

        if creating_dir.len() > 256 {
            return Err(MkfsError::TreeInvariant(format!(
                "directory header holds {} entries, max is 256",
                creating_dir.len()
            )));
        }

        for e in creating_dir {
            let inode_offset: i16 = (e.inode as i64 - lowest_inode as i64).try_into().map_err(|_| {
                MkfsError::Overflow(format!(
                    "directory entry inode_offset overflow (inode {}, base {})",
                    e.inode, lowest_inode
                ))
            })?;
            dir.push(DirEntry {
                offset: e.offset,
                inode_offset,
                t: e.t.into_base_type(),
                name_size: e.name_size,
                name: e.name.to_vec(),
            });
        }

        Ok(dir)
    }

    /// Group a run of entries sharing the same inode-table block into
    /// [`Dir`] headers, splitting whenever the block changes, a header would
    /// exceed 256 entries, or the inode delta would overflow an i16.
    pub(crate) fn into_dir(entries: Vec<Self>) -> Result<Vec<Dir>, MkfsError> {
        let mut dirs = vec![];
        let mut creating_dir: Vec<&Self> = vec![];
        let mut lowest_inode = u32::MAX;

        let mut creating_start = match entries.first() {
            Some(entry) => entry.start,
            None => return Ok(vec![]),
        };

        let mut iter = entries.iter().peekable();
        while let Some(e) = iter.next() {
            lowest_inode = lowest_inode.min(e.inode);
            creating_dir.push(e);

            if let Some(next) = iter.peek() {
                let overflow = (next.inode as u64).abs_diff(lowest_inode as u64) > i16::MAX as u64;
                if next.start != creating_start || creating_dir.len() >= 256 || overflow {
                    dirs.push(Self::create_dir(&creating_dir, creating_start, lowest_inode)?);
                    creating_dir = vec![];
                    creating_start = next.start;
                    lowest_inode = u32::MAX;
                }
            } else {
                dirs.push(Self::create_dir(&creating_dir, creating_start, lowest_inode)?);
            }
        }

        Ok(dirs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_into_dir_single_header() {
        let entries = vec![
            Entry { start: 0, offset: 0x100, inode: 1, t: InodeId::BasicDirectory, name_size: 0x01, name: b"aa" },
            Entry { start: 1, offset: 0x300, inode: 5, t: InodeId::BasicDirectory, name_size: 0x01, name: b"bb" },
            Entry { start: 1, offset: 0x200, inode: 6, t: InodeId::BasicDirectory, name_size: 0x01, name: b"zz" },
        ];

        let dirs = Entry::into_dir(entries).unwrap();
        assert_eq!(dirs.len(), 2);
        assert_eq!(dirs[0].start, 0);
        assert_eq!(dirs[0].inode_num, 1);
        assert_eq!(dirs[1].start, 1);
        assert_eq!(dirs[1].inode_num, 5);
        assert_eq!(dirs[1].dir_entries.len(), 2);
    }

    #[test]
    fn test_entry_into_dir_splits_on_256_cap() {
        let mut entries = vec![];
        for i in 0..300u32 {
            entries.push(Entry {
                start: 0,
                offset: 0,
                inode: i + 1,
                t: InodeId::BasicFile,
                name_size: 0,
                name: b"x",
            });
        }
        let dirs = Entry::into_dir(entries).unwrap();
        assert_eq!(dirs.len(), 2);
        assert_eq!(dirs[0].dir_entries.len(), 256);
        assert_eq!(dirs[1].dir_entries.len(), 44);
    }

    #[test]
    fn test_entry_into_dir_empty() {
        assert_eq!(Entry::into_dir(vec![]).unwrap(), vec![]);
    }
}
