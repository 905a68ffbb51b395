//! Filesystem writer (C1/C9/C10): orchestrates every other component into a
//! finished SquashFS image.
//!
//! [`FilesystemWriter`] owns the in-memory tree (C8) and drives, in order:
//! the block processor (C3) and fragment packer (C4) for file data, the
//! xattr writer (C7), inode + directory serialization into their own
//! metadata streams (C5/C9), the id/fragment/export side tables, and finally
//! the super block (C10).

use std::collections::HashMap;
use std::io::{Seek, Write};
use std::path::Path;

use deku::prelude::*;
use tracing::{info, instrument, trace};

use crate::compressor::{CompressionOptions, Compressor};
use crate::data::{Added, DataWriter};
use crate::entry::Entry;
use crate::error::MkfsError;
use crate::filesystem::node::{
    FilesystemTree, InnerNode, NodeHeader, SquashfsBlockDevice, SquashfsCharacterDevice,
    SquashfsFileWriter, SquashfsSymlink,
};
use crate::flags::Flags;
use crate::fragment::{Fragment, FRAGMENT_SIZE};
use crate::id::Id;
use crate::inode::InodeId;
use crate::metadata::{MetadataWriter, METADATA_MAXSIZE};
use crate::squashfs::{SuperBlock, DEFAULT_BLOCK_SIZE, DEFAULT_PAD_LEN, NOT_SET};
use crate::xattr::{XattrEntry, XattrWriter};

const DEFAULT_BLOCK_LOG: u16 = 0x11;

fn block_log(block_size: u32) -> u16 {
    block_size.trailing_zeros() as u16
}

/// Owns the tree and the knobs that control how it is assembled into an image.
pub struct FilesystemWriter {
    tree: FilesystemTree,
    compressor: FilesystemCompressor,
    block_size: u32,
    pad_len: u32,
    mod_time: u32,
    num_jobs: usize,
    queue_backlog: usize,
    exportable: bool,
}

impl FilesystemWriter {
    pub fn new(root_header: NodeHeader) -> Self {
        Self {
            tree: FilesystemTree::new(root_header),
            compressor: FilesystemCompressor::default(),
            block_size: DEFAULT_BLOCK_SIZE,
            pad_len: DEFAULT_PAD_LEN,
            mod_time: 0,
            num_jobs: 1,
            queue_backlog: 64,
            exportable: false,
        }
    }

    pub fn set_compressor(&mut self, compressor: FilesystemCompressor) {
        self.compressor = compressor;
    }

    pub fn set_block_size(&mut self, block_size: u32) -> Result<(), MkfsError> {
        if !block_size.is_power_of_two() {
            return Err(MkfsError::ConfigInvalid(format!("block size {block_size} is not a power of two")));
        }
        self.block_size = block_size;
        Ok(())
    }

    pub fn set_pad_len(&mut self, pad_len: u32) {
        self.pad_len = pad_len;
    }

    pub fn set_mod_time(&mut self, mod_time: u32) {
        self.mod_time = mod_time;
    }

    pub fn set_num_jobs(&mut self, num_jobs: usize) {
        self.num_jobs = num_jobs.max(1);
    }

    pub fn set_queue_backlog(&mut self, queue_backlog: usize) {
        self.queue_backlog = queue_backlog.max(1);
    }

    pub fn set_exportable(&mut self, exportable: bool) {
        self.exportable = exportable;
    }

    pub fn push_dir(&mut self, path: &Path, header: NodeHeader) -> Result<(), MkfsError> {
        self.tree.push_dir(path, header)
    }

    pub fn push_file(
        &mut self,
        path: &Path,
        header: NodeHeader,
        reader: Box<dyn std::io::Read + Send>,
    ) -> Result<(), MkfsError> {
        self.tree.push_file(path, header, reader)
    }

    pub fn push_symlink(&mut self, path: &Path, header: NodeHeader, link: std::path::PathBuf) -> Result<(), MkfsError> {
        self.tree.push_symlink(path, header, link)
    }

    pub fn push_char_device(&mut self, path: &Path, header: NodeHeader, device_number: u32) -> Result<(), MkfsError> {
        self.tree.push_char_device(path, header, device_number)
    }

    pub fn push_block_device(&mut self, path: &Path, header: NodeHeader, device_number: u32) -> Result<(), MkfsError> {
        self.tree.push_block_device(path, header, device_number)
    }

    pub fn push_fifo(&mut self, path: &Path, header: NodeHeader) -> Result<(), MkfsError> {
        self.tree.push_fifo(path, header)
    }

    pub fn push_socket(&mut self, path: &Path, header: NodeHeader) -> Result<(), MkfsError> {
        self.tree.push_socket(path, header)
    }

    pub fn push_hardlink(&mut self, path: &Path, header: NodeHeader, target: &Path) -> Result<(), MkfsError> {
        self.tree.push_hardlink(path, header, target)
    }

    pub fn set_xattrs(&mut self, path: &Path, xattrs: Vec<XattrEntry>) -> Result<(), MkfsError> {
        self.tree.set_xattrs(path, xattrs)
    }

    /// Assign every node's final on-disk inode number. Non-hardlink nodes
    /// each get a fresh number in tree order; a hardlink reuses its target's.
    fn assign_inode_numbers(&mut self) -> Result<u32, MkfsError> {
        let mut next = 1u32;
        for idx in self.tree.iter_indices() {
            if !matches!(self.tree.get(idx).inner, InnerNode::HardLink { .. }) {
                self.tree.get_mut(idx).inode_number = Some(next);
                next += 1;
            }
        }
        for idx in self.tree.iter_indices() {
            if let InnerNode::HardLink { target } = &self.tree.get(idx).inner {
                let target = target.clone();
                let target_idx = self.tree.index_of(&target).ok_or_else(|| {
                    MkfsError::TreeInvariant(format!("hardlink target vanished: {}", target.display()))
                })?;
                let num = self.tree.get(target_idx).inode_number.unwrap();
                self.tree.get_mut(idx).inode_number = Some(num);
            }
        }
        Ok(next - 1)
    }

    /// Every distinct uid/gid across the tree, in first-seen order.
    fn build_id_table(&self) -> Vec<Id> {
        let mut ids: Vec<Id> = Vec::new();
        let mut push_unique = |num: u32, ids: &mut Vec<Id>| {
            if !ids.iter().any(|i| i.num == num) {
                ids.push(Id::new(num));
            }
        };
        for idx in self.tree.iter_indices() {
            let header = self.tree.get(idx).header;
            push_unique(header.uid, &mut ids);
            push_unique(header.gid, &mut ids);
        }
        if ids.is_empty() {
            ids.push(Id::new(0));
        }
        ids
    }

    #[instrument(skip_all)]
    fn write_file_data<W: Write + Seek>(
        &mut self,
        out: &mut W,
        data_writer: &mut DataWriter,
    ) -> Result<(), MkfsError> {
        for idx in self.tree.iter_indices() {
            let is_unread_file = matches!(self.tree.get(idx).inner, InnerNode::File(SquashfsFileWriter::Unread(_)));
            if !is_unread_file {
                continue;
            }
            let node = self.tree.get_mut(idx);
            let InnerNode::File(file) = &mut node.inner else { unreachable!() };
            let SquashfsFileWriter::Unread(reader) =
                std::mem::replace(file, SquashfsFileWriter::Consumed { size: 0, added: Added::Fragment { frag_index: 0, block_offset: 0 } })
            else {
                unreachable!()
            };
            let (size, added) = data_writer.add_bytes(reader, out)?;
            *file = SquashfsFileWriter::Consumed { size, added };
        }
        Ok(())
    }

    /// Build the inode + dir-entry for every non-directory, non-hardlink
    /// node. Independent of traversal order, so a single forward pass over
    /// the whole arena suffices.
    fn write_leaf_entries(
        &self,
        inode_writer: &mut MetadataWriter,
        id_table: &[Id],
        xattr_index_of: &HashMap<usize, u32>,
        block_log: u16,
    ) -> Result<HashMap<usize, ResolvedEntry>, MkfsError> {
        let mut resolved = HashMap::new();

        for idx in self.tree.iter_indices() {
            let node = self.tree.get(idx);
            let xattr_index = xattr_index_of.get(&idx).copied().unwrap_or(NOT_SET as u32);
            let name = node.file_name();
            let inode = node.inode_number.expect("inode numbers assigned before entry construction");

            let entry = match &node.inner {
                InnerNode::File(SquashfsFileWriter::Consumed { size, added }) => Entry::file(
                    name,
                    node.header,
                    inode,
                    inode_writer,
                    *size,
                    added,
                    self.block_size,
                    block_log,
                    id_table,
                    xattr_index,
                )?,
                InnerNode::File(SquashfsFileWriter::Unread(_)) => return Err(MkfsError::Unreachable),
                InnerNode::Symlink(symlink) => {
                    Entry::symlink(name, node.header, symlink, inode, inode_writer, self.block_size, block_log, id_table)?
                },
                InnerNode::CharacterDevice(dev) => Entry::char_device(
                    name,
                    node.header,
                    dev,
                    inode,
                    inode_writer,
                    self.block_size,
                    block_log,
                    id_table,
                )?,
                InnerNode::BlockDevice(dev) => Entry::block_device(
                    name,
                    node.header,
                    dev,
                    inode,
                    inode_writer,
                    self.block_size,
                    block_log,
                    id_table,
                )?,
                InnerNode::Fifo => {
                    Entry::fifo(name, node.header, inode, inode_writer, self.block_size, block_log, id_table)?
                },
                InnerNode::Socket => {
                    Entry::socket(name, node.header, inode, inode_writer, self.block_size, block_log, id_table)?
                },
                InnerNode::Dir | InnerNode::HardLink { .. } => continue,
            };

            resolved.insert(idx, ResolvedEntry::from_entry(&entry));
        }

        Ok(resolved)
    }

    fn resolve_hardlinks(&self, resolved: &mut HashMap<usize, ResolvedEntry>) -> Result<(), MkfsError> {
        for idx in self.tree.iter_indices() {
            if let InnerNode::HardLink { target } = &self.tree.get(idx).inner {
                let target_idx = self.tree.index_of(target).ok_or_else(|| {
                    MkfsError::TreeInvariant(format!("hardlink target vanished: {}", target.display()))
                })?;
                let mut entry = resolved
                    .get(&target_idx)
                    .ok_or_else(|| MkfsError::TreeInvariant("hardlink target not yet resolved".into()))?
                    .clone();
                entry.name = self.tree.get(idx).file_name().as_encoded_bytes().to_vec();
                resolved.insert(idx, entry);
            }
        }
        Ok(())
    }

    /// Walk every directory bottom-up (descendants always have a strictly
    /// greater arena index than their ancestor, so a descending scan visits
    /// children before parents) building each directory's listing and inode.
    fn write_directories(
        &self,
        dir_writer: &mut MetadataWriter,
        inode_writer: &mut MetadataWriter,
        id_table: &[Id],
        xattr_index_of: &HashMap<usize, u32>,
        resolved: &mut HashMap<usize, ResolvedEntry>,
        block_log: u16,
    ) -> Result<(), MkfsError> {
        for idx in (0..self.tree.len()).rev() {
            if !matches!(self.tree.get(idx).inner, InnerNode::Dir) {
                continue;
            }

            let children = self.tree.children_of(idx);
            let mut temp_entries = Vec::with_capacity(children.len());
            for &child in &children {
                let r = resolved
                    .get(&child)
                    .ok_or_else(|| MkfsError::TreeInvariant("directory child not yet resolved".into()))?;
                temp_entries.push(Entry {
                    start: r.start,
                    offset: r.offset,
                    inode: r.inode,
                    t: r.t,
                    name_size: (r.name.len() as u16).wrapping_sub(1),
                    name: &r.name,
                });
            }

            let dirs = Entry::into_dir(temp_entries)?;
            let (block_index, block_offset) = dir_writer.cursor();

            let mut total_size = 0usize;
            for dir in &dirs {
                let bytes = dir.to_bytes().map_err(MkfsError::Deku)?;
                dir_writer.write_all(&bytes)?;
                total_size += bytes.len();
            }

            let node = self.tree.get(idx);
            let parent_idx = if idx == 0 {
                0
            } else {
                let parent_path = node.fullpath.parent().unwrap();
                self.tree.index_of(parent_path).ok_or_else(|| {
                    MkfsError::TreeInvariant(format!("parent of {} missing", node.fullpath.display()))
                })?
            };
            let parent_inode = self.tree.get(parent_idx).inode_number.unwrap();
            let xattr_index = xattr_index_of.get(&idx).copied().unwrap_or(NOT_SET as u32);

            let entry = Entry::path(
                node.file_name(),
                node.header,
                node.inode_number.unwrap(),
                children.len(),
                parent_inode,
                inode_writer,
                total_size,
                block_offset,
                block_index,
                self.block_size,
                block_log,
                id_table,
                xattr_index,
            )?;
            resolved.insert(idx, ResolvedEntry::from_entry(&entry));
        }

        Ok(())
    }

    /// Assemble and write the complete image to `out`, returning the
    /// populated super block and the total bytes written (including padding).
    #[instrument(skip_all)]
    pub fn write<W: Write + Seek>(&mut self, out: &mut W) -> Result<(SuperBlock, u64), MkfsError> {
        let block_log = block_log(self.block_size);

        out.write_all(&[0u8; 96])?;

        let inode_count = self.assign_inode_numbers()?;
        let id_table = self.build_id_table();

        let mut xattr_writer = XattrWriter::new(MetadataWriter::new(self.compressor, self.block_size));
        let mut xattr_index_of = HashMap::new();
        for idx in self.tree.iter_indices() {
            let xattrs = &self.tree.get(idx).xattrs;
            if !xattrs.is_empty() {
                xattr_index_of.insert(idx, xattr_writer.add(xattrs)?);
            }
        }
        let xattrs_present = !xattr_index_of.is_empty();

        info!("writing file data");
        let data_start = out.stream_position()?;
        let mut data_writer =
            DataWriter::new(self.compressor, self.block_size, self.num_jobs, self.queue_backlog, data_start);
        self.write_file_data(out, &mut data_writer)?;
        let (fragment_table, _data_end) = data_writer.finalize(out)?;

        let mut inode_writer = MetadataWriter::new(self.compressor, self.block_size);
        let mut dir_writer = MetadataWriter::new(self.compressor, self.block_size);

        info!("writing inodes for files, symlinks and devices");
        let mut resolved = self.write_leaf_entries(&mut inode_writer, &id_table, &xattr_index_of, block_log)?;
        self.resolve_hardlinks(&mut resolved)?;

        info!("writing directories");
        self.write_directories(&mut dir_writer, &mut inode_writer, &id_table, &xattr_index_of, &mut resolved, block_log)?;

        let root = resolved.get(&0).expect("root always resolved");

        let mut superblock = SuperBlock::new(self.compressor.id);
        superblock.root_inode = (u64::from(root.start) << 16) | u64::from(root.offset);
        superblock.inode_count = inode_count;
        superblock.block_size = self.block_size;
        superblock.block_log = block_log;
        superblock.mod_time = self.mod_time;

        if self.compressor.options.is_some() {
            superblock.set_flag(Flags::CompressorOptionsArePresent, true);
        }

        info!("writing inode table");
        superblock.inode_table = out.stream_position()?;
        inode_writer.finalize(out)?;

        info!("writing directory table");
        superblock.dir_table = out.stream_position()?;
        dir_writer.finalize(out)?;

        if fragment_table.is_empty() {
            superblock.set_flag(Flags::FragmentsAreNotUsed, true);
        } else {
            self.write_fragment_table(out, &fragment_table, &mut superblock)?;
        }

        self.write_id_table(out, &id_table, &mut superblock)?;

        if xattrs_present {
            self.write_xattr_table(out, xattr_writer, &mut superblock)?;
        } else {
            superblock.set_flag(Flags::NoXattrsInArchive, true);
        }

        if self.exportable {
            self.write_export_table(out, &resolved, inode_count, &mut superblock)?;
        }

        superblock.set_flag(Flags::DataHasBeenDeduplicated, true);

        info!("finalizing image");
        let bytes_written = self.finalize(out, &mut superblock)?;

        Ok((superblock, bytes_written))
    }

    /// Chunk a side table's pre-serialized records into metadata blocks (always
    /// stored uncompressed, per the on-disk convention for these lookup
    /// tables), then write an array of `u64` pointers to each block. The super
    /// block field for a table points at this pointer array, not at the
    /// records themselves — a reader walks the pointer array to find each
    /// metadata block in turn.
    fn write_lookup_table<W: Write + Seek>(
        &self,
        out: &mut W,
        table_bytes: &[u8],
        element_size: usize,
    ) -> Result<u64, MkfsError> {
        let mut ptrs: Vec<u64> = Vec::new();
        let mut chunk = Vec::with_capacity(METADATA_MAXSIZE);

        let mut offset = 0;
        while offset < table_bytes.len() {
            chunk.extend_from_slice(&table_bytes[offset..offset + element_size]);
            offset += element_size;

            let is_last = offset >= table_bytes.len();
            if chunk.len() + element_size > METADATA_MAXSIZE || is_last {
                ptrs.push(out.stream_position()?);
                let len = crate::metadata::set_if_uncompressed(chunk.len() as u16);
                out.write_all(&len.to_le_bytes())?;
                out.write_all(&chunk)?;
                chunk.clear();
            }
        }

        let table_position = out.stream_position()?;
        for ptr in ptrs {
            out.write_all(&ptr.to_le_bytes())?;
        }

        Ok(table_position)
    }

    fn write_fragment_table<W: Write + Seek>(
        &self,
        out: &mut W,
        fragment_table: &[Fragment],
        superblock: &mut SuperBlock,
    ) -> Result<(), MkfsError> {
        let mut bytes = Vec::with_capacity(fragment_table.len() * FRAGMENT_SIZE);
        for f in fragment_table {
            bytes.extend_from_slice(&f.to_bytes().map_err(MkfsError::Deku)?);
        }

        superblock.frag_table = self.write_lookup_table(out, &bytes, FRAGMENT_SIZE)?;
        superblock.frag_count = fragment_table.len() as u32;
        Ok(())
    }

    fn write_id_table<W: Write + Seek>(
        &self,
        out: &mut W,
        id_table: &[Id],
        superblock: &mut SuperBlock,
    ) -> Result<(), MkfsError> {
        let mut bytes = Vec::with_capacity(id_table.len() * Id::SIZE);
        for id in id_table {
            bytes.extend_from_slice(&id.num.to_le_bytes());
        }

        superblock.id_table = self.write_lookup_table(out, &bytes, Id::SIZE)?;
        superblock.id_count = id_table.len() as u16;
        Ok(())
    }

    fn write_xattr_table<W: Write + Seek>(
        &self,
        out: &mut W,
        xattr_writer: XattrWriter,
        superblock: &mut SuperBlock,
    ) -> Result<(), MkfsError> {
        let kv_start = out.stream_position()?;
        let (_ids_start, id_count) = xattr_writer.finalize(out)?;

        superblock.xattr_table = out.stream_position()?;
        out.write_all(&kv_start.to_le_bytes())?;
        out.write_all(&id_count.to_le_bytes())?;
        out.write_all(&0u32.to_le_bytes())?; // unused
        Ok(())
    }

    fn write_export_table<W: Write + Seek>(
        &self,
        out: &mut W,
        resolved: &HashMap<usize, ResolvedEntry>,
        inode_count: u32,
        superblock: &mut SuperBlock,
    ) -> Result<(), MkfsError> {
        let mut by_inode: HashMap<u32, u64> = HashMap::new();
        for entry in resolved.values() {
            by_inode.insert(entry.inode, (u64::from(entry.start) << 16) | u64::from(entry.offset));
        }

        const EXPORT_SIZE: usize = std::mem::size_of::<u64>();
        let mut bytes = Vec::with_capacity(inode_count as usize * EXPORT_SIZE);
        for inode_num in 1..=inode_count {
            let loc = by_inode.get(&inode_num).copied().unwrap_or(NOT_SET);
            let export = crate::export::Export { num: loc };
            bytes.extend_from_slice(&export.to_bytes().map_err(MkfsError::Deku)?);
        }

        superblock.export_table = self.write_lookup_table(out, &bytes, EXPORT_SIZE)?;
        superblock.set_flag(Flags::NFSExportTableExists, true);
        Ok(())
    }

    fn finalize<W: Write + Seek>(&self, out: &mut W, superblock: &mut SuperBlock) -> Result<u64, MkfsError> {
        superblock.bytes_used = out.stream_position()?;

        let mut pad_len = 0u32;
        if self.pad_len != 0 {
            let blocks_used = superblock.bytes_used as u32 / self.pad_len;
            let total_pad_len = (blocks_used + 1) * self.pad_len;
            pad_len = total_pad_len - superblock.bytes_used as u32;

            let mut written = 0u32;
            let chunk = [0u8; 1024];
            while written < pad_len {
                let n = (pad_len - written).min(1024);
                out.write_all(&chunk[..n as usize])?;
                written += n;
            }
        }

        out.rewind()?;
        out.write_all(&superblock.to_bytes().map_err(MkfsError::Deku)?)?;
        trace!("wrote super block");

        Ok(superblock.bytes_used + u64::from(pad_len))
    }
}

#[derive(Clone)]
struct ResolvedEntry {
    start: u32,
    offset: u16,
    inode: u32,
    t: InodeId,
    name: Vec<u8>,
}

impl ResolvedEntry {
    fn from_entry(e: &Entry<'_>) -> Self {
        Self { start: e.start, offset: e.offset, inode: e.inode, t: e.t, name: e.name.to_vec() }
    }
}

/// All compression options for [`FilesystemWriter`]
#[derive(Debug, Copy, Clone, Default)]
pub struct FilesystemCompressor {
    pub(crate) id: Compressor,
    pub(crate) options: Option<CompressionOptions>,
    pub(crate) extra: Option<CompressionExtra>,
}

impl FilesystemCompressor {
    pub fn new(id: Compressor, options: Option<CompressionOptions>) -> Result<Self, MkfsError> {
        let ok = match (id, options) {
            (Compressor::None, None) => true,
            (Compressor::Gzip, None | Some(CompressionOptions::Gzip(_))) => true,
            (Compressor::Lzma, None | Some(CompressionOptions::Lzma)) => true,
            (Compressor::Lzo, None | Some(CompressionOptions::Lzo(_))) => true,
            (Compressor::Xz, None | Some(CompressionOptions::Xz(_))) => true,
            (Compressor::Lz4, None | Some(CompressionOptions::Lz4(_))) => true,
            (Compressor::Zstd, None | Some(CompressionOptions::Zstd(_))) => true,
            _ => false,
        };

        if !ok {
            return Err(MkfsError::InvalidCompressionOption);
        }

        Ok(Self { id, options, extra: None })
    }

    /// Options that are not stored in the image but used only while compressing.
    pub fn extra(&mut self, extra: CompressionExtra) -> Result<(), MkfsError> {
        if matches!(extra, CompressionExtra::Xz(_)) && matches!(self.id, Compressor::Xz) {
            self.extra = Some(extra);
            return Ok(());
        }
        Err(MkfsError::InvalidCompressionOption)
    }
}

/// Compression options only used during compression, never stored on disk.
#[derive(Debug, Copy, Clone)]
pub enum CompressionExtra {
    Xz(ExtraXz),
}

#[derive(Debug, Copy, Clone, Default)]
pub struct ExtraXz {
    pub(crate) level: Option<u32>,
}

impl ExtraXz {
    /// Set compression preset level. Must be in range `0..=9`.
    pub fn level(&mut self, level: u32) -> Result<(), MkfsError> {
        if level > 9 {
            return Err(MkfsError::InvalidCompressionOption);
        }
        self.level = Some(level);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn hdr() -> NodeHeader {
        NodeHeader::new(0o755, 0, 0, 0)
    }

    #[test]
    fn test_write_empty_tree_produces_superblock() {
        let mut fw = FilesystemWriter::new(hdr());
        let mut out = Cursor::new(Vec::new());
        let (sb, written) = fw.write(&mut out).unwrap();
        assert_eq!(sb.magic, *b"hsqs");
        assert!(written >= 96);
    }

    #[test]
    fn test_write_single_file() {
        let mut fw = FilesystemWriter::new(hdr());
        fw.push_file(Path::new("/hello.txt"), hdr(), Box::new(Cursor::new(b"hi".to_vec()))).unwrap();
        let mut out = Cursor::new(Vec::new());
        let (sb, _) = fw.write(&mut out).unwrap();
        assert_eq!(sb.inode_count, 2); // root + file
    }

    #[test]
    fn test_hardlinked_file_shares_inode_count() {
        let mut fw = FilesystemWriter::new(hdr());
        fw.push_file(Path::new("/a.txt"), hdr(), Box::new(Cursor::new(b"hi".to_vec()))).unwrap();
        fw.push_hardlink(Path::new("/b.txt"), hdr(), Path::new("/a.txt")).unwrap();
        let mut out = Cursor::new(Vec::new());
        let (sb, _) = fw.write(&mut out).unwrap();
        assert_eq!(sb.inode_count, 2); // root + a.txt; b.txt shares a.txt's inode
    }
}
