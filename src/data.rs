//! File data writer: drives the block processor (C3) per-file and packs
//! sub-block tails into shared fragment blocks (C4).

use std::collections::HashMap;
use std::io::Read;

use deku::prelude::*;
use tracing::{instrument, trace};
use xxhash_rust::xxh64::xxh64;

use crate::block::{BlockKind, BlockProcessor};
use crate::error::MkfsError;
use crate::filesystem::writer::FilesystemCompressor;
use crate::fragment::Fragment;

/// bitflag for the data-size field in an inode signifying the block is
/// stored uncompressed
const DATA_STORED_UNCOMPRESSED: u32 = 1 << 24;

/// One entry of a file's block-sizes array: a compressed (or, if larger
/// than the original, raw) length plus the SPARSE/UNCOMPRESSED flags.
#[derive(Copy, Clone, Debug, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct DataSize(u32);

impl DataSize {
    #[inline]
    pub fn new(size: u32, uncompressed: bool) -> Self {
        assert!(size <= DATA_STORED_UNCOMPRESSED, "block size too big to encode");
        let mut value = size;
        if uncompressed {
            value |= DATA_STORED_UNCOMPRESSED;
        }
        Self(value)
    }

    #[inline]
    pub fn new_compressed(size: u32) -> Self {
        Self::new(size, false)
    }

    #[inline]
    pub fn new_uncompressed(size: u32) -> Self {
        Self::new(size, true)
    }

    /// A sparse (all-zero) block: zero size, stored as "uncompressed" per
    /// the on-disk convention (there is no separate SPARSE bit; a zero-size
    /// entry IS the sparse marker).
    #[inline]
    pub fn new_sparse() -> Self {
        Self(0)
    }

    #[inline]
    pub fn is_sparse(&self) -> bool {
        self.size() == 0
    }

    #[inline]
    pub fn uncompressed(&self) -> bool {
        self.0 & DATA_STORED_UNCOMPRESSED != 0
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.0 & !DATA_STORED_UNCOMPRESSED
    }
}

/// What a file's data ended up as: real data blocks, or a lone fragment tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Added {
    Data { blocks_start: u64, block_sizes: Vec<DataSize> },
    Fragment { frag_index: u32, block_offset: u32 },
}

/// Read `reader` in `block_size` chunks, treating a zero-length read before
/// EOF as expected as a fatal truncation rather than end-of-data (a partial
/// `read() == 0` mid-stream is never valid).
fn read_chunk(reader: &mut dyn Read, buf: &mut [u8]) -> Result<usize, MkfsError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(MkfsError::StdIo(e)),
        }
    }
    Ok(filled)
}

/// Orchestrates C3 (block processor) and C4 (fragment packer) for every
/// file's data, producing the data area of the image.
pub(crate) struct DataWriter {
    block_size: u32,
    processor: BlockProcessor,
    fragment_bytes: Vec<u8>,
    fragment_table: Vec<Fragment>,
    fragment_tail_dedup: HashMap<u64, (u32, u32)>,
    compressor: FilesystemCompressor,
}

impl DataWriter {
    #[instrument(skip_all)]
    pub fn new(
        compressor: FilesystemCompressor,
        block_size: u32,
        num_jobs: usize,
        queue_backlog: usize,
        data_start: u64,
    ) -> Self {
        Self {
            block_size,
            processor: BlockProcessor::new(num_jobs, queue_backlog, compressor, block_size, data_start),
            fragment_bytes: Vec::with_capacity(block_size as usize),
            fragment_table: Vec::new(),
            fragment_tail_dedup: HashMap::new(),
            compressor,
        }
    }

    /// Read `reader` to completion, submitting full blocks to the block
    /// processor and buffering the final short chunk (if any) into the
    /// current fragment block.
    #[instrument(skip_all)]
    pub(crate) fn add_bytes<W: std::io::Write>(
        &mut self,
        mut reader: impl Read,
        out: &mut W,
    ) -> Result<(usize, Added), MkfsError> {
        let mut buf = vec![0u8; self.block_size as usize];
        let mut file_len = 0usize;
        let mut block_sizes = Vec::new();
        let mut blocks_start = None;

        loop {
            let n = read_chunk(&mut reader, &mut buf)?;
            if n == 0 {
                break;
            }
            file_len += n;

            if n < self.block_size as usize {
                // short read: must be EOF (read_chunk only stops short at EOF)
                let (frag_index, block_offset) = self.buffer_tail(&buf[..n], out)?;
                return Ok((file_len, Added::Fragment { frag_index, block_offset }));
            }

            let emitted = self.processor.submit(buf[..n].to_vec(), BlockKind::Data, out)?;
            if blocks_start.is_none() {
                blocks_start = Some(emitted.offset);
            }
            block_sizes.push(if emitted.len == 0 {
                DataSize::new_sparse()
            } else {
                DataSize::new(emitted.len, !emitted.compressed)
            });
        }

        Ok((
            file_len,
            Added::Data { blocks_start: blocks_start.unwrap_or(0), block_sizes },
        ))
    }

    /// Buffer a sub-block tail into the current fragment, flushing the
    /// fragment first if the tail would overflow it. Identical tails are
    /// deduplicated to the same `(fragment_index, offset)`.
    fn buffer_tail<W: std::io::Write>(&mut self, tail: &[u8], out: &mut W) -> Result<(u32, u32), MkfsError> {
        let hash = xxh64(tail, 0);
        if let Some(&loc) = self.fragment_tail_dedup.get(&hash) {
            trace!("reusing existing fragment tail");
            return Ok(loc);
        }

        if tail.len() + self.fragment_bytes.len() > self.block_size as usize {
            self.flush_fragment(out)?;
        }

        let frag_index = self.fragment_table.len() as u32;
        let block_offset = self.fragment_bytes.len() as u32;
        self.fragment_bytes.extend_from_slice(tail);
        self.fragment_tail_dedup.insert(hash, (frag_index, block_offset));

        if self.fragment_bytes.len() == self.block_size as usize {
            self.flush_fragment(out)?;
        }

        Ok((frag_index, block_offset))
    }

    /// Submit the accumulated fragment buffer as a tagged fragment block.
    fn flush_fragment<W: std::io::Write>(&mut self, out: &mut W) -> Result<(), MkfsError> {
        if self.fragment_bytes.is_empty() {
            return Ok(());
        }
        let bytes = std::mem::replace(&mut self.fragment_bytes, Vec::with_capacity(self.block_size as usize));
        let len = bytes.len() as u32;
        let emitted = self.processor.submit(bytes, BlockKind::Fragment, out)?;
        self.fragment_table.push(Fragment::new(
            emitted.offset,
            if emitted.len == 0 { DataSize::new_sparse() } else { DataSize::new(emitted.len, !emitted.compressed) },
            0,
        ));
        trace!(len, "flushed fragment block");
        Ok(())
    }

    /// Flush any partial fragment and join the block processor, returning
    /// the fragment table and the total size of the data area.
    #[instrument(skip_all)]
    pub fn finalize<W: std::io::Write>(mut self, out: &mut W) -> Result<(Vec<Fragment>, u64), MkfsError> {
        self.flush_fragment(out)?;
        let data_end = self.processor.finish(out)?;
        Ok((self.fragment_table, data_end))
    }

    pub fn compressor(&self) -> FilesystemCompressor {
        self.compressor
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::compressor::Compressor;

    fn fc() -> FilesystemCompressor {
        FilesystemCompressor::new(Compressor::Xz, None).unwrap()
    }

    #[test]
    fn test_small_file_becomes_fragment() {
        let mut out = Cursor::new(Vec::new());
        let mut dw = DataWriter::new(fc(), 0x2000, 2, 20, 0);
        let (len, added) = dw.add_bytes(Cursor::new(b"helloworld".to_vec()), &mut out).unwrap();
        assert_eq!(len, 10);
        assert!(matches!(added, Added::Fragment { frag_index: 0, block_offset: 0 }));
    }

    #[test]
    fn test_exact_block_file_has_no_fragment() {
        let mut out = Cursor::new(Vec::new());
        let mut dw = DataWriter::new(fc(), 0x2000, 2, 20, 0);
        let data = vec![0xabu8; 0x2000];
        let (len, added) = dw.add_bytes(Cursor::new(data), &mut out).unwrap();
        assert_eq!(len, 0x2000);
        match added {
            Added::Data { block_sizes, .. } => assert_eq!(block_sizes.len(), 1),
            Added::Fragment { .. } => panic!("expected data block"),
        }
    }

    #[test]
    fn test_duplicate_tails_share_fragment_slot() {
        let mut out = Cursor::new(Vec::new());
        let mut dw = DataWriter::new(fc(), 0x2000, 2, 20, 0);
        let (_, a) = dw.add_bytes(Cursor::new(b"samecontent".to_vec()), &mut out).unwrap();
        let (_, b) = dw.add_bytes(Cursor::new(b"samecontent".to_vec()), &mut out).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_sparse_block_adds_no_data_bytes() {
        let mut out = Cursor::new(Vec::new());
        let mut dw = DataWriter::new(fc(), 0x2000, 2, 20, 0);
        let data = vec![0u8; 0x2000];
        let (_, added) = dw.add_bytes(Cursor::new(data), &mut out).unwrap();
        match added {
            Added::Data { block_sizes, .. } => assert!(block_sizes[0].is_sparse()),
            Added::Fragment { .. } => panic!("expected data block"),
        }
        let (_, data_end) = dw.finalize(&mut out).unwrap();
        assert_eq!(data_end, 0);
    }
}
