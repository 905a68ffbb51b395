//! Chained, length-prefixed metadata block writer (C5)
//!
//! Inodes and directory entries are not written directly to the image: they are
//! appended to a [`MetadataWriter`], which packs them into a chain of blocks of
//! at most [`METADATA_MAXSIZE`] uncompressed bytes each. Callers need the
//! *eventual* `(block_start, offset_in_block)` of the bytes they are about to
//! append before those bytes are actually flushed — see [`MetadataWriter::cursor`].

use std::collections::VecDeque;
use std::io::{self, Seek, Write};

use deku::bitvec::BitVec;
use deku::prelude::*;
use tracing::{instrument, trace};

use crate::error::MkfsError;
use crate::filesystem::writer::FilesystemCompressor;

/// Maximum number of uncompressed bytes per metadata block.
pub const METADATA_MAXSIZE: usize = 0x2000;

const METADATA_UNCOMPRESSED: u16 = 1 << 15;

pub(crate) struct MetadataWriter {
    compressor: FilesystemCompressor,
    block_size: u32,
    /// Offset from the beginning of the metadata stream of the block currently
    /// being filled; this is the `block_start` half of [`Self::cursor`].
    pub(crate) metadata_start: u32,
    /// Bytes appended so far that have not yet been packed into a block.
    pub(crate) uncompressed_bytes: VecDeque<u8>,
    /// Finished blocks, `(is_compressed, bytes)`, awaiting [`Self::finalize`].
    pub(crate) final_bytes: Vec<(bool, Vec<u8>)>,
}

impl MetadataWriter {
    #[instrument(skip_all)]
    pub fn new(compressor: FilesystemCompressor, block_size: u32) -> Self {
        Self {
            compressor,
            block_size,
            metadata_start: 0,
            uncompressed_bytes: VecDeque::new(),
            final_bytes: vec![],
        }
    }

    /// The position of the next byte that will be written by a call to
    /// [`Write::write`] right now, expressed as a block reference.
    pub fn cursor(&self) -> (u32, u16) {
        (self.metadata_start, self.uncompressed_bytes.len() as u16)
    }

    #[instrument(skip_all)]
    fn add_block(&mut self) -> Result<(), MkfsError> {
        let uncompressed_len = self.uncompressed_bytes.len().min(METADATA_MAXSIZE);
        if uncompressed_len == 0 {
            return Ok(());
        }

        if self.uncompressed_bytes.as_slices().0.len() < uncompressed_len {
            self.uncompressed_bytes.make_contiguous();
        }
        let uncompressed = &self.uncompressed_bytes.as_slices().0[0..uncompressed_len];

        trace!("compressing metadata block of {} bytes", uncompressed_len);
        let compressed =
            crate::compressor::compress(uncompressed, self.compressor, self.block_size)?;

        // a block that doesn't compress smaller is stored uncompressed instead
        let (is_compressed, metadata) = if compressed.len() >= uncompressed_len {
            let uncompressed = self.uncompressed_bytes.drain(0..uncompressed_len).collect();
            (false, uncompressed)
        } else {
            self.uncompressed_bytes.drain(0..uncompressed_len);
            (true, compressed)
        };

        self.metadata_start += 2 + metadata.len() as u32;
        trace!("new metadata_start: {:#x}", self.metadata_start);
        self.final_bytes.push((is_compressed, metadata));

        Ok(())
    }

    #[instrument(skip_all)]
    pub fn finalize<W: Write + Seek>(&mut self, out: &mut W) -> Result<(), MkfsError> {
        while !self.uncompressed_bytes.is_empty() {
            self.add_block()?;
        }

        for (is_compressed, block) in &self.final_bytes {
            let mut bv = BitVec::new();
            let len = block.len() as u16
                | if *is_compressed {
                    0
                } else {
                    METADATA_UNCOMPRESSED
                };
            len.write(&mut bv, deku::ctx::Endian::Little)?;
            out.write_all(bv.as_raw_slice())?;
            out.write_all(block)?;
        }

        Ok(())
    }
}

impl Write for MetadataWriter {
    #[instrument(skip_all)]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.uncompressed_bytes.write_all(buf)?;

        while self.uncompressed_bytes.len() >= METADATA_MAXSIZE {
            self.add_block().map_err(io::Error::from)?;
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Check the `is_compressed` bit within a raw metadata-block length header.
pub fn is_compressed(len: u16) -> bool {
    len & METADATA_UNCOMPRESSED == 0
}

/// Strip the `is_compressed` bit, yielding the actual byte length that follows.
pub fn len(len: u16) -> u16 {
    len & !(METADATA_UNCOMPRESSED)
}

/// Set the uncompressed bit on a raw metadata-block length header.
pub fn set_if_uncompressed(len: u16) -> u16 {
    len | METADATA_UNCOMPRESSED
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::compressor::Compressor;

    #[test]
    fn test_mwriter() {
        let bytes = [0xffu8; METADATA_MAXSIZE - 3];
        let fc = FilesystemCompressor::new(Compressor::Xz, None).unwrap();

        let mut mwriter = MetadataWriter::new(fc, 0x2000);

        mwriter.write_all(&bytes).unwrap();
        assert_eq!(0, mwriter.metadata_start);
        assert_eq!(bytes, &*mwriter.uncompressed_bytes);
        assert!(mwriter.final_bytes.is_empty());

        let bytes = [0x11u8; 6];
        mwriter.write_all(&bytes).unwrap();
        assert_eq!(0x6e, mwriter.metadata_start);
        assert_eq!(bytes[3..], mwriter.uncompressed_bytes);
        assert_eq!(mwriter.final_bytes[0].1.len(), 0x6c);
    }

    #[test]
    fn test_cursor_advances() {
        let fc = FilesystemCompressor::new(Compressor::Xz, None).unwrap();
        let mut mwriter = MetadataWriter::new(fc, 0x2000);
        assert_eq!(mwriter.cursor(), (0, 0));
        mwriter.write_all(&[1, 2, 3]).unwrap();
        assert_eq!(mwriter.cursor(), (0, 3));
    }
}
