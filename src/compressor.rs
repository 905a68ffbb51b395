//! Types of supported compression algorithms

use std::io::{Cursor, Read};

use deku::prelude::*;
#[cfg(feature = "gzip")]
use flate2::read::ZlibEncoder;
#[cfg(feature = "gzip")]
use flate2::Compression;
use tracing::instrument;
#[cfg(feature = "xz")]
use xz2::read::XzEncoder;
#[cfg(feature = "xz")]
use xz2::stream::{Check, Filters, LzmaOptions, MtStreamBuilder};

use crate::error::MkfsError;
use crate::filesystem::writer::{CompressionExtra, FilesystemCompressor};

#[derive(Copy, Clone, Debug, PartialEq, Eq, DekuRead, DekuWrite, Default)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
#[deku(type = "u16")]
#[rustfmt::skip]
pub enum Compressor {
    None = 0,
    Gzip = 1,
    Lzma = 2,
    Lzo =  3,
    #[default]
    Xz =   4,
    Lz4 =  5,
    Zstd = 6,
}

#[derive(Debug, DekuRead, DekuWrite, PartialEq, Eq, Clone, Copy)]
#[deku(
    endian = "endian",
    ctx = "endian: deku::ctx::Endian, compressor: Compressor"
)]
#[deku(id = "compressor")]
pub enum CompressionOptions {
    #[deku(id = "Compressor::Gzip")]
    Gzip(Gzip),

    #[deku(id = "Compressor::Lzo")]
    Lzo(Lzo),

    #[deku(id = "Compressor::Xz")]
    Xz(Xz),

    #[deku(id = "Compressor::Lz4")]
    Lz4(Lz4),

    #[deku(id = "Compressor::Zstd")]
    Zstd(Zstd),

    #[deku(id = "Compressor::Lzma")]
    Lzma,
}

#[derive(Debug, DekuRead, DekuWrite, PartialEq, Eq, Clone, Copy)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct Gzip {
    pub compression_level: u32,
    pub window_size: u16,
    // TODO: enum
    pub strategies: u16,
}

#[derive(Debug, DekuRead, DekuWrite, PartialEq, Eq, Clone, Copy)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct Lzo {
    // TODO: enum
    pub algorithm: u32,
    pub compression_level: u32,
}

#[derive(Debug, DekuRead, DekuWrite, PartialEq, Eq, Clone, Copy)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct Xz {
    pub dictionary_size: u32,
    pub filters: XzFilter,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
#[deku(type = "u32")]
#[rustfmt::skip]
pub enum XzFilter {
    X86      = 0x01,
    PowerPC  = 0x02,
    IA64     = 0x04,
    Arm      = 0x08,
    ArmThumb = 0x10,
    Sparc    = 0x20,
}

#[derive(Debug, DekuRead, DekuWrite, PartialEq, Eq, Clone, Copy)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct Lz4 {
    pub version: u32,
    // TODO: enum
    pub flags: u32,
}

#[derive(Debug, DekuRead, DekuWrite, PartialEq, Eq, Clone, Copy)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct Zstd {
    pub compression_level: u32,
}

/// Compress `bytes` with the codec and options recorded on `fc`.
///
/// This is the only place the block processor (C3) and the metadata writer (C5)
/// reach for a codec; both treat the result as opaque bytes to compare against
/// the uncompressed input for the smaller-wins rule.
#[instrument(skip_all)]
pub(crate) fn compress(
    bytes: &[u8],
    fc: FilesystemCompressor,
    block_size: u32,
) -> Result<Vec<u8>, MkfsError> {
    match (fc.id, fc.options, fc.extra) {
        (Compressor::None, None, _) => Ok(bytes.to_vec()),
        #[cfg(feature = "xz")]
        (Compressor::Xz, option @ (Some(CompressionOptions::Xz(_)) | None), extra) => {
            let dict_size = match option {
                None => block_size,
                Some(CompressionOptions::Xz(option)) => option.dictionary_size,
                Some(_) => unreachable!(),
            };
            let default_level = 6; // LZMA_DEFAULT
            let level = match extra {
                None => default_level,
                Some(CompressionExtra::Xz(xz)) => xz.level.unwrap_or(default_level),
            };
            let check = Check::Crc32;
            let mut opts = LzmaOptions::new_preset(level).unwrap();
            opts.dict_size(dict_size);

            let mut filters = Filters::new();
            if let Some(CompressionOptions::Xz(xz)) = option {
                match xz.filters {
                    XzFilter::X86 => filters.x86(),
                    XzFilter::PowerPC => filters.powerpc(),
                    XzFilter::IA64 => filters.ia64(),
                    XzFilter::Arm => filters.arm(),
                    XzFilter::ArmThumb => filters.arm_thumb(),
                    XzFilter::Sparc => filters.sparc(),
                };
            }
            filters.lzma2(&opts);

            let stream = MtStreamBuilder::new()
                .threads(2)
                .filters(filters)
                .check(check)
                .encoder()
                .unwrap();

            let mut encoder = XzEncoder::new_stream(Cursor::new(bytes), stream);
            let mut buf = vec![];
            encoder.read_to_end(&mut buf)?;
            Ok(buf)
        },
        #[cfg(feature = "gzip")]
        (Compressor::Gzip, option @ (Some(CompressionOptions::Gzip(_)) | None), _) => {
            let compression_level = match option {
                None => Compression::best(),
                Some(CompressionOptions::Gzip(option)) => {
                    Compression::new(option.compression_level)
                },
                Some(_) => unreachable!(),
            };

            // TODO: use window_size and strategies (current window size defaults to 15)
            let mut encoder = ZlibEncoder::new(Cursor::new(bytes), compression_level);
            let mut buf = vec![];
            encoder.read_to_end(&mut buf)?;
            Ok(buf)
        },
        #[cfg(feature = "lzo")]
        (Compressor::Lzo, _, _) => {
            let mut lzo = rust_lzo::LZOContext::new();
            let mut buf = vec![0; rust_lzo::worst_compress(bytes.len())];
            let error = lzo.compress(bytes, &mut buf);
            if error != rust_lzo::LZOError::OK {
                return Err(MkfsError::UnsupportedCompression(fc.id));
            }
            Ok(buf)
        },
        #[cfg(feature = "zstd")]
        (Compressor::Zstd, option @ (Some(CompressionOptions::Zstd(_)) | None), _) => {
            let compression_level = match option {
                None => 3,
                Some(CompressionOptions::Zstd(option)) => option.compression_level,
                Some(_) => unreachable!(),
            };
            let mut encoder = zstd::bulk::Compressor::new(compression_level as i32)?;
            let mut buf = vec![];
            encoder.compress_to_buffer(bytes, &mut buf)?;
            Ok(buf)
        },
        _ => Err(MkfsError::UnsupportedCompression(fc.id)),
    }
}
