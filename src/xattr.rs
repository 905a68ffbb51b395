//! Xattr writer (C7): deduplicated key/value pairs, spilled out-of-line when
//! a value exceeds 64KiB, referenced from inodes by id into the xattr id
//! table.

use std::collections::HashMap;
use std::io::{Seek, Write};

use deku::prelude::*;

use crate::metadata::MetadataWriter;
use crate::squashfs::NOT_SET;
use crate::MkfsError;

/// `(prefix_id, suffix)` — matches the on-disk xattr key namespace. Only the
/// three namespaces real filesystems hand us day to day are supported; ACLs
/// are a distinct inode-level feature this writer does not emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XattrPrefix {
    User,
    Trusted,
    Security,
}

impl XattrPrefix {
    fn id(self) -> u16 {
        match self {
            Self::User => 0,
            Self::Trusted => 1,
            Self::Security => 2,
        }
    }

    /// Parse a `user.`/`trusted.`/`security.`-prefixed attribute name,
    /// returning the namespace and the bare suffix.
    pub fn split(full_name: &str) -> Result<(Self, &str), MkfsError> {
        if let Some(suffix) = full_name.strip_prefix("user.") {
            Ok((Self::User, suffix))
        } else if let Some(suffix) = full_name.strip_prefix("trusted.") {
            Ok((Self::Trusted, suffix))
        } else if let Some(suffix) = full_name.strip_prefix("security.") {
            Ok((Self::Security, suffix))
        } else {
            Err(MkfsError::TreeInvariant(format!(
                "unsupported xattr namespace in {full_name:?}"
            )))
        }
    }
}

/// out-of-line flag, set on the value-type field when the value is stored
/// as a 64-bit location reference rather than being inline
const XATTR_PREFIX_OOL: u16 = 0x100;

#[derive(Debug, DekuWrite)]
#[deku(endian = "little")]
struct OnDiskKey {
    /// namespace id ([`XattrPrefix::id`]), OR'd with [`XATTR_PREFIX_OOL`] when
    /// the value that follows is an out-of-line reference rather than inline
    /// bytes
    type_: u16,
    suffix_size: u16,
    #[deku(count = "suffix_size")]
    suffix: Vec<u8>,
}

#[derive(Debug, DekuWrite)]
#[deku(endian = "little")]
struct OnDiskValue {
    size: u32,
    #[deku(count = "size")]
    bytes: Vec<u8>,
}

#[derive(Debug, DekuWrite)]
#[deku(endian = "little")]
struct OnDiskOolValue {
    #[deku(assert_eq = "8")]
    size: u32,
    ref_: u64,
}

/// One requested attribute, keyed by (prefix, suffix), with its raw value.
#[derive(Debug, Clone)]
pub struct XattrEntry {
    pub prefix: XattrPrefix,
    pub suffix: String,
    pub value: Vec<u8>,
}

#[derive(Debug, DekuWrite, Clone, Copy)]
#[deku(endian = "little")]
pub struct XattrIdEntry {
    pub xattr: u64,
    pub count: u32,
    pub size: u32,
}

const OOL_VALUE_LIMIT: usize = u16::MAX as usize;

pub(crate) struct XattrWriter {
    kv_writer: MetadataWriter,
    /// dedup of an ordered list of (prefix,suffix,value) by its serialized
    /// key-value bytes -> xattr id
    seen: HashMap<Vec<u8>, u32>,
    ids: Vec<XattrIdEntry>,
}

impl XattrWriter {
    pub fn new(kv_writer: MetadataWriter) -> Self {
        Self { kv_writer, seen: HashMap::new(), ids: vec![] }
    }

    /// Write a node's full xattr set, returning the xattr id to store in its
    /// inode, or `NOT_SET` (0xffff_ffff) if the node has no xattrs.
    pub fn add(&mut self, entries: &[XattrEntry]) -> Result<u32, MkfsError> {
        if entries.is_empty() {
            return Ok(NOT_SET as u32);
        }

        let dedup_key = Self::dedup_key(entries);
        if let Some(id) = self.seen.get(&dedup_key) {
            return Ok(*id);
        }

        let (start, offset) = self.kv_writer.cursor();
        let location = (u64::from(start) << 16) | u64::from(offset);
        let mut size = 0u32;

        for e in entries {
            size += self.write_pair(e)?;
        }

        let id = self.ids.len() as u32;
        self.ids.push(XattrIdEntry { xattr: location, count: entries.len() as u32, size });
        self.seen.insert(dedup_key, id);
        Ok(id)
    }

    fn dedup_key(entries: &[XattrEntry]) -> Vec<u8> {
        let mut buf = Vec::new();
        for e in entries {
            buf.push(e.prefix.id() as u8);
            buf.extend_from_slice(e.suffix.as_bytes());
            buf.push(0);
            buf.extend_from_slice(&(e.value.len() as u32).to_le_bytes());
            buf.extend_from_slice(&e.value);
        }
        buf
    }

    fn write_pair(&mut self, e: &XattrEntry) -> Result<u32, MkfsError> {
        let is_ool = e.value.len() > OOL_VALUE_LIMIT;
        let type_ = e.prefix.id() | if is_ool { XATTR_PREFIX_OOL } else { 0 };

        let key = OnDiskKey {
            type_,
            suffix_size: e.suffix.len() as u16,
            suffix: e.suffix.clone().into_bytes(),
        };
        let key_bytes = key.to_bytes().map_err(MkfsError::Deku)?;
        let mut written = key_bytes.len() as u32;
        self.kv_writer.write_all(&key_bytes)?;

        if is_ool {
            let (start, offset) = self.kv_writer.cursor();
            let ool_ref = (u64::from(start) << 16) | u64::from(offset);
            // The real value lands at its own cursor position, prefixed by
            // its true length, then the id-table entry for this attribute
            // carries an 8-byte reference to it instead of inline bytes.
            let real = OnDiskValue { size: e.value.len() as u32, bytes: e.value.clone() };
            let real_bytes = real.to_bytes().map_err(MkfsError::Deku)?;
            self.kv_writer.write_all(&real_bytes)?;

            let ool = OnDiskOolValue { size: 8, ref_: ool_ref };
            let ool_bytes = ool.to_bytes().map_err(MkfsError::Deku)?;
            written += ool_bytes.len() as u32 + real_bytes.len() as u32;
            self.kv_writer.write_all(&ool_bytes)?;
        } else {
            let value = OnDiskValue { size: e.value.len() as u32, bytes: e.value.clone() };
            let value_bytes = value.to_bytes().map_err(MkfsError::Deku)?;
            written += value_bytes.len() as u32;
            self.kv_writer.write_all(&value_bytes)?;
        }

        Ok(written)
    }

    /// Flush the key-value stream and the id-descriptor table, returning the
    /// byte offset of the id table (what the super block's `xattr_table`
    /// field points at) and the number of distinct xattr-id entries.
    pub fn finalize<W: Write + Seek>(mut self, out: &mut W) -> Result<(u64, u32), MkfsError> {
        self.kv_writer.finalize(out)?;

        let table_start = out.stream_position()?;
        for id in &self.ids {
            out.write_all(&id.to_bytes().map_err(MkfsError::Deku)?)?;
        }

        Ok((table_start, self.ids.len() as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compressor::Compressor;
    use crate::filesystem::writer::FilesystemCompressor;

    fn writer() -> XattrWriter {
        let compressor = FilesystemCompressor::new(Compressor::Xz, None).unwrap();
        XattrWriter::new(MetadataWriter::new(compressor, 0x20000))
    }

    #[test]
    fn test_empty_entries_returns_not_set() {
        let mut w = writer();
        assert_eq!(w.add(&[]).unwrap(), NOT_SET as u32);
    }

    #[test]
    fn test_dedup_returns_same_id() {
        let mut w = writer();
        let entries = vec![XattrEntry {
            prefix: XattrPrefix::User,
            suffix: "comment".into(),
            value: b"hello".to_vec(),
        }];
        let a = w.add(&entries).unwrap();
        let b = w.add(&entries).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_entries_get_distinct_ids() {
        let mut w = writer();
        let a = w
            .add(&[XattrEntry { prefix: XattrPrefix::User, suffix: "a".into(), value: b"1".to_vec() }])
            .unwrap();
        let b = w
            .add(&[XattrEntry { prefix: XattrPrefix::User, suffix: "a".into(), value: b"2".to_vec() }])
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_split_prefix() {
        let (p, s) = XattrPrefix::split("user.foo").unwrap();
        assert!(matches!(p, XattrPrefix::User));
        assert_eq!(s, "foo");
        assert!(XattrPrefix::split("acl.weird").is_err());
    }
}
