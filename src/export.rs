//! NFS export table: one inode reference per inode number, in order.

use deku::prelude::*;

#[derive(Debug, Copy, Clone, DekuRead, DekuWrite, PartialEq, Eq)]
#[deku(endian = "little")]
pub struct Export {
    pub num: u64,
}
