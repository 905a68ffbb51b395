//! [`Id`] table: deduplicated 32-bit uid/gid values

use deku::prelude::*;

/// 32 bit user or group ID, stored in the id table and referenced from
/// [`crate::inode::InodeHeader`] by index rather than by value.
#[derive(Debug, Copy, Clone, DekuRead, DekuWrite, PartialEq, Eq)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
pub struct Id {
    pub num: u32,
}

impl Id {
    pub const SIZE: usize = (u32::BITS / 8) as usize;

    pub fn new(num: u32) -> Id {
        Id { num }
    }

    /// The id table always starts with an entry for uid/gid 0 (root).
    pub fn root() -> Vec<Id> {
        vec![Id { num: 0 }]
    }
}
