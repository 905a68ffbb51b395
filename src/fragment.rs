//! On-disk fragment table entry

use deku::prelude::*;

use crate::data::DataSize;

pub(crate) const FRAGMENT_SIZE: usize =
    std::mem::size_of::<u64>() + std::mem::size_of::<u32>() + std::mem::size_of::<u32>();

/// One entry in the fragment table: the location and compressed size of a
/// shared fragment block produced by the fragment packer (C4).
#[derive(Copy, Clone, Debug, PartialEq, Eq, DekuRead, DekuWrite)]
#[deku(endian = "little")]
pub struct Fragment {
    pub start: u64,
    pub size: DataSize,
    pub unused: u32,
}

impl Fragment {
    pub fn new(start: u64, size: DataSize, unused: u32) -> Self {
        Self {
            start,
            size,
            unused,
        }
    }
}
