// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! UF2 file format definitions, family tags, and the flash layout the
//! on-device loader expects.

use std::fmt;

use byteorder::LittleEndian;
use zerocopy::{AsBytes, FromBytes, U32};

/// Number of data bytes carried per UF2 block. The format reserves 476, but
/// flash is written in 256-byte pages and the loader assumes page-sized
/// blocks.
pub const UF2_PAYLOAD_SIZE: usize = 256;

/// Flag bit stating that the `family_id` field holds a family tag rather
/// than a file size.
pub const UF2_FLAG_FAMILY_ID_PRESENT: u32 = 0x00002000;

/// Start of XIP flash on both supported parts.
pub const FLASH_BASE: u32 = 0x1000_0000;

/// Flash reserved for the base firmware itself.
pub const FLASH_SIZE: u32 = 0x0008_0000;

/// Fixed flash offset at which the firmware looks for the wrapped payload.
pub const PAYLOAD_BASE: u32 = 0x1008_0000;

/// Flash available past [`PAYLOAD_BASE`] for the wrapped payload.
pub const PAYLOAD_REGION_SIZE: u32 = 0x0018_0000;

pub const RP2040_FAMILY_ID: u32 = 0xe48bff56;
pub const RP2350_FAMILY_ID: u32 = 0xe48bff59;

/// Target microcontroller family. Flashing tools refuse UF2 blocks whose
/// family tag does not match the connected device, so getting this wrong is
/// loud rather than dangerous.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Family {
    Rp2040,
    Rp2350,
}

impl Family {
    /// The 32-bit tag written at offset 28 of every block.
    pub const fn id(self) -> u32 {
        match self {
            Family::Rp2040 => RP2040_FAMILY_ID,
            Family::Rp2350 => RP2350_FAMILY_ID,
        }
    }

    /// Reverse lookup from a tag found in a file.
    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            RP2040_FAMILY_ID => Some(Family::Rp2040),
            RP2350_FAMILY_ID => Some(Family::Rp2350),
            _ => None,
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Family::Rp2040 => f.write_str("RP2040"),
            Family::Rp2350 => f.write_str("RP2350"),
        }
    }
}

#[derive(Clone, AsBytes, FromBytes)]
#[repr(C)]
pub struct Uf2Record {
    pub magic: [U32<LittleEndian>; 2],
    pub flags: U32<LittleEndian>,
    pub address: U32<LittleEndian>,
    pub length: U32<LittleEndian>,
    pub block_no: U32<LittleEndian>,
    pub total_blocks: U32<LittleEndian>,
    pub family_id: U32<LittleEndian>,

    pub data: [u8; 476],

    pub final_magic: U32<LittleEndian>,
}

impl Uf2Record {
    pub const MAGIC: [u32; 2] = [0x0A324655, 0x9E5D5157];
    pub const FINAL_MAGIC: u32 = 0x0AB16F30;

    /// A template block for a stream of `total_blocks` blocks tagged
    /// `family_id`. Everything that is the same across the stream is filled
    /// in; `address`, `length`, `block_no`, and `data` are per-block and
    /// must be overwritten before the record is serialized.
    pub fn prototype(total_blocks: u32, family_id: u32) -> Self {
        Self {
            magic: [
                U32::new(Uf2Record::MAGIC[0]),
                U32::new(Uf2Record::MAGIC[1]),
            ],
            flags: U32::new(UF2_FLAG_FAMILY_ID_PRESENT),
            total_blocks: U32::new(total_blocks),
            family_id: U32::new(family_id),

            final_magic: U32::new(Uf2Record::FINAL_MAGIC),

            // Per-block fields. All-ones, not zero: a block the encoder
            // forgot to fill jumps out in a hex dump.
            address: U32::new(!0),
            length: U32::new(!0),
            block_no: U32::new(!0),
            data: [0; 476],
        }
    }

    /// True when all three magic fields hold the expected values.
    pub fn magic_ok(&self) -> bool {
        self.magic[0].get() == Self::MAGIC[0]
            && self.magic[1].get() == Self::MAGIC[1]
            && self.final_magic.get() == Self::FINAL_MAGIC
    }
}
