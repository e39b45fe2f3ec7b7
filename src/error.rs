// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error type shared by every stage of the image build.
//!
//! Each variant carries the observed values as structured fields so a caller
//! can render its own message; the `Display` impls here cite the offending
//! value in hex next to the expected bound.

/// Everything that can go wrong while turning a DOL and a base image into a
/// combined UF2. Variants are grouped by the stage that produces them:
/// `Dol*` from parsing/validation, `Wrap*` from the payload framing, `Uf2*`
/// from stream decoding, `Merge*` from image composition.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("DOL file is {got} bytes, shorter than the 256-byte header")]
    DolTooSmall { got: usize },

    #[error("DOL header is all zeroes (not a DOL file?)")]
    DolZeroHeader,

    #[error("DOL entry point is {got:#010x}, expected {expected:#010x}")]
    DolInvalidEntryPoint { got: u32, expected: u32 },

    #[error("first text section loads at {got:#010x}, expected {expected:#010x}")]
    DolInvalidLoadAddress { got: u32, expected: u32 },

    #[error(
        "DOL section {label} ({size:#x} bytes at file offset {offset:#x}) \
         runs past the end of the {file_size}-byte file"
    )]
    DolSectionOutOfBounds {
        label: &'static str,
        offset: u32,
        size: u32,
        file_size: usize,
    },

    #[error(
        "DOL sections {a_label} [{:#x}, {:#x}) and {b_label} [{:#x}, {:#x}) \
         overlap in the file",
        .a_range.0, .a_range.1, .b_range.0, .b_range.1
    )]
    DolSectionOverlap {
        a_label: &'static str,
        b_label: &'static str,
        a_range: (u64, u64),
        b_range: (u64, u64),
    },

    #[error("DOL file is {got} bytes, larger than the {max}-byte limit")]
    DolTooLarge { got: usize, max: usize },

    #[error("payload header magic is {got:02x?}, expected \"IPLBOOT \"")]
    WrapInvalidMagic { got: [u8; 8] },

    #[error("payload header is {got} bytes, expected 12")]
    WrapInvalidHeaderSize { got: usize },

    #[error("payload body does not end with \"PICO\" (found {got:02x?})")]
    WrapMissingPicoTrailer { got: [u8; 4] },

    #[error("payload header declares {declared} bytes, but the body holds {observed}")]
    WrapSizeMismatch { declared: u32, observed: u32 },

    #[error("UF2 image is {got} bytes, not a multiple of 512")]
    Uf2BadLength { got: usize },

    #[error("UF2 block {block_index} has bad magic")]
    Uf2BadMagic { block_index: usize },

    #[error("UF2 block claims {got} payload bytes, more than the 256-byte page")]
    Uf2BadBlockSize { got: u32 },

    #[error(
        "base image [{:#010x}, {:#010x}) overlaps payload [{:#010x}, {:#010x})",
        .base_range.0, .base_range.1, .payload_range.0, .payload_range.1
    )]
    MergeMemoryOverlap {
        base_range: (u64, u64),
        payload_range: (u64, u64),
    },

    #[error("base image starts at {base_start:#010x}, below the start of flash")]
    MergeBaseOutsideFlash { base_start: u64 },

    #[error(
        "payload starts at {payload_start:#010x}, before the base image ends \
         at {base_end:#010x}"
    )]
    MergePayloadBeforeBaseEnd { payload_start: u64, base_end: u64 },
}
