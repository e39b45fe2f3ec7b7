// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! UF2 streams: encoding a buffer into blocks, decoding a file back into
//! blocks, and merging a base image with a payload image.

use zerocopy::{AsBytes, LayoutVerified, U32};

use crate::error::Error;
use crate::format::{
    Family, Uf2Record, FLASH_BASE, RP2040_FAMILY_ID, UF2_PAYLOAD_SIZE,
};

/// An in-memory UF2 stream: a list of well-formed blocks. The file form is
/// the blocks serialized back to back, 512 bytes each.
pub struct Stream {
    blocks: Vec<Uf2Record>,
}

impl Stream {
    /// Decodes a UF2 file into blocks.
    ///
    /// Rejects a file whose length is not a multiple of 512, any block with
    /// a bad magic, and any block claiming more data than a flash page --
    /// the merger's layout arithmetic leans on block extents being honest.
    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() % 512 != 0 {
            return Err(Error::Uf2BadLength { got: bytes.len() });
        }

        let mut blocks = Vec::with_capacity(bytes.len() / 512);
        for (i, chunk) in bytes.chunks_exact(512).enumerate() {
            // Infallible: the record type is unaligned and chunks_exact
            // guarantees the size.
            let record = LayoutVerified::<_, Uf2Record>::new(chunk)
                .unwrap()
                .into_ref();

            if !record.magic_ok() {
                return Err(Error::Uf2BadMagic { block_index: i });
            }
            if record.length.get() as usize > UF2_PAYLOAD_SIZE {
                return Err(Error::Uf2BadBlockSize {
                    got: record.length.get(),
                });
            }

            blocks.push(record.clone());
        }

        Ok(Stream { blocks })
    }

    /// Encodes `data` into consecutive blocks starting at `base_addr`,
    /// tagged for `family`.
    ///
    /// Blocks are built from an RP2040-tagged prototype and re-tagged as a
    /// second pass; the tag lives at byte offset 28 of each block and is the
    /// only thing that differs between families.
    pub fn encode(data: &[u8], base_addr: u32, family: Family) -> Self {
        let chunks = data.chunks(UF2_PAYLOAD_SIZE);
        let block_count = chunks.len() as u32;
        let prototype = Uf2Record::prototype(block_count, RP2040_FAMILY_ID);

        let mut blocks = Vec::with_capacity(block_count as usize);
        for (i, chunk) in chunks.enumerate() {
            let mut record = Uf2Record {
                address: U32::new(
                    base_addr + (i * UF2_PAYLOAD_SIZE) as u32,
                ),
                length: U32::new(chunk.len() as u32),
                block_no: U32::new(i as u32),
                ..prototype
            };
            record.data[..chunk.len()].copy_from_slice(chunk);
            blocks.push(record);
        }

        let mut stream = Stream { blocks };
        stream.retag(family);
        stream
    }

    /// Overwrites the family tag of every block.
    pub fn retag(&mut self, family: Family) {
        for block in &mut self.blocks {
            block.family_id = U32::new(family.id());
        }
    }

    /// Appends `payload` after `base` and renumbers the result.
    ///
    /// The two images must occupy disjoint memory, the base must sit in
    /// flash, and the payload must start at or above the base's end. Every
    /// field other than `block_no` and `total_blocks` is carried over
    /// verbatim -- in particular the family tags, which are the caller's
    /// problem.
    pub fn merge(base: Stream, payload: Stream) -> Result<Stream, Error> {
        let base_range = base.memory_range();
        let payload_range = payload.memory_range();

        if let (Some(b), Some(p)) = (base_range, payload_range) {
            if b.0 < p.1 && p.0 < b.1 {
                return Err(Error::MergeMemoryOverlap {
                    base_range: b,
                    payload_range: p,
                });
            }
        }
        if let Some(b) = base_range {
            if b.0 < u64::from(FLASH_BASE) {
                return Err(Error::MergeBaseOutsideFlash { base_start: b.0 });
            }
        }
        if let (Some(b), Some(p)) = (base_range, payload_range) {
            if p.0 < b.1 {
                return Err(Error::MergePayloadBeforeBaseEnd {
                    payload_start: p.0,
                    base_end: b.1,
                });
            }
        }

        let mut blocks = base.blocks;
        blocks.extend(payload.blocks);

        let total = blocks.len() as u32;
        for (i, block) in blocks.iter_mut().enumerate() {
            block.block_no = U32::new(i as u32);
            block.total_blocks = U32::new(total);
        }

        Ok(Stream { blocks })
    }

    /// The half-open memory range `[lowest address, highest address + data
    /// length)` covered by this stream, or `None` for an empty stream.
    pub fn memory_range(&self) -> Option<(u64, u64)> {
        let start = self
            .blocks
            .iter()
            .map(|b| u64::from(b.address.get()))
            .min()?;
        let end = self
            .blocks
            .iter()
            .map(|b| u64::from(b.address.get()) + u64::from(b.length.get()))
            .max()?;
        Some((start, end))
    }

    /// The family tag shared by every block, or `None` if the stream is
    /// empty or mixes tags.
    pub fn family_id(&self) -> Option<u32> {
        let first = self.blocks.first()?.family_id.get();
        self.blocks
            .iter()
            .all(|b| b.family_id.get() == first)
            .then_some(first)
    }

    pub fn blocks(&self) -> &[Uf2Record] {
        &self.blocks
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Serializes the stream into its file form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.blocks.len() * 512);
        for block in &self.blocks {
            out.extend_from_slice(block.as_bytes());
        }
        out
    }
}
