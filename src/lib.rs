// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Builds flashable firmware images for a UF2-bootloader microcontroller
//! acting as a GameCube boot-ROM mod-chip.
//!
//! The chip's base firmware expects to find a scrambled, IPLBOOT-framed
//! executable at a fixed flash offset. This crate takes the base firmware
//! as a UF2 image and a GameCube DOL executable, and produces one combined
//! UF2 image:
//!
//! 1. parse and validate the DOL ([`dol`]),
//! 2. scramble it with the boot-ROM cipher and frame it ([`scramble`],
//!    [`payload`]),
//! 3. encode the frame into UF2 blocks at the payload flash offset and
//!    merge them after the base image's blocks ([`stream`]).
//!
//! Everything here is a pure byte-in/byte-out transform: no I/O, no shared
//! state, and the first error aborts the build. [`build`] is the whole
//! public contract; the per-stage modules are exported for callers that
//! want diagnostics (section tables, stream inspection) or tests.

pub mod dol;
pub mod error;
pub mod format;
pub mod payload;
pub mod scramble;
pub mod stream;

pub use crate::error::Error;
pub use crate::format::Family;

use crate::dol::DolHeader;
use crate::format::PAYLOAD_BASE;
use crate::stream::Stream;

/// Builds the combined image: `base_uf2` (the base firmware, already in UF2
/// form) plus `dol_bytes` (the executable), targeting `family`.
///
/// The *entire* DOL file, header included, is scrambled and framed; the
/// on-device loader hands the whole file to the console, whose boot code
/// reads the header itself.
pub fn build(
    base_uf2: &[u8],
    dol_bytes: &[u8],
    family: Family,
) -> Result<Vec<u8>, Error> {
    let header = DolHeader::parse(dol_bytes)?;
    header.validate(dol_bytes)?;

    let wrapped = payload::wrap(dol_bytes);

    let payload_stream =
        Stream::encode(&wrapped.to_bytes(), PAYLOAD_BASE, family);
    let base_stream = Stream::parse(base_uf2)?;

    let merged = Stream::merge(base_stream, payload_stream)?;
    Ok(merged.to_bytes())
}
