// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! IPLBOOT framing around a scrambled payload.
//!
//! The firmware locates the embedded executable in flash by this frame: an
//! ASCII `"IPLBOOT "` magic, a big-endian size, the scrambled body padded
//! to a word boundary, and an ASCII `"PICO"` trailer.

use crate::error::Error;
use crate::scramble::scramble;

/// Eight bytes of magic, trailing space included.
pub const PAYLOAD_MAGIC: &[u8; 8] = b"IPLBOOT ";

/// Marks the end of the body.
pub const PAYLOAD_TRAILER: &[u8; 4] = b"PICO";

/// Emitted header length: magic plus the 32-bit size field.
pub const PAYLOAD_HEADER_SIZE: usize = 12;

// The size field counts a 32-byte header even though only 12 bytes are ever
// emitted; the firmware was built against a tool that did it this way, so
// the bias is load-bearing.
const SIZE_FIELD_BIAS: u32 = 32;

/// A framed, scrambled payload, ready for UF2 encoding.
pub struct Wrapped {
    pub header: [u8; PAYLOAD_HEADER_SIZE],
    pub body: Vec<u8>,
}

/// Scrambles `raw` and frames it.
///
/// The body is the scrambled input zero-padded to a multiple of 4, then the
/// trailer. The header's size field covers the body plus the notional
/// 32-byte header.
pub fn wrap(raw: &[u8]) -> Wrapped {
    let scrambled = scramble(raw);

    let aligned_len = (scrambled.len() + 3) & !3;
    let mut body = vec![0u8; aligned_len + PAYLOAD_TRAILER.len()];
    body[..scrambled.len()].copy_from_slice(&scrambled);
    body[aligned_len..].copy_from_slice(PAYLOAD_TRAILER);

    let mut header = [0u8; PAYLOAD_HEADER_SIZE];
    header[..8].copy_from_slice(PAYLOAD_MAGIC);
    let size = body.len() as u32 + SIZE_FIELD_BIAS;
    header[8..].copy_from_slice(&size.to_be_bytes());

    Wrapped { header, body }
}

impl Wrapped {
    /// Total framed length, header included.
    pub fn total(&self) -> usize {
        self.header.len() + self.body.len()
    }

    /// Header and body as one buffer, the form that goes into flash.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total());
        out.extend_from_slice(&self.header);
        out.extend_from_slice(&self.body);
        out
    }

    /// The size declared in the header.
    pub fn declared_size(&self) -> u32 {
        u32::from_be_bytes([
            self.header[8],
            self.header[9],
            self.header[10],
            self.header[11],
        ])
    }

    /// Re-checks the frame invariants: magic, size field, trailer.
    pub fn validate(&self) -> Result<(), Error> {
        if &self.header[..8] != PAYLOAD_MAGIC {
            let mut got = [0u8; 8];
            got.copy_from_slice(&self.header[..8]);
            return Err(Error::WrapInvalidMagic { got });
        }

        let observed = self.body.len() as u32 + SIZE_FIELD_BIAS;
        let declared = self.declared_size();
        if declared != observed {
            return Err(Error::WrapSizeMismatch { declared, observed });
        }

        if self.body.len() < PAYLOAD_TRAILER.len()
            || &self.body[self.body.len() - 4..] != PAYLOAD_TRAILER
        {
            let mut got = [0u8; 4];
            let tail = self.body.len().saturating_sub(4);
            for (slot, byte) in got.iter_mut().zip(&self.body[tail..]) {
                *slot = *byte;
            }
            return Err(Error::WrapMissingPicoTrailer { got });
        }

        Ok(())
    }

    /// Parses a frame back out of `bytes`, e.g. from data reassembled out of
    /// a flash image. Trailing bytes after the frame (flash padding) are
    /// ignored.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < PAYLOAD_HEADER_SIZE {
            return Err(Error::WrapInvalidHeaderSize { got: bytes.len() });
        }

        let mut header = [0u8; PAYLOAD_HEADER_SIZE];
        header.copy_from_slice(&bytes[..PAYLOAD_HEADER_SIZE]);
        if &header[..8] != PAYLOAD_MAGIC {
            let mut got = [0u8; 8];
            got.copy_from_slice(&header[..8]);
            return Err(Error::WrapInvalidMagic { got });
        }

        let declared =
            u32::from_be_bytes([header[8], header[9], header[10], header[11]]);
        let body_len = declared
            .checked_sub(SIZE_FIELD_BIAS)
            .map(|n| n as usize)
            .filter(|&n| PAYLOAD_HEADER_SIZE + n <= bytes.len())
            .ok_or(Error::WrapSizeMismatch {
                declared,
                observed: (bytes.len() - PAYLOAD_HEADER_SIZE) as u32
                    + SIZE_FIELD_BIAS,
            })?;

        let wrapped = Wrapped {
            header,
            body: bytes[PAYLOAD_HEADER_SIZE..PAYLOAD_HEADER_SIZE + body_len]
                .to_vec(),
        };
        wrapped.validate()?;
        Ok(wrapped)
    }
}
