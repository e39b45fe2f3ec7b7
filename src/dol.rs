// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! DOL executable parsing and structural validation.
//!
//! A DOL file is a 256-byte big-endian header followed by raw section bytes
//! at the file offsets the header declares. Up to 7 text and 11 data
//! sections; a section with size 0 is absent. The loader on the console side
//! is unforgiving, so everything we can check statically gets checked here
//! before a single byte is scrambled.

use byteorder::BigEndian;
use zerocopy::{AsBytes, FromBytes, LayoutVerified, U32};

use crate::error::Error;

/// Size of the header at the front of every DOL file.
pub const DOL_HEADER_SIZE: usize = 256;

/// Entry point the boot firmware jumps to, and the address the first text
/// section must load at. Fixed by the payload's linker script.
pub const DOL_ENTRY_POINT: u32 = 0x8130_0000;

/// Upper bound on a plausible payload executable. The payload flash region
/// is far smaller, but oversized input is rejected before wrapping so the
/// failure names the real culprit.
pub const DOL_MAX_SIZE: usize = 5 * 1024 * 1024;

static TEXT_LABELS: [&str; 7] = [
    "text0", "text1", "text2", "text3", "text4", "text5", "text6",
];
static DATA_LABELS: [&str; 11] = [
    "data0", "data1", "data2", "data3", "data4", "data5", "data6", "data7",
    "data8", "data9", "data10",
];

/// The DOL header, exactly as it appears on disk. Every field is a 32-bit
/// big-endian word; the struct has no padding and can be read straight off
/// the file with a layout check.
#[derive(Clone, Debug, AsBytes, FromBytes)]
#[repr(C)]
pub struct DolHeader {
    pub text_offsets: [U32<BigEndian>; 7],
    pub data_offsets: [U32<BigEndian>; 11],
    pub text_addresses: [U32<BigEndian>; 7],
    pub data_addresses: [U32<BigEndian>; 11],
    pub text_sizes: [U32<BigEndian>; 7],
    pub data_sizes: [U32<BigEndian>; 11],
    pub bss_address: U32<BigEndian>,
    pub bss_size: U32<BigEndian>,
    pub entry_point: U32<BigEndian>,
    pub unused: [u8; 28],
}

/// One non-empty section, with a copy of its file bytes.
pub struct Section {
    pub label: &'static str,
    pub offset: u32,
    pub address: u32,
    pub size: u32,
    pub data: Vec<u8>,
}

/// All non-empty sections of a DOL, in header order.
pub struct Sections {
    pub sections: Vec<Section>,
    /// Sum of the kept sections' sizes.
    pub total_size: u64,
}

impl DolHeader {
    /// Reads the header off the front of `bytes`.
    ///
    /// Fails if the input is shorter than the header, or if the header is a
    /// run of zeroes -- an erased-flash dump or a truncated download can
    /// otherwise masquerade as a DOL whose sections are all absent.
    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        let (header, _) = LayoutVerified::<_, DolHeader>::new_from_prefix(bytes)
            .ok_or(Error::DolTooSmall { got: bytes.len() })?;
        let header: &DolHeader = header.into_ref();

        let all_zero = header.entry_point.get() == 0
            && header.text_offsets.iter().all(|w| w.get() == 0)
            && header.data_offsets.iter().all(|w| w.get() == 0)
            && header.text_addresses.iter().all(|w| w.get() == 0)
            && header.data_addresses.iter().all(|w| w.get() == 0);
        if all_zero {
            return Err(Error::DolZeroHeader);
        }

        Ok(header.clone())
    }

    /// Checks the header against the file it came from: entry point and
    /// first text load address, section bounds and file-space overlap, and
    /// the overall size limit, in that order.
    ///
    /// Overlap in *memory* space is deliberately not checked; DOLs are free
    /// to arrange their load addresses however they like.
    pub fn validate(&self, file: &[u8]) -> Result<(), Error> {
        let entry = self.entry_point.get();
        if entry != DOL_ENTRY_POINT {
            return Err(Error::DolInvalidEntryPoint {
                got: entry,
                expected: DOL_ENTRY_POINT,
            });
        }
        let text0 = self.text_addresses[0].get();
        if text0 != DOL_ENTRY_POINT {
            return Err(Error::DolInvalidLoadAddress {
                got: text0,
                expected: DOL_ENTRY_POINT,
            });
        }

        let mut extents = Vec::new();
        for (label, offset, _, size) in self.section_table() {
            if size == 0 {
                continue;
            }
            let end = u64::from(offset) + u64::from(size);
            if end > file.len() as u64 {
                return Err(Error::DolSectionOutOfBounds {
                    label,
                    offset,
                    size,
                    file_size: file.len(),
                });
            }
            extents.push((offset, size, label));
        }

        extents.sort_by_key(|&(offset, _, _)| offset);
        for pair in extents.windows(2) {
            let (a_off, a_size, a_label) = pair[0];
            let (b_off, b_size, b_label) = pair[1];
            let a_end = u64::from(a_off) + u64::from(a_size);
            if a_end > u64::from(b_off) {
                return Err(Error::DolSectionOverlap {
                    a_label,
                    b_label,
                    a_range: (u64::from(a_off), a_end),
                    b_range: (
                        u64::from(b_off),
                        u64::from(b_off) + u64::from(b_size),
                    ),
                });
            }
        }

        if file.len() > DOL_MAX_SIZE {
            return Err(Error::DolTooLarge {
                got: file.len(),
                max: DOL_MAX_SIZE,
            });
        }

        Ok(())
    }

    /// Copies every non-empty section out of `file`, preserving header
    /// order. Bounds are re-checked so this is safe to call on a header that
    /// has not been through [`DolHeader::validate`].
    pub fn extract_sections(&self, file: &[u8]) -> Result<Sections, Error> {
        let mut sections = Vec::new();
        let mut total_size = 0u64;

        for (label, offset, address, size) in self.section_table() {
            if size == 0 {
                continue;
            }
            let start = offset as usize;
            let data = start
                .checked_add(size as usize)
                .and_then(|end| file.get(start..end))
                .ok_or(Error::DolSectionOutOfBounds {
                    label,
                    offset,
                    size,
                    file_size: file.len(),
                })?
                .to_vec();

            total_size += u64::from(size);
            sections.push(Section {
                label,
                offset,
                address,
                size,
                data,
            });
        }

        Ok(Sections {
            sections,
            total_size,
        })
    }

    /// All 18 section slots as `(label, offset, address, size)`, text first,
    /// empty slots included.
    fn section_table(&self) -> Vec<(&'static str, u32, u32, u32)> {
        let mut table = Vec::with_capacity(18);
        for i in 0..7 {
            table.push((
                TEXT_LABELS[i],
                self.text_offsets[i].get(),
                self.text_addresses[i].get(),
                self.text_sizes[i].get(),
            ));
        }
        for i in 0..11 {
            table.push((
                DATA_LABELS[i],
                self.data_offsets[i].get(),
                self.data_addresses[i].get(),
                self.data_sizes[i].get(),
            ));
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Header field offsets, per the on-disk layout.
    const TEXT_OFFSETS: usize = 0x00;
    const DATA_OFFSETS: usize = 0x1c;
    const TEXT_ADDRESSES: usize = 0x48;
    const DATA_ADDRESSES: usize = 0x64;
    const TEXT_SIZES: usize = 0x90;
    const DATA_SIZES: usize = 0xac;
    const ENTRY_POINT: usize = 0xe0;

    fn put(buf: &mut [u8], offset: usize, value: u32) {
        buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
    }

    /// A header-only DOL with a valid entry point and first text address and
    /// no sections.
    fn empty_dol() -> Vec<u8> {
        let mut buf = vec![0u8; DOL_HEADER_SIZE];
        put(&mut buf, ENTRY_POINT, DOL_ENTRY_POINT);
        put(&mut buf, TEXT_ADDRESSES, DOL_ENTRY_POINT);
        buf
    }

    fn set_text_section(buf: &mut [u8], slot: usize, offset: u32, size: u32) {
        put(buf, TEXT_OFFSETS + 4 * slot, offset);
        put(buf, TEXT_SIZES + 4 * slot, size);
    }

    fn set_data_section(buf: &mut [u8], slot: usize, offset: u32, size: u32) {
        put(buf, DATA_OFFSETS + 4 * slot, offset);
        put(buf, DATA_SIZES + 4 * slot, size);
    }

    #[test]
    fn short_input_rejected() {
        let err = DolHeader::parse(&[0u8; 255]).unwrap_err();
        assert!(matches!(err, Error::DolTooSmall { got: 255 }));
    }

    #[test]
    fn zeroed_header_rejected() {
        let err = DolHeader::parse(&[0u8; 512]).unwrap_err();
        assert!(matches!(err, Error::DolZeroHeader));
    }

    #[test]
    fn fields_read_big_endian() {
        let mut buf = empty_dol();
        set_data_section(&mut buf, 10, 0x1234, 0x56);
        let header = DolHeader::parse(&buf).unwrap();
        assert_eq!(header.entry_point.get(), DOL_ENTRY_POINT);
        assert_eq!(header.data_offsets[10].get(), 0x1234);
        assert_eq!(header.data_sizes[10].get(), 0x56);
    }

    #[test]
    fn bad_entry_point_rejected() {
        let mut buf = empty_dol();
        put(&mut buf, ENTRY_POINT, 0x8000_0000);
        let header = DolHeader::parse(&buf).unwrap();
        let err = header.validate(&buf).unwrap_err();
        assert!(matches!(
            err,
            Error::DolInvalidEntryPoint { got: 0x8000_0000, .. }
        ));
    }

    #[test]
    fn header_only_dol_fails_on_first_text_address() {
        // Valid entry point, every section absent: parses, then trips the
        // load-address check because text0's address is still zero.
        let mut buf = vec![0u8; DOL_HEADER_SIZE];
        put(&mut buf, ENTRY_POINT, DOL_ENTRY_POINT);
        let header = DolHeader::parse(&buf).unwrap();
        let err = header.validate(&buf).unwrap_err();
        assert!(matches!(err, Error::DolInvalidLoadAddress { got: 0, .. }));
    }

    #[test]
    fn section_past_end_of_file_rejected() {
        let mut buf = empty_dol();
        set_text_section(&mut buf, 0, 0x100, 0x20);
        // File is only the header; the section hangs off the end.
        let header = DolHeader::parse(&buf).unwrap();
        let err = header.validate(&buf).unwrap_err();
        assert!(matches!(
            err,
            Error::DolSectionOutOfBounds { label: "text0", offset: 0x100, size: 0x20, .. }
        ));
    }

    #[test]
    fn overlapping_sections_rejected() {
        let mut buf = empty_dol();
        set_text_section(&mut buf, 0, 0x100, 0x30);
        set_data_section(&mut buf, 0, 0x120, 0x10);
        buf.resize(0x200, 0);
        let header = DolHeader::parse(&buf).unwrap();
        let err = header.validate(&buf).unwrap_err();
        assert!(matches!(
            err,
            Error::DolSectionOverlap { a_label: "text0", b_label: "data0", .. }
        ));
    }

    #[test]
    fn adjacent_sections_accepted() {
        let mut buf = empty_dol();
        set_text_section(&mut buf, 0, 0x100, 0x20);
        set_data_section(&mut buf, 0, 0x120, 0x20);
        buf.resize(0x140, 0);
        let header = DolHeader::parse(&buf).unwrap();
        header.validate(&buf).unwrap();
    }

    #[test]
    fn oversized_file_rejected() {
        let mut buf = empty_dol();
        set_text_section(&mut buf, 0, 0x100, 0x20);
        buf.resize(DOL_MAX_SIZE + 1, 0);
        let header = DolHeader::parse(&buf).unwrap();
        let err = header.validate(&buf).unwrap_err();
        assert!(matches!(err, Error::DolTooLarge { .. }));
    }

    #[test]
    fn sections_extracted_in_header_order() {
        let mut buf = empty_dol();
        // data0 placed *before* text1 in the file; header order must win.
        set_text_section(&mut buf, 1, 0x180, 0x10);
        set_data_section(&mut buf, 0, 0x100, 0x40);
        buf.resize(0x190, 0);
        buf[0x180..0x190].fill(0xAA);

        let header = DolHeader::parse(&buf).unwrap();
        let sections = header.extract_sections(&buf).unwrap();

        let labels: Vec<_> =
            sections.sections.iter().map(|s| s.label).collect();
        assert_eq!(labels, ["text1", "data0"]);
        assert_eq!(sections.total_size, 0x50);
        assert_eq!(sections.sections[0].data, vec![0xAA; 0x10]);
        assert_eq!(sections.sections[1].size, 0x40);
    }

    #[test]
    fn extract_rechecks_bounds() {
        let mut buf = empty_dol();
        set_text_section(&mut buf, 0, 0x100, 0x20);
        let header = DolHeader::parse(&buf).unwrap();
        assert!(header.extract_sections(&buf).is_err());
    }
}
