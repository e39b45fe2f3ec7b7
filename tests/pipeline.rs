//! End-to-end checks of the image build: a synthetic DOL and a synthetic
//! base firmware image go in, and the combined UF2 that comes out is taken
//! apart byte by byte.

use dol2uf2::dol::{DOL_ENTRY_POINT, DOL_HEADER_SIZE};
use dol2uf2::format::{Family, FLASH_BASE, PAYLOAD_BASE, RP2350_FAMILY_ID};
use dol2uf2::payload::Wrapped;
use dol2uf2::scramble::scramble;
use dol2uf2::stream::Stream;
use dol2uf2::Error;

fn put_be(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

/// A minimal valid DOL: one 0x40-byte text section at file offset 0x100,
/// loading at the entry point.
fn sample_dol() -> Vec<u8> {
    let mut dol = vec![0u8; 0x140];
    put_be(&mut dol, 0x00, 0x100); // text0 file offset
    put_be(&mut dol, 0x48, DOL_ENTRY_POINT); // text0 load address
    put_be(&mut dol, 0x90, 0x40); // text0 size
    put_be(&mut dol, 0xe0, DOL_ENTRY_POINT); // entry point
    for (i, byte) in dol[0x100..].iter_mut().enumerate() {
        *byte = i as u8;
    }
    dol
}

/// A base firmware image of `len` bytes of 0x5A, UF2-encoded at the start
/// of flash.
fn sample_base(len: usize, family: Family) -> Vec<u8> {
    Stream::encode(&vec![0x5A; len], FLASH_BASE, family).to_bytes()
}

#[test]
fn build_combines_base_and_payload() {
    let dol = sample_dol();
    let base = sample_base(1024, Family::Rp2040);

    let image = dol2uf2::build(&base, &dol, Family::Rp2040).unwrap();
    assert_eq!(image.len() % 512, 0);

    // 320-byte DOL -> 320 scrambled + 4 trailer + 12 header = 336 bytes of
    // frame, so two payload blocks after the four base blocks.
    let stream = Stream::parse(&image).unwrap();
    assert_eq!(stream.block_count(), 6);

    for (i, block) in stream.blocks().iter().enumerate() {
        assert_eq!(block.block_no.get(), i as u32);
        assert_eq!(block.total_blocks.get(), 6);
    }

    assert_eq!(stream.blocks()[4].address.get(), PAYLOAD_BASE);
    assert_eq!(stream.blocks()[5].address.get(), PAYLOAD_BASE + 256);
    assert_eq!(&stream.blocks()[4].data[..8], b"IPLBOOT ");
}

#[test]
fn base_blocks_survive_except_numbering() {
    let dol = sample_dol();
    let base = sample_base(1024, Family::Rp2040);

    let image = dol2uf2::build(&base, &dol, Family::Rp2040).unwrap();

    for block in 0..base.len() / 512 {
        for offset in 0..512 {
            // block_no and total_blocks live at offsets 20..28.
            if (20..28).contains(&offset) {
                continue;
            }
            assert_eq!(
                base[block * 512 + offset],
                image[block * 512 + offset],
                "base byte changed in block {block} at offset {offset}",
            );
        }
    }
}

#[test]
fn embedded_payload_descrambles_to_the_dol() {
    let dol = sample_dol();
    let base = sample_base(512, Family::Rp2040);

    let image = dol2uf2::build(&base, &dol, Family::Rp2040).unwrap();
    let stream = Stream::parse(&image).unwrap();

    // Reassemble the flash contents at and above the payload offset.
    let mut framed = Vec::new();
    for block in stream.blocks() {
        if block.address.get() >= PAYLOAD_BASE {
            framed.extend_from_slice(
                &block.data[..block.length.get() as usize],
            );
        }
    }

    let wrapped = Wrapped::from_bytes(&framed).unwrap();
    assert_eq!(&wrapped.body[wrapped.body.len() - 4..], b"PICO");

    // The scrambler is an involution, so applying it to the stored body
    // must recover the original file, header and all.
    let recovered = scramble(&wrapped.body[..dol.len()]);
    assert_eq!(recovered, dol);
}

#[test]
fn rp2350_image_tags_payload_blocks() {
    let dol = sample_dol();
    let base = sample_base(512, Family::Rp2350);

    let image = dol2uf2::build(&base, &dol, Family::Rp2350).unwrap();
    let stream = Stream::parse(&image).unwrap();

    assert!(stream
        .blocks()
        .iter()
        .all(|b| b.family_id.get() == RP2350_FAMILY_ID));
}

#[test]
fn invalid_dol_fails_before_touching_the_base() {
    let mut dol = sample_dol();
    put_be(&mut dol, 0xe0, 0x8000_3100);
    // A ragged base would fail too, but the DOL check must come first.
    let base = vec![0u8; 100];

    let err = dol2uf2::build(&base, &dol, Family::Rp2040).unwrap_err();
    assert!(matches!(err, Error::DolInvalidEntryPoint { .. }));
}

#[test]
fn ragged_base_image_is_rejected() {
    let dol = sample_dol();
    let err = dol2uf2::build(&[0u8; 100], &dol, Family::Rp2040).unwrap_err();
    assert!(matches!(err, Error::Uf2BadLength { got: 100 }));
}

#[test]
fn base_reaching_into_payload_region_is_rejected() {
    let dol = sample_dol();
    // 512 bytes placed so the base spans the payload offset.
    let base =
        Stream::encode(&[0u8; 512], PAYLOAD_BASE - 256, Family::Rp2040)
            .to_bytes();

    let err = dol2uf2::build(&base, &dol, Family::Rp2040).unwrap_err();
    assert!(matches!(err, Error::MergeMemoryOverlap { .. }));
}

#[test]
fn header_only_dol_is_rejected() {
    // Valid entry point, no sections: the first text section's load
    // address is still zero.
    let mut dol = vec![0u8; DOL_HEADER_SIZE];
    put_be(&mut dol, 0xe0, DOL_ENTRY_POINT);
    let base = sample_base(512, Family::Rp2040);

    let err = dol2uf2::build(&base, &dol, Family::Rp2040).unwrap_err();
    assert!(matches!(err, Error::DolInvalidLoadAddress { .. }));
}
