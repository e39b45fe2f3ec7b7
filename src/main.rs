// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `dol2uf2` builds flashable mod-chip firmware images for GameCube
//! consoles.
//!
//! Given the base firmware as a UF2 file and a GameCube executable in DOL
//! format, it scrambles the executable the way the console's boot ROM
//! expects, frames it, and splices it into the firmware image at the flash
//! offset the firmware reads it from. The heavy lifting lives in the
//! library crate; this binary is file plumbing and reporting.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;

use dol2uf2::dol::DolHeader;
use dol2uf2::format::{
    Family, Uf2Record, PAYLOAD_BASE, RP2040_FAMILY_ID, RP2350_FAMILY_ID,
};
use dol2uf2::payload::Wrapped;
use dol2uf2::stream::Stream;

///////////////////////////////////////////////////////////////////////
// Top-level command line interface definition and dispatch.

/// dol2uf2 packs GameCube DOL executables into mod-chip UF2 images.
#[derive(Parser)]
#[clap(term_width = 80)]
struct Dol2Uf2 {
    #[clap(flatten)]
    global: GlobalFlags,
    #[clap(subcommand)]
    command: Cmd,
}

#[derive(Parser)]
struct GlobalFlags {
    /// Enable additional output, probably more of it than you'd like.
    #[clap(long, short, global = true)]
    verbose: bool,
}

#[derive(Parser)]
enum Cmd {
    /// Combine a base firmware UF2 image and a DOL executable into a single
    /// flashable UF2 image.
    Build(BuildArgs),
    /// Read a UF2 file, check validity, and print information about its
    /// contents, including any embedded boot payload.
    Info(InfoArgs),
    /// Build an image like `build`, but instead of writing the result to a
    /// normal file, scan for attached bootloaders emulating USB mass
    /// storage devices and copy the firmware directly to one.
    ///
    /// Any mounted drive that contains an `INFO_UF2.TXT` file at its root
    /// is considered; its `Board-ID` line must match the selected family.
    #[cfg(feature = "sysinfo")]
    Flash(FlashArgs),
}

///////////////////////////////////////////////////////////////////////
// Main function / dispatch routine.

fn main() -> Result<()> {
    let args = Dol2Uf2::parse();
    match &args.command {
        Cmd::Build(subargs) => cmd_build(&args.global, subargs),
        Cmd::Info(subargs) => cmd_info(&args.global, subargs),

        #[cfg(feature = "sysinfo")]
        Cmd::Flash(subargs) => cmd_flash(&args.global, subargs),
    }
}

///////////////////////////////////////////////////////////////////////
// build and flash

#[derive(Parser)]
struct BuildCommonArgs {
    /// Path to the base firmware image, in UF2 format, for the selected
    /// family.
    #[clap(long, short)]
    base: PathBuf,

    /// Family of the target microcontroller, given either as a name or as a
    /// 32-bit tag with a `0x` prefix. Pass `help` to see the supported set.
    #[clap(
        long,
        short,
        parse(try_from_str = parse_family),
        default_value = "RP2040",
    )]
    family: Family,

    /// Path to the DOL executable to embed.
    input: PathBuf,
}

#[derive(Parser)]
struct BuildArgs {
    #[clap(flatten)]
    common: BuildCommonArgs,

    /// Path for UF2 output.
    output: PathBuf,
}

fn cmd_build(global: &GlobalFlags, args: &BuildArgs) -> Result<()> {
    let image = build_image(global, &args.common)?;

    std::fs::write(&args.output, &image).with_context(|| {
        format!("can't create output file {}", args.output.display())
    })?;

    println!(
        "wrote {} blocks ({} bytes) to {}",
        image.len() / 512,
        image.len(),
        args.output.display(),
    );
    Ok(())
}

/// Shared body of `build` and `flash`: load the inputs, run the pipeline,
/// narrate if asked.
fn build_image(global: &GlobalFlags, args: &BuildCommonArgs) -> Result<Vec<u8>> {
    let base = std::fs::read(&args.base).with_context(|| {
        format!("unable to load base firmware {}", args.base.display())
    })?;
    let dol = std::fs::read(&args.input).with_context(|| {
        format!("unable to load input file {}", args.input.display())
    })?;

    if global.verbose {
        print_dol_summary(&dol)?;
    }

    let image = dol2uf2::build(&base, &dol, args.family).with_context(|| {
        format!(
            "could not build a {} image from {}",
            args.family,
            args.input.display(),
        )
    })?;

    if global.verbose {
        println!(
            "combined image is {} blocks ({} from the base firmware)",
            image.len() / 512,
            base.len() / 512,
        );
    }

    Ok(image)
}

/// Prints the DOL's section table. Sections play no part in the build (the
/// whole file is embedded as-is), but the table is the fastest way to spot
/// a mislinked executable.
fn print_dol_summary(dol: &[u8]) -> Result<()> {
    let header = DolHeader::parse(dol)?;
    header.validate(dol)?;
    let sections = header.extract_sections(dol)?;

    println!("{:8} {:>10}  {:>10}  {:>10}", "SECTION", "OFFSET", "LOAD", "SIZE");
    for s in &sections.sections {
        println!(
            "{:8} {:#10x}  {:#10x}  {:#10x}",
            s.label, s.offset, s.address, s.size,
        );
    }
    println!(
        "{} sections, {} section bytes, entry point {:#010x}",
        sections.sections.len(),
        sections.total_size,
        header.entry_point.get(),
    );
    Ok(())
}

#[cfg(feature = "sysinfo")]
#[derive(Parser)]
struct FlashArgs {
    #[clap(flatten)]
    common: BuildCommonArgs,

    /// Normally, the tool will fail if multiple attached bootloaders match,
    /// to avoid doing something questionable. This flag overrides that
    /// behavior and arbitrarily selects one.
    #[clap(long)]
    feeling_lucky: bool,
}

#[cfg(feature = "sysinfo")]
fn cmd_flash(global: &GlobalFlags, args: &FlashArgs) -> Result<()> {
    use sysinfo::{DiskExt, SystemExt};

    let image = build_image(global, &args.common)?;

    let sys = sysinfo::System::new_with_specifics(
        sysinfo::RefreshKind::new().with_disks_list(),
    );

    let mut matches = vec![];
    for disk in sys.disks() {
        let path = disk.mount_point();
        match bootloader_family(path) {
            Ok(Some(family)) if family == args.common.family => {
                matches.push(path.to_path_buf());
            }
            Ok(_) => (),
            Err(e) => {
                eprintln!("warning: {:?}", e);
                continue;
            }
        }
    }

    let dest = match matches.len() {
        0 => {
            bail!(
                "no mounted {} bootloader drives were found",
                args.common.family,
            );
        }
        1 => matches.into_iter().next().unwrap(),
        n if args.feeling_lucky => {
            eprintln!("note: {n} matching drives found, picking one");
            matches.into_iter().next().unwrap()
        }
        n => {
            bail!("couldn't find unique matching drive ({n} found)");
        }
    };

    let output = dest.join("FIRMWARE.UF2");
    std::fs::write(&output, &image).with_context(|| {
        format!("can't write firmware to {}", output.display())
    })?;

    println!(
        "copied {} blocks to {}",
        image.len() / 512,
        output.display(),
    );
    Ok(())
}

/// Reads a drive's `INFO_UF2.TXT`, if any, and maps its `Board-ID` line to
/// a supported family. Pico-style bootloaders report `RPI-RP2` on RP2040
/// parts and `RPI-RP2350`-prefixed identifiers on RP2350 parts.
#[cfg(feature = "sysinfo")]
fn bootloader_family(path: &std::path::Path) -> Result<Option<Family>> {
    let info = path.join("INFO_UF2.TXT");
    if !info.is_file() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&info)
        .with_context(|| format!("reading {}", info.display()))?;

    let board_id = contents
        .lines()
        .find_map(|line| line.strip_prefix("Board-ID: "))
        .ok_or_else(|| anyhow!("INFO_UF2.TXT does not contain Board-ID"))?;

    let mut components = board_id.split('-');
    let _vendor = components.next();
    Ok(match components.next() {
        Some("RP2") => Some(Family::Rp2040),
        Some(chip) if chip.starts_with("RP2350") => Some(Family::Rp2350),
        _ => None,
    })
}

///////////////////////////////////////////////////////////////////////
// info

#[derive(Parser)]
struct InfoArgs {
    /// Path to a UF2 file to analyze.
    input: PathBuf,
}

fn cmd_info(global: &GlobalFlags, args: &InfoArgs) -> Result<()> {
    let image = std::fs::read(&args.input).with_context(|| {
        format!("can't read input path {}", args.input.display())
    })?;

    let stream = Stream::parse(&image).with_context(|| {
        format!("{} is not a well-formed UF2 file", args.input.display())
    })?;

    let mut families: BTreeMap<u32, Vec<&Uf2Record>> = BTreeMap::new();
    for block in stream.blocks() {
        families.entry(block.family_id.get()).or_default().push(block);
    }

    println!(
        "file parsed, {} blocks across {} family tags",
        stream.block_count(),
        families.len(),
    );

    for (family_id, blocks) in &families {
        println!();
        match Family::from_id(*family_id) {
            Some(family) => println!("family {family} ({family_id:#010x}):"),
            None => println!("family {family_id:#010x} (not one we target):"),
        }
        println!("- {} blocks", blocks.len());

        let start = blocks.iter().map(|b| b.address.get()).min().unwrap();
        let end = blocks
            .iter()
            .map(|b| u64::from(b.address.get()) + u64::from(b.length.get()))
            .max()
            .unwrap();
        println!("- data spans [{start:#010x}, {end:#010x})");

        if global.verbose {
            println!("- {:<10}  LEN", "ADDR");
            for block in blocks {
                println!(
                    "  {:#010x}  {}",
                    block.address.get(),
                    block.length.get(),
                );
            }
        }
    }

    let mut misnumbered = 0;
    for (i, block) in stream.blocks().iter().enumerate() {
        if block.block_no.get() as usize != i
            || block.total_blocks.get() as usize != stream.block_count()
        {
            misnumbered += 1;
        }
    }
    if misnumbered > 0 {
        println!();
        println!(
            "warning: {misnumbered} blocks have inconsistent numbering; \
             flashing tools may reject this file",
        );
    }

    println!();
    match embedded_payload(&stream) {
        Some(wrapped) => {
            println!(
                "boot payload found at {:#010x}: {} framed bytes \
                 ({} scrambled)",
                PAYLOAD_BASE,
                wrapped.total(),
                wrapped.body.len() - 4,
            );
        }
        None => {
            println!("no boot payload found at {PAYLOAD_BASE:#010x}");
        }
    }

    Ok(())
}

/// Reassembles the data stored at and above the payload offset and tries to
/// read an IPLBOOT frame out of it.
fn embedded_payload(stream: &Stream) -> Option<Wrapped> {
    let mut region: Vec<&Uf2Record> = stream
        .blocks()
        .iter()
        .filter(|b| b.address.get() >= PAYLOAD_BASE)
        .collect();
    if region.is_empty() {
        return None;
    }
    region.sort_by_key(|b| b.address.get());

    let mut bytes = Vec::new();
    for block in region {
        bytes.extend_from_slice(&block.data[..block.length.get() as usize]);
    }
    Wrapped::from_bytes(&bytes).ok()
}

///////////////////////////////////////////////////////////////////////
// Family argument parsing.

/// Accepts a family as a name (`rp2350`, any case), as a raw tag
/// (`0xe48bff59`, or its decimal form), or as `help` to list the supported
/// set.
fn parse_family(s: &str) -> Result<Family> {
    if s == "help" {
        eprintln!("Supported families:");
        eprintln!("{:10} {:8} {}", "TAG", "NAME", "DESCRIPTION");
        for (id, name, desc) in FAMILIES {
            eprintln!("{:#10x} {:8} {}", id, name, desc);
        }
        bail!("choose a tag or name from the list above.");
    }

    // Tags are conventionally written in hex, which clap's integer parsing
    // won't take, so strip the 0x ourselves.
    let tag = match s.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => s.parse::<u32>().ok(),
    };
    if let Some(id) = tag {
        return Family::from_id(id).ok_or_else(|| {
            anyhow!("{id:#010x} is not a family this firmware runs on")
        });
    }

    match s.to_ascii_uppercase().as_str() {
        "RP2040" => Ok(Family::Rp2040),
        "RP2350" => Ok(Family::Rp2350),
        _ => bail!(
            "can't parse {} as family name or tag \
             (use --family=help for the list)",
            s,
        ),
    }
}

static FAMILIES: &[(u32, &str, &str)] = &[
    (RP2040_FAMILY_ID, "RP2040", "Raspberry Pi RP2040 (Pico 1 boards)"),
    (RP2350_FAMILY_ID, "RP2350", "Raspberry Pi RP2350 (Pico 2 boards)"),
];
