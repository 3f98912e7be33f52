//! ELF and raw-bytes loading (spec §4.8, out of scope for the core's own
//! analyses but the narrow surface it is fed through). Grounded on the
//! original `loadelf.c`'s section/symbol lookup and machine-to-architecture
//! mapping, re-expressed atop the `object` crate (the pack's own ELF
//! reader, from the `bytecodealliance-wasmtime` example) instead of the
//! hand-rolled 32/64-bit, endian-aware struct overlays the C used.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use object::{Object, ObjectSection, ObjectSymbol};

use crate::arch::Architecture;

/// One contiguous byte region to lift, plus the guest address it starts
/// at and the architecture it should be lifted as (when known — raw
/// offset/stdin modes require `--arch` from the caller instead).
pub struct LoadedRegion {
    pub bytes: Vec<u8>,
    pub guest_addr: u64,
    pub architecture: Option<Architecture>,
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn infer_architecture(file: &object::File) -> Option<Architecture> {
    Architecture::from_object(file.architecture())
}

/// `--section <name>`: looks up an ELF section by name and returns its
/// full contents starting at its load address.
pub fn load_section(path: &Path, section_name: &str) -> Result<LoadedRegion> {
    let data = read_file(path)?;
    let file = object::File::parse(&*data).context("malformed ELF file")?;
    let section = file
        .section_by_name(section_name)
        .with_context(|| format!("no section named \"{section_name}\""))?;
    let guest_addr = section.address();
    let bytes = section.data().context("failed to read section data")?.to_vec();
    Ok(LoadedRegion {
        bytes,
        guest_addr,
        architecture: infer_architecture(&file),
    })
}

/// `--function <symbol>`: resolves a symbol to an address and size, then
/// reads that many bytes from whichever section contains it.
pub fn load_function(path: &Path, symbol_name: &str) -> Result<LoadedRegion> {
    let data = read_file(path)?;
    let file = object::File::parse(&*data).context("malformed ELF file")?;
    let symbol = file
        .symbols()
        .find(|s| s.name() == Ok(symbol_name))
        .with_context(|| format!("unresolvable symbol \"{symbol_name}\""))?;
    let guest_addr = symbol.address();
    let size = symbol.size();
    if size == 0 {
        bail!("symbol \"{symbol_name}\" has size 0; nothing to lift");
    }
    let section_index = symbol.section_index().with_context(|| format!("symbol \"{symbol_name}\" is not defined in any section"))?;
    let section = file.section_by_index(section_index).context("symbol's section index is out of range")?;
    let section_data = section.data().context("failed to read section data")?;
    let offset_in_section = guest_addr
        .checked_sub(section.address())
        .context("symbol address precedes its own section")?;
    let start = usize::try_from(offset_in_section).context("symbol offset overflowed usize")?;
    let len = usize::try_from(size).context("symbol size overflowed usize")?;
    let end = start.checked_add(len).filter(|&e| e <= section_data.len()).context("symbol range runs past the end of its section")?;
    Ok(LoadedRegion {
        bytes: section_data[start..end].to_vec(),
        guest_addr,
        architecture: infer_architecture(&file),
    })
}

/// `--offset/--length`: a raw slice of the file, with no symbol/section
/// structure assumed. Architecture inference still runs if the file
/// happens to parse as an object file; `--arch` is required regardless
/// (spec §6) since arbitrary offsets need not point at a recognizable
/// container.
pub fn load_offset(path: &Path, offset: u64, length: u64) -> Result<LoadedRegion> {
    let data = read_file(path)?;
    let start = usize::try_from(offset).context("offset overflowed usize")?;
    let len = usize::try_from(length).context("length overflowed usize")?;
    let end = start.checked_add(len).filter(|&e| e <= data.len()).context("offset+length runs past the end of the file")?;
    let architecture = object::File::parse(&*data).ok().as_ref().and_then(infer_architecture);
    Ok(LoadedRegion {
        bytes: data[start..end].to_vec(),
        guest_addr: offset,
        architecture,
    })
}

/// `--bytes`: an already-read buffer (stdin), with no address or
/// architecture information beyond what the caller supplies.
pub fn load_raw_bytes(bytes: Vec<u8>, guest_addr: u64) -> LoadedRegion {
    LoadedRegion {
        bytes,
        guest_addr,
        architecture: None,
    }
}
