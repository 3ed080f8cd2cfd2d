//! Image loader (§4.C): reads an ELF or raw binary into guest RAM and
//! records the entry point, the end of the loaded image, and the TLS
//! `errno` slot.
//!
//! Grounded in `examples/original_source/system.cpp`'s `load_binary`/
//! `load_segment`/`load_elf_parts`, reimplemented against a real ELF crate
//! (`xmas-elf`, the same one several independently retrieved loader/kernel
//! crates in the corpus depend on) instead of hand-rolled header parsing.

use harness_info::{PhysAddr, VirtAddr};
use harness_mem::{MemError, PageAllocator, PageTableWalker, PhysicalMemory};
use std::path::Path;
use thiserror::Error;
use xmas_elf::program::Type as SegType;
use xmas_elf::sections::ShType;
use xmas_elf::ElfFile;

/// Failure modes for image loading.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("failed to read binary {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("not a valid ELF file: {0}")]
    Elf(&'static str),

    #[error("ELF program header type {0:?} is unsupported")]
    UnsupportedSegment(SegType),

    #[error("ELF object has no loadable executable section")]
    NoLoadableCode,

    #[error(transparent)]
    Mem(#[from] MemError),
}

/// The result of loading a guest program image.
#[derive(Debug, Clone, Copy)]
pub struct LoadedImage {
    /// Address the hart should start fetching from (`top->entry`).
    pub entry: u64,
    /// One past the highest address touched by a `PT_LOAD` segment, rounded
    /// up to a page boundary; the initial program break in user mode.
    pub max_elf_addr: u64,
    /// Host-visible guest virtual address of the TLS `errno` slot, if a
    /// `PT_TLS` segment was present.
    pub errno_slot: Option<VirtAddr>,
}

/// Reads the entire file into physical memory starting at offset 0, which
/// the guest sees as [`harness_info::DRAM_OFFSET`] once the bus applies the
/// full-system address offset. Entry point is fixed at `DRAM_OFFSET`.
///
/// # Errors
/// [`ImageError::Io`] if the file cannot be read, or [`ImageError::Mem`] if
/// it does not fit in `mem`.
pub fn load_full_system(mem: &mut PhysicalMemory, path: &Path) -> Result<LoadedImage, ImageError> {
    let data = std::fs::read(path).map_err(|source| ImageError::Io {
        path: path.display().to_string(),
        source,
    })?;
    mem.write_bytes(PhysAddr::new(0), &data)?;
    Ok(LoadedImage {
        entry: harness_info::DRAM_OFFSET,
        max_elf_addr: 0,
        errno_slot: None,
    })
}

/// Parses `path` as an ELF64 user-mode executable and faults in / copies
/// every `PT_LOAD` segment through the page-table walker's virtual view.
///
/// # Errors
/// [`ImageError::Elf`]/[`ImageError::UnsupportedSegment`] on malformed or
/// unrecognized ELF structure, [`ImageError::Mem`] if the walk or copy
/// exceeds `ramsize`.
pub fn load_elf_user(
    mem: &mut PhysicalMemory,
    alloc: &mut PageAllocator,
    walker: &PageTableWalker,
    satp: PhysAddr,
    path: &Path,
) -> Result<LoadedImage, ImageError> {
    let data = std::fs::read(path).map_err(|source| ImageError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let elf = ElfFile::new(&data).map_err(ImageError::Elf)?;

    if elf.program_iter().next().is_none() {
        return load_first_progbits_section(mem, alloc, walker, satp, &elf, &data);
    }

    let mut max_elf_addr = 0u64;
    let mut errno_slot = None;

    for ph in elf.program_iter() {
        let seg_type = ph.get_type().map_err(ImageError::Elf)?;
        match seg_type {
            SegType::Load => {
                let vaddr = ph.virtual_addr();
                let memsz = ph.mem_size();
                let filesz = ph.file_size();
                let offset = ph.offset();
                load_segment(mem, alloc, walker, satp, vaddr, memsz, &data, offset, filesz)?;
                max_elf_addr = max_elf_addr.max(vaddr + memsz);
            }
            SegType::Tls => {
                let addr = VirtAddr::new(ph.virtual_addr() + 0x20);
                log::info!("TLS errno slot at {addr:#x} (TLS segment at {:#x}+0x20)", ph.virtual_addr());
                errno_slot = Some(addr);
            }
            // PT_GNU_STACK (0x6474e551) doesn't get its own `xmas_elf` variant;
            // it falls into the OS-specific range alongside PT_GNU_EH_FRAME.
            SegType::Dynamic | SegType::Note | SegType::GnuRelro => {}
            SegType::OsSpecific(0x6474_e551) => {}
            other => return Err(ImageError::UnsupportedSegment(other)),
        }
    }

    let max_elf_addr = harness_info::align_up(max_elf_addr, harness_info::PAGE_SIZE);

    Ok(LoadedImage {
        entry: elf.header.pt2.entry_point(),
        max_elf_addr,
        errno_slot,
    })
}

#[allow(clippy::too_many_arguments)]
fn load_segment(
    mem: &mut PhysicalMemory,
    alloc: &mut PageAllocator,
    walker: &PageTableWalker,
    satp: PhysAddr,
    vaddr: u64,
    memsz: u64,
    file: &[u8],
    file_offset: u64,
    filesz: u64,
) -> Result<(), ImageError> {
    // Prefault every page covered by the segment; anonymous shared memory
    // is already zero, so bytes beyond `filesz` need no explicit clearing.
    let mut page = harness_info::align_down(vaddr, harness_info::PAGE_SIZE);
    let end = vaddr + memsz;
    while page < end {
        walker.virt_to_phy(mem, alloc, satp, VirtAddr::new(page))?;
        page += harness_info::PAGE_SIZE;
    }

    let bytes = file
        .get(file_offset as usize..(file_offset + filesz) as usize)
        .ok_or(ImageError::Elf("segment file range out of bounds"))?;
    mem.write_virt_bytes(VirtAddr::new(vaddr), bytes)?;
    Ok(())
}

fn load_first_progbits_section(
    mem: &mut PhysicalMemory,
    alloc: &mut PageAllocator,
    walker: &PageTableWalker,
    satp: PhysAddr,
    elf: &ElfFile<'_>,
    data: &[u8],
) -> Result<LoadedImage, ImageError> {
    const SHF_EXECINSTR: u64 = 0x4;

    for section in elf.section_iter() {
        let Ok(ty) = section.get_type() else { continue };
        if ty != ShType::ProgBits || section.flags() & SHF_EXECINSTR == 0 {
            continue;
        }
        let size = section.size();
        load_segment(mem, alloc, walker, satp, 0, size, data, section.offset(), size)?;
        let max_elf_addr = harness_info::align_up(size, harness_info::PAGE_SIZE);
        return Ok(LoadedImage {
            entry: elf.header.pt2.entry_point(),
            max_elf_addr,
            errno_slot: None,
        });
    }

    Err(ImageError::NoLoadableCode)
}
