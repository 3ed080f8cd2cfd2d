//! Physical memory store, physical-page allocator, and page-table walker.
//!
//! Grounded in the teacher's `kernel-vmem`/`kernel-memory-addresses` crates
//! (typed addresses, bitfield page-table entries, lazily-allocated
//! multi-level tables) and in `examples/original_source/system.cpp`'s
//! `mmap`-backed dual-view RAM, which this module reimplements directly
//! rather than hand-rolling shifts over a `Vec<u8>`.

mod alloc;
mod phys;
mod pte;
mod walker;

pub use alloc::PageAllocator;
pub use phys::PhysicalMemory;
pub use pte::PageTableEntry;
pub use walker::PageTableWalker;

use thiserror::Error;

/// Failure modes for the physical memory store and page-table walker.
///
/// Per the spec's error taxonomy, [`MemError::ShmOpen`] and [`MemError::Mmap`]
/// are host resource failures (fatal, reported via `anyhow` at `main`);
/// [`MemError::OutOfBounds`] and [`MemError::OutOfPhysicalPages`] are
/// protocol violations the bus coordinator logs and turns into a simulated
/// "finish".
#[derive(Debug, Error)]
pub enum MemError {
    #[error("failed to create shared memory object: {0}")]
    ShmOpen(std::io::Error),

    #[error("mmap failed: {0}")]
    Mmap(std::io::Error),

    #[error("access at {addr:#x} is beyond end of memory ({ramsize:#x} bytes)")]
    OutOfBounds { addr: u64, ramsize: u64 },

    #[error("physical-page allocator exhausted ({ramsize} bytes of RAM)")]
    OutOfPhysicalPages { ramsize: u64 },

    #[error("virtual-to-physical translation requested but virtual memory is disabled")]
    VirtualMemoryDisabled,
}
