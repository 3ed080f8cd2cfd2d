//! Shared constants and typed addresses for the AXI/DRAM simulation harness.
//!
//! Mirrors the role the teacher's `kernel-info` crate plays for its OS: a
//! small, dependency-free crate that every other harness crate can agree on
//! without pulling in the rest of the workspace.

mod addr;

pub use addr::{PhysAddr, VirtAddr};

/// Page size used throughout the guest's address spaces.
pub const PAGE_SIZE: u64 = 4096;

/// Guest-visible base of DRAM in full-system mode (`RAM_OFFSET` in the spec).
pub const DRAM_OFFSET: u64 = 0x8000_0000;

/// Width in bytes of a single AXI burst line; the unit of DRAM transactions.
pub const LINE_SIZE: u64 = 64;

/// Number of 8-byte beats in one AXI burst (wrap read or incr write).
pub const BEATS_PER_BURST: u64 = 8;

/// Number of virtual-page-number bits consumed per page-table level.
pub const VPN_BITS_PER_LEVEL: u32 = 9;

/// Number of levels in the (Sv39/Sv48-style) page table the walker builds.
pub const PAGE_TABLE_LEVELS: usize = 4;

/// Size in bytes of one page-table entry.
pub const PTE_SIZE: u64 = 8;

/// Stack top is this far below the end of RAM in user-mode argv/stack setup.
pub const STACK_RESERVE: u64 = 4 * 1024 * 1024;

/// Number of stack pages pre-faulted below the stack top at boot.
pub const STACK_PAGES: u64 = 100;

/// RTC strobe frequency driving `hz32768timer`.
pub const RTC_HZ: u64 = 32_768;

/// Round `addr` down to the nearest multiple of `align` (must be a power of two).
#[must_use]
pub const fn align_down(addr: u64, align: u64) -> u64 {
    addr & !(align - 1)
}

/// Round `addr` up to the nearest multiple of `align` (must be a power of two).
#[must_use]
pub const fn align_up(addr: u64, align: u64) -> u64 {
    (addr + align - 1) & !(align - 1)
}
