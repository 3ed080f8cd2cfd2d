use crate::MemError;
use harness_info::PhysAddr;
use std::ffi::CString;
use std::io;
use std::ptr;

/// RAM-backed physical memory region plus its optional virtual-address view.
///
/// The primary region is a POSIX shared-memory object (`shm_open` + `mmap`),
/// exactly the technique `examples/original_source/system.cpp` uses. When
/// virtual memory is enabled, a second `PROT_NONE` anonymous mapping of the
/// same size stands in for the guest's virtual address space; the page-table
/// walker (§4.B) remaps individual 4 KiB slots of it onto the shared object
/// with `MAP_FIXED` as leaves are allocated, so host code can read or write
/// guest memory by virtual address without re-walking the table.
///
/// `libc` is the one dependency the `no_std` teacher has no analogue for —
/// its kernels never call into a host OS. Its use here is recorded in
/// `DESIGN.md`.
pub struct PhysicalMemory {
    ram: *mut u8,
    ram_fd: libc::c_int,
    ramsize: u64,
    virt: Option<*mut u8>,
}

// SAFETY: `PhysicalMemory` owns its mappings exclusively; the harness is
// single-threaded (§5), so no synchronization is required for `Send`.
unsafe impl Send for PhysicalMemory {}

impl PhysicalMemory {
    /// Create a new RAM region of `ramsize` bytes (must be a multiple of
    /// 4 KiB). If `with_virtual_view` is set, also reserve an equally sized
    /// `PROT_NONE` region for the page-table walker to populate on demand.
    ///
    /// # Errors
    /// Returns [`MemError::ShmOpen`] or [`MemError::Mmap`] if the host
    /// refuses to create or map the backing memory.
    pub fn new(ramsize: u64, with_virtual_view: bool) -> Result<Self, MemError> {
        let name = CString::new(format!("/harness-ram-{}", std::process::id()))
            .expect("pid-derived shm name is never NUL-containing");

        // SAFETY: straightforward FFI calls with valid, owned arguments; return
        // values are checked below.
        let ram_fd = unsafe {
            libc::shm_open(
                name.as_ptr(),
                libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
                0o600,
            )
        };
        if ram_fd < 0 {
            return Err(MemError::ShmOpen(io::Error::last_os_error()));
        }
        // Unlink immediately: the fd keeps the object alive for our process
        // lifetime without leaking a name into the filesystem namespace.
        unsafe {
            libc::shm_unlink(name.as_ptr());
        }
        if unsafe { libc::ftruncate(ram_fd, ramsize as libc::off_t) } != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(ram_fd) };
            return Err(MemError::Mmap(err));
        }

        let ram = unsafe {
            libc::mmap(
                ptr::null_mut(),
                ramsize as libc::size_t,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                ram_fd,
                0,
            )
        };
        if ram == libc::MAP_FAILED {
            let err = io::Error::last_os_error();
            unsafe { libc::close(ram_fd) };
            return Err(MemError::Mmap(err));
        }

        let virt = if with_virtual_view {
            let v = unsafe {
                libc::mmap(
                    ptr::null_mut(),
                    ramsize as libc::size_t,
                    libc::PROT_NONE,
                    libc::MAP_ANONYMOUS | libc::MAP_PRIVATE,
                    -1,
                    0,
                )
            };
            if v == libc::MAP_FAILED {
                let err = io::Error::last_os_error();
                unsafe {
                    libc::munmap(ram.cast(), ramsize as libc::size_t);
                    libc::close(ram_fd);
                }
                return Err(MemError::Mmap(err));
            }
            Some(v.cast::<u8>())
        } else {
            None
        };

        Ok(Self {
            ram: ram.cast(),
            ram_fd,
            ramsize,
            virt,
        })
    }

    #[must_use]
    pub const fn ramsize(&self) -> u64 {
        self.ramsize
    }

    #[must_use]
    pub const fn has_virtual_view(&self) -> bool {
        self.virt.is_some()
    }

    fn check_line(&self, addr: u64) -> Result<(), MemError> {
        if addr > self.ramsize.saturating_sub(harness_info::LINE_SIZE) {
            return Err(MemError::OutOfBounds {
                addr,
                ramsize: self.ramsize,
            });
        }
        Ok(())
    }

    /// Bounds-check a 64-byte-aligned line address against `ramsize`, without
    /// performing any access. Used by the bus coordinator to validate AR/AW
    /// addresses (§4.E step 3) before submitting a DRAM transaction.
    ///
    /// # Errors
    /// [`MemError::OutOfBounds`] if the line would extend past `ramsize`.
    pub fn check_line_in_bounds(&self, line_addr: u64) -> Result<(), MemError> {
        self.check_line(line_addr)
    }

    /// Host pointer to the byte at physical offset `phys`. Callers must
    /// already have bounds-checked `phys` (see [`Self::check_line`]).
    #[must_use]
    pub fn as_host_ptr(&self, phys: PhysAddr) -> *mut u8 {
        debug_assert!(phys.as_u64() < self.ramsize);
        // SAFETY: `phys` is within `ramsize` by caller contract, and `ram`
        // is a valid mapping of exactly `ramsize` bytes.
        unsafe { self.ram.add(phys.as_u64() as usize) }
    }

    /// Read an 8-byte little-endian word at physical offset `phys`.
    ///
    /// # Errors
    /// [`MemError::OutOfBounds`] if the aligned 64-byte window containing
    /// `phys` would exceed `ramsize`.
    pub fn read64(&self, phys: PhysAddr) -> Result<u64, MemError> {
        self.check_line(phys.line_base().as_u64())?;
        // SAFETY: bounds checked above; unaligned reads are fine on all
        // supported hosts.
        Ok(unsafe { self.as_host_ptr(phys).cast::<u64>().read_unaligned() })
    }

    /// Write an 8-byte little-endian word at physical offset `phys`.
    ///
    /// # Errors
    /// [`MemError::OutOfBounds`] as in [`Self::read64`].
    pub fn write64(&mut self, phys: PhysAddr, v: u64) -> Result<(), MemError> {
        self.check_line(phys.line_base().as_u64())?;
        // SAFETY: bounds checked above.
        unsafe { self.as_host_ptr(phys).cast::<u64>().write_unaligned(v) };
        Ok(())
    }

    /// Copy `src` into physical memory starting at `phys`.
    ///
    /// # Errors
    /// [`MemError::OutOfBounds`] if the last written byte would fall
    /// outside `ramsize`.
    pub fn write_bytes(&mut self, phys: PhysAddr, src: &[u8]) -> Result<(), MemError> {
        if src.is_empty() {
            return Ok(());
        }
        let last = phys.as_u64() + src.len() as u64 - 1;
        if last >= self.ramsize {
            return Err(MemError::OutOfBounds {
                addr: last,
                ramsize: self.ramsize,
            });
        }
        // SAFETY: bounds checked above; regions do not overlap (`src` is a
        // caller-owned slice, `ram` is our own mapping).
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), self.as_host_ptr(phys), src.len());
        }
        Ok(())
    }

    /// Write `v` into the virtual view at `virt`, for host-side access such
    /// as `set_errno` (§6). Requires the virtual view to exist.
    ///
    /// # Errors
    /// [`MemError::VirtualMemoryDisabled`] if no virtual view was created.
    pub fn write_virt(&mut self, virt: harness_info::VirtAddr, v: u8) -> Result<(), MemError> {
        let base = self.virt.ok_or(MemError::VirtualMemoryDisabled)?;
        // SAFETY: the walker guarantees the containing page has already
        // been faulted in (mapped) before this is called.
        unsafe { base.add(virt.as_u64() as usize).write(v) };
        Ok(())
    }

    /// Read from the virtual view at `virt`. See [`Self::write_virt`].
    ///
    /// # Errors
    /// [`MemError::VirtualMemoryDisabled`] if no virtual view was created.
    pub fn read_virt(&self, virt: harness_info::VirtAddr) -> Result<u8, MemError> {
        let base = self.virt.ok_or(MemError::VirtualMemoryDisabled)?;
        // SAFETY: as above.
        Ok(unsafe { base.add(virt.as_u64() as usize).read() })
    }

    /// Copy `src` into the virtual view starting at `virt`. Callers must
    /// already have faulted in every covered page via the walker.
    ///
    /// # Errors
    /// [`MemError::VirtualMemoryDisabled`] if no virtual view was created.
    pub fn write_virt_bytes(&mut self, virt: harness_info::VirtAddr, src: &[u8]) -> Result<(), MemError> {
        let base = self.virt.ok_or(MemError::VirtualMemoryDisabled)?;
        if src.is_empty() {
            return Ok(());
        }
        // SAFETY: the walker has faulted in every page covering
        // `[virt, virt + src.len())` before this is called.
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), base.add(virt.as_u64() as usize), src.len());
        }
        Ok(())
    }

    /// Remap the 4 KiB page containing `virt_page_base` (already page-aligned)
    /// onto the shared backing object at offset `phys_frame`. Called by the
    /// page-table walker exactly once per freshly allocated leaf (§4.B
    /// invariant).
    ///
    /// # Errors
    /// [`MemError::VirtualMemoryDisabled`] if no virtual view exists,
    /// [`MemError::Mmap`] if the remap itself fails.
    pub fn map_virtual_page(
        &mut self,
        virt_page_base: harness_info::VirtAddr,
        phys_frame: PhysAddr,
    ) -> Result<(), MemError> {
        let base = self.virt.ok_or(MemError::VirtualMemoryDisabled)?;
        // SAFETY: `base` plus `virt_page_base` stays within the `ramsize`
        // anonymous reservation because the walker's caller bounds-checks
        // virtual addresses against `ramsize` before calling in.
        let target = unsafe { base.add(virt_page_base.as_u64() as usize) };
        let mapped = unsafe {
            libc::mmap(
                target.cast(),
                harness_info::PAGE_SIZE as libc::size_t,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_FIXED,
                self.ram_fd,
                phys_frame.as_u64() as libc::off_t,
            )
        };
        if mapped == libc::MAP_FAILED || mapped.cast::<u8>() != target {
            return Err(MemError::Mmap(io::Error::last_os_error()));
        }
        Ok(())
    }
}

impl Drop for PhysicalMemory {
    fn drop(&mut self) {
        // SAFETY: `ram`/`virt` were established by `mmap` in `new` and are
        // unmapped exactly once here; `ram_fd` is closed after both unmaps.
        unsafe {
            libc::munmap(self.ram.cast(), self.ramsize as libc::size_t);
            if let Some(v) = self.virt {
                libc::munmap(v.cast(), self.ramsize as libc::size_t);
            }
            libc::close(self.ram_fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_round_trip() {
        let mut mem = PhysicalMemory::new(64 * 1024, false).unwrap();
        mem.write64(PhysAddr::new(0x100), 0xdead_beef_cafe_babe).unwrap();
        assert_eq!(mem.read64(PhysAddr::new(0x100)).unwrap(), 0xdead_beef_cafe_babe);
    }

    #[test]
    fn out_of_bounds_is_rejected() {
        let mem = PhysicalMemory::new(4096, false).unwrap();
        assert!(matches!(
            mem.read64(PhysAddr::new(4096 - 32)),
            Err(MemError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn virtual_view_requires_virtual_memory() {
        let mut mem = PhysicalMemory::new(4096, false).unwrap();
        assert!(matches!(
            mem.map_virtual_page(harness_info::VirtAddr::new(0), PhysAddr::new(0)),
            Err(MemError::VirtualMemoryDisabled)
        ));
    }

    #[test]
    fn mapped_virtual_page_aliases_physical_page() {
        let mut mem = PhysicalMemory::new(2 * 4096, true).unwrap();
        mem.map_virtual_page(harness_info::VirtAddr::new(0), PhysAddr::new(4096))
            .unwrap();
        mem.write_virt(harness_info::VirtAddr::new(10), 0x42).unwrap();
        // byte written through the virtual alias is visible at the backing offset
        let byte = unsafe { *mem.as_host_ptr(PhysAddr::new(4096 + 10)) };
        assert_eq!(byte, 0x42);
    }
}
