use crate::{MemError, PageAllocator, PageTableEntry, PhysicalMemory};
use harness_info::{PAGE_SIZE, PAGE_TABLE_LEVELS, PTE_SIZE, PhysAddr, VPN_BITS_PER_LEVEL, VirtAddr};

/// Builds and walks the 4-level page table rooted at `satp << 12`, lazily
/// installing intermediate and leaf pages as new virtual addresses are
/// touched (§4.B). Mirrors the shape of the teacher's x86-64 `AddressSpace`
/// walker — typed per-level indices, lazy allocation via the page
/// allocator, leaf vs. non-leaf entries — over Sv39/Sv48's encoding instead
/// of x86-64's.
pub struct PageTableWalker {
    use_virtual_memory: bool,
}

impl PageTableWalker {
    #[must_use]
    pub const fn new(use_virtual_memory: bool) -> Self {
        Self { use_virtual_memory }
    }

    #[must_use]
    pub const fn virtual_memory_enabled(&self) -> bool {
        self.use_virtual_memory
    }

    /// Translate `virt` to a physical address, walking (and lazily
    /// extending) the table rooted at `satp` if virtual memory is enabled,
    /// or identity-mapping (bounds-checked) otherwise.
    ///
    /// # Errors
    /// [`MemError::OutOfBounds`] if the translated address would exceed
    /// `mem.ramsize()`, or any error the underlying memory reads/writes and
    /// virtual-page mapping can raise.
    pub fn virt_to_phy(
        &self,
        mem: &mut PhysicalMemory,
        alloc: &mut PageAllocator,
        satp: PhysAddr,
        virt: VirtAddr,
    ) -> Result<PhysAddr, MemError> {
        if !self.use_virtual_memory {
            if virt.as_u64() >= mem.ramsize() {
                return Err(MemError::OutOfBounds {
                    addr: virt.as_u64(),
                    ramsize: mem.ramsize(),
                });
            }
            return Ok(PhysAddr::new(virt.as_u64()));
        }

        let mut table_base = satp;
        let mut allocated_leaf = false;

        for level in 0..PAGE_TABLE_LEVELS {
            let is_leaf_level = level == PAGE_TABLE_LEVELS - 1;
            let shift = 12 + VPN_BITS_PER_LEVEL * (PAGE_TABLE_LEVELS - 1 - level) as u32;
            let vpn = (virt.as_u64() >> shift) & ((1 << VPN_BITS_PER_LEVEL) - 1);
            let pte_addr = table_base + vpn * PTE_SIZE;

            let mut pte = PageTableEntry::from_bits(mem.read64(pte_addr)?);
            if pte.valid() {
                allocated_leaf = false;
            } else {
                let frame = alloc.allocate()?;
                let ppn = frame.as_u64() >> 12;
                pte = if is_leaf_level {
                    PageTableEntry::leaf(ppn)
                } else {
                    PageTableEntry::non_leaf(ppn)
                };
                mem.write64(pte_addr, pte.into_bits())?;
                allocated_leaf = is_leaf_level;
            }

            table_base = PhysAddr::new(pte.ppn() << 12);
        }

        let phys = PhysAddr::new(table_base.as_u64() | virt.page_offset());
        if phys.as_u64() >= mem.ramsize() {
            return Err(MemError::OutOfBounds {
                addr: phys.as_u64(),
                ramsize: mem.ramsize(),
            });
        }

        if allocated_leaf {
            mem.map_virtual_page(virt.page_base(), table_base)?;
        }

        Ok(phys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_system(ramsize: u64) -> (PhysicalMemory, PageAllocator, PageTableWalker, PhysAddr) {
        let mut mem = PhysicalMemory::new(ramsize, true).unwrap();
        let mut alloc = PageAllocator::new(ramsize, 99);
        let walker = PageTableWalker::new(true);
        let satp = alloc.allocate().unwrap();
        // root table itself counts as the first allocated page
        let _ = &mut mem;
        (mem, alloc, walker, satp)
    }

    #[test]
    fn identity_map_when_virtual_memory_disabled() {
        let mut mem = PhysicalMemory::new(PAGE_SIZE * 4, false).unwrap();
        let mut alloc = PageAllocator::new(PAGE_SIZE * 4, 1);
        let walker = PageTableWalker::new(false);
        let phys = walker
            .virt_to_phy(&mut mem, &mut alloc, PhysAddr::new(0), VirtAddr::new(0x1234))
            .unwrap();
        assert_eq!(phys.as_u64(), 0x1234);
    }

    #[test]
    fn identity_map_rejects_out_of_range() {
        let mut mem = PhysicalMemory::new(PAGE_SIZE, false).unwrap();
        let mut alloc = PageAllocator::new(PAGE_SIZE, 1);
        let walker = PageTableWalker::new(false);
        assert!(
            walker
                .virt_to_phy(&mut mem, &mut alloc, PhysAddr::new(0), VirtAddr::new(PAGE_SIZE))
                .is_err()
        );
    }

    #[test]
    fn walk_allocates_four_levels_and_mirrors_leaf() {
        let ramsize = 64 * PAGE_SIZE;
        let (mut mem, mut alloc, walker, satp) = new_system(ramsize);
        assert_eq!(alloc.allocated_count(), 1); // satp's own page

        let phys = walker
            .virt_to_phy(&mut mem, &mut alloc, satp, VirtAddr::new(0x10_0000))
            .unwrap();
        // one allocation per level (4), plus the root already counted above
        assert_eq!(alloc.allocated_count(), 5);
        assert!(phys.as_u64() < ramsize);

        mem.write_virt(VirtAddr::new(0x10_0000), 0x77).unwrap();
        let byte = unsafe { *mem.as_host_ptr(phys) };
        assert_eq!(byte, 0x77);
    }

    #[test]
    fn repeated_walks_of_same_page_do_not_reallocate() {
        let ramsize = 64 * PAGE_SIZE;
        let (mut mem, mut alloc, walker, satp) = new_system(ramsize);
        let first = walker
            .virt_to_phy(&mut mem, &mut alloc, satp, VirtAddr::new(0x2000))
            .unwrap();
        let count_after_first = alloc.allocated_count();
        let second = walker
            .virt_to_phy(&mut mem, &mut alloc, satp, VirtAddr::new(0x2000))
            .unwrap();
        assert_eq!(first.as_u64(), second.as_u64());
        assert_eq!(alloc.allocated_count(), count_after_first);
    }

    #[test]
    fn distinct_virtual_pages_get_distinct_unique_frames() {
        let ramsize = 256 * PAGE_SIZE;
        let (mut mem, mut alloc, walker, satp) = new_system(ramsize);
        let mut seen = std::collections::HashSet::new();
        for i in 0..8u64 {
            let v = VirtAddr::new(i * PAGE_SIZE);
            let p = walker.virt_to_phy(&mut mem, &mut alloc, satp, v).unwrap();
            assert!(seen.insert(p.page_base().as_u64()));
        }
    }
}
