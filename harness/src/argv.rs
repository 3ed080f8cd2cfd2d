//! Argv/Stack Setup (§4.G, user-mode only). Grounded directly in
//! `examples/original_source/system.cpp`'s constructor, the only place the
//! original builds an initial stack image rather than leaving it to a
//! dynamic loader.

use harness_info::{PhysAddr, STACK_PAGES, STACK_RESERVE, VirtAddr};
use harness_mem::{MemError, PageAllocator, PageTableWalker, PhysicalMemory};

/// Lays out the initial stack for a user-mode guest and returns the stack
/// pointer the hart should start with.
///
/// Chooses a stack top `STACK_RESERVE` bytes below the end of RAM,
/// pre-faults the `STACK_PAGES` pages below it, then writes, starting at
/// the top: `argc`, `argc` pointers to the argv strings, an envp pointer
/// slot followed by its NULL terminator (the "NULL envp terminator pair"),
/// and finally the NUL-terminated argv strings themselves. Also pre-faults
/// virtual address 0, so a guest's auxv-derived null checks (e.g.
/// `_dl_random`) don't fault on an unmapped page.
///
/// # Errors
/// Any [`MemError`] the walker or the memory writes can raise — most
/// commonly running out of physical pages or `ramsize` being too small to
/// hold `argv`.
pub fn setup(
    mem: &mut PhysicalMemory,
    alloc: &mut PageAllocator,
    walker: &PageTableWalker,
    satp: PhysAddr,
    ramsize: u64,
    argv: &[String],
) -> Result<u64, MemError> {
    let stackptr = ramsize - STACK_RESERVE;

    for n in 1..STACK_PAGES {
        walker.virt_to_phy(mem, alloc, satp, VirtAddr::new(stackptr - harness_info::PAGE_SIZE * n))?;
    }

    let argc = argv.len() as u64;
    let table_phys = walker.virt_to_phy(mem, alloc, satp, VirtAddr::new(stackptr))?;
    mem.write64(table_phys, argc)?;

    // envp slot and its NULL terminator sit right after the argc pointers.
    let mut dst = stackptr + 8 + 8 * argc + 8 + 8;
    let envp_virt = VirtAddr::new(stackptr + 8 + 8 * argc);
    let envp_phys = walker.virt_to_phy(mem, alloc, satp, envp_virt)?;
    mem.write64(envp_phys, dst - 8)?;
    let env_term_phys = walker.virt_to_phy(mem, alloc, satp, envp_virt + 8)?;
    mem.write64(env_term_phys, 0)?;

    for (i, arg) in argv.iter().enumerate() {
        let ptr_virt = VirtAddr::new(stackptr + 8 + 8 * i as u64);
        let ptr_phys = walker.virt_to_phy(mem, alloc, satp, ptr_virt)?;
        mem.write64(ptr_phys, dst)?;

        for &byte in arg.as_bytes().iter().chain(std::iter::once(&0u8)) {
            walker.virt_to_phy(mem, alloc, satp, VirtAddr::new(dst))?;
            mem.write_virt(VirtAddr::new(dst), byte)?;
            dst += 1;
        }
    }

    walker.virt_to_phy(mem, alloc, satp, VirtAddr::new(0))?;

    Ok(stackptr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_system(ramsize: u64) -> (PhysicalMemory, PageAllocator, PageTableWalker, PhysAddr) {
        let mut mem = PhysicalMemory::new(ramsize, true).unwrap();
        let mut alloc = PageAllocator::new(ramsize, 3);
        let walker = PageTableWalker::new(true);
        let satp = alloc.allocate().unwrap();
        let _ = &mut mem;
        (mem, alloc, walker, satp)
    }

    #[test]
    fn lays_out_argc_and_pointers() {
        let ramsize = 16 * 1024 * 1024;
        let (mut mem, mut alloc, walker, satp) = new_system(ramsize);
        let argv = vec!["prog".to_string(), "arg1".to_string()];
        let sp = setup(&mut mem, &mut alloc, &walker, satp, ramsize, &argv).unwrap();
        assert_eq!(sp, ramsize - STACK_RESERVE);

        let table_phys = walker.virt_to_phy(&mut mem, &mut alloc, satp, VirtAddr::new(sp)).unwrap();
        assert_eq!(mem.read64(table_phys).unwrap(), 2);

        let arg0_ptr_phys = walker.virt_to_phy(&mut mem, &mut alloc, satp, VirtAddr::new(sp + 8)).unwrap();
        let arg0_addr = mem.read64(arg0_ptr_phys).unwrap();
        assert_eq!(arg0_addr, sp + 8 + 8 * 2 + 8 + 8);
    }

    #[test]
    fn prefaults_address_zero() {
        let ramsize = 16 * 1024 * 1024;
        let (mut mem, mut alloc, walker, satp) = new_system(ramsize);
        setup(&mut mem, &mut alloc, &walker, satp, ramsize, &[]).unwrap();
        // a second walk of the same address must not allocate again
        let before = alloc.allocated_count();
        walker.virt_to_phy(&mut mem, &mut alloc, satp, VirtAddr::new(0)).unwrap();
        assert_eq!(alloc.allocated_count(), before);
    }

    #[test]
    fn argv_strings_are_nul_terminated_in_virtual_view() {
        let ramsize = 16 * 1024 * 1024;
        let (mut mem, mut alloc, walker, satp) = new_system(ramsize);
        let argv = vec!["hi".to_string()];
        let sp = setup(&mut mem, &mut alloc, &walker, satp, ramsize, &argv).unwrap();
        let ptr_phys = walker.virt_to_phy(&mut mem, &mut alloc, satp, VirtAddr::new(sp + 8)).unwrap();
        let str_addr = mem.read64(ptr_phys).unwrap();
        assert_eq!(mem.read_virt(VirtAddr::new(str_addr)).unwrap(), b'h');
        assert_eq!(mem.read_virt(VirtAddr::new(str_addr + 1)).unwrap(), b'i');
        assert_eq!(mem.read_virt(VirtAddr::new(str_addr + 2)).unwrap(), 0);
    }
}
