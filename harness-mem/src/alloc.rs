use crate::MemError;
use fixedbitset::FixedBitSet;
use harness_info::{PAGE_SIZE, PhysAddr};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Physical-page allocator over a `ramsize / PAGE_SIZE`-bit used-set.
///
/// `allocate()` always returns a uniformly random *unused* page and never
/// deallocates, per spec.md §3 — deliberately, so it exposes guest
/// assumptions about page contiguity (§9 DESIGN NOTES). The PRNG is seeded
/// rather than taken from the OS entropy pool so a given seed reproduces the
/// same allocation sequence across runs, the way the independently
/// retrieved `hwgc_soft` harness's `FixedBitSet`-based allocators do.
pub struct PageAllocator {
    used: FixedBitSet,
    npages: usize,
    rng: ChaCha8Rng,
}

impl PageAllocator {
    #[must_use]
    pub fn new(ramsize: u64, seed: u64) -> Self {
        let npages = (ramsize / PAGE_SIZE) as usize;
        Self {
            used: FixedBitSet::with_capacity(npages),
            npages,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Number of pages already handed out.
    #[must_use]
    pub fn allocated_count(&self) -> usize {
        self.used.count_ones(..)
    }

    /// Allocate a fresh, never-before-returned physical page.
    ///
    /// # Errors
    /// Returns [`MemError::OutOfPhysicalPages`] once every page is in use.
    pub fn allocate(&mut self) -> Result<PhysAddr, MemError> {
        if self.allocated_count() >= self.npages {
            return Err(MemError::OutOfPhysicalPages {
                ramsize: self.npages as u64 * PAGE_SIZE,
            });
        }
        loop {
            let candidate = self.rng.random_range(0..self.npages);
            if !self.used[candidate] {
                self.used.set(candidate, true);
                return Ok(PhysAddr::new(candidate as u64 * PAGE_SIZE));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_returns_the_same_page_twice() {
        let mut alloc = PageAllocator::new(64 * PAGE_SIZE, 42);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..64 {
            let p = alloc.allocate().unwrap();
            assert!(seen.insert(p.as_u64()), "page {:#x} handed out twice", p.as_u64());
        }
        assert!(alloc.allocate().is_err());
    }

    #[test]
    fn pages_are_page_aligned_and_in_bounds() {
        let ramsize = 16 * PAGE_SIZE;
        let mut alloc = PageAllocator::new(ramsize, 7);
        for _ in 0..16 {
            let p = alloc.allocate().unwrap();
            assert_eq!(p.as_u64() % PAGE_SIZE, 0);
            assert!(p.as_u64() < ramsize);
        }
    }

    #[test]
    fn same_seed_reproduces_the_same_sequence() {
        let mut a = PageAllocator::new(256 * PAGE_SIZE, 1234);
        let mut b = PageAllocator::new(256 * PAGE_SIZE, 1234);
        for _ in 0..32 {
            assert_eq!(a.allocate().unwrap().as_u64(), b.allocate().unwrap().as_u64());
        }
    }
}
