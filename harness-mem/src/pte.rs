use bitfield_struct::bitfield;

/// A single 8-byte page-table entry: `(physical_page_number << 10) | flags`.
///
/// Mirrors the shape of the teacher's `PtEntry4k` (a `#[bitfield(u64)]` over
/// raw shifts/masks) but with the Sv39/Sv48-style layout spec.md §3
/// describes rather than x86-64's.
///
/// Two flag patterns are in use: a non-leaf entry has `valid` set and every
/// permission bit clear; a leaf entry has `valid`, `readable`, `writable`,
/// and `executable` all set.
#[bitfield(u64)]
pub struct PageTableEntry {
    pub valid: bool,
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
    #[bits(6)]
    __reserved: u8,
    #[bits(54)]
    pub ppn: u64,
}

impl PageTableEntry {
    /// A non-leaf (intermediate) entry pointing at `ppn`.
    #[must_use]
    pub fn non_leaf(ppn: u64) -> Self {
        Self::new().with_valid(true).with_ppn(ppn)
    }

    /// A leaf entry mapping `ppn`, readable/writable/executable.
    #[must_use]
    pub fn leaf(ppn: u64) -> Self {
        Self::new()
            .with_valid(true)
            .with_readable(true)
            .with_writable(true)
            .with_executable(true)
            .with_ppn(ppn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_leaf_has_no_permission_bits() {
        let e = PageTableEntry::non_leaf(0x1234);
        assert!(e.valid());
        assert!(!e.readable());
        assert!(!e.writable());
        assert!(!e.executable());
        assert_eq!(e.ppn(), 0x1234);
    }

    #[test]
    fn leaf_has_all_permission_bits() {
        let e = PageTableEntry::leaf(0x1234);
        assert!(e.valid());
        assert!(e.readable() && e.writable() && e.executable());
        assert_eq!(e.ppn(), 0x1234);
    }

    #[test]
    fn round_trips_through_bits() {
        let e = PageTableEntry::leaf(0xabcdef);
        let bits = e.into_bits();
        assert_eq!(PageTableEntry::from_bits(bits).ppn(), 0xabcdef);
    }
}
