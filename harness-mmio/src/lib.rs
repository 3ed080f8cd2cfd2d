//! Device table (§4.D): address-range routing for memory-mapped I/O, plus
//! the CLINT stub and UART-Lite model.
//!
//! Grounded directly in `examples/original_source/hardware.cpp`'s
//! `Device` record and `devices[]` table; the C function-pointer dispatch
//! maps onto a small trait object per §9 DESIGN NOTES, and the per-device
//! `write_addr` hook is dropped because in the original it is always the
//! same no-op bookkeeping the bus coordinator already performs generically
//! for every write (`write_one`), never device-specific logic.

mod clint;
mod uart_lite;

pub use clint::Clint;
pub use uart_lite::UartLite;

use thiserror::Error;

/// Protocol violations an [`MmioDevice`] can raise; the bus coordinator
/// logs these at `error!` and signals "finish" per §7.
#[derive(Debug, Error)]
pub enum MmioError {
    #[error("write request with unsupported strobe value {0:#x}")]
    UnsupportedStrobe(u8),

    #[error("{device} address {addr:#x} (register offset {offset}) is unsupported")]
    UnsupportedRegister {
        device: &'static str,
        addr: u64,
        offset: u64,
    },
}

/// A memory-mapped device. `addr` is the raw (unaligned) bus address from
/// the AR/AW channel; devices compute their own register offset from it.
pub trait MmioDevice {
    fn name(&self) -> &'static str;

    /// Handle a read request at `addr`; returns the 64-bit beat queued onto
    /// `r_queue`.
    ///
    /// # Errors
    /// An [`MmioError`] for an address this device does not implement.
    fn read(&mut self, addr: u64) -> Result<u64, MmioError>;

    /// Handle a write-data beat at `addr` (the matching AW address) with
    /// the given 64-bit data and byte-strobe.
    ///
    /// # Errors
    /// An [`MmioError`] for an unsupported strobe or address.
    fn write(&mut self, addr: u64, data: u64, strb: u8) -> Result<(), MmioError>;
}

struct Entry {
    base: u64,
    size: u64,
    device: Box<dyn MmioDevice>,
}

/// Fixed, linearly-scanned table of MMIO address ranges (§4.D). Matching is
/// a linear scan as in the original `full_system_hardware_match`; the
/// handful of entries here makes anything fancier unwarranted.
#[derive(Default)]
pub struct DeviceTable {
    entries: Vec<Entry>,
}

impl DeviceTable {
    #[must_use]
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn register(&mut self, base: u64, size: u64, device: Box<dyn MmioDevice>) {
        self.entries.push(Entry { base, size, device });
    }

    /// Returns the device whose `[base, base+size)` range contains `addr`,
    /// if any.
    pub fn matching(&mut self, addr: u64) -> Option<&mut dyn MmioDevice> {
        self.entries
            .iter_mut()
            .find(|e| addr >= e.base && addr < e.base + e.size)
            .map(|e| e.device.as_mut())
    }

    /// The default full-system table: CLINT and UART-Lite at the base
    /// addresses from `examples/original_source/hardware.cpp`, the
    /// resolution to the open base/size question in §9 DESIGN NOTES. Bases
    /// differ across known repository variants; callers that need a
    /// different layout should build their own [`DeviceTable`] instead.
    #[must_use]
    pub fn default_full_system() -> Self {
        let mut table = Self::new();
        table.register(0x70AE_EF00, 0x0001_0000, Box::new(Clint::new()));
        table.register(
            0x70BE_EF00,
            0x000C_0000,
            Box::new(UartLite::with_base(0x70BE_EF00, std::io::stdout())),
        );
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_registered_ranges_and_nothing_else() {
        let mut table = DeviceTable::default_full_system();
        assert!(table.matching(0x70AE_EF00).is_some());
        assert!(table.matching(0x70AE_EF00 + 0xFFFF).is_some());
        assert!(table.matching(0x70AE_EF00 + 0x1_0000).is_none());
        assert!(table.matching(0x70BE_EF04).is_some());
        assert!(table.matching(0).is_none());
    }
}
