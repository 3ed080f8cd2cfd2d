//! Bus Coordinator and Tick/IRQ Driver (§4.E, §4.F): the per-clock AXI
//! state machine and the RTC strobe that drives it, the core of the
//! simulation harness.
//!
//! Grounded in `examples/original_source/system.cpp`'s `tick`/`dram_*_complete`
//! and `examples/original_source/hardware.cpp`'s device dispatch, reshaped
//! around the [`HardwareModel`]/[`DramModel`]/[`harness_mmio::MmioDevice`]
//! trait seams spec.md §6 calls for.

mod coordinator;
mod dram;
mod rtc;
mod signals;

pub use coordinator::BusCoordinator;
pub use dram::{DramCallbacks, DramModel, SimpleDram};
pub use rtc::RtcDivider;
pub use signals::{
    AC_SNOOP_MAKE_INVALID, AxiAr, AxiAw, AxiR, AxiW, BURST_INCR, BURST_LEN_BEATS, BURST_WRAP,
    HardwareModel,
};
