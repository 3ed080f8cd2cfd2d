//! Command-line configuration for the harness binary, in the shape of the
//! teacher's host-side tooling (`bootimage-builder`'s `Args`): a `clap`
//! derive struct for everything that is genuinely a run-time knob, leaving
//! `HAVETLB`/`FULLSYSTEM` as environment variables since §6 specifies them
//! as an external contract rather than as flags.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "harness", about = "AXI/DRAM simulation harness")]
pub struct Args {
    /// Path to the guest binary: an ELF in user mode, a raw image in
    /// full-system mode (`FULLSYSTEM=Y`).
    pub binary: PathBuf,

    /// Size of the simulated RAM region, in bytes. Must be a multiple of
    /// the page size.
    #[arg(long, default_value_t = 64 * 1024 * 1024)]
    pub ramsize: u64,

    /// Simulated clock period, in picoseconds; drives the RTC divider
    /// (§4.F) and the DRAM model's clock.
    #[arg(long, default_value_t = 1000)]
    pub ps_per_clock: u64,

    /// Seed for the physical-page allocator's PRNG (§9 DESIGN NOTES:
    /// random allocation is deliberate, a fixed seed keeps it reproducible).
    #[arg(long, default_value_t = 0x5EED)]
    pub page_alloc_seed: u64,

    /// Upper bound on simulated clocks to drive before exiting, when no
    /// external hardware model is attached (see [`crate::idle`]).
    #[arg(long, default_value_t = 64)]
    pub max_idle_cycles: u64,

    /// Arguments passed to the guest program (`argc`/`argv`, §4.G).
    /// Ignored in full-system mode.
    #[arg(trailing_var_arg = true)]
    pub guest_argv: Vec<String>,
}
