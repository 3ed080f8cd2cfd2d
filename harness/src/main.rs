//! Top-level binary: CLI/config, logging, and the outer `tick` driver loop
//! (§0). Wires the five library crates together into a [`Harness`] and
//! drives it; a real integration replaces [`idle::IdleHardwareModel`] with
//! generated Verilator FFI bindings behind [`harness_bus::HardwareModel`].

mod args;
mod argv;
mod idle;
mod system;

use anyhow::Result;
use args::Args;
use clap::Parser;
use idle::IdleHardwareModel;
use system::Harness;

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut harness = Harness::new(&args)?;
    let mut hw = IdleHardwareModel::default();

    hw.drive_entry(harness.entry);
    hw.drive_satp(harness.satp.as_u64());
    hw.drive_stackptr(harness.stackptr);

    for cycle in 0..args.max_idle_cycles {
        if hw.finished {
            log::warn!("hardware model signaled finish at cycle {cycle}");
            break;
        }
        harness.tick(1, &mut hw);
        harness.tick(0, &mut hw);
    }

    Ok(())
}
