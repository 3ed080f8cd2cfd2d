//! Top-level wiring (§0, §6): builds every component crate into one
//! `Harness`, the explicit handle that stands in for the original's
//! `System::sys` process-wide singleton (§9 DESIGN NOTES) — callers pass it
//! around instead of reaching through a global, the same way
//! [`harness_bus::BusCoordinator`]'s `CallbackCtx` is threaded through a
//! single `tick()` call instead of a static pointer.

use anyhow::{Context, Result, bail};
use harness_bus::{BusCoordinator, HardwareModel, RtcDivider, SimpleDram};
use harness_image::LoadedImage;
use harness_info::{PhysAddr, VirtAddr};
use harness_mem::{PageAllocator, PageTableWalker, PhysicalMemory};
use harness_mmio::DeviceTable;
use std::path::Path;

use crate::args::Args;
use crate::argv;

/// Simulated DRAM timing parameters for the built-in [`SimpleDram`] model.
/// A real integration would replace this with a DRAMSim2/DRAMSim3 binding
/// (§1 — explicitly out of scope here).
const DRAM_LATENCY_CYCLES: u32 = 20;
const DRAM_MAX_OUTSTANDING: usize = 32;

/// Everything the bus coordinator needs each clock, wired together once at
/// start-up: physical memory, the page-table walker and allocator, the
/// device table, the bus coordinator itself, its DRAM model, and the RTC
/// divider driving the timer strobe.
pub struct Harness {
    pub mem: PhysicalMemory,
    pub alloc: PageAllocator,
    pub walker: PageTableWalker,
    pub devices: DeviceTable,
    pub bus: BusCoordinator,
    pub dram: SimpleDram,
    pub rtc: RtcDivider,

    pub satp: PhysAddr,
    pub entry: u64,
    pub stackptr: u64,
    pub ecall_brk: u64,
    pub errno_slot: Option<VirtAddr>,

    full_system: bool,
}

impl Harness {
    /// Build a harness from CLI configuration and the `HAVETLB`/
    /// `FULLSYSTEM` environment contract (§6). Loads the guest image,
    /// and, in user mode, lays out the initial stack (§4.G).
    ///
    /// # Errors
    /// Fails if `HAVETLB` and `FULLSYSTEM` are both set (mutually
    /// exclusive per §6), or if any underlying resource/image/stack-setup
    /// step fails; all such failures are host resource or configuration
    /// failures, not guest protocol violations, so they are reported here
    /// with `anyhow` context rather than routed through `finish()`.
    pub fn new(args: &Args) -> Result<Self> {
        let use_virtual_memory = env_flag("HAVETLB");
        let full_system = env_flag("FULLSYSTEM");
        if use_virtual_memory && full_system {
            bail!("HAVETLB and FULLSYSTEM are mutually exclusive");
        }

        let mut mem = PhysicalMemory::new(args.ramsize, use_virtual_memory)
            .context("failed to create the guest RAM region")?;
        let mut alloc = PageAllocator::new(args.ramsize, args.page_alloc_seed);
        let walker = PageTableWalker::new(use_virtual_memory);

        let devices = if full_system {
            DeviceTable::default_full_system()
        } else {
            DeviceTable::new()
        };

        let (image, satp, stackptr) = if full_system {
            let image = harness_image::load_full_system(&mut mem, &args.binary)
                .with_context(|| format!("failed to load {}", args.binary.display()))?;
            (image, PhysAddr::new(0), 0)
        } else {
            if !use_virtual_memory {
                bail!("user-mode image loading requires HAVETLB=Y");
            }
            let satp = alloc
                .allocate()
                .context("failed to allocate the root page-table frame")?;
            let image = load_user_image(&mut mem, &mut alloc, &walker, satp, &args.binary)?;
            let stackptr = argv::setup(&mut mem, &mut alloc, &walker, satp, args.ramsize, &args.guest_argv)
                .context("failed to lay out the initial guest stack")?;
            (image, satp, stackptr)
        };

        let bus = BusCoordinator::new(full_system);
        let dram = SimpleDram::new(DRAM_LATENCY_CYCLES, DRAM_MAX_OUTSTANDING);
        let rtc = RtcDivider::new(args.ps_per_clock);

        let ecall_brk = image.max_elf_addr;
        log::info!(
            "harness ready: entry={:#x} satp={:#x} stackptr={:#x} ecall_brk={:#x} full_system={}",
            image.entry,
            satp.as_u64(),
            stackptr,
            ecall_brk,
            full_system,
        );

        Ok(Self {
            mem,
            alloc,
            walker,
            devices,
            bus,
            dram,
            rtc,
            satp,
            entry: image.entry,
            stackptr,
            ecall_brk,
            errno_slot: image.errno_slot,
            full_system,
        })
    }

    /// Drive every component through one simulated clock: the RTC divider
    /// feeds its strobe into the hardware model, then the bus coordinator
    /// advances (§4.E, §4.F).
    pub fn tick(&mut self, clk: u8, hw: &mut dyn HardwareModel) {
        if clk == 1 {
            let fired = self.rtc.tick();
            hw.drive_timer_strobe(fired);
        }
        self.bus.tick(clk, hw, &mut self.dram, &mut self.mem, &mut self.devices);
    }

    /// Write `value` into the guest's TLS `errno` slot and invalidate the
    /// containing line so the guest's caches drop any stale copy (§6).
    /// A no-op if the image had no `PT_TLS` segment.
    ///
    /// # Errors
    /// Any [`harness_mem::MemError`] the virtual-view write can raise.
    pub fn set_errno(&mut self, value: i32) -> Result<(), harness_mem::MemError> {
        let Some(slot) = self.errno_slot else {
            return Ok(());
        };
        mem_write_i32(&mut self.mem, slot, value)?;
        let phys = self.walker.virt_to_phy(&mut self.mem, &mut self.alloc, self.satp, slot)?;
        self.bus.invalidate(phys.as_u64());
        Ok(())
    }

    #[must_use]
    pub const fn full_system(&self) -> bool {
        self.full_system
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .ok()
        .and_then(|v| v.chars().next())
        .is_some_and(|c| c.to_ascii_uppercase() == 'Y')
}

fn load_user_image(
    mem: &mut PhysicalMemory,
    alloc: &mut PageAllocator,
    walker: &PageTableWalker,
    satp: PhysAddr,
    path: &Path,
) -> Result<LoadedImage> {
    harness_image::load_elf_user(mem, alloc, walker, satp, path)
        .with_context(|| format!("failed to load ELF image {}", path.display()))
}

fn mem_write_i32(mem: &mut PhysicalMemory, virt: VirtAddr, value: i32) -> Result<(), harness_mem::MemError> {
    for (i, byte) in value.to_le_bytes().into_iter().enumerate() {
        mem.write_virt(virt + i as u64, byte)?;
    }
    Ok(())
}
