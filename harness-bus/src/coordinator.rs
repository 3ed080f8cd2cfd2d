//! Bus Coordinator (§4.E): the per-clock AXI state machine that routes AR/AW/W
//! channel activity to the DRAM timing model or to an MMIO device, correlates
//! DRAM completions back to in-flight tags, and drives the R/B/AC response
//! channels in FIFO order.
//!
//! Grounded directly in `examples/original_source/system.cpp`'s `tick`,
//! `dram_read_complete`, `dram_write_complete`, `virt_to_phy`'s bounds check,
//! and `invalidate` — reshaped around Rust traits ([`DramModel`],
//! [`HardwareModel`], [`MmioDevice`]) in place of the original's direct
//! `Vtop*`/`DRAMSim` member access.

use crate::dram::{DramCallbacks, DramModel};
use crate::signals::{
    AC_SNOOP_MAKE_INVALID, AxiR, BURST_INCR, BURST_LEN_BEATS, BURST_WRAP, HardwareModel,
};
use harness_info::{DRAM_OFFSET, LINE_SIZE};
use harness_mem::PhysicalMemory;
use harness_mmio::DeviceTable;
use std::collections::{HashMap, VecDeque};

/// Tag recorded for an in-flight DRAM transaction: the raw (unaligned)
/// address the core issued, and the AXI id to echo back on completion.
#[derive(Debug, Clone, Copy)]
struct Tag {
    orig_addr: u64,
    id: u16,
}

#[derive(Debug, Clone, Copy)]
struct RBeat {
    data: u64,
    id: u16,
    last: bool,
}

/// The per-clock AXI state machine (§4.E). Owns the in-flight transaction
/// map and the three response queues; does not own the physical memory,
/// device table, or DRAM model, all of which are passed into [`Self::tick`]
/// so the bus coordinator stays a pure state machine over its own queues.
pub struct BusCoordinator {
    /// Amount subtracted from a bus address to get a physical offset:
    /// [`DRAM_OFFSET`] in full-system mode, `0` otherwise (§3).
    bus_base: u64,

    inflight: HashMap<u64, Tag>,
    r_queue: VecDeque<RBeat>,
    b_queue: VecDeque<u16>,
    snoop_queue: VecDeque<u64>,

    /// Address of the write burst currently being absorbed on the W
    /// channel; shared between the DRAM and MMIO paths exactly as the
    /// original's single `w_addr`/`w_count` pair is (an MMIO write is just
    /// a 1-beat burst instead of 8).
    w_addr: u64,
    w_count: u8,
    w_is_mmio: bool,
    /// AXI id of the AW request currently feeding an MMIO write burst;
    /// DRAM writes get their `b_queue` entry from the DRAM completion
    /// callback instead, since there is no such callback for MMIO.
    w_mmio_id: u16,
}

impl BusCoordinator {
    #[must_use]
    pub fn new(full_system: bool) -> Self {
        Self {
            bus_base: if full_system { DRAM_OFFSET } else { 0 },
            inflight: HashMap::new(),
            r_queue: VecDeque::new(),
            b_queue: VecDeque::new(),
            snoop_queue: VecDeque::new(),
            w_addr: 0,
            w_count: 0,
            w_is_mmio: false,
            w_mmio_id: 0,
        }
    }

    #[must_use]
    pub fn inflight_count(&self) -> usize {
        self.inflight.len()
    }

    #[must_use]
    pub fn r_queue_len(&self) -> usize {
        self.r_queue.len()
    }

    #[must_use]
    pub fn b_queue_len(&self) -> usize {
        self.b_queue.len()
    }

    #[must_use]
    pub fn snoop_queue_len(&self) -> usize {
        self.snoop_queue.len()
    }

    /// Insert `phys & ~63` into the snoop queue (§4.E `invalidate`). Used by
    /// `set_errno` (§6) after the harness writes into the guest's errno
    /// slot, so the guest's caches drop any stale copy of that line.
    pub fn invalidate(&mut self, phys: u64) {
        let line = phys & !(LINE_SIZE - 1);
        if !self.snoop_queue.contains(&line) {
            self.snoop_queue.push_back(line);
        }
    }

    /// Drive one simulated clock. `clk` is `0` on the negative edge (drain
    /// handshakes only) and `1` on the positive edge (advance the state
    /// machine).
    pub fn tick(
        &mut self,
        clk: u8,
        hw: &mut dyn HardwareModel,
        dram: &mut dyn DramModel,
        mem: &mut PhysicalMemory,
        devices: &mut DeviceTable,
    ) {
        // Backpressure-free by design (§5, §9 open question): the core
        // never sees its address channels stall.
        hw.drive_ar_ready(true);
        hw.drive_aw_ready(true);
        hw.drive_w_ready(true);

        if hw.reset() {
            self.do_reset(hw);
            return;
        }

        if clk == 0 {
            self.drain_handshakes(hw);
            return;
        }

        self.advance(hw, dram, mem, devices);
    }

    fn do_reset(&mut self, hw: &mut dyn HardwareModel) {
        if hw.ar().valid || hw.aw().valid {
            log::warn!("received a bus request during reset; ignoring");
        }
        self.inflight.clear();
        self.r_queue.clear();
        self.b_queue.clear();
        self.snoop_queue.clear();
        self.w_count = 0;
    }

    fn drain_handshakes(&mut self, hw: &mut dyn HardwareModel) {
        if !self.r_queue.is_empty() && hw.r_ready() {
            self.r_queue.pop_front();
        }
        if !self.b_queue.is_empty() && hw.b_ready() {
            self.b_queue.pop_front();
        }
        if !self.snoop_queue.is_empty() && hw.ac_ready() {
            self.snoop_queue.pop_front();
        }
    }

    fn advance(
        &mut self,
        hw: &mut dyn HardwareModel,
        dram: &mut dyn DramModel,
        mem: &mut PhysicalMemory,
        devices: &mut DeviceTable,
    ) {
        {
            let mut ctx = CallbackCtx { bus: self, mem: &*mem };
            dram.update(&mut ctx);
        }

        let ar = hw.ar();
        if ar.valid {
            match devices.matching(ar.addr) {
                Some(device) => match device.read(ar.addr) {
                    Ok(data) => self.read_response(data, ar.id, true),
                    Err(err) => {
                        log::error!("MMIO read at {:#x} failed: {err}", ar.addr);
                        hw.finish();
                    }
                },
                None => self.handle_read_address(ar.addr, ar.id, ar.burst, ar.len, hw, dram, mem),
            }
        }

        let aw = hw.aw();
        if aw.valid {
            match devices.matching(aw.addr) {
                Some(_device) => {
                    self.w_addr = aw.addr;
                    self.w_count = 1;
                    self.w_is_mmio = true;
                    self.w_mmio_id = aw.id;
                }
                None => self.handle_write_address(aw.addr, aw.id, aw.burst, aw.len, hw, dram, mem),
            }
        }

        let w = hw.w();
        if w.valid && self.w_count > 0 {
            if self.w_is_mmio {
                self.handle_write_data_mmio(w.data, w.strb, w.last, hw, devices);
            } else {
                self.handle_write_data_dram(w.data, w.last, hw, mem);
            }
        }

        self.drive_responses(hw);
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_read_address(
        &mut self,
        addr: u64,
        id: u16,
        burst: u8,
        len: u8,
        hw: &mut dyn HardwareModel,
        dram: &mut dyn DramModel,
        mem: &PhysicalMemory,
    ) {
        if burst != BURST_WRAP || len + 1 != BURST_LEN_BEATS {
            log::error!("read request with unsupported burst={burst} len={len}");
            hw.finish();
            return;
        }
        let line = addr & !(LINE_SIZE - 1);
        let phys_line = line.wrapping_sub(self.bus_base);
        if mem.check_line_in_bounds(phys_line).is_err() {
            log::error!("invalid 64-byte access, address {addr:#x} is beyond end of memory");
            hw.finish();
            return;
        }
        if self.inflight.contains_key(&line) {
            log::warn!("access for {line:#x} already outstanding; ignoring");
            return;
        }
        self.submit(false, line, addr, id, hw, dram);
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_write_address(
        &mut self,
        addr: u64,
        id: u16,
        burst: u8,
        len: u8,
        hw: &mut dyn HardwareModel,
        dram: &mut dyn DramModel,
        mem: &PhysicalMemory,
    ) {
        if burst != BURST_INCR || len + 1 != BURST_LEN_BEATS {
            log::error!("write request with unsupported burst={burst} len={len}");
            hw.finish();
            return;
        }
        let line = addr & !(LINE_SIZE - 1);
        let phys_line = line.wrapping_sub(self.bus_base);
        if mem.check_line_in_bounds(phys_line).is_err() {
            log::error!("invalid 64-byte access, address {addr:#x} is beyond end of memory");
            hw.finish();
            return;
        }
        self.w_addr = line;
        self.w_count = BURST_LEN_BEATS;
        self.w_is_mmio = false;
        if self.inflight.contains_key(&line) {
            log::warn!("access for {line:#x} already outstanding; ignoring");
            return;
        }
        self.submit(true, line, addr, id, hw, dram);
    }

    fn submit(
        &mut self,
        is_write: bool,
        line: u64,
        orig_addr: u64,
        id: u16,
        hw: &mut dyn HardwareModel,
        dram: &mut dyn DramModel,
    ) {
        if !dram.will_accept_transaction(line) {
            log::error!(
                "DRAM model refused to accept a transaction the AXI ready signal already promised"
            );
            hw.finish();
            return;
        }
        if !dram.add_transaction(is_write, line) {
            log::error!("DRAM model rejected an accepted transaction for {line:#x}");
            hw.finish();
            return;
        }
        self.inflight.insert(line, Tag { orig_addr, id });
    }

    fn handle_write_data_dram(
        &mut self,
        data: u64,
        last: bool,
        hw: &mut dyn HardwareModel,
        mem: &mut PhysicalMemory,
    ) {
        let beat = BURST_LEN_BEATS - self.w_count;
        let phys = (self.w_addr + u64::from(beat) * 8).wrapping_sub(self.bus_base);
        if let Err(err) = mem.write64(harness_info::PhysAddr::new(phys), data) {
            log::error!("write beat at {:#x} failed: {err}", self.w_addr);
            hw.finish();
            return;
        }
        self.w_count -= 1;
        if self.w_count == 0 && !last {
            log::error!("write burst ended without w_last asserted");
            hw.finish();
        }
    }

    fn handle_write_data_mmio(
        &mut self,
        data: u64,
        strb: u8,
        last: bool,
        hw: &mut dyn HardwareModel,
        devices: &mut DeviceTable,
    ) {
        if let Some(device) = devices.matching(self.w_addr)
            && let Err(err) = device.write(self.w_addr, data, strb)
        {
            log::error!("MMIO write at {:#x} failed: {err}", self.w_addr);
            hw.finish();
        }
        self.w_count -= 1;
        if self.w_count == 0 {
            if last {
                // MMIO writes have no DRAM completion callback to push the
                // response from, so the bus coordinator does it directly
                // once the (single-beat) burst is absorbed.
                self.b_queue.push_back(self.w_mmio_id);
            } else {
                log::error!("write burst ended without w_last asserted");
                hw.finish();
            }
        }
    }

    fn drive_responses(&self, hw: &mut dyn HardwareModel) {
        if let Some(beat) = self.r_queue.front() {
            hw.drive_r(AxiR {
                valid: true,
                data: beat.data,
                id: beat.id,
                last: beat.last,
            });
        } else {
            hw.drive_r(AxiR::default());
        }

        if let Some(&id) = self.b_queue.front() {
            hw.drive_b(true, id);
        } else {
            hw.drive_b(false, 0);
        }

        if let Some(&addr) = self.snoop_queue.front() {
            hw.drive_ac(true, addr, AC_SNOOP_MAKE_INVALID);
        } else {
            hw.drive_ac(false, 0, 0);
        }
    }

    /// Queue an immediate read response, bypassing the DRAM model entirely
    /// (§4.D MMIO short-circuit).
    fn read_response(&mut self, data: u64, id: u16, last: bool) {
        self.r_queue.push_back(RBeat { data, id, last });
    }
}

/// Borrows the bus coordinator and the physical memory for the lifetime of
/// a single `dram.update()` call, so DRAM completion callbacks (which fire
/// synchronously from inside `update`, §5) can read memory and push onto
/// the response queues without the bus coordinator needing to own the
/// memory store itself.
struct CallbackCtx<'a> {
    bus: &'a mut BusCoordinator,
    mem: &'a PhysicalMemory,
}

impl DramCallbacks for CallbackCtx<'_> {
    fn on_read_complete(&mut self, line_addr: u64) {
        let Some(tag) = self.bus.inflight.remove(&line_addr) else {
            log::warn!("DRAM read completion for untracked line {line_addr:#x}");
            return;
        };
        let phys_line = line_addr.wrapping_sub(self.bus.bus_base);
        let mut beat = 0u64;
        while beat < LINE_SIZE {
            let rotated = (tag.orig_addr.wrapping_add(beat)) & (LINE_SIZE - 1);
            let data = self
                .mem
                .read64(harness_info::PhysAddr::new(phys_line + rotated))
                .unwrap_or_else(|err| {
                    log::error!("read completion beat at {rotated:#x} failed: {err}");
                    0
                });
            let last = beat + 8 >= LINE_SIZE;
            self.bus.read_response(data, tag.id, last);
            beat += 8;
        }
    }

    fn on_write_complete(&mut self, line_addr: u64) {
        let Some(tag) = self.bus.inflight.remove(&line_addr) else {
            log::warn!("DRAM write completion for untracked line {line_addr:#x}");
            return;
        };
        self.bus.b_queue.push_back(tag.id);
        self.bus.invalidate(line_addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dram::SimpleDram;
    use crate::signals::{AxiAr, AxiAw, AxiW};
    use harness_mmio::DeviceTable;

    #[derive(Default)]
    struct FakeHw {
        reset: bool,
        ar: AxiAr,
        aw: AxiAw,
        w: AxiW,
        r_ready: bool,
        b_ready: bool,
        ac_ready: bool,
        last_r: AxiR,
        last_b: Option<u16>,
        last_ac: Option<(u64, u8)>,
        finished: bool,
    }

    impl HardwareModel for FakeHw {
        fn reset(&self) -> bool {
            self.reset
        }
        fn ar(&self) -> AxiAr {
            self.ar
        }
        fn aw(&self) -> AxiAw {
            self.aw
        }
        fn w(&self) -> AxiW {
            self.w
        }
        fn r_ready(&self) -> bool {
            self.r_ready
        }
        fn b_ready(&self) -> bool {
            self.b_ready
        }
        fn ac_ready(&self) -> bool {
            self.ac_ready
        }
        fn drive_entry(&mut self, _entry: u64) {}
        fn drive_satp(&mut self, _satp: u64) {}
        fn drive_stackptr(&mut self, _sp: u64) {}
        fn drive_timer_strobe(&mut self, _fired: bool) {}
        fn drive_ar_ready(&mut self, _ready: bool) {}
        fn drive_aw_ready(&mut self, _ready: bool) {}
        fn drive_w_ready(&mut self, _ready: bool) {}
        fn drive_r(&mut self, r: AxiR) {
            self.last_r = r;
        }
        fn drive_b(&mut self, valid: bool, id: u16) {
            self.last_b = valid.then_some(id);
        }
        fn drive_ac(&mut self, valid: bool, addr: u64, _snoop: u8) {
            self.last_ac = valid.then_some((addr, AC_SNOOP_MAKE_INVALID));
        }
        fn finish(&mut self) {
            self.finished = true;
        }
    }

    fn new_fixture() -> (BusCoordinator, SimpleDram, PhysicalMemory, DeviceTable, FakeHw) {
        let bus = BusCoordinator::new(false);
        let dram = SimpleDram::new(2, 8);
        let mem = PhysicalMemory::new(64 * 1024, false).unwrap();
        let devices = DeviceTable::new();
        let hw = FakeHw::default();
        (bus, dram, mem, devices, hw)
    }

    fn write_line(
        bus: &mut BusCoordinator,
        dram: &mut SimpleDram,
        mem: &mut PhysicalMemory,
        devices: &mut DeviceTable,
        hw: &mut FakeHw,
        addr: u64,
        id: u16,
        bytes: &[u8; 64],
    ) {
        hw.aw = AxiAw {
            valid: true,
            addr,
            id,
            len: 7,
            burst: BURST_INCR,
        };
        bus.tick(1, hw, dram, mem, devices);
        hw.aw.valid = false;

        for beat in 0..8 {
            let mut data = [0u8; 8];
            data.copy_from_slice(&bytes[beat * 8..beat * 8 + 8]);
            hw.w = AxiW {
                valid: true,
                data: u64::from_le_bytes(data),
                strb: 0xFF,
                last: beat == 7,
            };
            bus.tick(1, hw, dram, mem, devices);
        }
        hw.w.valid = false;

        // drain DRAM latency
        for _ in 0..4 {
            bus.tick(1, hw, dram, mem, devices);
            bus.tick(0, hw, dram, mem, devices);
        }
    }

    #[test]
    fn at_most_one_inflight_per_line() {
        let (mut bus, mut dram, mut mem, mut devices, mut hw) = new_fixture();
        hw.ar = AxiAr {
            valid: true,
            addr: 0x1000,
            id: 1,
            len: 7,
            burst: BURST_WRAP,
        };
        bus.tick(1, &mut hw, &mut dram, &mut mem, &mut devices);
        assert_eq!(bus.inflight_count(), 1);
        hw.ar.id = 2; // same line, different id
        bus.tick(1, &mut hw, &mut dram, &mut mem, &mut devices);
        assert_eq!(bus.inflight_count(), 1, "second request to the same line must be dropped");
        assert!(!hw.finished);
    }

    #[test]
    fn reset_clears_all_state() {
        let (mut bus, mut dram, mut mem, mut devices, mut hw) = new_fixture();
        hw.ar = AxiAr {
            valid: true,
            addr: 0x40,
            id: 3,
            len: 7,
            burst: BURST_WRAP,
        };
        bus.tick(1, &mut hw, &mut dram, &mut mem, &mut devices);
        assert_eq!(bus.inflight_count(), 1);

        hw.reset = true;
        bus.tick(1, &mut hw, &mut dram, &mut mem, &mut devices);
        assert_eq!(bus.inflight_count(), 0);
        assert_eq!(bus.r_queue_len(), 0);
        assert_eq!(bus.b_queue_len(), 0);
        assert_eq!(bus.snoop_queue_len(), 0);
    }

    #[test]
    fn wrap_burst_round_trips_written_line_s3() {
        let (mut bus, mut dram, mut mem, mut devices, mut hw) = new_fixture();
        let mut bytes = [0u8; 64];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = i as u8;
        }
        let line = 0x1000u64;
        write_line(&mut bus, &mut dram, &mut mem, &mut devices, &mut hw, line, 9, &bytes);

        hw.ar = AxiAr {
            valid: true,
            addr: line + 16,
            id: 9,
            len: 7,
            burst: BURST_WRAP,
        };
        hw.r_ready = true;
        bus.tick(1, &mut hw, &mut dram, &mut mem, &mut devices);
        hw.ar.valid = false;

        for _ in 0..4 {
            bus.tick(1, &mut hw, &mut dram, &mut mem, &mut devices);
            bus.tick(0, &mut hw, &mut dram, &mut mem, &mut devices);
        }

        let mut collected = Vec::new();
        loop {
            bus.tick(1, &mut hw, &mut dram, &mut mem, &mut devices);
            if bus.r_queue_len() == 0 {
                break;
            }
            collected.push(hw.last_r.data.to_le_bytes());
            bus.tick(0, &mut hw, &mut dram, &mut mem, &mut devices);
        }

        let expected_offsets = [16, 24, 32, 40, 48, 56, 0, 8];
        assert_eq!(collected.len(), expected_offsets.len());
        for (beat, &off) in expected_offsets.iter().enumerate() {
            assert_eq!(collected[beat], bytes[off..off + 8]);
        }
    }

    #[test]
    fn snoop_fires_after_write_complete_s6() {
        let (mut bus, mut dram, mut mem, mut devices, mut hw) = new_fixture();
        let bytes = [0u8; 64];
        write_line(&mut bus, &mut dram, &mut mem, &mut devices, &mut hw, 0x2000, 4, &bytes);
        assert_eq!(hw.last_ac, Some((0x2000, AC_SNOOP_MAKE_INVALID)));
    }
}
