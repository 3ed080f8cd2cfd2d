//! A no-op [`HardwareModel`] used to smoke-test the wiring when no real
//! cycle-accurate core is attached (§1 — the hardware model itself is an
//! external collaborator, out of scope here). Never asserts any AXI
//! request; just observes whatever the bus coordinator drives back and
//! records the signals a real Verilator shim would read at start-up
//! (`entry`, `satp`, `stackptr`).

use harness_bus::{AxiAr, AxiAw, AxiW, HardwareModel};

#[derive(Default)]
pub struct IdleHardwareModel {
    pub finished: bool,
}

impl HardwareModel for IdleHardwareModel {
    fn reset(&self) -> bool {
        false
    }
    fn ar(&self) -> AxiAr {
        AxiAr::default()
    }
    fn aw(&self) -> AxiAw {
        AxiAw::default()
    }
    fn w(&self) -> AxiW {
        AxiW::default()
    }
    fn r_ready(&self) -> bool {
        true
    }
    fn b_ready(&self) -> bool {
        true
    }
    fn ac_ready(&self) -> bool {
        true
    }

    fn drive_entry(&mut self, entry: u64) {
        log::debug!("entry = {entry:#x}");
    }
    fn drive_satp(&mut self, satp: u64) {
        log::debug!("satp = {satp:#x}");
    }
    fn drive_stackptr(&mut self, sp: u64) {
        log::debug!("stackptr = {sp:#x}");
    }
    fn drive_timer_strobe(&mut self, fired: bool) {
        if fired {
            log::trace!("hz32768timer strobe");
        }
    }
    fn drive_ar_ready(&mut self, _ready: bool) {}
    fn drive_aw_ready(&mut self, _ready: bool) {}
    fn drive_w_ready(&mut self, _ready: bool) {}
    fn drive_r(&mut self, _r: harness_bus::AxiR) {}
    fn drive_b(&mut self, _valid: bool, _id: u16) {}
    fn drive_ac(&mut self, _valid: bool, _addr: u64, _snoop: u8) {}

    fn finish(&mut self) {
        self.finished = true;
    }
}
