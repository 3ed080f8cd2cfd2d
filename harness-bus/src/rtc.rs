//! Tick/IRQ Driver (§4.F): the RTC divider producing the 32.768 kHz timer
//! strobe driven into `hz32768timer` once per simulated clock.

use harness_info::RTC_HZ;

/// Picosecond countdown that pulses once every `1e12 / 32768 / ps_per_clock`
/// calls to [`Self::tick`], reloading automatically.
pub struct RtcDivider {
    reload: u64,
    countdown: u64,
}

impl RtcDivider {
    #[must_use]
    pub fn new(ps_per_clock: u64) -> Self {
        let reload = reload_value(ps_per_clock);
        Self {
            reload,
            countdown: reload,
        }
    }

    /// Advance by one simulated clock. Returns `true` exactly on the clock
    /// the `hz32768timer` strobe should pulse high.
    pub fn tick(&mut self) -> bool {
        self.countdown -= 1;
        if self.countdown == 0 {
            self.countdown = self.reload;
            true
        } else {
            false
        }
    }

    /// Reset-clear bookkeeping (§2): reload the countdown so the next pulse
    /// is a full period away, the way the bus coordinator clears its own
    /// state on reset.
    pub fn reset(&mut self) {
        self.countdown = self.reload;
    }
}

fn reload_value(ps_per_clock: u64) -> u64 {
    1_000_000_000_000 / RTC_HZ / ps_per_clock
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pulses_exactly_once_per_period() {
        let mut rtc = RtcDivider::new(1000); // 1 GHz clock
        let period = reload_value(1000);
        let mut pulses = 0;
        for _ in 0..period * 3 {
            if rtc.tick() {
                pulses += 1;
            }
        }
        assert_eq!(pulses, 3);
    }

    #[test]
    fn reset_reloads_a_full_period() {
        let mut rtc = RtcDivider::new(1000);
        let period = reload_value(1000);
        for _ in 0..period - 1 {
            assert!(!rtc.tick());
        }
        rtc.reset();
        for _ in 0..period - 1 {
            assert!(!rtc.tick());
        }
        assert!(rtc.tick());
    }
}
