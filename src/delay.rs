//! Delay providers
//!
//! The driver only blocks while it waits for the soft reset to complete, through any
//! [`DelayNs`] implementation. [`Spin`] is a calibrated busy wait for targets without a spare
//! timer:
//!
//! ```
//! use axi_dma_hal::{delay::Spin, prelude::*};
//! use embedded_hal::delay::DelayNs;
//!
//! let mut delay = Spin::new(100.MHz());
//! delay.delay_us(10);
//! ```

use embedded_hal::delay::DelayNs;
use fugit::SecsDurationU64;

use crate::time::Hertz;

/// Busy waits a number of core clock cycles
pub struct Spin {
    core_hz: u32,
}

fn calc_cycles(ns: u32, core_hz: u32) -> u64 {
    let ns_per_sec: u64 = SecsDurationU64::secs(1).to_nanos();
    (ns as u64 * core_hz as u64).div_ceil(ns_per_sec)
}

impl Spin {
    /// A delay provider for a core running at `core_clock`
    pub fn new(core_clock: Hertz) -> Self {
        Spin {
            core_hz: core_clock.raw(),
        }
    }
}

impl DelayNs for Spin {
    fn delay_ns(&mut self, ns: u32) {
        let mut cycles = calc_cycles(ns, self.core_hz);

        while cycles != 0 {
            let current = cycles.min(u32::MAX as u64) as u32;
            cycles -= current as u64;

            #[cfg(feature = "cortex-m")]
            cortex_m::asm::delay(current);
            #[cfg(not(feature = "cortex-m"))]
            for _ in 0..current {
                core::hint::spin_loop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::calc_cycles;
    #[test]
    fn test_calc_cycles() {
        assert_eq!(calc_cycles(1000, 1_000_000), 1);
        assert_eq!(calc_cycles(1_000_000, 8_000_000), 8000);
        assert_eq!(calc_cycles(1_000_000, 250_000_000), 250_000);
        // Partial cycles round up
        assert_eq!(calc_cycles(1, 100_000_000), 1);
        assert_eq!(calc_cycles(0, 100_000_000), 0);
        assert_eq!(calc_cycles(u32::MAX, u32::MAX), 18_446_744_066);
    }
}
