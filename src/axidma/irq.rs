//! Interrupt line control.
//!
//! The driver masks its own interrupt lines to keep interrupt handlers away from the ring while
//! thread context mutates it, and to keep a handler from re-entering itself.

/// Enable state control of individual interrupt lines. Called from thread and interrupt
/// context alike.
pub trait InterruptControl {
    fn is_enabled(&self, irq: u32) -> bool;
    fn enable(&self, irq: u32);
    fn disable(&self, irq: u32);
}

impl<I: InterruptControl + ?Sized> InterruptControl for &I {
    #[inline(always)]
    fn is_enabled(&self, irq: u32) -> bool {
        I::is_enabled(self, irq)
    }

    #[inline(always)]
    fn enable(&self, irq: u32) {
        I::enable(self, irq)
    }

    #[inline(always)]
    fn disable(&self, irq: u32) {
        I::disable(self, irq)
    }
}

/// Interrupt lines of the two channels
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IrqLines {
    pub tx: u32,
    pub rx: u32,
}

/// Interrupt lines behind the Cortex-M NVIC
#[cfg(feature = "cortex-m")]
#[cfg_attr(docsrs, doc(cfg(feature = "cortex-m")))]
#[derive(Clone, Copy, Debug, Default)]
pub struct Nvic;

#[cfg(feature = "cortex-m")]
#[derive(Clone, Copy)]
struct IrqNumber(u16);

// Note (unsafe): the number is taken from the instance description, which names an existing
// NVIC line
#[cfg(feature = "cortex-m")]
unsafe impl cortex_m::interrupt::InterruptNumber for IrqNumber {
    fn number(self) -> u16 {
        self.0
    }
}

#[cfg(feature = "cortex-m")]
impl InterruptControl for Nvic {
    fn is_enabled(&self, irq: u32) -> bool {
        cortex_m::peripheral::NVIC::is_enabled(IrqNumber(irq as u16))
    }

    fn enable(&self, irq: u32) {
        // Note (unsafe): the line belongs to this driver, whose handlers tolerate spurious
        // invocations
        unsafe { cortex_m::peripheral::NVIC::unmask(IrqNumber(irq as u16)) }
    }

    fn disable(&self, irq: u32) {
        cortex_m::peripheral::NVIC::mask(IrqNumber(irq as u16));
    }
}
