//! Critical sections guarding the rings against the driver's own interrupt handlers.
//!
//! Three granularities are available, trading interrupt latency of the rest of the system for
//! the width of the section:
//!
//! - [`LockAll`] masks every interrupt through the `critical-section` implementation
//! - [`LockDmaIrqs`] masks both interrupt lines of the controller
//! - [`LockChannelIrq`] masks only the line of the channel being operated on
//!
//! Every strategy records the enable state it found and restores exactly that state, so an
//! enclosing section is never reopened early.

use super::{
    config::ChannelId,
    irq::{InterruptControl, IrqLines},
};
use crate::Sealed;

/// A critical section strategy. Sealed; pick one of the three implementations as the lock type
/// parameter of [`AxiDma`](super::AxiDma).
#[allow(private_bounds)]
pub trait LockStrategy: Sealed {
    /// State needed to restore what `lock` found
    type Key;

    fn lock<I: InterruptControl>(
        irqs: &I,
        lines: IrqLines,
        channel: ChannelId,
    ) -> Self::Key;

    fn unlock<I: InterruptControl>(
        irqs: &I,
        lines: IrqLines,
        channel: ChannelId,
        key: Self::Key,
    );
}

/// Masks all interrupts
pub struct LockAll;

/// Masks both interrupt lines of the controller
pub struct LockDmaIrqs;

/// Masks the interrupt line of the channel in use
pub struct LockChannelIrq;

impl Sealed for LockAll {}
impl Sealed for LockDmaIrqs {}
impl Sealed for LockChannelIrq {}

impl LockStrategy for LockAll {
    type Key = critical_section::RestoreState;

    fn lock<I: InterruptControl>(
        _irqs: &I,
        _lines: IrqLines,
        _channel: ChannelId,
    ) -> Self::Key {
        // Note (unsafe): the driver always pairs this with `unlock` in the same scope
        unsafe { critical_section::acquire() }
    }

    fn unlock<I: InterruptControl>(
        _irqs: &I,
        _lines: IrqLines,
        _channel: ChannelId,
        key: Self::Key,
    ) {
        // Note (unsafe): key comes from the matching `acquire`
        unsafe { critical_section::release(key) }
    }
}

const TX_WAS_ENABLED: u8 = 1 << 0;
const RX_WAS_ENABLED: u8 = 1 << 1;

impl LockStrategy for LockDmaIrqs {
    type Key = u8;

    fn lock<I: InterruptControl>(
        irqs: &I,
        lines: IrqLines,
        _channel: ChannelId,
    ) -> u8 {
        let mut key = 0;
        if irqs.is_enabled(lines.tx) {
            key |= TX_WAS_ENABLED;
        }
        if irqs.is_enabled(lines.rx) {
            key |= RX_WAS_ENABLED;
        }
        trace!(
            "DMA IRQ state: {:#x} TX IRQN: {} RX IRQN: {}",
            key,
            lines.tx,
            lines.rx
        );

        irqs.disable(lines.tx);
        irqs.disable(lines.rx);
        key
    }

    fn unlock<I: InterruptControl>(
        irqs: &I,
        lines: IrqLines,
        _channel: ChannelId,
        key: u8,
    ) {
        if key & TX_WAS_ENABLED != 0 {
            irqs.enable(lines.tx);
        }
        if key & RX_WAS_ENABLED != 0 {
            irqs.enable(lines.rx);
        }
    }
}

impl LockStrategy for LockChannelIrq {
    type Key = bool;

    fn lock<I: InterruptControl>(
        irqs: &I,
        lines: IrqLines,
        channel: ChannelId,
    ) -> bool {
        let irq = line(lines, channel);
        let was_enabled = irqs.is_enabled(irq);
        trace!("DMA IRQ state: {}", was_enabled);

        irqs.disable(irq);
        was_enabled
    }

    fn unlock<I: InterruptControl>(
        irqs: &I,
        lines: IrqLines,
        channel: ChannelId,
        was_enabled: bool,
    ) {
        if was_enabled {
            irqs.enable(line(lines, channel));
        }
    }
}

#[inline(always)]
fn line(lines: IrqLines, channel: ChannelId) -> u32 {
    match channel {
        ChannelId::Tx => lines.tx,
        ChannelId::Rx => lines.rx,
    }
}
