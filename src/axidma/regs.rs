//! Register interface of the two AXI DMA direction blocks.
//!
//! The controller exposes one register block per direction: MM2S (memory to stream, the TX
//! channel) at offset `0x00` and S2MM (stream to memory, the RX channel) at offset `0x30` from
//! the device base. Both blocks share the same layout, see [`Register`].

use core::ptr;

use tock_registers::{register_bitfields, LocalRegisterCopy};

/// Base offset of the MM2S (TX) register block.
pub const MM2S_REG_OFFSET: usize = 0x00;
/// Base offset of the S2MM (RX) register block.
pub const S2MM_REG_OFFSET: usize = 0x30;

register_bitfields! {
    u32,

    /// DMA control register
    pub DMACR [
        /// Run/stop
        RS OFFSET(0) NUMBITS(1) [],
        /// Soft reset, clears itself when the reset completed. Resets both directions.
        RESET OFFSET(2) NUMBITS(1) [],
        /// Fixed (keyhole) burst for MM2S reads
        KEYHOLE OFFSET(3) NUMBITS(1) [],
        /// Cyclic mode: hardware ignores the completed bit and overwrites descriptors
        CYC_BD_EN OFFSET(4) NUMBITS(1) [],
        /// Interrupt on complete
        IOC_IRQ_EN OFFSET(12) NUMBITS(1) [],
        /// Interrupt on delay timer timeout
        DLY_IRQ_EN OFFSET(13) NUMBITS(1) [],
        /// Interrupt on error
        ERR_IRQ_EN OFFSET(14) NUMBITS(1) [],
        /// Completed descriptors per completion interrupt
        IRQ_THRESHOLD OFFSET(16) NUMBITS(8) [],
        /// Delay timeout in units of 125 clock periods
        IRQ_DELAY OFFSET(24) NUMBITS(8) []
    ],

    /// DMA status register. The interrupt bits are write-1-to-clear.
    pub DMASR [
        /// Run/stop is cleared and outstanding operations completed; writing the tail does
        /// nothing
        HALTED OFFSET(0) NUMBITS(1) [],
        /// All descriptors up to the tail are processed; writing the tail restarts operation
        IDLE OFFSET(1) NUMBITS(1) [],
        /// Scatter gather engine included in the core
        SG_INCLD OFFSET(3) NUMBITS(1) [],
        DMA_INT_ERR OFFSET(4) NUMBITS(1) [],
        DMA_SLV_ERR OFFSET(5) NUMBITS(1) [],
        DMA_DEC_ERR OFFSET(6) NUMBITS(1) [],
        /// Fetched a descriptor whose complete bit was already set
        SG_INT_ERR OFFSET(8) NUMBITS(1) [],
        SG_SLV_ERR OFFSET(9) NUMBITS(1) [],
        SG_DEC_ERR OFFSET(10) NUMBITS(1) [],
        /// Completion interrupt pending
        IOC_IRQ OFFSET(12) NUMBITS(1) [],
        /// Delay timer interrupt pending
        DLY_IRQ OFFSET(13) NUMBITS(1) [],
        /// Error interrupt pending
        ERR_IRQ OFFSET(14) NUMBITS(1) [],
        /// Completions still missing until the next completion interrupt
        IRQ_THRESHOLD_STS OFFSET(16) NUMBITS(8) [],
        IRQ_DELAY_STS OFFSET(24) NUMBITS(8) []
    ]
}

/// Value of the DMACR register
pub type Control = LocalRegisterCopy<u32, DMACR::Register>;

/// Value of the DMASR register
pub type Status = LocalRegisterCopy<u32, DMASR::Register>;

/// The pending completion and delay interrupt bits of `status`, to be written back to
/// acknowledge them
#[inline(always)]
pub fn completion_irqs(status: Status) -> Status {
    status.bitand((DMASR::IOC_IRQ::SET + DMASR::DLY_IRQ::SET).value)
}

/// True when hardware is neither idle nor halted
#[inline(always)]
pub fn is_busy(status: Status) -> bool {
    !status.is_set(DMASR::IDLE) && !status.is_set(DMASR::HALTED)
}

/// Registers of one direction block, as offsets from the block base.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(usize)]
pub enum Register {
    /// DMA control register, see [`Control`]
    Dmacr = 0x00,
    /// DMA status register, see [`Status`]
    Dmasr = 0x04,
    /// Current descriptor address, bits 31:0
    Curdesc = 0x08,
    /// Current descriptor address, bits 63:32
    CurdescMsb = 0x0C,
    /// Tail descriptor address, bits 31:0
    Taildesc = 0x10,
    /// Tail descriptor address, bits 63:32
    TaildescMsb = 0x14,
}

impl Register {
    /// Offset of this register from the device base, given the base of its direction block
    #[inline(always)]
    pub const fn offset(self, block: usize) -> usize {
        block + self as usize
    }
}

/// Raw 32-bit access to the controller's register window. Offsets are relative to the device
/// base address.
///
/// Implemented by [`Mmio`] for real hardware. Test benches implement it over a simulated
/// register file. Thread and interrupt context reach the window at the same time, each on its
/// own direction block, so access goes through shared references.
pub trait Registers {
    fn read(&self, offset: usize) -> u32;
    fn write(&self, offset: usize, value: u32);
}

impl<R: Registers + ?Sized> Registers for &R {
    #[inline(always)]
    fn read(&self, offset: usize) -> u32 {
        R::read(self, offset)
    }

    #[inline(always)]
    fn write(&self, offset: usize, value: u32) {
        R::write(self, offset, value)
    }
}

/// Memory-mapped register window.
pub struct Mmio {
    base: *mut u8,
}

// Note (unsafe): the window is only touched through single volatile word accesses
unsafe impl Send for Mmio {}
unsafe impl Sync for Mmio {}

impl Mmio {
    /// Creates a register window at `base`.
    ///
    /// # Safety
    /// `base` must be the address of an AXI DMA register window that stays mapped for the life
    /// of the returned value, and nothing else may drive the same window concurrently.
    pub const unsafe fn new(base: usize) -> Self {
        Self {
            base: base as *mut u8,
        }
    }
}

impl Registers for Mmio {
    #[inline(always)]
    fn read(&self, offset: usize) -> u32 {
        // Note (unsafe): offset lies inside the window handed to `Mmio::new`
        unsafe { ptr::read_volatile(self.base.add(offset).cast::<u32>()) }
    }

    #[inline(always)]
    fn write(&self, offset: usize, value: u32) {
        // Note (unsafe): offset lies inside the window handed to `Mmio::new`
        unsafe { ptr::write_volatile(self.base.add(offset).cast::<u32>(), value) }
    }
}

/// One direction block of the register window
pub(crate) struct RegisterBlock<'a, R: Registers> {
    regs: &'a R,
    base: usize,
}

impl<'a, R: Registers> RegisterBlock<'a, R> {
    #[inline(always)]
    pub(crate) fn new(regs: &'a R, base: usize) -> Self {
        Self { regs, base }
    }

    #[inline(always)]
    fn read(&self, reg: Register) -> u32 {
        self.regs.read(reg.offset(self.base))
    }

    #[inline(always)]
    fn write(&self, reg: Register, value: u32) {
        self.regs.write(reg.offset(self.base), value);
    }

    #[inline(always)]
    pub(crate) fn control(&self) -> Control {
        Control::new(self.read(Register::Dmacr))
    }

    #[inline(always)]
    pub(crate) fn set_control(&self, control: Control) {
        self.write(Register::Dmacr, control.get());
    }

    #[inline(always)]
    pub(crate) fn status(&self) -> Status {
        Status::new(self.read(Register::Dmasr))
    }

    /// Write-1-to-clear the bits set in `bits`
    #[inline(always)]
    pub(crate) fn clear_status(&self, bits: Status) {
        self.write(Register::Dmasr, bits.get());
    }

    /// Tells hardware where a fresh walk of the ring begins
    pub(crate) fn set_current_descriptor(&self, address: usize) {
        self.write(Register::Curdesc, address as u32);
        #[cfg(target_pointer_width = "64")]
        self.write(Register::CurdescMsb, (address >> 32) as u32);
    }

    /// Publishes the last descriptor hardware may process, low half first
    pub(crate) fn set_tail_descriptor(&self, address: usize) {
        self.write(Register::Taildesc, address as u32);
        #[cfg(target_pointer_width = "64")]
        self.write(Register::TaildescMsb, (address >> 32) as u32);
    }
}
