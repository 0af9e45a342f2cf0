//! Driver for the AXI DMA scatter-gather engine.
//!
//! The engine moves data between memory and an AXI-Stream device. It has exactly two channels:
//! - TX (MM2S, channel 0) reads memory and feeds the stream
//! - RX (S2MM, channel 1) takes the stream and writes memory
//!
//! Each channel walks a closed ring of [`Descriptor`]s. Software writes a descriptor per buffer
//! leg and publishes the last written one as the *tail*; hardware walks up to the tail, marks each
//! descriptor with its completion status and raises an interrupt. The interrupt handler reclaims
//! finished descriptors in ring order and reports each one to the channel callback.
//!
//! # Usage
//!
//! The driver owns the register window, an [`InterruptControl`] implementation for the two
//! interrupt lines, a [`CacheMaintenance`] implementation and the descriptor storage of both
//! rings. The integrator routes the two interrupt vectors to [`AxiDma::on_tx_interrupt`] and
//! [`AxiDma::on_rx_interrupt`].
//!
//! ```no_run
//! use axi_dma_hal::axidma::{
//!     AxiDma, BlockConfig, Coherent, Config, Descriptor, DmaConfig, InterruptControl, Mmio,
//!     TransferDirection,
//! };
//! use axi_dma_hal::{delay::Spin, prelude::*};
//!
//! # struct Plic;
//! # impl InterruptControl for Plic {
//! #     fn is_enabled(&self, _irq: u32) -> bool { false }
//! #     fn enable(&self, _irq: u32) {}
//! #     fn disable(&self, _irq: u32) {}
//! # }
//! let mut tx_descriptors = [Descriptor::EMPTY; 16];
//! let mut rx_descriptors = [Descriptor::EMPTY; 16];
//! let mut delay = Spin::new(100.MHz());
//!
//! // Note (unsafe): the register window of the instance at 0x4040_0000
//! let regs = unsafe { Mmio::new(0x4040_0000) };
//! let dma: AxiDma<Mmio, Plic, Coherent> = AxiDma::new(
//!     regs,
//!     Plic,
//!     Coherent,
//!     Config::new(30, 31),
//!     &mut tx_descriptors,
//!     &mut rx_descriptors,
//!     &mut delay,
//! )
//! .unwrap();
//!
//! let frame = [0u8; 64];
//! let blocks = [BlockConfig::source(&frame)];
//! dma.configure(0, &DmaConfig::new(TransferDirection::MemoryToPeripheral, &blocks))
//!     .unwrap();
//! dma.start(0).unwrap();
//! ```
//!
//! # Concurrency
//!
//! Every operation takes `&self`, so thread context and both interrupt handlers share one
//! driver, typically through a `static`. Operations that touch a ring run inside a critical
//! section chosen through the `L` type parameter of [`AxiDma`], see [`lock`]. The interrupt
//! handlers mask their own line while they run and restore its previous enable state
//! afterwards.
//!
//! Each channel is additionally claimed for the duration of an operation. A thread operation
//! that finds its channel claimed by another context returns [`Error::Busy`]; an interrupt
//! handler that finds it claimed leaves the interrupt pending so it fires again once the line is
//! restored.
//!
//! ```no_run
//! use core::cell::Cell;
//!
//! use axi_dma_hal::axidma::{AxiDma, Coherent, Config, Descriptor, InterruptControl, Mmio};
//! use axi_dma_hal::{delay::Spin, prelude::*};
//! use critical_section::Mutex;
//! use static_cell::StaticCell;
//!
//! # struct Plic;
//! # impl InterruptControl for Plic {
//! #     fn is_enabled(&self, _irq: u32) -> bool { false }
//! #     fn enable(&self, _irq: u32) {}
//! #     fn disable(&self, _irq: u32) {}
//! # }
//! type Dma = AxiDma<'static, Mmio, Plic, Coherent>;
//!
//! static TX_DESCRIPTORS: StaticCell<[Descriptor; 16]> = StaticCell::new();
//! static RX_DESCRIPTORS: StaticCell<[Descriptor; 16]> = StaticCell::new();
//! static DRIVER: StaticCell<Dma> = StaticCell::new();
//! static DMA: Mutex<Cell<Option<&'static Dma>>> = Mutex::new(Cell::new(None));
//!
//! /// Vector of the TX interrupt line
//! fn axi_dma_tx() {
//!     if let Some(dma) = critical_section::with(|cs| DMA.borrow(cs).get()) {
//!         dma.on_tx_interrupt();
//!     }
//! }
//!
//! /// Vector of the RX interrupt line
//! fn axi_dma_rx() {
//!     if let Some(dma) = critical_section::with(|cs| DMA.borrow(cs).get()) {
//!         dma.on_rx_interrupt();
//!     }
//! }
//!
//! // Note (unsafe): the register window of the instance at 0x4040_0000
//! let regs = unsafe { Mmio::new(0x4040_0000) };
//! let dma: &'static Dma = DRIVER.init(
//!     AxiDma::new(
//!         regs,
//!         Plic,
//!         Coherent,
//!         Config::new(30, 31),
//!         TX_DESCRIPTORS.init([Descriptor::EMPTY; 16]),
//!         RX_DESCRIPTORS.init([Descriptor::EMPTY; 16]),
//!         &mut Spin::new(100.MHz()),
//!     )
//!     .unwrap(),
//! );
//! critical_section::with(|cs| DMA.borrow(cs).set(Some(dma)));
//!
//! // Thread context keeps using the same driver the handlers see
//! dma.reload(1, 0, 0x8000_0000, 1536).unwrap();
//! dma.start(1).unwrap();
//! # axi_dma_tx();
//! # axi_dma_rx();
//! ```

use core::{
    fmt,
    marker::PhantomData,
    sync::atomic::{fence, Ordering},
};

use embedded_hal::delay::DelayNs;

pub mod cache;
mod channel;
pub mod config;
pub mod descriptor;
pub mod irq;
pub mod lock;
#[cfg(test)]
mod mock;
pub mod regs;
mod ring;

#[cfg(feature = "dcache")]
pub use cache::DCache;
pub use cache::{CacheMaintenance, Coherent};
pub use config::{
    AddressAdjust, BlockConfig, Callback, ChannelId, Completion, Config,
    DmaConfig, DmaStatus, LinkedChannel, TransferDirection,
    LINKED_CHANNEL_FULL_CSUM_OFFLOAD, LINKED_CHANNEL_NO_CSUM_OFFLOAD,
    NUM_CHANNELS, RX_CHANNEL_NUM, TX_CHANNEL_NUM,
};
pub use descriptor::Descriptor;
#[cfg(feature = "cortex-m")]
pub use irq::Nvic;
pub use irq::{InterruptControl, IrqLines};
pub use lock::{LockAll, LockChannelIrq, LockDmaIrqs, LockStrategy};
pub use regs::{Mmio, Registers};

use channel::Channel;
use regs::{Control, RegisterBlock, DMACR, S2MM_REG_OFFSET};
use ring::Leg;

/// Errors returned by driver operations
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// A channel number, block length, buffer alignment, linked channel selector or instance
    /// description was rejected
    InvalidArgument,
    /// The request needs a feature the engine does not have, such as decrementing addresses or a
    /// direction the channel cannot run in
    NotSupported,
    /// The next descriptor of the ring has not been reclaimed yet, or another context is using
    /// the channel. Retry once completions came in.
    Busy,
    /// The soft reset did not complete during initialization. The engine is unusable.
    ResetTimeout,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument => f.write_str("invalid argument"),
            Error::NotSupported => f.write_str("not supported"),
            Error::Busy => f.write_str("channel busy"),
            Error::ResetTimeout => f.write_str("reset timed out"),
        }
    }
}

/// Failure of a single descriptor, reported through [`Completion::result`]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferError {
    /// AXI decode error accessing memory
    DecodeError,
    /// AXI slave error accessing memory
    SlaveError,
    /// Internal engine error, e.g. a zero length descriptor
    InternalError,
    /// The stream device saw a frame check sequence mismatch
    FrameCheck,
    IpChecksum,
    UdpChecksum,
    TcpChecksum,
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferError::DecodeError => f.write_str("decode error"),
            TransferError::SlaveError => f.write_str("slave error"),
            TransferError::InternalError => f.write_str("internal error"),
            TransferError::FrameCheck => f.write_str("frame check sequence error"),
            TransferError::IpChecksum => f.write_str("IP checksum error"),
            TransferError::UdpChecksum => f.write_str("UDP checksum error"),
            TransferError::TcpChecksum => f.write_str("TCP checksum error"),
        }
    }
}

/// Orders all prior memory accesses, descriptor writes included, before anything that follows,
/// in particular register writes that hand work to hardware.
#[inline(always)]
pub(crate) fn barrier() {
    fence(Ordering::SeqCst);
    #[cfg(feature = "cortex-m")]
    cortex_m::asm::dsb();
}

/// An AXI DMA instance.
///
/// `'d` is the lifetime of the descriptor storage and of the registered callbacks. `L` picks the
/// critical section, see [`lock`]. The instance is `Sync` when its register window, interrupt
/// controller and cache handle are, so thread and interrupt context can share it.
pub struct AxiDma<'d, R, I, C, L = LockDmaIrqs>
where
    R: Registers,
    I: InterruptControl,
    C: CacheMaintenance,
    L: LockStrategy,
{
    regs: R,
    irqs: I,
    cache: C,
    config: Config,
    channels: [Channel<'d>; 2],
    _lock: PhantomData<L>,
}

impl<'d, R, I, C, L> AxiDma<'d, R, I, C, L>
where
    R: Registers,
    I: InterruptControl,
    C: CacheMaintenance,
    L: LockStrategy,
{
    /// Soft-resets the engine, takes over the descriptor storage of both rings and enables both
    /// interrupt lines.
    ///
    /// Fails with [`Error::InvalidArgument`] when the instance is not described with exactly two
    /// channels or a ring has no descriptors, and with [`Error::ResetTimeout`] when the reset bit
    /// does not clear within `config.reset_retries` polls. The reset bit is polled at least once.
    pub fn new(
        regs: R,
        irqs: I,
        cache: C,
        config: Config,
        tx_descriptors: &'d mut [Descriptor],
        rx_descriptors: &'d mut [Descriptor],
        delay: &mut impl DelayNs,
    ) -> Result<Self, Error> {
        if config.channels != NUM_CHANNELS {
            error!(
                "Invalid number of configured channels ({}) - AXI DMA must have {} channels!",
                config.channels,
                NUM_CHANNELS
            );
            return Err(Error::InvalidArgument);
        }
        if tx_descriptors.is_empty() || rx_descriptors.is_empty() {
            error!("Descriptor rings need at least one descriptor!");
            return Err(Error::InvalidArgument);
        }

        info!("Soft-resetting the DMA core!");
        // The reset bit of either direction resets both
        let block = RegisterBlock::new(&regs, S2MM_REG_OFFSET);
        block.set_control(Control::new(DMACR::RESET::SET.value));
        let mut reset = false;
        for _ in 0..config.reset_retries.max(1) {
            if !block.control().is_set(DMACR::RESET) {
                reset = true;
                break;
            }
            delay.delay_ms(config.reset_poll_interval.to_millis());
        }
        if !reset {
            error!("DMA reset timed out!");
            return Err(Error::ResetTimeout);
        }

        let channels = [
            Channel::new(ChannelId::Tx, tx_descriptors, config.tx_irq),
            Channel::new(ChannelId::Rx, rx_descriptors, config.rx_irq),
        ];
        irqs.enable(config.tx_irq);
        irqs.enable(config.rx_irq);

        Ok(Self {
            regs,
            irqs,
            cache,
            config,
            channels,
            _lock: PhantomData,
        })
    }

    /// Releases the register window, the interrupt controller and the cache handle
    pub fn free(self) -> (R, I, C) {
        (self.regs, self.irqs, self.cache)
    }

    fn lines(&self) -> IrqLines {
        IrqLines {
            tx: self.channels[ChannelId::Tx.index()].irq(),
            rx: self.channels[ChannelId::Rx.index()].irq(),
        }
    }

    fn with_lock<T>(&self, channel: ChannelId, f: impl FnOnce(&Channel<'d>) -> T) -> T {
        let lines = self.lines();
        let key = L::lock(&self.irqs, lines, channel);
        let result = f(&self.channels[channel.index()]);
        L::unlock(&self.irqs, lines, channel, key);
        result
    }

    /// Sets up `channel` for a new transfer and populates one descriptor per block of `config`.
    ///
    /// Rewinds and relinks the ring, but leaves descriptors that have not been reclaimed yet
    /// alone. Wait for the completions of a previous transfer first: a block landing on such a
    /// slot fails with [`Error::Busy`]. The transfer does not begin before
    /// [`start`](Self::start). The first failing block aborts the walk and its error is
    /// returned; blocks before it stay populated.
    pub fn configure(&self, channel: u32, config: &DmaConfig<'_, 'd>) -> Result<(), Error> {
        let id = ChannelId::try_from(channel)?;
        self.with_lock(id, |channel| {
            channel.configure(&self.regs, &self.cache, config)
        })
    }

    /// Appends a single-block transfer to the ring of `channel`. TX reads `src`, RX fills `dst`.
    ///
    /// Fails with [`Error::Busy`] when the ring is full.
    pub fn reload(
        &self,
        channel: u32,
        src: usize,
        dst: usize,
        size: usize,
    ) -> Result<(), Error> {
        let id = ChannelId::try_from(channel)?;
        let address = match id {
            ChannelId::Tx => src,
            ChannelId::Rx => dst,
        };
        self.with_lock(id, |channel| {
            channel.transfer_block(&self.cache, Leg::single(address, size))
        })
    }

    /// Hands all populated descriptors of `channel` to hardware, restarting the engine if it is
    /// halted.
    pub fn start(&self, channel: u32) -> Result<(), Error> {
        let id = ChannelId::try_from(channel)?;
        self.with_lock(id, |channel| channel.start(&self.regs, &self.config))?;
        barrier();
        Ok(())
    }

    /// Halts `channel` once its outstanding transfers have completed
    pub fn stop(&self, channel: u32) -> Result<(), Error> {
        let id = ChannelId::try_from(channel)?;
        self.channels[id.index()].stop(&self.regs);
        barrier();
        Ok(())
    }

    pub fn get_status(&self, channel: u32) -> Result<DmaStatus, Error> {
        let id = ChannelId::try_from(channel)?;
        Ok(self.channels[id.index()].status(&self.regs))
    }

    /// Channel filter for generic channel requests: `"tx"` matches the TX channel and `"rx"` the
    /// RX channel
    pub fn channel_filter(&self, channel: u32, tag: &str) -> bool {
        match tag {
            "tx" => channel == TX_CHANNEL_NUM,
            "rx" => channel == RX_CHANNEL_NUM,
            _ => false,
        }
    }

    /// Length in bytes of the most recently reclaimed RX descriptor
    pub fn last_received_frame_length(&self) -> u32 {
        self.channels[ChannelId::Rx.index()].last_rx_size()
    }

    /// TX interrupt handler. Returns the number of reclaimed descriptors.
    pub fn on_tx_interrupt(&self) -> usize {
        self.on_interrupt(ChannelId::Tx)
    }

    /// RX interrupt handler. Returns the number of reclaimed descriptors.
    pub fn on_rx_interrupt(&self) -> usize {
        self.on_interrupt(ChannelId::Rx)
    }

    /// Interrupt handler of `channel`: acknowledges its pending interrupts and reclaims finished
    /// descriptors. The channel's interrupt line is masked meanwhile and left in the state it was
    /// found in.
    pub fn on_interrupt(&self, channel: ChannelId) -> usize {
        let irq = self.channels[channel.index()].irq();
        let was_enabled = self.irqs.is_enabled(irq);
        self.irqs.disable(irq);

        let reclaimed = self.channels[channel.index()].on_interrupt(&self.regs, &self.cache);

        if was_enabled {
            self.irqs.enable(irq);
        }
        reclaimed
    }
}
