//! Per-direction channel state machine.
//!
//! A channel is either halted or running. `start` brings a halted engine up with the configured
//! interrupt coalescing and publishes the tail; `stop` lets in-flight transfers drain before the
//! engine halts. The interrupt path acknowledges the status register and reclaims finished
//! descriptors, reporting each through the channel callback.
//!
//! Thread context and the channel's interrupt handler reach the same channel through shared
//! references. The ring cursors and the transfer settings live behind a claim flag: whoever
//! claims the channel has them to itself until it lets go.

use core::{
    cell::UnsafeCell,
    sync::atomic::{AtomicBool, AtomicU32, Ordering},
};

use super::{
    barrier,
    cache::CacheMaintenance,
    config::{
        AddressAdjust, Callback, ChannelId, Completion, Config, DmaConfig,
        DmaStatus, LinkedChannel, TransferDirection,
    },
    descriptor::{
        checksum_result, transfer_result, Descriptor, APP0_CHECKSUM_OFFLOAD_FULL,
        APP0_CHECKSUM_OFFLOAD_NONE, APP2, STATUS,
    },
    regs::{
        completion_irqs, is_busy, Control, RegisterBlock, Registers, Status, DMACR,
        DMASR, MM2S_REG_OFFSET, S2MM_REG_OFFSET,
    },
    ring::{Leg, Ring},
    Error,
};

pub(crate) struct Channel<'d> {
    id: ChannelId,
    regs_base: usize,
    irq: u32,
    direction: TransferDirection,
    /// Set while some context holds `state`
    claimed: AtomicBool,
    state: UnsafeCell<State<'d>>,
    /// Transferred length of the most recently reclaimed descriptor
    last_rx_size: AtomicU32,
}

/// What thread and interrupt context both mutate
struct State<'d> {
    ring: Ring<'d>,
    callback: Option<Callback<'d>>,
    /// `app0` word written into every populated descriptor
    sg_desc_app0: u32,
    check_csum_in_isr: bool,
}

// Note (unsafe): `state` is only reached through `Channel::exclusive`, which admits one context
// at a time
unsafe impl Sync for Channel<'_> {}

impl<'d> State<'d> {
    fn transfer_block<C: CacheMaintenance>(
        &mut self,
        cache: &C,
        id: ChannelId,
        leg: Leg,
    ) -> Result<(), Error> {
        self.ring
            .populate(cache, id, leg, self.sg_desc_app0)
            .map(|_| ())
    }
}

impl<'d> Channel<'d> {
    pub(crate) fn new(
        id: ChannelId,
        descriptors: &'d mut [Descriptor],
        irq: u32,
    ) -> Self {
        Self {
            id,
            regs_base: match id {
                ChannelId::Tx => MM2S_REG_OFFSET,
                ChannelId::Rx => S2MM_REG_OFFSET,
            },
            irq,
            direction: id.direction(),
            claimed: AtomicBool::new(false),
            state: UnsafeCell::new(State {
                ring: Ring::new(descriptors),
                callback: None,
                sg_desc_app0: APP0_CHECKSUM_OFFLOAD_NONE,
                check_csum_in_isr: false,
            }),
            last_rx_size: AtomicU32::new(0),
        }
    }

    #[inline(always)]
    pub(crate) fn irq(&self) -> u32 {
        self.irq
    }

    #[inline(always)]
    pub(crate) fn last_rx_size(&self) -> u32 {
        self.last_rx_size.load(Ordering::Relaxed)
    }

    #[inline(always)]
    fn block<'a, R: Registers>(&self, regs: &'a R) -> RegisterBlock<'a, R> {
        RegisterBlock::new(regs, self.regs_base)
    }

    /// Runs `f` on the channel state, or returns `None` without running it when another
    /// context has claimed the channel.
    fn exclusive<T>(&self, f: impl FnOnce(&mut State<'d>) -> T) -> Option<T> {
        if self
            .claimed
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return None;
        }
        // Note (unsafe): the claim flag was clear and is ours until the store below
        let result = f(unsafe { &mut *self.state.get() });
        self.claimed.store(false, Ordering::Release);
        Some(result)
    }

    /// Thread side of `exclusive`: a channel claimed elsewhere is reported as busy
    fn with_state<T>(
        &self,
        f: impl FnOnce(&mut State<'d>) -> Result<T, Error>,
    ) -> Result<T, Error> {
        self.exclusive(f).unwrap_or_else(|| {
            warn!("{} channel is in use by another context!", self.id.name());
            Err(Error::Busy)
        })
    }

    /// Checks a configuration request against what the hardware can do
    fn validate(&self, config: &DmaConfig<'_, 'd>) -> Result<LinkedChannel, Error> {
        let Some(head) = config.blocks.first() else {
            error!("No transfer blocks given!");
            return Err(Error::InvalidArgument);
        };

        if head.source_addr_adj == AddressAdjust::Decrement
            || head.dest_addr_adj == AddressAdjust::Decrement
        {
            error!("AXI DMA only supports incrementing addresses!");
            return Err(Error::NotSupported);
        }

        if config.direction != self.direction {
            match self.id {
                ChannelId::Tx => {
                    error!("TX channel must be used with MemoryToPeripheral!")
                }
                ChannelId::Rx => {
                    error!("RX channel must be used with PeripheralToMemory!")
                }
            }
            return Err(Error::NotSupported);
        }

        LinkedChannel::try_from(config.linked_channel)
    }

    /// Resets the ring and populates it with the blocks of `config`, one descriptor each
    pub(crate) fn configure<R: Registers, C: CacheMaintenance>(
        &self,
        regs: &R,
        cache: &C,
        config: &DmaConfig<'_, 'd>,
    ) -> Result<(), Error> {
        let linked = self.validate(config)?;

        self.with_state(|state| {
            debug!(
                "Configuring {} DMA descriptors for {}",
                state.ring.capacity(),
                self.id.name()
            );

            state.ring.reset(cache);
            self.block(regs)
                .set_current_descriptor(state.ring.first().address());

            state.check_csum_in_isr = false;
            match (linked, self.id) {
                (LinkedChannel::FullChecksumOffload, ChannelId::Tx) => {
                    state.sg_desc_app0 = APP0_CHECKSUM_OFFLOAD_FULL;
                }
                (LinkedChannel::FullChecksumOffload, ChannelId::Rx) => {
                    state.check_csum_in_isr = true;
                }
                (LinkedChannel::NoChecksumOffload, _) => {
                    state.sg_desc_app0 = APP0_CHECKSUM_OFFLOAD_NONE;
                }
            }

            state.callback = config.callback;

            info!("Completed configuration of AXI DMA - Starting transfer!");

            let last = config.blocks.len() - 1;
            for (n, block) in config.blocks.iter().enumerate() {
                let address = match self.id {
                    ChannelId::Tx => block.source_address,
                    ChannelId::Rx => block.dest_address,
                };
                state.transfer_block(
                    cache,
                    self.id,
                    Leg {
                        address,
                        len: block.block_size,
                        first: n == 0,
                        last: n == last,
                    },
                )?;
            }
            Ok(())
        })
    }

    /// Places one buffer leg into the ring without starting the engine
    pub(crate) fn transfer_block<C: CacheMaintenance>(
        &self,
        cache: &C,
        leg: Leg,
    ) -> Result<(), Error> {
        self.with_state(|state| state.transfer_block(cache, self.id, leg))
    }

    /// Restarts a halted engine, then hands everything populated so far to hardware
    pub(crate) fn start<R: Registers>(
        &self,
        regs: &R,
        config: &Config,
    ) -> Result<(), Error> {
        self.with_state(|state| {
            let tail = state.ring.tail();
            debug!(
                "Starting DMA on {} channel with descriptor {} at {:#x}",
                self.id.name(),
                state.ring.populated(),
                tail.address()
            );

            let block = self.block(regs);
            if block.status().is_set(DMASR::HALTED) {
                debug!("AXI DMA is halted - restart operation!");

                // No reset, keyhole or cyclic mode: software relies on the completed bit
                let mut control = Control::new(0);
                control.write(
                    DMACR::RS::SET
                        + DMACR::IOC_IRQ_EN::SET
                        + DMACR::DLY_IRQ_EN::SET
                        + DMACR::ERR_IRQ_EN::SET
                        + DMACR::IRQ_THRESHOLD.val(config.interrupt_threshold.into())
                        + DMACR::IRQ_DELAY.val(config.interrupt_timeout.into()),
                );

                debug!("New DMACR value: {:#x}", control.get());
                block.set_control(control);
                // Run/stop must be committed before the tail is written
                barrier();
            }

            block.set_tail_descriptor(tail.address());
            Ok(())
        })
    }

    /// Clears run/stop. Hardware finishes outstanding transfers before it halts.
    pub(crate) fn stop<R: Registers>(&self, regs: &R) {
        let block = self.block(regs);
        let mut control = block.control();
        control.modify(DMACR::RS::CLEAR);
        block.set_control(control);
    }

    pub(crate) fn status<R: Registers>(&self, regs: &R) -> DmaStatus {
        DmaStatus {
            busy: is_busy(self.block(regs).status()),
            dir: self.direction,
        }
    }

    /// Acknowledges the channel's pending interrupts and reclaims finished descriptors. The
    /// caller keeps the channel's interrupt line disabled meanwhile.
    ///
    /// While another context has the channel claimed nothing is acknowledged, so the interrupt
    /// stays pending and fires again once the line is restored.
    pub(crate) fn on_interrupt<R: Registers, C: CacheMaintenance>(
        &self,
        regs: &R,
        cache: &C,
    ) -> usize {
        self.exclusive(|state| self.service(state, regs, cache))
            .unwrap_or_else(|| {
                warn!(
                    "{} channel is in use by another context, interrupt left pending!",
                    self.id.name()
                );
                0
            })
    }

    fn service<R: Registers, C: CacheMaintenance>(
        &self,
        state: &mut State<'d>,
        regs: &R,
        cache: &C,
    ) -> usize {
        let block = self.block(regs);
        let status = block.status();

        if status.is_set(DMASR::ERR_IRQ) {
            error!(
                "DMA reports {} error, DMASR = {:#x}",
                self.id.name(),
                status.get()
            );
            block.clear_status(Status::new(DMASR::ERR_IRQ::SET.value));
        }

        let pending = completion_irqs(status);
        if pending.get() == 0 {
            return 0;
        }

        // Acknowledge first so completions from here on raise a new interrupt
        block.clear_status(pending);

        let reclaimed = self.clean_up_descriptors(state, cache);
        debug!(
            "Completed {} {} descriptors in this ISR!",
            reclaimed,
            self.id.name()
        );
        reclaimed
    }

    /// Reclaims every finished descriptor from the completion cursor on, reporting each one
    fn clean_up_descriptors<C: CacheMaintenance>(
        &self,
        state: &mut State<'d>,
        cache: &C,
    ) -> usize {
        let id = self.id;
        let check_csum = state.check_csum_in_isr;
        let callback = state.callback;

        state.ring.reclaim(cache, |index, descriptor, status| {
            let transferred = status.read(STATUS::TRANSFERRED);
            self.last_rx_size.store(transferred, Ordering::Relaxed);

            if status.is_set(STATUS::DECODE_ERROR) {
                error!("Descriptor has SG decode error, status={:#x}", status.get());
            }
            if status.is_set(STATUS::SLAVE_ERROR) {
                error!("Descriptor has SG slave error, status={:#x}", status.get());
            }
            if status.is_set(STATUS::INTERNAL_ERROR) {
                error!("Descriptor has SG internal error, status={:#x}", status.get());
            }
            let mut result = transfer_result(status);

            if check_csum {
                let checksum = descriptor.checksum_status();
                if checksum.is_set(APP2::FCS_ERROR) {
                    error!(
                        "Checksum offloading has FCS error status {:#x}!",
                        checksum.get()
                    );
                }
                match checksum.read_as_enum(APP2::CHECKSUM) {
                    Some(APP2::CHECKSUM::Value::IpError) => error!(
                        "Checksum offloading has IP error status {:#x}!",
                        checksum.get()
                    ),
                    Some(APP2::CHECKSUM::Value::UdpError) => error!(
                        "Checksum offloading has UDP error status {:#x}!",
                        checksum.get()
                    ),
                    Some(APP2::CHECKSUM::Value::TcpError) => error!(
                        "Checksum offloading has TCP error status {:#x}!",
                        checksum.get()
                    ),
                    None => {}
                }
                result = result.and(checksum_result(checksum));
            }

            if let Some(callback) = callback {
                debug!(
                    "Completed packet descriptor {} with {} bytes!",
                    index, transferred
                );
                if id == ChannelId::Rx {
                    cache.invalidate(
                        descriptor.buffer_address() as usize,
                        transferred as usize,
                    );
                }
                callback(&Completion {
                    channel: id,
                    descriptor: index,
                    transferred,
                    result,
                });
            }
        })
    }

    /// Populated and completion cursors
    #[cfg(test)]
    pub(crate) fn cursors(&self) -> Option<(usize, usize)> {
        self.exclusive(|state| (state.ring.populated(), state.ring.completion()))
    }

    /// The `app0` word and whether the interrupt path checks receive checksums
    #[cfg(test)]
    fn checksum_handling(&self) -> Option<(u32, bool)> {
        self.exclusive(|state| (state.sg_desc_app0, state.check_csum_in_isr))
    }
}
