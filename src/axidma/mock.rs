//! Host-side stand-ins for the hardware seams, used by the unit tests.

use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Mutex,
};

use super::{
    cache::CacheMaintenance,
    descriptor::{is_finished, Descriptor, DescriptorStatus, CONTROL, STATUS},
    irq::InterruptControl,
    regs::{
        Control, Register, Registers, Status, DMACR, DMASR, MM2S_REG_OFFSET,
        S2MM_REG_OFFSET,
    },
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CacheOp {
    Flush(usize, usize),
    Invalidate(usize, usize),
}

/// Records every maintenance request
pub(crate) struct RecordingCache {
    line: Option<usize>,
    ops: Mutex<Vec<CacheOp>>,
}

impl RecordingCache {
    pub(crate) fn new(line: Option<usize>) -> Self {
        Self {
            line,
            ops: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn ops(&self) -> Vec<CacheOp> {
        self.ops.lock().unwrap().clone()
    }
}

impl CacheMaintenance for RecordingCache {
    fn line_size(&self) -> Option<usize> {
        self.line
    }

    fn flush(&self, address: usize, len: usize) {
        self.ops.lock().unwrap().push(CacheOp::Flush(address, len));
    }

    fn invalidate(&self, address: usize, len: usize) {
        self.ops.lock().unwrap().push(CacheOp::Invalidate(address, len));
    }
}

/// Interrupt lines as a bit set
#[derive(Default)]
pub(crate) struct SimIrqs {
    enabled: AtomicU64,
}

impl SimIrqs {
    pub(crate) fn enabled(&self, irq: u32) -> bool {
        self.enabled.load(Ordering::SeqCst) & (1 << irq) != 0
    }
}

impl InterruptControl for SimIrqs {
    fn is_enabled(&self, irq: u32) -> bool {
        self.enabled(irq)
    }

    fn enable(&self, irq: u32) {
        self.enabled.fetch_or(1 << irq, Ordering::SeqCst);
    }

    fn disable(&self, irq: u32) {
        self.enabled.fetch_and(!(1 << irq), Ordering::SeqCst);
    }
}

const WORDS: usize = 0x48 / 4;

/// Register file of both direction blocks plus a model of the engine walking the ring.
///
/// DMASR is write-1-to-clear, DMACR.RESET clears itself unless `stuck_in_reset` is set. Both
/// channels come out of reset halted. Every register access is atomic, so the file may be
/// shared between threads standing in for thread and interrupt context.
pub(crate) struct SimRegs {
    words: Mutex<[u32; WORDS]>,
    writes: Mutex<Vec<(usize, u32)>>,
    next_fetch: [AtomicUsize; 2],
    stuck_in_reset: bool,
}

impl SimRegs {
    pub(crate) fn new() -> Self {
        let regs = Self {
            words: Mutex::new([0; WORDS]),
            writes: Mutex::new(Vec::new()),
            next_fetch: Default::default(),
            stuck_in_reset: false,
        };
        for block in [MM2S_REG_OFFSET, S2MM_REG_OFFSET] {
            regs.set(Register::Dmasr.offset(block), DMASR::HALTED::SET.value);
        }
        regs
    }

    pub(crate) fn stuck_in_reset() -> Self {
        Self {
            stuck_in_reset: true,
            ..Self::new()
        }
    }

    /// Raw register value
    pub(crate) fn get(&self, offset: usize) -> u32 {
        self.words.lock().unwrap()[offset / 4]
    }

    /// Sets a register the way hardware would, bypassing write side effects
    pub(crate) fn set(&self, offset: usize, value: u32) {
        self.words.lock().unwrap()[offset / 4] = value;
    }

    /// Raises status bits the way hardware would
    pub(crate) fn raise(&self, block: usize, bits: u32) {
        self.words.lock().unwrap()[Register::Dmasr.offset(block) / 4] |= bits;
    }

    /// Every write the driver issued, in order
    pub(crate) fn writes(&self) -> Vec<(usize, u32)> {
        self.writes.lock().unwrap().clone()
    }

    pub(crate) fn clear_writes(&self) {
        self.writes.lock().unwrap().clear();
    }

    fn tail(&self, block: usize) -> usize {
        let low = self.get(Register::Taildesc.offset(block)) as u64;
        let high = self.get(Register::TaildescMsb.offset(block)) as u64;
        ((high << 32) | low) as usize
    }

    /// Finishes every descriptor from where the engine stopped up to the published tail, using
    /// the status `complete` picks for each, and goes idle. Raises nothing.
    pub(crate) fn finish<F>(&self, block: usize, mut complete: F) -> usize
    where
        F: FnMut(&Descriptor) -> DescriptorStatus,
    {
        let slot = &self.next_fetch[block_index(block)];
        let tail = self.tail(block);
        let mut address = slot.load(Ordering::SeqCst);
        let mut processed = 0;
        while address != 0 {
            // Note (unsafe): the driver only publishes addresses of its live descriptors
            let descriptor = unsafe { &*(address as *const Descriptor) };
            if descriptor.control().get() == 0 || is_finished(descriptor.status()) {
                break;
            }
            descriptor.write_status(complete(descriptor));
            processed += 1;

            let done = address == tail;
            address = descriptor.next_address() as usize;
            if done {
                break;
            }
        }
        slot.store(address, Ordering::SeqCst);
        self.raise(block, DMASR::IDLE::SET.value);
        processed
    }

    /// Like [`SimRegs::finish`], then raises the completion interrupt. Returns the number of
    /// descriptors processed.
    pub(crate) fn run<F>(&self, block: usize, complete: F) -> usize
    where
        F: FnMut(&Descriptor) -> DescriptorStatus,
    {
        let processed = self.finish(block, complete);
        self.raise(block, DMASR::IOC_IRQ::SET.value);
        processed
    }
}

fn block_index(block: usize) -> usize {
    usize::from(block == S2MM_REG_OFFSET)
}

impl Registers for SimRegs {
    fn read(&self, offset: usize) -> u32 {
        self.get(offset)
    }

    fn write(&self, offset: usize, value: u32) {
        self.writes.lock().unwrap().push((offset, value));

        let block = if offset >= S2MM_REG_OFFSET {
            S2MM_REG_OFFSET
        } else {
            MM2S_REG_OFFSET
        };
        let mut words = self.words.lock().unwrap();
        match offset - block {
            o if o == Register::Dmasr as usize => {
                words[offset / 4] &= !value;
            }
            o if o == Register::Dmacr as usize => {
                let mut control = Control::new(value);
                if !self.stuck_in_reset {
                    control.modify(DMACR::RESET::CLEAR);
                }
                words[offset / 4] = control.get();

                let sr = Register::Dmasr.offset(block) / 4;
                let mut status = Status::new(words[sr]);
                status.modify(DMASR::HALTED.val(u32::from(!control.is_set(DMACR::RS))));
                words[sr] = status.get();
            }
            o if o == Register::Curdesc as usize => {
                words[offset / 4] = value;
                self.next_fetch[block_index(block)].store(value as usize, Ordering::SeqCst);
            }
            o if o == Register::CurdescMsb as usize => {
                words[offset / 4] = value;
                self.next_fetch[block_index(block)]
                    .fetch_or(((value as u64) << 32) as usize, Ordering::SeqCst);
            }
            _ => words[offset / 4] = value,
        }
    }
}

/// A completed status carrying `len` transferred bytes
pub(crate) fn completed_with(len: u32) -> DescriptorStatus {
    DescriptorStatus::new((STATUS::COMPLETE::SET + STATUS::TRANSFERRED.val(len)).value)
}

/// A completed status carrying the full programmed length
pub(crate) fn completed(descriptor: &Descriptor) -> DescriptorStatus {
    completed_with(descriptor.control().read(CONTROL::BUFFER_LENGTH))
}

/// Accumulates requested delays instead of sleeping
#[derive(Default)]
pub(crate) struct CountingDelay {
    pub(crate) ns: u64,
}

impl embedded_hal::delay::DelayNs for CountingDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.ns += u64::from(ns);
    }
}
