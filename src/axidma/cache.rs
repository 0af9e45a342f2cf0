//! Data cache maintenance for device-visible memory.
//!
//! On platforms where descriptors and buffers live in cacheable memory the driver flushes
//! everything it hands to hardware and invalidates everything hardware wrote before reading it.
//! Coherent platforms use [`Coherent`], which turns all maintenance into no-ops and drops the
//! cache line alignment requirement on receive buffers.
//!
//! Thread context and the interrupt handlers of both channels maintain the cache at the same
//! time, so maintenance goes through shared references.

#[cfg(feature = "dcache")]
use core::cell::RefCell;

pub trait CacheMaintenance {
    /// Size of a data cache line, or `None` when device-visible memory needs no maintenance
    fn line_size(&self) -> Option<usize>;

    /// Writes back the range so hardware observes the CPU's stores
    fn flush(&self, address: usize, len: usize);

    /// Discards cached copies of the range so the CPU observes hardware's stores
    fn invalidate(&self, address: usize, len: usize);

    /// Checks that a buffer hardware writes into does not share a cache line with other data
    fn is_line_aligned(&self, address: usize, len: usize) -> bool {
        match self.line_size() {
            Some(line) => address % line == 0 && len % line == 0,
            None => true,
        }
    }
}

impl<C: CacheMaintenance + ?Sized> CacheMaintenance for &C {
    #[inline(always)]
    fn line_size(&self) -> Option<usize> {
        C::line_size(self)
    }

    #[inline(always)]
    fn flush(&self, address: usize, len: usize) {
        C::flush(self, address, len)
    }

    #[inline(always)]
    fn invalidate(&self, address: usize, len: usize) {
        C::invalidate(self, address, len)
    }
}

/// Cache-coherent platform, or caches disabled for device memory
#[derive(Clone, Copy, Debug, Default)]
pub struct Coherent;

impl CacheMaintenance for Coherent {
    #[inline(always)]
    fn line_size(&self) -> Option<usize> {
        None
    }

    #[inline(always)]
    fn flush(&self, _address: usize, _len: usize) {}

    #[inline(always)]
    fn invalidate(&self, _address: usize, _len: usize) {}
}

/// Data cache maintenance through the Cortex-M7 system control block
#[cfg(feature = "dcache")]
#[cfg_attr(docsrs, doc(cfg(feature = "dcache")))]
pub struct DCache {
    scb: critical_section::Mutex<RefCell<cortex_m::peripheral::SCB>>,
}

#[cfg(feature = "dcache")]
impl DCache {
    const LINE_SIZE: usize = 32;

    pub fn new(scb: cortex_m::peripheral::SCB) -> Self {
        Self {
            scb: critical_section::Mutex::new(RefCell::new(scb)),
        }
    }

    /// Releases the system control block
    pub fn free(self) -> cortex_m::peripheral::SCB {
        self.scb.into_inner().into_inner()
    }
}

#[cfg(feature = "dcache")]
impl CacheMaintenance for DCache {
    fn line_size(&self) -> Option<usize> {
        Some(Self::LINE_SIZE)
    }

    fn flush(&self, address: usize, len: usize) {
        critical_section::with(|cs| {
            self.scb
                .borrow_ref_mut(cs)
                .clean_dcache_by_address(address, len)
        });
    }

    fn invalidate(&self, address: usize, len: usize) {
        critical_section::with(|cs| {
            let mut scb = self.scb.borrow_ref_mut(cs);
            // Note (unsafe): the driver only invalidates buffers and descriptors owned by
            // hardware, receive buffers are required to be line aligned
            unsafe { scb.invalidate_dcache_by_address(address, len) }
        });
    }
}
