//! The descriptor ring of one channel.
//!
//! Descriptors form a closed singly-linked list laid out as a flat array. Two cursors move around
//! it: `populated` is the most recently written descriptor and therefore the tail published to
//! hardware, `completion` is the oldest descriptor software has not reclaimed yet. Whether a slot
//! is free, pending or finished is read from its own control and status words.

use core::mem::size_of;

use super::{
    barrier,
    cache::CacheMaintenance,
    config::ChannelId,
    descriptor::{
        is_finished, Descriptor, DescriptorControl, DescriptorStatus, CONTROL,
        DESCRIPTOR_ALIGN, MAX_TRANSFER_LEN,
    },
    Error,
};

const DESCRIPTOR_SIZE: usize = size_of::<Descriptor>();

/// One buffer leg to place into the ring
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Leg {
    pub address: usize,
    pub len: usize,
    /// First leg of a logical transfer
    pub first: bool,
    /// Last leg of a logical transfer
    pub last: bool,
}

impl Leg {
    /// A leg that is a complete transfer on its own
    pub(crate) const fn single(address: usize, len: usize) -> Self {
        Self {
            address,
            len,
            first: true,
            last: true,
        }
    }
}

pub(crate) struct Ring<'d> {
    descriptors: &'d [Descriptor],
    populated: usize,
    completion: usize,
}

impl<'d> Ring<'d> {
    /// Takes over the descriptor storage. The storage must not be empty.
    pub(crate) fn new(descriptors: &'d mut [Descriptor]) -> Self {
        let descriptors: &'d [Descriptor] = descriptors;
        Self {
            populated: descriptors.len().saturating_sub(1),
            completion: 0,
            descriptors,
        }
    }

    #[inline(always)]
    pub(crate) fn capacity(&self) -> usize {
        self.descriptors.len()
    }

    #[inline(always)]
    pub(crate) fn populated(&self) -> usize {
        self.populated
    }

    #[inline(always)]
    pub(crate) fn completion(&self) -> usize {
        self.completion
    }

    #[inline(always)]
    fn next(&self, index: usize) -> usize {
        let next = index + 1;
        if next >= self.capacity() {
            0
        } else {
            next
        }
    }

    /// The descriptor hardware starts a fresh walk from
    pub(crate) fn first(&self) -> &'d Descriptor {
        &self.descriptors[0]
    }

    /// The most recently populated descriptor, which is the tail handed to hardware
    pub(crate) fn tail(&self) -> &'d Descriptor {
        &self.descriptors[self.populated]
    }

    /// Rewinds both cursors so the next populate lands on slot 0 and relinks the ring
    pub(crate) fn reset<C: CacheMaintenance>(&mut self, cache: &C) {
        self.populated = self.capacity() - 1;
        self.completion = 0;
        self.link(cache);
    }

    /// Points every descriptor at its successor, the last one back at slot 0
    fn link<C: CacheMaintenance>(&self, cache: &C) {
        for (index, descriptor) in self.descriptors.iter().enumerate() {
            let next = &self.descriptors[self.next(index)];
            debug_assert_eq!(
                next.address() % DESCRIPTOR_ALIGN,
                0,
                "descriptor {} is not aligned to {} bytes",
                index,
                DESCRIPTOR_ALIGN
            );
            descriptor.set_next(next.address());
            cache.flush(descriptor.address(), DESCRIPTOR_SIZE);
        }
    }

    /// Writes `leg` into the slot after the populated cursor and advances the cursor.
    ///
    /// Fails with [`Error::Busy`] when that slot has not been reclaimed yet, and with
    /// [`Error::InvalidArgument`] when the length does not fit a descriptor or, for the RX
    /// channel on platforms that need cache maintenance, the buffer is not cache line aligned.
    /// A failed call leaves the ring untouched.
    pub(crate) fn populate<C: CacheMaintenance>(
        &mut self,
        cache: &C,
        channel: ChannelId,
        leg: Leg,
        app0: u32,
    ) -> Result<usize, Error> {
        let index = self.next(self.populated);
        let descriptor = &self.descriptors[index];

        cache.invalidate(descriptor.address(), DESCRIPTOR_SIZE);
        if !descriptor.is_free() {
            warn!(
                "{} descriptor {} is not yet completed, not starting new transfer!",
                channel.name(),
                index
            );
            return Err(Error::Busy);
        }

        if leg.len > MAX_TRANSFER_LEN as usize {
            error!("Too large block: {} bytes!", leg.len);
            return Err(Error::InvalidArgument);
        }

        match channel {
            ChannelId::Tx => cache.flush(leg.address, leg.len),
            ChannelId::Rx => {
                if !cache.is_line_aligned(leg.address, leg.len) {
                    error!(
                        "RX buffer address and block size must be cache line size aligned"
                    );
                    return Err(Error::InvalidArgument);
                }
                // Hardware writes the buffer, so no dirty line may be written back over it
                cache.invalidate(leg.address, leg.len);
            }
        }

        descriptor.set_buffer(leg.address);
        descriptor.set_app0(app0);
        let mut control = DescriptorControl::new(0);
        control.write(
            CONTROL::BUFFER_LENGTH.val(leg.len as u32)
                + CONTROL::SOF.val(u32::from(leg.first))
                + CONTROL::EOF.val(u32::from(leg.last)),
        );
        descriptor.set_control(control);

        // The descriptor must be complete before hardware can observe it
        barrier();
        cache.flush(descriptor.address(), DESCRIPTOR_SIZE);

        self.populated = index;
        Ok(index)
    }

    /// Walks finished descriptors from the completion cursor, handing each to `f` before releasing
    /// it. Stops at the first descriptor hardware has not finished. Returns the number reclaimed.
    pub(crate) fn reclaim<C, F>(&mut self, cache: &C, mut f: F) -> usize
    where
        C: CacheMaintenance,
        F: FnMut(usize, &Descriptor, DescriptorStatus),
    {
        let mut reclaimed = 0;
        loop {
            let index = self.completion;
            let descriptor = &self.descriptors[index];
            cache.invalidate(descriptor.address(), DESCRIPTOR_SIZE);

            let status = descriptor.status();
            if !is_finished(status) {
                break;
            }

            f(index, descriptor, status);

            descriptor.release();
            // Hardware must never observe a half released descriptor
            barrier();
            cache.flush(descriptor.address(), DESCRIPTOR_SIZE);

            self.completion = self.next(index);
            reclaimed += 1;
        }
        reclaimed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axidma::{
        cache::Coherent,
        descriptor::{transfer_result, STATUS},
        mock::{completed, CacheOp, RecordingCache},
    };

    fn ring(storage: &mut [Descriptor]) -> Ring<'_> {
        let mut ring = Ring::new(storage);
        ring.reset(&Coherent);
        ring
    }

    fn complete(descriptor: &Descriptor) {
        descriptor.write_status(completed(descriptor));
    }

    #[test]
    fn links_closed_cycle() {
        for capacity in 1..=6 {
            let mut storage: [Descriptor; 6] = Default::default();
            let ring = ring(&mut storage[..capacity]);

            let start = ring.first().address() as u64;
            let mut address = start;
            for step in 1..=capacity {
                let descriptor = ring
                    .descriptors
                    .iter()
                    .find(|d| d.address() as u64 == address)
                    .unwrap();
                address = descriptor.next_address();
                assert_eq!(address == start, step == capacity);
            }
        }
    }

    #[test]
    fn first_populate_lands_on_slot_zero() {
        let mut storage: [Descriptor; 4] = Default::default();
        let mut ring = ring(&mut storage);
        assert_eq!(ring.populated(), 3);
        assert_eq!(ring.completion(), 0);

        let index = ring
            .populate(
                &Coherent,
                ChannelId::Tx,
                Leg::single(0x1000, 64),
                0,
            )
            .unwrap();
        assert_eq!(index, 0);
        assert_eq!(ring.tail().address(), ring.first().address());
    }

    #[test]
    fn busy_once_every_slot_is_pending() {
        let mut storage: [Descriptor; 4] = Default::default();
        let mut ring = ring(&mut storage);
        let cache = Coherent;

        for n in 0..4 {
            let leg = Leg::single(0x1000 + n * 0x100, 0x100);
            assert_eq!(ring.populate(&cache, ChannelId::Tx, leg, 0), Ok(n));
        }
        let leg = Leg::single(0x2000, 0x100);
        assert_eq!(
            ring.populate(&cache, ChannelId::Tx, leg, 0),
            Err(Error::Busy)
        );
        assert_eq!(ring.populated(), 3);
        // The pending descriptor was not touched
        assert_eq!(ring.first().buffer_address(), 0x1000);
    }

    #[test]
    fn slot_reused_only_after_reclaim() {
        let mut storage: [Descriptor; 2] = Default::default();
        let mut ring = ring(&mut storage);
        let cache = Coherent;

        ring.populate(&cache, ChannelId::Tx, Leg::single(0x1000, 8), 0)
            .unwrap();
        ring.populate(&cache, ChannelId::Tx, Leg::single(0x2000, 8), 0)
            .unwrap();
        complete(ring.first());
        // Finished but not reclaimed is still busy
        assert_eq!(
            ring.populate(&cache, ChannelId::Tx, Leg::single(0x3000, 8), 0),
            Err(Error::Busy)
        );

        assert_eq!(ring.reclaim(&cache, |_, _, _| {}), 1);
        assert_eq!(
            ring.populate(&cache, ChannelId::Tx, Leg::single(0x3000, 8), 0),
            Ok(0)
        );
        assert_eq!(ring.first().buffer_address(), 0x3000);
    }

    #[test]
    fn frame_flags_and_app0() {
        let mut storage: [Descriptor; 4] = Default::default();
        let mut ring = ring(&mut storage);
        let cache = Coherent;
        let legs = [
            Leg { address: 0x1000, len: 10, first: true, last: false },
            Leg { address: 0x2000, len: 20, first: false, last: false },
            Leg { address: 0x3000, len: 30, first: false, last: true },
        ];
        for leg in legs {
            ring.populate(&cache, ChannelId::Tx, leg, 2).unwrap();
        }

        let flags: Vec<_> = storage[..3]
            .iter()
            .map(|d| (d.control().is_set(CONTROL::SOF), d.control().is_set(CONTROL::EOF)))
            .collect();
        assert_eq!(flags, [(true, false), (false, false), (false, true)]);
        assert_eq!(storage[2].control().read(CONTROL::BUFFER_LENGTH), 30);
        assert!(storage[..3].iter().all(|d| d.app(0) == 2));
    }

    #[test]
    fn oversized_leg_rejected() {
        let mut storage: [Descriptor; 2] = Default::default();
        let mut ring = ring(&mut storage);
        let leg = Leg::single(0x1000, MAX_TRANSFER_LEN as usize + 1);
        assert_eq!(
            ring.populate(
                &Coherent,
                ChannelId::Tx,
                leg,
                0
            ),
            Err(Error::InvalidArgument)
        );
        assert!(ring.first().is_free());
        assert_eq!(ring.populated(), 1);
    }

    #[test]
    fn rx_alignment_with_cache_maintenance() {
        let mut storage: [Descriptor; 2] = Default::default();
        let mut ring = ring(&mut storage);
        let cache = RecordingCache::new(Some(64));

        for leg in [Leg::single(0x1004, 128), Leg::single(0x1000, 100)] {
            assert_eq!(
                ring.populate(&cache, ChannelId::Rx, leg, 0),
                Err(Error::InvalidArgument)
            );
        }
        assert!(ring.first().is_free());
        assert_eq!(ring.populated(), 1);
        assert!(!cache.ops().contains(&CacheOp::Invalidate(0x1004, 128)));

        ring.populate(&cache, ChannelId::Rx, Leg::single(0x1000, 128), 0)
            .unwrap();
        assert!(cache.ops().contains(&CacheOp::Invalidate(0x1000, 128)));
        assert_eq!(
            cache.ops().last(),
            Some(&CacheOp::Flush(ring.first().address(), DESCRIPTOR_SIZE))
        );
    }

    #[test]
    fn tx_buffer_flushed() {
        let mut storage: [Descriptor; 2] = Default::default();
        let mut ring = ring(&mut storage);
        let cache = RecordingCache::new(Some(64));

        // TX buffers carry no alignment requirement
        ring.populate(&cache, ChannelId::Tx, Leg::single(0x1003, 7), 0)
            .unwrap();
        assert!(cache.ops().contains(&CacheOp::Flush(0x1003, 7)));
    }

    #[test]
    fn reclaim_in_ring_order() {
        let mut storage: [Descriptor; 4] = Default::default();
        let mut ring = ring(&mut storage);
        let cache = Coherent;
        for n in 0..3 {
            let leg = Leg::single(0x1000 * (n + 1), 16 * (n + 1));
            ring.populate(&cache, ChannelId::Tx, leg, 0).unwrap();
        }

        // Slot 2 finishes before slot 1; reclaim must stop at slot 1
        complete(&ring.descriptors[0]);
        complete(&ring.descriptors[2]);
        let mut seen = Vec::new();
        let count = ring.reclaim(&cache, |index, _, status| {
            seen.push((index, status.read(STATUS::TRANSFERRED)))
        });
        assert_eq!(count, 1);
        assert_eq!(seen, [(0, 16)]);
        assert_eq!(ring.completion(), 1);
        assert!(ring.descriptors[0].is_free());

        complete(&ring.descriptors[1]);
        seen.clear();
        let count = ring.reclaim(&cache, |index, _, status| {
            seen.push((index, status.read(STATUS::TRANSFERRED)))
        });
        assert_eq!(count, 2);
        assert_eq!(seen, [(1, 32), (2, 48)]);
        assert_eq!(ring.completion(), 3);
    }

    #[test]
    fn error_status_still_reclaimed() {
        let mut storage: [Descriptor; 2] = Default::default();
        let mut ring = ring(&mut storage);
        let cache = Coherent;
        ring.populate(&cache, ChannelId::Tx, Leg::single(0x1000, 16), 0)
            .unwrap();
        ring.first()
            .write_status(DescriptorStatus::new(STATUS::SLAVE_ERROR::SET.value));

        let mut results = Vec::new();
        ring.reclaim(&cache, |_, _, status| results.push(transfer_result(status)));
        assert_eq!(results, [Err(crate::axidma::TransferError::SlaveError)]);
        assert!(ring.first().is_free());
    }

    #[test]
    fn cursors_wrap() {
        let mut storage: [Descriptor; 3] = Default::default();
        let mut ring = ring(&mut storage);
        let cache = Coherent;

        for round in 0..7 {
            let index = ring
                .populate(&cache, ChannelId::Tx, Leg::single(0x1000, 4), 0)
                .unwrap();
            assert_eq!(index, round % 3);
            complete(ring.tail());
            assert_eq!(ring.reclaim(&cache, |_, _, _| {}), 1);
            assert_eq!(ring.completion(), (round + 1) % 3);
        }
    }
}
