//! Scatter-gather descriptors.
//!
//! A descriptor is a 64-byte aligned record in memory that hardware reads to learn which buffer
//! to transfer, and writes back to report completion. Its fields are little-endian 32-bit words
//! in this fixed order:
//!
//! | offset | field                |
//! |--------|----------------------|
//! | 0x00   | next descriptor 31:0 |
//! | 0x04   | next descriptor 63:32|
//! | 0x08   | buffer address 31:0  |
//! | 0x0C   | buffer address 63:32 |
//! | 0x10   | reserved             |
//! | 0x14   | reserved             |
//! | 0x18   | control              |
//! | 0x1C   | status               |
//! | 0x20   | app0 .. app4         |
//!
//! A descriptor whose control and status words are both zero is free. Any status bit above the
//! transferred-length field means hardware has finished with it, successfully or not.

use core::sync::atomic::{AtomicU32, Ordering};

use tock_registers::{register_bitfields, LocalRegisterCopy};

use super::TransferError;

register_bitfields! {
    u32,

    /// Control word of a descriptor
    pub CONTROL [
        /// Length of the associated buffer in bytes
        BUFFER_LENGTH OFFSET(0) NUMBITS(26) [],
        /// Buffer holds the end of a frame
        EOF OFFSET(26) NUMBITS(1) [],
        /// Buffer holds the start of a frame
        SOF OFFSET(27) NUMBITS(1) []
    ],

    /// Status word of a descriptor, written back by hardware
    pub STATUS [
        /// Number of bytes transferred
        TRANSFERRED OFFSET(0) NUMBITS(26) [],
        /// Internal DMA error, e.g. a zero-length transfer
        INTERNAL_ERROR OFFSET(28) NUMBITS(1) [],
        /// SLVERR on the AXI bus from memory
        SLAVE_ERROR OFFSET(29) NUMBITS(1) [],
        /// DECERR on the AXI bus from memory
        DECODE_ERROR OFFSET(30) NUMBITS(1) [],
        /// Transfer completed
        COMPLETE OFFSET(31) NUMBITS(1) []
    ],

    /// Receive status the stream device reports in `app2` under full checksum offload
    pub APP2 [
        /// Protocol checksum verdict. Other values mean the checksum verified or was not
        /// computed.
        CHECKSUM OFFSET(3) NUMBITS(3) [
            IpError = 5,
            UdpError = 6,
            TcpError = 7
        ],
        /// Frame check sequence mismatch
        FCS_ERROR OFFSET(8) NUMBITS(1) []
    ]
}

/// Control word of a descriptor
pub type DescriptorControl = LocalRegisterCopy<u32, CONTROL::Register>;

/// Status word of a descriptor
pub type DescriptorStatus = LocalRegisterCopy<u32, STATUS::Register>;

/// Checksum offload result found in `app2` of a received descriptor
pub type ChecksumStatus = LocalRegisterCopy<u32, APP2::Register>;

/// Largest buffer a single descriptor can describe, in bytes
pub const MAX_TRANSFER_LEN: u32 = CONTROL::BUFFER_LENGTH.mask;

/// Required alignment of every descriptor address
pub const DESCRIPTOR_ALIGN: usize = 64;

/// `app0` value requesting full checksum offload from the stream device (TX)
pub const APP0_CHECKSUM_OFFLOAD_FULL: u32 = 0x0000_0002;
/// `app0` value requesting no checksum offload (TX)
pub const APP0_CHECKSUM_OFFLOAD_NONE: u32 = 0x0000_0000;

/// Hardware has finished with the descriptor, successfully or not: some bit above the
/// transferred length is set
pub fn is_finished(status: DescriptorStatus) -> bool {
    status.get() & !(STATUS::TRANSFERRED.mask << STATUS::TRANSFERRED.shift) != 0
}

/// Maps the error bits of a status word to a transfer result. Decode errors take precedence
/// over slave errors, which take precedence over internal errors.
pub fn transfer_result(status: DescriptorStatus) -> Result<(), TransferError> {
    if status.is_set(STATUS::DECODE_ERROR) {
        Err(TransferError::DecodeError)
    } else if status.is_set(STATUS::SLAVE_ERROR) {
        Err(TransferError::SlaveError)
    } else if status.is_set(STATUS::INTERNAL_ERROR) {
        Err(TransferError::InternalError)
    } else {
        Ok(())
    }
}

/// Maps a checksum offload status to a transfer result. A frame check error outranks the
/// protocol checksum verdict.
pub fn checksum_result(status: ChecksumStatus) -> Result<(), TransferError> {
    if status.is_set(APP2::FCS_ERROR) {
        return Err(TransferError::FrameCheck);
    }
    match status.read_as_enum(APP2::CHECKSUM) {
        Some(APP2::CHECKSUM::Value::IpError) => Err(TransferError::IpChecksum),
        Some(APP2::CHECKSUM::Value::UdpError) => Err(TransferError::UdpChecksum),
        Some(APP2::CHECKSUM::Value::TcpError) => Err(TransferError::TcpChecksum),
        None => Ok(()),
    }
}

/// A scatter-gather descriptor.
///
/// Descriptors are shared with hardware, which writes the status and application words while
/// software holds references to them, hence every word is an atomic accessed through methods.
#[repr(C, align(64))]
pub struct Descriptor {
    nxtdesc: AtomicU32,
    nxtdesc_msb: AtomicU32,
    buffer_address: AtomicU32,
    buffer_address_msb: AtomicU32,
    _reserved1: AtomicU32,
    _reserved2: AtomicU32,
    control: AtomicU32,
    status: AtomicU32,
    app: [AtomicU32; 5],
}

impl Default for Descriptor {
    fn default() -> Self {
        Self::new()
    }
}

impl Descriptor {
    /// A free descriptor, used to initialize descriptor storage:
    ///
    /// ```
    /// use axi_dma_hal::axidma::Descriptor;
    ///
    /// static mut TX_DESCRIPTORS: [Descriptor; 16] = [Descriptor::EMPTY; 16];
    /// ```
    pub const EMPTY: Self = Self::new();

    pub const fn new() -> Self {
        Self {
            nxtdesc: AtomicU32::new(0),
            nxtdesc_msb: AtomicU32::new(0),
            buffer_address: AtomicU32::new(0),
            buffer_address_msb: AtomicU32::new(0),
            _reserved1: AtomicU32::new(0),
            _reserved2: AtomicU32::new(0),
            control: AtomicU32::new(0),
            status: AtomicU32::new(0),
            app: [const { AtomicU32::new(0) }; 5],
        }
    }

    /// Address of this descriptor as seen by hardware
    #[inline(always)]
    pub fn address(&self) -> usize {
        self as *const Self as usize
    }

    pub fn control(&self) -> DescriptorControl {
        DescriptorControl::new(self.control.load(Ordering::Relaxed))
    }

    pub fn status(&self) -> DescriptorStatus {
        DescriptorStatus::new(self.status.load(Ordering::Relaxed))
    }

    /// Checksum offload result the stream device left in `app2`
    pub fn checksum_status(&self) -> ChecksumStatus {
        ChecksumStatus::new(self.app(2))
    }

    /// Neither populated by software nor waiting to be reclaimed
    pub fn is_free(&self) -> bool {
        self.control.load(Ordering::Relaxed) == 0
            && self.status.load(Ordering::Relaxed) == 0
    }

    pub fn next_address(&self) -> u64 {
        join(
            self.nxtdesc.load(Ordering::Relaxed),
            self.nxtdesc_msb.load(Ordering::Relaxed),
        )
    }

    pub fn buffer_address(&self) -> u64 {
        join(
            self.buffer_address.load(Ordering::Relaxed),
            self.buffer_address_msb.load(Ordering::Relaxed),
        )
    }

    /// Application word `index` (0 to 4). Out of range indices read as zero.
    pub fn app(&self, index: usize) -> u32 {
        self.app
            .get(index)
            .map_or(0, |word| word.load(Ordering::Relaxed))
    }

    /// Overwrites the status word the way hardware does when it finishes with a descriptor.
    ///
    /// Only hardware writes status during normal operation; this exists for loopback benches and
    /// simulations standing in for the DMA engine.
    pub fn write_status(&self, status: DescriptorStatus) {
        self.status.store(status.get(), Ordering::Release);
    }

    /// Overwrites an application word the way the stream device does on receive. Out of range
    /// indices are ignored. See [`Descriptor::write_status`].
    pub fn write_app(&self, index: usize, value: u32) {
        if let Some(word) = self.app.get(index) {
            word.store(value, Ordering::Release);
        }
    }

    pub(crate) fn set_next(&self, address: usize) {
        let (low, high) = split(address as u64);
        self.nxtdesc.store(low, Ordering::Relaxed);
        self.nxtdesc_msb.store(high, Ordering::Relaxed);
    }

    pub(crate) fn set_buffer(&self, address: usize) {
        let (low, high) = split(address as u64);
        self.buffer_address.store(low, Ordering::Relaxed);
        self.buffer_address_msb.store(high, Ordering::Relaxed);
    }

    pub(crate) fn set_app0(&self, value: u32) {
        self.app[0].store(value, Ordering::Relaxed);
    }

    /// Writing the control word also clears the start and end of frame flags of a previous use
    pub(crate) fn set_control(&self, control: DescriptorControl) {
        self.control.store(control.get(), Ordering::Relaxed);
    }

    /// Marks the descriptor free so hardware neither transfers it twice nor reports it as an
    /// already-completed fetch
    pub(crate) fn release(&self) {
        self.control.store(0, Ordering::Relaxed);
        self.status.store(0, Ordering::Relaxed);
    }
}

#[inline(always)]
const fn split(address: u64) -> (u32, u32) {
    (address as u32, (address >> 32) as u32)
}

#[inline(always)]
const fn join(low: u32, high: u32) -> u64 {
    ((high as u64) << 32) | low as u64
}
