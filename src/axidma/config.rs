use super::{Error, TransferError};
use crate::time::MilliSeconds;

/// Channel number of the outbound (MM2S) channel
pub const TX_CHANNEL_NUM: u32 = 0;
/// Channel number of the inbound (S2MM) channel
pub const RX_CHANNEL_NUM: u32 = 1;
/// The controller always has exactly one outbound and one inbound channel
pub const NUM_CHANNELS: u32 = 2;

/// Linked channel selector: no checksum offload
pub const LINKED_CHANNEL_NO_CSUM_OFFLOAD: u32 = 0x0;
/// Linked channel selector: full Ethernet checksum offload
pub const LINKED_CHANNEL_FULL_CSUM_OFFLOAD: u32 = 0x1;

/// One of the two channels of the controller
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelId {
    /// Outbound, memory to stream
    Tx,
    /// Inbound, stream to memory
    Rx,
}

impl ChannelId {
    /// Index of the channel in the controller's channel numbering
    pub const fn number(self) -> u32 {
        match self {
            ChannelId::Tx => TX_CHANNEL_NUM,
            ChannelId::Rx => RX_CHANNEL_NUM,
        }
    }

    pub(crate) const fn index(self) -> usize {
        self.number() as usize
    }

    /// Fixed hardware direction of the channel
    pub const fn direction(self) -> TransferDirection {
        match self {
            ChannelId::Tx => TransferDirection::MemoryToPeripheral,
            ChannelId::Rx => TransferDirection::PeripheralToMemory,
        }
    }

    pub(crate) const fn name(self) -> &'static str {
        match self {
            ChannelId::Tx => "TX",
            ChannelId::Rx => "RX",
        }
    }
}

impl TryFrom<u32> for ChannelId {
    type Error = Error;

    fn try_from(channel: u32) -> Result<Self, Error> {
        match channel {
            TX_CHANNEL_NUM => Ok(ChannelId::Tx),
            RX_CHANNEL_NUM => Ok(ChannelId::Rx),
            _ => {
                error!(
                    "Invalid channel {} - must be < {}!",
                    channel, NUM_CHANNELS
                );
                Err(Error::InvalidArgument)
            }
        }
    }
}

/// The TransferDirection represents the available options for transfer types
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferDirection {
    MemoryToMemory,
    MemoryToPeripheral,
    PeripheralToMemory,
    PeripheralToPeripheral,
}

/// How the source or destination address moves between transferred words
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressAdjust {
    #[default]
    Increment,
    /// Not supported by this controller
    Decrement,
    /// Fixed address, e.g. a FIFO
    NoChange,
}

/// One buffer leg of a transfer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BlockConfig {
    /// Buffer read by the TX channel
    pub source_address: usize,
    /// Buffer written by the RX channel
    pub dest_address: usize,
    /// Size of the block in bytes
    pub block_size: usize,
    pub source_addr_adj: AddressAdjust,
    pub dest_addr_adj: AddressAdjust,
}

impl BlockConfig {
    /// A block with incrementing source and destination addresses
    pub const fn new(
        source_address: usize,
        dest_address: usize,
        block_size: usize,
    ) -> Self {
        Self {
            source_address,
            dest_address,
            block_size,
            source_addr_adj: AddressAdjust::Increment,
            dest_addr_adj: AddressAdjust::Increment,
        }
    }

    /// Outbound block reading `buffer`
    pub fn source(buffer: &[u8]) -> Self {
        Self::new(buffer.as_ptr() as usize, 0, buffer.len())
    }

    /// Inbound block filling `buffer`
    pub fn destination(buffer: &mut [u8]) -> Self {
        Self::new(0, buffer.as_mut_ptr() as usize, buffer.len())
    }

    #[must_use]
    pub const fn with_source_addr_adj(mut self, adj: AddressAdjust) -> Self {
        self.source_addr_adj = adj;
        self
    }

    #[must_use]
    pub const fn with_dest_addr_adj(mut self, adj: AddressAdjust) -> Self {
        self.dest_addr_adj = adj;
        self
    }
}

/// Interpretation of the linked channel selector of a [`DmaConfig`]. The application words of
/// each descriptor are passed through to the AXI-Stream device; whether it understands them is
/// up to the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkedChannel {
    /// TX requests no checksum offload
    NoChecksumOffload,
    /// TX requests full checksum offload; RX inspects the returned checksum status of every
    /// descriptor and reports mismatches as transfer errors
    FullChecksumOffload,
}

impl TryFrom<u32> for LinkedChannel {
    type Error = Error;

    fn try_from(selector: u32) -> Result<Self, Error> {
        match selector {
            LINKED_CHANNEL_NO_CSUM_OFFLOAD => Ok(LinkedChannel::NoChecksumOffload),
            LINKED_CHANNEL_FULL_CSUM_OFFLOAD => {
                Ok(LinkedChannel::FullChecksumOffload)
            }
            _ => {
                error!(
                    "Linked channel invalid! Valid values: {} for full checksum offloading, {} for no checksum offloading!",
                    LINKED_CHANNEL_FULL_CSUM_OFFLOAD,
                    LINKED_CHANNEL_NO_CSUM_OFFLOAD
                );
                Err(Error::InvalidArgument)
            }
        }
    }
}

/// Reported to the channel callback once per reclaimed descriptor
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Completion {
    pub channel: ChannelId,
    /// Ring index of the reclaimed descriptor
    pub descriptor: usize,
    /// Bytes transferred, as reported by hardware
    pub transferred: u32,
    pub result: Result<(), TransferError>,
}

/// Completion callback. Runs in interrupt context; any user context is captured by the closure.
pub type Callback<'d> = &'d (dyn Fn(&Completion) + Sync);

/// A channel configuration request: one logical transfer spanning `blocks`.
///
/// ```
/// use axi_dma_hal::axidma::{BlockConfig, DmaConfig, TransferDirection};
///
/// let header = [0u8; 100];
/// let payload = [0u8; 200];
/// let blocks = [BlockConfig::source(&header), BlockConfig::source(&payload)];
/// let config = DmaConfig::new(TransferDirection::MemoryToPeripheral, &blocks);
/// assert_eq!(config.blocks.len(), 2);
/// ```
#[derive(Clone, Copy)]
pub struct DmaConfig<'b, 'd> {
    pub direction: TransferDirection,
    /// Raw linked channel selector, see [`LinkedChannel`]
    pub linked_channel: u32,
    pub blocks: &'b [BlockConfig],
    pub callback: Option<Callback<'d>>,
}

impl<'b, 'd> DmaConfig<'b, 'd> {
    pub const fn new(
        direction: TransferDirection,
        blocks: &'b [BlockConfig],
    ) -> Self {
        Self {
            direction,
            linked_channel: LINKED_CHANNEL_NO_CSUM_OFFLOAD,
            blocks,
            callback: None,
        }
    }

    #[must_use]
    pub const fn with_linked_channel(mut self, linked_channel: u32) -> Self {
        self.linked_channel = linked_channel;
        self
    }

    #[must_use]
    pub const fn with_callback(mut self, callback: Callback<'d>) -> Self {
        self.callback = Some(callback);
        self
    }
}

/// Channel status snapshot
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DmaStatus {
    /// Hardware is neither idle nor halted
    pub busy: bool,
    pub dir: TransferDirection,
}

/// Controller configuration: the hardware description of one instance plus the tuning knobs
/// applied whenever a channel is (re)started.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Number of channels the instance is described with. Must be [`NUM_CHANNELS`].
    pub channels: u32,
    /// Interrupt line of the TX channel
    pub tx_irq: u32,
    /// Interrupt line of the RX channel
    pub rx_irq: u32,
    /// Completed descriptors per completion interrupt
    pub interrupt_threshold: u8,
    /// Delay timeout, in units of 125 clock periods, after which pending completions raise an
    /// interrupt anyway
    pub interrupt_timeout: u8,
    /// Polls of the reset bit before init gives up. The bit is polled at least once.
    pub reset_retries: u32,
    /// Sleep between two polls of the reset bit
    pub reset_poll_interval: MilliSeconds,
}

impl Config {
    pub const fn new(tx_irq: u32, rx_irq: u32) -> Self {
        Self {
            channels: NUM_CHANNELS,
            tx_irq,
            rx_irq,
            interrupt_threshold: 1,
            interrupt_timeout: 16,
            reset_retries: 1000,
            reset_poll_interval: MilliSeconds::from_ticks(1),
        }
    }

    #[must_use]
    pub const fn with_channels(mut self, channels: u32) -> Self {
        self.channels = channels;
        self
    }

    #[must_use]
    pub const fn with_interrupt_threshold(mut self, threshold: u8) -> Self {
        self.interrupt_threshold = threshold;
        self
    }

    #[must_use]
    pub const fn with_interrupt_timeout(mut self, timeout: u8) -> Self {
        self.interrupt_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_reset_retries(mut self, retries: u32) -> Self {
        self.reset_retries = retries;
        self
    }

    #[must_use]
    pub const fn with_reset_poll_interval(mut self, interval: MilliSeconds) -> Self {
        self.reset_poll_interval = interval;
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_channel_numbers() {
        assert_eq!(ChannelId::try_from(0), Ok(ChannelId::Tx));
        assert_eq!(ChannelId::try_from(1), Ok(ChannelId::Rx));
        assert_eq!(ChannelId::try_from(2), Err(Error::InvalidArgument));
        assert_eq!(ChannelId::Rx.direction(), TransferDirection::PeripheralToMemory);
    }

    #[test]
    fn test_linked_channel() {
        assert_eq!(
            LinkedChannel::try_from(LINKED_CHANNEL_FULL_CSUM_OFFLOAD),
            Ok(LinkedChannel::FullChecksumOffload)
        );
        assert_eq!(
            LinkedChannel::try_from(LINKED_CHANNEL_NO_CSUM_OFFLOAD),
            Ok(LinkedChannel::NoChecksumOffload)
        );
        assert_eq!(LinkedChannel::try_from(7), Err(Error::InvalidArgument));
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::new(30, 31);
        assert_eq!(config.channels, NUM_CHANNELS);
        assert_eq!(config.interrupt_threshold, 1);
        assert_eq!(config.interrupt_timeout, 16);
        assert_eq!(config.reset_retries, 1000);
        assert_eq!(config.reset_poll_interval.to_millis(), 1);

        let config = config.with_interrupt_threshold(8).with_channels(3);
        assert_eq!(config.interrupt_threshold, 8);
        assert_eq!(config.channels, 3);
    }
}
