//! The DMA controller, used to stream SPIFI payloads without a register
//! round trip per word.
//!
//! Channels are configured fresh for every flash session. Once a transfer
//! is started the only operations are poll-to-completion or give up; the
//! controller has no cancellation path.

use std::time::{Duration, Instant};

use crate::flashing::FlashError;
use crate::peripherals::map;
use crate::session::Session;

/// Number of independent channels the controller has.
pub const CHANNEL_COUNT: usize = 4;

// Channel config word fields.
const CFG_ENABLE_S: u32 = 0;
const CFG_PRIOR_S: u32 = 1;
const CFG_READ_MODE_S: u32 = 3;
const CFG_WRITE_MODE_S: u32 = 4;
const CFG_READ_INCREMENT_S: u32 = 5;
const CFG_WRITE_INCREMENT_S: u32 = 6;
const CFG_READ_SIZE_S: u32 = 7;
const CFG_WRITE_SIZE_S: u32 = 9;
const CFG_READ_BURST_S: u32 = 11;
const CFG_WRITE_BURST_S: u32 = 14;
const CFG_READ_REQ_S: u32 = 17;
const CFG_WRITE_REQ_S: u32 = 21;
const CFG_ACK_READ_S: u32 = 25;
const CFG_ACK_WRITE_S: u32 = 26;

// Control register fields.
const CONTROL_CLEAR_LOCAL_IRQ_M: u32 = (1 << CHANNEL_COUNT) - 1;
const CONTROL_CLEAR_GLOBAL_IRQ_M: u32 = 1 << CHANNEL_COUNT;
const CONTROL_CLEAR_ERROR_IRQ_M: u32 = 1 << (CHANNEL_COUNT + 1);

/// Channel arbitration priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPriority {
    /// Lowest arbitration priority.
    Low = 0,
    /// Below-normal priority.
    Medium = 1,
    /// Above-normal priority.
    High = 2,
    /// Highest arbitration priority.
    VeryHigh = 3,
}

/// What kind of bus endpoint a channel side talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    /// The address is a peripheral data register.
    Periphery = 0,
    /// The address is plain memory.
    Memory = 1,
}

/// Transfer element size of one channel side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelSize {
    /// 8-bit elements.
    Byte = 0,
    /// 16-bit elements.
    HalfWord = 1,
    /// 32-bit elements.
    Word = 2,
}

/// Peripheral request line routed to a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRequest {
    /// UART 0 request line.
    Usart0 = 0,
    /// UART 1 request line.
    Usart1 = 1,
    /// Crypto block request line.
    Crypto = 2,
    /// SPI 0 request line.
    Spi0 = 3,
    /// SPI 1 request line.
    Spi1 = 4,
    /// I2C 0 request line.
    I2c0 = 5,
    /// I2C 1 request line.
    I2c1 = 6,
    /// SPIFI controller request line.
    Spifi = 7,
    /// 32-bit timer 1 request line.
    Timer32_1 = 8,
    /// 32-bit timer 2 request line.
    Timer32_2 = 9,
    /// 32-bit timer 0 request line.
    Timer32_0 = 10,
}

/// Full configuration of one DMA channel.
///
/// The fields map one-to-one onto the packed 32-bit channel config word;
/// [`ChannelConfig::pack`] is the only place the bit layout lives.
#[derive(Debug, Clone, Copy)]
pub struct ChannelConfig {
    /// Arbitration priority.
    pub priority: ChannelPriority,
    /// Endpoint kind on the read side.
    pub read_mode: ChannelMode,
    /// Endpoint kind on the write side.
    pub write_mode: ChannelMode,
    /// Advance the read address after each element.
    pub read_increment: bool,
    /// Advance the write address after each element.
    pub write_increment: bool,
    /// Element size on the read side.
    pub read_size: ChannelSize,
    /// Element size on the write side.
    pub write_size: ChannelSize,
    /// log2 of the read burst length in elements.
    pub read_burst: u32,
    /// log2 of the write burst length in elements.
    pub write_burst: u32,
    /// Request line gating reads.
    pub read_request: ChannelRequest,
    /// Request line gating writes.
    pub write_request: ChannelRequest,
    /// Emit acknowledge strobes on the read side.
    pub read_ack: bool,
    /// Emit acknowledge strobes on the write side.
    pub write_ack: bool,
}

impl ChannelConfig {
    /// Pack the configuration into the channel config word, enable bit set.
    pub fn pack(&self) -> u32 {
        (1 << CFG_ENABLE_S)
            | ((self.priority as u32) << CFG_PRIOR_S)
            | ((self.read_mode as u32) << CFG_READ_MODE_S)
            | ((self.write_mode as u32) << CFG_WRITE_MODE_S)
            | (u32::from(self.read_increment) << CFG_READ_INCREMENT_S)
            | (u32::from(self.write_increment) << CFG_WRITE_INCREMENT_S)
            | ((self.read_size as u32) << CFG_READ_SIZE_S)
            | ((self.write_size as u32) << CFG_WRITE_SIZE_S)
            | (self.read_burst << CFG_READ_BURST_S)
            | (self.write_burst << CFG_WRITE_BURST_S)
            | ((self.read_request as u32) << CFG_READ_REQ_S)
            | ((self.write_request as u32) << CFG_WRITE_REQ_S)
            | (u32::from(self.read_ack) << CFG_ACK_READ_S)
            | (u32::from(self.write_ack) << CFG_ACK_WRITE_S)
    }
}

/// The DMA controller with the per-channel configurations chosen for this
/// session.
#[derive(Debug, Default)]
pub struct DmaEngine {
    configs: [Option<ChannelConfig>; CHANNEL_COUNT],
}

impl DmaEngine {
    /// An engine with no channels configured yet.
    pub fn new() -> Self {
        DmaEngine::default()
    }

    /// Set the configuration used when `channel` is started.
    pub fn configure(&mut self, channel: usize, config: ChannelConfig) {
        self.configs[channel] = Some(config);
    }

    /// Bring the controller into a known state: zero the full channel
    /// register block and drop any latched interrupt state.
    pub fn init(&self, session: &mut Session) -> Result<(), FlashError> {
        session.write_words(map::DMA_REGS, &[0; 16])?;
        session.write_word(
            map::DMA_CONTROL,
            CONTROL_CLEAR_LOCAL_IRQ_M | CONTROL_CLEAR_GLOBAL_IRQ_M | CONTROL_CLEAR_ERROR_IRQ_M,
        )?;
        // Select live channel status for readback.
        session.write_word(map::DMA_CONTROL, 0)?;
        Ok(())
    }

    /// Kick off a transfer on `channel`.
    ///
    /// Destination, source, length and config land as one 4-word burst on
    /// the channel register block; the enable bit lives in the config word
    /// written last.
    pub fn start(
        &self,
        session: &mut Session,
        channel: usize,
        source: u32,
        destination: u32,
        length: u32,
    ) -> Result<(), FlashError> {
        let config = self.configs[channel].ok_or(FlashError::DmaChannelUnconfigured(channel))?;

        session.write_words(
            map::dma_channel_destination(channel),
            &[destination, source, length, config.pack()],
        )?;
        Ok(())
    }

    /// Poll the per-channel ready bit until the transfer completes.
    pub fn wait(
        &self,
        session: &mut Session,
        channel: usize,
        timeout: Duration,
    ) -> Result<(), FlashError> {
        let mask = 1 << channel;
        let deadline = Instant::now() + timeout;

        loop {
            if session.read_word(map::DMA_CONTROL)? & mask != 0 {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(FlashError::DmaTimeout { channel, timeout });
            }
        }
    }
}
