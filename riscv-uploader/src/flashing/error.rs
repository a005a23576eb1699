use std::time::Duration;

use riscv_uploader_target::MemoryType;
use thiserror::Error;

use crate::probe::ProbeError;

/// Describes any error that happened during, or in preparation for, the
/// flashing procedure.
///
/// Precondition errors are raised before any hardware mutation occurs.
/// Data-integrity errors abort the current write pass; pages written before
/// the failure are not rolled back.
#[derive(Error, Debug)]
pub enum FlashError {
    /// Talking to the probe server failed. Fatal to the whole attempt.
    #[error("probe communication failed")]
    Probe(#[from] ProbeError),

    /// A page program was asked to move more than one device page.
    #[error("page program of {len} bytes exceeds the {max}-byte page limit")]
    PageTooLarge {
        /// Requested payload length.
        len: usize,
        /// The device page size.
        max: usize,
    },

    /// Read-back data did not match what was written.
    #[error("verify mismatch at {address:#010x}: expected {expected:#04x}, read {actual:#04x}")]
    Mismatch {
        /// Address of the first mismatching element.
        address: u32,
        /// The value that was written.
        expected: u32,
        /// The value that came back.
        actual: u32,
    },

    /// A DMA transfer did not complete in time.
    #[error("DMA channel {channel} did not signal completion within {timeout:?}")]
    DmaTimeout {
        /// The waited-on channel.
        channel: usize,
        /// The expired deadline.
        timeout: Duration,
    },

    /// A DMA channel was started without a configuration.
    #[error("DMA channel {0} used before being configured")]
    DmaChannelUnconfigured(usize),

    /// The flash chip kept its busy bit set past the deadline.
    #[error("flash stayed busy for longer than {timeout:?}")]
    FlashBusyTimeout {
        /// The expired deadline.
        timeout: Duration,
    },

    /// An EEPROM operation was handed more than the 32-word page buffer.
    #[error("EEPROM operation buffer of {0} words exceeds the 32-word page buffer")]
    EepromBufferTooLarge(usize),

    /// The EEPROM still held non-blank cells after the erase retry.
    #[error("EEPROM global erase left non-blank cells after retry")]
    EraseVerifyFailed,

    /// A firmware segment is not covered by any memory section.
    #[error("segment at {offset:#010x} does not fall into any memory section")]
    NoSection {
        /// Start address of the offending segment.
        offset: u32,
    },

    /// A firmware segment runs past the end of its memory section.
    #[error("segment at {offset:#010x} ({len} bytes) overflows the {section:?} section")]
    SectionOverflow {
        /// Start address of the offending segment.
        offset: u32,
        /// Length of the offending segment.
        len: usize,
        /// The section it resolved into.
        section: MemoryType,
    },

    /// The resident driver reported a failure through its status word.
    #[error("resident driver reported status {code} (page {page}, byte {byte})")]
    AgentFailure {
        /// Status code from the low byte of the status word.
        code: u8,
        /// Index of the failing page.
        page: u8,
        /// Byte offset of the failure inside the page.
        byte: u16,
    },

    /// Clock bring-up did not stick.
    #[error("clock bring-up readback mismatch after retry")]
    PowerInit,
}
