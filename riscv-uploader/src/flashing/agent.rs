//! Resident driver ("agent") support.
//!
//! For bulk writes the register-by-register protocol is dominated by probe
//! round-trip latency. The alternative is a small program loaded into
//! target RAM that performs the device protocol on-target while the host
//! only fills a staging buffer and synchronizes on a hardware watchpoint:
//! the agent writes its status word when done, the watchpoint halts the
//! core, and one single step makes the freshly written word readable.
//!
//! The contract with an agent blob is purely data layout: where it loads,
//! where its staging buffer and status word live, and which register
//! carries the per-round trigger value.

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::FlashError;
use crate::session::Session;

const AGENT_START_TIMEOUT: Duration = Duration::from_secs(2);
const AGENT_ROUND_TIMEOUT: Duration = Duration::from_secs(10);

/// Data-layout contract of one resident driver image.
#[derive(Debug, Clone)]
pub struct AgentImage {
    /// The blob on the host filesystem, loaded verbatim.
    pub path: PathBuf,
    /// Where execution starts after loading.
    pub entry: u32,
    /// Base of the staging buffer the host fills per round.
    pub staging: u32,
    /// Size of the staging buffer in bytes.
    pub staging_size: u32,
    /// Address of the status word the agent writes when a round is done.
    pub status_word: u32,
    /// Core register carrying the trigger value for the next round.
    pub trigger_register: &'static str,
}

impl AgentImage {
    /// Layout of the shipped SPIFI sector-writer blob: 4 KiB staging
    /// buffer, trigger register carries the sector address.
    pub fn spifi(path: impl Into<PathBuf>) -> Self {
        AgentImage {
            path: path.into(),
            entry: 0x0200_0000,
            staging: 0x0200_2000,
            staging_size: 4 * 1024,
            status_word: 0x0200_3000,
            trigger_register: "t6",
        }
    }

    /// Layout of the shipped EEPROM writer blob: 8 KiB staging buffer,
    /// trigger register carries the byte length of the combined image.
    pub fn eeprom(path: impl Into<PathBuf>) -> Self {
        AgentImage {
            path: path.into(),
            entry: 0x0200_0000,
            staging: 0x0200_1000,
            staging_size: 8 * 1024,
            status_word: 0x0200_3000,
            trigger_register: "t6",
        }
    }

    /// The blob path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// The decoded agent status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentStatus {
    /// Zero on success.
    pub code: u8,
    /// Index of the failing page within the round.
    pub page: u8,
    /// Byte offset of the failure inside the failing page.
    pub byte_offset: u16,
}

impl AgentStatus {
    /// Unpack the status word: low byte status code, next byte failing
    /// page, high half failing byte offset.
    pub fn decode(word: u32) -> Self {
        AgentStatus {
            code: (word & 0xFF) as u8,
            page: ((word >> 8) & 0xFF) as u8,
            byte_offset: (word >> 16) as u16,
        }
    }

    /// Whether the round completed cleanly.
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }

    fn into_result(self) -> Result<(), FlashError> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(FlashError::AgentFailure {
                code: self.code,
                page: self.page,
                byte: self.byte_offset,
            })
        }
    }
}

/// Load the agent into RAM and let it run up to its idle loop.
///
/// Interrupts are masked first: a firmware interrupt handler taking over
/// mid-write would corrupt the device protocol.
pub(super) fn start(session: &mut Session, agent: &AgentImage) -> Result<(), FlashError> {
    session.halt()?;
    session.disable_interrupts()?;
    session.set_watchpoint(agent.status_word)?;

    tracing::info!("uploading resident driver {}", agent.path.display());
    session.load_image(&agent.path)?;

    session.resume(Some(agent.entry))?;
    session.wait_halted(AGENT_START_TIMEOUT)?;
    Ok(())
}

/// Run one agent round: set the trigger, resume, wait for the status-word
/// watchpoint, step over the halting store, read and decode the result.
///
/// The watchpoint fires before the word changes; the single step is what
/// makes the new value visible.
pub(super) fn run_round(
    session: &mut Session,
    agent: &AgentImage,
    trigger_value: u32,
) -> Result<(), FlashError> {
    session.set_register(agent.trigger_register, trigger_value)?;
    session.resume(None)?;
    session.wait_halted(AGENT_ROUND_TIMEOUT)?;
    session.step()?;

    let word = session.read_word(agent.status_word)?;
    AgentStatus::decode(word).into_result()
}

/// Drop the completion watchpoint again.
pub(super) fn stop(session: &mut Session, agent: &AgentImage) -> Result<(), FlashError> {
    session.clear_watchpoint(agent.status_word)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_word_decodes_into_code_page_and_byte() {
        let status = AgentStatus::decode(0x00BE_0502);
        assert_eq!(status.code, 2);
        assert_eq!(status.page, 5);
        assert_eq!(status.byte_offset, 0xBE);
        assert!(!status.is_ok());

        assert!(AgentStatus::decode(0).is_ok());
    }
}
