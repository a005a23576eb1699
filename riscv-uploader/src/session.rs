//! One attached target.
//!
//! A [`Session`] owns the probe link for the duration of one upload and is
//! handed by mutable reference into every driver call. Register sequencing
//! on the target (address-then-command, enable-then-operate) is inherently
//! ordered, so exclusive ownership of the link is what makes the drivers
//! sound.

use std::path::Path;
use std::time::Duration;

use riscv_uploader_target::Target;

use crate::probe::{AccessWidth, ProbeError, TargetProbe};

/// An attached target: the probe link plus the chip description.
pub struct Session {
    probe: Box<dyn TargetProbe>,
    target: Target,
}

impl Session {
    /// Attach to a target through the given probe.
    pub fn attach(probe: Box<dyn TargetProbe>, target: Target) -> Session {
        Session { probe, target }
    }

    /// The description of the attached chip.
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Halt the core.
    pub fn halt(&mut self) -> Result<(), ProbeError> {
        self.probe.halt()
    }

    /// Resume execution, optionally at the given address.
    pub fn resume(&mut self, address: Option<u32>) -> Result<(), ProbeError> {
        self.probe.resume(address)
    }

    /// Reset the target and leave the core halted.
    pub fn reset_and_halt(&mut self) -> Result<(), ProbeError> {
        self.probe.reset_and_halt()
    }

    /// Read one 32-bit word.
    pub fn read_word(&mut self, address: u32) -> Result<u32, ProbeError> {
        Ok(self.probe.read_memory(address, AccessWidth::Bits32, 1)?[0])
    }

    /// Write one 32-bit word.
    pub fn write_word(&mut self, address: u32, value: u32) -> Result<(), ProbeError> {
        self.probe.write_memory(address, AccessWidth::Bits32, &[value])
    }

    /// Read a block of 32-bit words.
    pub fn read_words(&mut self, address: u32, count: usize) -> Result<Vec<u32>, ProbeError> {
        self.probe.read_memory(address, AccessWidth::Bits32, count)
    }

    /// Write a block of 32-bit words.
    pub fn write_words(&mut self, address: u32, words: &[u32]) -> Result<(), ProbeError> {
        self.probe.write_memory(address, AccessWidth::Bits32, words)
    }

    /// Read a block of bytes using 8-bit accesses.
    pub fn read_bytes(&mut self, address: u32, count: usize) -> Result<Vec<u8>, ProbeError> {
        let words = self.probe.read_memory(address, AccessWidth::Bits8, count)?;
        Ok(words.into_iter().map(|word| word as u8).collect())
    }

    /// Write a block of bytes using 8-bit accesses.
    pub fn write_bytes(&mut self, address: u32, data: &[u8]) -> Result<(), ProbeError> {
        let words: Vec<u32> = data.iter().map(|&byte| u32::from(byte)).collect();
        self.probe.write_memory(address, AccessWidth::Bits8, &words)
    }

    /// Run a raw probe server command.
    pub fn command(&mut self, command: &str) -> Result<String, ProbeError> {
        self.probe.run(command)
    }

    /// Set a core register by name.
    pub fn set_register(&mut self, name: &str, value: u32) -> Result<(), ProbeError> {
        self.command(&format!("set_reg {{{name} {value:#x}}}"))
            .map(|_| ())
    }

    /// Mask machine interrupts so a resident driver runs undisturbed.
    pub fn disable_interrupts(&mut self) -> Result<(), ProbeError> {
        self.command("set_reg {mstatus 0 mie 0}").map(|_| ())
    }

    /// Arm a 4-byte write watchpoint at the given address.
    pub fn set_watchpoint(&mut self, address: u32) -> Result<(), ProbeError> {
        self.command(&format!("wp {address:#x} 4 w")).map(|_| ())
    }

    /// Remove the watchpoint at the given address.
    pub fn clear_watchpoint(&mut self, address: u32) -> Result<(), ProbeError> {
        self.command(&format!("rwp {address:#x}")).map(|_| ())
    }

    /// Block until the core halts, or the server-side timeout expires.
    pub fn wait_halted(&mut self, timeout: Duration) -> Result<(), ProbeError> {
        self.command(&format!("wait_halt {}", timeout.as_millis()))
            .map(|_| ())
    }

    /// Execute one instruction.
    pub fn step(&mut self) -> Result<(), ProbeError> {
        self.command("step").map(|_| ())
    }

    /// Load an image file into target memory through the probe server.
    pub fn load_image(&mut self, path: &Path) -> Result<(), ProbeError> {
        self.command(&format!("load_image {{{}}}", path.display()))
            .map(|_| ())
    }
}
