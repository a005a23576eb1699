//! Access to the remote debug probe server.
//!
//! Everything the rest of the crate does to the target goes through the
//! [`TargetProbe`] trait: run control, register-level memory access, and a
//! raw command escape hatch for the few control-flow features (watchpoints,
//! image loading, single stepping) that have no typed equivalent.

mod tcl;

pub use tcl::TclProbe;

use thiserror::Error;

/// Memory access width for block reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessWidth {
    /// 8 bit accesses.
    Bits8,
    /// 16 bit accesses.
    Bits16,
    /// 32 bit accesses.
    Bits32,
    /// 64 bit accesses.
    Bits64,
}

impl AccessWidth {
    /// The width in bits, as the remote protocol spells it.
    pub fn bits(self) -> u32 {
        match self {
            AccessWidth::Bits8 => 8,
            AccessWidth::Bits16 => 16,
            AccessWidth::Bits32 => 32,
            AccessWidth::Bits64 => 64,
        }
    }
}

/// Errors produced while talking to the debug probe server.
///
/// All of these are fatal to the current upload attempt. There is no
/// automatic reconnect; the caller reports the error and exits non-zero.
#[derive(Error, Debug)]
pub enum ProbeError {
    /// The connection to the probe server could not be established.
    #[error("could not connect to the probe server at {address}")]
    Connect {
        /// The `host:port` pair the connect was attempted against.
        address: String,
        /// The underlying socket error.
        #[source]
        source: std::io::Error,
    },
    /// The connection dropped or another I/O error occurred mid-command.
    #[error("probe transport error")]
    Io(#[from] std::io::Error),
    /// The remote side reported a command failure.
    #[error("remote command failed with code {code}: {message}")]
    Remote {
        /// Status code reported by the server.
        code: i32,
        /// Error message reported by the server.
        message: String,
    },
    /// The reply stream violated the framing rules.
    #[error("malformed probe reply: {0}")]
    Protocol(String),
}

/// A request/reply link to a running debug probe server.
///
/// The typed primitives below are the only way the drivers touch target
/// registers and memory; [`TargetProbe::run`] exists solely for run-control
/// features such as watchpoints, `load_image` and single stepping.
pub trait TargetProbe {
    /// Halt the core.
    fn halt(&mut self) -> Result<(), ProbeError>;

    /// Resume execution, optionally at the given address.
    fn resume(&mut self, address: Option<u32>) -> Result<(), ProbeError>;

    /// Reset the target and leave the core halted.
    fn reset_and_halt(&mut self) -> Result<(), ProbeError>;

    /// Read `count` elements of the given width starting at `address`.
    ///
    /// Elements are returned zero-extended to `u32`, one per element, in
    /// target order.
    fn read_memory(
        &mut self,
        address: u32,
        width: AccessWidth,
        count: usize,
    ) -> Result<Vec<u32>, ProbeError>;

    /// Write the given elements of the given width starting at `address`.
    fn write_memory(
        &mut self,
        address: u32,
        width: AccessWidth,
        data: &[u32],
    ) -> Result<(), ProbeError>;

    /// Run a raw server command and return its reply.
    fn run(&mut self, command: &str) -> Result<String, ProbeError>;
}
