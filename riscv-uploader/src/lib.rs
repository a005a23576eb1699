//! # Firmware uploader for a RISC-V microcontroller family
//!
//! This crate writes firmware images into the on-chip EEPROM, on-chip RAM
//! and the external SPI-NOR flash (behind the SPIFI controller) of a small
//! RISC-V MCU family, by driving a debug probe server's Tcl command port.
//! All device protocol (SPIFI command sequencing, DMA staging, EEPROM
//! page operations, erase/program/verify cycles) runs host-side through
//! remote register access.
//!
//! ## Example
//!
//! ```no_run
//! use riscv_uploader::{BootMode, Session, Target, TclProbe};
//! use riscv_uploader::flashing::{self, DownloadOptions, FlashLoader, Format};
//!
//! let probe = TclProbe::connect("127.0.0.1", TclProbe::DEFAULT_PORT)?;
//! let mut session = Session::attach(Box::new(probe), Target::generic());
//!
//! let mut loader = FlashLoader::new(session.target().clone(), BootMode::Spifi);
//! flashing::load_file(&mut loader, "firmware.hex".as_ref(), Format::Hex)?;
//! loader.commit(&mut session, DownloadOptions::default())?;
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! The crate is built around three interfaces: the [`TargetProbe`] link,
//! the [`Session`] owning it, and the [`flashing::FlashLoader`]
//! orchestrating the per-memory drivers.

#![warn(missing_docs)]

mod error;
pub mod flashing;
pub mod peripherals;
pub mod probe;
mod session;

#[cfg(test)]
pub(crate) mod test;

pub use error::Error;
pub use probe::{AccessWidth, ProbeError, TargetProbe, TclProbe};
pub use session::Session;

// Re-export the target description types; callers should not need to
// depend on the schema crate directly.
pub use riscv_uploader_target::{
    BootMode, ChipVariant, MemorySection, MemoryType, Target, TargetDescriptionError,
};
