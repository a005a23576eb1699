//! Flash programming operations.
//!
//! This module provides the page-oriented write paths for the three
//! writable memories (on-chip EEPROM, on-chip RAM and the external
//! SPI-NOR flash behind the SPIFI controller), plus the [`FlashLoader`]
//! that sequences them for one firmware image.
//!
//! ## Example
//!
//! ```no_run
//! use riscv_uploader::{Session, TclProbe, Target, BootMode};
//! use riscv_uploader::flashing::{DownloadOptions, FlashLoader};
//!
//! let probe = TclProbe::connect("127.0.0.1", TclProbe::DEFAULT_PORT)?;
//! let mut session = Session::attach(Box::new(probe), Target::generic());
//!
//! let mut loader = FlashLoader::new(session.target().clone(), BootMode::Eeprom);
//! loader.add_segment(0x0100_0000, vec![0x13, 0x00, 0x00, 0x00])?;
//! loader.commit(&mut session, DownloadOptions::default())?;
//! # Ok::<(), riscv_uploader::Error>(())
//! ```

mod agent;
mod builder;
mod download;
mod eeprom;
mod error;
mod loader;
mod nor;
mod progress;

pub use agent::{AgentImage, AgentStatus};
pub use builder::PageMap;
pub use download::{format_from_path, load_file, load_hex, FileDownloadError, Format};
pub use eeprom::{EepromFlasher, EepromOptions};
pub use error::FlashError;
pub use loader::{DownloadOptions, FlashLoader, Segment, DEFAULT_POST_ACTION};
pub use nor::{NorFlash, NorOptions, PAGE_SIZE};
pub use progress::{FlashProgress, ProgressEvent};

/// Reassemble a byte buffer into little-endian words, zero-padding a
/// trailing partial word.
pub(crate) fn bytes_to_words(bytes: &[u8]) -> Vec<u32> {
    let mut words = Vec::with_capacity(bytes.len().div_ceil(4));

    for chunk in bytes.chunks(4) {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        words.push(u32::from_le_bytes(word));
    }

    words
}

#[cfg(test)]
mod tests {
    use super::bytes_to_words;

    #[test]
    fn words_assemble_little_endian_with_padding() {
        assert_eq!(
            bytes_to_words(&[0x11, 0x22, 0x33, 0x44, 0x55]),
            vec![0x4433_2211, 0x0000_0055]
        );
        assert!(bytes_to_words(&[]).is_empty());
    }
}
