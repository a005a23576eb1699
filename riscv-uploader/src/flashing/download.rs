//! Loading firmware files into a [`FlashLoader`].
//!
//! Only the two formats the toolchains around this chip family emit are
//! supported: Intel HEX and raw binary. Anything richer stays out of
//! scope; the loader consumes plain address-tagged segments.

use std::path::Path;

use ihex::Record;
use thiserror::Error;

use super::loader::FlashLoader;
use super::FlashError;

/// A finite list of supported firmware file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Intel HEX, addresses taken from the records.
    Hex,
    /// Raw binary, placed at the given base address.
    Bin {
        /// Address the first byte of the file lands at.
        base_address: u32,
    },
}

/// A file format error usually means a bad input file rather than a broken
/// target, so it is kept apart from [`FlashError`].
#[derive(Error, Debug)]
pub enum FileDownloadError {
    /// Reading the file failed.
    #[error("failed to read firmware file")]
    Io(#[from] std::io::Error),
    /// The HEX file could not be parsed.
    #[error("failed to parse firmware as Intel HEX")]
    Hex(#[from] ihex::ReaderError),
    /// A record type with no sensible host-side interpretation.
    #[error("unsupported HEX record type {0}")]
    UnsupportedRecord(&'static str),
    /// The file extension matches no known format.
    #[error("no known format for file extension {0:?}")]
    UnknownExtension(String),
    /// Resolving a segment against the memory map failed.
    #[error(transparent)]
    Flash(#[from] FlashError),
}

/// Derive the format from a file extension, `.hex` or `.bin`.
pub fn format_from_path(path: &Path) -> Result<Format, FileDownloadError> {
    let extension = path
        .extension()
        .and_then(|extension| extension.to_str())
        .unwrap_or("");

    match extension {
        "hex" => Ok(Format::Hex),
        "bin" => Ok(Format::Bin { base_address: 0 }),
        other => Err(FileDownloadError::UnknownExtension(other.to_string())),
    }
}

/// Read a firmware file and feed its contents into the loader.
pub fn load_file(
    loader: &mut FlashLoader,
    path: &Path,
    format: Format,
) -> Result<(), FileDownloadError> {
    match format {
        Format::Hex => load_hex(loader, &std::fs::read_to_string(path)?),
        Format::Bin { base_address } => {
            loader.add_segment(base_address, std::fs::read(path)?)?;
            Ok(())
        }
    }
}

/// Parse Intel HEX records, merging contiguous data records into as few
/// segments as possible.
pub fn load_hex(loader: &mut FlashLoader, contents: &str) -> Result<(), FileDownloadError> {
    let mut base_address: u32 = 0;
    let mut segment_start: u32 = 0;
    let mut segment_data: Vec<u8> = Vec::new();

    let mut flush =
        |start: u32, data: &mut Vec<u8>| -> Result<(), FlashError> {
            if data.is_empty() {
                return Ok(());
            }
            loader.add_segment(start, std::mem::take(data))
        };

    for record in ihex::Reader::new(contents) {
        match record? {
            Record::Data { offset, value } => {
                let address = base_address + u32::from(offset);
                if address != segment_start + segment_data.len() as u32 {
                    flush(segment_start, &mut segment_data)?;
                    segment_start = address;
                }
                segment_data.extend_from_slice(&value);
            }
            Record::ExtendedLinearAddress(upper) => {
                base_address = u32::from(upper) << 16;
            }
            Record::ExtendedSegmentAddress(segment) => {
                base_address = u32::from(segment) << 4;
            }
            Record::StartLinearAddress(address) => {
                // The boot address is fixed in hardware; a start record is
                // informational at best.
                tracing::debug!("ignoring start linear address {address:#010x}");
            }
            Record::StartSegmentAddress { .. } => {
                return Err(FileDownloadError::UnsupportedRecord(
                    "Start Segment Address",
                ));
            }
            Record::EndOfFile => break,
        }
    }

    flush(segment_start, &mut segment_data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use riscv_uploader_target::{BootMode, Target};

    use super::*;

    fn loader() -> FlashLoader {
        FlashLoader::new(Target::generic(), BootMode::Undefined)
    }

    #[test]
    fn contiguous_records_merge_into_one_segment() {
        // Two adjacent 4-byte records at EEPROM offset 0.
        let hex = ":0400000001020304F2\n:0400040005060708DE\n:00000001FF\n";
        let mut loader = loader();

        // Shift into the EEPROM window via an extended linear address.
        let hex = format!(":020000040100F9\n{hex}");
        load_hex(&mut loader, &hex).unwrap();

        assert_eq!(loader.segments().len(), 1);
        assert_eq!(loader.segments()[0].offset, 0x0100_0000);
        assert_eq!(loader.segments()[0].data, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn an_address_gap_starts_a_new_segment() {
        let hex = ":020000040100F9\n:020000001122CB\n:02001000334477\n:00000001FF\n";
        let mut loader = loader();
        load_hex(&mut loader, hex).unwrap();

        assert_eq!(loader.segments().len(), 2);
        assert_eq!(loader.segments()[0].data, vec![0x11, 0x22]);
        assert_eq!(loader.segments()[1].offset, 0x0100_0010);
    }

    #[test]
    fn extension_selects_the_format() {
        assert_eq!(
            format_from_path(Path::new("firmware.hex")).unwrap(),
            Format::Hex
        );
        assert_eq!(
            format_from_path(Path::new("firmware.bin")).unwrap(),
            Format::Bin { base_address: 0 }
        );
        assert!(format_from_path(Path::new("firmware.elf")).is_err());
    }
}
