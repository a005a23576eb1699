//! The upload orchestrator.
//!
//! A [`FlashLoader`] collects address-tagged data, resolves it against the
//! target's memory map (including the boot-alias rules), and commits the
//! result region by region: EEPROM, external flash, RAM. Regions are
//! independent: a verify failure in one still lets the others run, and the
//! first error is reported once all of them had their attempt. Loss of the
//! probe link aborts immediately instead.

use std::time::Instant;

use riscv_uploader_target::{BootMode, MemorySection, MemoryType, Target};

use super::agent::AgentImage;
use super::builder::PageMap;
use super::eeprom::{EepromFlasher, EepromOptions};
use super::nor::{NorFlash, NorOptions};
use super::progress::FlashProgress;
use super::FlashError;
use crate::peripherals::gpio::SpifiPads;
use crate::peripherals::power;
use crate::peripherals::spifi::Spifi;
use crate::session::Session;

/// Command handed to the probe server once an upload went through.
pub const DEFAULT_POST_ACTION: &str = "reset run";

/// One contiguous run of firmware bytes, resolved against the memory map.
#[derive(Debug, Clone)]
pub struct Segment {
    /// Absolute start address of the run.
    pub offset: u32,
    /// The bytes.
    pub data: Vec<u8>,
    /// The section the run resolved into, once located.
    pub memory: Option<MemorySection>,
}

/// Options for one [`FlashLoader::commit`] call.
pub struct DownloadOptions {
    /// Program and read the external flash with parallel data lanes.
    pub quad_spi: bool,
    /// Erase the whole external flash instead of the touched sectors.
    pub chip_erase: bool,
    /// Stage external-flash payloads through DMA.
    pub use_dma: bool,
    /// Verify the EEPROM through the APB register path.
    pub verify_through_apb: bool,
    /// Only verify, program nothing.
    pub verify_only: bool,
    /// Resident driver for sector-wise external-flash writes.
    pub spifi_agent: Option<AgentImage>,
    /// Resident driver for EEPROM writes.
    pub eeprom_agent: Option<AgentImage>,
    /// Probe server command run after a successful upload. `None` runs
    /// [`DEFAULT_POST_ACTION`].
    pub post_action: Option<String>,
    /// Progress sink for the whole commit.
    pub progress: Option<FlashProgress>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        DownloadOptions {
            quad_spi: false,
            chip_erase: false,
            use_dma: true,
            verify_through_apb: false,
            verify_only: false,
            spifi_agent: None,
            eeprom_agent: None,
            post_action: None,
            progress: None,
        }
    }
}

/// Collects firmware data and writes it out per memory region.
pub struct FlashLoader {
    target: Target,
    boot_mode: BootMode,
    segments: Vec<Segment>,
}

impl FlashLoader {
    /// A loader for the given chip, attributing boot-window data per
    /// `boot_mode`.
    pub fn new(target: Target, boot_mode: BootMode) -> Self {
        FlashLoader {
            target,
            boot_mode,
            segments: Vec::new(),
        }
    }

    /// The chip description the loader resolves against.
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// The resolved segments added so far.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Add one run of bytes at an absolute address.
    ///
    /// The run has to fall entirely into a single memory section; data in
    /// the boot window is re-attributed according to the boot mode, or
    /// dropped (with a warning) when no boot mode was chosen. Errors here
    /// mean a bad input file or a wrong memory map, and are raised before
    /// any hardware is touched.
    pub fn add_segment(&mut self, offset: u32, data: Vec<u8>) -> Result<(), FlashError> {
        let section = *self
            .target
            .locate(offset)
            .ok_or(FlashError::NoSection { offset })?;

        if offset + data.len() as u32 > section.end() {
            return Err(FlashError::SectionOverflow {
                offset,
                len: data.len(),
                section: section.ty,
            });
        }

        let (offset, section) = if section.ty == MemoryType::Boot {
            let Some(boot_memory) = self.boot_mode.memory_type() else {
                tracing::warn!(
                    "no boot mode selected, dropping {} bytes at {offset:#010x}",
                    data.len()
                );
                return Ok(());
            };

            let target_section = *self
                .target
                .section(boot_memory)
                .ok_or(FlashError::NoSection { offset })?;

            let internal = offset - section.offset;
            if internal + data.len() as u32 > target_section.length {
                return Err(FlashError::SectionOverflow {
                    offset,
                    len: data.len(),
                    section: target_section.ty,
                });
            }

            (target_section.offset + internal, target_section)
        } else {
            (offset, section)
        };

        tracing::debug!(
            "segment at {offset:#010x}, {} bytes, {:?}",
            data.len(),
            section.ty
        );

        self.segments.push(Segment {
            offset,
            data,
            memory: Some(section),
        });
        Ok(())
    }

    /// Write everything out.
    pub fn commit(
        &self,
        session: &mut Session,
        mut options: DownloadOptions,
    ) -> Result<(), FlashError> {
        let progress = options.progress.take().unwrap_or_else(FlashProgress::ignore);

        power::power_up(session)?;

        let mut first_error: Option<FlashError> = None;

        self.run_eeprom(session, &options, &progress, &mut first_error)?;
        self.run_spifi(session, &options, &progress, &mut first_error)?;
        self.run_ram(session, &options, &progress, &mut first_error)?;

        if let Some(error) = first_error {
            return Err(error);
        }

        let post_action = options.post_action.as_deref().unwrap_or(DEFAULT_POST_ACTION);
        tracing::info!("post action: {post_action}");
        session.command(post_action)?;

        Ok(())
    }

    /// Record a region failure, or bail out right away when the probe link
    /// itself is gone.
    fn note_failure(
        memory: MemoryType,
        error: FlashError,
        progress: &FlashProgress,
        first_error: &mut Option<FlashError>,
    ) -> Result<(), FlashError> {
        progress.region_failed(memory);

        if matches!(error, FlashError::Probe(_)) {
            return Err(error);
        }

        tracing::error!("{memory:?} region failed: {error}");
        if first_error.is_none() {
            *first_error = Some(error);
        }
        Ok(())
    }

    fn run_eeprom(
        &self,
        session: &mut Session,
        options: &DownloadOptions,
        progress: &FlashProgress,
        first_error: &mut Option<FlashError>,
    ) -> Result<(), FlashError> {
        let pages = PageMap::build(
            &self.segments,
            MemoryType::Eeprom,
            self.target.eeprom_page_size,
        );
        if pages.is_empty() {
            return Ok(());
        }

        let eeprom_options = EepromOptions {
            verify_through_apb: options.verify_through_apb,
        };

        let started = Instant::now();
        let result = {
            let mut flasher = EepromFlasher::new(session);
            if options.verify_only {
                flasher.check_pages(&pages, &eeprom_options, progress)
            } else if let Some(agent) = &options.eeprom_agent {
                flasher.write_memory(&pages, agent, progress)
            } else {
                flasher.write_pages(&pages, &eeprom_options, progress)
            }
        };

        match result {
            Ok(()) => {
                log_throughput("EEPROM", pages.byte_len(), started);
                progress.region_finished(MemoryType::Eeprom);
                Ok(())
            }
            Err(error) => Self::note_failure(MemoryType::Eeprom, error, progress, first_error),
        }
    }

    fn run_spifi(
        &self,
        session: &mut Session,
        options: &DownloadOptions,
        progress: &FlashProgress,
        first_error: &mut Option<FlashError>,
    ) -> Result<(), FlashError> {
        let pages = PageMap::build(
            &self.segments,
            MemoryType::Spifi,
            self.target.spifi_page_size,
        );
        if pages.is_empty() {
            return Ok(());
        }

        let nor_options = NorOptions {
            quad_spi: options.quad_spi,
            chip_erase: options.chip_erase,
            use_dma: options.use_dma,
            sector_size: self.target.spifi_sector_size,
        };

        // Pad routing is bracketed around the whole region so firmware
        // using port 2 as GPIO keeps its configuration.
        let pads = SpifiPads::claim(session, self.target.variant)?;

        let started = Instant::now();
        let result: Result<(), FlashError> = (|| {
            let spifi = Spifi::new(session)?;
            let mut flash = NorFlash::new(spifi);

            if options.verify_only {
                flash.check_pages(&pages, &nor_options, progress)
            } else if let Some(agent) = &options.spifi_agent {
                flash.write_pages_by_sectors(&pages, agent, &nor_options, progress)
            } else {
                flash.write_pages(&pages, &nor_options, progress)
            }
        })();

        pads.release(session)?;

        match result {
            Ok(()) => {
                log_throughput("SPIFI", pages.byte_len(), started);
                progress.region_finished(MemoryType::Spifi);
                Ok(())
            }
            Err(error) => Self::note_failure(MemoryType::Spifi, error, progress, first_error),
        }
    }

    fn run_ram(
        &self,
        session: &mut Session,
        options: &DownloadOptions,
        progress: &FlashProgress,
        first_error: &mut Option<FlashError>,
    ) -> Result<(), FlashError> {
        let ram_segments: Vec<&Segment> = self
            .segments
            .iter()
            .filter(|segment| {
                segment
                    .memory
                    .is_some_and(|section| section.ty == MemoryType::Ram)
            })
            .collect();
        if ram_segments.is_empty() {
            return Ok(());
        }

        let result: Result<(), FlashError> = (|| {
            session.halt()?;
            for segment in &ram_segments {
                let words = super::bytes_to_words(&segment.data);

                if options.verify_only {
                    tracing::info!(
                        "checking RAM segment {:#010x}, {} bytes",
                        segment.offset,
                        segment.data.len()
                    );

                    let readback = session.read_words(segment.offset, words.len())?;
                    for (index, (&expected, &actual)) in
                        words.iter().zip(readback.iter()).enumerate()
                    {
                        if expected != actual {
                            return Err(FlashError::Mismatch {
                                address: segment.offset + (index as u32) * 4,
                                expected,
                                actual,
                            });
                        }
                    }
                } else {
                    // RAM takes plain word writes; there is no erase or
                    // page granularity to honor and no verify loop.
                    tracing::info!(
                        "writing RAM segment {:#010x}, {} bytes",
                        segment.offset,
                        segment.data.len()
                    );
                    session.write_words(segment.offset, &words)?;
                }
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                progress.region_finished(MemoryType::Ram);
                Ok(())
            }
            Err(error) => Self::note_failure(MemoryType::Ram, error, progress, first_error),
        }
    }
}

fn log_throughput(name: &str, bytes: usize, started: Instant) {
    let elapsed = started.elapsed().as_secs_f64();
    if elapsed > 0.0 {
        tracing::info!(
            "{name}: {bytes} bytes in {elapsed:.2} s ({:.1} KiB/s effective)",
            bytes as f64 / (elapsed * 1024.0)
        );
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use riscv_uploader_target::Target;

    use super::*;
    use crate::test::MockProbe;

    fn loader(boot_mode: BootMode) -> FlashLoader {
        FlashLoader::new(Target::generic(), boot_mode)
    }

    #[test]
    fn segments_outside_any_section_are_rejected() {
        let mut loader = loader(BootMode::Undefined);
        assert!(matches!(
            loader.add_segment(0x4000_0000, vec![0; 4]),
            Err(FlashError::NoSection { offset: 0x4000_0000 })
        ));
    }

    #[test]
    fn overflowing_segments_are_rejected() {
        let mut loader = loader(BootMode::Undefined);
        // 8 KiB EEPROM; 16 bytes starting 8 bytes before its end overflow.
        assert!(matches!(
            loader.add_segment(0x0100_1FF8, vec![0; 16]),
            Err(FlashError::SectionOverflow {
                section: MemoryType::Eeprom,
                ..
            })
        ));
    }

    #[test]
    fn boot_window_data_follows_the_boot_mode() {
        let mut loader = loader(BootMode::Spifi);
        loader.add_segment(0x100, vec![0xAA; 16]).unwrap();

        let segment = &loader.segments()[0];
        assert_eq!(segment.offset, 0x8000_0100);
        assert_eq!(segment.memory.unwrap().ty, MemoryType::Spifi);
    }

    #[test]
    fn boot_window_data_is_dropped_without_a_boot_mode() {
        let mut loader = loader(BootMode::Undefined);
        loader.add_segment(0x100, vec![0xAA; 16]).unwrap();
        assert!(loader.segments().is_empty());
    }

    /// One 300-byte segment at external-flash offset 0 becomes two pages
    /// and one erased sector, programmed and verified in one pass.
    #[test]
    fn end_to_end_spifi_upload() {
        let (probe, state) = MockProbe::new();
        let mut session = Session::attach(Box::new(probe), Target::generic());

        let mut loader = loader(BootMode::Undefined);
        loader
            .add_segment(0x8000_0000, (0..300).map(|i| i as u8).collect())
            .unwrap();

        loader.commit(&mut session, DownloadOptions::default()).unwrap();

        let state = state.borrow();
        assert_eq!(state.erased_sectors, vec![0x0000]);
        assert_eq!(state.programmed_pages, vec![0x000, 0x100]);

        // Byte-exact image: 256 + 44 data bytes, zero fill up to the page end.
        let expected: Vec<u8> = (0..300)
            .map(|i| i as u8)
            .chain(std::iter::repeat(0).take(212))
            .collect();
        assert_eq!(&state.flash[..512], &expected[..]);

        // The post action ran.
        assert!(state.commands.iter().any(|cmd| cmd.contains("reset run")));
    }

    /// Same scenario, but the second page verifies wrong: page 1 completed,
    /// page 2 was programmed exactly once, the whole run fails.
    #[test]
    fn end_to_end_spifi_verify_failure() {
        let (probe, state) = MockProbe::new();
        state.borrow_mut().corrupt_page = Some(0x100);
        let mut session = Session::attach(Box::new(probe), Target::generic());

        let mut loader = loader(BootMode::Undefined);
        loader
            .add_segment(0x8000_0000, vec![0x5A; 300])
            .unwrap();

        let result = loader.commit(&mut session, DownloadOptions::default());
        assert!(matches!(result, Err(FlashError::Mismatch { .. })));

        let state = state.borrow();
        // Page 1 went through program and verify, page 2 was attempted
        // exactly once and not retried.
        assert_eq!(state.programmed_pages, vec![0x000, 0x100]);
        assert_eq!(
            state
                .programmed_pages
                .iter()
                .filter(|&&page| page == 0x100)
                .count(),
            1
        );
        // No post action after a failed run.
        assert!(!state.commands.iter().any(|cmd| cmd.contains("reset run")));
    }

    /// EEPROM pages flow through erase, program and AHB verify against the
    /// mock's array model.
    #[test]
    fn end_to_end_eeprom_upload() {
        let (probe, state) = MockProbe::new();
        let mut session = Session::attach(Box::new(probe), Target::generic());

        let mut loader = loader(BootMode::Undefined);
        let image: Vec<u8> = (0..200).map(|i| (i * 3) as u8).collect();
        loader.add_segment(0x0100_0000, image.clone()).unwrap();

        loader.commit(&mut session, DownloadOptions::default()).unwrap();

        let state = state.borrow();
        assert_eq!(&state.eeprom[..200], &image[..]);
        // 200 bytes at 128 bytes per page: pages 0x00 and 0x80.
        assert!(state.eeprom[200..256].iter().all(|&b| b == 0));
    }

    /// In verify-only mode RAM contents are compared, not written.
    #[test]
    fn verify_only_ram_check_reports_mismatches() {
        let (probe, state) = MockProbe::new();
        state.borrow_mut().poke_word(0x0200_0000, 0xDEAD_BEEF);
        let mut session = Session::attach(Box::new(probe), Target::generic());

        let mut loader = loader(BootMode::Undefined);
        loader.add_segment(0x0200_0000, vec![0; 4]).unwrap();

        let options = DownloadOptions {
            verify_only: true,
            ..DownloadOptions::default()
        };
        let result = loader.commit(&mut session, options);

        match result {
            Err(FlashError::Mismatch {
                address, actual, ..
            }) => {
                assert_eq!(address, 0x0200_0000);
                assert_eq!(actual, 0xDEAD_BEEF);
            }
            other => panic!("expected a mismatch, got {other:?}"),
        }
    }

    /// A RAM segment is written word-wise, without a verify loop.
    #[test]
    fn ram_segments_are_written_directly() {
        let (probe, state) = MockProbe::new();
        let mut session = Session::attach(Box::new(probe), Target::generic());

        let mut loader = loader(BootMode::Undefined);
        loader
            .add_segment(0x0200_0000, vec![0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88])
            .unwrap();

        loader.commit(&mut session, DownloadOptions::default()).unwrap();

        let state = state.borrow();
        assert_eq!(state.peek_word(0x0200_0000), 0x4433_2211);
        assert_eq!(state.peek_word(0x0200_0004), 0x8877_6655);
    }
}
