//! Generic SPI-NOR flash driver on top of the SPIFI command engine.
//!
//! The device protocol is the usual JEDEC-style state machine: every erase
//! or program is bracketed by write-enable and a busy poll on status
//! register 1, quad mode hides behind a status-register-2 bit, and a page
//! program moves at most one 256-byte device page.

use std::time::{Duration, Instant};

use riscv_uploader_target::MemoryType;

use super::agent::{self, AgentImage};
use super::builder::PageMap;
use super::progress::FlashProgress;
use super::FlashError;
use crate::peripherals::dma::DmaEngine;
use crate::peripherals::spifi::{Command, Direction, FieldForm, FrameForm, Spifi};
use crate::session::Session;

// Device opcodes.
const ENABLE_RESET: u8 = 0x66;
const RESET: u8 = 0x99;
const CHIP_ERASE: u8 = 0xC7;
const SECTOR_ERASE: u8 = 0x20;
const WRITE_ENABLE: u8 = 0x06;
const READ_DATA: u8 = 0x03;
const FAST_READ_QUAD_OUTPUT: u8 = 0x6B;
const READ_SREG: u8 = 0x05;
const WRITE_SREG: u8 = 0x01;
const PAGE_PROGRAM: u8 = 0x02;
const QUAD_PAGE_PROGRAM: u8 = 0x32;
const JEDEC_ID: u8 = 0x9F;

const SREG1_BUSY_M: u8 = 1 << 0;
/// Quad-enable lives at bit 9 of the combined status register, bit 1 of
/// SREG2.
const SREG2_QUAD_ENABLE_M: u8 = 1 << 1;

/// One device page: the most a single program operation can move.
pub const PAGE_SIZE: usize = 256;

const RESET_DELAY: Duration = Duration::from_millis(1);
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Selects one of the chip's status registers by opcode offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusRegister {
    /// Status register 1: busy and write-enable latches.
    Sreg1 = 0x00,
    /// Status register 2: quad enable.
    Sreg2 = 0x30,
}

/// Knobs for one NOR write or check pass.
#[derive(Debug, Clone, Copy)]
pub struct NorOptions {
    /// Program and read with the data lanes in parallel.
    pub quad_spi: bool,
    /// Erase the whole chip instead of the minimal sector set.
    pub chip_erase: bool,
    /// Stage payloads through the DMA scratch buffer.
    pub use_dma: bool,
    /// Erase granularity of the attached chip.
    pub sector_size: u32,
}

impl Default for NorOptions {
    fn default() -> Self {
        NorOptions {
            quad_spi: false,
            chip_erase: false,
            use_dma: true,
            sector_size: 4096,
        }
    }
}

/// Driver for the external NOR flash chip behind the SPIFI controller.
pub struct NorFlash<'a> {
    spifi: Spifi<'a>,
    busy_timeout: Duration,
}

impl<'a> NorFlash<'a> {
    /// Wrap an initialized SPIFI engine.
    pub fn new(spifi: Spifi<'a>) -> Self {
        NorFlash {
            spifi,
            busy_timeout: BUSY_TIMEOUT,
        }
    }

    fn session(&mut self) -> &mut Session {
        self.spifi.session_mut()
    }

    /// Latch the write-enable bit; the chip clears it again after the next
    /// erase or program completes.
    pub fn write_enable(&mut self) -> Result<(), FlashError> {
        self.spifi.send_command(
            &Command::new(WRITE_ENABLE, FrameForm::OpcodeNoAddr, FieldForm::AllSerial),
            &[],
            None,
        )?;
        Ok(())
    }

    /// Read one status register.
    pub fn read_status(&mut self, register: StatusRegister) -> Result<u8, FlashError> {
        let command = Command {
            byte_count: 1,
            ..Command::new(
                READ_SREG | register as u8,
                FrameForm::OpcodeNoAddr,
                FieldForm::AllSerial,
            )
        };
        Ok(self.spifi.send_command(&command, &[], None)?[0])
    }

    /// Write both status registers in one operation.
    pub fn write_status(&mut self, sreg1: u8, sreg2: u8) -> Result<(), FlashError> {
        self.write_enable()?;
        let command = Command {
            byte_count: 2,
            direction: Direction::Write,
            ..Command::new(WRITE_SREG, FrameForm::OpcodeNoAddr, FieldForm::AllSerial)
        };
        self.spifi.send_command(&command, &[sreg1, sreg2], None)?;
        self.wait_busy()
    }

    /// Poll status register 1 until the busy bit clears.
    pub fn wait_busy(&mut self) -> Result<(), FlashError> {
        let deadline = Instant::now() + self.busy_timeout;
        loop {
            if self.read_status(StatusRegister::Sreg1)? & SREG1_BUSY_M == 0 {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(FlashError::FlashBusyTimeout {
                    timeout: self.busy_timeout,
                });
            }
        }
    }

    fn reset(&mut self, field_form: FieldForm) -> Result<(), FlashError> {
        self.spifi.send_command(
            &Command::new(ENABLE_RESET, FrameForm::OpcodeNoAddr, field_form),
            &[],
            None,
        )?;
        self.spifi.send_command(
            &Command::new(RESET, FrameForm::OpcodeNoAddr, field_form),
            &[],
            None,
        )?;
        std::thread::sleep(RESET_DELAY);
        Ok(())
    }

    /// Bring the chip into plain single-SPI mode regardless of prior
    /// state: reset first with all lanes parallel (catches a chip stuck in
    /// QPI), then again serially.
    pub fn reset_chip(&mut self) -> Result<(), FlashError> {
        self.reset(FieldForm::AllParallel)?;
        self.reset(FieldForm::AllSerial)
    }

    /// Read the 3-byte JEDEC manufacturer/device ID.
    ///
    /// The ID is informational only and not validated, so one uploader
    /// build supports whatever flash part the board carries.
    pub fn read_jedec_id(&mut self) -> Result<[u8; 3], FlashError> {
        let command = Command {
            byte_count: 3,
            ..Command::new(JEDEC_ID, FrameForm::OpcodeNoAddr, FieldForm::AllSerial)
        };
        let id = self.spifi.send_command(&command, &[], None)?;
        Ok([id[0], id[1], id[2]])
    }

    /// Erase either the whole chip or the given sector list, with the
    /// write-enable/busy bracket around every erase operation.
    pub fn erase(
        &mut self,
        sectors: Option<&[u32]>,
        progress: &FlashProgress,
    ) -> Result<(), FlashError> {
        progress.started_erasing();

        match sectors {
            None => {
                tracing::info!("chip erase");
                self.write_enable()?;
                self.spifi.send_command(
                    &Command::new(CHIP_ERASE, FrameForm::OpcodeNoAddr, FieldForm::AllSerial),
                    &[],
                    None,
                )?;
                self.wait_busy()?;
            }
            Some(sectors) => {
                for &sector in sectors {
                    tracing::info!("erase sector {sector:#010x}");
                    self.write_enable()?;
                    let command = Command {
                        address: sector,
                        ..Command::new(SECTOR_ERASE, FrameForm::Opcode3Addr, FieldForm::AllSerial)
                    };
                    self.spifi.send_command(&command, &[], None)?;
                    self.wait_busy()?;
                    progress.sector_erased(sector);
                }
            }
        }

        progress.finished_erasing();
        Ok(())
    }

    fn program(
        &mut self,
        opcode: u8,
        field_form: FieldForm,
        address: u32,
        data: &[u8],
        dma: Option<&DmaEngine>,
    ) -> Result<(), FlashError> {
        if data.len() > PAGE_SIZE {
            return Err(FlashError::PageTooLarge {
                len: data.len(),
                max: PAGE_SIZE,
            });
        }

        self.write_enable()?;
        let command = Command {
            byte_count: data.len() as u16,
            address,
            direction: Direction::Write,
            ..Command::new(opcode, FrameForm::Opcode3Addr, field_form)
        };
        self.spifi.send_command(&command, data, dma)?;
        self.wait_busy()
    }

    /// Program up to one page over the single data lane.
    pub fn page_program(
        &mut self,
        address: u32,
        data: &[u8],
        dma: Option<&DmaEngine>,
    ) -> Result<(), FlashError> {
        self.program(PAGE_PROGRAM, FieldForm::AllSerial, address, data, dma)
    }

    /// Program up to one page with the data lanes in parallel.
    pub fn quad_page_program(
        &mut self,
        address: u32,
        data: &[u8],
        dma: Option<&DmaEngine>,
    ) -> Result<(), FlashError> {
        self.program(QUAD_PAGE_PROGRAM, FieldForm::DataParallel, address, data, dma)
    }

    /// Whether the quad-enable bit is currently set.
    pub fn quad_enabled(&mut self) -> Result<bool, FlashError> {
        Ok(self.read_status(StatusRegister::Sreg2)? & SREG2_QUAD_ENABLE_M != 0)
    }

    /// Set the quad-enable bit if it is not set yet. Idempotent.
    pub fn quad_enable(&mut self) -> Result<(), FlashError> {
        if self.quad_enabled()? {
            return Ok(());
        }

        let sreg1 = self.read_status(StatusRegister::Sreg1)?;
        let sreg2 = self.read_status(StatusRegister::Sreg2)?;
        self.write_status(sreg1, sreg2 | SREG2_QUAD_ENABLE_M)
    }

    /// Read back `expected.len()` bytes at `address` and compare.
    ///
    /// Stops at the first mismatching byte and reports its absolute
    /// offset together with both values.
    pub fn verify(
        &mut self,
        address: u32,
        expected: &[u8],
        dma: Option<&DmaEngine>,
        quad: bool,
    ) -> Result<(), FlashError> {
        let command = if quad {
            Command {
                byte_count: expected.len() as u16,
                address,
                interim_length: 1,
                ..Command::new(
                    FAST_READ_QUAD_OUTPUT,
                    FrameForm::Opcode3Addr,
                    FieldForm::DataParallel,
                )
            }
        } else {
            Command {
                byte_count: expected.len() as u16,
                address,
                ..Command::new(READ_DATA, FrameForm::Opcode3Addr, FieldForm::AllSerial)
            }
        };

        self.spifi.transfer_compare(&command, expected, dma)
    }

    fn prepare_chip(&mut self) -> Result<(), FlashError> {
        self.session().halt()?;
        self.reset_chip()?;

        let id = self.read_jedec_id()?;
        tracing::info!("JEDEC ID = {:02x} {:02x} {:02x}", id[0], id[1], id[2]);
        Ok(())
    }

    /// Erase, program and verify every page of the map.
    ///
    /// The first verify failure aborts the pass; pages already written stay
    /// written.
    pub fn write_pages(
        &mut self,
        pages: &PageMap,
        options: &NorOptions,
        progress: &FlashProgress,
    ) -> Result<(), FlashError> {
        progress.region_started(MemoryType::Spifi, pages.len(), pages.byte_len());
        self.prepare_chip()?;

        let dma = if options.use_dma {
            Some(self.spifi.configure_dma()?)
        } else {
            None
        };

        if options.chip_erase {
            self.erase(None, progress)?;
        } else {
            self.erase(Some(&pages.sectors(options.sector_size)), progress)?;
        }

        if options.quad_spi {
            tracing::info!("using quad SPI");
            self.quad_enable()?;
        } else {
            tracing::info!("using single SPI");
        }

        let total = pages.len();
        for (index, (offset, page)) in pages.iter().enumerate() {
            tracing::info!(
                "writing flash page {offset:#010x}... {}%",
                index * 100 / total
            );

            if options.quad_spi {
                self.quad_page_program(offset, page, dma.as_ref())?;
            } else {
                self.page_program(offset, page, dma.as_ref())?;
            }

            self.verify(offset, page, dma.as_ref(), options.quad_spi)?;
            progress.page_programmed(offset, page.len());
        }

        tracing::info!("flash programming completed");
        Ok(())
    }

    /// Verify-only pass over every page of the map.
    pub fn check_pages(
        &mut self,
        pages: &PageMap,
        options: &NorOptions,
        progress: &FlashProgress,
    ) -> Result<(), FlashError> {
        progress.region_started(MemoryType::Spifi, pages.len(), pages.byte_len());
        self.prepare_chip()?;

        let dma = if options.use_dma {
            Some(self.spifi.configure_dma()?)
        } else {
            None
        };

        if options.quad_spi {
            self.quad_enable()?;
        }

        let total = pages.len();
        for (index, (offset, page)) in pages.iter().enumerate() {
            tracing::info!(
                "checking flash page {offset:#010x}... {}%",
                index * 100 / total
            );
            self.verify(offset, page, dma.as_ref(), options.quad_spi)?;
        }

        tracing::info!("flash check completed");
        Ok(())
    }

    /// High-throughput write path: one resident-driver round per 4 KiB
    /// sector instead of a register round trip per word.
    ///
    /// Per sector the host fills the agent's staging buffer (pages missing
    /// from the map are zero-filled), points the trigger register at the
    /// sector and lets the agent erase and program on-target.
    pub fn write_pages_by_sectors(
        &mut self,
        pages: &PageMap,
        agent: &AgentImage,
        options: &NorOptions,
        progress: &FlashProgress,
    ) -> Result<(), FlashError> {
        progress.region_started(MemoryType::Spifi, pages.len(), pages.byte_len());
        self.prepare_chip()?;

        let sectors = pages.sectors(options.sector_size);
        let page_size = pages.page_size();
        let pages_per_sector = (options.sector_size / page_size) as usize;

        agent::start(self.session(), agent)?;

        tracing::info!("writing flash by sectors");
        let result: Result<(), FlashError> = (|| {
            for (index, &sector) in sectors.iter().enumerate() {
                tracing::info!("  {sector:#010x} {:>3}%", index * 100 / sectors.len());

                let mut staging = Vec::with_capacity(agent.staging_size as usize);
                for page in 0..pages_per_sector {
                    match pages.page(sector + page as u32 * page_size) {
                        Some(data) => staging.extend_from_slice(data),
                        None => staging.extend(std::iter::repeat(0).take(page_size as usize)),
                    }
                }

                let session = self.session();
                session.write_bytes(agent.staging, &staging)?;
                agent::run_round(session, agent, sector)?;
                progress.sector_erased(sector);
            }
            Ok(())
        })();

        agent::stop(self.session(), agent)?;
        self.spifi.init_memory_mode()?;

        result?;
        tracing::info!("flash programming by sectors completed");
        Ok(())
    }
}
