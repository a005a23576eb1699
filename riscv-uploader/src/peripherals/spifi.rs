//! The SPIFI controller: one struct per attached session, one
//! [`Command`] per bus transaction.
//!
//! A transaction is fully described by the command word written to the
//! command register; writing that word is what triggers the hardware. The
//! data phase either goes through the 32-bit data register one access at a
//! time, or is staged through a scratch buffer in target RAM and moved by
//! DMA, which turns a 256-byte page into a handful of probe round trips.

use std::time::Duration;

use crate::flashing::FlashError;
use crate::peripherals::dma::{
    ChannelConfig, ChannelMode, ChannelPriority, ChannelRequest, ChannelSize, DmaEngine,
};
use crate::peripherals::map;
use crate::session::Session;

// CTRL register fields.
const CTRL_DMAEN_M: u32 = 1 << 31;

// STAT register fields.
const STAT_INTRQ_M: u32 = 1 << 5;
const STAT_RESET_M: u32 = 1 << 4;

// CMD register fields.
const CMD_DATALEN_S: u32 = 0;
const CMD_DATALEN_M: u32 = 0x3FFF;
const CMD_DOUT_S: u32 = 15;
const CMD_INTLEN_S: u32 = 16;
const CMD_FIELDFORM_S: u32 = 19;
const CMD_FRAMEFORM_S: u32 = 21;
const CMD_OPCODE_S: u32 = 24;

/// Opcode issued by the memory-mapped read machinery after an upload.
const MEMORY_MODE_READ_OPCODE: u8 = 0x03;

/// Frame form: how opcode and address bytes are laid out on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameForm {
    /// Opcode only, no address.
    OpcodeNoAddr = 1,
    /// Opcode plus a 1-byte address.
    Opcode1Addr = 2,
    /// Opcode plus a 2-byte address.
    Opcode2Addr = 3,
    /// Opcode plus a 3-byte address.
    Opcode3Addr = 4,
    /// Opcode plus a 4-byte address.
    Opcode4Addr = 5,
    /// No opcode, 3-byte address.
    NoOpcode3Addr = 6,
    /// No opcode, 4-byte address.
    NoOpcode4Addr = 7,
}

/// Field form: which parts of the frame use all four data lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldForm {
    /// Everything on a single lane.
    AllSerial = 0,
    /// Data parallel, opcode and address serial.
    DataParallel = 1,
    /// Opcode serial, everything else parallel.
    OpcodeSerial = 2,
    /// Everything parallel (QPI).
    AllParallel = 3,
}

/// Direction of the data phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Flash to host.
    Read = 0,
    /// Host to flash.
    Write = 1,
}

/// One SPIFI bus transaction.
#[derive(Debug, Clone, Copy)]
pub struct Command {
    /// Flash opcode.
    pub opcode: u8,
    /// Opcode/address framing.
    pub frame_form: FrameForm,
    /// Lane usage per frame part.
    pub field_form: FieldForm,
    /// Length of the data phase in bytes.
    pub byte_count: u16,
    /// Address field value.
    pub address: u32,
    /// Intermediate (dummy/mode) bytes sent after the address.
    pub interim_data: u32,
    /// Number of intermediate bytes.
    pub interim_length: u8,
    /// Direction of the data phase.
    pub direction: Direction,
}

impl Command {
    /// A data-less command with the given framing.
    pub fn new(opcode: u8, frame_form: FrameForm, field_form: FieldForm) -> Self {
        Command {
            opcode,
            frame_form,
            field_form,
            byte_count: 0,
            address: 0,
            interim_data: 0,
            interim_length: 0,
            direction: Direction::Read,
        }
    }

    /// The exact command register word for this transaction.
    pub fn encode(&self) -> u32 {
        ((u32::from(self.byte_count) & CMD_DATALEN_M) << CMD_DATALEN_S)
            | ((self.direction as u32) << CMD_DOUT_S)
            | (u32::from(self.interim_length) << CMD_INTLEN_S)
            | ((self.field_form as u32) << CMD_FIELDFORM_S)
            | ((self.frame_form as u32) << CMD_FRAMEFORM_S)
            | (u32::from(self.opcode) << CMD_OPCODE_S)
    }
}

/// The SPIFI controller of one attached session.
pub struct Spifi<'a> {
    session: &'a mut Session,
}

impl<'a> Spifi<'a> {
    /// Scratch buffer in target RAM used to stage DMA payloads.
    pub const SCRATCH: u32 = 0x0200_3F00;

    /// Fixed transfer length the DMA channels are armed with, in elements.
    const DMA_TRANSFER_LEN: u32 = 255;

    const DMA_TIMEOUT: Duration = Duration::from_millis(100);
    const INIT_DELAY: Duration = Duration::from_millis(1);

    /// Take over the controller: reset the peripheral state and enable its
    /// DMA request output.
    pub fn new(session: &'a mut Session) -> Result<Self, FlashError> {
        let mut spifi = Spifi { session };
        spifi.init_periphery()?;

        let control = spifi.session.read_word(map::SPIFI_CONFIG_CTRL)?;
        spifi
            .session
            .write_word(map::SPIFI_CONFIG_CTRL, control | CTRL_DMAEN_M)?;
        std::thread::sleep(Self::INIT_DELAY);

        Ok(spifi)
    }

    pub(crate) fn session_mut(&mut self) -> &mut Session {
        self.session
    }

    fn init_periphery(&mut self) -> Result<(), FlashError> {
        let stat = self.session.read_word(map::SPIFI_CONFIG_STAT)?;
        self.session
            .write_word(map::SPIFI_CONFIG_STAT, stat | STAT_INTRQ_M | STAT_RESET_M)?;
        self.session.write_word(map::SPIFI_CONFIG_ADDR, 0)?;
        self.session.write_word(map::SPIFI_CONFIG_IDATA, 0)?;
        self.session.write_word(map::SPIFI_CONFIG_CLIMIT, 0)?;
        std::thread::sleep(Self::INIT_DELAY);
        Ok(())
    }

    /// Put the controller back into memory-mapped read mode, so the boot
    /// fetch path works once the uploader lets go of the chip.
    pub fn init_memory_mode(&mut self) -> Result<(), FlashError> {
        self.init_periphery()?;

        let mcmd = (u32::from(MEMORY_MODE_READ_OPCODE) << CMD_OPCODE_S)
            | ((FrameForm::Opcode3Addr as u32) << CMD_FRAMEFORM_S)
            | ((FieldForm::AllSerial as u32) << CMD_FIELDFORM_S);
        self.session.write_word(map::SPIFI_CONFIG_MCMD, mcmd)?;
        std::thread::sleep(Self::INIT_DELAY);
        Ok(())
    }

    /// Configure and reset the DMA pair used for SPIFI payload staging:
    /// channel 0 moves scratch RAM to the data register, channel 1 the
    /// other way around.
    pub fn configure_dma(&mut self) -> Result<DmaEngine, FlashError> {
        let base = ChannelConfig {
            priority: ChannelPriority::VeryHigh,
            read_mode: ChannelMode::Memory,
            write_mode: ChannelMode::Periphery,
            read_increment: true,
            write_increment: false,
            read_size: ChannelSize::Word,
            write_size: ChannelSize::Word,
            read_burst: 2,
            write_burst: 2,
            read_request: ChannelRequest::Spifi,
            write_request: ChannelRequest::Spifi,
            read_ack: false,
            write_ack: false,
        };

        let mut dma = DmaEngine::new();
        dma.configure(0, base);
        dma.configure(
            1,
            ChannelConfig {
                read_mode: ChannelMode::Periphery,
                write_mode: ChannelMode::Memory,
                read_increment: false,
                write_increment: true,
                ..base
            },
        );
        dma.init(self.session)?;
        Ok(dma)
    }

    /// Write the address pair and the command word; the command write is
    /// what triggers the transaction.
    fn issue(&mut self, command: &Command) -> Result<(), FlashError> {
        self.session.write_words(
            map::SPIFI_CONFIG_ADDR,
            &[command.address, command.interim_data],
        )?;
        self.session
            .write_word(map::SPIFI_CONFIG_CMD, command.encode())?;
        Ok(())
    }

    /// Run one transaction and return the bytes read (empty for writes).
    ///
    /// With a DMA engine the payload is staged through [`Spifi::SCRATCH`];
    /// completion of the DMA wait is the completion signal, no further
    /// register polling is needed. Without DMA the data register is
    /// accessed directly: word-wise when the write length allows it,
    /// byte-wise otherwise.
    pub fn send_command(
        &mut self,
        command: &Command,
        data: &[u8],
        dma: Option<&DmaEngine>,
    ) -> Result<Vec<u8>, FlashError> {
        if let Some(dma) = dma {
            match command.direction {
                Direction::Write => {
                    self.session.write_bytes(Self::SCRATCH, data)?;
                    dma.start(
                        self.session,
                        0,
                        Self::SCRATCH,
                        map::SPIFI_CONFIG_DATA32,
                        Self::DMA_TRANSFER_LEN,
                    )?;
                }
                Direction::Read => {
                    dma.start(
                        self.session,
                        1,
                        map::SPIFI_CONFIG_DATA32,
                        Self::SCRATCH,
                        Self::DMA_TRANSFER_LEN,
                    )?;
                }
            }
        }

        self.issue(command)?;

        let byte_count = usize::from(command.byte_count);
        match command.direction {
            Direction::Read => {
                if let Some(dma) = dma {
                    dma.wait(self.session, 1, Self::DMA_TIMEOUT)?;
                    Ok(self.session.read_bytes(Self::SCRATCH, byte_count)?)
                } else {
                    let mut out = Vec::with_capacity(byte_count);
                    for _ in 0..byte_count {
                        out.push(self.read_data_byte()?);
                    }
                    Ok(out)
                }
            }
            Direction::Write => {
                if let Some(dma) = dma {
                    dma.wait(self.session, 0, Self::DMA_TIMEOUT)?;
                } else if byte_count % 4 == 0 {
                    for chunk in data[..byte_count].chunks_exact(4) {
                        let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                        self.session.write_word(map::SPIFI_CONFIG_DATA32, word)?;
                    }
                } else {
                    // The data register does not auto-increment on the bus
                    // side, so unaligned payloads go one byte per access.
                    for &byte in &data[..byte_count] {
                        self.session.write_bytes(map::SPIFI_CONFIG_DATA32, &[byte])?;
                    }
                }
                Ok(Vec::new())
            }
        }
    }

    /// Run a read transaction and compare the data phase against `expected`.
    ///
    /// The comparison short-circuits: in the register-access path no
    /// further data bytes are pulled once a mismatch is found.
    pub fn transfer_compare(
        &mut self,
        command: &Command,
        expected: &[u8],
        dma: Option<&DmaEngine>,
    ) -> Result<(), FlashError> {
        if let Some(dma) = dma {
            dma.start(
                self.session,
                1,
                map::SPIFI_CONFIG_DATA32,
                Self::SCRATCH,
                Self::DMA_TRANSFER_LEN,
            )?;
            self.issue(command)?;
            dma.wait(self.session, 1, Self::DMA_TIMEOUT)?;

            let actual = self.session.read_bytes(Self::SCRATCH, expected.len())?;
            for (index, (&expected, &actual)) in expected.iter().zip(actual.iter()).enumerate() {
                if expected != actual {
                    return Err(FlashError::Mismatch {
                        address: command.address + index as u32,
                        expected: u32::from(expected),
                        actual: u32::from(actual),
                    });
                }
            }
        } else {
            self.issue(command)?;
            for (index, &expected) in expected.iter().enumerate() {
                let actual = self.read_data_byte()?;
                if expected != actual {
                    return Err(FlashError::Mismatch {
                        address: command.address + index as u32,
                        expected: u32::from(expected),
                        actual: u32::from(actual),
                    });
                }
            }
        }

        Ok(())
    }

    fn read_data_byte(&mut self) -> Result<u8, FlashError> {
        Ok(self.session.read_bytes(map::SPIFI_CONFIG_DATA32, 1)?[0])
    }
}
