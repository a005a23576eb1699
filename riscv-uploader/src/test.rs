//! Helpers for testing the crate.
//!
//! [`MockProbe`] stands in for a probe server. It keeps a byte-addressable
//! backing store for plain memory and models just enough of the SPIFI,
//! DMA and EEPROM register blocks that the drivers can run their full
//! protocol against it: command words are decoded, data phases move real
//! bytes into a simulated flash or EEPROM array, and every register write
//! is recorded for assertions.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::peripherals::map;
use crate::probe::{AccessWidth, ProbeError, TargetProbe};

const FLASH_SIZE: usize = 64 * 1024;
const EEPROM_SIZE: usize = 8 * 1024;

const JEDEC_ID: [u8; 3] = [0xEF, 0x40, 0x18];

// Command word fields, as the mock decodes them.
const CMD_DATALEN_M: u32 = 0x3FFF;
const CMD_DOUT_M: u32 = 1 << 15;
const CMD_OPCODE_S: u32 = 24;

// EECON fields.
const EECON_EX_M: u32 = 1 << 0;
const EECON_OP_S: u32 = 1;
const EECON_WRBEH_S: u32 = 3;

/// Where bytes of an ongoing register-access data phase go.
#[derive(Debug)]
enum PendingData {
    FlashProgram { address: u32, written: usize },
    SregWrite { bytes: Vec<u8> },
}

/// Shared state of a [`MockProbe`], inspectable from tests.
#[derive(Debug)]
pub(crate) struct MockState {
    /// Byte-addressable backing store for everything that is not flash or
    /// EEPROM: RAM, scratch buffers, plain registers.
    pub mem: BTreeMap<u32, u8>,
    /// The simulated NOR array.
    pub flash: Vec<u8>,
    /// The simulated EEPROM array.
    pub eeprom: Vec<u8>,

    /// Raw commands handed to [`TargetProbe::run`], in order.
    pub commands: Vec<String>,
    /// Every single-word 32-bit write, in order.
    pub word_writes: Vec<(u32, u32)>,
    /// Every multi-word 32-bit write, in order.
    pub word_bursts: Vec<(u32, Vec<u32>)>,
    /// Sector-erase addresses, in order.
    pub erased_sectors: Vec<u32>,
    /// Page-program addresses, in order.
    pub programmed_pages: Vec<u32>,
    /// 8-bit reads of the SPIFI data register.
    pub data_register_byte_reads: usize,
    /// 8-bit writes of the SPIFI data register.
    pub data_register_byte_writes: usize,
    /// Status-register write operations seen.
    pub sreg_writes: usize,
    /// Resume calls, with their optional start address.
    pub resumes: Vec<Option<u32>>,
    /// Halt calls.
    pub halts: usize,

    /// Whether the DMA ready bits read as set.
    pub dma_ready: bool,
    /// Simulated quad-enable bit of status register 2.
    pub quad_enabled: bool,
    /// Corrupt this flash page after it is programmed, so its verify fails.
    pub corrupt_page: Option<u32>,

    // SPIFI engine state.
    address_register: u32,
    read_queue: Vec<u8>,
    pending: Option<PendingData>,
    dma_armed_write: Option<u32>,
    dma_armed_read: Option<u32>,

    // EEPROM controller state.
    eeprom_address: u32,
    eeprom_buffer: Vec<u32>,
}

impl MockState {
    fn new() -> Self {
        MockState {
            mem: BTreeMap::new(),
            flash: vec![0xFF; FLASH_SIZE],
            eeprom: vec![0xFF; EEPROM_SIZE],
            commands: Vec::new(),
            word_writes: Vec::new(),
            word_bursts: Vec::new(),
            erased_sectors: Vec::new(),
            programmed_pages: Vec::new(),
            data_register_byte_reads: 0,
            data_register_byte_writes: 0,
            sreg_writes: 0,
            resumes: Vec::new(),
            halts: 0,
            dma_ready: true,
            quad_enabled: false,
            corrupt_page: None,
            address_register: 0,
            read_queue: Vec::new(),
            pending: None,
            dma_armed_write: None,
            dma_armed_read: None,
            eeprom_address: 0,
            eeprom_buffer: Vec::new(),
        }
    }

    /// Place bytes directly into the simulated flash array.
    pub fn flash_fill(&mut self, address: u32, data: &[u8]) {
        self.flash[address as usize..address as usize + data.len()].copy_from_slice(data);
    }

    /// Read one little-endian word from the backing store.
    pub fn peek_word(&self, address: u32) -> u32 {
        let byte = |offset| u32::from(self.mem.get(&(address + offset)).copied().unwrap_or(0));
        byte(0) | (byte(1) << 8) | (byte(2) << 16) | (byte(3) << 24)
    }

    /// Write one little-endian word into the backing store.
    pub fn poke_word(&mut self, address: u32, value: u32) {
        for offset in 0..4 {
            self.mem
                .insert(address + offset, (value >> (offset * 8)) as u8);
        }
    }

    fn mem_byte(&self, address: u32) -> u8 {
        self.mem.get(&address).copied().unwrap_or(0)
    }

    fn finish_flash_program(&mut self, address: u32) {
        self.programmed_pages.push(address);
        if self.corrupt_page == Some(address) {
            self.flash[address as usize + 1] ^= 0xFF;
        }
    }

    fn finish_sreg_write(&mut self, bytes: &[u8]) {
        if let Some(&sreg2) = bytes.get(1) {
            self.quad_enabled = sreg2 & 0x02 != 0;
        }
    }

    /// Decode a command register write and run the transaction.
    fn execute_spifi_command(&mut self, word: u32) {
        let opcode = (word >> CMD_OPCODE_S) as u8;
        let datalen = (word & CMD_DATALEN_M) as usize;
        let is_write = word & CMD_DOUT_M != 0;
        let address = self.address_register;

        if is_write {
            match opcode {
                0x02 | 0x32 => {
                    // Page program, either from the DMA scratch staging or
                    // byte/word-wise through the data register.
                    if let Some(source) = self.dma_armed_write.take() {
                        for index in 0..datalen {
                            let byte = self.mem_byte(source + index as u32);
                            self.flash[address as usize + index] = byte;
                        }
                        self.finish_flash_program(address);
                    } else {
                        self.pending = Some(PendingData::FlashProgram {
                            address,
                            written: 0,
                        });
                    }
                }
                0x01 => {
                    self.sreg_writes += 1;
                    self.pending = Some(PendingData::SregWrite { bytes: Vec::new() });
                }
                _ => {}
            }
            return;
        }

        // Read-direction commands fill either the armed DMA destination or
        // the data register queue.
        let data: Vec<u8> = match opcode {
            0x9F => JEDEC_ID.to_vec(),
            0x05 => vec![0x00],
            0x35 => vec![if self.quad_enabled { 0x02 } else { 0x00 }],
            0x03 | 0x6B => {
                self.flash[address as usize..address as usize + datalen].to_vec()
            }
            0xC7 => {
                self.flash.fill(0xFF);
                Vec::new()
            }
            0x20 => {
                let sector = address as usize;
                self.flash[sector..sector + 4096].fill(0xFF);
                self.erased_sectors.push(address);
                Vec::new()
            }
            // Resets, write enable and friends carry no data phase.
            _ => Vec::new(),
        };

        if let Some(destination) = self.dma_armed_read.take() {
            for (index, &byte) in data.iter().enumerate() {
                self.mem.insert(destination + index as u32, byte);
            }
        } else {
            self.read_queue = data;
            self.read_queue.reverse();
        }
    }

    fn push_data_bytes(&mut self, bytes: &[u8]) {
        match self.pending.take() {
            Some(PendingData::FlashProgram {
                address,
                mut written,
            }) => {
                for &byte in bytes {
                    self.flash[address as usize + written] = byte;
                    written += 1;
                }
                // The data phase length is not visible at the data
                // register; the program completes when the next command
                // is issued.
                self.pending = Some(PendingData::FlashProgram { address, written });
            }
            Some(PendingData::SregWrite { bytes: mut stored }) => {
                stored.extend_from_slice(bytes);
                if stored.len() >= 2 {
                    self.finish_sreg_write(&stored);
                    self.pending = None;
                } else {
                    self.pending = Some(PendingData::SregWrite { bytes: stored });
                }
            }
            None => {}
        }
    }

    /// Close out a register-access data phase before the next command.
    fn flush_pending(&mut self) {
        match self.pending.take() {
            Some(PendingData::FlashProgram { address, .. }) => {
                self.finish_flash_program(address);
            }
            Some(PendingData::SregWrite { bytes }) => {
                self.finish_sreg_write(&bytes);
            }
            None => {}
        }
    }

    fn execute_eeprom_start(&mut self, word: u32) {
        if word & EECON_EX_M == 0 {
            return;
        }

        let op = (word >> EECON_OP_S) & 0x3;
        let pages = (word >> EECON_WRBEH_S) & 0x3;

        match op {
            1 if pages == 3 => self.eeprom.fill(0x00),
            2 => {
                let base = self.eeprom_address as usize;
                for (index, word) in self.eeprom_buffer.iter().enumerate() {
                    let offset = base + index * 4;
                    self.eeprom[offset..offset + 4].copy_from_slice(&word.to_le_bytes());
                }
            }
            _ => {}
        }
        self.eeprom_buffer.clear();
    }

    fn write(&mut self, address: u32, width: AccessWidth, data: &[u32]) {
        match width {
            AccessWidth::Bits32 if data.len() == 1 => {
                let value = data[0];
                self.word_writes.push((address, value));

                match address {
                    map::SPIFI_CONFIG_CMD => {
                        self.flush_pending();
                        self.execute_spifi_command(value);
                    }
                    map::SPIFI_CONFIG_ADDR => self.address_register = value,
                    map::SPIFI_CONFIG_DATA32 => self.push_data_bytes(&value.to_le_bytes()),
                    map::EEPROM_EEA => {
                        self.eeprom_address = value;
                        self.eeprom_buffer.clear();
                    }
                    map::EEPROM_EEDAT => self.eeprom_buffer.push(value),
                    map::EEPROM_EECON => self.execute_eeprom_start(value),
                    _ => self.poke_word(address, value),
                }
            }
            AccessWidth::Bits32 => {
                self.word_bursts.push((address, data.to_vec()));

                if (address == map::dma_channel_destination(0)
                    || address == map::dma_channel_destination(1))
                    && data.len() == 4
                {
                    // [destination, source, length, config]
                    if address == map::dma_channel_destination(0) {
                        self.dma_armed_write = Some(data[1]);
                    } else {
                        self.dma_armed_read = Some(data[0]);
                    }
                } else if address == map::SPIFI_CONFIG_ADDR && data.len() == 2 {
                    self.address_register = data[0];
                } else if address == map::EEPROM_EEA && data.len() == 2 {
                    self.eeprom_address = data[0];
                    self.eeprom_buffer.clear();
                } else {
                    for (index, &word) in data.iter().enumerate() {
                        self.poke_word(address + (index as u32) * 4, word);
                    }
                }
            }
            AccessWidth::Bits8 => {
                if address == map::SPIFI_CONFIG_DATA32 {
                    self.data_register_byte_writes += data.len();
                    let bytes: Vec<u8> = data.iter().map(|&word| word as u8).collect();
                    self.push_data_bytes(&bytes);
                } else {
                    for (index, &word) in data.iter().enumerate() {
                        self.mem.insert(address + index as u32, word as u8);
                    }
                }
            }
            AccessWidth::Bits16 | AccessWidth::Bits64 => {
                unimplemented!("no driver uses this access width")
            }
        }
    }

    fn read(&mut self, address: u32, width: AccessWidth, count: usize) -> Vec<u32> {
        match width {
            AccessWidth::Bits8 => {
                if address == map::SPIFI_CONFIG_DATA32 {
                    self.data_register_byte_reads += count;
                    return (0..count)
                        .map(|_| u32::from(self.read_queue.pop().unwrap_or(0)))
                        .collect();
                }

                (0..count)
                    .map(|index| u32::from(self.mem_byte(address + index as u32)))
                    .collect()
            }
            AccessWidth::Bits32 => {
                if address == map::DMA_CONTROL {
                    return vec![if self.dma_ready { 0xF } else { 0 }; count];
                }

                if address == map::EEPROM_EEDAT {
                    // APB read path: stream words, advancing the pointer.
                    return (0..count)
                        .map(|_| {
                            let offset = self.eeprom_address as usize;
                            self.eeprom_address += 4;
                            u32::from_le_bytes(
                                self.eeprom[offset..offset + 4].try_into().unwrap(),
                            )
                        })
                        .collect();
                }

                if (map::EEPROM_AHB_BASE..map::EEPROM_AHB_BASE + EEPROM_SIZE as u32)
                    .contains(&address)
                {
                    let base = (address - map::EEPROM_AHB_BASE) as usize;
                    return (0..count)
                        .map(|index| {
                            let offset = base + index * 4;
                            u32::from_le_bytes(
                                self.eeprom[offset..offset + 4].try_into().unwrap(),
                            )
                        })
                        .collect();
                }

                (0..count)
                    .map(|index| self.peek_word(address + (index as u32) * 4))
                    .collect()
            }
            AccessWidth::Bits16 | AccessWidth::Bits64 => {
                unimplemented!("no driver uses this access width")
            }
        }
    }
}

/// A scripted in-memory probe.
#[derive(Debug)]
pub(crate) struct MockProbe {
    state: Rc<RefCell<MockState>>,
}

impl MockProbe {
    /// Create a probe plus the shared state handle tests assert against.
    pub fn new() -> (Self, Rc<RefCell<MockState>>) {
        let state = Rc::new(RefCell::new(MockState::new()));
        (
            MockProbe {
                state: Rc::clone(&state),
            },
            state,
        )
    }
}

impl TargetProbe for MockProbe {
    fn halt(&mut self) -> Result<(), ProbeError> {
        self.state.borrow_mut().halts += 1;
        Ok(())
    }

    fn resume(&mut self, address: Option<u32>) -> Result<(), ProbeError> {
        self.state.borrow_mut().resumes.push(address);
        Ok(())
    }

    fn reset_and_halt(&mut self) -> Result<(), ProbeError> {
        self.state.borrow_mut().halts += 1;
        Ok(())
    }

    fn read_memory(
        &mut self,
        address: u32,
        width: AccessWidth,
        count: usize,
    ) -> Result<Vec<u32>, ProbeError> {
        Ok(self.state.borrow_mut().read(address, width, count))
    }

    fn write_memory(
        &mut self,
        address: u32,
        width: AccessWidth,
        data: &[u32],
    ) -> Result<(), ProbeError> {
        self.state.borrow_mut().write(address, width, data);
        Ok(())
    }

    fn run(&mut self, command: &str) -> Result<String, ProbeError> {
        self.state.borrow_mut().commands.push(command.to_string());
        Ok(String::new())
    }
}
