//! The EEPROM controller.
//!
//! Unlike the external flash there is no command engine in between: the
//! controller exposes an address register, a 32-word page buffer behind a
//! single data register, and a control register that starts one of three
//! operations. Completion is not observable from the host, so programming
//! relies on fixed settle delays.

use std::time::Duration;

use crate::flashing::FlashError;
use crate::peripherals::map;
use crate::session::Session;

/// Words per EEPROM page, the unit of one program operation.
pub const PAGE_WORDS: usize = 32;

// EECON fields.
const EECON_EX_S: u32 = 0;
const EECON_OP_S: u32 = 1;
const EECON_WRBEH_S: u32 = 3;
const EECON_BWE_S: u32 = 7;

// NCYCRL fields.
const NCYCRL_N_LD_S: u32 = 0;
const NCYCRL_N_R_1_S: u32 = 8;
const NCYCRL_N_R_2_S: u32 = 16;

const PROGRAM_SETTLE: Duration = Duration::from_millis(1);
const CYCLES_SETTLE: Duration = Duration::from_millis(100);

/// The operation started by the control register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Load the page buffer from the array.
    Read = 0,
    /// Erase the affected pages.
    Erase = 1,
    /// Program the page buffer into the affected pages.
    Program = 2,
}

/// Which pages an operation affects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AffectedPages {
    /// Only the addressed page.
    Single = 0,
    /// All even pages.
    Even = 1,
    /// All odd pages.
    Odd = 2,
    /// The whole array.
    Global = 3,
}

fn setup_word(pages: AffectedPages) -> u32 {
    (1 << EECON_BWE_S) | ((pages as u32) << EECON_WRBEH_S)
}

fn start_word(op: Operation, pages: AffectedPages) -> u32 {
    (1 << EECON_EX_S)
        | (1 << EECON_BWE_S)
        | ((op as u32) << EECON_OP_S)
        | ((pages as u32) << EECON_WRBEH_S)
}

/// Register-level driver for the EEPROM controller.
pub struct Eeprom<'a> {
    session: &'a mut Session,
}

impl<'a> Eeprom<'a> {
    /// Wrap the session; no hardware access happens yet.
    pub fn new(session: &'a mut Session) -> Self {
        Eeprom { session }
    }

    pub(crate) fn session_mut(&mut self) -> &mut Session {
        self.session
    }

    /// Program the load/read cycle counters and the erase/program cycle
    /// durations. Has to happen before any operation, otherwise the cell
    /// timing is wrong.
    pub fn configure_cycles(
        &mut self,
        ld: u32,
        r_1: u32,
        r_2: u32,
        cycep1: u32,
        cycep2: u32,
    ) -> Result<(), FlashError> {
        self.session.write_word(
            map::EEPROM_NCYCRL,
            (ld << NCYCRL_N_LD_S) | (r_1 << NCYCRL_N_R_1_S) | (r_2 << NCYCRL_N_R_2_S),
        )?;
        self.session.write_word(map::EEPROM_NCYCEP1, cycep1)?;
        self.session.write_word(map::EEPROM_NCYCEP2, cycep2)?;
        Ok(())
    }

    /// [`Eeprom::configure_cycles`] with the values used for a 32 MHz core
    /// clock, plus the settle delay the controller needs afterwards.
    pub fn configure_default_cycles(&mut self) -> Result<(), FlashError> {
        self.configure_cycles(1, 3, 1, 100_000, 1_000)?;
        std::thread::sleep(CYCLES_SETTLE);
        Ok(())
    }

    /// Run one controller operation: set up address and page selection,
    /// stream the buffer into the page buffer, then start.
    ///
    /// Buffers beyond the 32-word page buffer are rejected before any
    /// register is touched.
    pub fn execute_operation(
        &mut self,
        op: Operation,
        pages: AffectedPages,
        offset: u32,
        buffer: &[u32],
    ) -> Result<(), FlashError> {
        if buffer.len() > PAGE_WORDS {
            return Err(FlashError::EepromBufferTooLarge(buffer.len()));
        }

        // Address and buffer-write-enable land as one two-word burst on
        // EEA/EECON.
        self.session
            .write_words(map::EEPROM_EEA, &[offset, setup_word(pages)])?;

        for &word in buffer {
            self.session.write_word(map::EEPROM_EEDAT, word)?;
        }

        self.session
            .write_word(map::EEPROM_EECON, start_word(op, pages))?;
        Ok(())
    }

    /// Erase the whole array.
    pub fn global_erase(&mut self) -> Result<(), FlashError> {
        tracing::info!("EEPROM global erase");
        self.execute_operation(
            Operation::Erase,
            AffectedPages::Global,
            0,
            &[0; PAGE_WORDS],
        )
    }

    /// Program one page and wait out the settle delay.
    pub fn write_page(&mut self, address: u32, words: &[u32]) -> Result<(), FlashError> {
        self.execute_operation(Operation::Program, AffectedPages::Single, address, words)?;
        std::thread::sleep(PROGRAM_SETTLE);
        Ok(())
    }

    /// Compare `words` against the array through the APB data register:
    /// load the address once, then stream reads that advance an implicit
    /// pointer. Aborts at the first mismatch.
    pub fn verify_apb(&mut self, offset: u32, words: &[u32]) -> Result<(), FlashError> {
        self.session.write_word(map::EEPROM_EEA, offset)?;

        for (index, &expected) in words.iter().enumerate() {
            let actual = self.session.read_word(map::EEPROM_EEDAT)?;
            if actual != expected {
                return Err(FlashError::Mismatch {
                    address: offset + (index as u32) * 4,
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }

    /// Compare `words` against the array through the AHB-Lite memory
    /// window: one bulk read, compared host-side. The cheaper default.
    pub fn verify_ahb(&mut self, offset: u32, words: &[u32]) -> Result<(), FlashError> {
        let actual = self
            .session
            .read_words(map::EEPROM_AHB_BASE + offset, words.len())?;

        for (index, (&expected, &actual)) in words.iter().zip(actual.iter()).enumerate() {
            if actual != expected {
                return Err(FlashError::Mismatch {
                    address: offset + (index as u32) * 4,
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }

    /// Verify through one of the two bus paths.
    pub fn verify(
        &mut self,
        offset: u32,
        words: &[u32],
        through_apb: bool,
    ) -> Result<(), FlashError> {
        if through_apb {
            self.verify_apb(offset, words)
        } else {
            self.verify_ahb(offset, words)
        }
    }
}

#[cfg(test)]
mod tests {
    use riscv_uploader_target::Target;

    use super::*;
    use crate::test::MockProbe;

    #[test]
    fn oversized_buffer_is_rejected_before_any_register_write() {
        let (probe, state) = MockProbe::new();
        let mut session = crate::Session::attach(Box::new(probe), Target::generic());
        let mut eeprom = Eeprom::new(&mut session);

        let buffer = [0u32; 33];
        let result =
            eeprom.execute_operation(Operation::Program, AffectedPages::Single, 0, &buffer);

        assert!(matches!(result, Err(FlashError::EepromBufferTooLarge(33))));
        let state = state.borrow();
        assert_eq!(state.word_writes.len(), 0);
        assert_eq!(state.word_bursts.len(), 0);
    }

    #[test]
    fn full_page_performs_the_exact_write_sequence() {
        let (probe, state) = MockProbe::new();
        let mut session = crate::Session::attach(Box::new(probe), Target::generic());
        let mut eeprom = Eeprom::new(&mut session);

        let buffer = [0x1234_5678u32; 32];
        eeprom
            .execute_operation(Operation::Program, AffectedPages::Single, 0x80, &buffer)
            .unwrap();

        let state = state.borrow();

        // One address/control burst.
        assert_eq!(state.word_bursts.len(), 1);
        assert_eq!(state.word_bursts[0].0, map::EEPROM_EEA);
        assert_eq!(state.word_bursts[0].1, vec![0x80, 0x80]);

        // 32 data writes, then exactly one start write.
        let data_writes = state
            .word_writes
            .iter()
            .filter(|(address, _)| *address == map::EEPROM_EEDAT)
            .count();
        assert_eq!(data_writes, 32);

        let (last_address, last_value) = *state.word_writes.last().unwrap();
        assert_eq!(last_address, map::EEPROM_EECON);
        // EX | PROGRAM | BWE, single page.
        assert_eq!(last_value, 0x85);
    }

    #[test]
    fn global_erase_control_words() {
        assert_eq!(setup_word(AffectedPages::Global), 0x98);
        assert_eq!(start_word(Operation::Erase, AffectedPages::Global), 0x9B);
    }
}
