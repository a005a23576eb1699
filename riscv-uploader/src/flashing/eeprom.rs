//! Page-level programming of the on-chip EEPROM.

use riscv_uploader_target::MemoryType;

use super::agent::{self, AgentImage};
use super::builder::PageMap;
use super::progress::FlashProgress;
use super::FlashError;
use crate::peripherals::eeprom::Eeprom;
use crate::session::Session;

/// Knobs for one EEPROM write or check pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct EepromOptions {
    /// Verify through the streamed APB register path instead of the
    /// AHB-Lite memory window.
    pub verify_through_apb: bool,
}

/// Driver for writing whole page maps into the EEPROM.
pub struct EepromFlasher<'a> {
    eeprom: Eeprom<'a>,
}

impl<'a> EepromFlasher<'a> {
    /// Wrap the session.
    pub fn new(session: &'a mut Session) -> Self {
        EepromFlasher {
            eeprom: Eeprom::new(session),
        }
    }

    fn session(&mut self) -> &mut Session {
        self.eeprom.session_mut()
    }

    /// Erase the array and verify it reads blank, retrying the erase once.
    ///
    /// Completion of an erase is not observable, so the blank check is the
    /// only confirmation there is.
    fn erase_and_check(&mut self) -> Result<(), FlashError> {
        let blank_words = {
            let target = self.session().target();
            let section = target.section(MemoryType::Eeprom);
            section.map_or(2048, |section| (section.length / 4) as usize)
        };

        self.eeprom.global_erase()?;
        if self.eeprom.verify_ahb(0, &vec![0u32; blank_words]).is_ok() {
            return Ok(());
        }

        tracing::warn!("EEPROM global erase failed, trying again");
        self.eeprom.global_erase()?;
        if self.eeprom.verify_ahb(0, &vec![0u32; blank_words]).is_err() {
            return Err(FlashError::EraseVerifyFailed);
        }
        Ok(())
    }

    /// Erase, program and verify every page of the map. The first verify
    /// failure aborts the pass.
    pub fn write_pages(
        &mut self,
        pages: &PageMap,
        options: &EepromOptions,
        progress: &FlashProgress,
    ) -> Result<(), FlashError> {
        progress.region_started(MemoryType::Eeprom, pages.len(), pages.byte_len());

        self.session().halt()?;
        self.eeprom.configure_default_cycles()?;
        self.erase_and_check()?;

        tracing::info!("EEPROM writing");
        let total = pages.len();
        for (index, (offset, page)) in pages.iter().enumerate() {
            tracing::info!("writing page {offset:#06x}... {}%", index * 100 / total);

            let words = super::bytes_to_words(page);
            self.eeprom.write_page(offset, &words)?;
            self.eeprom
                .verify(offset, &words, options.verify_through_apb)?;
            progress.page_programmed(offset, page.len());
        }

        tracing::info!("EEPROM page recording completed");
        Ok(())
    }

    /// Verify-only pass over every page of the map.
    pub fn check_pages(
        &mut self,
        pages: &PageMap,
        options: &EepromOptions,
        progress: &FlashProgress,
    ) -> Result<(), FlashError> {
        progress.region_started(MemoryType::Eeprom, pages.len(), pages.byte_len());

        self.session().halt()?;
        self.eeprom.configure_default_cycles()?;

        tracing::info!("EEPROM checking");
        let total = pages.len();
        for (index, (offset, page)) in pages.iter().enumerate() {
            tracing::info!("checking page {offset:#06x}... {}%", index * 100 / total);

            let words = super::bytes_to_words(page);
            self.eeprom
                .verify(offset, &words, options.verify_through_apb)?;
        }

        tracing::info!("EEPROM page check completed");
        Ok(())
    }

    /// Resident-driver write path: the whole image is combined into one
    /// contiguous buffer (gaps zero-filled), handed to the agent in RAM,
    /// and programmed on-target in a single round.
    pub fn write_memory(
        &mut self,
        pages: &PageMap,
        agent: &AgentImage,
        progress: &FlashProgress,
    ) -> Result<(), FlashError> {
        progress.region_started(MemoryType::Eeprom, pages.len(), pages.byte_len());

        let combined = pages.combined();

        agent::start(self.session(), agent)?;

        let result: Result<(), FlashError> = (|| {
            let session = self.session();
            session.write_bytes(agent.staging, &combined)?;
            agent::run_round(session, agent, combined.len() as u32)
        })();

        agent::stop(self.session(), agent)?;

        result?;
        tracing::info!("EEPROM programming by resident driver completed");
        Ok(())
    }
}
