//! Clock bring-up.
//!
//! Flashing touches EEPROM, SPIFI, RAM and the DMA controller, all of which
//! sit behind gateable bus clocks. A target fresh out of reset, or one
//! running firmware that turned clocks off, needs them switched back on
//! before any driver can work.

use crate::flashing::FlashError;
use crate::peripherals::map;
use crate::session::Session;

// AHB clock gates.
const CLOCK_AHB_CPU_M: u32 = 1 << 0;
const CLOCK_AHB_EEPROM_M: u32 = 1 << 1;
const CLOCK_AHB_RAM_M: u32 = 1 << 2;
const CLOCK_AHB_SPIFI_M: u32 = 1 << 3;
const CLOCK_AHB_TCB_M: u32 = 1 << 4;
const CLOCK_AHB_DMA_M: u32 = 1 << 5;

// APB_M clock gates.
const CLOCK_APB_M_PM_M: u32 = 1 << 0;
const CLOCK_APB_M_PAD_CONFIG_M: u32 = 1 << 3;
const CLOCK_APB_M_WU_M: u32 = 1 << 7;

// Wake-up controller RC oscillator trim field.
const CLOCKS_BU_ADJ_RC32K_S: u32 = 1;

const MAX_ATTEMPTS: usize = 2;

/// Enable the bus clocks the flash session needs and verify the writes
/// stuck.
///
/// The readback guards against firmware racing the uploader: a reset
/// between write and readback shows up as a mismatch, and the whole
/// sequence is retried once before giving up.
pub fn power_up(session: &mut Session) -> Result<(), FlashError> {
    let ahb = CLOCK_AHB_CPU_M
        | CLOCK_AHB_EEPROM_M
        | CLOCK_AHB_RAM_M
        | CLOCK_AHB_SPIFI_M
        | CLOCK_AHB_TCB_M
        | CLOCK_AHB_DMA_M;
    let apb_m = CLOCK_APB_M_PM_M | CLOCK_APB_M_PAD_CONFIG_M | CLOCK_APB_M_WU_M;
    let apb_p = 0;
    let wu_clocks = 128 << CLOCKS_BU_ADJ_RC32K_S;

    for attempt in 1..=MAX_ATTEMPTS {
        tracing::debug!("clock init, attempt {attempt}");

        session.halt()?;

        session.write_word(map::PM_CLK_APB_P_CLEAR, !apb_p)?;
        session.write_word(map::PM_CLK_APB_P_SET, apb_p)?;

        session.write_word(map::PM_CLK_AHB_CLEAR, !ahb)?;
        session.write_word(map::PM_CLK_AHB_SET, ahb)?;

        session.write_word(map::PM_CLK_APB_M_CLEAR, !apb_m)?;
        session.write_word(map::PM_CLK_APB_M_SET, apb_m)?;

        session.write_word(map::WU_CLOCKS_BU, wu_clocks)?;

        let apb_p_real = session.read_word(map::PM_CLK_APB_P_SET)?;
        let ahb_real = session.read_word(map::PM_CLK_AHB_SET)?;
        let apb_m_real = session.read_word(map::PM_CLK_APB_M_SET)?;
        let wu_real = session.read_word(map::WU_CLOCKS_BU)?;

        if apb_p_real == apb_p && ahb_real == ahb && apb_m_real == apb_m && wu_real == wu_clocks {
            tracing::debug!("clock init done");
            return Ok(());
        }

        tracing::warn!(
            "clock readback mismatch: ahb {ahb_real:#010x}/{ahb:#010x} \
             apb_m {apb_m_real:#010x}/{apb_m:#010x} \
             apb_p {apb_p_real:#010x}/{apb_p:#010x} \
             wu {wu_real:#010x}/{wu_clocks:#010x}"
        );
    }

    Err(FlashError::PowerInit)
}
