//! Pad routing for the SPIFI pins.
//!
//! The six SPIFI pins share port 2 with GPIO. For the duration of a flash
//! session they are switched to their serial-interface function and handed
//! back afterwards, so firmware that uses port 2 as GPIO keeps working
//! after the upload.

use riscv_uploader_target::ChipVariant;

use crate::flashing::FlashError;
use crate::peripherals::map;
use crate::session::Session;

// Port 2 register offsets inside the pad config block, per silicon
// revision. V0 groups registers by function, V2 by port; the pull-config
// register happens to land at the same offset in both.
const PORT_2_CFG_V0: u32 = 0x08;
const PORT_2_CFG_V2: u32 = 0x18;
const PORT_2_PUD: u32 = 0x20;

/// Pin function selector for the low six port-2 pads: 01 per pad on
/// production silicon, 00 on first silicon.
fn spifi_function_bits(variant: ChipVariant) -> u32 {
    match variant {
        ChipVariant::V0 => 0x000,
        ChipVariant::V2 => 0x555,
    }
}

fn port2_cfg_address(variant: ChipVariant) -> u32 {
    let offset = match variant {
        ChipVariant::V0 => PORT_2_CFG_V0,
        ChipVariant::V2 => PORT_2_CFG_V2,
    };
    map::PAD_CONFIG_REGS + offset
}

/// The claimed SPIFI pads, holding the pad configuration to restore.
///
/// The saved value lives here, scoped to the claim/release bracket, so
/// nothing about the pad state leaks past one flash session.
#[must_use = "the pads stay rerouted until release() is called"]
pub struct SpifiPads {
    cfg_address: u32,
    saved_cfg: u32,
}

impl SpifiPads {
    /// Reroute port 2 to the SPIFI function, remembering the previous
    /// configuration.
    pub fn claim(session: &mut Session, variant: ChipVariant) -> Result<Self, FlashError> {
        let cfg_address = port2_cfg_address(variant);

        session.halt()?;
        let saved_cfg = session.read_word(cfg_address)?;

        let rerouted = (saved_cfg & 0xF000) | spifi_function_bits(variant);
        session.write_word(cfg_address, rerouted)?;
        session.write_word(map::PAD_CONFIG_REGS + PORT_2_PUD, 0x0500)?;

        tracing::debug!("port 2 rerouted to SPIFI, saved cfg {saved_cfg:#06x}");

        Ok(SpifiPads {
            cfg_address,
            saved_cfg,
        })
    }

    /// Restore the pad configuration captured by [`SpifiPads::claim`].
    pub fn release(self, session: &mut Session) -> Result<(), FlashError> {
        session.write_word(self.cfg_address, self.saved_cfg)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use riscv_uploader_target::{ChipVariant, Target};

    use super::*;
    use crate::test::MockProbe;

    #[test]
    fn claim_release_restores_the_saved_config() {
        let (probe, state) = MockProbe::new();
        let cfg = port2_cfg_address(ChipVariant::V2);
        state.borrow_mut().poke_word(cfg, 0xA0AA);

        let mut session = crate::Session::attach(Box::new(probe), Target::generic());

        let pads = SpifiPads::claim(&mut session, ChipVariant::V2).unwrap();
        assert_eq!(state.borrow().peek_word(cfg), 0xA555);

        pads.release(&mut session).unwrap();
        assert_eq!(state.borrow().peek_word(cfg), 0xA0AA);
    }
}
