//! Peripheral register block addresses.

// DMA controller
pub const DMA_REGS: u32 = 0x0004_0000;
pub const DMA_CONTROL: u32 = DMA_REGS + 0x40;
pub const DMA_CHANNEL_STRIDE: u32 = 0x10;

/// First register of a channel's block; destination, source, length and
/// config follow at word offsets 0..=3.
pub fn dma_channel_destination(channel: usize) -> u32 {
    DMA_REGS + channel as u32 * DMA_CHANNEL_STRIDE
}

// Power manager
pub const PM_REGS: u32 = 0x0005_0000;
pub const PM_CLK_AHB_SET: u32 = PM_REGS + 0x0C;
pub const PM_CLK_AHB_CLEAR: u32 = PM_REGS + 0x10;
pub const PM_CLK_APB_M_SET: u32 = PM_REGS + 0x14;
pub const PM_CLK_APB_M_CLEAR: u32 = PM_REGS + 0x18;
pub const PM_CLK_APB_P_SET: u32 = PM_REGS + 0x1C;
pub const PM_CLK_APB_P_CLEAR: u32 = PM_REGS + 0x20;

// Wake-up controller
pub const WU_REGS: u32 = 0x0006_0000;
pub const WU_CLOCKS_BU: u32 = WU_REGS + 0x10;

// Pad configuration
pub const PAD_CONFIG_REGS: u32 = 0x0005_0C00;

// SPIFI controller
pub const SPIFI_REGS: u32 = 0x0007_0000;
pub const SPIFI_CONFIG_CTRL: u32 = SPIFI_REGS + 0x000;
pub const SPIFI_CONFIG_CMD: u32 = SPIFI_REGS + 0x004;
pub const SPIFI_CONFIG_ADDR: u32 = SPIFI_REGS + 0x008;
pub const SPIFI_CONFIG_IDATA: u32 = SPIFI_REGS + 0x00C;
pub const SPIFI_CONFIG_CLIMIT: u32 = SPIFI_REGS + 0x010;
pub const SPIFI_CONFIG_DATA32: u32 = SPIFI_REGS + 0x014;
pub const SPIFI_CONFIG_MCMD: u32 = SPIFI_REGS + 0x018;
pub const SPIFI_CONFIG_STAT: u32 = SPIFI_REGS + 0x01C;

// EEPROM controller
pub const EEPROM_REGS: u32 = 0x0007_0400;
pub const EEPROM_EEDAT: u32 = EEPROM_REGS + 0x00;
pub const EEPROM_EEA: u32 = EEPROM_REGS + 0x04;
pub const EEPROM_EECON: u32 = EEPROM_REGS + 0x08;
pub const EEPROM_NCYCRL: u32 = EEPROM_REGS + 0x18;
pub const EEPROM_NCYCEP1: u32 = EEPROM_REGS + 0x1C;
pub const EEPROM_NCYCEP2: u32 = EEPROM_REGS + 0x20;

/// Base of the AHB-Lite window onto the EEPROM array.
pub const EEPROM_AHB_BASE: u32 = 0x0100_0000;
