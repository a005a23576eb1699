//! Target description schema
//!
//! Writing firmware into a chip requires some chip specific configuration:
//! where the EEPROM, RAM and external-flash windows live in the address
//! space, how large the programmable pages of each memory are, and which
//! silicon revision of the pad controller the part carries.
//!
//! This crate contains the schema structs for the YAML target description
//! files, plus the built-in description used when no file is given.

#![warn(missing_docs)]

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The kind of memory an address-space section maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    /// The boot alias window. Depending on the boot pins, one of the other
    /// memories is mirrored here; data placed in this window has to be
    /// attributed to a real memory via [`BootMode`] before it can be written.
    Boot,
    /// The on-chip EEPROM behind the EEPROM controller.
    Eeprom,
    /// On-chip RAM.
    Ram,
    /// External SPI-NOR flash behind the SPIFI controller.
    Spifi,
    /// Anything the description does not cover.
    Unknown,
}

/// A contiguous, non-overlapping slice of the target address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySection {
    /// The memory behind this address range.
    #[serde(rename = "type")]
    pub ty: MemoryType,
    /// First address of the section.
    pub offset: u32,
    /// Section length in bytes.
    pub length: u32,
}

impl MemorySection {
    /// The first address past the end of the section.
    pub fn end(&self) -> u32 {
        self.offset + self.length
    }

    /// Whether `address` falls inside the section.
    pub fn contains(&self, address: u32) -> bool {
        address >= self.offset && address < self.end()
    }
}

/// Which memory the boot alias region of an image is attributed to.
///
/// Firmware images are usually linked against the boot window at offset 0.
/// The uploader cannot know which memory the boot pins will mirror there, so
/// the caller has to say. With [`BootMode::Undefined`] boot-window data is
/// discarded with a warning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootMode {
    /// Discard data located in the boot window.
    #[default]
    Undefined,
    /// Boot window data goes to the on-chip EEPROM.
    Eeprom,
    /// Boot window data goes to RAM.
    Ram,
    /// Boot window data goes to the external SPIFI flash.
    Spifi,
}

impl BootMode {
    /// The memory type boot-window data is remapped to, if any.
    pub fn memory_type(self) -> Option<MemoryType> {
        match self {
            BootMode::Undefined => None,
            BootMode::Eeprom => Some(MemoryType::Eeprom),
            BootMode::Ram => Some(MemoryType::Ram),
            BootMode::Spifi => Some(MemoryType::Spifi),
        }
    }
}

impl FromStr for BootMode {
    type Err = TargetDescriptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "undefined" => Ok(BootMode::Undefined),
            "eeprom" => Ok(BootMode::Eeprom),
            "ram" => Ok(BootMode::Ram),
            "spifi" => Ok(BootMode::Spifi),
            other => Err(TargetDescriptionError::UnknownBootMode(other.to_string())),
        }
    }
}

/// Silicon revision of the pad controller.
///
/// The two shipped revisions lay out the per-port pad configuration
/// registers differently, which matters when the uploader switches the
/// SPIFI pins to their alternate function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChipVariant {
    /// First silicon, registers grouped by function.
    V0,
    /// Production silicon, registers grouped by port.
    V2,
}

/// Full description of one chip variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    /// Name of the chip variant.
    pub name: String,
    /// Pad controller revision.
    pub variant: ChipVariant,
    /// The address-space sections of the chip. Must not overlap.
    pub memory_map: Vec<MemorySection>,
    /// Program granularity of the EEPROM in bytes.
    #[serde(default = "default_eeprom_page_size")]
    pub eeprom_page_size: u32,
    /// Program granularity of the external flash in bytes.
    #[serde(default = "default_spifi_page_size")]
    pub spifi_page_size: u32,
    /// Erase granularity of the external flash in bytes.
    #[serde(default = "default_spifi_sector_size")]
    pub spifi_sector_size: u32,
}

fn default_eeprom_page_size() -> u32 {
    128
}

fn default_spifi_page_size() -> u32 {
    256
}

fn default_spifi_sector_size() -> u32 {
    4096
}

impl Target {
    /// The built-in target description.
    pub fn generic() -> Self {
        Target {
            name: "rv32-generic".to_string(),
            variant: ChipVariant::V2,
            memory_map: vec![
                MemorySection {
                    ty: MemoryType::Boot,
                    offset: 0x0000_0000,
                    length: 0x1_0000,
                },
                MemorySection {
                    ty: MemoryType::Eeprom,
                    offset: 0x0100_0000,
                    length: 8 * 1024,
                },
                MemorySection {
                    ty: MemoryType::Ram,
                    offset: 0x0200_0000,
                    length: 16 * 1024,
                },
                MemorySection {
                    ty: MemoryType::Spifi,
                    offset: 0x8000_0000,
                    length: 16 * 1024 * 1024,
                },
            ],
            eeprom_page_size: default_eeprom_page_size(),
            spifi_page_size: default_spifi_page_size(),
            spifi_sector_size: default_spifi_sector_size(),
        }
    }

    /// Parse a target description from its YAML form and validate it.
    pub fn from_yaml(yaml: &str) -> Result<Self, TargetDescriptionError> {
        let target: Target = serde_yaml::from_str(yaml)?;
        target.validate()?;
        Ok(target)
    }

    /// The section backing the given memory type, if the chip has one.
    pub fn section(&self, ty: MemoryType) -> Option<&MemorySection> {
        self.memory_map.iter().find(|section| section.ty == ty)
    }

    /// The section containing the given address, if any.
    pub fn locate(&self, address: u32) -> Option<&MemorySection> {
        self.memory_map
            .iter()
            .find(|section| section.contains(address))
    }

    /// Program granularity of a pageable memory.
    pub fn page_size(&self, ty: MemoryType) -> Option<u32> {
        match ty {
            MemoryType::Eeprom => Some(self.eeprom_page_size),
            MemoryType::Spifi => Some(self.spifi_page_size),
            _ => None,
        }
    }

    /// Check the section-table invariants.
    pub fn validate(&self) -> Result<(), TargetDescriptionError> {
        let mut sections: Vec<&MemorySection> = self.memory_map.iter().collect();
        sections.sort_by_key(|section| section.offset);

        for pair in sections.windows(2) {
            if pair[0].end() > pair[1].offset {
                return Err(TargetDescriptionError::OverlappingSections {
                    first: pair[0].ty,
                    second: pair[1].ty,
                });
            }
        }

        Ok(())
    }
}

/// Errors produced while loading or validating a target description.
#[derive(Debug, thiserror::Error)]
pub enum TargetDescriptionError {
    /// The YAML could not be deserialized.
    #[error("failed to parse target description")]
    Yaml(#[from] serde_yaml::Error),
    /// Two sections of the memory map overlap.
    #[error("memory sections {first:?} and {second:?} overlap")]
    OverlappingSections {
        /// Lower of the two sections.
        first: MemoryType,
        /// Upper of the two sections.
        second: MemoryType,
    },
    /// An unknown boot mode name was given.
    #[error("unknown boot mode {0:?}, expected undefined, eeprom, ram or spifi")]
    UnknownBootMode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_target_is_valid() {
        Target::generic().validate().unwrap();
    }

    #[test]
    fn locate_finds_the_right_section() {
        let target = Target::generic();

        assert_eq!(target.locate(0x0).unwrap().ty, MemoryType::Boot);
        assert_eq!(target.locate(0x0100_1000).unwrap().ty, MemoryType::Eeprom);
        assert_eq!(target.locate(0x8000_0000).unwrap().ty, MemoryType::Spifi);
        assert!(target.locate(0x4000_0000).is_none());
    }

    #[test]
    fn overlap_is_rejected() {
        let mut target = Target::generic();
        target.memory_map.push(MemorySection {
            ty: MemoryType::Unknown,
            offset: 0x0100_0800,
            length: 0x1000,
        });

        assert!(matches!(
            target.validate(),
            Err(TargetDescriptionError::OverlappingSections { .. })
        ));
    }

    #[test]
    fn yaml_round_trip() {
        let yaml = "
name: rv32-big-flash
variant: V2
memory_map:
  - { type: boot, offset: 0x0, length: 0x10000 }
  - { type: eeprom, offset: 0x01000000, length: 0x2000 }
  - { type: ram, offset: 0x02000000, length: 0x4000 }
  - { type: spifi, offset: 0x80000000, length: 0x4000000 }
";
        let target = Target::from_yaml(yaml).unwrap();
        assert_eq!(target.name, "rv32-big-flash");
        // Page sizes fall back to the family defaults.
        assert_eq!(target.eeprom_page_size, 128);
        assert_eq!(target.spifi_page_size, 256);
        assert_eq!(target.spifi_sector_size, 4096);
        assert_eq!(
            target.section(MemoryType::Spifi).unwrap().length,
            0x400_0000
        );
    }
}
