//! Target identification: core-ID naming, MCU ID-code lookup, and the
//! static personality table the flash/loader layers are parameterised by.
//!
//! Identification performs two independent linear scans — one to name the
//! ARM core, one to find the MCU by ID-code — and never errors: an unknown
//! ID code falls back to personality index 0 (a generic STM32 record) with
//! a warning, since a flashing tool should degrade gracefully rather than
//! refuse to talk to an unrecognised part.

use crate::protocol::Protocol;
use crate::transport::Transport;

/// Capability bits distinguishing how a personality's flash controller and
/// peripheral addresses behave. A plain bitset rather than a crate: the
/// three flags are exhaustive and never combined with anything the table
/// doesn't already spell out.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Capability(u8);

impl Capability {
    /// STM32F4-style flash controller (PM0081): single KEYR, different
    /// SR/CR bit positions and sector-erase encoding than F1/L1.
    pub const F4_FLASH: Capability = Capability(0b001);
    /// STM32L1-style flash controller (PECR/PEKEYR/PRGKEYR two-stage
    /// unlock).
    pub const L1_FLASH: Capability = Capability(0b010);
    /// STM32L1-style peripheral address map.
    pub const L1_ADDRS: Capability = Capability(0b100);

    pub const fn empty() -> Capability {
        Capability(0)
    }

    pub const fn union(self, other: Capability) -> Capability {
        Capability(self.0 | other.0)
    }

    pub fn contains(self, flag: Capability) -> bool {
        self.0 & flag.0 == flag.0
    }
}

impl std::ops::BitOr for Capability {
    type Output = Capability;

    fn bitor(self, rhs: Capability) -> Capability {
        self.union(rhs)
    }
}

/// One ARM core-ID table entry, used only to name the core for display.
#[derive(Debug, Clone, Copy)]
pub struct CoreIdEntry {
    pub name: &'static str,
    pub core_id: u32,
}

pub const CORE_IDS: &[CoreIdEntry] = &[
    CoreIdEntry { name: "Cortex-M0", core_id: 0x0bb1_1477 },
    CoreIdEntry { name: "Cortex-M3 r1", core_id: 0x1ba0_1477 },
    CoreIdEntry { name: "Cortex-M3 r2p0", core_id: 0x4ba0_0477 },
    CoreIdEntry { name: "Cortex-M4 r0", core_id: 0x2ba0_1477 },
];

/// A record describing one MCU family's flash layout, SRAM, and erase
/// conventions. Records are immutable and process-wide.
#[derive(Debug, Clone, Copy)]
pub struct Personality {
    pub name: &'static str,
    pub caps: Capability,
    pub core_id: u32,
    pub mcu_idcode: u32,
    pub flash_base: u32,
    pub flash_size: u32,
    pub flash_pgsize: u32,
    pub sysflash_base: u32,
    pub sysflash_size: u32,
    pub sysflash_pgsize: u32,
    pub sram_base: u32,
    pub sram_size: u32,
}

/// The static personality table, transcribed from the reference tool's
/// `stm_devids[]`. Index 0 is the generic fallback used when no MCU
/// ID-code matches.
pub const PERSONALITIES: &[Personality] = &[
    Personality {
        name: "STM32 (generic fallback)",
        caps: Capability::empty(),
        core_id: 0x1ba0_1477,
        mcu_idcode: 0x1000_0400,
        flash_base: 0x0800_0000,
        flash_size: 128 * 1024,
        flash_pgsize: 1024,
        sysflash_base: 0x1fff_ec00,
        sysflash_size: 2 * 1024,
        sysflash_pgsize: 1024,
        sram_base: 0x2000_0000,
        sram_size: 8 * 1024,
    },
    Personality {
        name: "STM32F051-R8T6",
        caps: Capability::empty(),
        core_id: 0x0bb1_1477,
        mcu_idcode: 0x2000_6440,
        flash_base: 0x0800_0000,
        flash_size: 64 * 1024,
        flash_pgsize: 1024,
        sysflash_base: 0x1fff_ec00,
        sysflash_size: 8 * 1024,
        sysflash_pgsize: 1024,
        sram_base: 0x2000_0000,
        sram_size: 8 * 1024,
    },
    Personality {
        name: "STM32F100",
        caps: Capability::empty(),
        core_id: 0x1ba0_1477,
        mcu_idcode: 0x1001_6420,
        flash_base: 0x0800_0000,
        flash_size: 128 * 1024,
        flash_pgsize: 1024,
        sysflash_base: 0x1fff_f000,
        sysflash_size: 2 * 1024,
        sysflash_pgsize: 1024,
        sram_base: 0x2000_0000,
        sram_size: 8 * 1024,
    },
    Personality {
        name: "STM32F103R4T6",
        caps: Capability::empty(),
        core_id: 0x1ba0_1477,
        mcu_idcode: 0x0000_5e7d,
        flash_base: 0x0800_0000,
        flash_size: 32 * 1024,
        flash_pgsize: 1024,
        sysflash_base: 0x1fff_f000,
        sysflash_size: 2 * 1024,
        sysflash_pgsize: 1024,
        sram_base: 0x2000_0000,
        sram_size: 4 * 1024,
    },
    Personality {
        name: "STM32F103C8T6",
        caps: Capability::empty(),
        core_id: 0x1ba0_1477,
        mcu_idcode: 0x2003_6410,
        flash_base: 0x0800_0000,
        flash_size: 64 * 1024,
        flash_pgsize: 1024,
        sysflash_base: 0x1fff_f000,
        sysflash_size: 2 * 1024,
        sysflash_pgsize: 1024,
        sram_base: 0x2000_0000,
        sram_size: 20 * 1024,
    },
    Personality {
        name: "STM32F105RB",
        caps: Capability::empty(),
        core_id: 0x3ba0_0477,
        mcu_idcode: 0x1001_6430,
        flash_base: 0x0800_0000,
        flash_size: 32 * 1024,
        flash_pgsize: 1024,
        sysflash_base: 0x1fff_f000,
        sysflash_size: 2 * 1024,
        sysflash_pgsize: 1024,
        sram_base: 0x2000_0000,
        sram_size: 4 * 1024,
    },
    Personality {
        name: "STM32F10x (low-density)",
        caps: Capability::empty(),
        core_id: 0x1ba0_1477,
        mcu_idcode: 0x1001_6412,
        flash_base: 0x0800_0000,
        flash_size: 32 * 1024,
        flash_pgsize: 1024,
        sysflash_base: 0x1fff_f000,
        sysflash_size: 2 * 1024,
        sysflash_pgsize: 1024,
        sram_base: 0x2000_0000,
        sram_size: 4 * 1024,
    },
    Personality {
        name: "STM32F10x (medium-density)",
        caps: Capability::empty(),
        core_id: 0x1ba0_1477,
        mcu_idcode: 0x1001_6410,
        flash_base: 0x0800_0000,
        flash_size: 128 * 1024,
        flash_pgsize: 1024,
        sysflash_base: 0x1fff_f000,
        sysflash_size: 2 * 1024,
        sysflash_pgsize: 1024,
        sram_base: 0x2000_0000,
        sram_size: 8 * 1024,
    },
    Personality {
        name: "STM32F10x (high-density)",
        caps: Capability::empty(),
        core_id: 0x1ba0_1477,
        mcu_idcode: 0x1001_6414,
        flash_base: 0x0800_0000,
        flash_size: 512 * 1024,
        flash_pgsize: 1024,
        sysflash_base: 0x1fff_f000,
        sysflash_size: 2 * 1024,
        sysflash_pgsize: 1024,
        sram_base: 0x2000_0000,
        sram_size: 8 * 1024,
    },
    Personality {
        name: "STM32F10x (XL-density)",
        caps: Capability::empty(),
        core_id: 0x1ba0_1477,
        mcu_idcode: 0x1001_6430,
        flash_base: 0x0800_0000,
        flash_size: 1024 * 1024,
        flash_pgsize: 2048,
        sysflash_base: 0x1fff_e000,
        sysflash_size: 6 * 1024,
        sysflash_pgsize: 1024,
        sram_base: 0x2000_0000,
        sram_size: 8 * 1024,
    },
    Personality {
        name: "STM32F107 (connectivity)",
        caps: Capability::empty(),
        core_id: 0x1ba0_1477,
        mcu_idcode: 0x1001_6418,
        flash_base: 0x0800_0000,
        flash_size: 256 * 1024,
        flash_pgsize: 2048,
        sysflash_base: 0x1fff_b000,
        sysflash_size: 18 * 1024,
        sysflash_pgsize: 1024,
        sram_base: 0x2000_0000,
        sram_size: 8 * 1024,
    },
    Personality {
        name: "STM32L152",
        caps: Capability::L1_FLASH.union(Capability::L1_ADDRS),
        core_id: 0x1ba0_1477,
        mcu_idcode: 0x1018_6416,
        flash_base: 0x0800_0000,
        flash_size: 128 * 1024,
        flash_pgsize: 2048,
        sysflash_base: 0x1fff_b000,
        sysflash_size: 16 * 1024,
        sysflash_pgsize: 1024,
        sram_base: 0x2000_0000,
        sram_size: 8 * 1024,
    },
    Personality {
        name: "STM32F303VCT6",
        caps: Capability::empty(),
        core_id: 0x3ba0_0477,
        mcu_idcode: 0x1001_6422,
        flash_base: 0x0800_0000,
        flash_size: 256 * 1024,
        flash_pgsize: 2048,
        sysflash_base: 0x1fff_b000,
        sysflash_size: 18 * 1024,
        sysflash_pgsize: 1024,
        sram_base: 0x2000_0000,
        sram_size: 8 * 1024,
    },
    Personality {
        name: "STM32F407",
        caps: Capability::F4_FLASH,
        core_id: 0x2ba0_1477,
        mcu_idcode: 0x2000_6411,
        flash_base: 0x0800_0000,
        flash_size: 256 * 1024,
        flash_pgsize: 2048,
        sysflash_base: 0x1fff_b000,
        sysflash_size: 18 * 1024,
        sysflash_pgsize: 1024,
        sram_base: 0x2000_0000,
        sram_size: 8 * 1024,
    },
    Personality {
        name: "STM32F4xx",
        caps: Capability::F4_FLASH,
        core_id: 0x2ba0_1477,
        mcu_idcode: 0x1000_6420,
        flash_base: 0x0800_0000,
        flash_size: 256 * 1024,
        flash_pgsize: 2048,
        sysflash_base: 0x1fff_b000,
        sysflash_size: 18 * 1024,
        sysflash_pgsize: 1024,
        sram_base: 0x2000_0000,
        sram_size: 8 * 1024,
    },
];

/// Index of the generic fallback personality.
pub const FALLBACK_PERSONALITY: usize = 0;

/// The DBGMCU_IDCODE register address used by every core except Cortex-M0.
const DBGMCU_IDCODE_ADDR: u32 = 0xE004_2000;
/// The Cortex-M0 equivalent of DBGMCU_IDCODE.
const M0_IDCODE_ADDR: u32 = 0x4001_5800;

/// Result of identification: the raw IDs plus the matched (or fallback)
/// personality index.
#[derive(Debug, Clone, Copy)]
pub struct Identification {
    pub core_id: u32,
    pub mcu_idcode: u32,
    pub personality_index: usize,
    pub core_name: &'static str,
}

/// Names the core behind `core_id`, returning `None` when it isn't in the
/// table (the caller surfaces this as a warning, not an error).
pub fn name_core(core_id: u32) -> Option<&'static str> {
    CORE_IDS
        .iter()
        .find(|entry| entry.core_id == core_id)
        .map(|entry| entry.name)
}

/// Looks up a personality index by MCU ID-code; first match wins, falling
/// back to [`FALLBACK_PERSONALITY`] when nothing matches.
pub fn lookup_personality(mcu_idcode: u32) -> usize {
    PERSONALITIES
        .iter()
        .position(|p| p.mcu_idcode == mcu_idcode)
        .unwrap_or(FALLBACK_PERSONALITY)
}

/// Reads the core ID and MCU ID-code over `protocol` and resolves a
/// personality, logging a warning when either lookup misses.
pub fn identify<T: Transport>(
    protocol: &mut Protocol<T>,
) -> Result<Identification, crate::error::TransportError> {
    let core_id = protocol.read_core_id()?;

    let idcode_addr = if core_id == CORE_IDS[0].core_id {
        M0_IDCODE_ADDR
    } else {
        DBGMCU_IDCODE_ADDR
    };
    let mcu_idcode = read_idcode(protocol, idcode_addr)?;

    let core_name = name_core(core_id).unwrap_or_else(|| {
        log::warn!(
            "SWD core ID {:#010x} did not match a known ARM core",
            core_id
        );
        "Unknown core"
    });

    let personality_index = lookup_personality(mcu_idcode);
    if personality_index == FALLBACK_PERSONALITY
        && mcu_idcode != PERSONALITIES[FALLBACK_PERSONALITY].mcu_idcode
    {
        log::warn!(
            "MCU ID-code {:#010x} is unrecognized, falling back to {}",
            mcu_idcode,
            PERSONALITIES[FALLBACK_PERSONALITY].name
        );
    }

    Ok(Identification {
        core_id,
        mcu_idcode,
        personality_index,
        core_name,
    })
}

fn read_idcode<T: Transport>(
    protocol: &mut Protocol<T>,
    addr: u32,
) -> Result<u32, crate::error::TransportError> {
    let buf = protocol.read_mem_32(addr, 4)?;
    Ok(crate::codec::read_u32(&buf, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::FakeTransport;
    use crate::protocol::Protocol;

    #[test]
    fn identifies_stm32f103c8t6() {
        let mut transport = FakeTransport::default();
        // read_core_id reply
        transport.push_reply(&0x1ba0_1477u32.to_le_bytes());
        // read_mem_32 reply for DBGMCU_IDCODE
        transport.push_reply(&0x2003_6410u32.to_le_bytes());
        let mut protocol = Protocol::new(transport);

        let id = identify(&mut protocol).unwrap();
        assert_eq!(id.core_name, "Cortex-M3 r1");
        let personality = &PERSONALITIES[id.personality_index];
        assert_eq!(personality.name, "STM32F103C8T6");
        assert_eq!(personality.flash_base, 0x0800_0000);
        assert_eq!(personality.flash_size, 64 * 1024);
        assert_eq!(personality.flash_pgsize, 1024);
    }

    #[test]
    fn unknown_idcode_falls_back_to_generic() {
        assert_eq!(lookup_personality(0xffff_ffff), FALLBACK_PERSONALITY);
    }

    #[test]
    fn cortex_m0_reads_idcode_from_its_own_address() {
        let mut transport = FakeTransport::default();
        transport.push_reply(&CORE_IDS[0].core_id.to_le_bytes());
        transport.push_reply(&0u32.to_le_bytes());
        let mut protocol = Protocol::new(transport);

        identify(&mut protocol).unwrap();
        let sent = &protocol.transport_mut().sent_commands[1];
        let addr = crate::codec::read_u32(sent, 2);
        assert_eq!(addr, M0_IDCODE_ADDR);
    }
}
