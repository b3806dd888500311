//! STM32F4 flash controller (PM0081): a single `F4_FLASH_KEYR` unlock and
//! sector-indexed erase rather than F1's page-address erase.

use crate::protocol::Protocol;
use crate::transport::Transport;

use super::{poll_busy, write_reg, FlashError, MASS_ERASE_SENTINEL};

pub const FLASH_REGS_BASE: u32 = 0x4002_3C00;
const FLASH_KEYR: u32 = FLASH_REGS_BASE + 0x04;
const FLASH_SR: u32 = FLASH_REGS_BASE + 0x0c;
const FLASH_CR: u32 = FLASH_REGS_BASE + 0x10;

const KEY1: u32 = 0x4567_0123;
const KEY2: u32 = 0xcdef_89ab;

const SR_BSY: u32 = 0x0001_0000;
/// Clears the programming/erase/write-protect error bits in one write.
const SR_ERROR_CLEAR_MASK: u32 = 0x00f3;

const CR_SER: u32 = 0x0000_0002;
const CR_MER: u32 = 0x0000_0004;
const CR_STRT: u32 = 0x0001_0000;
const CR_LOCK: u32 = 0x8000_0000;

/// Sector boundaries for a 1MB single-bank F4 part (PM0081 table 5): four
/// 16KB, one 64KB, seven 128KB sectors, plus the trailing end-of-flash
/// boundary so the last sector's upper edge is covered by a window too.
const SECTOR_BOUNDARIES: &[u32] = &[
    0x0000_0000,
    0x0000_4000,
    0x0000_8000,
    0x0000_C000,
    0x0001_0000,
    0x0002_0000,
    0x0004_0000,
    0x0006_0000,
    0x0008_0000,
    0x000A_0000,
    0x000C_0000,
    0x000E_0000,
    0x0010_0000,
];

pub fn unlock<T: Transport>(protocol: &mut Protocol<T>) -> Result<(), FlashError> {
    write_reg(protocol, FLASH_KEYR, KEY1)?;
    write_reg(protocol, FLASH_KEYR, KEY2)?;
    write_reg(protocol, FLASH_SR, SR_ERROR_CLEAR_MASK)
}

pub fn lock<T: Transport>(protocol: &mut Protocol<T>) -> Result<(), FlashError> {
    write_reg(protocol, FLASH_CR, CR_LOCK)
}

pub fn erase<T: Transport>(protocol: &mut Protocol<T>, addr: u32) -> Result<(), FlashError> {
    if addr == MASS_ERASE_SENTINEL {
        write_reg(protocol, FLASH_CR, CR_MER)?;
        write_reg(protocol, FLASH_CR, CR_STRT | CR_MER)?;
    } else {
        let sector = sector_for_offset(addr & 0x000F_FFFF);
        let cr_sector_bits = CR_SER | (sector << 3);
        write_reg(protocol, FLASH_CR, cr_sector_bits)?;
        write_reg(protocol, FLASH_CR, cr_sector_bits | CR_STRT)?;
    }

    let status = poll_busy(protocol, FLASH_SR, SR_BSY)?;
    if status & SR_ERROR_CLEAR_MASK != 0 {
        return Err(FlashError::ControllerError { status });
    }
    Ok(())
}

/// Maps a flash-relative offset onto its sector index using the standard
/// 1MB F4 sector table; offsets past the table clamp to the last sector
/// rather than erroring, since mis-sized parts still have *some* sector
/// there.
fn sector_for_offset(offset: u32) -> u32 {
    SECTOR_BOUNDARIES
        .windows(2)
        .position(|pair| offset >= pair[0] && offset < pair[1])
        .unwrap_or(SECTOR_BOUNDARIES.len() - 2) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::FakeTransport;

    #[test]
    fn mass_erase_sets_mer_then_mer_plus_strt() {
        let mut transport = FakeTransport::default();
        transport.push_reply(&0u32.to_le_bytes());
        let mut proto = Protocol::new(transport);

        erase(&mut proto, MASS_ERASE_SENTINEL).unwrap();

        let written = &proto.transport_mut().sent_data;
        assert_eq!(crate::codec::read_u32(&written[0], 0), CR_MER);
        assert_eq!(crate::codec::read_u32(&written[1], 0), CR_STRT | CR_MER);
    }

    #[test]
    fn sector_erase_picks_the_right_sector_for_a_128kb_region() {
        let mut transport = FakeTransport::default();
        transport.push_reply(&0u32.to_le_bytes());
        let mut proto = Protocol::new(transport);

        // 0x0802_0000 is flash-relative offset 0x20000, the start of sector 5.
        erase(&mut proto, 0x0802_0000).unwrap();

        let written = &proto.transport_mut().sent_data;
        let first = crate::codec::read_u32(&written[0], 0);
        assert_eq!(first, CR_SER | (5 << 3));
    }

    #[test]
    fn sector_erase_reaches_the_top_sector() {
        let mut transport = FakeTransport::default();
        transport.push_reply(&0u32.to_le_bytes());
        let mut proto = Protocol::new(transport);

        // 0x080E_0000 is flash-relative offset 0xE0000, the start of sector 11.
        erase(&mut proto, 0x080E_0000).unwrap();

        let written = &proto.transport_mut().sent_data;
        let first = crate::codec::read_u32(&written[0], 0);
        assert_eq!(first, CR_SER | (11 << 3));
    }

    #[test]
    fn error_bits_in_status_surface_as_a_controller_error() {
        let mut transport = FakeTransport::default();
        transport.push_reply(&0x10u32.to_le_bytes());
        let mut proto = Protocol::new(transport);

        let err = erase(&mut proto, 0x0800_0000).unwrap_err();
        assert!(matches!(err, FlashError::ControllerError { .. }));
    }
}
