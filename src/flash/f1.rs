//! STM32F1 flash controller (PM0075): a single `FLASH_KEYR` unlock and a
//! `FLASH_CR`/`FLASH_SR` pair shared with STM32F3 and the generic
//! fallback personality.

use crate::protocol::Protocol;
use crate::transport::Transport;

use super::{poll_busy, sr_bits, write_reg, FlashError, MASS_ERASE_SENTINEL};

pub const FLASH_REGS_BASE: u32 = 0x4002_2000;
const FLASH_KEYR: u32 = FLASH_REGS_BASE + 0x04;
const FLASH_SR: u32 = FLASH_REGS_BASE + 0x0c;
const FLASH_CR: u32 = FLASH_REGS_BASE + 0x10;
const FLASH_AR: u32 = FLASH_REGS_BASE + 0x14;

const KEY1: u32 = 0x4567_0123;
const KEY2: u32 = 0xcdef_89ab;

const CR_PER: u32 = 0x0002;
const CR_MER: u32 = 0x0004;
const CR_STRT: u32 = 0x0040;
const CR_LOCK: u32 = 0x0080;

/// Second flash bank's controller base, used above the high-density
/// boundary on parts with more than 256KB of flash (PM0075 connectivity
/// line note).
const BANK2_REGS_BASE: u32 = 0x4002_2040;
const HIGH_DENSITY_THRESHOLD: u32 = 256 * 1024;
const BANK2_ADDR_THRESHOLD: u32 = 0x0808_0000;

pub fn unlock<T: Transport>(protocol: &mut Protocol<T>) -> Result<(), FlashError> {
    write_reg(protocol, FLASH_KEYR, KEY1)?;
    write_reg(protocol, FLASH_KEYR, KEY2)?;
    write_reg(protocol, FLASH_SR, sr_bits::EOP | sr_bits::WRPRTERR | sr_bits::PGERR)
}

pub fn lock<T: Transport>(protocol: &mut Protocol<T>) -> Result<(), FlashError> {
    write_reg(protocol, FLASH_CR, CR_LOCK)
}

pub fn erase<T: Transport>(protocol: &mut Protocol<T>, addr: u32) -> Result<(), FlashError> {
    if addr == MASS_ERASE_SENTINEL {
        write_reg(protocol, FLASH_CR, CR_MER)?;
        write_reg(protocol, FLASH_CR, CR_STRT | CR_MER)?;
    } else {
        write_reg(protocol, FLASH_AR, addr)?;
        write_reg(protocol, FLASH_CR, CR_PER)?;
        write_reg(protocol, FLASH_CR, CR_STRT | CR_PER)?;
    }

    let status = poll_busy(protocol, FLASH_SR, sr_bits::BSY)?;
    if status & sr_bits::EOP == 0 {
        return Err(FlashError::ControllerError { status });
    }
    Ok(())
}

/// Picks between the primary and second-bank flash register base. Only
/// relevant on connectivity-line/XL-density parts with more than 256KB;
/// everything else always uses the primary base.
pub fn ctrl_base(flash_size: u32, flash_addr: u32) -> u32 {
    if flash_size > HIGH_DENSITY_THRESHOLD && flash_addr >= BANK2_ADDR_THRESHOLD {
        BANK2_REGS_BASE
    } else {
        FLASH_REGS_BASE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::FakeTransport;

    #[test]
    fn mass_erase_sets_mer_then_mer_plus_strt() {
        let mut transport = FakeTransport::default();
        transport.push_reply(&sr_bits::EOP.to_le_bytes());
        let mut proto = Protocol::new(transport);

        erase(&mut proto, MASS_ERASE_SENTINEL).unwrap();

        let written = &proto.transport_mut().sent_data;
        assert_eq!(crate::codec::read_u32(&written[0], 0), CR_MER);
        assert_eq!(crate::codec::read_u32(&written[1], 0), CR_STRT | CR_MER);
    }

    #[test]
    fn page_erase_writes_address_then_per_then_strt() {
        let mut transport = FakeTransport::default();
        transport.push_reply(&sr_bits::EOP.to_le_bytes());
        let mut proto = Protocol::new(transport);

        erase(&mut proto, 0x0800_1000).unwrap();

        let written = &proto.transport_mut().sent_data;
        assert_eq!(crate::codec::read_u32(&written[0], 0), 0x0800_1000);
        assert_eq!(crate::codec::read_u32(&written[1], 0), CR_PER);
        assert_eq!(crate::codec::read_u32(&written[2], 0), CR_STRT | CR_PER);
    }

    #[test]
    fn erase_without_eop_is_an_error() {
        let mut transport = FakeTransport::default();
        transport.push_reply(&sr_bits::WRPRTERR.to_le_bytes());
        let mut proto = Protocol::new(transport);

        let err = erase(&mut proto, 0x0800_1000).unwrap_err();
        assert!(matches!(err, FlashError::ControllerError { .. }));
    }

    #[test]
    fn second_bank_base_only_applies_above_the_density_threshold() {
        assert_eq!(ctrl_base(64 * 1024, 0x0808_0000), FLASH_REGS_BASE);
        assert_eq!(ctrl_base(1024 * 1024, 0x0801_0000), FLASH_REGS_BASE);
        assert_eq!(ctrl_base(1024 * 1024, 0x0808_0000), BANK2_REGS_BASE);
    }
}
