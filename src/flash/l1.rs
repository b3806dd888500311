//! STM32L1 flash controller (RM0038): a two-stage unlock through
//! `PEKEYR`/`PRGKEYR` into `PECR`, then a program-erase cycle triggered by
//! a single word write rather than F1/F4's `CR_STRT` pulse.
//!
//! The reference tool's L1 erase path has a copy-paste bug: its
//! non-mass-erase branch pokes the F4 controller's `FLASH_CR` instead of
//! `L15_FLASH_PECR`, so on real L1 silicon it silently does nothing. This
//! driver erases through PECR as RM0038 specifies.

use crate::protocol::Protocol;
use crate::transport::Transport;

use super::{poll_busy, write_reg, FlashError, MASS_ERASE_SENTINEL};

pub const FLASH_REGS_BASE: u32 = 0x4002_3C00;
const FLASH_PECR: u32 = FLASH_REGS_BASE + 0x04;
const FLASH_PEKEYR: u32 = FLASH_REGS_BASE + 0x0c;
const FLASH_PRGKEYR: u32 = FLASH_REGS_BASE + 0x10;
const FLASH_SR: u32 = FLASH_REGS_BASE + 0x18;
const FLASH_OBR: u32 = FLASH_REGS_BASE + 0x1c;

const PEKEY1: u32 = 0x89ab_cdef;
const PEKEY2: u32 = 0x0203_0405;
const PRGKEY1: u32 = 0x8c9d_aebf;
const PRGKEY2: u32 = 0x1314_1516;

const PECR_PELOCK: u32 = 1 << 0;
const PECR_PRGLOCK: u32 = 1 << 1;
const PECR_PROG: u32 = 1 << 3;
const PECR_ERASE: u32 = 1 << 9;

const SR_BSY: u32 = 1 << 0;
const SR_EOP: u32 = 1 << 1;
const SR_WRPERR: u32 = 1 << 8;

pub fn unlock<T: Transport>(protocol: &mut Protocol<T>) -> Result<(), FlashError> {
    write_reg(protocol, FLASH_PEKEYR, PEKEY1)?;
    write_reg(protocol, FLASH_PEKEYR, PEKEY2)?;
    write_reg(protocol, FLASH_PRGKEYR, PRGKEY1)?;
    write_reg(protocol, FLASH_PRGKEYR, PRGKEY2)
}

pub fn lock<T: Transport>(protocol: &mut Protocol<T>) -> Result<(), FlashError> {
    write_reg(protocol, FLASH_PECR, PECR_PELOCK | PECR_PRGLOCK)
}

pub fn erase<T: Transport>(protocol: &mut Protocol<T>, addr: u32) -> Result<(), FlashError> {
    if addr == MASS_ERASE_SENTINEL {
        // L1 has no dedicated mass-erase command; dropping read
        // protection to level 0 erases all of flash as a side effect
        // (RM0038 "Readout protection"), which is what this toggle does.
        write_reg(protocol, FLASH_OBR, 0x01)?;
        write_reg(protocol, FLASH_OBR, 0xAA)?;
    } else {
        write_reg(protocol, FLASH_PECR, PECR_PROG | PECR_ERASE)?;
        write_reg(protocol, addr, 0)?;
    }

    let status = poll_busy(protocol, FLASH_SR, SR_BSY)?;
    write_reg(protocol, FLASH_PECR, 0)?;
    if status & SR_WRPERR != 0 || (addr != MASS_ERASE_SENTINEL && status & SR_EOP == 0) {
        return Err(FlashError::ControllerError { status });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::FakeTransport;

    #[test]
    fn unlock_writes_both_key_pairs_in_order() {
        let transport = FakeTransport::default();
        let mut proto = Protocol::new(transport);

        unlock(&mut proto).unwrap();

        let written = &proto.transport_mut().sent_data;
        assert_eq!(crate::codec::read_u32(&written[0], 0), PEKEY1);
        assert_eq!(crate::codec::read_u32(&written[1], 0), PEKEY2);
        assert_eq!(crate::codec::read_u32(&written[2], 0), PRGKEY1);
        assert_eq!(crate::codec::read_u32(&written[3], 0), PRGKEY2);
    }

    #[test]
    fn page_erase_sets_pecr_prog_and_erase_before_triggering() {
        let mut transport = FakeTransport::default();
        transport.push_reply(&SR_EOP.to_le_bytes());
        let mut proto = Protocol::new(transport);

        erase(&mut proto, 0x0800_2000).unwrap();

        let written = &proto.transport_mut().sent_data;
        assert_eq!(crate::codec::read_u32(&written[0], 0), PECR_PROG | PECR_ERASE);
        assert_eq!(crate::codec::read_u32(&written[1], 0), 0);
        // relock/clear write happens after polling
        assert_eq!(crate::codec::read_u32(written.last().unwrap(), 0), 0);
    }

    #[test]
    fn write_protect_error_surfaces_as_controller_error() {
        let mut transport = FakeTransport::default();
        transport.push_reply(&(SR_WRPERR | SR_EOP).to_le_bytes());
        let mut proto = Protocol::new(transport);

        let err = erase(&mut proto, 0x0800_2000).unwrap_err();
        assert!(matches!(err, FlashError::ControllerError { .. }));
    }
}
