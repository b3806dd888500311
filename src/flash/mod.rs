//! Per-family flash controller drivers.
//!
//! Each family (F1, F4, L1) unlocks its controller differently and erases
//! differently, but presents the same small surface to the rest of the
//! crate: unlock, erase one page/sector or the whole chip, and lock.
//! Dispatch between families is a static match on a tagged enum, not a
//! trait object — there are exactly three shapes and they're known as
//! soon as a target is identified.

mod f1;
mod f4;
mod l1;

use thiserror::Error;

use crate::identify::{Capability, Personality};
use crate::protocol::Protocol;
use crate::transport::Transport;

/// The address passed to [`FlashFamily::erase`] to request a full-chip
/// mass erase, matching the reference tool's `0xa11` sentinel so a CLI
/// user typing `erase=all` maps onto the same value as the bare `erase`
/// command.
pub const MASS_ERASE_SENTINEL: u32 = 0xa11;

/// Iteration cap while polling a flash controller's busy bit. Erases
/// normally clear in well under this many reads; it exists purely so a
/// wedged controller fails loudly instead of hanging the CLI.
pub const ERASE_POLL_LIMIT: u32 = 1000;

#[derive(Error, Debug)]
pub enum FlashError {
    #[error("flash busy bit did not clear after {0} polls")]
    Timeout(u32),

    #[error("flash controller reported an error: status {status:#06x}")]
    ControllerError { status: u32 },
}

/// Status-register bits shared across the F1/L1 controller generation
/// (PM0075 table 3.5).
pub mod sr_bits {
    pub const BSY: u32 = 0x0001;
    pub const PGERR: u32 = 0x0004;
    pub const WRPRTERR: u32 = 0x0010;
    pub const EOP: u32 = 0x0020;
}

/// A family's flash controller, selected once at identification time from
/// a personality's capability flags.
#[derive(Debug, Clone, Copy)]
pub enum FlashFamily {
    F1 { flash_size: u32 },
    F4,
    L1,
}

impl FlashFamily {
    /// Picks the controller family from a personality's capability bits.
    pub fn for_personality(personality: &Personality) -> FlashFamily {
        if personality.caps.contains(Capability::F4_FLASH) {
            FlashFamily::F4
        } else if personality.caps.contains(Capability::L1_FLASH) {
            FlashFamily::L1
        } else {
            FlashFamily::F1 {
                flash_size: personality.flash_size,
            }
        }
    }

    /// Unlocks the controller for programming and erasing.
    pub fn unlock<T: Transport>(&self, protocol: &mut Protocol<T>) -> Result<(), FlashError> {
        match self {
            FlashFamily::F1 { .. } => f1::unlock(protocol),
            FlashFamily::F4 => f4::unlock(protocol),
            FlashFamily::L1 => l1::unlock(protocol),
        }
    }

    /// Re-locks the controller once a programming session is done.
    pub fn lock<T: Transport>(&self, protocol: &mut Protocol<T>) -> Result<(), FlashError> {
        match self {
            FlashFamily::F1 { .. } => f1::lock(protocol),
            FlashFamily::F4 => f4::lock(protocol),
            FlashFamily::L1 => l1::lock(protocol),
        }
    }

    /// Erases the page/sector containing `addr`, or the whole chip when
    /// `addr == MASS_ERASE_SENTINEL`.
    pub fn erase<T: Transport>(
        &self,
        protocol: &mut Protocol<T>,
        addr: u32,
    ) -> Result<(), FlashError> {
        match self {
            FlashFamily::F1 { .. } => f1::erase(protocol, addr),
            FlashFamily::F4 => f4::erase(protocol, addr),
            FlashFamily::L1 => l1::erase(protocol, addr),
        }
    }

    /// The flash-controller base address the loader's downloaded stub
    /// writes through, which for F1 parts with >256KB of flash shifts to
    /// the second bank's registers above the high-density boundary.
    pub fn ctrl_base(&self, flash_addr: u32) -> u32 {
        match self {
            FlashFamily::F1 { flash_size } => f1::ctrl_base(*flash_size, flash_addr),
            FlashFamily::F4 => f4::FLASH_REGS_BASE,
            FlashFamily::L1 => l1::FLASH_REGS_BASE,
        }
    }
}

/// Reads one 32-bit register, folding a transport error into a flash one
/// as "controller unreachable" rather than bubbling the transport type
/// through every erase/unlock call site.
pub(crate) fn read_reg<T: Transport>(
    protocol: &mut Protocol<T>,
    addr: u32,
) -> Result<u32, FlashError> {
    let buf = protocol
        .read_mem_32(addr, 4)
        .map_err(|_| FlashError::ControllerError { status: 0 })?;
    Ok(crate::codec::read_u32(&buf, 0))
}

pub(crate) fn write_reg<T: Transport>(
    protocol: &mut Protocol<T>,
    addr: u32,
    value: u32,
) -> Result<(), FlashError> {
    crate::memory::write_word(protocol, addr, value)
        .map_err(|_| FlashError::ControllerError { status: 0 })
}

/// Polls `sr_addr` until its busy bit clears or [`ERASE_POLL_LIMIT`] reads
/// elapse. Returns the last-read status word.
pub(crate) fn poll_busy<T: Transport>(
    protocol: &mut Protocol<T>,
    sr_addr: u32,
    busy_bit: u32,
) -> Result<u32, FlashError> {
    let mut status = 0;
    for _ in 0..ERASE_POLL_LIMIT {
        status = read_reg(protocol, sr_addr).unwrap_or(0);
        if status & busy_bit == 0 {
            return Ok(status);
        }
    }
    Err(FlashError::Timeout(ERASE_POLL_LIMIT))
}
