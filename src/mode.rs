//! Drives the probe from an unknown initial mode into debug/SWD.
//!
//! At open, the probe can be in any of {unknown, DFU, mass-storage, debug,
//! SWIM, bootloader}. If it is already usable (debug or mass-storage) we
//! proceed immediately; otherwise we assume DFU, kick it out, and retry
//! opening up to ten times at one-second intervals, entering SWD and
//! checking core status after each reopen.

use std::thread;
use std::time::Duration;

use crate::error::Error;
use crate::protocol::{status, DeviceMode, Protocol};
use crate::transport::Transport;

/// Number of reopen attempts after a DFU-exit kick.
const REOPEN_ATTEMPTS: u32 = 10;

/// Delay between reopen attempts. Shortened under `cfg(test)` so the
/// DFU-recovery exhaustion test doesn't spend ten real seconds asleep.
#[cfg(not(test))]
const REOPEN_DELAY: Duration = Duration::from_secs(1);
#[cfg(test)]
const REOPEN_DELAY: Duration = Duration::from_millis(1);

/// A factory the mode manager uses to close and reopen the underlying
/// transport during DFU recovery. The core has no opinion on *how* a
/// transport is opened (USB enumeration, a mock, ...) — only that it can be
/// asked to try again.
pub trait TransportFactory<T: Transport> {
    fn open(&mut self) -> Result<T, Error>;
}

/// Ensures the probe wrapped by `protocol` ends up in a usable debug mode,
/// reopening through `factory` via DFU recovery if necessary. Returns the
/// (possibly replaced) `Protocol` on success.
pub fn ensure_debug_mode<T, F>(
    mut protocol: Protocol<T>,
    factory: &mut F,
) -> Result<Protocol<T>, Error>
where
    T: Transport,
    F: TransportFactory<T>,
{
    let mode = protocol.get_current_mode()?;
    if matches!(mode, DeviceMode::Debug | DeviceMode::MassStorage) {
        return Ok(protocol);
    }

    log::warn!("probe mode is {:?}, attempting DFU recovery", mode);
    protocol.exit_dfu()?;
    drop(protocol);

    for attempt in 1..=REOPEN_ATTEMPTS {
        thread::sleep(REOPEN_DELAY);
        match factory.open() {
            Ok(transport) => {
                let mut proto = Protocol::new(transport);
                if proto.enter_swd().is_err() {
                    continue;
                }
                let core_status = proto.get_status().unwrap_or(0);
                log::debug!("reopen attempt {}: status {:#x}", attempt, core_status);
                if core_status == status::CORE_RUNNING || core_status == status::CORE_HALTED {
                    return Ok(proto);
                }
            }
            Err(e) => {
                log::debug!("reopen attempt {} failed: {}", attempt, e);
            }
        }
    }

    Err(Error::ModeRecoveryFailed)
}
