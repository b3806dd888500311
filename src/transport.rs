//! Duplex byte transport to the probe's bulk USB endpoints.
//!
//! The transport knows nothing about command semantics: it moves a command
//! buffer out, then optionally moves a data buffer in the direction the
//! caller declares. Every transfer has the same fixed timeout budget; short
//! or over transfers are reported, never silently retried here.

use std::time::Duration;

use crate::error::TransportError;

/// STMicro's USB vendor ID.
pub const USB_VENDOR_ID: u16 = 0x0483;
/// STLink v1 product ID.
pub const USB_PRODUCT_ID_V1: u16 = 0x3744;
/// STLink v2 product ID — the target of this crate.
pub const USB_PRODUCT_ID_V2: u16 = 0x3748;

/// The probe's sole USB configuration.
pub const USB_CONFIGURATION: u8 = 1;
/// Bulk OUT endpoint: commands and write-data.
pub const USB_ENDPOINT_OUT: u8 = 0x02;
/// Bulk IN endpoint: read-data.
pub const USB_ENDPOINT_IN: u8 = 0x81;

/// Fixed per-transfer timeout. Almost every command finishes in
/// milliseconds; a handful (erase, loader runs) take up to ~250ms.
pub const TRANSFER_TIMEOUT: Duration = Duration::from_millis(800);

/// Declares which direction a command's data phase moves, mirroring the
/// probe's own to-device/from-device command encoding.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Direction {
    ToDevice,
    FromDevice,
}

/// A duplex byte channel to the probe.
///
/// Implementations own the concrete USB (or simulated) backend; the rest of
/// the crate only ever talks to this trait, so the choice of USB library
/// never leaks into the protocol/session layers above it.
pub trait Transport {
    /// Sends `len` bytes of `cmd` on the command (OUT) channel, returning
    /// the number of bytes actually transferred.
    fn send_command(&mut self, cmd: &[u8], len: usize) -> Result<usize, TransportError>;

    /// Sends `len` bytes of `buf` on the OUT channel as a command's
    /// to-device data phase.
    fn send_data(&mut self, buf: &[u8], len: usize) -> Result<usize, TransportError>;

    /// Reads up to `len` bytes into `buf` on the IN channel as a command's
    /// from-device data phase.
    fn recv_data(&mut self, buf: &mut [u8], len: usize) -> Result<usize, TransportError>;
}

/// Checks an actual transfer length against the requested one, turning a
/// short/over transfer into a typed error the way the original tool's
/// verbose-mode "Mismatched USB transfer" messages flagged it, but as a
/// hard error instead of a warning.
pub fn check_transfer_len(expected: usize, actual: usize) -> Result<(), TransportError> {
    if expected != actual {
        return Err(TransportError::ShortTransfer { expected, actual });
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_transfer_is_an_error() {
        assert!(check_transfer_len(4, 4).is_ok());
        assert!(matches!(
            check_transfer_len(4, 2),
            Err(TransportError::ShortTransfer {
                expected: 4,
                actual: 2
            })
        ));
    }
}
