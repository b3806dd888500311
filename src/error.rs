use thiserror::Error;

use crate::flash::FlashError;

/// Errors surfaced by the `stlink` core across transport, protocol, and
/// target-level operations.
///
/// The core never masks an error: every session method returns a typed
/// `Result<_, Error>` and retries (DFU recovery, BSY polling, loader halt
/// polling) live at the level of whichever loop owns them.
#[derive(Error, Debug)]
pub enum Error {
    #[error("USB transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("could not reach a usable probe mode after DFU recovery")]
    ModeRecoveryFailed,

    #[error("memory operation argument error: {0}")]
    InvalidArgument(String),

    #[error("flash operation failed: {0}")]
    Flash(#[from] FlashError),

    #[error("verification failed: block at offset {offset:#x} did not match")]
    VerifyMismatch { offset: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Transport-level failures: USB submission errors, short transfers, or a
/// transfer that exceeded its fixed per-transfer timeout budget.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("USB error: {0}")]
    Usb(String),

    #[error("short transfer: expected {expected} bytes, got {actual}")]
    ShortTransfer { expected: usize, actual: usize },

    #[error("transfer timed out after {0:?}")]
    Timeout(std::time::Duration),
}
