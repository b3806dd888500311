//! File-driven operations: programming flash from a file, verifying flash
//! against a file, and dumping a memory range to a file.
//!
//! Every operation streams through fixed-size blocks rather than loading
//! an entire image into memory twice, and verification stops at the
//! first mismatching block instead of scanning the whole range, so a
//! user programming a large image gets a fast fail close to the actual
//! bad offset.

use std::fs::File;
use std::io::{Read as IoRead, Write as IoWrite};
use std::path::Path;

use crate::error::Error;
use crate::identify::Personality;
use crate::protocol::Protocol;
use crate::transport::Transport;
use crate::{loader, memory};

/// Block size used when streaming a file against target memory. Matches
/// the memory service's own transfer ceiling so neither side does
/// needless buffering.
const STREAM_BLOCK: usize = 1024;

/// Reads the whole file into memory and writes it to `flash_addr` through
/// the loader. Files are expected to be small enough (a few hundred KB at
/// most) that this isn't a concern in practice.
pub fn program<T: Transport>(
    protocol: &mut Protocol<T>,
    personality: &Personality,
    flash_addr: u32,
    path: &Path,
) -> Result<usize, Error> {
    let mut file = File::open(path)?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)?;

    loader::write(protocol, personality, flash_addr, &data)?;
    Ok(data.len())
}

/// Streams `path` against the bytes actually in flash starting at
/// `flash_addr`, block by block, returning `Ok(())` only if every byte
/// matched. Fails on the first differing block rather than reading the
/// whole range when a mismatch is already known.
pub fn verify<T: Transport>(
    protocol: &mut Protocol<T>,
    flash_addr: u32,
    path: &Path,
) -> Result<(), Error> {
    let mut file = File::open(path)?;
    let mut buf = vec![0u8; STREAM_BLOCK];
    let mut offset: u64 = 0;

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }

        let on_target = memory::read(protocol, flash_addr + offset as u32, n)?;
        if on_target != buf[..n] {
            return Err(Error::VerifyMismatch { offset });
        }
        offset += n as u64;
    }

    Ok(())
}

/// Reads `len` bytes from `addr` and writes them verbatim to `path`.
pub fn dump<T: Transport>(
    protocol: &mut Protocol<T>,
    addr: u32,
    len: usize,
    path: &Path,
) -> Result<(), Error> {
    let mut file = File::create(path)?;
    let mut remaining = len;
    let mut cursor = addr;

    while remaining > 0 {
        let chunk_len = remaining.min(STREAM_BLOCK);
        let chunk = memory::read(protocol, cursor, chunk_len)?;
        file.write_all(&chunk)?;
        cursor += chunk_len as u32;
        remaining -= chunk_len;
    }

    Ok(())
}

/// GPIOC pin used by the discovery-board blink demo.
const GPIOC_BASE: u32 = 0x4001_1000;
const GPIOC_ODR_OFFSET: u32 = 0x0c;
const GPIOC_BLINK_PIN: u32 = 13;

/// Toggles the discovery board's user LED a fixed number of times by
/// directly poking `GPIOC_ODR`, as a quick "is SWD actually working"
/// smoke test rather than anything flash-related.
pub fn blink<T: Transport>(protocol: &mut Protocol<T>, cycles: u32) -> Result<(), Error> {
    let odr_addr = GPIOC_BASE + GPIOC_ODR_OFFSET;
    for _ in 0..cycles {
        let mut odr = memory::read(protocol, odr_addr, 4)?;
        let mut value = crate::codec::read_u32(&odr, 0);
        value ^= 1 << GPIOC_BLINK_PIN;
        crate::codec::write_u32(&mut odr, 0, value);
        memory::write(protocol, odr_addr, &odr)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::FakeTransport;
    use std::io::Write as _;

    #[test]
    fn verify_passes_when_target_matches_file() {
        let mut transport = FakeTransport::default();
        transport.push_reply(&[1, 2, 3, 4]);
        let mut proto = Protocol::new(transport);

        let mut f = tempfile_with(&[1, 2, 3, 4]);
        let result = verify(&mut proto, 0x0800_0000, f.path());
        f.close();
        assert!(result.is_ok());
    }

    #[test]
    fn verify_fails_on_first_mismatching_block() {
        let mut transport = FakeTransport::default();
        transport.push_reply(&[1, 2, 3, 9]);
        let mut proto = Protocol::new(transport);

        let mut f = tempfile_with(&[1, 2, 3, 4]);
        let result = verify(&mut proto, 0x0800_0000, f.path());
        f.close();
        assert!(matches!(result, Err(Error::VerifyMismatch { offset: 0 })));
    }

    /// A minimal scratch-file helper so tests don't need a `tempfile`
    /// dependency: writes `contents` to a process-unique path under the
    /// OS temp directory and cleans it up explicitly.
    struct ScratchFile {
        path: std::path::PathBuf,
    }

    impl ScratchFile {
        fn path(&self) -> &Path {
            &self.path
        }

        fn close(self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    fn tempfile_with(contents: &[u8]) -> ScratchFile {
        use std::sync::atomic::{AtomicU32, Ordering};
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let id = COUNTER.fetch_add(1, Ordering::Relaxed);

        let mut path = std::env::temp_dir();
        path.push(format!("stlink-cli-test-{}-{}", std::process::id(), id));
        let mut f = File::create(&path).unwrap();
        f.write_all(contents).unwrap();
        ScratchFile { path }
    }
}
