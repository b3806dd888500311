//! The loader-based flash writer.
//!
//! The probe cannot itself generate the half-word memory cycle flash
//! programming needs, so every write downloads a tiny ARM Thumb stub into
//! target SRAM, appends a fixed parameter block and the payload chunk
//! right after it, and runs the whole thing as a single SRAM write
//! followed by a PC-set and a run. The stub polls its own busy bit and
//! halts itself with a `bkpt`; the host only has to poll for halted core
//! status and then read back the final flash status word the stub left
//! in R3.
//!
//! Two stub variants exist, selected by family exactly like the flash
//! controller driver: the F4 stub checks a different status-bit mask than
//! the F1 stub. There is no separate L1 stub — the reference tool this
//! was modeled on never grew one either, so loader-based writes on L1
//! parts reuse the F1 stub and its (wrong, for L1) register layout. Single
//! aligned word writes bypass the loader entirely and go straight through
//! [`crate::memory::write_word`].

use crate::error::Error;
use crate::flash::FlashFamily;
use crate::identify::Personality;
use crate::protocol::{status, Protocol};
use crate::transport::Transport;

/// Largest payload chunk assembled into one loader transfer.
pub const CHUNK_SIZE: usize = 2048;

/// SRAM address every stub is downloaded to and run from. Some targets
/// have as little as 4KB of SRAM; the stub plus a 2KB chunk comfortably
/// fits within that.
const LOADER_SRAM_BASE: u32 = 0x2000_0000;

/// Iteration cap while polling for the stub to halt itself.
const HALT_POLL_LIMIT: u32 = 200;

/// R3 holds the final flash status word when the stub halts.
const STATUS_REGISTER_INDEX: u8 = 3;

/// F1/L1-path stub: checks `FLASH_SR` bits `WRPRTERR|PGERR` (`0x14`).
#[rustfmt::skip]
const F1_STUB: &[u16] = &[
    0x480B, 0x490C, 0x4A0C, 0x4c09, 0x2501, 0x6125,
    0xf830, 0x3b02, 0xf821, 0x3b02,
    0x3501, 0x68e3, 0xf013, 0x0f01, 0xd1fa,
    0xf013, 0x0f14, 0xd102,
    0x3a01, 0xd1f1,
    0x6122, 0xbe00,
    // trailing parameter placeholders, overwritten before download
    0x2000, 0x4002, 0x0040, 0x2000, 0x0bd0, 0x0800, 0x0006, 0x0000,
];

/// F4-path stub: identical shape, but checks `FLASH_SR` bits `0xF0`
/// (the F4 PG/PGSERR/PGPERR/PGAERR cluster) instead of `0x14`.
#[rustfmt::skip]
const F4_STUB: &[u16] = &[
    0x480B, 0x490C, 0x4A0C, 0x4c09, 0x2501, 0x6125,
    0xf830, 0x3b02, 0xf821, 0x3b02,
    0x3501, 0x68e3, 0xf013, 0x0f01, 0xd1fa,
    0xf013, 0x0ff0, 0xd102,
    0x3a01, 0xd1f1,
    0x6122, 0xbe00,
    0x2000, 0x4002, 0x0040, 0x2000, 0x0bd0, 0x0800, 0x0006, 0x0000,
];

/// The status-bit mask the loader leaves error bits in, per family — used
/// only to interpret the R3 readback, not to drive the stub itself.
const F1_ERROR_MASK: u32 = crate::flash::sr_bits::WRPRTERR | crate::flash::sr_bits::PGERR;
const F4_ERROR_MASK: u32 = 0x00f0;

fn stub_for(family: FlashFamily) -> &'static [u16] {
    match family {
        FlashFamily::F4 => F4_STUB,
        FlashFamily::F1 { .. } | FlashFamily::L1 => F1_STUB,
    }
}

fn error_mask_for(family: FlashFamily) -> u32 {
    match family {
        FlashFamily::F4 => F4_ERROR_MASK,
        FlashFamily::F1 { .. } | FlashFamily::L1 => F1_ERROR_MASK,
    }
}

fn stub_to_bytes(stub: &[u16]) -> Vec<u8> {
    let mut bytes = vec![0u8; stub.len() * 2];
    for (i, word) in stub.iter().enumerate() {
        crate::codec::write_u16(&mut bytes, i * 2, *word);
    }
    bytes
}

/// Assembles one loader transfer: the stub with its trailing parameter
/// words overwritten, followed by `chunk`. `ctrl_base` is the flash
/// controller base address the stub's hard-coded `FLASH_CR`/`FLASH_SR`
/// offsets are computed against.
fn assemble_image(stub: &[u16], ctrl_base: u32, dst_addr: u32, chunk: &[u8]) -> Vec<u8> {
    let mut image = stub_to_bytes(stub);
    let program_len = image.len();
    let param_block_offset = program_len - 16;
    let src_addr = LOADER_SRAM_BASE + program_len as u32;
    let hword_count = (chunk.len() / 2) as u32;

    crate::codec::write_u32(&mut image, param_block_offset, ctrl_base);
    crate::codec::write_u32(&mut image, param_block_offset + 4, src_addr);
    crate::codec::write_u32(&mut image, param_block_offset + 8, dst_addr);
    crate::codec::write_u32(&mut image, param_block_offset + 12, hword_count);

    image.extend_from_slice(chunk);
    image
}

/// Downloads and runs one stub transfer, then polls for the core to halt
/// and reads back the final flash status from R3.
fn run_chunk<T: Transport>(
    protocol: &mut Protocol<T>,
    family: FlashFamily,
    dst_addr: u32,
    chunk: &[u8],
) -> Result<(), Error> {
    let stub = stub_for(family);
    let ctrl_base = family.ctrl_base(dst_addr);
    let image = assemble_image(stub, ctrl_base, dst_addr, chunk);

    protocol.write_mem(LOADER_SRAM_BASE, &image)?;
    protocol.write_reg(15, LOADER_SRAM_BASE)?;
    protocol.run_core()?;

    let mut halted = false;
    for _ in 0..HALT_POLL_LIMIT {
        if protocol.get_status()? == status::CORE_HALTED {
            halted = true;
            break;
        }
    }
    if !halted {
        return Err(Error::Flash(crate::flash::FlashError::Timeout(HALT_POLL_LIMIT)));
    }

    let final_status = protocol.read_one_reg(STATUS_REGISTER_INDEX)?;
    if final_status & error_mask_for(family) != 0 {
        return Err(Error::Flash(crate::flash::FlashError::ControllerError {
            status: final_status,
        }));
    }

    Ok(())
}

/// Writes `data` to `flash_addr`, unlocking the controller, chunking at
/// [`CHUNK_SIZE`], running the loader stub per chunk, and re-locking when
/// done regardless of whether a chunk failed partway through.
pub fn write<T: Transport>(
    protocol: &mut Protocol<T>,
    personality: &Personality,
    flash_addr: u32,
    data: &[u8],
) -> Result<(), Error> {
    let family = FlashFamily::for_personality(personality);
    family.unlock(protocol)?;

    let result = (|| -> Result<(), Error> {
        for (i, chunk) in data.chunks(CHUNK_SIZE).enumerate() {
            let addr = flash_addr + (i * CHUNK_SIZE) as u32;
            run_chunk(protocol, family, addr, chunk)?;
        }
        Ok(())
    })();

    if let Err(e) = family.lock(protocol) {
        log::warn!("failed to re-lock flash controller after programming: {}", e);
    }
    result
}
