//! Aligned, chunked target memory access.
//!
//! The probe's own `READ_MEM_32BIT`/`WRITE_MEM_32BIT` commands require
//! 4-aligned addresses and lengths, and cap a single transfer well below a
//! full address range. This service does the alignment fix-up and the
//! chunking so callers (identification, flash drivers, the loader) can
//! pass arbitrary ranges.

use crate::error::TransportError;
use crate::protocol::Protocol;
use crate::transport::Transport;

/// Largest single transfer the probe's data buffer comfortably carries.
const MAX_BLOCK: usize = 1024;

/// Reads `len` bytes starting at `addr`, which need not be aligned: an
/// unaligned head or tail is covered by reading one extra aligned word and
/// trimming it, the way the reference tool pads the final unaligned tail
/// access instead of ever rejecting it.
pub fn read<T: Transport>(
    protocol: &mut Protocol<T>,
    addr: u32,
    len: usize,
) -> Result<Vec<u8>, TransportError> {
    if len == 0 {
        return Ok(Vec::new());
    }

    let head_pad = (addr % 4) as usize;
    let aligned_addr = addr - head_pad as u32;
    let aligned_len = {
        let total = head_pad + len;
        (total + 3) & !3
    };

    let mut aligned = Vec::with_capacity(aligned_len);
    let mut cursor = aligned_addr;
    let mut remaining = aligned_len;
    while remaining > 0 {
        let chunk_len = remaining.min(MAX_BLOCK);
        let chunk = protocol.read_mem_32(cursor, chunk_len as u16)?;
        aligned.extend_from_slice(&chunk);
        cursor += chunk_len as u32;
        remaining -= chunk_len;
    }

    Ok(aligned[head_pad..head_pad + len].to_vec())
}

/// Writes `buf` to `addr`, dispatching each chunk to the 32-bit or 8-bit
/// write command. A chunk whose length is a multiple of 4 goes through the
/// fast word path; anything else must be under 64 bytes, matching the
/// probe's own 8-bit-write size ceiling.
pub fn write<T: Transport>(
    protocol: &mut Protocol<T>,
    addr: u32,
    buf: &[u8],
) -> Result<(), TransportError> {
    let mut cursor = addr;
    let mut offset = 0;
    while offset < buf.len() {
        let remaining = buf.len() - offset;
        let chunk_len = if remaining % 4 == 0 {
            remaining.min(MAX_BLOCK)
        } else {
            remaining.min(63)
        };
        protocol.write_mem(cursor, &buf[offset..offset + chunk_len])?;
        cursor += chunk_len as u32;
        offset += chunk_len;
    }
    Ok(())
}

/// Writes a single aligned 32-bit word — the primitive the loader uses to
/// seed its parameter block and to set the program counter.
pub fn write_word<T: Transport>(
    protocol: &mut Protocol<T>,
    addr: u32,
    value: u32,
) -> Result<(), TransportError> {
    let mut buf = [0u8; 4];
    crate::codec::write_u32(&mut buf, 0, value);
    protocol.write_mem(addr, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::FakeTransport;

    #[test]
    fn aligned_read_passes_through_unchanged() {
        let mut transport = FakeTransport::default();
        transport.push_reply(&[1, 2, 3, 4]);
        let mut proto = Protocol::new(transport);

        let data = read(&mut proto, 0x2000_0000, 4).unwrap();
        assert_eq!(data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn unaligned_read_trims_the_head_pad() {
        let mut transport = FakeTransport::default();
        // aligned_addr = 0x2000_0000, aligned_len = 8 (head_pad=2, len=3 -> 5 -> rounds to 8)
        transport.push_reply(&[0xaa, 0xaa, 1, 2, 3, 0xaa, 0xaa, 0xaa]);
        let mut proto = Protocol::new(transport);

        let data = read(&mut proto, 0x2000_0002, 3).unwrap();
        assert_eq!(data, vec![1, 2, 3]);
    }

    #[test]
    fn write_splits_non_word_multiples_into_an_8bit_chunk() {
        let transport = FakeTransport::default();
        let mut proto = Protocol::new(transport);

        write(&mut proto, 0x2000_0000, &[0u8; 5]).unwrap();
        // 5 is not a multiple of 4, so it all goes through the 8-bit path
        // in a single sub-64-byte chunk.
        assert_eq!(proto.transport_mut().sent_data.len(), 1);
        assert_eq!(proto.transport_mut().sent_data[0].len(), 5);
    }

    #[test]
    fn write_word_sends_four_bytes_little_endian() {
        let transport = FakeTransport::default();
        let mut proto = Protocol::new(transport);

        write_word(&mut proto, 0x2000_0000, 0x0102_0304).unwrap();
        assert_eq!(
            proto.transport_mut().sent_data[0],
            vec![0x04, 0x03, 0x02, 0x01]
        );
    }
}
