//! Probe command framing and reply decoding.
//!
//! Builds fixed-size command buffers where byte 0 is the top-level opcode
//! and byte 1 the sub-opcode, dispatches them through a [`Transport`], and
//! decodes the probe's short status replies. This layer knows the wire
//! format; it does not know what a "flash write" or a "personality" is.

use crate::codec;
use crate::error::TransportError;
use crate::transport::{Direction, Transport};

/// Command buffer size. 10 bytes is enough for every known command.
const CMD_BUF_LEN: usize = 10;
/// Data buffer size: ~6KB plus slack, matching the probe's own RAM limit.
pub const DATA_BUF_LEN: usize = 6 * 1024 + 4;

/// Top-level opcodes (command buffer byte 0).
mod opcode {
    pub const GET_VERSION: u8 = 0xF1;
    pub const DEBUG_COMMAND: u8 = 0xF2;
    pub const DFU_COMMAND: u8 = 0xF3;
    pub const GET_CURRENT_MODE: u8 = 0xF5;
}

/// Debug sub-opcodes (command buffer byte 1, following `DEBUG_COMMAND`).
pub mod debug_cmd {
    pub const ENTER_MODE: u8 = 0x20;
    pub const EXIT: u8 = 0x21;
    pub const READ_CORE_ID: u8 = 0x22;
    pub const GET_STATUS: u8 = 0x01;
    pub const FORCE_DEBUG: u8 = 0x02;
    pub const RESET_SYS: u8 = 0x03;
    pub const READ_ALL_REGS: u8 = 0x04;
    pub const READ_ONE_REG: u8 = 0x05;
    pub const WRITE_REG: u8 = 0x06;
    pub const READ_MEM_32BIT: u8 = 0x07;
    pub const WRITE_MEM_32BIT: u8 = 0x08;
    pub const RUN_CORE: u8 = 0x09;
    pub const STEP_CORE: u8 = 0x0A;
    pub const SET_FP: u8 = 0x0B;
    pub const WRITE_MEM_8BIT: u8 = 0x0D;
    pub const CLEAR_FP: u8 = 0x0E;
}

/// Mode sub-sub-commands for `ENTER_MODE`.
pub mod enter_mode {
    pub const SWD: u8 = 0xA3;
    pub const JTAG: u8 = 0x00;
}

const DFU_EXIT: u8 = 0x07;

/// Status byte values returned by most debug commands.
pub mod status {
    pub const OK: u16 = 0x80;
    pub const FALSE: u16 = 0x81;
    pub const CORE_RUNNING: u16 = 0x80;
    pub const CORE_HALTED: u16 = 0x81;
}

/// Probe device modes as reported by `GET_CURRENT_MODE`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DeviceMode {
    Dfu,
    MassStorage,
    Debug,
    Swim,
    Bootloader,
    Unknown(u16),
}

impl From<u16> for DeviceMode {
    fn from(v: u16) -> Self {
        match v {
            0 => DeviceMode::Dfu,
            1 => DeviceMode::MassStorage,
            2 => DeviceMode::Debug,
            3 => DeviceMode::Swim,
            4 => DeviceMode::Bootloader,
            other => DeviceMode::Unknown(other),
        }
    }
}

/// Which hardware flash-patch half-word the breakpoint covers.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BreakpointSelector {
    Lower = 0x00,
    Upper = 0x01,
    Both = 0x02,
}

/// A thin framing layer over a [`Transport`]: every method here issues
/// exactly one command-phase transfer and, where the command has a data
/// phase, exactly one data-phase transfer in the declared direction.
pub struct Protocol<T: Transport> {
    transport: T,
    cmd_buf: [u8; CMD_BUF_LEN],
}

impl<T: Transport> Protocol<T> {
    pub fn new(transport: T) -> Self {
        Protocol {
            transport,
            cmd_buf: [0u8; CMD_BUF_LEN],
        }
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn exchange(
        &mut self,
        cmd_len: usize,
        direction: Direction,
        data: &mut [u8],
        data_len: usize,
    ) -> Result<usize, TransportError> {
        log::debug!(
            "cmd {:02x} {:02x} len={} dir={:?} data_len={}",
            self.cmd_buf[0],
            self.cmd_buf[1],
            cmd_len,
            direction,
            data_len
        );
        self.transport.send_command(&self.cmd_buf, cmd_len)?;
        if data_len == 0 {
            return Ok(0);
        }
        match direction {
            Direction::ToDevice => self.transport.send_data(data, data_len),
            Direction::FromDevice => self.transport.recv_data(data, data_len),
        }
    }

    fn gcmd(&mut self, cmd0: u8, cmd1: u8, resp_len: usize) -> Result<Vec<u8>, TransportError> {
        self.cmd_buf = [0u8; CMD_BUF_LEN];
        self.cmd_buf[0] = cmd0;
        self.cmd_buf[1] = cmd1;
        let mut data = vec![0u8; resp_len.max(1)];
        let n = self.exchange(2, Direction::FromDevice, &mut data, resp_len)?;
        data.truncate(n);
        Ok(data)
    }

    fn debug_cmd(
        &mut self,
        sub0: u8,
        sub1: u8,
        resp_len: usize,
    ) -> Result<Vec<u8>, TransportError> {
        self.cmd_buf = [0u8; CMD_BUF_LEN];
        self.cmd_buf[0] = opcode::DEBUG_COMMAND;
        self.cmd_buf[1] = sub0;
        self.cmd_buf[2] = sub1;
        let mut data = vec![0u8; resp_len.max(1)];
        let n = self.exchange(8, Direction::FromDevice, &mut data, resp_len)?;
        data.truncate(n);
        Ok(data)
    }

    /// `STLinkGetVersion`: returns the packed 6-byte version reply.
    pub fn get_version(&mut self) -> Result<[u8; 6], TransportError> {
        let buf = self.gcmd(opcode::GET_VERSION, 0, 6)?;
        let mut out = [0u8; 6];
        out.copy_from_slice(&buf);
        Ok(out)
    }

    /// `STLinkGetCurrentMode`: returns the probe's current device mode.
    pub fn get_current_mode(&mut self) -> Result<DeviceMode, TransportError> {
        let buf = self.gcmd(opcode::GET_CURRENT_MODE, 0, 2)?;
        Ok(DeviceMode::from(codec::read_u16(&buf, 0)))
    }

    /// `STLinkDFUCommand` / exit: kicks the probe out of DFU mode.
    pub fn exit_dfu(&mut self) -> Result<(), TransportError> {
        self.gcmd(opcode::DFU_COMMAND, DFU_EXIT, 0)?;
        Ok(())
    }

    pub fn enter_swd(&mut self) -> Result<(), TransportError> {
        self.debug_cmd(debug_cmd::ENTER_MODE, enter_mode::SWD, 0)?;
        Ok(())
    }

    pub fn enter_jtag(&mut self) -> Result<(), TransportError> {
        self.debug_cmd(debug_cmd::ENTER_MODE, enter_mode::JTAG, 0)?;
        Ok(())
    }

    pub fn exit_debug(&mut self) -> Result<(), TransportError> {
        self.debug_cmd(debug_cmd::EXIT, 0, 0)?;
        Ok(())
    }

    pub fn read_core_id(&mut self) -> Result<u32, TransportError> {
        let buf = self.debug_cmd(debug_cmd::READ_CORE_ID, 0, 4)?;
        Ok(codec::read_u32(&buf, 0))
    }

    pub fn get_status(&mut self) -> Result<u16, TransportError> {
        let buf = self.debug_cmd(debug_cmd::GET_STATUS, 0, 2)?;
        Ok(codec::read_u16(&buf, 0))
    }

    pub fn force_debug(&mut self) -> Result<u16, TransportError> {
        let buf = self.debug_cmd(debug_cmd::FORCE_DEBUG, 0, 2)?;
        Ok(codec::read_u16(&buf, 0))
    }

    pub fn reset_sys(&mut self) -> Result<u16, TransportError> {
        let buf = self.debug_cmd(debug_cmd::RESET_SYS, 0, 2)?;
        Ok(codec::read_u16(&buf, 0))
    }

    pub fn run_core(&mut self) -> Result<u16, TransportError> {
        let buf = self.debug_cmd(debug_cmd::RUN_CORE, 0, 2)?;
        Ok(codec::read_u16(&buf, 0))
    }

    pub fn step_core(&mut self) -> Result<u16, TransportError> {
        let buf = self.debug_cmd(debug_cmd::STEP_CORE, 0, 2)?;
        Ok(codec::read_u16(&buf, 0))
    }

    /// Reads the 84-byte ARM register snapshot (21 little-endian words).
    pub fn read_all_regs(&mut self) -> Result<[u32; 21], TransportError> {
        let buf = self.debug_cmd(debug_cmd::READ_ALL_REGS, 0, 84)?;
        let mut regs = [0u32; 21];
        for (i, slot) in regs.iter_mut().enumerate() {
            *slot = codec::read_u32(&buf, i * 4);
        }
        Ok(regs)
    }

    pub fn read_one_reg(&mut self, index: u8) -> Result<u32, TransportError> {
        let buf = self.debug_cmd(debug_cmd::READ_ONE_REG, index, 4)?;
        Ok(codec::read_u32(&buf, 0))
    }

    pub fn write_reg(&mut self, index: u8, value: u32) -> Result<u16, TransportError> {
        self.cmd_buf = [0u8; CMD_BUF_LEN];
        self.cmd_buf[0] = opcode::DEBUG_COMMAND;
        self.cmd_buf[1] = debug_cmd::WRITE_REG;
        self.cmd_buf[2] = index;
        codec::write_u32(&mut self.cmd_buf, 3, value);
        let mut data = vec![0u8; 2];
        self.exchange(8, Direction::FromDevice, &mut data, 2)?;
        Ok(codec::read_u16(&data, 0))
    }

    /// Reads `len` bytes starting at `addr`, which must already be
    /// 4-aligned with `len` a multiple of 4 — alignment fix-ups live in the
    /// memory service, not here.
    pub fn read_mem_32(&mut self, addr: u32, len: u16) -> Result<Vec<u8>, TransportError> {
        self.cmd_buf = [0u8; CMD_BUF_LEN];
        self.cmd_buf[0] = opcode::DEBUG_COMMAND;
        self.cmd_buf[1] = debug_cmd::READ_MEM_32BIT;
        codec::write_u32(&mut self.cmd_buf, 2, addr);
        codec::write_u16(&mut self.cmd_buf, 6, len);
        let mut data = vec![0u8; len as usize];
        let n = self.exchange(8, Direction::FromDevice, &mut data, len as usize)?;
        data.truncate(n);
        Ok(data)
    }

    /// Writes `buf` to `addr`. Dispatches to the 32-bit write when `len` is
    /// a multiple of 4, the 8-bit write when `len < 64`; anything else is
    /// the caller's error (checked by the memory service).
    pub fn write_mem(&mut self, addr: u32, buf: &[u8]) -> Result<(), TransportError> {
        let len = buf.len();
        self.cmd_buf = [0u8; CMD_BUF_LEN];
        self.cmd_buf[0] = opcode::DEBUG_COMMAND;
        self.cmd_buf[1] = if len % 4 == 0 {
            debug_cmd::WRITE_MEM_32BIT
        } else {
            debug_cmd::WRITE_MEM_8BIT
        };
        codec::write_u32(&mut self.cmd_buf, 2, addr);
        codec::write_u16(&mut self.cmd_buf, 6, len as u16);
        let mut data = buf.to_vec();
        self.exchange(8, Direction::ToDevice, &mut data, len)?;
        Ok(())
    }

    pub fn set_breakpoint(
        &mut self,
        index: u8,
        addr: u32,
        selector: BreakpointSelector,
    ) -> Result<u16, TransportError> {
        self.cmd_buf = [0u8; CMD_BUF_LEN];
        self.cmd_buf[0] = opcode::DEBUG_COMMAND;
        self.cmd_buf[1] = debug_cmd::SET_FP;
        self.cmd_buf[2] = index;
        codec::write_u32(&mut self.cmd_buf, 3, addr);
        self.cmd_buf[7] = selector as u8;
        let mut data = vec![0u8; 2];
        self.exchange(8, Direction::FromDevice, &mut data, 2)?;
        Ok(codec::read_u16(&data, 0))
    }

    pub fn clear_breakpoint(&mut self, index: u8) -> Result<u16, TransportError> {
        let buf = self.debug_cmd(debug_cmd::CLEAR_FP, index, 2)?;
        Ok(codec::read_u16(&buf, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::FakeTransport;

    #[test]
    fn get_version_decodes_the_six_byte_reply() {
        let mut transport = FakeTransport::default();
        transport.push_reply(&[0x04, 0x83, 0x83, 0x04, 0x44, 0x37]);
        let mut proto = Protocol::new(transport);

        let buf = proto.get_version().unwrap();
        assert_eq!(buf, [0x04, 0x83, 0x83, 0x04, 0x44, 0x37]);
        assert_eq!(proto.transport_mut().sent_commands[0][0], opcode::GET_VERSION);
    }

    #[test]
    fn read_core_id_frames_the_right_bytes() {
        let mut transport = FakeTransport::default();
        transport.push_reply(&[0x77, 0x14, 0xa0, 0x1b]);
        let mut proto = Protocol::new(transport);

        let id = proto.read_core_id().unwrap();
        assert_eq!(id, 0x1ba0_1477);

        let sent = &proto.transport_mut().sent_commands[0];
        assert_eq!(sent[0], opcode::DEBUG_COMMAND);
        assert_eq!(sent[1], debug_cmd::READ_CORE_ID);
    }

    #[test]
    fn write_mem_picks_32bit_opcode_for_word_multiples() {
        let transport = FakeTransport::default();
        let mut proto = Protocol::new(transport);

        proto.write_mem(0x2000_0000, &[0u8; 8]).unwrap();
        let sent = &proto.transport_mut().sent_commands[0];
        assert_eq!(sent[1], debug_cmd::WRITE_MEM_32BIT);
    }

    #[test]
    fn write_mem_picks_8bit_opcode_for_short_unaligned_writes() {
        let transport = FakeTransport::default();
        let mut proto = Protocol::new(transport);

        proto.write_mem(0x2000_0000, &[0u8; 3]).unwrap();
        let sent = &proto.transport_mut().sent_commands[0];
        assert_eq!(sent[1], debug_cmd::WRITE_MEM_8BIT);
    }
}
