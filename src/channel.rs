//! Framed command channel to the monitor agent
//!
//! Strictly synchronous: one request at a time, and the only flow control is
//! the ack cycle after every content block. Commands are written verbatim,
//! every argument byte goes through [`escape`]; replies are read verbatim.
//!
//! Remove-file, create-dir and remove-dir get no reply. A failure on the
//! device side is not reported and only shows up later as a desync.

use crate::error::ProtocolError;
use crate::protocol::{Command, ACK_REPLY, BLOCK_SIZE, NOT_FOUND};
use crate::protocol_core::{
    build_command, check_ack, content_blocks, content_len, decode_u16, decode_u32, encode_name,
    encode_u32, escape,
};
use std::io::{Read, Write};

pub struct Channel<C: Read + Write> {
    conn: C,
}

impl<C: Read + Write> Channel<C> {
    pub fn new(conn: C) -> Self {
        Self { conn }
    }

    pub fn into_inner(self) -> C {
        self.conn
    }

    /// Write a bare command frame
    pub fn send(&mut self, cmd: Command) -> Result<(), ProtocolError> {
        self.conn.write_all(&build_command(cmd))?;
        self.conn.flush()?;
        Ok(())
    }

    /// Escape and write argument data
    fn write_data(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.conn.write_all(&escape(data))?;
        Ok(())
    }

    fn write_name(&mut self, name: &str) -> Result<(), ProtocolError> {
        let encoded = encode_name(name)?;
        self.conn.write_all(&encoded)?;
        Ok(())
    }

    /// Read exactly `n` bytes; anything less is a protocol error.
    fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = vec![0u8; n];
        let mut got = 0;
        while got < n {
            match self.conn.read(&mut buf[got..]) {
                Ok(0) => return Err(ProtocolError::ShortRead { expected: n, got }),
                Ok(k) => got += k,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(buf)
    }

    fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        let b = self.read_exact(2)?;
        Ok(decode_u16([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        let b = self.read_exact(4)?;
        Ok(decode_u32([b[0], b[1], b[2], b[3]]))
    }

    /// One ack cycle: request, then block until the 3-byte reply arrives.
    pub fn request_ack(&mut self) -> Result<(), ProtocolError> {
        self.send(Command::RequestAck)?;
        let reply = self.read_exact(ACK_REPLY.len())?;
        check_ack(&reply)
    }

    /// Returns the number of ack cycles performed (`1 + len / BLOCK_SIZE`).
    pub fn write_file_contents(&mut self, name: &str, content: &[u8]) -> Result<usize, ProtocolError> {
        // Validate before anything hits the wire
        let len = content_len(content.len())?;
        let name_arg = encode_name(name)?;

        self.conn.write_all(&build_command(Command::WriteFile))?;
        self.conn.write_all(&name_arg)?;
        self.write_data(&encode_u32(len))?;

        let mut acks = 0;
        for block in content_blocks(content, BLOCK_SIZE) {
            self.write_data(block)?;
            self.request_ack()?;
            acks += 1;
        }
        Ok(acks)
    }

    /// `Ok(None)` when the device reports the file does not exist.
    pub fn read_file(&mut self, name: &str) -> Result<Option<Vec<u8>>, ProtocolError> {
        self.conn.write_all(&build_command(Command::ReadFile))?;
        self.write_name(name)?;
        self.conn.flush()?;

        let len = self.read_u32()?;
        if len == NOT_FOUND {
            return Ok(None);
        }
        self.read_exact(len as usize).map(Some)
    }

    pub fn remove_file(&mut self, name: &str) -> Result<(), ProtocolError> {
        self.name_command(Command::RemoveFile, name)
    }

    pub fn create_dir(&mut self, name: &str) -> Result<(), ProtocolError> {
        self.name_command(Command::CreateDir, name)
    }

    pub fn remove_dir(&mut self, name: &str) -> Result<(), ProtocolError> {
        self.name_command(Command::RemoveDir, name)
    }

    /// Opaque hash blob of the last file the agent wrote under `name`.
    pub fn req_last_file_hash(&mut self, name: &str) -> Result<Vec<u8>, ProtocolError> {
        self.conn.write_all(&build_command(Command::LastFileHash))?;
        self.write_name(name)?;
        self.conn.flush()?;

        let len = self.read_u16()?;
        self.read_exact(len as usize)
    }

    fn name_command(&mut self, cmd: Command, name: &str) -> Result<(), ProtocolError> {
        let name_arg = encode_name(name)?;
        self.conn.write_all(&build_command(cmd))?;
        self.conn.write_all(&name_arg)?;
        self.conn.flush()?;
        Ok(())
    }
}
