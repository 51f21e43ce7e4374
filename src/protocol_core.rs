//! Wire encoding helpers for the monitor channel
//!
//! Pure functions with no I/O, used by the channel to build what it writes
//! and to check what it reads back.

use crate::error::ProtocolError;
use crate::protocol::{Command, ACK_REPLY, ESCAPE};

/// Double every escape byte so payload data cannot be mistaken for a command.
/// No other byte is touched.
pub fn escape(data: &[u8]) -> Vec<u8> {
    let extra = data.iter().filter(|&&b| b == ESCAPE).count();
    let mut out = Vec::with_capacity(data.len() + extra);
    for &b in data {
        out.push(b);
        if b == ESCAPE {
            out.push(ESCAPE);
        }
    }
    out
}

/// Inverse of [`escape`]. Returns `None` if an unpaired escape byte is found,
/// i.e. the data contains a command frame.
pub fn unescape(data: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len());
    let mut iter = data.iter();
    while let Some(&b) = iter.next() {
        if b == ESCAPE {
            match iter.next() {
                Some(&ESCAPE) => out.push(ESCAPE),
                _ => return None,
            }
        } else {
            out.push(b);
        }
    }
    Some(out)
}

/// Build a command frame (3 bytes)
/// Format: ESCAPE (1) | OPCODE (2)
pub fn build_command(cmd: Command) -> [u8; 3] {
    let [a, b] = cmd.opcode();
    [ESCAPE, a, b]
}

/// Parse a command frame; `None` for anything that is not a known command.
pub fn parse_command(frame: &[u8; 3]) -> Option<Command> {
    if frame[0] != ESCAPE {
        return None;
    }
    Command::from_opcode([frame[1], frame[2]])
}

pub fn encode_u16(v: u16) -> [u8; 2] {
    v.to_be_bytes()
}

pub fn encode_u32(v: u32) -> [u8; 4] {
    v.to_be_bytes()
}

pub fn decode_u16(b: [u8; 2]) -> u16 {
    u16::from_be_bytes(b)
}

pub fn decode_u32(b: [u8; 4]) -> u32 {
    u32::from_be_bytes(b)
}

/// Escaped, 16-bit length-prefixed name argument
pub fn encode_name(name: &str) -> Result<Vec<u8>, ProtocolError> {
    let bytes = name.as_bytes();
    let len = u16::try_from(bytes.len()).map_err(|_| ProtocolError::TooLong {
        what: "name",
        len: bytes.len(),
    })?;
    let mut out = escape(&encode_u16(len));
    out.extend_from_slice(&escape(bytes));
    Ok(out)
}

/// Content length field. `u32::MAX` is reserved as the not-found sentinel.
pub fn content_len(len: usize) -> Result<u32, ProtocolError> {
    match u32::try_from(len) {
        Ok(v) if v != u32::MAX => Ok(v),
        _ => Err(ProtocolError::TooLong {
            what: "content",
            len,
        }),
    }
}

/// Split content into the blocks the write loop sends.
///
/// Always yields `1 + len / BLOCK_SIZE` blocks; when the length is an exact
/// multiple of the block size the last block is empty.
pub fn content_blocks(content: &[u8], block_size: usize) -> Vec<&[u8]> {
    let count = 1 + content.len() / block_size;
    (0..count)
        .map(|i| {
            let start = (i * block_size).min(content.len());
            let end = ((i + 1) * block_size).min(content.len());
            &content[start..end]
        })
        .collect()
}

/// Verify an ack reply read from the device
pub fn check_ack(reply: &[u8]) -> Result<(), ProtocolError> {
    if reply != ACK_REPLY {
        return Err(ProtocolError::AckMismatch {
            got: reply.to_vec(),
        });
    }
    Ok(())
}
