//! Shared protocol constants for the device monitor channel

// Framing byte; doubled when it appears in argument data
pub const ESCAPE: u8 = 0x1B;

// File content is sent in blocks of this size, each followed by an ack cycle
pub const BLOCK_SIZE: usize = 256;

// Exact reply to a RequestAck command
pub const ACK_REPLY: [u8; 3] = [ESCAPE, 0x00, 0x00];

// Length sentinel returned by ReadFile when the file does not exist
pub const NOT_FOUND: u32 = 0xFFFF_FFFF;

// Device-side manifest of the last synced listing
pub const MANIFEST_PATH: &str = "/flash/project.pymakr";
pub const MANIFEST_NAME: &str = "project.pymakr";

/// Operations understood by the monitor agent on the device.
///
/// Each is sent as the escape byte followed by its two opcode bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    RequestAck,
    ResetBoard,
    ExitMonitor,
    WriteFile,
    ReadFile,
    RemoveFile,
    LastFileHash,
    CreateDir,
    RemoveDir,
}

impl Command {
    pub const ALL: [Command; 9] = [
        Command::RequestAck,
        Command::ResetBoard,
        Command::ExitMonitor,
        Command::WriteFile,
        Command::ReadFile,
        Command::RemoveFile,
        Command::LastFileHash,
        Command::CreateDir,
        Command::RemoveDir,
    ];

    pub fn opcode(self) -> [u8; 2] {
        match self {
            Command::RequestAck => [0x00, 0x00],
            Command::ResetBoard => [0x00, 0xFE],
            Command::ExitMonitor => [0x00, 0xFF],
            Command::WriteFile => [0x01, 0x00],
            Command::ReadFile => [0x01, 0x01],
            Command::RemoveFile => [0x01, 0x02],
            Command::LastFileHash => [0x01, 0x03],
            Command::CreateDir => [0x01, 0x04],
            Command::RemoveDir => [0x01, 0x05],
        }
    }

    pub fn from_opcode(opcode: [u8; 2]) -> Option<Command> {
        Command::ALL.into_iter().find(|c| c.opcode() == opcode)
    }
}

// Centralized timing constants for session setup and teardown
pub mod timeouts {
    // Wait after launching the agent before opening the channel (ms)
    pub const SETTLE_MS: u64 = 500;

    // Device reboot grace period after ResetBoard (ms)
    pub const RESET_GRACE_MS: u64 = 1000;

    // Pause around the telnet reconnect when leaving the monitor (ms)
    pub const RESTORE_MS: u64 = 250;

    // Telnet connect and login timeout (ms)
    pub const CONNECT_MS: u64 = 10_000;
}

/// Session delays, overridable so tests can run without sleeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub settle_ms: u64,
    pub reset_grace_ms: u64,
    pub restore_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            settle_ms: timeouts::SETTLE_MS,
            reset_grace_ms: timeouts::RESET_GRACE_MS,
            restore_ms: timeouts::RESTORE_MS,
        }
    }
}

impl Timing {
    pub fn immediate() -> Self {
        Self {
            settle_ms: 0,
            reset_grace_ms: 0,
            restore_ms: 0,
        }
    }
}
