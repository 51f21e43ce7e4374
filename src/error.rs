use thiserror::Error;

/// Failures of the framed command channel.
///
/// All of these leave the channel in an undefined state; the session has to
/// be torn down and started again.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    #[error("ack mismatch: got {got:02x?}")]
    AckMismatch { got: Vec<u8> },

    #[error("{what} too long for the wire format: {len} bytes")]
    TooLong { what: &'static str, len: usize },

    #[error("channel is not in monitor mode")]
    NotInMonitor,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of the transport underneath the channel.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("raw REPL: {0}")]
    RawRepl(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
