//! Transport to the board: serial port or telnet
//!
//! The monitor only needs a blocking byte stream plus a handful of raw REPL
//! operations to launch the agent. [`Device`] is that seam; [`TelnetDevice`]
//! and [`SerialDevice`] are the two transports a board offers.

use crate::error::DeviceError;
use crate::protocol::timeouts;
use crate::url::DeviceAddress;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Blocking byte stream to the board
pub trait Connection: Read + Write {}
impl<T: Read + Write + ?Sized> Connection for T {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    Serial,
    Telnet,
}

pub trait Device {
    fn connection_kind(&self) -> ConnectionKind;

    /// Telnet login as (user, password)
    fn credentials(&self) -> (String, String);

    /// Drop the current connection and open a new one. In raw mode no REPL
    /// banner is expected after login.
    fn reconnect(&mut self, raw: bool) -> Result<(), DeviceError>;

    fn connection(&mut self) -> &mut dyn Connection;

    /// Discard any input that has not been read yet
    fn flush(&mut self) -> Result<(), DeviceError>;

    /// Interrupt whatever runs and switch to the raw REPL without a soft reset
    fn enter_raw_repl_no_reset(&mut self) -> Result<(), DeviceError> {
        self.connection().write_all(raw_repl::INTERRUPT)?;
        self.flush()?;
        self.connection().write_all(raw_repl::ENTER)?;
        raw_repl::read_until(self.connection(), raw_repl::BANNER)?;
        Ok(())
    }

    /// Execute `code` in the raw REPL without waiting for it to finish
    fn exec_raw_no_follow(&mut self, code: &[u8]) -> Result<(), DeviceError> {
        raw_repl::exec_no_follow(self.connection(), code)
    }

    fn exit_raw_repl(&mut self) -> Result<(), DeviceError> {
        self.connection().write_all(raw_repl::EXIT)?;
        Ok(())
    }
}

pub mod raw_repl {
    use super::Connection;
    use crate::error::DeviceError;
    use std::io::{Read, Write};
    use std::time::Duration;

    pub const INTERRUPT: &[u8] = b"\r\x03\x03";
    pub const ENTER: &[u8] = b"\r\x01";
    pub const EXIT: &[u8] = b"\r\x02";
    pub const EXEC: &[u8] = b"\x04";
    pub const BANNER: &[u8] = b"raw REPL; CTRL-B to exit\r\n>";

    // Give up on a marker after this much unrelated output
    const MAX_SCAN: usize = 64 * 1024;

    /// Read until the data ends with one of `markers`; returns its index.
    pub fn read_until_any(conn: &mut dyn Connection, markers: &[&[u8]]) -> Result<usize, DeviceError> {
        let mut seen = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match conn.read(&mut byte) {
                Ok(0) => {
                    return Err(DeviceError::RawRepl(format!(
                        "connection closed while waiting for {:?}",
                        String::from_utf8_lossy(markers[0])
                    )))
                }
                Ok(_) => seen.push(byte[0]),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
            if let Some(i) = markers.iter().position(|m| seen.ends_with(m)) {
                return Ok(i);
            }
            if seen.len() > MAX_SCAN {
                return Err(DeviceError::RawRepl(format!(
                    "no {:?} in {} bytes of output",
                    String::from_utf8_lossy(markers[0]),
                    seen.len()
                )));
            }
        }
    }

    pub fn read_until(conn: &mut dyn Connection, marker: &[u8]) -> Result<(), DeviceError> {
        read_until_any(conn, &[marker]).map(|_| ())
    }

    pub fn exec_no_follow(conn: &mut dyn Connection, code: &[u8]) -> Result<(), DeviceError> {
        // The board's input buffer is small; pace the upload
        for piece in code.chunks(256) {
            conn.write_all(piece)?;
            std::thread::sleep(Duration::from_millis(10));
        }
        conn.write_all(EXEC)?;
        conn.flush()?;

        let mut reply = [0u8; 2];
        conn.read_exact(&mut reply)?;
        if &reply != b"OK" {
            return Err(DeviceError::RawRepl(format!(
                "could not exec command, got {:?}",
                String::from_utf8_lossy(&reply)
            )));
        }
        Ok(())
    }
}

const LOGIN_PROMPT: &[u8] = b"Login as: ";
const PASSWORD_PROMPT: &[u8] = b"Password: ";
const REPL_BANNER: &[u8] = b"for more information.";

/// Board reachable over its telnet server (WiPy, LoPy and friends)
pub struct TelnetDevice {
    host: String,
    port: u16,
    user: String,
    password: String,
    timeout: Duration,
    stream: TcpStream,
}

impl TelnetDevice {
    pub fn connect(host: &str, port: u16, user: &str, password: &str) -> Result<Self, DeviceError> {
        let timeout = Duration::from_millis(timeouts::CONNECT_MS);
        let stream = Self::open(host, port, user, password, timeout, false)?;
        Ok(Self {
            host: host.to_string(),
            port,
            user: user.to_string(),
            password: password.to_string(),
            timeout,
            stream,
        })
    }

    fn open(
        host: &str,
        port: u16,
        user: &str,
        password: &str,
        timeout: Duration,
        raw: bool,
    ) -> Result<TcpStream, DeviceError> {
        let invalid = || DeviceError::InvalidAddress(format!("{}:{}", host, port));
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|_| invalid())?
            .next()
            .ok_or_else(invalid)?;
        let mut stream = TcpStream::connect_timeout(&addr, timeout).map_err(|_| invalid())?;
        stream.set_nodelay(true).ok();
        stream.set_read_timeout(Some(timeout))?;

        raw_repl::read_until(&mut stream, LOGIN_PROMPT).map_err(|_| invalid())?;
        stream.write_all(user.as_bytes())?;
        stream.write_all(b"\r\n")?;
        raw_repl::read_until(&mut stream, PASSWORD_PROMPT).map_err(|_| DeviceError::InvalidCredentials)?;
        stream.write_all(password.as_bytes())?;
        stream.write_all(b"\r\n")?;

        if !raw {
            // A rejected login prompts again instead of printing the banner
            let matched = raw_repl::read_until_any(&mut stream, &[REPL_BANNER, LOGIN_PROMPT])
                .map_err(|_| DeviceError::InvalidCredentials)?;
            if matched != 0 {
                return Err(DeviceError::InvalidCredentials);
            }
        }

        // The protocol itself waits as long as the device takes
        stream.set_read_timeout(None)?;
        Ok(stream)
    }
}

impl Device for TelnetDevice {
    fn connection_kind(&self) -> ConnectionKind {
        ConnectionKind::Telnet
    }

    fn credentials(&self) -> (String, String) {
        (self.user.clone(), self.password.clone())
    }

    fn reconnect(&mut self, raw: bool) -> Result<(), DeviceError> {
        let _ = self.stream.shutdown(Shutdown::Both);
        self.stream = Self::open(&self.host, self.port, &self.user, &self.password, self.timeout, raw)?;
        Ok(())
    }

    fn connection(&mut self) -> &mut dyn Connection {
        &mut self.stream
    }

    fn flush(&mut self) -> Result<(), DeviceError> {
        self.stream.set_nonblocking(true)?;
        let mut buf = [0u8; 1024];
        let result = loop {
            match self.stream.read(&mut buf) {
                Ok(0) => break Ok(()),
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => break Err(e),
            }
        };
        self.stream.set_nonblocking(false)?;
        result.map_err(DeviceError::from)
    }
}

/// Board on a USB serial port
#[cfg(unix)]
pub struct SerialDevice {
    path: std::path::PathBuf,
    user: String,
    password: String,
    file: std::fs::File,
}

#[cfg(unix)]
impl SerialDevice {
    pub const BAUD: libc::speed_t = libc::B115200;

    pub fn open(path: &std::path::Path, user: &str, password: &str) -> Result<Self, DeviceError> {
        let file = Self::open_port(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            user: user.to_string(),
            password: password.to_string(),
            file,
        })
    }

    fn open_port(path: &std::path::Path) -> Result<std::fs::File, DeviceError> {
        use std::os::unix::fs::OpenOptionsExt;
        use std::os::fd::AsRawFd;

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(path)
            .map_err(|e| DeviceError::InvalidAddress(format!("{}: {}", path.display(), e)))?;

        let fd = file.as_raw_fd();
        // Raw 8N1 at 115200, blocking reads of at least one byte
        unsafe {
            let mut tio: libc::termios = std::mem::zeroed();
            if libc::tcgetattr(fd, &mut tio) != 0 {
                return Err(std::io::Error::last_os_error().into());
            }
            libc::cfmakeraw(&mut tio);
            if libc::cfsetspeed(&mut tio, Self::BAUD) != 0 {
                return Err(std::io::Error::last_os_error().into());
            }
            tio.c_cc[libc::VMIN] = 1;
            tio.c_cc[libc::VTIME] = 0;
            if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
                return Err(std::io::Error::last_os_error().into());
            }
        }
        Ok(file)
    }
}

#[cfg(unix)]
impl Device for SerialDevice {
    fn connection_kind(&self) -> ConnectionKind {
        ConnectionKind::Serial
    }

    fn credentials(&self) -> (String, String) {
        (self.user.clone(), self.password.clone())
    }

    fn reconnect(&mut self, _raw: bool) -> Result<(), DeviceError> {
        self.file = Self::open_port(&self.path)?;
        Ok(())
    }

    fn connection(&mut self) -> &mut dyn Connection {
        &mut self.file
    }

    fn flush(&mut self) -> Result<(), DeviceError> {
        use std::os::fd::AsRawFd;
        let r = unsafe { libc::tcflush(self.file.as_raw_fd(), libc::TCIFLUSH) };
        if r != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }
}

/// Open the transport named by `addr`
pub fn open_device(addr: &DeviceAddress, user: &str, password: &str) -> Result<Box<dyn Device>, DeviceError> {
    match addr {
        DeviceAddress::Telnet { host, port } => {
            Ok(Box::new(TelnetDevice::connect(host, *port, user, password)?))
        }
        #[cfg(unix)]
        DeviceAddress::Serial { path } => Ok(Box::new(SerialDevice::open(path, user, password)?)),
        #[cfg(not(unix))]
        DeviceAddress::Serial { path } => Err(DeviceError::InvalidAddress(format!(
            "{}: serial ports are only supported on unix",
            path.display()
        ))),
    }
}
