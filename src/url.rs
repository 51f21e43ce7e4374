//! Device address parsing: serial port path or telnet host

use std::fmt;
use std::path::PathBuf;

pub const TELNET_PORT: u16 = 23;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceAddress {
    Serial { path: PathBuf },
    Telnet { host: String, port: u16 },
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceAddress::Serial { path } => write!(f, "serial://{}", path.display()),
            DeviceAddress::Telnet { host, port } => write!(f, "telnet://{}:{}", host, port),
        }
    }
}

/// `telnet://host[:port]`, `serial://path`, or a bare address. A bare address
/// of four dot-separated numeric groups (optionally `:port`) is a telnet host,
/// anything else is taken as a serial device path.
pub fn parse_device_address(s: &str) -> Option<DeviceAddress> {
    let s_trim = s.trim();
    if s_trim.is_empty() {
        return None;
    }
    let lower = s_trim.to_ascii_lowercase();
    if lower.starts_with("telnet:") {
        let rest = &s_trim["telnet:".len()..];
        let rest = rest.strip_prefix("//").unwrap_or(rest);
        let rest = rest.trim_end_matches('/');
        return parse_host_port(rest);
    }
    if lower.starts_with("serial:") {
        let rest = &s_trim["serial:".len()..];
        let rest = rest.strip_prefix("//").unwrap_or(rest);
        if rest.is_empty() {
            return None;
        }
        return Some(DeviceAddress::Serial {
            path: PathBuf::from(rest),
        });
    }
    let host = s_trim.split_once(':').map(|(h, _)| h).unwrap_or(s_trim);
    if is_ipv4(host) {
        return parse_host_port(s_trim);
    }
    Some(DeviceAddress::Serial {
        path: PathBuf::from(s_trim),
    })
}

fn parse_host_port(hp: &str) -> Option<DeviceAddress> {
    if hp.is_empty() {
        return None;
    }
    let (host, port) = match hp.split_once(':') {
        Some((h, pr)) => (h.to_string(), pr.parse().ok()?),
        None => (hp.to_string(), TELNET_PORT),
    };
    if host.is_empty() {
        return None;
    }
    Some(DeviceAddress::Telnet { host, port })
}

fn is_ipv4(host: &str) -> bool {
    let parts: Vec<&str> = host.split('.').collect();
    parts.len() == 4
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}
