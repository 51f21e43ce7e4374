//! Pymakr Sync Library
//!
//! Mirrors a project folder onto a MicroPython/Pycom board through the
//! monitor agent's framed command protocol, over serial or telnet.

pub mod channel;
pub mod cli;
pub mod config;
pub mod device;
pub mod error;
pub mod fs_enum;
pub mod logger;
pub mod manifest;
pub mod monitor;
pub mod progress;
pub mod protocol;
pub mod protocol_core;
pub mod reconcile;
pub mod url;

pub use error::{DeviceError, ProtocolError};
pub use manifest::{EntryKind, ManifestEntry};
pub use monitor::{Monitor, MonitorOptions, SyncStats};
pub use reconcile::{Reconciler, SyncOp, SyncPlan};
