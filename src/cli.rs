//! Shared CLI helpers and small reusable Clap fragments

use clap::{ArgAction, Args};
use std::path::PathBuf;

/// Device and project options shared by every subcommand
#[derive(Clone, Debug, Default, Args)]
pub struct DeviceOpts {
    /// Project folder (holds pymakr.toml)
    #[arg(long, default_value = ".", global = true)]
    pub project: PathBuf,

    /// Board address: serial port path or telnet IP (telnet://host[:port])
    #[arg(short, long, global = true)]
    pub address: Option<String>,

    /// Telnet user
    #[arg(short, long, global = true)]
    pub user: Option<String>,

    /// Telnet password
    #[arg(long, global = true)]
    pub password: Option<String>,

    /// Monitor agent source uploaded to the board
    #[arg(long, global = true)]
    pub agent: Option<PathBuf>,

    /// Exclude files and folders matching patterns
    #[arg(long = "exclude", action = ArgAction::Append, global = true)]
    pub exclude: Vec<String>,
}
