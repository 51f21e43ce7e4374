//! Project configuration (`pymakr.toml`) merged with command-line options

use crate::cli::DeviceOpts;
use crate::fs_enum::FileFilter;
use crate::url::{parse_device_address, DeviceAddress};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "pymakr.toml";
pub const DEFAULT_USER: &str = "micro";
pub const DEFAULT_PASSWORD: &str = "python";
pub const DEFAULT_AGENT: &str = ".pymakr/monitor.py";
pub const DEFAULT_EXCLUDE: &[&str] = &[".*", "__pycache__"];

/// Contents of `pymakr.toml`; every key is optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub address: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Subfolder of the project that is mirrored to the board
    pub sync_folder: Option<PathBuf>,
    pub agent: Option<PathBuf>,
    /// Replaces the default exclusion list when present
    pub exclude: Option<Vec<String>>,
}

pub fn load_config(project: &Path) -> Result<ProjectConfig> {
    let p = project.join(CONFIG_FILE);
    match std::fs::read_to_string(&p) {
        Ok(data) => toml::from_str(&data).with_context(|| format!("Failed to parse {}", p.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ProjectConfig::default()),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", p.display())),
    }
}

/// Effective settings for one run
#[derive(Debug, Clone)]
pub struct Settings {
    pub address: DeviceAddress,
    pub username: String,
    pub password: String,
    pub sync_root: PathBuf,
    pub agent: PathBuf,
    pub exclude: Vec<String>,
}

impl Settings {
    /// Command-line values win over the config file, which wins over defaults.
    pub fn resolve(opts: &DeviceOpts, file: ProjectConfig) -> Result<Self> {
        let raw_address = opts
            .address
            .clone()
            .or(file.address)
            .ok_or_else(|| anyhow::anyhow!("no board address: pass --address or set `address` in {}", CONFIG_FILE))?;
        let address = parse_device_address(&raw_address)
            .ok_or_else(|| anyhow::anyhow!("invalid board address: {:?}", raw_address))?;

        let sync_root = match file.sync_folder {
            Some(ref folder) if !folder.as_os_str().is_empty() => opts.project.join(folder),
            _ => opts.project.clone(),
        };
        let agent = opts
            .agent
            .clone()
            .or(file.agent.map(|a| opts.project.join(a)))
            .unwrap_or_else(|| opts.project.join(DEFAULT_AGENT));

        let mut exclude = file
            .exclude
            .unwrap_or_else(|| DEFAULT_EXCLUDE.iter().map(|s| s.to_string()).collect());
        exclude.push(CONFIG_FILE.to_string());
        exclude.extend(opts.exclude.iter().cloned());

        Ok(Self {
            address,
            username: opts
                .user
                .clone()
                .or(file.username)
                .unwrap_or_else(|| DEFAULT_USER.to_string()),
            password: opts
                .password
                .clone()
                .or(file.password)
                .unwrap_or_else(|| DEFAULT_PASSWORD.to_string()),
            sync_root,
            agent,
            exclude,
        })
    }

    pub fn load(opts: &DeviceOpts) -> Result<Self> {
        let file = load_config(&opts.project)?;
        Self::resolve(opts, file)
    }

    pub fn filter(&self) -> FileFilter {
        FileFilter::from_patterns(&self.exclude)
    }
}
