//! Manifest entries and their JSON form on the device
//!
//! A manifest is the listing of `(path, kind, depth)` triples that was last
//! synced. On the device it is stored as a JSON array of 3-element arrays:
//! `[["main.py", "f", 0], ["lib", "d", 0], ["lib/util.py", "f", 1]]`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntryKind {
    #[serde(rename = "f")]
    File,
    #[serde(rename = "d")]
    Dir,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::File => "f",
            EntryKind::Dir => "d",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One file or directory in a manifest. Equality covers the whole triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "(String, EntryKind, u32)", into = "(String, EntryKind, u32)")]
pub struct ManifestEntry {
    pub path: String,
    pub kind: EntryKind,
    /// Nesting depth, top-level entries are 0. Only used to order directory
    /// operations.
    pub depth: u32,
}

impl ManifestEntry {
    pub fn new(path: impl Into<String>, kind: EntryKind, depth: u32) -> Self {
        Self {
            path: path.into(),
            kind,
            depth,
        }
    }

    pub fn file(path: impl Into<String>, depth: u32) -> Self {
        Self::new(path, EntryKind::File, depth)
    }

    pub fn dir(path: impl Into<String>, depth: u32) -> Self {
        Self::new(path, EntryKind::Dir, depth)
    }
}

impl From<(String, EntryKind, u32)> for ManifestEntry {
    fn from((path, kind, depth): (String, EntryKind, u32)) -> Self {
        Self { path, kind, depth }
    }
}

impl From<ManifestEntry> for (String, EntryKind, u32) {
    fn from(e: ManifestEntry) -> Self {
        (e.path, e.kind, e.depth)
    }
}

/// Encode a listing in the device's manifest format
pub fn encode(entries: &[ManifestEntry]) -> Result<Vec<u8>> {
    serde_json::to_vec(entries).context("Failed to encode manifest")
}

/// Decode the device's manifest file
pub fn decode(data: &[u8]) -> Result<Vec<ManifestEntry>> {
    let text = std::str::from_utf8(data).context("Manifest is not valid UTF-8")?;
    serde_json::from_str(text).context("Failed to parse manifest JSON")
}
