//! Manifest reconciliation
//!
//! Compares the local listing with the manifest last written to the device
//! and derives what has to be created, updated and deleted. Comparison is by
//! whole `(path, kind, depth)` triple and never looks at file contents: every
//! file present on both sides is uploaded again.

use crate::manifest::{EntryKind, ManifestEntry};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

pub struct Reconciler {
    local: HashSet<ManifestEntry>,
    remote: HashSet<ManifestEntry>,
}

impl Reconciler {
    /// Duplicates collapse; input order is irrelevant.
    pub fn new<L, R>(local: L, remote: R) -> Self
    where
        L: IntoIterator<Item = ManifestEntry>,
        R: IntoIterator<Item = ManifestEntry>,
    {
        Self {
            local: local.into_iter().collect(),
            remote: remote.into_iter().collect(),
        }
    }

    /// Present on both sides
    pub fn to_update(&self) -> HashSet<ManifestEntry> {
        self.local.intersection(&self.remote).cloned().collect()
    }

    /// Present locally only
    pub fn to_create(&self) -> HashSet<ManifestEntry> {
        self.local.difference(&self.remote).cloned().collect()
    }

    /// Present on the device only
    pub fn to_delete(&self) -> HashSet<ManifestEntry> {
        self.remote.difference(&self.local).cloned().collect()
    }

    /// Paths whose kind differs between the two sides. Such a path is in both
    /// the create and the delete set and both operations will be issued.
    pub fn kind_conflicts(&self) -> Vec<String> {
        let deleted: HashSet<(&str, EntryKind)> = self
            .remote
            .difference(&self.local)
            .map(|e| (e.path.as_str(), e.kind))
            .collect();
        let conflicts: BTreeSet<String> = self
            .local
            .difference(&self.remote)
            .filter(|e| {
                deleted
                    .iter()
                    .any(|(path, kind)| *path == e.path && *kind != e.kind)
            })
            .map(|e| e.path.clone())
            .collect();
        conflicts.into_iter().collect()
    }

    /// The operations `sync` issues, in the order it issues them.
    ///
    /// Deletes come before creates, and files are removed before their
    /// directories, so the device never sees an rmdir on a non-empty directory
    /// or a write into a directory that does not exist yet.
    pub fn plan(&self) -> SyncPlan {
        let to_delete = self.to_delete();
        let to_create = self.to_create();
        let to_update = self.to_update();

        let mut ops = Vec::new();
        ops.extend(
            filter_by_type(&to_delete, EntryKind::File)
                .into_iter()
                .map(SyncOp::DeleteFile),
        );
        ops.extend(
            filter_by_type_order_by_depth(&to_delete, EntryKind::Dir, true)
                .into_iter()
                .map(SyncOp::DeleteDir),
        );
        ops.extend(
            filter_by_type_order_by_depth(&to_create, EntryKind::Dir, false)
                .into_iter()
                .map(SyncOp::CreateDir),
        );
        ops.extend(
            filter_by_type(&to_create, EntryKind::File)
                .into_iter()
                .map(SyncOp::CreateFile),
        );
        ops.extend(
            filter_by_type(&to_update, EntryKind::File)
                .into_iter()
                .map(SyncOp::UpdateFile),
        );
        SyncPlan { ops }
    }
}

/// Paths of the entries of `kind`, sorted by path
pub fn filter_by_type<'a, I>(entries: I, kind: EntryKind) -> Vec<String>
where
    I: IntoIterator<Item = &'a ManifestEntry>,
{
    let mut paths: Vec<String> = entries
        .into_iter()
        .filter(|e| e.kind == kind)
        .map(|e| e.path.clone())
        .collect();
    paths.sort();
    paths
}

/// Paths of the entries of `kind` ordered by depth: ascending for creation,
/// descending (`reverse`) for deletion. Ties are ordered by path.
pub fn filter_by_type_order_by_depth<'a, I>(entries: I, kind: EntryKind, reverse: bool) -> Vec<String>
where
    I: IntoIterator<Item = &'a ManifestEntry>,
{
    let mut selected: Vec<&ManifestEntry> = entries.into_iter().filter(|e| e.kind == kind).collect();
    selected.sort_by(|a, b| {
        let by_depth = if reverse {
            b.depth.cmp(&a.depth)
        } else {
            a.depth.cmp(&b.depth)
        };
        by_depth.then_with(|| a.path.cmp(&b.path))
    });
    selected.into_iter().map(|e| e.path.clone()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOp {
    DeleteFile(String),
    DeleteDir(String),
    CreateDir(String),
    CreateFile(String),
    UpdateFile(String),
}

impl SyncOp {
    pub fn path(&self) -> &str {
        match self {
            SyncOp::DeleteFile(p)
            | SyncOp::DeleteDir(p)
            | SyncOp::CreateDir(p)
            | SyncOp::CreateFile(p)
            | SyncOp::UpdateFile(p) => p,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SyncOp::DeleteFile(_) => "delete",
            SyncOp::DeleteDir(_) => "rmdir",
            SyncOp::CreateDir(_) => "mkdir",
            SyncOp::CreateFile(_) => "create",
            SyncOp::UpdateFile(_) => "update",
        }
    }
}

impl fmt::Display for SyncOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.label(), self.path())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    pub ops: Vec<SyncOp>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Number of file uploads (creates and updates)
    pub fn uploads(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, SyncOp::CreateFile(_) | SyncOp::UpdateFile(_)))
            .count()
    }
}
