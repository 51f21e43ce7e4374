use anyhow::{Context, Result};
use std::path::{Component, Path};
// Local project listing for the reconciler

use crate::manifest::{EntryKind, ManifestEntry};
use crate::protocol::MANIFEST_NAME;

/// Exclusion options for the local listing
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    pub exclude_files: Vec<String>,
    pub exclude_dirs: Vec<String>,
}

impl FileFilter {
    /// Same patterns applied to both files and directories
    pub fn from_patterns(patterns: &[String]) -> Self {
        Self {
            exclude_files: patterns.to_vec(),
            exclude_dirs: patterns.to_vec(),
        }
    }

    /// Check if a file should be included
    fn should_include_file(&self, rel: &Path) -> bool {
        let filename = rel.file_name().unwrap_or_default().to_string_lossy();
        if filename == MANIFEST_NAME {
            return false;
        }
        !self
            .exclude_files
            .iter()
            .any(|pattern| glob_match(pattern, &filename))
    }

    /// Check if a directory should be included
    fn should_include_dir(&self, rel: &Path) -> bool {
        for pattern in &self.exclude_dirs {
            // Any path component matching excludes the whole subtree
            for component in rel.components() {
                if let Some(component_str) = component.as_os_str().to_str() {
                    if glob_match(pattern, component_str) {
                        return false;
                    }
                }
            }
        }
        true
    }
}

/// Simple glob matching (supports * wildcards)
fn glob_match(pattern: &str, text: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    if pattern.contains('*') {
        if pattern.starts_with('*') && pattern.ends_with('*') && pattern.len() > 1 {
            let middle = &pattern[1..pattern.len() - 1];
            return text.contains(middle);
        } else if let Some(suffix) = pattern.strip_prefix('*') {
            return text.ends_with(suffix);
        } else if let Some(prefix) = pattern.strip_suffix('*') {
            return text.starts_with(prefix);
        }
    }

    pattern == text
}

/// Device-style path: relative, `/`-separated
fn device_path(rel: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(s) => parts.push(s.to_str()?.to_string()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Walk `root` and build the local listing: every directory and regular file
/// below it, with depth 0 for top-level entries. Symlinks are not followed.
/// Sorted by path.
pub fn enumerate_listing(root: &Path, filter: &FileFilter) -> Result<Vec<ManifestEntry>> {
    use walkdir::WalkDir;

    if !root.is_dir() {
        anyhow::bail!("project folder is not a directory: {}", root.display());
    }

    let mut entries = Vec::new();

    for entry in WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            // Skip excluded directories entirely - this prevents walking into them
            if e.file_type().is_dir() {
                e.path()
                    .strip_prefix(root)
                    .map(|rel| filter.should_include_dir(rel))
                    .unwrap_or(false)
            } else {
                true
            }
        })
    {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        let rel = match entry.path().strip_prefix(root) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let kind = if entry.file_type().is_dir() {
            EntryKind::Dir
        } else if entry.file_type().is_file() {
            if !filter.should_include_file(rel) {
                continue;
            }
            EntryKind::File
        } else {
            continue;
        };
        let Some(path) = device_path(rel) else {
            eprintln!("skipping non UTF-8 path: {}", rel.display());
            continue;
        };
        // walkdir depth counts from the root itself
        let depth = (entry.depth() - 1) as u32;
        entries.push(ManifestEntry::new(path, kind, depth));
    }

    entries.sort();
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn project() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::write(root.join("a.py"), "print('a')\n").unwrap();
        fs::create_dir_all(root.join("lib/sub")).unwrap();
        fs::write(root.join("lib/b.py"), "b = 1\n").unwrap();
        fs::write(root.join("lib/sub/c.py"), "c = 2\n").unwrap();
        tmp
    }

    #[test]
    fn test_listing_kinds_and_depths() {
        let tmp = project();
        let listing = enumerate_listing(tmp.path(), &FileFilter::default()).unwrap();
        assert_eq!(
            listing,
            vec![
                ManifestEntry::file("a.py", 0),
                ManifestEntry::dir("lib", 0),
                ManifestEntry::file("lib/b.py", 1),
                ManifestEntry::dir("lib/sub", 1),
                ManifestEntry::file("lib/sub/c.py", 2),
            ]
        );
    }

    #[test]
    fn test_listing_skips_manifest_file() {
        let tmp = project();
        fs::write(tmp.path().join(MANIFEST_NAME), "[]").unwrap();
        let listing = enumerate_listing(tmp.path(), &FileFilter::default()).unwrap();
        assert!(listing.iter().all(|e| e.path != MANIFEST_NAME));
    }

    #[test]
    fn test_listing_excludes() {
        let tmp = project();
        fs::create_dir(tmp.path().join("__pycache__")).unwrap();
        fs::write(tmp.path().join("__pycache__/a.pyc"), "x").unwrap();
        fs::write(tmp.path().join("notes.txt"), "x").unwrap();
        let filter = FileFilter::from_patterns(&["__pycache__".to_string(), "*.txt".to_string()]);
        let listing = enumerate_listing(tmp.path(), &filter).unwrap();
        let paths: Vec<&str> = listing.iter().map(|e| e.path.as_str()).collect();
        assert!(!paths.iter().any(|p| p.starts_with("__pycache__")));
        assert!(!paths.contains(&"notes.txt"));
        assert!(paths.contains(&"lib/sub/c.py"));
    }

    #[test]
    fn test_listing_empty_dir_is_listed() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("empty")).unwrap();
        let listing = enumerate_listing(tmp.path(), &FileFilter::default()).unwrap();
        assert_eq!(listing, vec![ManifestEntry::dir("empty", 0)]);
    }

    #[test]
    fn test_listing_requires_directory() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("f.py");
        fs::write(&file, "").unwrap();
        assert!(enumerate_listing(&file, &FileFilter::default()).is_err());
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("*.py", "main.py"));
        assert!(!glob_match("*.py", "main.pyc"));
        assert!(glob_match("test_*", "test_main.py"));
        assert!(glob_match("*cache*", "__pycache__"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exactly"));
    }
}
