//! Source tree scanning.
//!
//! Walks the source tree (following symlinks) and produces the fresh
//! snapshot: one [`ResolvedEntry`] per directory and file, with files
//! resolved through the rule table. Paths that vanish between listing and
//! stat are skipped for this run; that race is a best-effort concern, not
//! an error.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::UNIX_EPOCH;

use thiserror::Error;
use walkdir::WalkDir;

use crate::rules::RuleTable;
use crate::state::{EntryKind, ResolvedEntry, Snapshot};

/// Error during tree scanning.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ScanError {
    /// Source directory missing or unreadable
    #[error("cannot scan source directory {path}: {source}")]
    SourceDir {
        path: String,
        source: std::io::Error,
    },
}

/// Scan the source tree into a snapshot.
///
/// Returns the snapshot plus the set of distinct preprocessor names
/// encountered during resolution, which drives tool provisioning.
pub fn scan(src_dir: &Path, rules: &RuleTable) -> Result<(Snapshot, BTreeSet<String>), ScanError> {
    // A missing root must not masquerade as an empty tree: that would make
    // reconciliation delete the whole destination.
    std::fs::metadata(src_dir).map_err(|source| ScanError::SourceDir {
        path: src_dir.display().to_string(),
        source,
    })?;

    let mut snapshot = Snapshot::new();
    let mut used = BTreeSet::new();

    for entry in WalkDir::new(src_dir).follow_links(true) {
        // Entries that error mid-walk have vanished or turned unreadable
        // between listing and stat; skip them for this run.
        let Ok(entry) = entry else { continue };
        if entry.depth() == 0 {
            continue;
        }

        let Some(rel) = normalize(src_dir, entry.path()) else {
            continue;
        };
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0.0, |d| d.as_secs_f64());

        let resolved = if metadata.is_dir() {
            ResolvedEntry::dir(mtime)
        } else {
            let resolution = rules.resolve(&rel);
            used.extend(resolution.used);
            ResolvedEntry {
                kind: EntryKind::File,
                mtime,
                flags: resolution.flags,
                preprocessors: resolution.preprocessors,
                compressor: resolution.compressor,
            }
        };

        snapshot.insert(rel, resolved);
    }

    Ok((snapshot, used))
}

/// Normalize a path to its root-relative, forward-slash form.
fn normalize(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Compressor;
    use std::collections::BTreeSet;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::TempDir;

    fn create_file(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        File::create(&path)
            .unwrap()
            .write_all(content.as_bytes())
            .unwrap();
    }

    fn js_table() -> RuleTable {
        let filters = vec![
            ("*".to_string(), vec!["gzip".to_string()]),
            ("*.js".to_string(), vec!["terser".to_string()]),
        ];
        let names: BTreeSet<String> = ["terser".to_string()].into_iter().collect();
        RuleTable::from_filters(&filters, &names).unwrap()
    }

    #[test]
    fn test_scan_missing_root_is_error() {
        let temp = TempDir::new().unwrap();
        let result = scan(&temp.path().join("nope"), &js_table());
        assert!(matches!(result, Err(ScanError::SourceDir { .. })));
    }

    #[test]
    fn test_scan_records_files_and_dirs() {
        let temp = TempDir::new().unwrap();
        create_file(temp.path(), "index.html", "<html></html>");
        create_file(temp.path(), "js/app.js", "let x = 1;");

        let (snapshot, used) = scan(temp.path(), &js_table()).unwrap();

        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot["js"].kind, EntryKind::Dir);
        assert_eq!(snapshot["js"].compressor, Compressor::Uncompressed);
        assert!(snapshot["js"].preprocessors.is_empty());

        let app = &snapshot["js/app.js"];
        assert_eq!(app.kind, EntryKind::File);
        assert_eq!(app.preprocessors, vec!["terser"]);
        assert_eq!(app.compressor, Compressor::Gzip);
        assert!(app.mtime > 0.0);

        assert_eq!(snapshot["index.html"].compressor, Compressor::Gzip);
        assert!(used.contains("terser"));
    }

    #[test]
    fn test_scan_paths_are_normalized() {
        let temp = TempDir::new().unwrap();
        create_file(temp.path(), "a/b/c.txt", "x");

        let (snapshot, _) = scan(temp.path(), &js_table()).unwrap();
        assert!(snapshot.contains_key("a/b/c.txt"));
        for path in snapshot.keys() {
            assert!(!path.starts_with('/'));
            assert!(!path.starts_with("./"));
        }
    }

    #[test]
    fn test_scan_empty_tree() {
        let temp = TempDir::new().unwrap();
        let (snapshot, used) = scan(temp.path(), &js_table()).unwrap();
        assert!(snapshot.is_empty());
        assert!(used.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_follows_symlinks() {
        let temp = TempDir::new().unwrap();
        create_file(temp.path(), "real/data.txt", "x");
        std::os::unix::fs::symlink(temp.path().join("real"), temp.path().join("link")).unwrap();

        let (snapshot, _) = scan(temp.path(), &js_table()).unwrap();
        assert!(snapshot.contains_key("link/data.txt"));
        assert_eq!(snapshot["link"].kind, EntryKind::Dir);
    }
}
