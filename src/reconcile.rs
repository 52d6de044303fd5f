//! Snapshot reconciliation: diffing old against new state and applying the
//! minimal set of destination updates.
//!
//! A tracked path counts as modified when its kind changed, its resolved
//! preprocessor sequence changed (order-sensitive), or its modification
//! time moved forward. Compressor-only and flag-only differences do NOT
//! trigger reprocessing: the destination bytes would be identical, and the
//! downstream image builder reads both values from the state file anyway.
//! This matches the legacy behavior of existing builds.

use std::fmt;
use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::pipeline::{Executor, PipelineError};
use crate::state::{EntryKind, ResolvedEntry, Snapshot};

/// Error while applying reconciliation changes.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReconcileError {
    /// IO error while deleting or replacing destination entries
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Pipeline execution failure
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// The outcome of diffing two snapshots.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Changes {
    /// Paths present in the old snapshot only
    pub deletions: Vec<String>,
    /// Paths present in the new snapshot only
    pub additions: Vec<String>,
    /// Paths present in both whose resolved state requires reprocessing
    pub modifications: Vec<String>,
}

impl Changes {
    /// True when the run has nothing to do.
    pub fn is_empty(&self) -> bool {
        self.deletions.is_empty() && self.additions.is_empty() && self.modifications.is_empty()
    }

    pub fn total(&self) -> usize {
        self.deletions.len() + self.additions.len() + self.modifications.len()
    }
}

impl fmt::Display for Changes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} added, {} modified, {} deleted",
            self.additions.len(),
            self.modifications.len(),
            self.deletions.len()
        )
    }
}

/// Diff the old snapshot against the new one.
///
/// Both snapshots are ordered maps, so the change lists come out sorted
/// and the whole diff is deterministic.
pub fn diff(old: &Snapshot, new: &Snapshot) -> Changes {
    let mut changes = Changes::default();

    for path in old.keys() {
        if !new.contains_key(path) {
            changes.deletions.push(path.clone());
        }
    }

    for (path, entry) in new {
        match old.get(path) {
            None => changes.additions.push(path.clone()),
            Some(previous) => {
                if is_modified(previous, entry) {
                    changes.modifications.push(path.clone());
                }
            }
        }
    }

    changes
}

fn is_modified(old: &ResolvedEntry, new: &ResolvedEntry) -> bool {
    old.kind != new.kind || old.preprocessors != new.preprocessors || old.mtime < new.mtime
}

/// Apply a non-empty set of changes to the destination tree.
///
/// Deletions are removed first (recursively for directories), then
/// modifications, then additions: a kind change must clear the stale
/// destination entry before new children can land under it. A modified
/// file always has its destination removed before reprocessing; a modified
/// directory whose kind is unchanged keeps its children and is only
/// re-created in place. An added path is pre-removed only when the
/// existing destination entry has the wrong kind.
pub fn apply(
    changes: &Changes,
    new: &Snapshot,
    executor: &Executor<'_>,
    dst_dir: &Path,
) -> Result<(), ReconcileError> {
    for path in &changes.deletions {
        remove_dest(&dst_dir.join(path))?;
    }

    for path in &changes.modifications {
        let entry = &new[path];
        let dst = dst_dir.join(path);
        if entry.kind == EntryKind::File || kind_mismatch(&dst, entry) {
            remove_dest(&dst)?;
        }
        executor.materialize(path, entry)?;
    }

    for path in &changes.additions {
        let entry = &new[path];
        let dst = dst_dir.join(path);
        if dst.exists() && kind_mismatch(&dst, entry) {
            remove_dest(&dst)?;
        }
        executor.materialize(path, entry)?;
    }

    Ok(())
}

fn kind_mismatch(dst: &Path, entry: &ResolvedEntry) -> bool {
    dst.is_dir() != (entry.kind == EntryKind::Dir)
}

fn remove_dest(dst: &Path) -> Result<(), std::io::Error> {
    match fs::symlink_metadata(dst) {
        Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(dst),
        Ok(_) => fs::remove_file(dst),
        // already gone
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
