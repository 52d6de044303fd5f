//! Snapshot model and the persisted state store.
//!
//! A snapshot maps normalized relative paths to their resolved per-path
//! metadata. The previous run's snapshot is persisted in `<dst>/.state` as
//! one quoted-CSV record per path:
//!
//! ```text
//! "path","kind",mtime,"flags","preprocessors","compressor"
//! ```
//!
//! `mtime` is an unquoted float (seconds since the epoch); `flags` and
//! `preprocessors` are comma-joined inside one quoted field, with empty
//! lists serialized as the empty string. Embedded quotes double.
//!
//! Alongside the snapshot, `<dst>/.config` captures the current compressor
//! parameters as a small key/value file for the downstream image builder.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;

use thiserror::Error;

use crate::config::CompressorConfig;
use crate::rules::{Compressor, FlagSet};

/// Snapshot filename inside the destination directory.
pub const STATE_FILENAME: &str = ".state";

/// Compressor parameter filename inside the destination directory.
pub const COMPRESSOR_CONFIG_FILENAME: &str = ".config";

/// Error during state store operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StateError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed state record
    #[error("malformed state record on line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    /// Compressor parameter serialization error
    #[error("failed to serialize compressor parameters: {0}")]
    Params(#[from] toml::ser::Error),
}

/// Whether a tracked path is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

impl EntryKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "file" => Some(EntryKind::File),
            "dir" => Some(EntryKind::Dir),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EntryKind::File => "file",
            EntryKind::Dir => "dir",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolved per-path metadata, one per snapshot entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEntry {
    pub kind: EntryKind,
    /// Modification time in seconds since the epoch
    pub mtime: f64,
    pub flags: FlagSet,
    /// Ordered preprocessor names; execution order
    pub preprocessors: Vec<String>,
    pub compressor: Compressor,
}

impl ResolvedEntry {
    /// A directory entry: never transformed, only mirrored.
    pub fn dir(mtime: f64) -> Self {
        Self {
            kind: EntryKind::Dir,
            mtime,
            flags: FlagSet::default(),
            preprocessors: Vec::new(),
            compressor: Compressor::Uncompressed,
        }
    }
}

/// Mapping from normalized relative path to resolved metadata.
pub type Snapshot = BTreeMap<String, ResolvedEntry>;

/// Load the previous run's snapshot from the destination directory.
///
/// A missing state file means a first run and yields an empty snapshot.
pub fn load_state(dst_dir: &Path) -> Result<Snapshot, StateError> {
    let state_file = dst_dir.join(STATE_FILENAME);
    if !state_file.exists() {
        return Ok(Snapshot::new());
    }

    let contents = fs::read_to_string(&state_file)?;
    let mut snapshot = Snapshot::new();

    for (index, line) in contents.lines().enumerate() {
        if line.is_empty() {
            continue;
        }
        let line_no = index + 1;
        let fields = split_record(line).map_err(|reason| StateError::Malformed {
            line: line_no,
            reason,
        })?;
        if fields.len() != 6 {
            return Err(StateError::Malformed {
                line: line_no,
                reason: format!("expected 6 fields, got {}", fields.len()),
            });
        }

        let malformed = |reason: String| StateError::Malformed {
            line: line_no,
            reason,
        };

        let kind = EntryKind::parse(&fields[1])
            .ok_or_else(|| malformed(format!("unknown entry kind '{}'", fields[1])))?;
        let mtime: f64 = fields[2]
            .parse()
            .map_err(|_| malformed(format!("invalid mtime '{}'", fields[2])))?;
        let flags = FlagSet::parse_list(&fields[3])
            .map_err(|name| malformed(format!("unknown flag '{}'", name)))?;
        let preprocessors = if fields[4].is_empty() {
            Vec::new()
        } else {
            fields[4].split(',').map(str::to_string).collect()
        };
        let compressor = Compressor::parse(&fields[5])
            .ok_or_else(|| malformed(format!("unknown compressor '{}'", fields[5])))?;

        snapshot.insert(
            fields[0].clone(),
            ResolvedEntry {
                kind,
                mtime,
                flags,
                preprocessors,
                compressor,
            },
        );
    }

    Ok(snapshot)
}

/// Persist the snapshot and current compressor parameters.
pub fn save_state(
    dst_dir: &Path,
    snapshot: &Snapshot,
    compressors: &CompressorConfig,
) -> Result<(), StateError> {
    fs::create_dir_all(dst_dir)?;

    let mut out = Vec::new();
    for (path, entry) in snapshot {
        writeln!(
            out,
            "{},{},{},{},{},{}",
            quote(path),
            quote(entry.kind.name()),
            entry.mtime,
            quote(&entry.flags.to_string()),
            quote(&entry.preprocessors.join(",")),
            quote(entry.compressor.name()),
        )?;
    }
    fs::write(dst_dir.join(STATE_FILENAME), out)?;

    let params = toml::to_string(compressors)?;
    fs::write(dst_dir.join(COMPRESSOR_CONFIG_FILENAME), params)?;

    Ok(())
}

/// Quote one CSV field, doubling embedded quotes.
fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// Split one state record into fields.
///
/// Quoted fields may contain commas and doubled quotes; the numeric mtime
/// field is unquoted.
fn split_record(line: &str) -> Result<Vec<String>, String> {
    let mut fields = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        let mut field = String::new();
        match chars.peek() {
            Some('"') => {
                chars.next();
                loop {
                    match chars.next() {
                        Some('"') => {
                            if chars.peek() == Some(&'"') {
                                chars.next();
                                field.push('"');
                            } else {
                                break;
                            }
                        }
                        Some(c) => field.push(c),
                        None => return Err("unterminated quoted field".to_string()),
                    }
                }
            }
            _ => {
                while let Some(&c) = chars.peek() {
                    if c == ',' {
                        break;
                    }
                    chars.next();
                    field.push(c);
                }
            }
        }
        fields.push(field);

        match chars.next() {
            Some(',') => continue,
            None => break,
            Some(c) => return Err(format!("unexpected character '{}' after field", c)),
        }
    }

    Ok(fields)
}
