//! Pipeline execution: mirroring directories and running per-file
//! preprocessor chains.
//!
//! For a file, the executor reads the source bytes and pipes them through
//! each resolved preprocessor in order - the output of one stage is the
//! input of the next - then writes the result to the destination. Each
//! stage is an external program invoked with an explicit working directory;
//! input arrives on stdin and output is read from stdout. Compression is
//! never applied here: the compressor choice travels in the state file for
//! the downstream image builder.
//!
//! Any stage failure is fatal to the whole run. There is no partial
//! pipeline recovery; the next invocation retries affected paths because
//! the old state file is only replaced after a fully successful run.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;

use crate::config::PreprocessorConfig;
use crate::state::{EntryKind, ResolvedEntry};

/// Error during pipeline execution or tool provisioning.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PipelineError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// A resolved preprocessor has no definition in the configuration
    #[error("preprocessor '{0}' is not defined in the configuration")]
    UnknownPreprocessor(String),
    /// A preprocessor could not be started
    #[error("failed to start preprocessor '{tool}': {source}")]
    Spawn {
        tool: String,
        source: std::io::Error,
    },
    /// A preprocessor exited with a non-zero status
    #[error("preprocessor '{tool}' failed for '{path}': {detail}")]
    Failed {
        tool: String,
        path: String,
        detail: String,
    },
    /// A tool install command failed
    #[error("failed to install preprocessor '{tool}': {detail}")]
    Install { tool: String, detail: String },
}

/// Executes the per-path pipeline against a source and destination tree.
pub struct Executor<'a> {
    preprocessors: &'a BTreeMap<String, PreprocessorConfig>,
    src_dir: PathBuf,
    dst_dir: PathBuf,
    /// Working directory for preprocessor invocation and installation
    root: PathBuf,
    verbose: bool,
}

impl<'a> Executor<'a> {
    pub fn new(
        preprocessors: &'a BTreeMap<String, PreprocessorConfig>,
        src_dir: PathBuf,
        dst_dir: PathBuf,
        root: PathBuf,
    ) -> Self {
        Self {
            preprocessors,
            src_dir,
            dst_dir,
            root,
            verbose: false,
        }
    }

    /// Set verbose mode.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Provision every used preprocessor that declares an install command.
    ///
    /// A `creates` stamp path (relative to the root) marks a tool as
    /// already provisioned. Install failures abort the run.
    pub fn provision(&self, used: &BTreeSet<String>) -> Result<(), PipelineError> {
        for name in used {
            let config = self.lookup(name)?;
            let Some(install) = &config.install else {
                continue;
            };
            if let Some(creates) = &config.creates {
                if self.root.join(creates).exists() {
                    continue;
                }
            }
            if install.is_empty() {
                continue;
            }

            if self.verbose {
                println!("Installing {}...", name);
            }
            let status = Command::new(&install[0])
                .args(&install[1..])
                .current_dir(&self.root)
                .status()
                .map_err(|e| PipelineError::Install {
                    tool: name.clone(),
                    detail: e.to_string(),
                })?;
            if !status.success() {
                return Err(PipelineError::Install {
                    tool: name.clone(),
                    detail: format!("install command exited with {}", status),
                });
            }
        }
        Ok(())
    }

    /// Materialize one path in the destination tree.
    ///
    /// Directories are created if absent (idempotent). Files are read from
    /// the source, passed through their preprocessor chain, and written to
    /// the destination, creating parent directories as needed.
    pub fn materialize(&self, rel: &str, entry: &ResolvedEntry) -> Result<(), PipelineError> {
        let dst = self.dst_dir.join(rel);

        if entry.kind == EntryKind::Dir {
            fs::create_dir_all(&dst)?;
            return Ok(());
        }

        let mut data = fs::read(self.src_dir.join(rel))?;
        for name in &entry.preprocessors {
            if self.verbose {
                println!("  {} <- {}", rel, name);
            }
            data = self.run_stage(name, rel, data)?;
        }

        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&dst, data)?;
        Ok(())
    }

    /// Run one preprocessor stage as a byte-stream transform.
    fn run_stage(&self, name: &str, rel: &str, input: Vec<u8>) -> Result<Vec<u8>, PipelineError> {
        let command = &self.lookup(name)?.command;

        let mut child = Command::new(&command[0])
            .args(&command[1..])
            .current_dir(&self.root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| PipelineError::Spawn {
                tool: name.to_string(),
                source,
            })?;

        // Feed stdin from a thread; the tool may produce output before it
        // has consumed all input, and a single-threaded write could
        // deadlock on full pipes.
        let stdin = child.stdin.take();
        let writer = std::thread::spawn(move || {
            if let Some(mut stdin) = stdin {
                // Write errors show up as a failure status or truncated
                // output; some tools legitimately exit before draining.
                let _ = stdin.write_all(&input);
            }
        });

        let output = child.wait_with_output()?;
        let _ = writer.join();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = match stderr.trim() {
                "" => format!("exited with {}", output.status),
                msg => format!("exited with {}: {}", output.status, msg),
            };
            return Err(PipelineError::Failed {
                tool: name.to_string(),
                path: rel.to_string(),
                detail,
            });
        }

        Ok(output.stdout)
    }

    fn lookup(&self, name: &str) -> Result<&PreprocessorConfig, PipelineError> {
        self.preprocessors
            .get(name)
            .ok_or_else(|| PipelineError::UnknownPreprocessor(name.to_string()))
    }
}
