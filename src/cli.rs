//! Command-line interface and top-level run orchestration.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use thiserror::Error;

use crate::config::{load_config, ConfigError};
use crate::pipeline::{Executor, PipelineError};
use crate::reconcile::{self, ReconcileError};
use crate::rules::{RuleError, RuleTable};
use crate::scan::{scan, ScanError};
use crate::state::{load_state, save_state, StateError};

pub(crate) const EXIT_SUCCESS: u8 = 0;
pub(crate) const EXIT_ERROR: u8 = 1;

/// treeprep - incremental asset preprocessing for embedded filesystem images
#[derive(Debug, Parser)]
#[command(name = "treeprep")]
#[command(about = "Preprocess a source tree into a staging tree for an embedded filesystem image")]
#[command(version)]
pub struct Cli {
    /// Source directory
    #[arg(value_name = "SRC")]
    pub src_dir: PathBuf,

    /// Destination directory
    #[arg(value_name = "DST")]
    pub dst_dir: PathBuf,

    /// User configuration file, merged over the built-in defaults
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Working directory for preprocessor invocation and tool installation
    #[arg(long, value_name = "ROOT")]
    pub root: Option<PathBuf>,

    /// Print per-path progress
    #[arg(short, long)]
    pub verbose: bool,
}

/// Any fatal error on the way from configuration to persisted state.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Rules(#[from] RuleError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

/// CLI entry point.
pub fn run() -> ExitCode {
    let cli = Cli::parse();
    match preprocess(&cli) {
        Ok(changed) => {
            if cli.verbose && !changed {
                println!("Up to date");
            }
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

/// Run one full preprocessing pass.
///
/// Returns whether any destination change was applied. When the diff is
/// empty nothing is written - not even the state file - so an unchanged
/// tree is a true no-op.
pub fn preprocess(cli: &Cli) -> Result<bool, RunError> {
    let config = load_config(cli.config.as_deref())?;
    let rules = RuleTable::build(&config)?;

    let old_state = load_state(&cli.dst_dir)?;
    let (new_state, used) = scan(&cli.src_dir, &rules)?;

    let changes = reconcile::diff(&old_state, &new_state);
    if changes.is_empty() {
        return Ok(false);
    }

    if cli.verbose {
        println!("Applying changes: {}", changes);
    }

    let root = match &cli.root {
        Some(root) => root.clone(),
        None => std::env::current_dir().map_err(|e| RunError::Reconcile(e.into()))?,
    };

    let executor = Executor::new(
        &config.preprocessors,
        cli.src_dir.clone(),
        cli.dst_dir.clone(),
        root,
    )
    .with_verbose(cli.verbose);

    executor.provision(&used)?;
    std::fs::create_dir_all(&cli.dst_dir).map_err(|e| RunError::Reconcile(e.into()))?;
    reconcile::apply(&changes, &new_state, &executor, &cli.dst_dir)?;

    // Only now is the new snapshot the truth on disk.
    save_state(&cli.dst_dir, &new_state, &config.compressors)?;

    if cli.verbose {
        println!("Done: {}", changes);
    }
    Ok(true)
}
