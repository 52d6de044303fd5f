//! treeprep - command-line incremental asset preprocessor

use std::process::ExitCode;

use treeprep::cli;

fn main() -> ExitCode {
    cli::run()
}
