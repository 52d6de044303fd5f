//! treeprep - incremental asset preprocessing for embedded filesystem images
//!
//! Given a source tree and a declarative rule set, this library decides per
//! path which preprocessor pipeline, compression method, and packaging
//! flags apply, then performs the minimal filesystem operations needed to
//! bring a destination tree up to date, tracking state across runs so
//! unchanged files are not reprocessed. A downstream image builder consumes
//! the destination tree together with the persisted state.

pub mod cli;
pub mod config;
pub mod pipeline;
pub mod reconcile;
pub mod rules;
pub mod scan;
pub mod state;
