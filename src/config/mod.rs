//! Configuration loading and merging.
//!
//! Configuration is JSON with three sections: `preprocessors` (external
//! tool definitions), `compressors` (codec parameters for the downstream
//! image builder), and `filters` (pattern to action-list pairs). A built-in
//! default configuration ships with the binary; an optional user file is
//! merged over it.

pub mod loader;
pub mod schema;

pub use loader::*;
pub use schema::*;
