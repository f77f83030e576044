//! Infrastructure layer for flowrun.
//!
//! Contains the built-in runner kinds registered against the core
//! `Registry` (console, process execution, files, HTTP, environment and a
//! loopback test server), document loading from JSON/YAML/TOML, and the
//! configuration file loader.

pub mod config;
pub mod loader;
pub mod runner;

pub use loader::{LoadError, load_document};
pub use runner::register_builtins;
