//! Shared domain types for flowrun.
//!
//! This crate contains the data the task engine operates on: the configuration
//! `Value` tree and its unification rules, `Path` addressing, task lifecycle
//! events, and engine configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod path;
pub mod value;

pub use error::DocumentError;
pub use path::{Path, Selector};
pub use value::{Kind, Value};
