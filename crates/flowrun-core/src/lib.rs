//! Task engine for flowrun.
//!
//! Given a document describing named tasks and their data dependencies, the
//! engine discovers tasks, derives a dependency graph from references,
//! rejects cycles, and runs independent tasks concurrently, unifying each
//! task's result back into the shared document.
//!
//! - `document` -- the read/merge contract and the in-memory tree adapter
//! - `runner` -- the pluggable `Runner` trait and its execution context
//! - `registry` -- kind identifier to runner constructor table
//! - `classify` -- decides which nodes are tasks
//! - `analyze` -- reference-driven dependency graph
//! - `cycle` -- depth-first cycle detection
//! - `event` -- broadcast bus for task lifecycle events
//! - `executor` -- the concurrent scheduler

pub mod analyze;
pub mod classify;
pub mod cycle;
pub mod document;
pub mod error;
pub mod event;
pub mod executor;
pub mod registry;
pub mod runner;

pub use document::{Document, Reference, TreeDocument};
pub use error::FlowError;
pub use executor::{Engine, EngineConfig, Plan, RunReport};
pub use registry::Registry;
pub use runner::{BoxRunner, RunContext, Runner, RunnerError, RunnerFn, Stdio};
