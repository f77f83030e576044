//! Observability for flowrun: tracing subscriber setup with optional
//! OpenTelemetry export.

pub mod tracing_setup;

pub use tracing_setup::{TracingOptions, bootstrap_subscriber, init_tracing, shutdown_tracing};
