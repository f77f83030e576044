//! Tracing subscriber initialization with structured logging and optional
//! OpenTelemetry trace export.
//!
//! # Usage
//!
//! ```no_run
//! use flowrun_observe::tracing_setup::{TracingOptions, init_tracing};
//!
//! // Human-readable logs at the default level
//! init_tracing(&TracingOptions::default()).unwrap();
//! ```
//!
//! Logs go to stderr so task output on stdout stays clean.

use std::sync::OnceLock;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Stores the OTel tracer provider so it can be shut down cleanly on exit.
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// How the global subscriber is assembled.
#[derive(Debug, Clone)]
pub struct TracingOptions {
    /// Filter directives used when `RUST_LOG` is not set.
    pub filter: String,
    /// One JSON object per event instead of human-readable lines.
    pub json: bool,
    /// Bridge spans to OpenTelemetry with a stdout exporter.
    pub otel: bool,
}

impl Default for TracingOptions {
    fn default() -> Self {
        Self {
            filter: "warn".to_string(),
            json: false,
            otel: false,
        }
    }
}

impl TracingOptions {
    /// Default filter for a `-v` count and `--quiet` flag.
    pub fn filter_for_verbosity(verbose: u8, quiet: bool) -> &'static str {
        match verbose {
            0 if quiet => "error",
            0 => "warn",
            1 => "info,flowrun=debug",
            2 => "debug",
            _ => "trace",
        }
    }
}

/// A warnings-only stderr subscriber for use (via
/// `tracing::subscriber::set_default`) before [`init_tracing`] runs, such as
/// while loading the configuration that decides the real setup.
pub fn bootstrap_subscriber() -> impl tracing::Subscriber + Send + Sync {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(tracing::Level::WARN)
        .with_target(false)
        .finish()
}

/// Initialize the global tracing subscriber.
///
/// - `RUST_LOG` takes precedence over [`TracingOptions::filter`].
/// - When `otel` is set, spans are additionally exported through
///   OpenTelemetry to stdout (local development; swap the exporter for OTLP
///   in production).
///
/// # Errors
///
/// Returns an error if a global subscriber has already been set.
pub fn init_tracing(options: &TracingOptions) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&options.filter));

    let json_layer = options.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_span_events(FmtSpan::CLOSE)
    });
    let text_layer = (!options.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
    });

    let otel_layer = if options.otel {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let tracer = provider.tracer("flowrun");

        let _ = TRACER_PROVIDER.set(provider.clone());
        opentelemetry::global::set_tracer_provider(provider);
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(otel_layer)
        .try_init()?;

    Ok(())
}

/// Flush pending traces and shut down the OpenTelemetry tracer provider.
///
/// No-op when OTel was not enabled.
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            eprintln!("Warning: OTel tracer provider shutdown error: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_filters() {
        assert_eq!(TracingOptions::filter_for_verbosity(0, true), "error");
        assert_eq!(TracingOptions::filter_for_verbosity(0, false), "warn");
        assert_eq!(TracingOptions::filter_for_verbosity(1, false), "info,flowrun=debug");
        assert_eq!(TracingOptions::filter_for_verbosity(5, false), "trace");
    }

    #[test]
    fn second_init_fails() {
        let options = TracingOptions {
            json: true,
            ..TracingOptions::default()
        };
        assert!(init_tracing(&options).is_ok());
        assert!(init_tracing(&options).is_err());
        shutdown_tracing();
    }
}
