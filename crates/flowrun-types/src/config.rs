//! Engine configuration types.
//!
//! `FlowConfig` is the on-disk form (`flowrun.toml`); every field has a
//! default so an empty file is valid.

use serde::{Deserialize, Serialize};

use crate::path::Path;

/// How tasks are found under the configured root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Discovery {
    /// Only the direct children of the root are candidates.
    #[default]
    NamedChildren,
    /// Every struct below the root is a candidate; task subtrees are not
    /// searched further.
    ByShape,
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowConfig {
    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub log: LogSettings,
}

/// Engine switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Path of the struct holding the command's tasks.
    #[serde(default)]
    pub root: Path,

    #[serde(default)]
    pub discovery: Discovery,

    /// Let runners see values that still contain incomplete references.
    #[serde(default)]
    pub allow_incomplete: bool,

    /// Capacity of the task event channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_event_capacity() -> usize {
    256
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            root: Path::root(),
            discovery: Discovery::default(),
            allow_incomplete: false,
            event_capacity: default_event_capacity(),
        }
    }
}

/// Logging output settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogSettings {
    /// Emit JSON log lines instead of human-readable ones.
    #[serde(default)]
    pub json: bool,

    /// Bridge spans to OpenTelemetry (stdout exporter).
    #[serde(default)]
    pub otel: bool,

    /// Filter directive used when `RUST_LOG` is unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: FlowConfig = toml::from_str("").unwrap();
        assert!(config.engine.root.is_root());
        assert_eq!(config.engine.discovery, Discovery::NamedChildren);
        assert!(!config.engine.allow_incomplete);
        assert_eq!(config.engine.event_capacity, 256);
        assert!(!config.log.json);
        assert!(config.log.filter.is_none());
    }

    #[test]
    fn values_are_read() {
        let config: FlowConfig = toml::from_str(
            r#"
[engine]
root = "command.deploy"
discovery = "by_shape"
allow_incomplete = true

[log]
json = true
filter = "flowrun=debug"
"#,
        )
        .unwrap();
        assert_eq!(config.engine.root.to_string(), "command.deploy");
        assert_eq!(config.engine.discovery, Discovery::ByShape);
        assert!(config.engine.allow_incomplete);
        assert!(config.log.json);
        assert_eq!(config.log.filter.as_deref(), Some("flowrun=debug"));
    }

    #[test]
    fn bad_discovery_is_rejected() {
        let result: Result<FlowConfig, _> = toml::from_str("[engine]\ndiscovery = \"lazy\"\n");
        assert!(result.is_err());
    }
}
