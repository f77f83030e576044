//! Application state shared by the CLI commands.

use std::sync::Arc;

use flowrun_core::Registry;
use flowrun_types::config::FlowConfig;

/// Configuration and the runner registry every command works from.
pub struct AppState {
    pub config: FlowConfig,
    pub registry: Arc<Registry>,
}

impl AppState {
    /// Register the built-in runner kinds against a fresh registry.
    pub fn new(config: FlowConfig) -> Self {
        let registry = Registry::new();
        flowrun_infra::register_builtins(&registry);
        Self {
            config,
            registry: Arc::new(registry),
        }
    }
}
