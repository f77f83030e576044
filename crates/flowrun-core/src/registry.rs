//! Runner registry: kind identifier to constructor.
//!
//! The registry is built at startup, populated with every kind a host
//! supports, and injected into the engine. Registration goes through a
//! `DashMap` so a shared `Arc<Registry>` can still be extended.

use std::sync::Arc;

use dashmap::DashMap;
use flowrun_types::Value;

use crate::runner::{BoxRunner, Runner, RunnerError};

/// Builds a runner from the resolved task value.
pub type Constructor = Arc<dyn Fn(&Value) -> Result<BoxRunner, RunnerError> + Send + Sync>;

/// Kind of the built-in loopback echo server used by tests.
pub const TEST_SERVER_KIND: &str = "flowrun/test.Server";

/// Historical short names accepted in a task's `kind` field.
pub const LEGACY_KINDS: &[(&str, &str)] = &[
    ("exec", "tool/exec.Run"),
    ("http", "tool/http.Do"),
    ("print", "tool/cli.Print"),
    ("testserver", TEST_SERVER_KIND),
];

/// Map a legacy short name to its canonical kind.
pub fn legacy_kind(name: &str) -> Option<&'static str> {
    LEGACY_KINDS
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, kind)| *kind)
}

/// A registered kind.
pub struct KindEntry {
    pub kind: String,
    /// The shape every task of this kind must unify with.
    pub template: Value,
    pub constructor: Constructor,
}

impl KindEntry {
    pub fn construct(&self, value: &Value) -> Result<BoxRunner, RunnerError> {
        (self.constructor)(value)
    }
}

impl std::fmt::Debug for KindEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KindEntry")
            .field("kind", &self.kind)
            .field("template", &self.template)
            .finish_non_exhaustive()
    }
}

/// Table of runner kinds.
#[derive(Default)]
pub struct Registry {
    kinds: DashMap<String, Arc<KindEntry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for `kind`, replacing any earlier entry.
    pub fn register<F>(&self, kind: impl Into<String>, template: Value, constructor: F)
    where
        F: Fn(&Value) -> Result<BoxRunner, RunnerError> + Send + Sync + 'static,
    {
        let kind = kind.into();
        tracing::debug!(kind = %kind, "registering runner kind");
        let entry = KindEntry {
            kind: kind.clone(),
            template,
            constructor: Arc::new(constructor),
        };
        self.kinds.insert(kind, Arc::new(entry));
    }

    /// Register a kind whose constructor returns a concrete runner type.
    pub fn register_runner<R, F>(&self, kind: impl Into<String>, template: Value, constructor: F)
    where
        R: Runner + 'static,
        F: Fn(&Value) -> Result<R, RunnerError> + Send + Sync + 'static,
    {
        self.register(kind, template, move |value| {
            constructor(value).map(BoxRunner::new)
        });
    }

    pub fn lookup(&self, kind: &str) -> Option<Arc<KindEntry>> {
        self.kinds.get(kind).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.kinds.iter().map(|e| e.key().clone()).collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{RunContext, RunnerFn};

    fn noop(_: &RunContext) -> Result<Option<Value>, RunnerError> {
        Ok(None)
    }

    #[test]
    fn register_and_lookup() {
        let registry = Registry::new();
        assert!(registry.is_empty());
        registry.register_runner("test/b.Run", Value::empty_struct(), |_| Ok(RunnerFn(noop)));
        registry.register_runner("test/a.Run", Value::empty_struct(), |_| Ok(RunnerFn(noop)));

        assert!(registry.contains("test/a.Run"));
        assert!(registry.lookup("test/missing").is_none());
        assert_eq!(registry.kinds(), vec!["test/a.Run", "test/b.Run"]);

        let entry = registry.lookup("test/a.Run").unwrap();
        assert!(entry.construct(&Value::empty_struct()).is_ok());
    }

    #[test]
    fn constructor_errors_surface() {
        let registry = Registry::new();
        registry.register("test/strict.Run", Value::empty_struct(), |_| {
            Err(RunnerError::failed("bad input"))
        });
        let entry = registry.lookup("test/strict.Run").unwrap();
        let err = entry.construct(&Value::Null).unwrap_err();
        assert_eq!(err.to_string(), "bad input");
    }

    #[test]
    fn later_registration_replaces_earlier() {
        let registry = Registry::new();
        registry.register_runner("k", Value::Int(1), |_| Ok(RunnerFn(noop)));
        registry.register_runner("k", Value::Int(2), |_| Ok(RunnerFn(noop)));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("k").unwrap().template, Value::Int(2));
    }

    #[test]
    fn legacy_table() {
        assert_eq!(legacy_kind("exec"), Some("tool/exec.Run"));
        assert_eq!(legacy_kind("print"), Some("tool/cli.Print"));
        assert_eq!(legacy_kind("testserver"), Some(TEST_SERVER_KIND));
        assert_eq!(legacy_kind("shell"), None);
    }
}
