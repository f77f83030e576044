//! Task discovery and classification.
//!
//! A node is a task when it is a struct below the root carrying either a
//! `$id` kind discriminator or a legacy `kind` short name from
//! [`LEGACY_KINDS`](crate::registry::LEGACY_KINDS). Everything else is data.

use std::sync::Arc;

use flowrun_types::config::Discovery;
use flowrun_types::{Path, Value};

use crate::document::Document;
use crate::error::FlowError;
use crate::registry::{legacy_kind, KindEntry, Registry};

/// Field holding a task's kind identifier.
pub const KIND_FIELD: &str = "$id";

/// Field holding a legacy short kind name.
pub const LEGACY_KIND_FIELD: &str = "kind";

/// A discovered task, before scheduling.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    /// Position in discovery order; also the task's graph node index.
    pub index: usize,
    pub path: Path,
    pub kind: String,
    pub entry: Arc<KindEntry>,
    /// Classified through the legacy alias table.
    pub legacy: bool,
}

/// Decides which document nodes are tasks.
pub struct Classifier<'a> {
    registry: &'a Registry,
    discovery: Discovery,
}

impl<'a> Classifier<'a> {
    pub fn new(registry: &'a Registry, discovery: Discovery) -> Self {
        Self {
            registry,
            discovery,
        }
    }

    /// Find every task under `root`, validate each against its kind's
    /// template, and fill the template into the document.
    ///
    /// Discovery runs once; tasks that only appear after later merges are
    /// not picked up.
    pub fn discover<D: Document>(
        &self,
        doc: &mut D,
        root: &Path,
    ) -> Result<Vec<TaskSpec>, FlowError> {
        let root = doc.canonical(root);
        let top = doc.lookup(&root)?;

        let mut tasks = Vec::new();
        match self.discovery {
            Discovery::NamedChildren => {
                if let Some(fields) = top.as_struct() {
                    for name in fields.keys() {
                        let path = root.child(name.as_str());
                        if let Some(task) = self.classify(&*doc, &path, tasks.len())? {
                            tasks.push(task);
                        }
                    }
                }
            }
            Discovery::ByShape => self.walk(&*doc, &root, &top, &root, &mut tasks)?,
        }

        for task in &tasks {
            self.apply_template(doc, task)?;
        }

        tracing::debug!(
            root = %root,
            discovery = ?self.discovery,
            tasks = tasks.len(),
            "discovered tasks"
        );
        Ok(tasks)
    }

    /// Depth-first search over the raw tree. Task subtrees and references
    /// are not entered.
    fn walk<D: Document>(
        &self,
        doc: &D,
        root: &Path,
        node: &Value,
        at: &Path,
        tasks: &mut Vec<TaskSpec>,
    ) -> Result<(), FlowError> {
        if at != root && node.is_struct() {
            if let Some(task) = self.classify(doc, at, tasks.len())? {
                tasks.push(task);
                return Ok(());
            }
        }
        match node {
            Value::Struct(fields) => {
                for (name, child) in fields {
                    self.walk(doc, root, child, &at.child(name.as_str()), tasks)?;
                }
            }
            Value::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    self.walk(doc, root, item, &at.index(i), tasks)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Classify the node at `path`. `Ok(None)` means "not a task".
    pub fn classify<D: Document>(
        &self,
        doc: &D,
        path: &Path,
        index: usize,
    ) -> Result<Option<TaskSpec>, FlowError> {
        if path.is_root() {
            return Ok(None);
        }
        let value = doc.resolve(path)?;
        if !value.is_struct() {
            return Ok(None);
        }

        let (kind, legacy) = match value.get(KIND_FIELD) {
            Some(Value::String(kind)) => (kind.clone(), false),
            Some(other) => {
                return Err(FlowError::InvalidKind {
                    task: path.clone(),
                    reason: format!(
                        "{KIND_FIELD} must be a concrete string, found {}",
                        other.kind()
                    ),
                });
            }
            None => {
                let alias = value
                    .get(LEGACY_KIND_FIELD)
                    .and_then(Value::as_str)
                    .and_then(legacy_kind);
                match alias {
                    Some(kind) => (kind.to_string(), true),
                    None => return Ok(None),
                }
            }
        };

        let entry = self
            .registry
            .lookup(&kind)
            .ok_or_else(|| FlowError::RunnerNotFound {
                task: path.clone(),
                kind: kind.clone(),
            })?;

        value
            .unify(&entry.template, path)
            .map_err(|source| FlowError::TemplateMismatch {
                task: path.clone(),
                kind: kind.clone(),
                source,
            })?;

        tracing::trace!(task = %path, kind = %kind, legacy, "classified task");
        Ok(Some(TaskSpec {
            index,
            path: path.clone(),
            kind,
            entry,
            legacy,
        }))
    }

    fn apply_template<D: Document>(&self, doc: &mut D, task: &TaskSpec) -> Result<(), FlowError> {
        doc.fill(&task.path, &task.entry.template)
            .map_err(|source| FlowError::TemplateMismatch {
                task: task.path.clone(),
                kind: task.kind.clone(),
                source,
            })
    }
}
