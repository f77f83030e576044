//! Engine error type.

use flowrun_types::{DocumentError, Path};
use thiserror::Error;

use crate::runner::RunnerError;

/// Errors that end a run. Only the first one observed is reported.
#[derive(Debug, Error)]
pub enum FlowError {
    // ------ Detected before scheduling ------
    /// A task names a kind nothing registered.
    #[error("task {task}: runner of kind \"{kind}\" not found")]
    RunnerNotFound { task: Path, kind: String },

    /// The `$id` discriminator is present but not a concrete string.
    #[error("task {task}: invalid kind: {reason}")]
    InvalidKind { task: Path, reason: String },

    /// The task does not fit the shape its kind requires.
    #[error("task {task}: does not match template of \"{kind}\": {source}")]
    TemplateMismatch {
        task: Path,
        kind: String,
        #[source]
        source: DocumentError,
    },

    /// The task dependency graph is not acyclic.
    #[error("cyclic dependency in tasks (involving {involving})")]
    CyclicDependency { involving: Path },

    // ------ Detected while running ------
    /// The runner constructor rejected the task value.
    #[error("task {task}: could not create runner: {source}")]
    Construction {
        task: Path,
        #[source]
        source: RunnerError,
    },

    /// The runner returned an error.
    #[error("task {task}: {source}")]
    Execution {
        task: Path,
        #[source]
        source: RunnerError,
    },

    /// The runner's output could not be unified into the document.
    #[error("task {task}: could not merge result: {source}")]
    Merge {
        task: Path,
        #[source]
        source: DocumentError,
    },

    /// A referenced value was still incomplete when the task started.
    #[error("task {task}: incomplete value at {reference}")]
    IncompleteInput { task: Path, reference: Path },

    /// A task unit panicked.
    #[error("task {task}: panicked: {message}")]
    Panicked { task: Path, message: String },

    /// The host cancelled the run.
    #[error("run cancelled")]
    Interrupted,

    #[error("document error: {0}")]
    Document(#[from] DocumentError),
}

impl FlowError {
    /// The task the error is attributed to, if any.
    pub fn task(&self) -> Option<&Path> {
        match self {
            FlowError::RunnerNotFound { task, .. }
            | FlowError::InvalidKind { task, .. }
            | FlowError::TemplateMismatch { task, .. }
            | FlowError::Construction { task, .. }
            | FlowError::Execution { task, .. }
            | FlowError::Merge { task, .. }
            | FlowError::IncompleteInput { task, .. }
            | FlowError::Panicked { task, .. } => Some(task),
            FlowError::CyclicDependency { involving } => Some(involving),
            FlowError::Interrupted | FlowError::Document(_) => None,
        }
    }

    /// True for errors raised before any runner could start.
    pub fn is_classification(&self) -> bool {
        matches!(
            self,
            FlowError::RunnerNotFound { .. }
                | FlowError::InvalidKind { .. }
                | FlowError::TemplateMismatch { .. }
                | FlowError::CyclicDependency { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> Path {
        Path::parse(s).unwrap()
    }

    #[test]
    fn runner_not_found_message() {
        let err = FlowError::RunnerNotFound {
            task: path("tasks.x"),
            kind: "tool/nope.Run".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "task tasks.x: runner of kind \"tool/nope.Run\" not found"
        );
        assert!(err.is_classification());
    }

    #[test]
    fn cycle_message_mentions_cyclic_dependency() {
        let err = FlowError::CyclicDependency {
            involving: path("tasks.a"),
        };
        assert!(err.to_string().starts_with("cyclic dependency in tasks"));
        assert_eq!(err.task().unwrap().to_string(), "tasks.a");
    }

    #[test]
    fn execution_error_wraps_runner_message() {
        let err = FlowError::Execution {
            task: path("tasks.build"),
            source: RunnerError::Failed("exit status 2".to_string()),
        };
        assert_eq!(err.to_string(), "task tasks.build: exit status 2");
        assert!(!err.is_classification());
    }
}
