//! Task lifecycle states and the events the engine publishes about them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::path::Path;

/// Where a task is in its lifecycle.
///
/// `Pending -> Waiting -> Running -> {Done | Failed}`; a task that never
/// reaches `Running` because the run was stopped ends as `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Waiting,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl TaskState {
    /// True once the task will not change state again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Done | TaskState::Failed | TaskState::Cancelled)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::Waiting => "waiting",
            TaskState::Running => "running",
            TaskState::Done => "done",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// An event published by the scheduler while a run progresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskEvent {
    /// The task is blocked on its dependencies.
    Waiting {
        run_id: Uuid,
        task: Path,
        dependencies: Vec<Path>,
        at: DateTime<Utc>,
    },
    /// The task's runner was invoked.
    Started {
        run_id: Uuid,
        task: Path,
        kind: String,
        at: DateTime<Utc>,
    },
    /// The runner succeeded and its output was merged.
    Completed {
        run_id: Uuid,
        task: Path,
        duration_ms: u64,
        at: DateTime<Utc>,
    },
    /// The task ended in error.
    Failed {
        run_id: Uuid,
        task: Path,
        error: String,
        at: DateTime<Utc>,
    },
    /// The task exited without running, or its result was discarded.
    Cancelled {
        run_id: Uuid,
        task: Path,
        at: DateTime<Utc>,
    },
}

impl TaskEvent {
    pub fn task(&self) -> &Path {
        match self {
            TaskEvent::Waiting { task, .. }
            | TaskEvent::Started { task, .. }
            | TaskEvent::Completed { task, .. }
            | TaskEvent::Failed { task, .. }
            | TaskEvent::Cancelled { task, .. } => task,
        }
    }

    pub fn run_id(&self) -> Uuid {
        match self {
            TaskEvent::Waiting { run_id, .. }
            | TaskEvent::Started { run_id, .. }
            | TaskEvent::Completed { run_id, .. }
            | TaskEvent::Failed { run_id, .. }
            | TaskEvent::Cancelled { run_id, .. } => *run_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(TaskState::Done.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
        assert!(!TaskState::Waiting.is_terminal());
        assert!(!TaskState::Running.is_terminal());
    }

    #[test]
    fn event_serializes_with_tag_and_dotted_path() {
        let event = TaskEvent::Completed {
            run_id: Uuid::nil(),
            task: Path::parse("tasks.ask").unwrap(),
            duration_ms: 12,
            at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "completed");
        assert_eq!(json["task"], "tasks.ask");
        assert_eq!(json["duration_ms"], 12);
        assert_eq!(event.task().to_string(), "tasks.ask");
    }
}
