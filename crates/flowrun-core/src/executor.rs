//! Concurrent task scheduler.
//!
//! # Execution flow
//!
//! 1. Classify tasks under the configured root (once).
//! 2. Build the dependency graph and reject cycles. Nothing runs if either
//!    step fails.
//! 3. Spawn one unit per task into a `JoinSet`. Each unit waits for all of
//!    its dependencies' completion signals, reads its input under the
//!    document lock, runs its runner without the lock, then merges the
//!    output under the lock and fires its own signal.
//! 4. The first error cancels the run's token. Units that have not started
//!    exit without running; results that arrive after cancellation are
//!    discarded.
//! 5. When every unit has returned, the document and outcome go back to
//!    the caller in a [`RunReport`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use dashmap::DashMap;
use flowrun_types::config::{Discovery, EngineSettings};
use flowrun_types::event::{TaskEvent, TaskState};
use flowrun_types::Path;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::analyze::{analyze, TaskGraph, AFTER_FIELD};
use crate::classify::{Classifier, TaskSpec};
use crate::cycle::check_acyclic;
use crate::document::Document;
use crate::error::FlowError;
use crate::event::EventBus;
use crate::registry::Registry;
use crate::runner::{RunContext, RunnerError, Stdio};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Switches for one engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Where the command's tasks live.
    pub root: Path,
    pub discovery: Discovery,
    /// Hand runners values that still reference incomplete data.
    pub allow_incomplete: bool,
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig::from(&EngineSettings::default())
    }
}

impl From<&EngineSettings> for EngineConfig {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            root: settings.root.clone(),
            discovery: settings.discovery,
            allow_incomplete: settings.allow_incomplete,
            event_capacity: settings.event_capacity,
        }
    }
}

// ---------------------------------------------------------------------------
// Plan / RunReport
// ---------------------------------------------------------------------------

/// Discovered tasks and their validated, acyclic dependency graph.
#[derive(Debug, Clone)]
pub struct Plan {
    pub tasks: Vec<TaskSpec>,
    pub graph: TaskGraph,
}

impl Plan {
    /// Task indices with every dependency ahead of its dependents.
    pub fn order(&self) -> Vec<usize> {
        // The graph was checked for cycles when the plan was built.
        self.graph
            .topological_order()
            .unwrap_or_else(|_| (0..self.tasks.len()).collect())
    }

    pub fn dependencies(&self, task: usize) -> Vec<&Path> {
        self.graph
            .dependencies(task)
            .into_iter()
            .map(|i| &self.tasks[i].path)
            .collect()
    }
}

/// Everything a run hands back to its host.
#[derive(Debug)]
pub struct RunReport<D> {
    pub run_id: Uuid,
    /// The document after the run. Only authoritative when `outcome` is `Ok`.
    pub document: D,
    /// `Ok` on success (including an aborted run), otherwise the first error.
    pub outcome: Result<(), FlowError>,
    /// Final state of every discovered task, in discovery order.
    pub states: Vec<(Path, TaskState)>,
    /// A runner asked the run to stop early.
    pub aborted: bool,
}

impl<D> RunReport<D> {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn state(&self, task: &Path) -> Option<TaskState> {
        self.states
            .iter()
            .find(|(path, _)| path == task)
            .map(|(_, state)| *state)
    }

    /// The document on success, the first error otherwise.
    pub fn into_result(self) -> Result<D, FlowError> {
        self.outcome.map(|()| self.document)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Runs the tasks of a document.
pub struct Engine {
    registry: Arc<Registry>,
    config: EngineConfig,
    events: EventBus,
    stdio: Stdio,
}

impl Engine {
    pub fn new(registry: Arc<Registry>, config: EngineConfig) -> Self {
        let events = EventBus::new(config.event_capacity);
        Self {
            registry,
            config,
            events,
            stdio: Stdio::inherit(),
        }
    }

    /// Replace the streams handed to runners.
    pub fn with_stdio(mut self, stdio: Stdio) -> Self {
        self.stdio = stdio;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Classify, analyze and cycle-check without running anything.
    ///
    /// Fills every task's kind template into `doc`.
    pub fn plan<D: Document>(&self, doc: &mut D) -> Result<Plan, FlowError> {
        let tasks = Classifier::new(&self.registry, self.config.discovery)
            .discover(doc, &self.config.root)?;
        let graph = analyze(&*doc, &tasks)?;
        check_acyclic(&graph, &tasks)?;
        Ok(Plan { tasks, graph })
    }

    /// Run every task in `doc` to completion or first error.
    pub async fn run<D: Document>(&self, doc: D) -> RunReport<D> {
        self.run_until(doc, &CancellationToken::new()).await
    }

    /// Like [`run`](Self::run), but the host can stop the run through
    /// `shutdown`. A run stopped that way reports [`FlowError::Interrupted`].
    pub async fn run_until<D: Document>(
        &self,
        mut doc: D,
        shutdown: &CancellationToken,
    ) -> RunReport<D> {
        let run_id = Uuid::now_v7();
        let span = tracing::info_span!("run", run_id = %run_id);

        let plan = match span.in_scope(|| self.plan(&mut doc)) {
            Ok(plan) => plan,
            Err(err) => {
                tracing::warn!(run_id = %run_id, error = %err, "run rejected before scheduling");
                return RunReport {
                    run_id,
                    document: doc,
                    outcome: Err(err),
                    states: Vec::new(),
                    aborted: false,
                };
            }
        };

        tracing::info!(run_id = %run_id, tasks = plan.tasks.len(), "starting run");

        let state = Arc::new(RunState {
            run_id,
            cancel: shutdown.child_token(),
            first_error: Mutex::new(None),
            aborted: AtomicBool::new(false),
            states: DashMap::new(),
            events: self.events.clone(),
            stdio: self.stdio.clone(),
            allow_incomplete: self.config.allow_incomplete,
        });
        let shared = Arc::new(AsyncMutex::new(doc));

        let mut senders = Vec::with_capacity(plan.tasks.len());
        let mut receivers = Vec::with_capacity(plan.tasks.len());
        for task in &plan.tasks {
            let (tx, rx) = watch::channel(false);
            senders.push(tx);
            receivers.push(rx);
            state.states.insert(task.index, TaskState::Pending);
        }

        let mut units = JoinSet::new();
        for (task, done) in plan.tasks.iter().cloned().zip(senders) {
            let deps: Vec<Dependency> = plan
                .graph
                .dependencies(task.index)
                .into_iter()
                .map(|i| Dependency {
                    path: plan.tasks[i].path.clone(),
                    done: receivers[i].clone(),
                })
                .collect();
            let state = Arc::clone(&state);
            let shared = Arc::clone(&shared);
            let unit_span = tracing::debug_span!(parent: &span, "task", task = %task.path);

            units.spawn(
                async move {
                    let path = task.path.clone();
                    let index = task.index;
                    let inner = tokio::spawn(
                        run_task(Arc::clone(&state), shared, task, deps, done).in_current_span(),
                    );
                    if let Err(err) = inner.await {
                        let message = panic_message(err);
                        tracing::error!(task = %path, message = %message, "task unit panicked");
                        state.finish(index, TaskState::Failed);
                        state.publish(TaskEvent::Failed {
                            run_id: state.run_id,
                            task: path.clone(),
                            error: message.clone(),
                            at: Utc::now(),
                        });
                        state.fail(FlowError::Panicked {
                            task: path,
                            message,
                        });
                    }
                }
                .instrument(unit_span),
            );
        }
        drop(receivers);

        while let Some(joined) = units.join_next().await {
            if let Err(err) = joined {
                tracing::error!(run_id = %run_id, error = %err, "task unit did not complete");
            }
        }
        // Runner resources tied to the run token end with the run.
        state.cancel.cancel();

        let document = match Arc::try_unwrap(shared) {
            Ok(mutex) => mutex.into_inner(),
            Err(_) => unreachable!("every task unit has returned"),
        };

        let states: Vec<(Path, TaskState)> = plan
            .tasks
            .iter()
            .map(|t| (t.path.clone(), state.state(t.index)))
            .collect();
        let aborted = state.aborted.load(Ordering::SeqCst);
        let first_error = state.take_error();

        let outcome = match first_error {
            Some(err) => Err(err),
            None if !aborted
                && shutdown.is_cancelled()
                && states.iter().any(|(_, s)| *s != TaskState::Done) =>
            {
                Err(FlowError::Interrupted)
            }
            None => Ok(()),
        };

        match &outcome {
            Ok(()) => tracing::info!(run_id = %run_id, aborted, "run finished"),
            Err(err) => tracing::info!(run_id = %run_id, error = %err, "run failed"),
        }

        RunReport {
            run_id,
            document,
            outcome,
            states,
            aborted,
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Per-run state
// ---------------------------------------------------------------------------

struct Dependency {
    path: Path,
    done: watch::Receiver<bool>,
}

/// State shared by the units of one run.
struct RunState {
    run_id: Uuid,
    cancel: CancellationToken,
    first_error: Mutex<Option<FlowError>>,
    aborted: AtomicBool,
    states: DashMap<usize, TaskState>,
    events: EventBus,
    stdio: Stdio,
    allow_incomplete: bool,
}

impl RunState {
    /// Record `err` if it is the first, then cancel the run.
    fn fail(&self, err: FlowError) {
        {
            let mut slot = self.first_error.lock().unwrap_or_else(|p| p.into_inner());
            if slot.is_none() {
                tracing::warn!(run_id = %self.run_id, error = %err, "cancelling run");
                *slot = Some(err);
            } else {
                tracing::debug!(run_id = %self.run_id, error = %err, "later error dropped");
            }
        }
        self.cancel.cancel();
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        self.cancel.cancel();
    }

    fn take_error(&self) -> Option<FlowError> {
        self.first_error
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
    }

    fn set_state(&self, index: usize, state: TaskState) {
        self.states.insert(index, state);
    }

    /// Move to a terminal state unless already in one.
    fn finish(&self, index: usize, state: TaskState) {
        let mut entry = self.states.entry(index).or_insert(TaskState::Pending);
        if !entry.is_terminal() {
            *entry = state;
        }
    }

    fn state(&self, index: usize) -> TaskState {
        self.states
            .get(&index)
            .map(|s| *s)
            .unwrap_or(TaskState::Pending)
    }

    fn publish(&self, event: TaskEvent) {
        self.events.publish(event);
    }
}

/// How a unit ended, short of an error.
enum Step {
    Done { duration_ms: u64 },
    Aborted { duration_ms: u64 },
    Cancelled,
}

async fn run_task<D: Document>(
    state: Arc<RunState>,
    doc: Arc<AsyncMutex<D>>,
    task: TaskSpec,
    deps: Vec<Dependency>,
    done: watch::Sender<bool>,
) {
    let run_id = state.run_id;
    match execute(&state, &doc, &task, deps).await {
        Ok(Step::Done { duration_ms }) => {
            state.finish(task.index, TaskState::Done);
            tracing::debug!(task = %task.path, duration_ms, "task completed");
            state.publish(TaskEvent::Completed {
                run_id,
                task: task.path.clone(),
                duration_ms,
                at: Utc::now(),
            });
            let _ = done.send(true);
        }
        Ok(Step::Aborted { duration_ms }) => {
            tracing::info!(task = %task.path, "task requested abort");
            state.finish(task.index, TaskState::Done);
            state.publish(TaskEvent::Completed {
                run_id,
                task: task.path.clone(),
                duration_ms,
                at: Utc::now(),
            });
            state.abort();
        }
        Ok(Step::Cancelled) => {
            state.finish(task.index, TaskState::Cancelled);
            state.publish(TaskEvent::Cancelled {
                run_id,
                task: task.path.clone(),
                at: Utc::now(),
            });
        }
        Err(err) => {
            state.finish(task.index, TaskState::Failed);
            state.publish(TaskEvent::Failed {
                run_id,
                task: task.path.clone(),
                error: err.to_string(),
                at: Utc::now(),
            });
            state.fail(err);
        }
    }
}

async fn execute<D: Document>(
    state: &RunState,
    doc: &AsyncMutex<D>,
    task: &TaskSpec,
    mut deps: Vec<Dependency>,
) -> Result<Step, FlowError> {
    state.set_state(task.index, TaskState::Waiting);
    state.publish(TaskEvent::Waiting {
        run_id: state.run_id,
        task: task.path.clone(),
        dependencies: deps.iter().map(|d| d.path.clone()).collect(),
        at: Utc::now(),
    });

    let ready = tokio::select! {
        biased;
        _ = state.cancel.cancelled() => false,
        ready = wait_all(&mut deps) => ready,
    };
    if !ready {
        return Ok(Step::Cancelled);
    }

    let value = {
        let doc = doc.lock().await;
        if state.cancel.is_cancelled() {
            return Ok(Step::Cancelled);
        }
        let value = doc.resolve(&task.path)?;
        if !state.allow_incomplete {
            check_inputs(&*doc, &task.path)?;
        }
        value
    };

    state.set_state(task.index, TaskState::Running);
    let runner = task
        .entry
        .construct(&value)
        .map_err(|source| FlowError::Construction {
            task: task.path.clone(),
            source,
        })?;
    if state.cancel.is_cancelled() {
        return Ok(Step::Cancelled);
    }

    tracing::info!(task = %task.path, kind = %task.kind, "starting task");
    state.publish(TaskEvent::Started {
        run_id: state.run_id,
        task: task.path.clone(),
        kind: task.kind.clone(),
        at: Utc::now(),
    });

    let ctx = RunContext {
        run_id: state.run_id,
        task: task.path.clone(),
        kind: task.kind.clone(),
        value,
        cancel: state.cancel.clone(),
        stdio: state.stdio.clone(),
    };
    let started = Instant::now();
    let result = runner.run(&ctx).await;

    if state.cancel.is_cancelled() {
        tracing::debug!(task = %task.path, "run cancelled; discarding result");
        return Ok(Step::Cancelled);
    }

    let output = match result {
        Ok(output) => output,
        Err(RunnerError::Abort) => {
            return Ok(Step::Aborted {
                duration_ms: started.elapsed().as_millis() as u64,
            });
        }
        Err(source) => {
            return Err(FlowError::Execution {
                task: task.path.clone(),
                source,
            });
        }
    };

    if let Some(output) = output {
        let mut doc = doc.lock().await;
        if state.cancel.is_cancelled() {
            return Ok(Step::Cancelled);
        }
        doc.fill(&task.path, &output)
            .map_err(|source| FlowError::Merge {
                task: task.path.clone(),
                source,
            })?;
    }

    Ok(Step::Done {
        duration_ms: started.elapsed().as_millis() as u64,
    })
}

/// Wait for every dependency's completion signal. `false` if one of them
/// ended without completing.
async fn wait_all(deps: &mut [Dependency]) -> bool {
    for dep in deps.iter_mut() {
        if dep.done.wait_for(|done| *done).await.is_err() {
            tracing::debug!(dependency = %dep.path, "dependency did not complete");
            return false;
        }
    }
    true
}

/// Every reference leaving the task (other than `$after` ordering) must
/// point at concrete data by the time the task runs.
fn check_inputs<D: Document>(doc: &D, task: &Path) -> Result<(), FlowError> {
    let after = task.child(AFTER_FIELD);
    for reference in doc.references(task)? {
        if reference.at.starts_with(&after) {
            continue;
        }
        let target = doc.canonical(&reference.target);
        if target.starts_with(task) {
            continue;
        }
        if !doc.is_concrete(&target) {
            return Err(FlowError::IncompleteInput {
                task: task.clone(),
                reference: target,
            });
        }
    }
    Ok(())
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
