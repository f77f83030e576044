//! Dependency analysis.
//!
//! Every reference inside a task's subtree is resolved against the whole
//! document. A reference landing in another task's subtree at a value that
//! is not yet concrete orders the referring task after that task. Concrete
//! data needs no ordering. References written under `$after` order
//! unconditionally.

use std::collections::HashSet;

use flowrun_types::{DocumentError, Path};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::classify::TaskSpec;
use crate::document::Document;
use crate::error::FlowError;

/// Field whose references are explicit ordering constraints.
pub const AFTER_FIELD: &str = "$after";

// ---------------------------------------------------------------------------
// TaskGraph
// ---------------------------------------------------------------------------

/// Directed graph of tasks. Node `i` is the task with discovery index `i`;
/// an edge runs from a dependency to the task that waits on it.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    graph: DiGraph<Path, ()>,
}

impl TaskGraph {
    pub fn new<'a>(paths: impl IntoIterator<Item = &'a Path>) -> Self {
        let mut graph = DiGraph::new();
        for path in paths {
            graph.add_node(path.clone());
        }
        Self { graph }
    }

    /// Record that `task` waits on `dependency`. Duplicate edges collapse.
    pub fn add_dependency(&mut self, task: usize, dependency: usize) {
        self.graph
            .update_edge(NodeIndex::new(dependency), NodeIndex::new(task), ());
    }

    /// Tasks `task` waits on, in ascending index order.
    pub fn dependencies(&self, task: usize) -> Vec<usize> {
        self.neighbors(task, Direction::Incoming)
    }

    /// Tasks waiting on `task`, in ascending index order.
    pub fn dependents(&self, task: usize) -> Vec<usize> {
        self.neighbors(task, Direction::Outgoing)
    }

    fn neighbors(&self, task: usize, direction: Direction) -> Vec<usize> {
        let mut out: Vec<usize> = self
            .graph
            .neighbors_directed(NodeIndex::new(task), direction)
            .map(NodeIndex::index)
            .collect();
        out.sort_unstable();
        out
    }

    pub fn path(&self, task: usize) -> &Path {
        &self.graph[NodeIndex::new(task)]
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// `(task, dependency)` pairs, sorted.
    pub fn edges(&self) -> Vec<(usize, usize)> {
        let mut edges: Vec<(usize, usize)> = self
            .graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_endpoints(e))
            .map(|(dep, task)| (task.index(), dep.index()))
            .collect();
        edges.sort_unstable();
        edges
    }

    /// Adjacency list from each task to its dependencies.
    pub fn adjacency(&self) -> Vec<Vec<usize>> {
        (0..self.len()).map(|i| self.dependencies(i)).collect()
    }

    /// Dependencies before dependents. On a cycle, returns a task involved.
    pub fn topological_order(&self) -> Result<Vec<usize>, usize> {
        toposort(&self.graph, None)
            .map(|order| order.into_iter().map(NodeIndex::index).collect())
            .map_err(|cycle| cycle.node_id().index())
    }
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

/// Build the dependency graph for `tasks`.
///
/// The analysis only reads the document, so running it twice over an
/// unchanged document yields the same graph.
pub fn analyze<D: Document>(doc: &D, tasks: &[TaskSpec]) -> Result<TaskGraph, FlowError> {
    let mut graph = TaskGraph::new(tasks.iter().map(|t| &t.path));

    for task in tasks {
        let after = task.path.child(AFTER_FIELD);
        for reference in doc.references(&task.path)? {
            let unconditional = reference.at.starts_with(&after);
            let mut visited = HashSet::new();
            let mut candidates = Vec::new();
            reached(doc, tasks, &reference.target, &mut visited, &mut candidates)?;

            for (dep, location) in candidates {
                if dep == task.index {
                    continue;
                }
                if unconditional || !doc.is_concrete(&location) {
                    tracing::trace!(
                        task = %task.path,
                        dependency = %tasks[dep].path,
                        via = %reference.at,
                        "dependency edge"
                    );
                    graph.add_dependency(task.index, dep);
                }
            }
        }
    }

    tracing::debug!(
        tasks = graph.len(),
        edges = graph.edge_count(),
        "built dependency graph"
    );
    Ok(graph)
}

/// Collect the tasks a reference to `target` reaches, each paired with the
/// location whose concreteness decides the edge.
fn reached<D: Document>(
    doc: &D,
    tasks: &[TaskSpec],
    target: &Path,
    visited: &mut HashSet<Path>,
    out: &mut Vec<(usize, Path)>,
) -> Result<(), FlowError> {
    let target = doc.canonical(target);
    if !visited.insert(target.clone()) {
        return Ok(());
    }

    // Inside a task: the innermost enclosing task owns it.
    let owner = tasks
        .iter()
        .filter(|t| target.starts_with(&t.path))
        .max_by_key(|t| t.path.len());
    if let Some(owner) = owner {
        out.push((owner.index, target));
        return Ok(());
    }

    // Above one or more tasks.
    let below: Vec<&TaskSpec> = tasks.iter().filter(|t| t.path.starts_with(&target)).collect();
    if !below.is_empty() {
        out.extend(below.into_iter().map(|t| (t.index, t.path.clone())));
        return Ok(());
    }

    // Plain data: whatever it references, transitively.
    let refs = match doc.references(&target) {
        Ok(refs) => refs,
        Err(DocumentError::NotFound(_)) => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for reference in refs {
        reached(doc, tasks, &reference.target, visited, out)?;
    }
    Ok(())
}
