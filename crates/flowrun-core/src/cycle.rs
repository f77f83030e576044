//! Cycle detection over the task dependency graph.
//!
//! Depth-first search with visited and on-stack marks. Reaching a node that
//! is still on the recursion stack closes a cycle. Runs before any task is
//! scheduled; a cycle fails the whole run.

use crate::analyze::TaskGraph;
use crate::classify::TaskSpec;
use crate::error::FlowError;

/// Find a cycle in `adjacency` (node to the nodes it points at). Returns a
/// node on the cycle, or `None` for an acyclic graph.
pub fn find_cycle(adjacency: &[Vec<usize>]) -> Option<usize> {
    let n = adjacency.len();
    let mut visited = vec![false; n];
    let mut on_stack = vec![false; n];

    for start in 0..n {
        if visited[start] {
            continue;
        }
        // Explicit stack of (node, next neighbor position).
        let mut stack = vec![(start, 0usize)];
        visited[start] = true;
        on_stack[start] = true;

        while let Some(frame) = stack.last_mut() {
            let node = frame.0;
            match adjacency[node].get(frame.1).copied() {
                Some(succ) => {
                    frame.1 += 1;
                    if on_stack[succ] {
                        return Some(succ);
                    }
                    if !visited[succ] {
                        visited[succ] = true;
                        on_stack[succ] = true;
                        stack.push((succ, 0));
                    }
                }
                None => {
                    on_stack[node] = false;
                    stack.pop();
                }
            }
        }
    }
    None
}

/// Fail with [`FlowError::CyclicDependency`] if the graph has a cycle.
pub fn check_acyclic(graph: &TaskGraph, tasks: &[TaskSpec]) -> Result<(), FlowError> {
    match find_cycle(&graph.adjacency()) {
        Some(node) => {
            let involving = tasks[node].path.clone();
            tracing::debug!(task = %involving, "cyclic dependency detected");
            Err(FlowError::CyclicDependency { involving })
        }
        None => Ok(()),
    }
}
