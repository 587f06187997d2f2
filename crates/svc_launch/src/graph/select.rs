//! Expansion of requested services into the subgraph a run must visit

use crate::graph::build::Graph;
use crate::graph::sort::{sort_where, CycleError, SortedList};
use std::collections::VecDeque;

/// Expand `requested` into the ordered selection of a run
///
/// On a forward graph propagation pulls in dependencies; on a reversed
/// graph it pulls in dependents. A requested bundle or module brings its
/// members along; one reached only through an edge does not. Without propagation only edges between selected vertices
/// constrain the order.
pub fn select<S: AsRef<str>>(
    graph: &Graph,
    requested: &[S],
    propagate: bool,
) -> Result<SortedList, SelectError> {
    let mut selected = vec![false; graph.len()];
    let mut expanded = vec![false; graph.len()];
    // (vertex, named directly or as a member of a named group)
    let mut queue = VecDeque::with_capacity(requested.len());

    for name in requested {
        let name = name.as_ref();
        let id = graph
            .lookup(name)
            .ok_or_else(|| SelectError::UnknownService(name.to_string()))?;
        queue.push_back((id, true));
    }

    while let Some((id, named)) = queue.pop_front() {
        // a group reached through an edge settles alone; only a named
        // group brings its members along
        if named && !std::mem::replace(&mut expanded[id.index()], true) {
            queue.extend(graph.contents(id).iter().map(|&member| (member, true)));
        }
        if std::mem::replace(&mut selected[id.index()], true) {
            continue;
        }
        if propagate {
            queue.extend(graph.deps(id).iter().map(|&dep| (dep, false)));
        }
    }

    let sorted = sort_where(graph, |id| selected[id.index()])?;
    log::debug!(
        "Selected {} of {} services ({})",
        sorted.len(),
        graph.len(),
        if propagate { "propagated" } else { "exact" }
    );
    Ok(sorted)
}

/// Errors that can occur when selecting services
#[derive(Debug, thiserror::Error)]
pub enum SelectError {
    #[error("Unknown service '{0}'")]
    UnknownService(String),

    #[error(transparent)]
    Cycle(#[from] CycleError),
}
