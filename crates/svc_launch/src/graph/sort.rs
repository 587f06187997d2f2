//! Topological sorting with three-colour depth-first search

use crate::graph::build::Graph;
use crate::graph::store::VertexId;

/// DFS colour of a vertex
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    /// Not visited yet
    White,
    /// On the current DFS path
    Gray,
    /// Finished, already emitted
    Black,
}

/// Vertex ids ordered so that every vertex follows the vertices it waits on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortedList {
    order: Vec<VertexId>,
}

impl SortedList {
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = VertexId> + '_ {
        self.order.iter().copied()
    }

    pub fn as_slice(&self) -> &[VertexId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: VertexId) -> bool {
        self.order.contains(&id)
    }

    /// Position of `id` in the order
    pub fn position(&self, id: VertexId) -> Option<usize> {
        self.order.iter().position(|&v| v == id)
    }

    /// Resolve the order to service names
    pub fn names<'g>(&self, graph: &'g Graph) -> Vec<&'g str> {
        self.order.iter().map(|&id| graph.name(id)).collect()
    }
}

impl<'a> IntoIterator for &'a SortedList {
    type Item = VertexId;
    type IntoIter = std::iter::Copied<std::slice::Iter<'a, VertexId>>;

    fn into_iter(self) -> Self::IntoIter {
        self.order.iter().copied()
    }
}

impl Graph {
    /// Sort every vertex of the graph
    pub fn sort(&self) -> Result<SortedList, CycleError> {
        sort_where(self, |_| true)
    }
}

/// Sort the vertices accepted by `include`, ignoring edges that leave the set
///
/// Roots are taken in declaration order and each vertex's `deps` are walked
/// in declaration order, so identical graphs always produce identical lists.
/// A vertex is emitted when it turns black, after everything it waits on.
pub(crate) fn sort_where<F>(graph: &Graph, include: F) -> Result<SortedList, CycleError>
where
    F: Fn(VertexId) -> bool,
{
    let mut color = vec![Color::White; graph.len()];
    let mut order = Vec::with_capacity(graph.len());
    // (vertex, index of the next dependency to visit)
    let mut stack: Vec<(VertexId, usize)> = Vec::new();

    for root in graph.vertices().map(|v| v.id) {
        if !include(root) || color[root.index()] != Color::White {
            continue;
        }
        color[root.index()] = Color::Gray;
        stack.push((root, 0));

        while let Some(&(vertex, next)) = stack.last() {
            let Some(&dep) = graph.deps(vertex).get(next) else {
                color[vertex.index()] = Color::Black;
                order.push(vertex);
                stack.pop();
                continue;
            };

            if let Some(top) = stack.last_mut() {
                top.1 += 1;
            }
            if !include(dep) {
                continue;
            }

            match color[dep.index()] {
                Color::White => {
                    color[dep.index()] = Color::Gray;
                    stack.push((dep, 0));
                }
                Color::Gray => {
                    let start = stack.iter().position(|&(v, _)| v == dep).unwrap_or(0);
                    let mut path: Vec<String> = stack[start..]
                        .iter()
                        .map(|&(v, _)| graph.name(v).to_string())
                        .collect();
                    path.push(graph.name(dep).to_string());
                    return Err(CycleError::new(path));
                }
                Color::Black => {}
            }
        }
    }

    Ok(SortedList { order })
}

/// A dependency cycle, reported with the vertices along it
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Cyclic dependency detected: {}", .path.join(" -> "))]
pub struct CycleError {
    /// Names on the cycle; the first name is repeated at the end
    pub path: Vec<String>,
}

impl CycleError {
    pub fn new(path: Vec<String>) -> Self {
        Self { path }
    }
}
