//! Dependency graph construction

use crate::config::{ServiceKind, ServiceRecord};
use crate::graph::sort::CycleError;
use crate::graph::store::{Vertex, VertexId, VertexStore};

/// Directed dependency graph for one invocation
///
/// In a forward graph an edge `a -> b` means "a depends on b". A reversed
/// graph holds the same vertices with every edge inverted, so walking the
/// `deps` of a vertex reaches the services that depend on it.
#[derive(Debug, Clone)]
pub struct Graph {
    store: VertexStore,
    edge_count: usize,
    reversed: bool,
}

impl Graph {
    /// Build a graph from a batch of service records
    pub fn build(records: &[ServiceRecord], reverse: bool) -> Result<Self, BuildError> {
        let mut store = VertexStore::default();
        let mut ids = Vec::with_capacity(records.len());

        for record in records {
            if store.lookup(&record.name).is_some() {
                return Err(BuildError::DuplicateService(record.name.clone()));
            }
            let id = store
                .insert(&record.name, record.kind)
                .ok_or(BuildError::TooManyServices(records.len()))?;
            ids.push(id);
        }

        let mut edge_count = 0;
        for (record, &from) in records.iter().zip(&ids) {
            let mut contents = Vec::with_capacity(record.contents.len());

            for dep_name in record.depends_on.iter().chain(&record.contents) {
                let to = store
                    .lookup(dep_name)
                    .ok_or_else(|| BuildError::UnknownDependency {
                        service: record.name.clone(),
                        dependency: dep_name.clone(),
                    })?;

                if to == from {
                    return Err(BuildError::Cycle(CycleError::new(vec![
                        record.name.clone(),
                        record.name.clone(),
                    ])));
                }

                let (source, target) = if reverse { (to, from) } else { (from, to) };
                if store.add_edge(source, target) {
                    edge_count += 1;
                }
            }

            for member in &record.contents {
                if let Some(id) = store.lookup(member) {
                    if !contents.contains(&id) {
                        contents.push(id);
                    }
                }
            }
            if let Some(vertex) = store.get_mut(from) {
                vertex.contents = contents;
            }
        }

        log::debug!(
            "Built {} graph: {} vertices, {} edges",
            if reverse { "reversed" } else { "forward" },
            store.len(),
            edge_count
        );

        Ok(Self {
            store,
            edge_count,
            reversed: reverse,
        })
    }

    pub fn lookup(&self, name: &str) -> Option<VertexId> {
        self.store.lookup(name)
    }

    pub fn vertex(&self, id: VertexId) -> Option<&Vertex> {
        self.store.get(id)
    }

    /// Name of a vertex, or "?" for an id from another graph
    pub fn name(&self, id: VertexId) -> &str {
        self.store.get(id).map(|v| &*v.name).unwrap_or("?")
    }

    pub fn kind(&self, id: VertexId) -> Option<ServiceKind> {
        self.store.get(id).map(|v| v.kind)
    }

    /// Vertices `id` waits for
    pub fn deps(&self, id: VertexId) -> &[VertexId] {
        self.store.get(id).map(|v| v.deps.as_slice()).unwrap_or(&[])
    }

    /// Vertices waiting for `id`
    pub fn notif_targets(&self, id: VertexId) -> &[VertexId] {
        self.store
            .get(id)
            .map(|v| v.notif_targets.as_slice())
            .unwrap_or(&[])
    }

    pub fn contents(&self, id: VertexId) -> &[VertexId] {
        self.store
            .get(id)
            .map(|v| v.contents.as_slice())
            .unwrap_or(&[])
    }

    /// Vertices in declaration order
    pub fn vertices(&self) -> impl Iterator<Item = &Vertex> {
        self.store.iter()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn is_reversed(&self) -> bool {
        self.reversed
    }
}

/// Errors that can occur when building the dependency graph
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Service '{service}' depends on unknown service '{dependency}'")]
    UnknownDependency { service: String, dependency: String },

    #[error("Service '{0}' is declared more than once")]
    DuplicateService(String),

    #[error("Too many services in one batch: {0}")]
    TooManyServices(usize),

    #[error(transparent)]
    Cycle(#[from] CycleError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> Vec<ServiceRecord> {
        vec![
            ServiceRecord::new("a", ServiceKind::Classic),
            ServiceRecord::new("b", ServiceKind::Classic).depends_on(["a"]),
            ServiceRecord::new("c", ServiceKind::Oneshot).depends_on(["b"]),
        ]
    }

    #[test]
    fn test_forward_edges_point_at_dependencies() {
        let graph = Graph::build(&chain(), false).unwrap();
        let a = graph.lookup("a").unwrap();
        let b = graph.lookup("b").unwrap();
        let c = graph.lookup("c").unwrap();

        assert!(!graph.is_reversed());
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.deps(b), &[a]);
        assert_eq!(graph.deps(c), &[b]);
        assert_eq!(graph.notif_targets(a), &[b]);
        assert!(graph.deps(a).is_empty());
    }

    #[test]
    fn test_reverse_inverts_every_edge() {
        let forward = Graph::build(&chain(), false).unwrap();
        let reverse = Graph::build(&chain(), true).unwrap();

        assert!(reverse.is_reversed());
        assert_eq!(forward.len(), reverse.len());
        assert_eq!(forward.edge_count(), reverse.edge_count());

        for vertex in forward.vertices() {
            assert_eq!(reverse.lookup(&vertex.name), Some(vertex.id));
            for &dep in &vertex.deps {
                assert!(reverse.deps(dep).contains(&vertex.id));
                assert!(reverse.notif_targets(vertex.id).contains(&dep));
            }
        }
    }

    #[test]
    fn test_forward_references_resolve() {
        let records = vec![
            ServiceRecord::new("web", ServiceKind::Classic).depends_on(["db"]),
            ServiceRecord::new("db", ServiceKind::Classic),
        ];
        let graph = Graph::build(&records, false).unwrap();
        let db = graph.lookup("db").unwrap();
        assert_eq!(graph.deps(graph.lookup("web").unwrap()), &[db]);
    }

    #[test]
    fn test_unknown_dependency_is_an_error() {
        let records = vec![ServiceRecord::new("a", ServiceKind::Classic).depends_on(["ghost"])];
        let result = Graph::build(&records, false);
        assert!(matches!(
            result,
            Err(BuildError::UnknownDependency { ref service, ref dependency })
                if service == "a" && dependency == "ghost"
        ));
    }

    #[test]
    fn test_unknown_content_is_an_error() {
        let records = vec![ServiceRecord::new("g", ServiceKind::Bundle).contents(["ghost"])];
        assert!(matches!(
            Graph::build(&records, false),
            Err(BuildError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn test_duplicate_service_is_an_error() {
        let records = vec![
            ServiceRecord::new("a", ServiceKind::Classic),
            ServiceRecord::new("a", ServiceKind::Oneshot),
        ];
        assert!(matches!(
            Graph::build(&records, false),
            Err(BuildError::DuplicateService(name)) if name == "a"
        ));
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let records = vec![ServiceRecord::new("a", ServiceKind::Classic).depends_on(["a"])];
        assert!(matches!(
            Graph::build(&records, false),
            Err(BuildError::Cycle(_))
        ));
    }

    #[test]
    fn test_group_contents_become_edges() {
        let records = vec![
            ServiceRecord::new("x", ServiceKind::Classic),
            ServiceRecord::new("y", ServiceKind::Classic),
            ServiceRecord::new("m", ServiceKind::Module)
                .depends_on(["x"])
                .contents(["x", "y"]),
        ];
        let graph = Graph::build(&records, false).unwrap();
        let x = graph.lookup("x").unwrap();
        let y = graph.lookup("y").unwrap();
        let m = graph.lookup("m").unwrap();

        // x appears both as dependency and member but yields a single edge
        assert_eq!(graph.deps(m), &[x, y]);
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.contents(m), &[x, y]);

        let reverse = Graph::build(&records, true).unwrap();
        assert_eq!(reverse.contents(m), &[x, y]);
        assert!(reverse.deps(m).is_empty());
    }

    #[test]
    fn test_builder_leaves_records_untouched() {
        let records = chain();
        let snapshot = records.clone();
        Graph::build(&records, true).unwrap();
        assert_eq!(records, snapshot);
    }
}
