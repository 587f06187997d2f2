//! Vertex storage and name interning

use crate::config::ServiceKind;
use std::collections::HashMap;
use std::sync::Arc;

/// Stable index of a vertex within one graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexId(u32);

impl VertexId {
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Id for a store position, None past `u32::MAX`
    pub fn from_index(index: usize) -> Option<Self> {
        u32::try_from(index).ok().map(Self)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for VertexId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A service as a node of the dependency graph
#[derive(Debug, Clone)]
pub struct Vertex {
    pub id: VertexId,
    /// Interned service name (shared with the store's lookup table)
    pub name: Arc<str>,
    pub kind: ServiceKind,
    /// Vertices this one waits for, in declaration order
    pub deps: Vec<VertexId>,
    /// Vertices to notify once this one settles
    pub notif_targets: Vec<VertexId>,
    /// Group members (bundles and modules only), independent of direction
    pub contents: Vec<VertexId>,
}

/// Owns the vertices of a graph and the name → id table
#[derive(Debug, Default, Clone)]
pub struct VertexStore {
    vertices: Vec<Vertex>,
    names: HashMap<Arc<str>, VertexId>,
}

impl VertexStore {
    /// Insert a new vertex. Returns None if the name is already taken or
    /// the store has run out of ids.
    pub fn insert(&mut self, name: &str, kind: ServiceKind) -> Option<VertexId> {
        if self.names.contains_key(name) {
            return None;
        }
        let id = VertexId::from_index(self.vertices.len())?;
        let name: Arc<str> = Arc::from(name);
        self.names.insert(name.clone(), id);
        self.vertices.push(Vertex {
            id,
            name,
            kind,
            deps: Vec::new(),
            notif_targets: Vec::new(),
            contents: Vec::new(),
        });
        Some(id)
    }

    pub fn lookup(&self, name: &str) -> Option<VertexId> {
        self.names.get(name).copied()
    }

    pub fn get(&self, id: VertexId) -> Option<&Vertex> {
        self.vertices.get(id.index())
    }

    pub(crate) fn get_mut(&mut self, id: VertexId) -> Option<&mut Vertex> {
        self.vertices.get_mut(id.index())
    }

    /// Record `from` waiting on `to`. Returns false when the edge already exists.
    pub(crate) fn add_edge(&mut self, from: VertexId, to: VertexId) -> bool {
        let Some(source) = self.get_mut(from) else {
            return false;
        };
        if source.deps.contains(&to) {
            return false;
        }
        source.deps.push(to);
        if let Some(target) = self.get_mut(to) {
            target.notif_targets.push(from);
        }
        true
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Vertices in insertion (declaration) order
    pub fn iter(&self) -> impl Iterator<Item = &Vertex> {
        self.vertices.iter()
    }
}
