//! Run planning: what a run will do to each selected service

use crate::config::ServiceKind;
use crate::graph::{Graph, SortedList, VertexId};
use crate::runtime::notify::OutcomeCode;
use crate::runtime::supervisor::Action;
use crate::state::PersistedServiceState;

/// Direction of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    Start,
    Stop,
    Reload,
}

impl Transition {
    /// Stop runs walk the reversed graph
    pub fn uses_reversed_graph(self) -> bool {
        self == Transition::Stop
    }

    /// A vertex already in the target state needs no worker
    pub fn already_settled(self, state: &PersistedServiceState) -> bool {
        match self {
            Transition::Start => state.is_up,
            Transition::Stop => !state.is_up,
            Transition::Reload => false,
        }
    }

    /// Request to issue for a vertex, None for groups
    pub fn action_for(self, kind: ServiceKind, state: &PersistedServiceState) -> Option<Action> {
        if kind.is_group() {
            return None;
        }
        Some(match self {
            Transition::Start => Action::Up,
            Transition::Stop => Action::Down,
            Transition::Reload if state.is_up => Action::Reload,
            Transition::Reload => Action::Up,
        })
    }

    /// Code acknowledged when a vertex reaches the target
    pub fn success_code(self, action: Option<Action>) -> OutcomeCode {
        match (action, self) {
            (Some(Action::Reload), _) => OutcomeCode::Reloaded,
            (Some(Action::Up), _) => OutcomeCode::Up,
            (Some(Action::Down), _) => OutcomeCode::Down,
            (None, Transition::Stop) => OutcomeCode::Down,
            (None, _) => OutcomeCode::Up,
        }
    }

    /// State to persist once a vertex settled on `code`
    pub fn settled_state(
        self,
        state: PersistedServiceState,
        code: OutcomeCode,
        action: Option<Action>,
    ) -> PersistedServiceState {
        match code {
            OutcomeCode::Up | OutcomeCode::Reloaded => state.settled_up(),
            OutcomeCode::Down => state.settled_down(),
            OutcomeCode::Fatal => match (self, action) {
                (_, Some(Action::Reload)) => PersistedServiceState {
                    needs_reload: true,
                    ..state
                },
                // a failed stop leaves the service wherever it was
                (Transition::Stop, _) => state,
                _ => state.failed_up(),
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Transition::Start => "start",
            Transition::Stop => "stop",
            Transition::Reload => "reload",
        }
    }
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One selected vertex of a run
#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub vertex: VertexId,
    pub name: String,
    pub kind: ServiceKind,
    pub state: PersistedServiceState,
    /// Request to issue; None for groups
    pub action: Option<Action>,
    /// Already in the target state, no worker needed
    pub settled: bool,
    /// Selected vertices this one waits for
    pub waits_on: Vec<VertexId>,
    /// Selected vertices waiting for this one
    pub notify: Vec<VertexId>,
}

/// Ordered description of a run, computed before anything executes
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub transition: Transition,
    pub entries: Vec<PlanEntry>,
}

impl RunPlan {
    /// Combine a selection with the persisted states of its vertices
    pub fn new(
        graph: &Graph,
        order: &SortedList,
        transition: Transition,
        states: Vec<PersistedServiceState>,
    ) -> Self {
        let entries = order
            .iter()
            .zip(states)
            .map(|(vertex, state)| {
                let kind = graph.kind(vertex).unwrap_or_default();
                let within = |ids: &[VertexId]| -> Vec<VertexId> {
                    ids.iter().copied().filter(|&id| order.contains(id)).collect()
                };
                PlanEntry {
                    vertex,
                    name: graph.name(vertex).to_string(),
                    kind,
                    state,
                    action: transition.action_for(kind, &state),
                    settled: transition.already_settled(&state),
                    waits_on: within(graph.deps(vertex)),
                    notify: within(graph.notif_targets(vertex)),
                }
            })
            .collect();

        Self {
            transition,
            entries,
        }
    }

    /// Entries that will get a worker
    pub fn pending(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries.iter().filter(|e| !e.settled)
    }

    pub fn is_noop(&self) -> bool {
        self.entries.iter().all(|e| e.settled)
    }

    fn name_of(&self, id: VertexId) -> &str {
        self.entries
            .iter()
            .find(|e| e.vertex == id)
            .map(|e| e.name.as_str())
            .unwrap_or("?")
    }
}

/// Display the run plan in a human-readable format
impl std::fmt::Display for RunPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Run Plan ({})", self.transition)?;
        writeln!(f, "==========")?;

        if self.entries.is_empty() {
            writeln!(f)?;
            writeln!(f, "Nothing selected.")?;
            return Ok(());
        }

        for (i, entry) in self.entries.iter().enumerate() {
            writeln!(f)?;
            let what = if entry.settled {
                "already settled".to_string()
            } else {
                entry
                    .action
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| "settle with members".to_string())
            };
            writeln!(f, "  {}. {} [{}] {}", i + 1, entry.name, entry.kind, what)?;

            if !entry.waits_on.is_empty() {
                let names: Vec<_> = entry.waits_on.iter().map(|&id| self.name_of(id)).collect();
                writeln!(f, "     Waits on: {}", names.join(", "))?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceRecord;
    use crate::graph::select;

    fn up() -> PersistedServiceState {
        PersistedServiceState::default().settled_up()
    }

    #[test]
    fn test_actions_per_transition() {
        let down = PersistedServiceState::default();
        assert_eq!(
            Transition::Start.action_for(ServiceKind::Classic, &down),
            Some(Action::Up)
        );
        assert_eq!(
            Transition::Stop.action_for(ServiceKind::Oneshot, &up()),
            Some(Action::Down)
        );
        assert_eq!(
            Transition::Reload.action_for(ServiceKind::Classic, &up()),
            Some(Action::Reload)
        );
        assert_eq!(
            Transition::Reload.action_for(ServiceKind::Classic, &down),
            Some(Action::Up)
        );
        assert_eq!(Transition::Start.action_for(ServiceKind::Module, &down), None);
    }

    #[test]
    fn test_idempotence_guard() {
        assert!(Transition::Start.already_settled(&up()));
        assert!(!Transition::Stop.already_settled(&up()));
        assert!(Transition::Stop.already_settled(&PersistedServiceState::default()));
        assert!(!Transition::Reload.already_settled(&up()));
    }

    #[test]
    fn test_fatal_never_records_the_target() {
        let was_up = up();
        let after_stop =
            Transition::Stop.settled_state(was_up, OutcomeCode::Fatal, Some(Action::Down));
        assert!(after_stop.is_up);

        let fresh = PersistedServiceState::default();
        let after_start =
            Transition::Start.settled_state(fresh, OutcomeCode::Fatal, Some(Action::Up));
        assert!(!after_start.is_up);

        let after_reload =
            Transition::Reload.settled_state(was_up, OutcomeCode::Fatal, Some(Action::Reload));
        assert!(after_reload.needs_reload);
    }

    #[test]
    fn test_plan_lists_waits_within_selection() {
        let records = vec![
            ServiceRecord::new("a", ServiceKind::Classic),
            ServiceRecord::new("b", ServiceKind::Classic).depends_on(["a"]),
            ServiceRecord::new("c", ServiceKind::Classic).depends_on(["b"]),
        ];
        let graph = Graph::build(&records, false).unwrap();
        let order = select(&graph, &["c", "b"], false).unwrap();
        let states = vec![PersistedServiceState::default(); order.len()];
        let plan = RunPlan::new(&graph, &order, Transition::Start, states);

        let b = &plan.entries[0];
        assert_eq!(b.name, "b");
        assert!(b.waits_on.is_empty(), "a is outside the selection");
        assert_eq!(b.notify, vec![graph.lookup("c").unwrap()]);

        let rendered = plan.to_string();
        assert!(rendered.contains("1. b [classic] up"));
        assert!(rendered.contains("Waits on: b"));
    }
}
