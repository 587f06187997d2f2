//! Launch coordinator - runs one worker per selected vertex
//!
//! Workers signal each other directly through their notification pipes;
//! the coordinator only watches them finish, enforces the run deadline and
//! writes each settled state back.

use crate::config::{CoordinatorConfig, ServiceKind, ServiceRecord};
use crate::graph::{select, BuildError, CycleError, Graph, SelectError, VertexId};
use crate::runtime::notify::{pipe, Ack, NotifyReceiver, NotifySender, OutcomeCode};
use crate::runtime::plan::{RunPlan, Transition};
use crate::runtime::report::{FailureReason, RunReport, VertexOutcome};
use crate::runtime::supervisor::{Action, Supervisor};
use crate::runtime::worker::{run_worker, WorkerError, WorkerPlan};
use crate::state::{PersistedServiceState, StateError, StateRecorder};
use futures::FutureExt;
use indexmap::IndexMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Runtime state of a vertex during one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexState {
    /// Not started
    Pending,
    /// Worker running: waiting on acks or on the supervisor
    Blocked,
    Up,
    Down,
    /// Failed; absorbing for the whole run
    Fatal,
}

/// Per-vertex bookkeeping, dropped with the run
struct LaunchState {
    name: Arc<str>,
    kind: ServiceKind,
    state: VertexState,
    persisted: PersistedServiceState,
    action: Option<Action>,
    /// Write end of the vertex's pipe
    sender: NotifySender,
}

type WorkerResult = (VertexId, Result<OutcomeCode, WorkerError>);

/// Everything scoped to a single run
struct CoordinatorRun<'a> {
    transition: Transition,
    recorder: &'a dyn StateRecorder,
    vertices: IndexMap<VertexId, LaunchState>,
    inboxes: IndexMap<VertexId, NotifyReceiver>,
    workers: JoinSet<WorkerResult>,
    live: usize,
    report: RunReport,
}

impl<'a> CoordinatorRun<'a> {
    fn new(plan: &RunPlan, recorder: &'a dyn StateRecorder) -> Self {
        let mut vertices = IndexMap::with_capacity(plan.entries.len());
        let mut inboxes = IndexMap::with_capacity(plan.entries.len());
        let mut report = RunReport::new(plan.transition);

        for entry in &plan.entries {
            let (sender, receiver) = pipe();
            vertices.insert(
                entry.vertex,
                LaunchState {
                    name: Arc::from(entry.name.as_str()),
                    kind: entry.kind,
                    state: VertexState::Pending,
                    persisted: entry.state,
                    action: entry.action,
                    sender,
                },
            );
            inboxes.insert(entry.vertex, receiver);
            report
                .outcomes
                .insert(entry.name.clone(), VertexOutcome::NotReached);
        }

        Self {
            transition: plan.transition,
            recorder,
            vertices,
            inboxes,
            workers: JoinSet::new(),
            live: 0,
            report,
        }
    }

    /// Settle the vertices already in place and start a worker for the rest
    fn launch(
        &mut self,
        plan: &RunPlan,
        deadline: Option<Instant>,
        supervisor: &Arc<dyn Supervisor>,
    ) {
        for entry in &plan.entries {
            if entry.settled {
                let code = self.transition.success_code(None);
                log::info!("[{}] Already {}", entry.name, settled_word(code));
                self.settle(entry.vertex, code, true);
                for target in &entry.notify {
                    if let Some(target) = self.vertices.get(target) {
                        if target.sender.send(Ack::new(entry.vertex, code)).is_err() {
                            log::debug!("[{}] Pipe already closed", target.name);
                        }
                    }
                }
                continue;
            }

            let Some(inbox) = self.inboxes.shift_remove(&entry.vertex) else {
                continue;
            };
            let Some(launch) = self.vertices.get(&entry.vertex) else {
                continue;
            };

            let notify = entry
                .notify
                .iter()
                .filter_map(|id| self.vertices.get(id).map(|v| (*id, v.sender.clone())))
                .collect();
            let worker = WorkerPlan {
                vertex: entry.vertex,
                name: launch.name.clone(),
                kind: launch.kind,
                action: launch.action,
                success: self.transition.success_code(launch.action),
                waits_on: entry.waits_on.clone(),
                notify,
                deadline,
            };

            let vertex = entry.vertex;
            let supervisor = supervisor.clone();
            self.workers.spawn(async move {
                let result = AssertUnwindSafe(run_worker(worker, inbox, supervisor))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        Err(WorkerError::Crashed(panic_message(panic.as_ref())))
                    });
                (vertex, result)
            });

            if let Some(launch) = self.vertices.get_mut(&vertex) {
                launch.state = VertexState::Blocked;
            }
            self.live += 1;
            self.report.workers_spawned += 1;
        }
    }

    /// Event loop: collect worker exits until done, failed, expired or interrupted
    async fn wait(&mut self, deadline: Option<Instant>, shutdown: &mut watch::Receiver<()>) {
        let expired = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(expired);
        let mut shutdown_open = true;

        while self.live > 0 {
            tokio::select! {
                // finished workers are collected before the deadline or an
                // interrupt can claim their vertices
                biased;

                joined = self.workers.join_next() => match joined {
                    Some(Ok((vertex, result))) => {
                        self.live -= 1;
                        if !self.collect(vertex, result) {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        log::error!("Worker task ended abnormally: {}", e);
                        self.live -= 1;
                    }
                    None => break,
                },
                _ = &mut expired => {
                    log::error!("Run deadline exceeded");
                    self.expire();
                    break;
                }
                changed = shutdown.changed(), if shutdown_open => {
                    if changed.is_ok() {
                        log::info!("Shutdown requested, aborting run");
                        self.report.interrupted = true;
                        break;
                    }
                    shutdown_open = false;
                }
            }
        }
    }

    /// Record a worker result. Returns false once the run must stop.
    fn collect(&mut self, vertex: VertexId, result: Result<OutcomeCode, WorkerError>) -> bool {
        let err = match result {
            Ok(code) => {
                self.settle(vertex, code, false);
                return true;
            }
            Err(err) => err,
        };

        match failure_reason(err) {
            None => {
                // a dependency failed first; that failure ends the run
                log::debug!("[{}] Abandoned after dependency failure", self.name(vertex));
                if let Some(launch) = self.vertices.get_mut(&vertex) {
                    launch.state = VertexState::Pending;
                }
                true
            }
            Some(reason) => {
                let expired = reason == FailureReason::DeadlineExceeded;
                self.fail(vertex, reason);
                if expired {
                    self.expire();
                }
                false
            }
        }
    }

    fn settle(&mut self, vertex: VertexId, code: OutcomeCode, already: bool) {
        let outcome = match (code, already) {
            (OutcomeCode::Up, true) => VertexOutcome::AlreadyUp,
            (OutcomeCode::Down, true) => VertexOutcome::AlreadyDown,
            (OutcomeCode::Up, false) => VertexOutcome::Up,
            (OutcomeCode::Down, false) => VertexOutcome::Down,
            (OutcomeCode::Reloaded, _) => VertexOutcome::Reloaded,
            (OutcomeCode::Fatal, _) => {
                self.fail(
                    vertex,
                    FailureReason::Protocol("fatal outcome reported as success".to_string()),
                );
                return;
            }
        };
        let Some(launch) = self.vertices.get_mut(&vertex) else {
            return;
        };

        launch.state = if code == OutcomeCode::Down {
            VertexState::Down
        } else {
            VertexState::Up
        };
        let persisted = self.transition.settled_state(launch.persisted, code, launch.action);
        let name = launch.name.clone();

        self.persist(&name, persisted);
        self.report.outcomes.insert(name.to_string(), outcome);
    }

    fn fail(&mut self, vertex: VertexId, reason: FailureReason) {
        let Some(launch) = self.vertices.get_mut(&vertex) else {
            return;
        };
        log::error!("[{}] Failed: {}", launch.name, reason);

        launch.state = VertexState::Fatal;
        let persisted =
            self.transition
                .settled_state(launch.persisted, OutcomeCode::Fatal, launch.action);
        let name = launch.name.clone();

        self.persist(&name, persisted);
        self.report
            .outcomes
            .insert(name.to_string(), VertexOutcome::Fatal(reason));
    }

    /// Attribute the deadline to every vertex still blocked
    fn expire(&mut self) {
        let blocked: Vec<VertexId> = self
            .vertices
            .iter()
            .filter(|(_, v)| v.state == VertexState::Blocked)
            .map(|(id, _)| *id)
            .collect();
        for vertex in blocked {
            self.fail(vertex, FailureReason::DeadlineExceeded);
        }
    }

    fn persist(&mut self, name: &str, state: PersistedServiceState) {
        if let Err(e) = self.recorder.write(name, &state) {
            log::error!("[{}] Failed to record state: {}", name, e);
            self.report.persist_errors.push(format!("{}: {}", name, e));
        }
    }

    fn name(&self, vertex: VertexId) -> &str {
        self.vertices
            .get(&vertex)
            .map(|v| &*v.name)
            .unwrap_or("?")
    }

    /// Abort what is left and hand back the report
    async fn finish(mut self) -> RunReport {
        if !self.workers.is_empty() {
            log::debug!("Aborting {} remaining workers", self.workers.len());
        }
        self.workers.abort_all();

        // Workers that completed before the abort still count, failed or not
        while let Some(joined) = self.workers.join_next().await {
            let Ok((vertex, result)) = joined else {
                continue;
            };
            if self.vertices.get(&vertex).map(|v| v.state) == Some(VertexState::Blocked) {
                self.collect(vertex, result);
            }
        }

        for launch in self.vertices.values_mut() {
            if launch.state == VertexState::Blocked {
                log::warn!("[{}] Not reached", launch.name);
                launch.state = VertexState::Pending;
            }
        }

        self.report
    }
}

/// Orchestrates start, stop and reload runs over a record batch
pub struct Coordinator {
    supervisor: Arc<dyn Supervisor>,
    recorder: Arc<dyn StateRecorder>,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(
        supervisor: Arc<dyn Supervisor>,
        recorder: Arc<dyn StateRecorder>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            supervisor,
            recorder,
            config,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Build, sort and select without executing anything
    pub fn plan<S: AsRef<str>>(
        &self,
        records: &[ServiceRecord],
        requested: &[S],
        transition: Transition,
    ) -> Result<RunPlan, CoordinatorError> {
        let graph = Graph::build(records, transition.uses_reversed_graph())?;
        // refuse any cyclic batch, even when the cycle is outside the selection
        graph.sort()?;
        let order = select(&graph, requested, self.config.propagate)?;

        let states = order
            .iter()
            .map(|id| {
                let name = graph.name(id);
                self.recorder
                    .read(name)
                    .map_err(|source| CoordinatorError::State {
                        service: name.to_string(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RunPlan::new(&graph, &order, transition, states))
    }

    /// Execute a run to completion
    pub async fn run<S: AsRef<str>>(
        &self,
        records: &[ServiceRecord],
        requested: &[S],
        transition: Transition,
    ) -> Result<RunReport, CoordinatorError> {
        let (_shutdown_tx, shutdown_rx) = watch::channel(());
        self.run_until(records, requested, transition, shutdown_rx)
            .await
    }

    /// Execute a run, aborting it when `shutdown` fires
    pub async fn run_until<S: AsRef<str>>(
        &self,
        records: &[ServiceRecord],
        requested: &[S],
        transition: Transition,
        mut shutdown: watch::Receiver<()>,
    ) -> Result<RunReport, CoordinatorError> {
        let plan = self.plan(records, requested, transition)?;
        // established once; every wait in the run shares it
        let deadline = self.config.timeout.map(|timeout| Instant::now() + timeout);

        log::info!(
            "{} run: {} services selected, {} to transition",
            transition,
            plan.entries.len(),
            plan.pending().count()
        );

        let mut run = CoordinatorRun::new(&plan, self.recorder.as_ref());
        run.launch(&plan, deadline, &self.supervisor);
        run.wait(deadline, &mut shutdown).await;
        let report = run.finish().await;

        if report.is_success() {
            log::info!("{} run completed", transition);
        } else {
            for (name, reason) in report.failures() {
                log::error!("[{}] {}", name, reason);
            }
            log::error!(
                "{} run failed ({} failed, {} not reached)",
                transition,
                report.failures().len(),
                report.not_reached().len()
            );
        }

        Ok(report)
    }
}

fn settled_word(code: OutcomeCode) -> &'static str {
    match code {
        OutcomeCode::Down => "down",
        _ => "up",
    }
}

/// None when the worker only gave up because a dependency failed
fn failure_reason(err: WorkerError) -> Option<FailureReason> {
    match err {
        WorkerError::DependencyFailed { .. } => None,
        WorkerError::DeadlineExceeded => Some(FailureReason::DeadlineExceeded),
        WorkerError::Supervisor(e) => Some(FailureReason::Rejected(e.to_string())),
        WorkerError::Notify(e) => Some(FailureReason::Protocol(e.to_string())),
        WorkerError::Crashed(msg) => Some(FailureReason::Crashed(msg)),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Errors that refuse a run before any worker starts
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Dependency graph error: {0}")]
    Build(#[from] BuildError),

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error("Selection error: {0}")]
    Select(#[from] SelectError),

    #[error("Failed to read state of '{service}': {source}")]
    State {
        service: String,
        #[source]
        source: StateError,
    },
}

impl CoordinatorError {
    /// Cycles call for fixing declarations rather than retrying
    pub fn is_cycle(&self) -> bool {
        matches!(
            self,
            CoordinatorError::Cycle(_)
                | CoordinatorError::Build(BuildError::Cycle(_))
                | CoordinatorError::Select(SelectError::Cycle(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::supervisor::SupervisorError;
    use crate::state::MemoryStateRecorder;
    use async_trait::async_trait;

    struct Refuse;

    #[async_trait]
    impl Supervisor for Refuse {
        async fn transition(
            &self,
            service: &str,
            _kind: ServiceKind,
            action: Action,
        ) -> Result<(), SupervisorError> {
            Err(SupervisorError::Rejected {
                service: service.to_string(),
                action,
                status: "exit code 1".to_string(),
            })
        }
    }

    struct Panics;

    #[async_trait]
    impl Supervisor for Panics {
        async fn transition(
            &self,
            _service: &str,
            _kind: ServiceKind,
            _action: Action,
        ) -> Result<(), SupervisorError> {
            panic!("supervisor exploded")
        }
    }

    fn coordinator(supervisor: Arc<dyn Supervisor>, recorder: MemoryStateRecorder) -> Coordinator {
        Coordinator::new(supervisor, Arc::new(recorder), CoordinatorConfig::default())
    }

    #[test]
    fn test_cycle_is_refused_before_running() {
        let records = vec![
            ServiceRecord::new("a", ServiceKind::Classic).depends_on(["b"]),
            ServiceRecord::new("b", ServiceKind::Classic).depends_on(["a"]),
            ServiceRecord::new("c", ServiceKind::Classic),
        ];
        let recorder = MemoryStateRecorder::new();
        let coord = coordinator(Arc::new(Refuse), recorder.clone());

        let err = coord.plan(&records, &["c"], Transition::Start).unwrap_err();
        assert!(err.is_cycle());
        assert!(recorder.writes().is_empty());
    }

    #[tokio::test]
    async fn test_rejection_marks_fatal_and_persists_not_up() {
        let records = vec![ServiceRecord::new("a", ServiceKind::Classic)];
        let recorder = MemoryStateRecorder::new();
        let coord = coordinator(Arc::new(Refuse), recorder.clone());

        let report = coord.run(&records, &["a"], Transition::Start).await.unwrap();
        assert!(!report.is_success());
        assert!(matches!(
            report.outcome("a"),
            Some(VertexOutcome::Fatal(FailureReason::Rejected(_)))
        ));
        assert_eq!(recorder.get("a").map(|s| s.is_up), Some(false));
    }

    #[tokio::test]
    async fn test_worker_panic_is_a_crash() {
        let records = vec![ServiceRecord::new("a", ServiceKind::Classic)];
        let coord = coordinator(Arc::new(Panics), MemoryStateRecorder::new());

        let report = coord.run(&records, &["a"], Transition::Start).await.unwrap();
        assert_eq!(
            report.outcome("a"),
            Some(&VertexOutcome::Fatal(FailureReason::Crashed(
                "supervisor exploded".to_string()
            )))
        );
    }

    #[tokio::test]
    async fn test_group_settles_without_supervisor() {
        let records = vec![ServiceRecord::new("empty", ServiceKind::Bundle)];
        let recorder = MemoryStateRecorder::new();
        let coord = coordinator(Arc::new(Refuse), recorder.clone());

        let report = coord
            .run(&records, &["empty"], Transition::Start)
            .await
            .unwrap();
        assert!(report.is_success());
        assert_eq!(report.outcome("empty"), Some(&VertexOutcome::Up));
        assert_eq!(recorder.get("empty").map(|s| s.is_up), Some(true));
    }

    #[tokio::test]
    async fn test_finished_worker_wins_over_expired_deadline() {
        let records = vec![ServiceRecord::new("g", ServiceKind::Bundle)];
        let recorder = MemoryStateRecorder::new();
        let coord = coordinator(Arc::new(Refuse), recorder.clone());
        let plan = coord.plan(&records, &["g"], Transition::Start).unwrap();

        let deadline = Some(Instant::now());
        let mut run = CoordinatorRun::new(&plan, &recorder);
        run.launch(&plan, deadline, &coord.supervisor);
        // worker done and deadline passed before the loop first polls
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let (_tx, mut shutdown) = watch::channel(());
        run.wait(deadline, &mut shutdown).await;
        let report = run.finish().await;

        assert_eq!(report.outcome("g"), Some(&VertexOutcome::Up));
        assert_eq!(recorder.get("g").map(|s| s.is_up), Some(true));
    }

    #[tokio::test]
    async fn test_interrupt_before_start_aborts() {
        let records = vec![ServiceRecord::new("a", ServiceKind::Classic)];
        let coord = coordinator(Arc::new(Refuse), MemoryStateRecorder::new());

        let (tx, rx) = watch::channel(());
        tx.send(()).unwrap();
        let report = coord
            .run_until(&records, &["a"], Transition::Start, rx)
            .await
            .unwrap();
        assert!(report.interrupted);
        assert_eq!(report.exit_code(), 130);
    }
}
