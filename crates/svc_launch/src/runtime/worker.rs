//! Per-vertex worker
//!
//! A worker blocks on its pipe until every vertex it waits on has
//! acknowledged, issues its action to the supervisor, then acknowledges
//! to every vertex waiting on it. It never touches persisted state.

use crate::config::ServiceKind;
use crate::graph::VertexId;
use crate::runtime::notify::{Ack, NotifyError, NotifyReceiver, NotifySender, OutcomeCode};
use crate::runtime::supervisor::{Action, Supervisor, SupervisorError};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;

/// Everything a worker needs, owned so the task can be spawned
#[derive(Debug)]
pub struct WorkerPlan {
    pub vertex: VertexId,
    pub name: Arc<str>,
    pub kind: ServiceKind,
    /// None for groups: they settle as soon as they are unblocked
    pub action: Option<Action>,
    /// Code acknowledged on success
    pub success: OutcomeCode,
    pub waits_on: Vec<VertexId>,
    pub notify: Vec<(VertexId, NotifySender)>,
    /// Shared run deadline
    pub deadline: Option<Instant>,
}

/// Drive one vertex through its transition
pub async fn run_worker(
    plan: WorkerPlan,
    mut inbox: NotifyReceiver,
    supervisor: Arc<dyn Supervisor>,
) -> Result<OutcomeCode, WorkerError> {
    let result = drive(&plan, &mut inbox, supervisor.as_ref()).await;

    let code = match &result {
        Ok(code) => *code,
        Err(_) => OutcomeCode::Fatal,
    };
    for (target, sender) in &plan.notify {
        if sender.send(Ack::new(plan.vertex, code)).is_err() {
            log::debug!(
                "[{}] Vertex {} no longer listening, ack dropped",
                plan.name,
                target
            );
        }
    }

    result
}

async fn drive(
    plan: &WorkerPlan,
    inbox: &mut NotifyReceiver,
    supervisor: &dyn Supervisor,
) -> Result<OutcomeCode, WorkerError> {
    let mut pending: HashSet<VertexId> = plan.waits_on.iter().copied().collect();
    if !pending.is_empty() {
        log::debug!("[{}] Waiting on {} acknowledgements", plan.name, pending.len());
    }

    while !pending.is_empty() {
        let ack = within(plan.deadline, inbox.recv()).await??;
        if !pending.remove(&ack.source) {
            log::debug!(
                "[{}] Ignoring unexpected ack from vertex {}",
                plan.name,
                ack.source
            );
            continue;
        }
        if ack.code.is_fatal() {
            return Err(WorkerError::DependencyFailed {
                dependency: ack.source,
            });
        }
    }

    let Some(action) = plan.action else {
        log::debug!("[{}] {} settled", plan.name, plan.kind);
        return Ok(plan.success);
    };

    log::info!("[{}] Requesting {}", plan.name, action);
    within(plan.deadline, supervisor.transition(&plan.name, plan.kind, action)).await??;
    log::info!("[{}] {} done", plan.name, action);

    Ok(plan.success)
}

/// Bound a wait by the run deadline
async fn within<F: Future>(deadline: Option<Instant>, fut: F) -> Result<F::Output, WorkerError> {
    match deadline {
        Some(at) => tokio::time::timeout_at(at, fut)
            .await
            .map_err(|_| WorkerError::DeadlineExceeded),
        None => Ok(fut.await),
    }
}

/// Errors that end a worker
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Dependency vertex {dependency} failed")]
    DependencyFailed { dependency: VertexId },

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Notify(#[from] NotifyError),

    #[error("Worker crashed: {0}")]
    Crashed(String),
}
