//! Service Launch Orchestrator
//!
//! Brings a set of supervised services up, down or through a reload in
//! dependency order, running every independent service concurrently.
//!
//! # Overview
//!
//! A run:
//! - Builds a dependency graph from a batch of service records
//! - Selects the requested services, pulling in dependencies and group members
//! - Starts one worker per selected service; workers wait on each other
//!   through notification pipes rather than a central scheduler
//! - Writes each service's new state back as it settles
//!
//! Stop runs walk the same graph reversed, so dependents go down first.
//!
//! # Example Record Batch
//!
//! ```yaml
//! version: "1.0"
//!
//! services:
//!   logger:
//!     kind: classic
//!
//!   network:
//!     kind: oneshot
//!     depends_on:
//!       - logger
//!
//!   base:
//!     kind: bundle
//!     contents:
//!       - logger
//!       - network
//! ```

pub mod cli;
pub mod config;
pub mod graph;
pub mod runtime;
pub mod state;

pub use cli::LaunchArgs;
pub use config::{CoordinatorConfig, RecordsError, ServiceKind, ServiceRecord, ServiceRecords};
pub use graph::{BuildError, CycleError, Graph, SelectError, SortedList, VertexId};
pub use runtime::{
    Action, CommandSupervisor, Coordinator, CoordinatorError, FailureReason, RunPlan, RunReport,
    Supervisor, SupervisorError, Transition, VertexOutcome,
};
pub use state::{
    FileStateRecorder, MemoryStateRecorder, PersistedServiceState, StateError, StateRecorder,
};
