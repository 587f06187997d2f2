//! Run results

use crate::runtime::plan::Transition;
use indexmap::IndexMap;

/// Why a vertex failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The supervision primitive refused or failed the request
    Rejected(String),
    /// Still blocked when the run deadline expired
    DeadlineExceeded,
    /// The worker panicked
    Crashed(String),
    /// The worker received something it could not decode
    Protocol(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Rejected(detail) => write!(f, "rejected: {}", detail),
            FailureReason::DeadlineExceeded => write!(f, "timed out"),
            FailureReason::Crashed(detail) => write!(f, "worker crashed: {}", detail),
            FailureReason::Protocol(detail) => write!(f, "protocol error: {}", detail),
        }
    }
}

/// Final outcome of one selected vertex
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VertexOutcome {
    Up,
    Down,
    Reloaded,
    /// Persisted state already matched a start
    AlreadyUp,
    /// Persisted state already matched a stop
    AlreadyDown,
    Fatal(FailureReason),
    /// Aborted before it settled
    NotReached,
}

impl VertexOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, VertexOutcome::Fatal(_) | VertexOutcome::NotReached)
    }
}

/// Result of a coordinator run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub transition: Transition,
    /// Outcome per service, in run order
    pub outcomes: IndexMap<String, VertexOutcome>,
    /// Number of workers started
    pub workers_spawned: usize,
    /// The run was stopped by a shutdown request
    pub interrupted: bool,
    /// States that could not be written back
    pub persist_errors: Vec<String>,
}

impl RunReport {
    pub fn new(transition: Transition) -> Self {
        Self {
            transition,
            outcomes: IndexMap::new(),
            workers_spawned: 0,
            interrupted: false,
            persist_errors: Vec::new(),
        }
    }

    /// Every selected vertex settled as requested
    pub fn is_success(&self) -> bool {
        !self.interrupted && self.outcomes.values().all(VertexOutcome::is_success)
    }

    pub fn outcome(&self, name: &str) -> Option<&VertexOutcome> {
        self.outcomes.get(name)
    }

    /// Failing vertices and their reasons
    pub fn failures(&self) -> Vec<(&str, &FailureReason)> {
        self.outcomes
            .iter()
            .filter_map(|(name, outcome)| match outcome {
                VertexOutcome::Fatal(reason) => Some((name.as_str(), reason)),
                _ => None,
            })
            .collect()
    }

    pub fn not_reached(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| **o == VertexOutcome::NotReached)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Process exit code for this result
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else if self.interrupted {
            130
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_and_exit_codes() {
        let mut report = RunReport::new(Transition::Start);
        report.outcomes.insert("a".into(), VertexOutcome::Up);
        report.outcomes.insert("b".into(), VertexOutcome::AlreadyUp);
        assert!(report.is_success());
        assert_eq!(report.exit_code(), 0);

        report.outcomes.insert(
            "c".into(),
            VertexOutcome::Fatal(FailureReason::DeadlineExceeded),
        );
        report.outcomes.insert("d".into(), VertexOutcome::NotReached);
        assert!(!report.is_success());
        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.failures(), vec![("c", &FailureReason::DeadlineExceeded)]);
        assert_eq!(report.not_reached(), vec!["d"]);

        report.interrupted = true;
        assert_eq!(report.exit_code(), 130);
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(FailureReason::DeadlineExceeded.to_string(), "timed out");
        assert_eq!(
            FailureReason::Rejected("exit code 3".into()).to_string(),
            "rejected: exit code 3"
        );
    }
}
