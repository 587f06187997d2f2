//! Persisted per-service state
//!
//! The coordinator reads the state of every selected service before a run
//! and writes it back as each service settles. Workers never touch it.

mod file;
mod memory;

pub use file::FileStateRecorder;
pub use memory::MemoryStateRecorder;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid service name: {0}")]
    InvalidName(String),

    #[error("State store lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, StateError>;

/// What the supervision tree last knew about a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedServiceState {
    pub is_up: bool,
    pub is_supervised: bool,
    pub needs_reload: bool,
    pub needs_init: bool,
}

impl Default for PersistedServiceState {
    /// A service that was never brought into the supervision tree
    fn default() -> Self {
        Self {
            is_up: false,
            is_supervised: false,
            needs_reload: false,
            needs_init: true,
        }
    }
}

impl PersistedServiceState {
    /// State after a successful up or reload
    pub fn settled_up(self) -> Self {
        Self {
            is_up: true,
            is_supervised: true,
            needs_reload: false,
            needs_init: false,
        }
    }

    /// State after a successful down
    pub fn settled_down(self) -> Self {
        Self {
            is_up: false,
            ..self
        }
    }

    /// State after a failed start: never claim the service is up
    pub fn failed_up(self) -> Self {
        Self {
            is_up: false,
            ..self
        }
    }
}

/// Storage for persisted service states
pub trait StateRecorder: Send + Sync {
    /// Read a service's state; unknown services read as the default state
    fn read(&self, name: &str) -> Result<PersistedServiceState>;

    /// Overwrite a service's state
    fn write(&self, name: &str, state: &PersistedServiceState) -> Result<()>;
}

/// Check that a service name is safe to use as a record key
pub fn validate_service_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 64 {
        return Err(StateError::InvalidName(format!(
            "service name must be 1-64 characters, got: {}",
            name.len()
        )));
    }
    if name.starts_with('.') {
        return Err(StateError::InvalidName(format!(
            "service name cannot start with '.': {}",
            name
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
    {
        return Err(StateError::InvalidName(format!(
            "service name contains invalid characters: {}",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_needs_init() {
        let state = PersistedServiceState::default();
        assert!(!state.is_up);
        assert!(!state.is_supervised);
        assert!(state.needs_init);
    }

    #[test]
    fn test_settle_transitions() {
        let fresh = PersistedServiceState {
            needs_reload: true,
            ..Default::default()
        };

        let up = fresh.settled_up();
        assert!(up.is_up && up.is_supervised);
        assert!(!up.needs_reload && !up.needs_init);

        let down = up.settled_down();
        assert!(!down.is_up);
        assert!(down.is_supervised);

        assert_eq!(up.failed_up(), down);
    }

    #[test]
    fn test_validate_service_name() {
        assert!(validate_service_name("tty@tty1").is_ok());
        assert!(validate_service_name("net-dhcp_v4.eth0").is_ok());
        assert!(validate_service_name("").is_err());
        assert!(validate_service_name(&"a".repeat(65)).is_err());
        assert!(validate_service_name("../etc").is_err());
        assert!(validate_service_name("a/b").is_err());
        assert!(validate_service_name("a\0b").is_err());
    }
}
