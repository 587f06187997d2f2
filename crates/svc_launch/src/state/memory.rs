//! In-memory state recorder for tests and embedders without a state directory

use super::{PersistedServiceState, Result, StateError, StateRecorder};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Keeps states in a shared map; clones observe each other's writes
#[derive(Debug, Clone, Default)]
pub struct MemoryStateRecorder {
    states: Arc<Mutex<HashMap<String, PersistedServiceState>>>,
    writes: Arc<Mutex<Vec<String>>>,
}

impl MemoryStateRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a state without counting it as a write
    pub fn with_state(self, name: &str, state: PersistedServiceState) -> Self {
        if let Ok(mut states) = self.states.lock() {
            states.insert(name.to_string(), state);
        }
        self
    }

    /// Names written so far, in write order
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// Current state, or None if the service was never recorded
    pub fn get(&self, name: &str) -> Option<PersistedServiceState> {
        self.states.lock().ok().and_then(|s| s.get(name).copied())
    }
}

impl StateRecorder for MemoryStateRecorder {
    fn read(&self, name: &str) -> Result<PersistedServiceState> {
        let states = self.states.lock().map_err(|_| StateError::Poisoned)?;
        Ok(states.get(name).copied().unwrap_or_default())
    }

    fn write(&self, name: &str, state: &PersistedServiceState) -> Result<()> {
        self.states
            .lock()
            .map_err(|_| StateError::Poisoned)?
            .insert(name.to_string(), *state);
        self.writes
            .lock()
            .map_err(|_| StateError::Poisoned)?
            .push(name.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_and_write_log() {
        let recorder = MemoryStateRecorder::new()
            .with_state("seeded", PersistedServiceState::default().settled_up());
        assert!(recorder.read("seeded").unwrap().is_up);
        assert!(recorder.writes().is_empty());

        let state = PersistedServiceState {
            needs_reload: true,
            ..Default::default()
        };
        let shared = recorder.clone();
        shared.write("svc", &state).unwrap();

        assert_eq!(recorder.read("svc").unwrap(), state);
        assert_eq!(recorder.writes(), vec!["svc"]);
    }

    #[test]
    fn test_poisoned_store_reports_errors() {
        let recorder = MemoryStateRecorder::new();
        let holder = recorder.clone();
        let _ = std::thread::spawn(move || {
            let _guard = holder.states.lock().unwrap();
            panic!("writer died holding the lock");
        })
        .join();

        let state = PersistedServiceState::default();
        assert!(matches!(
            recorder.write("svc", &state),
            Err(StateError::Poisoned)
        ));
        assert!(matches!(recorder.read("svc"), Err(StateError::Poisoned)));
        assert!(recorder.writes().is_empty());
    }
}
