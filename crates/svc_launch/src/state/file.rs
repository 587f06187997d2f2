//! Directory-backed state recorder (one JSON document per service)

use super::{validate_service_name, PersistedServiceState, Result, StateRecorder};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// On-disk document
#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    state: PersistedServiceState,
    /// RFC 3339 timestamp of the last write
    updated_at: String,
}

/// Persists each service state as `<dir>/<name>.json`
#[derive(Debug, Clone)]
pub struct FileStateRecorder {
    dir: PathBuf,
}

impl FileStateRecorder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Recorder rooted at the default state directory
    pub fn from_default_dir() -> Self {
        Self::new(crate::config::get_state_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        validate_service_name(name)?;
        Ok(self.dir.join(format!("{name}.json")))
    }
}

impl StateRecorder for FileStateRecorder {
    fn read(&self, name: &str) -> Result<PersistedServiceState> {
        let path = self.path_for(name)?;
        if !path.exists() {
            return Ok(PersistedServiceState::default());
        }

        let content = fs::read_to_string(&path)?;
        let file: StateFile = serde_json::from_str(&content)?;
        Ok(file.state)
    }

    fn write(&self, name: &str, state: &PersistedServiceState) -> Result<()> {
        let path = self.path_for(name)?;
        fs::create_dir_all(&self.dir)?;

        let content = serde_json::to_string_pretty(&StateFile {
            state: *state,
            updated_at: chrono::Utc::now().to_rfc3339(),
        })?;

        // write beside the target, then rename over it
        let tmp = self.dir.join(format!(".{name}.json.tmp"));
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &path)?;

        log::debug!("[{}] State written: {:?}", name, state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateError;

    #[test]
    fn test_missing_record_reads_default() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = FileStateRecorder::new(dir.path());
        assert_eq!(
            recorder.read("never-seen").unwrap(),
            PersistedServiceState::default()
        );
    }

    #[test]
    fn test_write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = FileStateRecorder::new(dir.path().join("nested/state"));

        for state in [
            PersistedServiceState::default(),
            PersistedServiceState::default().settled_up(),
            PersistedServiceState {
                is_up: false,
                is_supervised: true,
                needs_reload: true,
                needs_init: false,
            },
        ] {
            recorder.write("sshd", &state).unwrap();
            assert_eq!(recorder.read("sshd").unwrap(), state);
        }

        let leftovers: Vec<_> = fs::read_dir(recorder.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(leftovers, vec!["sshd.json"]);
    }

    #[test]
    fn test_document_has_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = FileStateRecorder::new(dir.path());
        recorder
            .write("ntpd", &PersistedServiceState::default())
            .unwrap();

        let raw = fs::read_to_string(dir.path().join("ntpd.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(value["updated_at"].as_str().is_some());
        assert_eq!(value["state"]["needs_init"], serde_json::Value::Bool(true));
    }

    #[test]
    fn test_corrupt_record_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bad.json"), "{ not json").unwrap();
        let recorder = FileStateRecorder::new(dir.path());
        assert!(matches!(recorder.read("bad"), Err(StateError::Json(_))));
    }

    #[test]
    fn test_path_traversal_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = FileStateRecorder::new(dir.path());
        assert!(matches!(
            recorder.write("../escape", &PersistedServiceState::default()),
            Err(StateError::InvalidName(_))
        ));
    }
}
