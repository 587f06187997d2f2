//! Run settings and well-known paths

use std::path::PathBuf;
use std::time::Duration;

/// Environment variable overriding the svc_launch home directory
pub const HOME_ENV: &str = "SVC_LAUNCH_HOME";

/// Coordinator configuration
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Deadline for the whole run (None = wait forever)
    pub timeout: Option<Duration>,
    /// Expand the requested services along their edges
    pub propagate: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            propagate: true,
        }
    }
}

impl CoordinatorConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_propagate(mut self, propagate: bool) -> Self {
        self.propagate = propagate;
        self
    }
}

/// Get the svc_launch home directory
///
/// Resolution order:
/// 1. `SVC_LAUNCH_HOME` env var (used as-is)
/// 2. `~/.svc_launch`
/// 3. `/tmp/.svc_launch` when no home directory is known
pub fn get_svc_launch_home() -> PathBuf {
    if let Some(home) = std::env::var_os(HOME_ENV) {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".svc_launch")
}

/// Get the directory holding persisted service states
pub fn get_state_dir() -> PathBuf {
    get_svc_launch_home().join("state")
}
