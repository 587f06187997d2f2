//! Interface to the external supervision primitive

use crate::config::ServiceKind;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

/// Request sent to the supervision primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Up,
    Down,
    Reload,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Up => "up",
            Action::Down => "down",
            Action::Reload => "reload",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that can move a supervised service between states
///
/// `transition` resolves once the primitive reports completion. Dropping
/// the future must abandon the request.
#[async_trait]
pub trait Supervisor: Send + Sync {
    async fn transition(
        &self,
        service: &str,
        kind: ServiceKind,
        action: Action,
    ) -> Result<(), SupervisorError>;
}

/// Drives the primitive through an external program
///
/// Each request runs `<program> [args...] <action> <service>` and succeeds
/// when the program exits with status 0.
#[derive(Debug, Clone)]
pub struct CommandSupervisor {
    program: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    working_dir: Option<PathBuf>,
}

impl CommandSupervisor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
        }
    }

    /// Fixed arguments placed before the action
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl Supervisor for CommandSupervisor {
    async fn transition(
        &self,
        service: &str,
        kind: ServiceKind,
        action: Action,
    ) -> Result<(), SupervisorError> {
        log::debug!(
            "[{}] Running: {} {} {} {}",
            service,
            self.program,
            self.args.join(" "),
            action,
            service
        );

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(action.as_str())
            .arg(service)
            .envs(&self.env)
            .env("SVC_LAUNCH_KIND", kind.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| SupervisorError::SpawnFailed {
            service: service.to_string(),
            source: e,
        })?;

        if let Some(stdout) = child.stdout.take() {
            forward_output(service.to_string(), stdout, false);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(service.to_string(), stderr, true);
        }

        let status = child.wait().await.map_err(|e| SupervisorError::WaitFailed {
            service: service.to_string(),
            source: e,
        })?;

        if status.success() {
            Ok(())
        } else {
            Err(SupervisorError::Rejected {
                service: service.to_string(),
                action,
                status: describe_status(status),
            })
        }
    }
}

/// Log every line the primitive prints
fn forward_output<R>(service: String, stream: R, is_stderr: bool)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if is_stderr {
                log::warn!("[{}] {}", service, line);
            } else {
                log::info!("[{}] {}", service, line);
            }
        }
    });
}

fn describe_status(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit code {code}");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("killed by signal {signal}");
        }
    }
    "unknown exit status".to_string()
}

/// Errors reported by a supervisor
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Failed to run supervisor for '{service}': {source}")]
    SpawnFailed {
        service: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed waiting on supervisor for '{service}': {source}")]
    WaitFailed {
        service: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Supervisor rejected '{action}' for '{service}': {status}")]
    Rejected {
        service: String,
        action: Action,
        status: String,
    },
}
