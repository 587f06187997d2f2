//! Command-line interface for svc_launch

use crate::config::{get_state_dir, CoordinatorConfig};
use crate::runtime::Transition;
use argh::FromArgs;
use std::path::PathBuf;
use std::time::Duration;

/// Start, stop or reload supervised services in dependency order
#[derive(FromArgs, Debug)]
pub struct LaunchArgs {
    /// services to act on (names may also be comma-separated)
    #[argh(positional)]
    pub services: Vec<String>,

    /// bring the services down instead of up
    #[argh(switch)]
    pub stop: bool,

    /// reload the services
    #[argh(switch)]
    pub reload: bool,

    /// act only on the named services, not their dependencies
    #[argh(switch)]
    pub no_propagate: bool,

    /// deadline for the whole run in milliseconds
    #[argh(option, short = 't', from_str_fn(parse_timeout))]
    pub timeout_ms: Option<Duration>,

    /// path to the service record batch (default: services.yaml)
    #[argh(option, short = 'r', default = "String::from(\"services.yaml\")")]
    pub records: String,

    /// directory holding persisted service states
    #[argh(option)]
    pub state_dir: Option<PathBuf>,

    /// program driving the supervision tree (default: svc-ctl)
    #[argh(option, short = 's', default = "String::from(\"svc-ctl\")")]
    pub supervisor: String,

    /// argument passed to the supervisor before the action (repeatable)
    #[argh(option)]
    pub supervisor_arg: Vec<String>,

    /// show the run plan without executing
    #[argh(switch)]
    pub dry_run: bool,

    /// validate the record batch and exit
    #[argh(switch)]
    pub validate: bool,

    /// log level (error, warn, info, debug, trace)
    #[argh(option, short = 'l', default = "String::from(\"info\")")]
    pub log_level: String,
}

/// Parse a timeout in milliseconds
fn parse_timeout(s: &str) -> Result<Duration, String> {
    let ms: u64 = s
        .trim()
        .parse()
        .map_err(|_| format!("Invalid timeout '{}'. Expected milliseconds", s))?;
    if ms == 0 {
        return Err("Timeout must be greater than zero".to_string());
    }
    Ok(Duration::from_millis(ms))
}

impl LaunchArgs {
    /// Requested run direction
    pub fn transition(&self) -> Result<Transition, String> {
        match (self.stop, self.reload) {
            (true, true) => Err("--stop and --reload are mutually exclusive".to_string()),
            (true, false) => Ok(Transition::Stop),
            (false, true) => Ok(Transition::Reload),
            (false, false) => Ok(Transition::Start),
        }
    }

    /// Requested service names, comma lists flattened and duplicates dropped
    pub fn requested(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for name in self.services.iter().flat_map(|s| s.split(',')) {
            let name = name.trim();
            if !name.is_empty() && !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        names
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        let config = CoordinatorConfig::default().with_propagate(!self.no_propagate);
        match self.timeout_ms {
            Some(timeout) => config.with_timeout(timeout),
            None => config,
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(get_state_dir)
    }

    /// Filter for env_logger, unknown levels fall back to info
    pub fn log_filter(&self) -> &'static str {
        match self.log_level.to_lowercase().as_str() {
            "error" => "error",
            "warn" => "warn",
            "debug" => "debug",
            "trace" => "trace",
            _ => "info",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> LaunchArgs {
        LaunchArgs::from_args(&["svc_launch"], args).unwrap()
    }

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout("250"), Ok(Duration::from_millis(250)));
        assert!(parse_timeout("0").is_err());
        assert!(parse_timeout("soon").is_err());
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["web"]);
        assert_eq!(args.transition(), Ok(Transition::Start));
        assert_eq!(args.records, "services.yaml");
        assert_eq!(args.supervisor, "svc-ctl");

        let config = args.coordinator_config();
        assert!(config.propagate);
        assert_eq!(config.timeout, None);
    }

    #[test]
    fn test_transition_flags() {
        assert_eq!(parse(&["--stop", "web"]).transition(), Ok(Transition::Stop));
        assert_eq!(parse(&["--reload", "web"]).transition(), Ok(Transition::Reload));
        assert!(parse(&["--stop", "--reload", "web"]).transition().is_err());
    }

    #[test]
    fn test_requested_flattens_commas() {
        let args = parse(&["web,db", "cache", "db"]);
        assert_eq!(args.requested(), vec!["web", "db", "cache"]);
    }

    #[test]
    fn test_config_from_flags() {
        let args = parse(&["--no-propagate", "--timeout-ms", "1500", "web"]);
        let config = args.coordinator_config();
        assert!(!config.propagate);
        assert_eq!(config.timeout, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_supervisor_args_repeat() {
        let args = parse(&[
            "--supervisor-arg",
            "scan",
            "--supervisor-arg",
            "/run/service",
            "web",
        ]);
        assert_eq!(args.supervisor_arg, vec!["scan", "/run/service"]);
    }

    #[test]
    fn test_explicit_state_dir_wins() {
        let args = parse(&["--state-dir", "/var/lib/svc", "web"]);
        assert_eq!(args.state_dir(), PathBuf::from("/var/lib/svc"));
    }
}
