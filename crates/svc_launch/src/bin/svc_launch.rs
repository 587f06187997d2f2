//! svc_launch CLI
//!
//! Usage:
//!   svc_launch web
//!   svc_launch --stop web db --timeout-ms 5000
//!   svc_launch -r services.yaml --dry-run base

use anyhow::Context;
use std::sync::Arc;
use svc_launch::{
    CommandSupervisor, Coordinator, FileStateRecorder, Graph, LaunchArgs, ServiceRecords,
};
use tokio::sync::watch;

/// Exit code for unusable input: bad records, unknown names, cycles
const EXIT_INVALID: i32 = 2;

#[tokio::main]
async fn main() {
    let args: LaunchArgs = argh::from_env();

    let env = env_logger::Env::default().default_filter_or(args.log_filter());
    env_logger::init_from_env(env);

    let code = match run(args).await {
        Ok(code) => code,
        Err(e) => {
            log::error!("{:#}", e);
            EXIT_INVALID
        }
    };

    log::debug!("svc_launch exiting with code {}", code);
    std::process::exit(code);
}

async fn run(args: LaunchArgs) -> anyhow::Result<i32> {
    let transition = args.transition().map_err(anyhow::Error::msg)?;

    log::info!("Loading service records: {}", args.records);
    let batch = ServiceRecords::from_file(&args.records)
        .with_context(|| format!("Failed to load service records from '{}'", args.records))?;
    let records = batch.to_records();

    // Validate only mode
    if args.validate {
        let graph = Graph::build(&records, false)?;
        let order = graph.sort()?;
        println!("Service records '{}' are valid", args.records);
        println!("  Version: {}", batch.version);
        println!("  Services: {}", graph.len());
        println!("  Dependencies: {}", graph.edge_count());
        println!("  Start order: {}", order.names(&graph).join(", "));
        return Ok(0);
    }

    let requested = args.requested();
    if requested.is_empty() {
        anyhow::bail!("No services requested");
    }

    let state_dir = args.state_dir();
    log::debug!("State directory: {}", state_dir.display());

    let supervisor = CommandSupervisor::new(args.supervisor.as_str())
        .with_args(args.supervisor_arg.iter().cloned());
    let coordinator = Coordinator::new(
        Arc::new(supervisor),
        Arc::new(FileStateRecorder::new(state_dir)),
        args.coordinator_config(),
    );

    // Dry run mode
    if args.dry_run {
        let plan = coordinator.plan(&records, &requested, transition)?;
        println!("{}", plan);
        return Ok(0);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    ctrlc::set_handler(move || {
        log::info!("Received Ctrl+C, aborting run...");
        let _ = shutdown_tx.send(());
    })
    .context("Error setting Ctrl+C handler")?;

    let report = coordinator
        .run_until(&records, &requested, transition, shutdown_rx)
        .await?;

    for (name, outcome) in &report.outcomes {
        log::debug!("[{}] {:?}", name, outcome);
    }
    if !report.persist_errors.is_empty() {
        log::warn!(
            "{} service states could not be recorded",
            report.persist_errors.len()
        );
    }

    Ok(report.exit_code())
}
