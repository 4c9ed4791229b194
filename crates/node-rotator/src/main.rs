//! node-rotator - retire aging managed nodes one at a time.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, ValueEnum};
use tokio::signal;
use tokio::time::sleep;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use node_rotator::{
    KubeCluster, KubectlDrainer, NodeOutcome, RotationPlanner, RotatorConfig, RunSummary,
};

/// Cordon, de-risk and drain managed nodes past their maximum age.
///
/// Behaviour is configured through environment variables
/// (`MIN_NODE_AGE_DAYS`, `CRITICAL_WORKLOADS`, `NODE_DRAIN_TIMEOUT`, ...).
#[derive(Parser)]
#[command(name = "node-rotator")]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Log output format.
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(cli: &Cli) {
    let default = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into());
    let registry = tracing_subscriber::registry().with(filter);

    match cli.log_format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    info!("Starting node-rotator v{}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(RotatorConfig::from_env());
    info!(
        min_node_age_days = config.min_node_age_days,
        min_ready_nodes = config.min_ready_nodes,
        node_drain_timeout_secs = config.node_drain_timeout.as_secs(),
        total_wait_cycles = config.total_wait_cycles,
        managed_node_selector = %config.managed_node_selector,
        rotate_self_node = config.rotate_self_node,
        "Loaded configuration"
    );

    if config.last_run_passed(Local::now().time()) {
        info!(last_run = ?config.last_run, "Last run cutoff already passed, nothing to do");
        return Ok(());
    }

    tokio::select! {
        result = run(config) => result,
        () = shutdown_signal() => {
            warn!("Run interrupted, nodes may be left cordoned");
            Ok(())
        }
    }
}

async fn run(config: Arc<RotatorConfig>) -> Result<()> {
    info!(
        secs = config.startup_sleep.as_secs(),
        "Waiting before startup"
    );
    sleep(config.startup_sleep).await;

    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    info!("Connected to Kubernetes cluster");

    let planner = RotationPlanner::new(
        Arc::new(KubeCluster::new(client)),
        Arc::new(KubectlDrainer::default()),
        config,
    );

    let summary = planner.run().await.context("Node rotation failed")?;
    report(&summary);
    Ok(())
}

fn report(summary: &RunSummary) {
    let failed = summary.failures().count();
    info!(
        outcome = ?summary.outcome,
        processed = summary.nodes.len(),
        failed,
        new_nodes = ?summary.new_nodes,
        "Run finished"
    );

    match serde_json::to_string(summary) {
        Ok(json) => info!(summary = %json, "Run summary"),
        Err(e) => warn!(error = %e, "Failed to serialize run summary"),
    }

    for outcome in summary.failures() {
        match outcome {
            NodeOutcome::Rotated(report) => warn!(
                node = %report.node,
                state = %report.state,
                remaining_pods = report.remaining_pods.len(),
                "Node not fully drained"
            ),
            NodeOutcome::Failed { node, error } => {
                error!(node = %node, error = %error, "Node rotation failed");
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down");
        },
    }
}
