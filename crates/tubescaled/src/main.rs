//! tubescaled — the tubescale daemon.
//!
//! Watches every beanstalkd tube and keeps one consumer ReplicaSet per tube
//! sized to the tube's ready backlog:
//! - Stats collector (beanstalkd)
//! - Replica reconciler (Kubernetes apps/v1 ReplicaSets)
//! - Controller loop
//!
//! # Usage
//!
//! ```text
//! tubescaled --config /etc/tubescale/tubescaled.toml
//! tubescaled --queue-addr 127.0.0.1:11300 --dry-run --once
//! ```

mod config;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tubescale_autoscale::{Controller, Reconciler};
use tubescale_orchestrator::{
    InMemoryReplicaSets, KubeClient, KubeConfig, ReplicaSetApi, ReplicaSetTemplate,
};
use tubescale_queue::{BeanstalkClient, Collector};

use crate::config::{DaemonConfig, OrchestratorConfig};

const DEFAULT_LOG_FILTER: &str = "info,tubescaled=debug,tubescale=debug";

#[derive(Parser)]
#[command(name = "tubescaled", about = "Scale beanstalkd consumers by queue depth")]
struct Cli {
    /// Path to a tubescaled.toml.
    #[arg(long)]
    config: Option<PathBuf>,

    /// beanstalkd address (`host:port`).
    #[arg(long)]
    queue_addr: Option<String>,

    /// Pause between ticks, e.g. `5s` or `500ms`.
    #[arg(long)]
    interval: Option<String>,

    /// ReplicaSet template file.
    #[arg(long)]
    template: Option<PathBuf>,

    /// Namespace the ReplicaSets live in.
    #[arg(long)]
    namespace: Option<String>,

    /// Run a single tick and exit.
    #[arg(long)]
    once: bool,

    /// Reconcile against an in-memory store instead of the cluster.
    #[arg(long)]
    dry_run: bool,

    /// Emit logs as JSON.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn apply(&self, config: &mut DaemonConfig) {
        if let Some(addr) = &self.queue_addr {
            config.queue.addr = addr.clone();
        }
        if let Some(interval) = &self.interval {
            config.controller.interval = interval.clone();
        }
        if let Some(template) = &self.template {
            config.orchestrator.template = template.clone();
        }
        if let Some(namespace) = &self.namespace {
            config.orchestrator.namespace = Some(namespace.clone());
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = DaemonConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.validate()?;

    run(config, cli.once, cli.dry_run).await
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run(config: DaemonConfig, once: bool, dry_run: bool) -> anyhow::Result<()> {
    info!("tubescale daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    // Template.
    let template_path = &config.orchestrator.template;
    let template = ReplicaSetTemplate::from_file(template_path)
        .context("loading ReplicaSet template")?;
    info!(path = ?template_path, "template loaded");

    // Queue.
    let queue = BeanstalkClient::connect(config.queue.addr.clone(), config.queue.timeout()?)
        .await
        .context("connecting to beanstalkd")?;
    info!(addr = %queue.addr(), "connected to beanstalkd");

    let interval = config.controller.interval()?;
    let backoff = config.retry.backoff()?;
    let name_prefix = config.orchestrator.name_prefix.clone();
    let collector = Collector::new(queue);

    // Orchestrator.
    if dry_run {
        warn!("dry run: ReplicaSet writes go to an in-memory store, the cluster is untouched");
        let reconciler = Reconciler::new(InMemoryReplicaSets::new(), template)
            .with_name_prefix(name_prefix)
            .with_backoff(backoff);
        drive(Controller::new(collector, reconciler), interval, once).await
    } else {
        let kube = KubeClient::new(kube_config(&config.orchestrator)?)
            .context("building kubernetes client")?;
        let reconciler = Reconciler::new(kube, template)
            .with_name_prefix(name_prefix)
            .with_backoff(backoff);
        drive(Controller::new(collector, reconciler), interval, once).await
    }
}

fn kube_config(config: &OrchestratorConfig) -> anyhow::Result<KubeConfig> {
    let timeout = config.timeout()?;
    let kube = match (&config.server, &config.credentials_dir) {
        (None, _) => KubeConfig::in_cluster(timeout).context("loading in-cluster configuration")?,
        (Some(server), Some(dir)) => {
            let mut kube = KubeConfig::from_service_account(dir, timeout)
                .with_context(|| format!("loading credentials from {}", dir.display()))?;
            kube.server = server.clone();
            kube
        }
        (Some(server), None) => KubeConfig::for_server(server.clone(), timeout),
    };

    Ok(match &config.namespace {
        Some(namespace) => kube.with_namespace(namespace.clone()),
        None => kube,
    })
}

async fn drive<A: ReplicaSetApi>(
    controller: Controller<BeanstalkClient, A>,
    interval: Duration,
    once: bool,
) -> anyhow::Result<()> {
    if once {
        let report = controller.tick().await.context("listing tubes")?;
        info!(?report, "single tick complete");
        return Ok(());
    }

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    controller.run(interval, shutdown_rx).await;

    info!("tubescale daemon stopped");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "can't listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "can't listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
