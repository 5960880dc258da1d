//! Node-local supervisor daemon.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use warden_identity_store_mock::MockIdentityStore;
use warden_process::LocalProcessSpawner;
use warden_supervisor::{Supervisor, SupervisorConfig, SupervisorOptions};

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the supervisor configuration file
    #[arg(long, env = "WARDEN_CONFIG", default_value = "/etc/warden/supervisor.yaml")]
    config: PathBuf,

    /// Control-plane listen address, overrides the configuration file
    #[arg(long)]
    listen: Option<String>,

    /// Instance id, overrides the configuration file
    #[arg(long)]
    instance_id: Option<String>,

    /// JSON file holding this node's identity
    #[arg(long)]
    identity_file: Option<PathBuf>,

    /// Log filter used when `RUST_LOG` is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&args.log_level)
            .with_context(|| format!("invalid log level {}", args.log_level))?,
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = SupervisorConfig::from_file(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;

    if let Some(listen) = args.listen {
        config.supervisor.listen_address = listen;
    }
    if let Some(instance_id) = args.instance_id {
        config.supervisor.instance_id = instance_id;
    }

    let identity_store = match &args.identity_file {
        Some(path) => MockIdentityStore::from_file(path)
            .with_context(|| format!("failed to load identity from {}", path.display()))?,
        None => {
            warn!(
                "no identity file given, {} will start without node identity",
                config.supervisor.mesh_service
            );
            MockIdentityStore::empty()
        }
    };

    info!(
        "supervisor {} managing {} services",
        config.supervisor.instance_id,
        config.services.len()
    );

    let mut terminate =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    let supervisor = Supervisor::new(SupervisorOptions::new(
        config,
        identity_store,
        Arc::new(LocalProcessSpawner::new()),
    ));

    let server = supervisor.serve().await?;
    supervisor.spawn_heartbeat_monitor();

    let started = tokio::select! {
        result = supervisor.start_all() => Some(result),
        () = wait_for_shutdown_signal(&mut terminate) => None,
    };

    let outcome = match started {
        Some(Ok(())) => {
            for (name, status) in supervisor.health().get_configured_service_status().await {
                info!("{}: {}", name, status);
            }
            wait_for_shutdown_signal(&mut terminate).await;
            Ok(())
        }
        Some(Err(e)) => {
            error!("startup failed: {}", e);
            Err(e)
        }
        None => {
            warn!("shutdown requested during startup");
            Ok(())
        }
    };

    // A second signal abandons waiting for services to drain.
    let cancel = CancellationToken::new();
    let force = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("second interrupt, no longer waiting for services");
            force.cancel();
        }
    });

    let shutdown = supervisor.shutdown(&cancel, SHUTDOWN_DEADLINE).await;
    server.shutdown().await;

    outcome?;
    shutdown?;
    Ok(())
}

async fn wait_for_shutdown_signal(terminate: &mut Signal) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("failed to listen for ctrl-c: {}", e);
            }
            info!("received interrupt, shutting down");
        }
        _ = terminate.recv() => {
            info!("received SIGTERM, shutting down");
        }
    }
}
