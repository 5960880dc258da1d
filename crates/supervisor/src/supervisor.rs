//! Wires the orchestration engine together.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use warden_control_rpc::{ChannelConfig, ServerHandle, SupervisorServer};
use warden_identity_store::IdentityStore;
use warden_process::ProcessSpawner;

use crate::clock::{Clock, TokioClock};
use crate::config::{SupervisorConfig, SupervisorSettings, Timeouts};
use crate::connector::{ServiceConnector, TcpConnector};
use crate::enrichment::MeshEnricher;
use crate::error::{Error, Result};
use crate::handler::RegistryHandler;
use crate::health::HealthAggregator;
use crate::lifecycle::LifecycleController;
use crate::registry::ServiceRegistry;

/// Collaborators a [`Supervisor`] is built from.
pub struct SupervisorOptions<I: IdentityStore> {
    /// Time source for every wait.
    pub clock: Arc<dyn Clock>,

    /// Parsed configuration.
    pub config: SupervisorConfig,

    /// Opens control connections; defaults to TCP.
    pub connector: Option<Arc<dyn ServiceConnector>>,

    /// Node identity for the mesh service.
    pub identity_store: I,

    /// Launches service processes.
    pub spawner: Arc<dyn ProcessSpawner>,

    /// Timing knobs.
    pub timeouts: Timeouts,
}

impl<I: IdentityStore> SupervisorOptions<I> {
    /// Options with the tokio clock, TCP connector and default timeouts.
    pub fn new(config: SupervisorConfig, identity_store: I, spawner: Arc<dyn ProcessSpawner>) -> Self {
        Self {
            clock: Arc::new(TokioClock),
            config,
            connector: None,
            identity_store,
            spawner,
            timeouts: Timeouts::default(),
        }
    }
}

/// A node-local supervisor.
pub struct Supervisor {
    clock: Arc<dyn Clock>,
    health: HealthAggregator,
    lifecycle: LifecycleController,
    registry: Arc<ServiceRegistry>,
    settings: SupervisorSettings,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
    timeouts: Timeouts,
}

impl Supervisor {
    /// Builds a supervisor.
    pub fn new<I: IdentityStore>(options: SupervisorOptions<I>) -> Self {
        let SupervisorOptions {
            clock,
            config,
            connector,
            identity_store,
            spawner,
            timeouts,
        } = options;

        let connector = connector.unwrap_or_else(|| {
            Arc::new(TcpConnector::new(
                ChannelConfig::default(),
                timeouts.dial_attempts,
                timeouts.dial_backoff,
                Arc::clone(&clock),
            ))
        });

        let enricher = MeshEnricher::new(config.supervisor.mesh_service.clone(), identity_store);

        let registry = Arc::new(ServiceRegistry::new(
            config.supervisor.clone(),
            config.services.clone(),
            connector,
            enricher.clone(),
            Arc::clone(&clock),
        ));

        let lifecycle = LifecycleController::new(
            config.supervisor.clone(),
            config.services.clone(),
            Arc::clone(&registry),
            spawner,
            enricher,
            Arc::clone(&clock),
            timeouts.clone(),
        );

        let health = HealthAggregator::new(config.services, Arc::clone(&registry));

        Self {
            clock,
            health,
            lifecycle,
            registry,
            settings: config.supervisor,
            shutdown_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
            timeouts,
        }
    }

    /// The service registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// The lifecycle controller.
    #[must_use]
    pub const fn lifecycle(&self) -> &LifecycleController {
        &self.lifecycle
    }

    /// The health aggregator.
    #[must_use]
    pub const fn health(&self) -> &HealthAggregator {
        &self.health
    }

    /// Starts the control-plane listener on the configured address.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn serve(&self) -> Result<ServerHandle> {
        let handle = SupervisorServer::bind(
            self.settings.listen_address.as_str(),
            RegistryHandler::new(Arc::clone(&self.registry)),
        )
        .await?;

        info!(
            "supervisor {} listening on {}",
            self.settings.instance_id,
            handle.local_addr()
        );

        Ok(handle)
    }

    /// Starts every enabled service in dependency order.
    ///
    /// # Errors
    ///
    /// Returns the first start failure.
    pub async fn start_all(&self) -> Result<()> {
        self.lifecycle.start_all().await
    }

    /// Periodically marks services that stopped sending heartbeats as unhealthy.
    pub fn spawn_heartbeat_monitor(&self) {
        let registry = Arc::clone(&self.registry);
        let shutdown_token = self.shutdown_token.clone();
        let period = self.timeouts.heartbeat_check_interval;
        let threshold = self.timeouts.heartbeat_stale_after;

        self.task_tracker.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let marked = registry.mark_stale_services(threshold).await;
                        if !marked.is_empty() {
                            warn!("services missing heartbeats: {}", marked.join(", "));
                        }
                    }
                    () = shutdown_token.cancelled() => {
                        debug!("heartbeat monitor shutting down");
                        break;
                    }
                }
            }
        });
    }

    /// Stops every service and background task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if `cancel` fires while waiting for services to drain.
    pub async fn shutdown(&self, cancel: &CancellationToken, within: Duration) -> Result<()> {
        info!("supervisor {} shutting down", self.settings.instance_id);

        self.shutdown_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        let deadline = self.clock.now() + within;
        match self.lifecycle.stop_all_services(cancel, deadline).await {
            Ok(()) => {
                info!("supervisor shut down");
                Ok(())
            }
            Err(Error::Cancelled) => {
                warn!("shutdown cancelled before services drained");
                Err(Error::Cancelled)
            }
            Err(e) => {
                error!("shutdown failed: {}", e);
                Err(e)
            }
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}
