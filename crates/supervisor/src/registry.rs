//! The authoritative map of registered services.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;
use warden_control_rpc::{
    HealthStatus, ServiceCapabilities, ServiceConfiguration, ServiceDescriptor, ServiceMetrics,
};

use crate::clock::Clock;
use crate::config::{ServiceConfig, SupervisorSettings};
use crate::connector::{ServiceConnector, ServiceController};
use crate::enrichment::MeshEnricher;
use crate::error::{Error, Result};
use crate::types::{ServiceState, ServiceStatus};

struct ServiceInfo {
    capabilities: ServiceCapabilities,
    controller: Arc<dyn ServiceController>,
    descriptor: ServiceDescriptor,
    health: HealthStatus,
    id: String,
    last_heartbeat: Instant,
    last_heartbeat_at: DateTime<Utc>,
    metrics: ServiceMetrics,
    started_at: DateTime<Utc>,
    state: ServiceState,
}

impl ServiceInfo {
    fn is_instance(&self, name: &str, instance_id: &str) -> bool {
        self.descriptor.name == name && self.descriptor.instance_id == instance_id
    }

    fn status(&self, now: Instant) -> ServiceStatus {
        ServiceStatus {
            capabilities: self.capabilities.clone(),
            descriptor: self.descriptor.clone(),
            health: self.health,
            heartbeat_age: now.saturating_duration_since(self.last_heartbeat),
            id: self.id.clone(),
            last_heartbeat: self.last_heartbeat_at,
            metrics: self.metrics.clone(),
            name: self.descriptor.name.clone(),
            started_at: self.started_at,
            state: self.state,
        }
    }
}

/// Registered services and their control connections.
///
/// All state sits behind one lock; nothing awaits a network call while
/// holding it. Queries return [`ServiceStatus`] snapshots.
pub struct ServiceRegistry {
    clock: Arc<dyn Clock>,
    configs: BTreeMap<String, ServiceConfig>,
    connector: Arc<dyn ServiceConnector>,
    enricher: MeshEnricher,
    services: RwLock<HashMap<String, ServiceInfo>>,
    settings: SupervisorSettings,
}

impl ServiceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(
        settings: SupervisorSettings,
        configs: BTreeMap<String, ServiceConfig>,
        connector: Arc<dyn ServiceConnector>,
        enricher: MeshEnricher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            clock,
            configs,
            connector,
            enricher,
            services: RwLock::new(HashMap::new()),
            settings,
        }
    }

    /// Registers a service instance and returns its id and runtime configuration.
    ///
    /// Registering an already registered (name, instance) pair returns the
    /// existing id and changes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the service's control endpoint cannot be dialed.
    pub async fn register_service(
        &self,
        descriptor: ServiceDescriptor,
        capabilities: ServiceCapabilities,
    ) -> Result<(String, ServiceConfiguration)> {
        if let Some(id) = self
            .find_instance(&descriptor.name, &descriptor.instance_id)
            .await
        {
            info!(
                "service {} (instance {}) already registered as {}",
                descriptor.name, descriptor.instance_id, id
            );
            let configuration = self.configuration_for(&id, &descriptor.name, &capabilities).await;
            return Ok((id, configuration));
        }

        let controller = self.connector.connect(&descriptor.control_address()).await?;

        let (id, inserted) = {
            let mut services = self.services.write().await;

            if let Some(existing) = services
                .values()
                .find(|s| s.is_instance(&descriptor.name, &descriptor.instance_id))
            {
                (existing.id.clone(), false)
            } else {
                let id = Uuid::new_v4().to_string();
                let now = Utc::now();

                services.insert(
                    id.clone(),
                    ServiceInfo {
                        capabilities: capabilities.clone(),
                        controller: Arc::clone(&controller),
                        descriptor: descriptor.clone(),
                        health: HealthStatus::Starting,
                        id: id.clone(),
                        last_heartbeat: self.clock.now(),
                        last_heartbeat_at: now,
                        metrics: ServiceMetrics::default(),
                        started_at: now,
                        state: ServiceState::Starting,
                    },
                );

                (id, true)
            }
        };

        if inserted {
            info!(
                "registered service {} (instance {}, version {}) at {} as {}",
                descriptor.name,
                descriptor.instance_id,
                descriptor.version,
                descriptor.control_address(),
                id
            );
        } else {
            info!(
                "service {} (instance {}) registered concurrently as {}, dropping extra connection",
                descriptor.name, descriptor.instance_id, id
            );
            controller.close().await;
        }

        let configuration = self.configuration_for(&id, &descriptor.name, &capabilities).await;
        Ok((id, configuration))
    }

    /// Removes a service and closes its control connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no service has this id.
    pub async fn unregister_service(&self, id: &str) -> Result<()> {
        let removed = self
            .services
            .write()
            .await
            .remove(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        info!(
            "unregistered service {} (instance {}, id {})",
            removed.descriptor.name, removed.descriptor.instance_id, id
        );

        removed.controller.close().await;
        Ok(())
    }

    /// Records a heartbeat.
    ///
    /// The first `HEALTHY` report promotes a starting service to running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no service has this id.
    pub async fn update_heartbeat(
        &self,
        id: &str,
        health: HealthStatus,
        metrics: ServiceMetrics,
    ) -> Result<()> {
        let mut services = self.services.write().await;
        let info = services
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        info.health = health;
        info.metrics = metrics;
        info.last_heartbeat = self.clock.now();
        info.last_heartbeat_at = Utc::now();

        if health == HealthStatus::Healthy && info.state == ServiceState::Starting {
            info.state = ServiceState::Running;
            info!("service {} ({}) is now running", info.descriptor.name, id);
        } else {
            debug!("heartbeat from {} ({}): {}", info.descriptor.name, id, health);
        }

        Ok(())
    }

    /// Snapshot of one service.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no service has this id.
    pub async fn get_service_status(&self, id: &str) -> Result<ServiceStatus> {
        let now = self.clock.now();
        self.services
            .read()
            .await
            .get(id)
            .map(|info| info.status(now))
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Snapshots of services, filtered by state and by name.
    ///
    /// `name_pattern` is either an exact service name or `"*"`; an empty
    /// pattern matches everything. Results are sorted by name then id.
    pub async fn list_services(
        &self,
        state: Option<ServiceState>,
        name_pattern: &str,
    ) -> Vec<ServiceStatus> {
        let any_name = name_pattern.is_empty() || name_pattern == "*";
        let now = self.clock.now();

        let mut statuses: Vec<_> = self
            .services
            .read()
            .await
            .values()
            .filter(|info| state.is_none_or(|s| info.state == s))
            .filter(|info| any_name || info.descriptor.name == name_pattern)
            .map(|info| info.status(now))
            .collect();

        statuses.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        statuses
    }

    /// Whether any instance of `name` currently reports exactly `HEALTHY`.
    pub async fn is_service_healthy(&self, name: &str) -> bool {
        self.services
            .read()
            .await
            .values()
            .any(|info| info.descriptor.name == name && info.health == HealthStatus::Healthy)
    }

    /// Whether any instance of `name` is registered, starting or running.
    pub async fn is_service_registered(&self, name: &str) -> bool {
        self.services
            .read()
            .await
            .values()
            .any(|info| info.descriptor.name == name)
    }

    /// Marks services silent for longer than `threshold` as unhealthy.
    ///
    /// State is left alone. Returns the names that were marked.
    pub async fn mark_stale_services(&self, threshold: Duration) -> Vec<String> {
        let now = self.clock.now();
        let mut marked = Vec::new();

        for info in self.services.write().await.values_mut() {
            let silent = now.saturating_duration_since(info.last_heartbeat);
            if silent > threshold && info.health != HealthStatus::Unhealthy {
                warn!(
                    "no heartbeat from {} ({}) for {:?}, marking unhealthy",
                    info.descriptor.name, info.id, silent
                );
                info.health = HealthStatus::Unhealthy;
                marked.push(info.descriptor.name.clone());
            }
        }

        marked
    }

    /// Number of registered services.
    pub async fn len(&self) -> usize {
        self.services.read().await.len()
    }

    /// Whether no service is registered.
    pub async fn is_empty(&self) -> bool {
        self.services.read().await.is_empty()
    }

    pub(crate) async fn controller(&self, id: &str) -> Option<Arc<dyn ServiceController>> {
        self.services
            .read()
            .await
            .get(id)
            .map(|info| Arc::clone(&info.controller))
    }

    async fn find_instance(&self, name: &str, instance_id: &str) -> Option<String> {
        self.services
            .read()
            .await
            .values()
            .find(|info| info.is_instance(name, instance_id))
            .map(|info| info.id.clone())
    }

    async fn configuration_for(
        &self,
        id: &str,
        name: &str,
        capabilities: &ServiceCapabilities,
    ) -> ServiceConfiguration {
        let mut configuration = self
            .configs
            .get(name)
            .map(|config| ServiceConfiguration {
                config: config.config.clone(),
                environment: config.environment.clone(),
            })
            .unwrap_or_default();

        let settings = &self.settings;
        let data_dir = settings.service_data_dir(name).display().to_string();

        let injected = [
            ("instance_id", "WARDEN_INSTANCE_ID", settings.instance_id.clone()),
            ("service_id", "WARDEN_SERVICE_ID", id.to_string()),
            (
                "supervisor_address",
                "WARDEN_SUPERVISOR_ADDRESS",
                settings.listen_address.clone(),
            ),
            ("data_dir", "WARDEN_DATA_DIR", data_dir),
            ("port_offset", "WARDEN_PORT_OFFSET", settings.port_offset.to_string()),
        ];

        for (config_key, env_key, value) in injected {
            configuration
                .config
                .insert(config_key.to_string(), value.clone());
            configuration.environment.insert(env_key.to_string(), value);
        }

        if let Some(port) = self
            .configs
            .get(name)
            .and_then(|config| settings.external_port(config.external_port))
        {
            configuration
                .config
                .insert("external_port".to_string(), port.to_string());
        }

        if self.enricher.applies_to(name) {
            self.enricher
                .enrich(&mut configuration.config, &mut configuration.environment)
                .await;
        }

        for key in &capabilities.required_config {
            if !configuration.config.contains_key(key) {
                warn!("service {} requires config key {} which is not set", name, key);
            }
        }

        configuration
    }
}
