//! System-wide readiness derived from configured services.

use std::collections::BTreeMap;
use std::sync::Arc;

use warden_control_rpc::HealthStatus;

use crate::config::ServiceConfig;
use crate::registry::ServiceRegistry;
use crate::types::ServiceStatus;

/// Answers whether the configured services are up.
///
/// The bar here is RUNNING and HEALTHY-or-DEGRADED, looser than
/// [`ServiceRegistry::is_service_healthy`], which requires exactly HEALTHY.
#[derive(Clone)]
pub struct HealthAggregator {
    configs: Arc<BTreeMap<String, ServiceConfig>>,
    registry: Arc<ServiceRegistry>,
}

impl HealthAggregator {
    /// Creates an aggregator over `configs`.
    #[must_use]
    pub fn new(configs: BTreeMap<String, ServiceConfig>, registry: Arc<ServiceRegistry>) -> Self {
        Self {
            configs: Arc::new(configs),
            registry,
        }
    }

    /// Whether every enabled service is operational.
    ///
    /// A required service must have an operational instance. An optional
    /// service may be absent, but if any instance exists one of them must
    /// be operational.
    pub async fn are_all_configured_services_healthy(&self) -> bool {
        let services = self.registry.list_services(None, "*").await;

        self.configs
            .iter()
            .filter(|(_, config)| config.enabled)
            .all(|(name, config)| {
                let mut instances = services.iter().filter(|s| &s.name == name).peekable();

                if instances.peek().is_none() {
                    return !config.required;
                }

                instances.any(ServiceStatus::is_operational)
            })
    }

    /// A human readable status per configured service.
    pub async fn get_configured_service_status(&self) -> BTreeMap<String, String> {
        let services = self.registry.list_services(None, "*").await;

        self.configs
            .iter()
            .map(|(name, config)| {
                let instances: Vec<_> = services.iter().filter(|s| &s.name == name).collect();
                (name.clone(), describe(config, &instances))
            })
            .collect()
    }
}

fn describe(config: &ServiceConfig, instances: &[&ServiceStatus]) -> String {
    if !config.enabled {
        return "disabled".to_string();
    }

    let Some(first) = instances.first() else {
        return if config.required {
            "not started (required)".to_string()
        } else {
            "not started (optional)".to_string()
        };
    };

    let operational = |health: HealthStatus| {
        instances
            .iter()
            .any(|s| s.is_operational() && s.health == health)
    };

    if operational(HealthStatus::Healthy) {
        "healthy".to_string()
    } else if operational(HealthStatus::Degraded) {
        "degraded but operational".to_string()
    } else {
        format!("unhealthy (state: {}, health: {})", first.state, first.health)
    }
}
