use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Operational quality reported by a service.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum HealthStatus {
    /// Still warming up.
    #[default]
    Starting,

    /// Fully operational.
    Healthy,

    /// Serving, with reduced capacity or quality.
    Degraded,

    /// Not able to serve.
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "STARTING"),
            Self::Healthy => write!(f, "HEALTHY"),
            Self::Degraded => write!(f, "DEGRADED"),
            Self::Unhealthy => write!(f, "UNHEALTHY"),
        }
    }
}

/// Counters reported with each heartbeat.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ServiceMetrics {
    /// Named monotonic counters, e.g. `requests_total`.
    pub counters: BTreeMap<String, u64>,

    /// Seconds since the service process started.
    pub uptime_secs: u64,
}

impl ServiceMetrics {
    /// Adds a counter.
    #[must_use]
    pub fn with_counter(mut self, name: impl Into<String>, value: u64) -> Self {
        self.counters.insert(name.into(), value);
        self
    }
}

/// A periodic health report.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct HeartbeatRequest {
    /// Current health.
    pub health: HealthStatus,

    /// Current counters.
    pub metrics: ServiceMetrics,

    /// Identifier returned at registration.
    pub service_id: String,
}

/// The response to a heartbeat.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct HeartbeatResponse {
    /// Whether the report was recorded.
    pub acknowledged: bool,
}
