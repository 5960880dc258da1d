//! Snapshot types returned by registry queries.

use std::fmt::{self, Display};
use std::time::Duration;

use chrono::{DateTime, Utc};
use warden_control_rpc::{HealthStatus, ServiceCapabilities, ServiceDescriptor, ServiceMetrics};

/// Lifecycle phase of a registered service.
///
/// Only ever advances from `Starting` to `Running`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ServiceState {
    /// Registered but not yet reported healthy.
    Starting,

    /// Reported healthy at least once.
    Running,
}

impl Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "STARTING"),
            Self::Running => write!(f, "RUNNING"),
        }
    }
}

/// Point-in-time copy of a registry entry.
#[derive(Clone, Debug)]
pub struct ServiceStatus {
    /// Declared capabilities.
    pub capabilities: ServiceCapabilities,

    /// Static descriptor sent at registration.
    pub descriptor: ServiceDescriptor,

    /// Last reported health.
    pub health: HealthStatus,

    /// Time since the last heartbeat, or since registration if none arrived.
    pub heartbeat_age: Duration,

    /// Registry-assigned id.
    pub id: String,

    /// Wall-clock time of the last heartbeat.
    pub last_heartbeat: DateTime<Utc>,

    /// Last reported metrics.
    pub metrics: ServiceMetrics,

    /// Service name.
    pub name: String,

    /// Wall-clock time of registration.
    pub started_at: DateTime<Utc>,

    /// Lifecycle phase.
    pub state: ServiceState,
}

impl ServiceStatus {
    /// Running and at least degraded, the bar for configured-service health.
    #[must_use]
    pub fn is_operational(&self) -> bool {
        self.state == ServiceState::Running
            && matches!(self.health, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}
