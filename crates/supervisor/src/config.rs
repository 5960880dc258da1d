//! Declarative configuration for the supervisor and its services.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::Backoff;
use crate::error::{Error, Result};

/// How to run one named service.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Arguments passed to the executable.
    pub args: Vec<String>,

    /// Static configuration handed to the service on registration.
    pub config: HashMap<String, String>,

    /// Names of services that must start before this one.
    pub dependencies: Vec<String>,

    /// Disabled services are never started and never block dependents.
    pub enabled: bool,

    /// Environment variables for the process.
    pub environment: HashMap<String, String>,

    /// The executable to run.
    pub executable: String,

    /// Port exposed outside the node before the instance offset is applied; 0 for none.
    pub external_port: u16,

    /// Whether the node is unhealthy without this service.
    pub required: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            config: HashMap::new(),
            dependencies: Vec::new(),
            enabled: true,
            environment: HashMap::new(),
            executable: String::new(),
            external_port: 0,
            required: false,
        }
    }
}

impl ServiceConfig {
    /// An enabled service with the given executable and no dependencies.
    #[must_use]
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            ..Self::default()
        }
    }

    /// Adds dependencies.
    #[must_use]
    pub fn with_dependencies<S: Into<String>>(mut self, deps: impl IntoIterator<Item = S>) -> Self {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Marks the service as required.
    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Marks the service as disabled.
    #[must_use]
    pub const fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Settings shared by every service of one supervisor instance.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct SupervisorSettings {
    /// Root directory for per-service data.
    pub data_dir: PathBuf,

    /// Identifies this supervisor instance when several share a host.
    pub instance_id: String,

    /// Address the control plane listens on, advertised to services.
    pub listen_address: String,

    /// Name of the service that receives node identity on registration.
    pub mesh_service: String,

    /// Added to every external port so instances do not collide.
    pub port_offset: u16,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            instance_id: "default".to_string(),
            listen_address: "127.0.0.1:50051".to_string(),
            mesh_service: "mesh".to_string(),
            port_offset: 0,
        }
    }
}

impl SupervisorSettings {
    /// Data directory of one service: `<data_dir>/<instance_id>/<name>`.
    #[must_use]
    pub fn service_data_dir(&self, name: &str) -> PathBuf {
        self.data_dir.join(&self.instance_id).join(name)
    }

    /// A static port shifted by the instance offset, or `None` for port 0.
    #[must_use]
    pub fn external_port(&self, port: u16) -> Option<u16> {
        (port != 0).then(|| port.saturating_add(self.port_offset))
    }
}

/// Top-level configuration file.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Services by name.
    pub services: BTreeMap<String, ServiceConfig>,

    /// Instance-wide settings.
    pub supervisor: SupervisorSettings,
}

impl SupervisorConfig {
    /// Parses a YAML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid configuration.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| Error::Config(e.to_string()))
    }

    /// Reads and parses a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

        Self::from_yaml(&content)
    }
}

/// Every timing knob of the orchestration engine.
#[derive(Clone, Debug)]
pub struct Timeouts {
    /// Delay before each dial retry.
    pub dial_backoff: Backoff,

    /// Dials made before registration fails.
    pub dial_attempts: u32,

    /// Upper bound for waiting on registry drain during shutdown.
    pub drain_cap: Duration,

    /// How often the registry is checked while draining.
    pub drain_poll: Duration,

    /// How often drain progress is logged.
    pub drain_progress: Duration,

    /// How often the heartbeat monitor runs.
    pub heartbeat_check_interval: Duration,

    /// A service silent for longer than this is marked unhealthy.
    pub heartbeat_stale_after: Duration,

    /// Total time a spawned service has to register.
    pub registration: Duration,

    /// Delay between registration checks.
    pub registration_poll: Backoff,

    /// Grace period services are given when the supervisor stops them all.
    pub stop_grace: Duration,

    /// Upper bound for one Stop call.
    pub stop_rpc: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            dial_backoff: Backoff::new(Duration::from_secs(1), 2.0, Duration::from_secs(4)),
            dial_attempts: 3,
            drain_cap: Duration::from_secs(15),
            drain_poll: Duration::from_millis(500),
            drain_progress: Duration::from_secs(2),
            heartbeat_check_interval: Duration::from_secs(10),
            heartbeat_stale_after: Duration::from_secs(30),
            registration: Duration::from_secs(60),
            registration_poll: Backoff::new(Duration::from_secs(1), 1.5, Duration::from_secs(5)),
            stop_grace: Duration::from_secs(10),
            stop_rpc: Duration::from_secs(5),
        }
    }
}
