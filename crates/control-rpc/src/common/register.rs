use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Static description of a running service instance, as advertised on registration.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct ServiceDescriptor {
    /// Host the service's control listener is reachable on.
    pub host: String,

    /// Distinguishes several instances of the same service.
    pub instance_id: String,

    /// Service name, matching its entry in the supervisor config.
    pub name: String,

    /// Port of the service's control listener.
    pub port: u16,

    /// Free-form version string reported by the service.
    #[serde(default)]
    pub version: String,
}

impl ServiceDescriptor {
    /// Creates a descriptor with an empty version.
    pub fn new(
        name: impl Into<String>,
        instance_id: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            host: host.into(),
            instance_id: instance_id.into(),
            name: name.into(),
            port,
            version: String::new(),
        }
    }

    /// The `host:port` address of the service's control listener.
    #[must_use]
    pub fn control_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// What a service declares about itself when registering.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ServiceCapabilities {
    /// Names of services this one depends on.
    pub dependencies: Vec<String>,

    /// Config keys the service cannot run without.
    pub required_config: Vec<String>,
}

/// Runtime configuration handed to a service once it has registered.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ServiceConfiguration {
    /// Merged key/value config.
    pub config: HashMap<String, String>,

    /// Environment the service should apply to itself.
    pub environment: HashMap<String, String>,
}

/// A request to register a service.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RegisterRequest {
    /// Declared capabilities.
    pub capabilities: ServiceCapabilities,

    /// The registering instance.
    pub descriptor: ServiceDescriptor,
}

/// The response to a register request.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RegisterResponse {
    /// Configuration for the service.
    pub configuration: ServiceConfiguration,

    /// Identifier to use in every later call.
    pub service_id: String,
}

/// A request to unregister a service.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct UnregisterRequest {
    /// Identifier returned at registration.
    pub service_id: String,
}

/// The response to an unregister request.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct UnregisterResponse {
    /// Whether an entry was removed.
    pub removed: bool,
}
