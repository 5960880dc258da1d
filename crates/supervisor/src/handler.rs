//! Serves the supervisor protocol from the registry.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;
use warden_control_rpc::{
    Failure, FailureKind, HeartbeatRequest, HeartbeatResponse, RegisterRequest, RegisterResponse,
    SupervisorHandler, UnregisterRequest, UnregisterResponse,
};

use crate::error::Error;
use crate::registry::ServiceRegistry;

impl From<Error> for Failure {
    fn from(error: Error) -> Self {
        let kind = match &error {
            Error::NotFound(_) => FailureKind::NotFound,
            Error::Connection { .. } | Error::Cancelled => FailureKind::Unavailable,
            _ => FailureKind::Internal,
        };

        Self::new(kind, error.to_string())
    }
}

/// Answers Register, Unregister and Heartbeat calls.
#[derive(Clone)]
pub struct RegistryHandler {
    registry: Arc<ServiceRegistry>,
}

impl RegistryHandler {
    /// Serves `registry`.
    #[must_use]
    pub const fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl SupervisorHandler for RegistryHandler {
    async fn register(&self, request: RegisterRequest) -> Result<RegisterResponse, Failure> {
        let name = request.descriptor.name.clone();

        let (service_id, configuration) = self
            .registry
            .register_service(request.descriptor, request.capabilities)
            .await
            .map_err(|e| {
                warn!("registration of {} failed: {}", name, e);
                Failure::from(e)
            })?;

        Ok(RegisterResponse {
            configuration,
            service_id,
        })
    }

    async fn unregister(&self, request: UnregisterRequest) -> Result<UnregisterResponse, Failure> {
        self.registry
            .unregister_service(&request.service_id)
            .await
            .map_err(Failure::from)?;

        Ok(UnregisterResponse { removed: true })
    }

    async fn heartbeat(&self, request: HeartbeatRequest) -> Result<HeartbeatResponse, Failure> {
        self.registry
            .update_heartbeat(&request.service_id, request.health, request.metrics)
            .await
            .map_err(Failure::from)?;

        Ok(HeartbeatResponse { acknowledged: true })
    }
}
