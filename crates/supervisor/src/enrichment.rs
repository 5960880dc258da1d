//! Node identity injection for the mesh service.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};
use warden_identity_store::{IdentityStore, IdentityStoreError, NodeIdentity};

use crate::error::{Error, Result};

#[async_trait]
trait IdentityLookup: Send + Sync {
    async fn lookup(&self) -> Result<NodeIdentity>;
}

#[async_trait]
impl<I: IdentityStore> IdentityLookup for I {
    async fn lookup(&self) -> Result<NodeIdentity> {
        let identity = self
            .get_local_node_identity()
            .await
            .map_err(|e| Error::Identity {
                kind: e.kind(),
                message: e.to_string(),
            })?;

        self.validate_node_exists(&identity.node_id)
            .await
            .map_err(|e| Error::Identity {
                kind: e.kind(),
                message: e.to_string(),
            })?;

        Ok(identity)
    }
}

/// Adds the local node's identity to the mesh service's configuration.
#[derive(Clone)]
pub struct MeshEnricher {
    mesh_service: String,
    store: Arc<dyn IdentityLookup>,
}

impl MeshEnricher {
    /// Enriches the service named `mesh_service` using `store`.
    pub fn new<I: IdentityStore>(mesh_service: impl Into<String>, store: I) -> Self {
        Self {
            mesh_service: mesh_service.into(),
            store: Arc::new(store),
        }
    }

    /// Whether `name` is the service that receives node identity.
    #[must_use]
    pub fn applies_to(&self, name: &str) -> bool {
        self.mesh_service == name
    }

    /// Injects node identity into `config` and `environment`.
    ///
    /// A failed lookup is logged and leaves both maps untouched. Returns
    /// whether identity was injected.
    pub async fn enrich(
        &self,
        config: &mut HashMap<String, String>,
        environment: &mut HashMap<String, String>,
    ) -> bool {
        let Some(identity) = self.identity().await else {
            return false;
        };

        config.insert("node_id".to_string(), identity.node_id.clone());
        config.insert("routing_id".to_string(), identity.routing_id.clone());
        config.insert("mesh_id".to_string(), identity.mesh_id.clone());
        insert_environment(environment, identity);

        true
    }

    /// Injects node identity into a process environment only.
    pub async fn enrich_environment(&self, environment: &mut HashMap<String, String>) -> bool {
        let Some(identity) = self.identity().await else {
            return false;
        };

        insert_environment(environment, identity);
        true
    }

    async fn identity(&self) -> Option<NodeIdentity> {
        match self.store.lookup().await {
            Ok(identity) => {
                info!(
                    "injecting node identity {} (mesh {}) into {}",
                    identity.node_id, identity.mesh_id, self.mesh_service
                );
                Some(identity)
            }
            Err(e) => {
                warn!(
                    "failed to enrich {} with node identity, using static configuration: {}",
                    self.mesh_service, e
                );
                None
            }
        }
    }
}

fn insert_environment(environment: &mut HashMap<String, String>, identity: NodeIdentity) {
    environment.insert("MESH_NODE_ID".to_string(), identity.node_id);
    environment.insert("MESH_ROUTING_ID".to_string(), identity.routing_id);
    environment.insert("MESH_ID".to_string(), identity.mesh_id);
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;
    use warden_identity_store_mock::MockIdentityStore;

    use super::*;

    fn identity() -> NodeIdentity {
        NodeIdentity {
            node_id: "node-1".to_string(),
            routing_id: "route-1".to_string(),
            mesh_id: "mesh-main".to_string(),
        }
    }

    #[tokio::test]
    async fn test_enrich_injects_identity() {
        let enricher = MeshEnricher::new("mesh", MockIdentityStore::new(identity()));
        let mut config = HashMap::from([("node_id".to_string(), "static".to_string())]);
        let mut environment = HashMap::new();

        assert!(enricher.applies_to("mesh"));
        assert!(!enricher.applies_to("auth"));
        assert!(enricher.enrich(&mut config, &mut environment).await);

        assert_eq!(config["node_id"], "node-1");
        assert_eq!(config["routing_id"], "route-1");
        assert_eq!(config["mesh_id"], "mesh-main");
        assert_eq!(environment["MESH_NODE_ID"], "node-1");
        assert_eq!(environment["MESH_ID"], "mesh-main");
    }

    #[traced_test]
    #[tokio::test]
    async fn test_unknown_node_keeps_static_config() {
        let store = MockIdentityStore::new(identity()).without_known_node("node-1");
        let enricher = MeshEnricher::new("mesh", store);
        let mut config = HashMap::from([("node_id".to_string(), "static".to_string())]);
        let mut environment = HashMap::new();

        assert!(!enricher.enrich(&mut config, &mut environment).await);

        assert_eq!(config["node_id"], "static");
        assert!(environment.is_empty());
        assert!(logs_contain("using static configuration"));
    }

    #[tokio::test]
    async fn test_enrich_environment_leaves_config_alone() {
        let enricher = MeshEnricher::new("mesh", MockIdentityStore::new(identity()));
        let mut environment = HashMap::from([("RUST_LOG".to_string(), "info".to_string())]);

        assert!(enricher.enrich_environment(&mut environment).await);

        assert_eq!(environment["MESH_NODE_ID"], "node-1");
        assert_eq!(environment["MESH_ROUTING_ID"], "route-1");
        assert_eq!(environment["RUST_LOG"], "info");
        assert!(!environment.contains_key("node_id"));
    }
}
