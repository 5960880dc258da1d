//! Mock implementation of the identity store for local runs and tests.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use warden_identity_store::{IdentityStore, NodeIdentity};

/// Identity file layout.
#[derive(Debug, Deserialize)]
struct IdentityFile {
    node_id: String,
    routing_id: String,
    mesh_id: String,
    #[serde(default)]
    known_nodes: Vec<String>,
}

/// Mock implementation of the identity store.
#[derive(Clone, Debug, Default)]
pub struct MockIdentityStore {
    identity: Option<NodeIdentity>,
    known_nodes: HashSet<String>,
    unavailable: bool,
}

impl MockIdentityStore {
    /// Create a store that knows the local node's identity.
    #[must_use]
    pub fn new(identity: NodeIdentity) -> Self {
        let known_nodes = HashSet::from([identity.node_id.clone()]);

        Self {
            identity: Some(identity),
            known_nodes,
            unavailable: false,
        }
    }

    /// Create a store without any identity.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a store whose every call fails as if the database were down.
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    /// Register an additional known node.
    #[must_use]
    pub fn with_known_node(mut self, node_id: impl Into<String>) -> Self {
        self.known_nodes.insert(node_id.into());
        self
    }

    /// Forget a node, so validation of it fails.
    #[must_use]
    pub fn without_known_node(mut self, node_id: &str) -> Self {
        self.known_nodes.remove(node_id);
        self
    }

    /// Create a store from a JSON identity file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The identity file cannot be read
    /// - The identity file contains invalid JSON
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::IdentityFile(format!("Failed to read identity file: {e}")))?;

        let file: IdentityFile = serde_json::from_str(&content)
            .map_err(|e| Error::IdentityFile(format!("Failed to parse identity file: {e}")))?;

        let mut store = Self::new(NodeIdentity {
            node_id: file.node_id,
            routing_id: file.routing_id,
            mesh_id: file.mesh_id,
        });
        store.known_nodes.extend(file.known_nodes);

        Ok(store)
    }
}

#[async_trait]
impl IdentityStore for MockIdentityStore {
    type Error = Error;

    async fn get_local_node_identity(&self) -> Result<NodeIdentity, Self::Error> {
        if self.unavailable {
            return Err(Error::Unavailable);
        }

        self.identity
            .clone()
            .ok_or_else(|| Error::NotInitialized("no local node identity".to_string()))
    }

    async fn validate_node_exists(&self, node_id: &str) -> Result<(), Self::Error> {
        if self.unavailable {
            return Err(Error::Unavailable);
        }

        if self.known_nodes.contains(node_id) {
            Ok(())
        } else {
            Err(Error::NodeNotFound(node_id.to_string()))
        }
    }
}
