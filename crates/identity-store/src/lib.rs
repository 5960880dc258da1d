//! Abstract interface for looking up the identity of the local node.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::error::Error;
use std::fmt::{self, Debug, Display};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Identity of this node within the mesh.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Stable node identifier.
    pub node_id: String,

    /// Identifier used for routing traffic to this node.
    pub routing_id: String,

    /// Identifier of the mesh this node belongs to.
    pub mesh_id: String,
}

/// The kind of identity store error.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum IdentityStoreErrorKind {
    /// The node or identity does not exist.
    NotFound,

    /// The store could not be reached.
    Unavailable,

    /// Other/unknown error
    Other,
}

impl Display for IdentityStoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Marker trait for `IdentityStore` errors
pub trait IdentityStoreError: Debug + Error + Send + Sync {
    /// Returns the kind of this error
    fn kind(&self) -> IdentityStoreErrorKind;
}

/// Abstract interface for the node-identity database.
#[async_trait]
pub trait IdentityStore
where
    Self: Send + Sync + Clone + 'static,
{
    /// The error type for this store.
    type Error: IdentityStoreError;

    /// Get the identity of the local node.
    async fn get_local_node_identity(&self) -> Result<NodeIdentity, Self::Error>;

    /// Check that a node with the given id is known to the store.
    async fn validate_node_exists(&self, node_id: &str) -> Result<(), Self::Error>;
}
