//! Error types for the mock identity store.

use thiserror::Error;
use warden_identity_store::{IdentityStoreError, IdentityStoreErrorKind};

/// Error type for the mock identity store.
#[derive(Debug, Error)]
pub enum Error {
    /// The identity file could not be loaded.
    #[error("Identity file error: {0}")]
    IdentityFile(String),

    /// No identity has been configured for the local node.
    #[error("Not initialized: {0}")]
    NotInitialized(String),

    /// The node is not known to the store.
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// The store was configured to behave as if unreachable.
    #[error("Identity store unavailable")]
    Unavailable,
}

impl IdentityStoreError for Error {
    fn kind(&self) -> IdentityStoreErrorKind {
        match self {
            Self::NotInitialized(_) | Self::NodeNotFound(_) => IdentityStoreErrorKind::NotFound,
            Self::Unavailable => IdentityStoreErrorKind::Unavailable,
            Self::IdentityFile(_) => IdentityStoreErrorKind::Other,
        }
    }
}
