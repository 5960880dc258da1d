//! Error types for the supervisor.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type for supervisor operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while orchestrating services.
#[derive(Debug, Error)]
pub enum Error {
    /// An instance of the service is already starting or running.
    #[error("service {0} is already running")]
    AlreadyRunning(String),

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Could not open a control connection to a service.
    #[error("failed to connect to {address} after {attempts} attempts: {source}")]
    Connection {
        /// The service's control address.
        address: String,

        /// How many dials were made.
        attempts: u32,

        /// The last dial error.
        #[source]
        source: warden_control_rpc::Error,
    },

    /// Node identity lookup failed.
    #[error("identity lookup failed ({kind}): {message}")]
    Identity {
        /// Kind reported by the identity store.
        kind: warden_identity_store::IdentityStoreErrorKind,

        /// The store's error message.
        message: String,
    },

    /// IO error.
    #[error("io error: {0} - {1}")]
    Io(&'static str, #[source] io::Error),

    /// No such service.
    #[error("service not found: {0}")]
    NotFound(String),

    /// Spawning or stopping a service process failed.
    #[error(transparent)]
    Process(#[from] warden_process::Error),

    /// The service did not register within the allowed time.
    #[error("service {name} did not register within {waited:?}")]
    RegistrationTimeout {
        /// The service name.
        name: String,

        /// How long we waited.
        waited: Duration,
    },

    /// Control-plane error.
    #[error(transparent)]
    Rpc(#[from] warden_control_rpc::Error),
}
