//! Error types for the control plane.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::common::FailureKind;

/// Result type for control-plane operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking over the control plane.
#[derive(Debug, Error)]
pub enum Error {
    /// Request was abandoned because the connection was closed underneath it.
    #[error("request cancelled")]
    Cancelled,

    /// Encoding or decoding a frame failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// Establishing the TCP connection failed.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// The address we tried to connect to.
        addr: String,

        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// Establishing the TCP connection did not finish in time.
    #[error("connecting to {0} timed out after {1:?}")]
    ConnectTimeout(String, Duration),

    /// The connection is closing or already closed.
    #[error("connection is closing")]
    ConnectionClosing,

    /// IO error.
    #[error("io error: {0} - {1}")]
    Io(&'static str, #[source] io::Error),

    /// The peer answered with a different response type than the request expects.
    #[error("unexpected response type")]
    BadResponseType,

    /// The peer handled the request and reported a failure.
    #[error("peer reported {kind}: {message}")]
    Remote {
        /// What kind of failure the peer reported.
        kind: FailureKind,

        /// Human readable description from the peer.
        message: String,
    },

    /// No response arrived before the deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl Error {
    /// Whether the peer reported that the referenced service is unknown.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Remote {
                kind: FailureKind::NotFound,
                ..
            }
        )
    }
}

impl From<ciborium::de::Error<io::Error>> for Error {
    fn from(err: ciborium::de::Error<io::Error>) -> Self {
        Self::Codec(err.to_string())
    }
}

impl From<ciborium::ser::Error<io::Error>> for Error {
    fn from(err: ciborium::ser::Error<io::Error>) -> Self {
        Self::Codec(err.to_string())
    }
}
