mod heartbeat;
mod register;
mod stop;

pub use heartbeat::*;
pub use register::*;
pub use stop::*;

use std::fmt;

use derive_more::From;
use serde::{Deserialize, Serialize};

/// A request to the supervisor, sent by a managed service.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum SupervisorRequest {
    /// Report health and metrics.
    Heartbeat(HeartbeatRequest),

    /// Announce a freshly started service.
    Register(RegisterRequest),

    /// Announce that a service is going away.
    Unregister(UnregisterRequest),
}

/// The supervisor's answer to a [`SupervisorRequest`].
#[derive(Clone, Debug, Deserialize, Eq, From, PartialEq, Serialize)]
pub enum SupervisorResponse {
    /// The request could not be handled.
    #[from]
    Failure(Failure),

    /// Response to a heartbeat.
    #[from]
    HeartbeatAck(HeartbeatResponse),

    /// Response to a registration.
    #[from]
    Registered(RegisterResponse),

    /// Response to an unregistration.
    #[from]
    Unregistered(UnregisterResponse),
}

/// A request to a managed service, sent by the supervisor.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ServiceRequest {
    /// Liveness probe on an otherwise idle connection.
    Ping,

    /// Ask the service to drain and exit.
    Stop(StopRequest),
}

/// A managed service's answer to a [`ServiceRequest`].
#[derive(Clone, Debug, Deserialize, Eq, From, PartialEq, Serialize)]
pub enum ServiceResponse {
    /// The request could not be handled.
    #[from]
    Failure(Failure),

    /// Response to a ping.
    Pong,

    /// Response to a stop request.
    #[from]
    Stopped(StopResponse),
}

/// A failure reported by the peer that handled a request.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Failure {
    /// Failure category.
    pub kind: FailureKind,

    /// Human readable description.
    pub message: String,
}

impl Failure {
    /// Creates a failure of the given kind.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Category of a [`Failure`].
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum FailureKind {
    /// Anything else.
    Internal,

    /// The referenced service is not registered.
    NotFound,

    /// A dependency of the handler (e.g. a control connection) was unavailable.
    Unavailable,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal => write!(f, "internal error"),
            Self::NotFound => write!(f, "not found"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}
