use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A request for a service to drain and exit.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct StopRequest {
    /// How long the service may take to finish in-flight work.
    pub grace_period: Duration,

    /// Whether the service should persist its state before exiting.
    pub save_state: bool,
}

/// The response to a stop request.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct StopResponse {
    /// Whether the service accepted the request and began draining.
    pub accepted: bool,
}
