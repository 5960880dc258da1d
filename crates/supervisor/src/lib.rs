//! Service-orchestration engine of a node-local supervisor.
//!
//! The supervisor starts a fleet of services in dependency order, tracks
//! them through self-registration and heartbeats, and stops them in a
//! coordinated way:
//!
//! - [`resolve`] turns the declared dependencies into a startup order;
//! - [`ServiceRegistry`] holds every registered service and the control
//!   connection opened to it by a [`ServiceConnector`];
//! - [`LifecycleController`] spawns processes, waits for them to register
//!   and fans out stop requests on shutdown;
//! - [`HealthAggregator`] reports whether the configured services are up.
//!
//! [`Supervisor`] wires these to the control-plane listener.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod backoff;
mod clock;
mod config;
mod connector;
mod enrichment;
mod error;
mod handler;
mod health;
mod lifecycle;
mod registry;
mod resolver;
mod supervisor;
mod types;

#[cfg(test)]
mod testing;

pub use backoff::Backoff;
pub use clock::{Clock, TokioClock};
pub use config::{ServiceConfig, SupervisorConfig, SupervisorSettings, Timeouts};
pub use connector::{ServiceConnector, ServiceController, TcpConnector};
pub use enrichment::MeshEnricher;
pub use error::{Error, Result};
pub use handler::RegistryHandler;
pub use health::HealthAggregator;
pub use lifecycle::LifecycleController;
pub use registry::ServiceRegistry;
pub use resolver::{Resolution, resolve};
pub use supervisor::{Supervisor, SupervisorOptions};
pub use types::{ServiceState, ServiceStatus};
