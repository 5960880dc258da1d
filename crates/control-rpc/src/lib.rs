//! Control-plane RPC between the supervisor and the services it manages.
//!
//! Every message is a CBOR document behind a 4-byte big-endian length prefix,
//! carried over a long-lived TCP connection. Two protocols share the framing:
//!
//! - the **supervisor protocol** (`Register`, `Unregister`, `Heartbeat`),
//!   served by the supervisor through [`SupervisorServer`] and called by
//!   managed services through [`SupervisorClient`];
//! - the **service protocol** (`Stop`, `Ping`), served by every managed
//!   service through [`ServiceServer`] and called by the supervisor through a
//!   [`ControlChannel`].
//!
//! # Example
//!
//! ```rust,no_run
//! use warden_control_rpc::{
//!     HealthStatus, ServiceCapabilities, ServiceDescriptor, ServiceMetrics, SupervisorClient,
//! };
//!
//! async fn run() -> warden_control_rpc::Result<()> {
//!     let client = SupervisorClient::connect("127.0.0.1:50051").await?;
//!
//!     let registered = client
//!         .register(
//!             ServiceDescriptor::new("auth", "a1", "127.0.0.1", 7001),
//!             ServiceCapabilities::default(),
//!         )
//!         .await?;
//!
//!     client
//!         .heartbeat(&registered.service_id, HealthStatus::Healthy, ServiceMetrics::default())
//!         .await?;
//!
//!     Ok(())
//! }
//! ```
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::redundant_pub_crate)]

mod channel;
mod client;
mod codec;
mod common;
mod error;
mod server;

pub use channel::{ChannelConfig, ControlChannel};
pub use client::SupervisorClient;
pub use common::*;
pub use error::{Error, Result};
pub use server::{ServerHandle, ServiceHandler, ServiceServer, SupervisorHandler, SupervisorServer};
