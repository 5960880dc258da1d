//! Error types for process management.

use std::io;

use thiserror::Error;

/// Result type for process operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while spawning or stopping a service process.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error.
    #[error("io error: {0} - {1}")]
    Io(&'static str, #[source] io::Error),

    /// The task watching the process went away without reporting.
    #[error("process monitor for {0} failed: {1}")]
    Monitor(String, String),

    /// Sending a signal to the process failed.
    #[error("failed to signal process {pid}: {source}")]
    Signal {
        /// The target process.
        pid: u32,

        /// The underlying errno.
        #[source]
        source: nix::errno::Errno,
    },

    /// Failed to spawn a process.
    #[error("failed to spawn process: {0}")]
    SpawnProcess(String),
}
