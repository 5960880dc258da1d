//! Service process management for the supervisor.
//!
//! The supervisor never touches OS processes directly: it asks a
//! [`ProcessSpawner`] for a [`ServiceProcess`] and only ever stops it or
//! checks whether it is still alive. [`LocalProcessSpawner`] is the
//! implementation backed by `tokio::process`.
//!
//! # Example
//!
//! ```rust,no_run
//! use warden_process::{LocalProcessSpawner, ProcessSpawner, ProcessSpec, Result};
//!
//! async fn run() -> Result<()> {
//!     let spec = ProcessSpec::new("auth", "/usr/local/bin/auth-service")
//!         .with_args(["--verbose"])
//!         .with_env("WARDEN_SERVICE_NAME", "auth");
//!
//!     let process = LocalProcessSpawner::new().spawn(spec).await?;
//!
//!     // The service is now running and will register itself
//!
//!     process.stop().await?;
//!
//!     Ok(())
//! }
//! ```
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod local;

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

pub use error::{Error, Result};
pub use local::{LocalProcess, LocalProcessSpawner};

/// Everything needed to launch one service process.
#[derive(Clone, Debug)]
pub struct ProcessSpec {
    /// Arguments passed to the executable.
    pub args: Vec<String>,

    /// Environment variables set on top of the supervisor's own environment.
    pub env: HashMap<String, String>,

    /// The executable to run.
    pub executable: PathBuf,

    /// Service name, used to tag log output.
    pub name: String,

    /// The working directory for the process.
    pub working_dir: Option<PathBuf>,
}

impl ProcessSpec {
    /// Creates a spec with no arguments and no extra environment.
    #[must_use]
    pub fn new<N: Into<String>, P: AsRef<Path>>(name: N, executable: P) -> Self {
        Self {
            args: Vec::new(),
            env: HashMap::new(),
            executable: executable.as_ref().to_path_buf(),
            name: name.into(),
            working_dir: None,
        }
    }

    /// Appends arguments.
    #[must_use]
    pub fn with_args<A: AsRef<OsStr>>(mut self, args: impl IntoIterator<Item = A>) -> Self {
        self.args.extend(
            args.into_iter()
                .map(|a| a.as_ref().to_string_lossy().to_string()),
        );
        self
    }

    /// Sets an environment variable for the process.
    #[must_use]
    pub fn with_env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Sets the working directory for the process.
    #[must_use]
    pub fn with_working_dir<P: AsRef<Path>>(mut self, working_dir: P) -> Self {
        self.working_dir = Some(working_dir.as_ref().to_path_buf());
        self
    }
}

/// A running service process.
#[async_trait]
pub trait ServiceProcess: Send + Sync {
    /// The service name the process was spawned for.
    fn name(&self) -> &str;

    /// OS process id.
    fn pid(&self) -> u32;

    /// Whether the process has not exited yet.
    fn is_running(&self) -> bool;

    /// Terminates the process and waits for it to exit.
    ///
    /// Stopping a process that already exited is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the process could not be signalled or reaped.
    async fn stop(&self) -> Result<()>;
}

/// Launches service processes.
#[async_trait]
pub trait ProcessSpawner: Send + Sync + 'static {
    /// Spawns a process described by `spec`.
    ///
    /// # Errors
    ///
    /// Returns an error if the process could not be started.
    async fn spawn(&self, spec: ProcessSpec) -> Result<Box<dyn ServiceProcess>>;
}
