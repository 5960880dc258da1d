//! Process spawning backed by `tokio::process`.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, warn};

use crate::error::{Error, Result};
use crate::{ProcessSpawner, ProcessSpec, ServiceProcess};

const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

// Output readers may outlive the process if it leaked its pipes to a child.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// A service process spawned by [`LocalProcessSpawner`].
pub struct LocalProcess {
    exited: CancellationToken,
    monitor: Mutex<Option<JoinHandle<Result<()>>>>,
    name: String,
    pid: u32,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl LocalProcess {
    /// Waits until the process exits on its own or is stopped.
    pub async fn wait_for_exit(&self) {
        self.exited.cancelled().await;
    }
}

#[async_trait]
impl ServiceProcess for LocalProcess {
    fn name(&self) -> &str {
        &self.name
    }

    fn pid(&self) -> u32 {
        self.pid
    }

    fn is_running(&self) -> bool {
        !self.exited.is_cancelled()
    }

    async fn stop(&self) -> Result<()> {
        info!(service = %self.name, "stopping process {}", self.pid);

        self.shutdown_token.cancel();

        let result = match self.monitor.lock().await.take() {
            Some(handle) => handle
                .await
                .map_err(|e| Error::Monitor(self.name.clone(), e.to_string()))?,
            None => Ok(()),
        };

        if timeout(OUTPUT_DRAIN_TIMEOUT, self.task_tracker.wait())
            .await
            .is_err()
        {
            debug!(service = %self.name, "output of process {} still open after exit", self.pid);
        }

        result
    }
}

impl Drop for LocalProcess {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}

/// Spawns service processes directly on the host.
#[derive(Clone, Debug)]
pub struct LocalProcessSpawner {
    stop_timeout: Duration,
}

impl Default for LocalProcessSpawner {
    fn default() -> Self {
        Self {
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

impl LocalProcessSpawner {
    /// Creates a spawner with the default 10 second stop timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how long a process may take to exit after SIGTERM before it is killed.
    #[must_use]
    pub const fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    /// Spawns a process and returns the concrete handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the process could not be spawned.
    pub fn start(&self, spec: ProcessSpec) -> Result<LocalProcess> {
        let mut cmd = Command::new(&spec.executable);
        cmd.args(&spec.args);

        if let Some(ref working_dir) = spec.working_dir {
            cmd.current_dir(working_dir);
        }

        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        debug!(service = %spec.name, "spawning process: {:?}", cmd);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Io("failed to spawn process", e))?;

        let pid = child.id().ok_or_else(|| {
            Error::SpawnProcess(format!("no pid available for {}", spec.name))
        })?;
        let raw_pid = i32::try_from(pid)
            .map_err(|_| Error::SpawnProcess(format!("pid {pid} out of range")))?;

        info!(service = %spec.name, "process spawned with pid {}", pid);

        let task_tracker = TaskTracker::new();

        if let Some(stdout) = child.stdout.take() {
            task_tracker.spawn(forward_output(stdout, spec.name.clone(), false).in_current_span());
        }

        if let Some(stderr) = child.stderr.take() {
            task_tracker.spawn(forward_output(stderr, spec.name.clone(), true).in_current_span());
        }

        task_tracker.close();

        let shutdown_token = CancellationToken::new();
        let exited = CancellationToken::new();

        let monitor = tokio::spawn(
            monitor(
                child,
                spec.name.clone(),
                Pid::from_raw(raw_pid),
                shutdown_token.clone(),
                exited.clone(),
                self.stop_timeout,
            )
            .in_current_span(),
        );

        Ok(LocalProcess {
            exited,
            monitor: Mutex::new(Some(monitor)),
            name: spec.name,
            pid,
            shutdown_token,
            task_tracker,
        })
    }
}

#[async_trait]
impl ProcessSpawner for LocalProcessSpawner {
    async fn spawn(&self, spec: ProcessSpec) -> Result<Box<dyn ServiceProcess>> {
        Ok(Box::new(self.start(spec)?))
    }
}

async fn forward_output<R>(reader: R, name: String, is_stderr: bool)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if is_stderr {
            warn!(service = %name, "{}", line);
        } else {
            info!(service = %name, "{}", line);
        }
    }
}

async fn monitor(
    mut child: Child,
    name: String,
    pid: Pid,
    shutdown_token: CancellationToken,
    exited: CancellationToken,
    stop_timeout: Duration,
) -> Result<()> {
    let result = tokio::select! {
        status = child.wait() => {
            match status {
                Ok(status) if status.success() => {
                    info!(service = %name, "process exited with status: {}", status);
                }
                Ok(status) => {
                    error!(service = %name, "process exited with non-zero status: {}", status);
                }
                Err(err) => {
                    error!(service = %name, "failed to wait for process: {}", err);
                }
            }
            Ok(())
        }
        () = shutdown_token.cancelled() => terminate(&mut child, &name, pid, stop_timeout).await,
    };

    exited.cancel();
    result
}

async fn terminate(child: &mut Child, name: &str, pid: Pid, stop_timeout: Duration) -> Result<()> {
    match signal::kill(pid, Signal::SIGTERM) {
        // Already gone, nothing left but reaping it.
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(source) => {
            error!(service = %name, "failed to send SIGTERM: {}", source);
            if let Err(err) = child.kill().await {
                error!(service = %name, "failed to kill process: {}", err);
            }
            return Err(Error::Signal {
                pid: pid.as_raw().unsigned_abs(),
                source,
            });
        }
    }

    match timeout(stop_timeout, child.wait()).await {
        Ok(Ok(status)) => {
            info!(service = %name, "process exited with status: {}", status);
            Ok(())
        }
        Ok(Err(err)) => Err(Error::Io("failed to wait for process", err)),
        Err(_) => {
            warn!(
                service = %name,
                "process did not exit within {:?}, killing", stop_timeout
            );
            child
                .kill()
                .await
                .map_err(|e| Error::Io("failed to kill process", e))
        }
    }
}
