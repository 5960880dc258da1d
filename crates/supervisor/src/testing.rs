//! Fakes shared by the unit tests.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use warden_control_rpc::{ServiceHandler, StopRequest, StopResponse};
use warden_identity_store_mock::MockIdentityStore;
use warden_process::{ProcessSpawner, ProcessSpec, ServiceProcess};

use crate::clock::Clock;
use crate::config::{ServiceConfig, SupervisorSettings};
use crate::connector::{ServiceConnector, ServiceController};
use crate::enrichment::MeshEnricher;
use crate::error::{Error, Result};
use crate::registry::ServiceRegistry;

/// Clock whose sleeps return at once and move virtual time forward.
pub struct RecordingClock {
    elapsed: Mutex<Duration>,
    origin: Instant,
    sleeps: Mutex<Vec<Duration>>,
}

impl Default for RecordingClock {
    fn default() -> Self {
        Self {
            elapsed: Mutex::new(Duration::ZERO),
            origin: Instant::now(),
            sleeps: Mutex::new(Vec::new()),
        }
    }
}

impl RecordingClock {
    pub fn advance(&self, duration: Duration) {
        *self.elapsed.lock().unwrap() += duration;
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }

    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap()
    }
}

#[async_trait]
impl Clock for RecordingClock {
    fn now(&self) -> Instant {
        self.origin + *self.elapsed.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

/// Service-side stop handler that counts calls.
#[derive(Clone, Default)]
pub struct StopCounter(Arc<AtomicUsize>);

impl StopCounter {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServiceHandler for StopCounter {
    async fn stop(&self, _request: StopRequest) -> StopResponse {
        self.0.fetch_add(1, Ordering::SeqCst);
        StopResponse { accepted: true }
    }
}

/// Controller that records what the supervisor asked of it.
pub struct FakeController {
    closed: AtomicBool,
    hang: bool,
    stop_error: Option<fn() -> warden_control_rpc::Error>,
    stops: AtomicUsize,
}

impl FakeController {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServiceController for FakeController {
    async fn stop(
        &self,
        _request: StopRequest,
        _limit: Duration,
    ) -> warden_control_rpc::Result<StopResponse> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            std::future::pending::<()>().await;
        }
        match self.stop_error {
            Some(error) => Err(error()),
            None => Ok(StopResponse { accepted: true }),
        }
    }

    async fn ping(&self) -> warden_control_rpc::Result<()> {
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Connector handing out [`FakeController`]s.
#[derive(Default)]
pub struct FakeConnector {
    controllers: Mutex<Vec<Arc<FakeController>>>,
    fail: bool,
    hang: bool,
    stop_error: Option<fn() -> warden_control_rpc::Error>,
}

impl FakeConnector {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Controllers whose Stop never answers.
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    pub fn with_stop_error(stop_error: fn() -> warden_control_rpc::Error) -> Self {
        Self {
            stop_error: Some(stop_error),
            ..Self::default()
        }
    }

    pub fn connects(&self) -> usize {
        self.controllers.lock().unwrap().len()
    }

    pub fn controllers(&self) -> Vec<Arc<FakeController>> {
        self.controllers.lock().unwrap().clone()
    }

    pub fn total_stops(&self) -> usize {
        self.controllers().iter().map(|c| c.stops()).sum()
    }
}

#[async_trait]
impl ServiceConnector for FakeConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn ServiceController>> {
        // Lets concurrent registrations interleave.
        tokio::task::yield_now().await;

        if self.fail {
            return Err(Error::Connection {
                address: address.to_string(),
                attempts: 3,
                source: warden_control_rpc::Error::ConnectionClosing,
            });
        }

        let controller = Arc::new(FakeController {
            closed: AtomicBool::new(false),
            hang: self.hang,
            stop_error: self.stop_error,
            stops: AtomicUsize::new(0),
        });
        self.controllers
            .lock()
            .unwrap()
            .push(Arc::clone(&controller));

        Ok(controller)
    }
}

/// Shared view of a process handed out by [`FakeSpawner`].
pub struct FakeProcessState {
    name: String,
    running: AtomicBool,
    stop_fails: bool,
    stops: AtomicUsize,
}

impl FakeProcessState {
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

struct FakeProcess(Arc<FakeProcessState>);

#[async_trait]
impl ServiceProcess for FakeProcess {
    fn name(&self) -> &str {
        &self.0.name
    }

    fn pid(&self) -> u32 {
        4242
    }

    fn is_running(&self) -> bool {
        self.0.is_running()
    }

    async fn stop(&self) -> warden_process::Result<()> {
        self.0.stops.fetch_add(1, Ordering::SeqCst);
        if self.0.stop_fails {
            return Err(warden_process::Error::SpawnProcess(
                "refusing to stop".to_string(),
            ));
        }
        self.0.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Spawner that records specs and, optionally, registers the "spawned"
/// service straight away.
#[derive(Default)]
pub struct FakeSpawner {
    processes: Mutex<Vec<Arc<FakeProcessState>>>,
    registry: Mutex<Option<Arc<ServiceRegistry>>>,
    silent: Mutex<Vec<String>>,
    specs: Mutex<Vec<ProcessSpec>>,
    stop_fails: bool,
}

impl FakeSpawner {
    pub fn failing_to_stop() -> Self {
        Self {
            stop_fails: true,
            ..Self::default()
        }
    }

    pub fn register_into(&self, registry: Arc<ServiceRegistry>) {
        *self.registry.lock().unwrap() = Some(registry);
    }

    pub fn stay_silent(&self, name: &str) {
        self.silent.lock().unwrap().push(name.to_string());
    }

    pub fn processes(&self) -> Vec<Arc<FakeProcessState>> {
        self.processes.lock().unwrap().clone()
    }

    pub fn specs(&self) -> Vec<ProcessSpec> {
        self.specs.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessSpawner for FakeSpawner {
    async fn spawn(&self, spec: ProcessSpec) -> warden_process::Result<Box<dyn ServiceProcess>> {
        let state = Arc::new(FakeProcessState {
            name: spec.name.clone(),
            running: AtomicBool::new(true),
            stop_fails: self.stop_fails,
            stops: AtomicUsize::new(0),
        });
        self.processes.lock().unwrap().push(Arc::clone(&state));
        self.specs.lock().unwrap().push(spec.clone());

        let silent = self.silent.lock().unwrap().contains(&spec.name);
        let registry = self.registry.lock().unwrap().clone();
        if let Some(registry) = registry.filter(|_| !silent) {
            registry
                .register_service(
                    warden_control_rpc::ServiceDescriptor::new(&spec.name, "i1", "127.0.0.1", 9000),
                    warden_control_rpc::ServiceCapabilities::default(),
                )
                .await
                .map_err(|e| warden_process::Error::SpawnProcess(e.to_string()))?;
        }

        Ok(Box::new(FakeProcess(state)))
    }
}

pub fn test_settings() -> SupervisorSettings {
    SupervisorSettings {
        data_dir: PathBuf::from("/tmp/warden"),
        instance_id: "test".to_string(),
        listen_address: "127.0.0.1:50051".to_string(),
        mesh_service: "mesh".to_string(),
        port_offset: 10,
    }
}

pub fn registry_with(
    connector: Arc<dyn ServiceConnector>,
    configs: BTreeMap<String, ServiceConfig>,
) -> ServiceRegistry {
    ServiceRegistry::new(
        test_settings(),
        configs,
        connector,
        MeshEnricher::new("mesh", MockIdentityStore::empty()),
        Arc::new(RecordingClock::default()),
    )
}
