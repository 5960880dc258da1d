//! Starting and stopping managed services.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use warden_control_rpc::StopRequest;
use warden_process::{ProcessSpawner, ProcessSpec, ServiceProcess};

use crate::clock::Clock;
use crate::config::{ServiceConfig, SupervisorSettings, Timeouts};
use crate::connector::ServiceController;
use crate::enrichment::MeshEnricher;
use crate::error::{Error, Result};
use crate::registry::ServiceRegistry;
use crate::resolver;

/// Errors a Stop call routinely ends with while a service is going away.
const fn is_expected_during_shutdown(error: &warden_control_rpc::Error) -> bool {
    matches!(
        error,
        warden_control_rpc::Error::Timeout(_)
            | warden_control_rpc::Error::ConnectionClosing
            | warden_control_rpc::Error::Cancelled
    )
}

/// Drives service processes through start and stop.
#[derive(Clone)]
pub struct LifecycleController {
    clock: Arc<dyn Clock>,
    configs: Arc<BTreeMap<String, ServiceConfig>>,
    enricher: MeshEnricher,
    processes: Arc<Mutex<HashMap<String, Box<dyn ServiceProcess>>>>,
    registry: Arc<ServiceRegistry>,
    settings: Arc<SupervisorSettings>,
    spawner: Arc<dyn ProcessSpawner>,
    timeouts: Arc<Timeouts>,
}

impl LifecycleController {
    /// Creates a controller.
    #[must_use]
    pub fn new(
        settings: SupervisorSettings,
        configs: BTreeMap<String, ServiceConfig>,
        registry: Arc<ServiceRegistry>,
        spawner: Arc<dyn ProcessSpawner>,
        enricher: MeshEnricher,
        clock: Arc<dyn Clock>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            clock,
            configs: Arc::new(configs),
            enricher,
            processes: Arc::new(Mutex::new(HashMap::new())),
            registry,
            settings: Arc::new(settings),
            spawner,
            timeouts: Arc::new(timeouts),
        }
    }

    /// Starts every enabled service in dependency order.
    ///
    /// # Errors
    ///
    /// Returns the first start failure; later services are not started.
    pub async fn start_all(&self) -> Result<()> {
        let resolution = resolver::resolve(&self.configs);

        info!("starting services in order: {}", resolution.order.join(", "));

        for name in &resolution.order {
            let Some(config) = self.configs.get(name) else {
                continue;
            };

            if let Err(e) = self.start_service(name, config).await {
                error!("failed to start {}, halting startup: {}", name, e);
                return Err(e);
            }
        }

        info!("all {} services started", resolution.order.len());
        Ok(())
    }

    /// Spawns a service and waits for it to register.
    ///
    /// The mesh service gets node identity in its environment at spawn; the
    /// rest of its configuration, identity included, is handed over when it
    /// registers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyRunning`] if an instance is starting or running,
    /// [`Error::Process`] if it cannot be spawned, or
    /// [`Error::RegistrationTimeout`] if it does not register in time, in
    /// which case the process has been stopped.
    pub async fn start_service(&self, name: &str, config: &ServiceConfig) -> Result<()> {
        if self.registry.is_service_registered(name).await {
            return Err(Error::AlreadyRunning(name.to_string()));
        }

        {
            let mut processes = self.processes.lock().await;
            match processes.get(name) {
                Some(process) if process.is_running() => {
                    return Err(Error::AlreadyRunning(name.to_string()));
                }
                Some(_) => {
                    debug!("discarding exited process handle of {}", name);
                    processes.remove(name);
                }
                None => {}
            }
        }

        let mut environment = config.environment.clone();
        if self.enricher.applies_to(name) {
            self.enricher.enrich_environment(&mut environment).await;
        }

        let mut spec = ProcessSpec::new(name, &config.executable).with_args(&config.args);
        spec.env = environment;
        let spec = spec
            .with_env("WARDEN_SERVICE_NAME", name)
            .with_env("WARDEN_INSTANCE_ID", &self.settings.instance_id)
            .with_env("WARDEN_SUPERVISOR_ADDRESS", &self.settings.listen_address)
            .with_env("WARDEN_PORT_OFFSET", self.settings.port_offset.to_string());

        info!("starting service {} ({})", name, config.executable);

        let process = self.spawner.spawn(spec).await?;

        if let Err(e) = self.wait_for_registration(name).await {
            error!("{}, stopping process {}", e, process.pid());
            if let Err(stop_err) = process.stop().await {
                warn!("failed to stop unregistered service {}: {}", name, stop_err);
            }
            return Err(e);
        }

        info!("service {} registered", name);
        self.processes
            .lock()
            .await
            .insert(name.to_string(), process);

        Ok(())
    }

    /// Stops one service.
    ///
    /// Sends it a Stop request, then stops its process if this controller
    /// spawned it. An unanswered Stop is logged, never returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the id is unknown, or the process error
    /// if the process could not be stopped and `force` is not set.
    pub async fn stop_service(&self, id: &str, force: bool, grace_period: Duration) -> Result<()> {
        let Ok(status) = self.registry.get_service_status(id).await else {
            return Err(Error::NotFound(id.to_string()));
        };

        if let Some(controller) = self.registry.controller(id).await {
            self.send_stop(&status.name, id, controller.as_ref(), grace_period)
                .await;
        }

        let process = self.processes.lock().await.remove(&status.name);

        if let Some(process) = process {
            if let Err(e) = process.stop().await {
                if force {
                    warn!("failed to stop process of {}, ignoring: {}", status.name, e);
                } else {
                    return Err(e.into());
                }
            }
        }

        Ok(())
    }

    /// Stops every registered service and waits for them to unregister.
    ///
    /// Waiting is bounded by the earlier of `deadline` and the drain cap;
    /// services still registered at that point are logged, not returned as
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if `cancel` fires while waiting.
    pub async fn stop_all_services(
        &self,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> Result<()> {
        let services = self.registry.list_services(None, "*").await;

        if services.is_empty() {
            info!("no registered services to stop");
            self.stop_remaining_processes().await;
            return Ok(());
        }

        info!("stopping {} services", services.len());

        let task_tracker = TaskTracker::new();
        for status in services {
            let controller = self.clone();
            let grace_period = self.timeouts.stop_grace;
            task_tracker.spawn(async move {
                if let Err(e) = controller
                    .stop_service(&status.id, true, grace_period)
                    .await
                {
                    warn!("failed to stop {} ({}): {}", status.name, status.id, e);
                }
            });
        }
        task_tracker.close();

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            () = task_tracker.wait() => {}
        }

        info!("stop commands issued, waiting for services to unregister");

        let started = self.clock.now();
        let wait = deadline
            .saturating_duration_since(started)
            .min(self.timeouts.drain_cap);
        let mut last_progress = started;

        loop {
            let remaining = self.registry.list_services(None, "*").await;
            if remaining.is_empty() {
                info!("all services unregistered");
                break;
            }

            let names: Vec<_> = remaining.iter().map(|s| s.name.as_str()).collect();
            let now = self.clock.now();

            if now.saturating_duration_since(started) >= wait {
                warn!(
                    "timed out after {:?} waiting for services to unregister: {}",
                    wait,
                    names.join(", ")
                );
                break;
            }

            if now.saturating_duration_since(last_progress) >= self.timeouts.drain_progress {
                info!(
                    "waiting for {} services to unregister: {}",
                    names.len(),
                    names.join(", ")
                );
                last_progress = now;
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Error::Cancelled),
                () = self.clock.sleep(self.timeouts.drain_poll) => {}
            }
        }

        self.stop_remaining_processes().await;
        Ok(())
    }

    async fn send_stop(
        &self,
        name: &str,
        id: &str,
        controller: &dyn ServiceController,
        grace_period: Duration,
    ) {
        let request = StopRequest {
            grace_period,
            save_state: true,
        };

        let limit = self.timeouts.stop_rpc;
        let outcome = tokio::select! {
            biased;
            result = controller.stop(request, limit) => Some(result),
            () = self.clock.sleep(limit) => None,
        };

        match outcome {
            Some(Ok(response)) => {
                info!(
                    "stop sent to {} ({}), accepted: {}",
                    name, id, response.accepted
                );
            }
            Some(Err(e)) if is_expected_during_shutdown(&e) => {
                info!("stop of {} ({}) ended with expected shutdown error: {}", name, id, e);
            }
            Some(Err(e)) => {
                warn!("stop of {} ({}) failed: {}", name, id, e);
            }
            None => {
                info!(
                    "stop of {} ({}) timed out after {:?}, expected during shutdown",
                    name, id, limit
                );
            }
        }
    }

    async fn wait_for_registration(&self, name: &str) -> Result<()> {
        let budget = self.timeouts.registration;
        let started = self.clock.now();
        let mut attempt = 0;

        loop {
            if self.registry.is_service_registered(name).await {
                return Ok(());
            }

            let waited = self.clock.now().saturating_duration_since(started);
            if waited >= budget {
                return Err(Error::RegistrationTimeout {
                    name: name.to_string(),
                    waited,
                });
            }

            let delay = self
                .timeouts
                .registration_poll
                .next(attempt)
                .min(budget - waited);
            debug!("{} not registered yet, checking again in {:?}", name, delay);

            self.clock.sleep(delay).await;
            attempt += 1;
        }
    }

    async fn stop_remaining_processes(&self) {
        let processes: Vec<_> = self.processes.lock().await.drain().collect();

        for (name, process) in processes {
            if !process.is_running() {
                continue;
            }

            info!("stopping leftover process of {} ({})", name, process.pid());
            if let Err(e) = process.stop().await {
                warn!("failed to stop leftover process of {}: {}", name, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;
    use warden_control_rpc::{HealthStatus, ServiceCapabilities, ServiceDescriptor, ServiceMetrics};
    use warden_identity_store::NodeIdentity;
    use warden_identity_store_mock::MockIdentityStore;

    use super::*;
    use crate::testing::{FakeConnector, FakeSpawner, RecordingClock, test_settings};

    struct Harness {
        clock: Arc<RecordingClock>,
        connector: Arc<FakeConnector>,
        controller: LifecycleController,
        registry: Arc<ServiceRegistry>,
        spawner: Arc<FakeSpawner>,
    }

    fn harness_with(
        configs: BTreeMap<String, ServiceConfig>,
        connector: FakeConnector,
        spawner: FakeSpawner,
    ) -> Harness {
        harness_with_identity(configs, connector, spawner, MockIdentityStore::empty())
    }

    fn harness_with_identity(
        configs: BTreeMap<String, ServiceConfig>,
        connector: FakeConnector,
        spawner: FakeSpawner,
        identity_store: MockIdentityStore,
    ) -> Harness {
        let clock = Arc::new(RecordingClock::default());
        let connector = Arc::new(connector);
        let spawner = Arc::new(spawner);
        let enricher = MeshEnricher::new("mesh", identity_store);

        let registry = Arc::new(ServiceRegistry::new(
            test_settings(),
            configs.clone(),
            Arc::clone(&connector) as Arc<dyn crate::ServiceConnector>,
            enricher.clone(),
            Arc::clone(&clock) as Arc<dyn Clock>,
        ));
        spawner.register_into(Arc::clone(&registry));

        let controller = LifecycleController::new(
            test_settings(),
            configs,
            Arc::clone(&registry),
            Arc::clone(&spawner) as Arc<dyn ProcessSpawner>,
            enricher,
            Arc::clone(&clock) as Arc<dyn Clock>,
            Timeouts::default(),
        );

        Harness {
            clock,
            connector,
            controller,
            registry,
            spawner,
        }
    }

    fn harness(configs: BTreeMap<String, ServiceConfig>) -> Harness {
        harness_with(configs, FakeConnector::default(), FakeSpawner::default())
    }

    fn chain() -> BTreeMap<String, ServiceConfig> {
        BTreeMap::from([
            ("db".to_string(), ServiceConfig::new("/bin/db")),
            (
                "cache".to_string(),
                ServiceConfig::new("/bin/cache").with_dependencies(["db"]),
            ),
            (
                "worker".to_string(),
                ServiceConfig::new("/bin/worker").with_dependencies(["cache"]),
            ),
        ])
    }

    async fn register(registry: &ServiceRegistry, name: &str, instance: &str) -> String {
        registry
            .register_service(
                ServiceDescriptor::new(name, instance, "127.0.0.1", 9100),
                ServiceCapabilities::default(),
            )
            .await
            .unwrap()
            .0
    }

    #[tokio::test]
    async fn test_start_service_spawns_and_waits_for_registration() {
        let h = harness(BTreeMap::new());
        let mut config = ServiceConfig::new("/bin/auth");
        config.args = vec!["--verbose".to_string()];
        config
            .environment
            .insert("RUST_LOG".to_string(), "debug".to_string());

        h.controller.start_service("auth", &config).await.unwrap();

        let specs = h.spawner.specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].args, vec!["--verbose".to_string()]);
        assert_eq!(specs[0].env["RUST_LOG"], "debug");
        assert_eq!(specs[0].env["WARDEN_SERVICE_NAME"], "auth");
        assert_eq!(specs[0].env["WARDEN_INSTANCE_ID"], "test");
        assert_eq!(specs[0].env["WARDEN_SUPERVISOR_ADDRESS"], "127.0.0.1:50051");
        assert_eq!(specs[0].env["WARDEN_PORT_OFFSET"], "10");
        assert!(h.registry.is_service_registered("auth").await);
        assert!(h.clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_start_rejects_registered_service() {
        let h = harness(BTreeMap::new());
        register(&h.registry, "auth", "a1").await;

        let result = h
            .controller
            .start_service("auth", &ServiceConfig::new("/bin/auth"))
            .await;

        assert!(matches!(result, Err(Error::AlreadyRunning(name)) if name == "auth"));
        assert!(h.spawner.specs().is_empty());
    }

    #[tokio::test]
    async fn test_registration_timeout_stops_process() {
        let h = harness(BTreeMap::new());
        h.spawner.stay_silent("auth");

        let result = h
            .controller
            .start_service("auth", &ServiceConfig::new("/bin/auth"))
            .await;

        assert!(matches!(result, Err(Error::RegistrationTimeout { .. })));
        assert_eq!(h.clock.elapsed(), Duration::from_secs(60));
        assert_eq!(
            h.clock.sleeps()[..5],
            [
                Duration::from_millis(1000),
                Duration::from_millis(1500),
                Duration::from_millis(2250),
                Duration::from_millis(3375),
                Duration::from_millis(5000),
            ]
        );

        let processes = h.spawner.processes();
        assert_eq!(processes[0].stops(), 1);
        assert!(!processes[0].is_running());
    }

    #[tokio::test]
    async fn test_start_all_follows_dependency_order() {
        let h = harness(chain());

        h.controller.start_all().await.unwrap();

        let names: Vec<_> = h.spawner.specs().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["db", "cache", "worker"]);
    }

    #[tokio::test]
    async fn test_start_all_halts_on_first_failure() {
        let h = harness(chain());
        h.spawner.stay_silent("cache");

        let result = h.controller.start_all().await;

        assert!(matches!(result, Err(Error::RegistrationTimeout { name, .. }) if name == "cache"));
        let names: Vec<_> = h.spawner.specs().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["db", "cache"]);
    }

    #[tokio::test]
    async fn test_stop_service_sends_stop_and_stops_process() {
        let h = harness(BTreeMap::new());
        h.controller
            .start_service("auth", &ServiceConfig::new("/bin/auth"))
            .await
            .unwrap();
        let id = h.registry.list_services(None, "auth").await[0].id.clone();

        h.controller
            .stop_service(&id, false, Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(h.connector.total_stops(), 1);
        assert_eq!(h.spawner.processes()[0].stops(), 1);
    }

    #[tokio::test]
    async fn test_stop_unknown_service_is_not_found() {
        let h = harness(BTreeMap::new());

        let result = h
            .controller
            .stop_service("missing", false, Duration::from_secs(10))
            .await;

        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[traced_test]
    #[tokio::test]
    async fn test_stop_timeout_is_expected_during_shutdown() {
        let h = harness_with(
            BTreeMap::new(),
            FakeConnector::with_stop_error(|| {
                warden_control_rpc::Error::Timeout(Duration::from_secs(5))
            }),
            FakeSpawner::default(),
        );
        let id = register(&h.registry, "auth", "a1").await;

        h.controller
            .stop_service(&id, false, Duration::from_secs(10))
            .await
            .unwrap();

        assert!(logs_contain("expected shutdown error"));
        assert!(!logs_contain("failed"));
    }

    #[traced_test]
    #[tokio::test]
    async fn test_unexpected_stop_error_is_warned_not_returned() {
        let h = harness_with(
            BTreeMap::new(),
            FakeConnector::with_stop_error(|| warden_control_rpc::Error::BadResponseType),
            FakeSpawner::default(),
        );
        let id = register(&h.registry, "auth", "a1").await;

        h.controller
            .stop_service(&id, false, Duration::from_secs(10))
            .await
            .unwrap();

        assert!(logs_contain("failed: unexpected response type"));
    }

    #[tokio::test]
    async fn test_process_stop_failure_respects_force() {
        let h = harness_with(
            BTreeMap::new(),
            FakeConnector::default(),
            FakeSpawner::failing_to_stop(),
        );

        h.controller
            .start_service("auth", &ServiceConfig::new("/bin/auth"))
            .await
            .unwrap();
        let auth = h.registry.list_services(None, "auth").await[0].id.clone();
        let result = h
            .controller
            .stop_service(&auth, false, Duration::from_secs(10))
            .await;
        assert!(matches!(result, Err(Error::Process(_))));

        h.controller
            .start_service("core", &ServiceConfig::new("/bin/core"))
            .await
            .unwrap();
        let core = h.registry.list_services(None, "core").await[0].id.clone();
        h.controller
            .stop_service(&core, true, Duration::from_secs(10))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stop_all_on_empty_registry_returns_immediately() {
        let h = harness(BTreeMap::new());

        h.controller
            .stop_all_services(&CancellationToken::new(), h.clock.now() + Duration::from_secs(30))
            .await
            .unwrap();

        assert!(h.clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_stop_all_gives_up_after_drain_cap() {
        let h = harness(BTreeMap::new());
        for instance in ["a1", "a2", "a3"] {
            register(&h.registry, "auth", instance).await;
        }

        h.controller
            .stop_all_services(&CancellationToken::new(), h.clock.now() + Duration::from_secs(30))
            .await
            .unwrap();

        assert_eq!(h.connector.total_stops(), 3);
        assert_eq!(h.clock.elapsed(), Duration::from_secs(15));
        assert_eq!(h.registry.len().await, 3);
    }

    #[tokio::test]
    async fn test_stop_all_respects_earlier_deadline() {
        let h = harness(BTreeMap::new());
        register(&h.registry, "auth", "a1").await;

        h.controller
            .stop_all_services(&CancellationToken::new(), h.clock.now() + Duration::from_secs(4))
            .await
            .unwrap();

        assert_eq!(h.clock.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_stop_all_returns_once_drained() {
        let h = harness(BTreeMap::new());
        let auth = register(&h.registry, "auth", "a1").await;
        let core = register(&h.registry, "core", "c1").await;

        let registry = Arc::clone(&h.registry);
        let connector = Arc::clone(&h.connector);
        let drain = tokio::spawn(async move {
            while connector.total_stops() < 2 {
                tokio::task::yield_now().await;
            }
            registry.unregister_service(&auth).await.unwrap();
            registry.unregister_service(&core).await.unwrap();
        });

        h.controller
            .stop_all_services(&CancellationToken::new(), h.clock.now() + Duration::from_secs(30))
            .await
            .unwrap();
        drain.await.unwrap();

        assert!(h.registry.is_empty().await);
        assert!(h.clock.elapsed() < Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_stop_all_cancelled() {
        let h = harness(BTreeMap::new());
        register(&h.registry, "auth", "a1").await;

        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = h
            .controller
            .stop_all_services(&cancel, h.clock.now() + Duration::from_secs(30))
            .await;

        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_stop_all_stops_leftover_processes() {
        let h = harness(BTreeMap::new());
        h.controller
            .start_service("auth", &ServiceConfig::new("/bin/auth"))
            .await
            .unwrap();
        let id = h.registry.list_services(None, "auth").await[0].id.clone();
        h.registry.unregister_service(&id).await.unwrap();

        h.controller
            .stop_all_services(&CancellationToken::new(), h.clock.now() + Duration::from_secs(30))
            .await
            .unwrap();

        assert!(!h.spawner.processes()[0].is_running());
    }

    #[tokio::test]
    async fn test_healthy_service_is_restartable_after_unregister() {
        let h = harness(BTreeMap::new());
        let config = ServiceConfig::new("/bin/auth");
        h.controller.start_service("auth", &config).await.unwrap();
        let id = h.registry.list_services(None, "auth").await[0].id.clone();
        h.registry
            .update_heartbeat(&id, HealthStatus::Healthy, ServiceMetrics::default())
            .await
            .unwrap();

        assert!(matches!(
            h.controller.start_service("auth", &config).await,
            Err(Error::AlreadyRunning(_))
        ));

        h.controller
            .stop_service(&id, false, Duration::from_secs(1))
            .await
            .unwrap();
        h.registry.unregister_service(&id).await.unwrap();

        h.controller.start_service("auth", &config).await.unwrap();
        assert_eq!(h.spawner.specs().len(), 2);
    }

    #[tokio::test]
    async fn test_mesh_spawn_carries_identity_environment() {
        let h = harness_with_identity(
            BTreeMap::new(),
            FakeConnector::default(),
            FakeSpawner::default(),
            MockIdentityStore::new(NodeIdentity {
                node_id: "node-1".to_string(),
                routing_id: "route-1".to_string(),
                mesh_id: "mesh-main".to_string(),
            }),
        );

        h.controller
            .start_service("mesh", &ServiceConfig::new("/bin/mesh"))
            .await
            .unwrap();

        let spec = &h.spawner.specs()[0];
        assert_eq!(spec.env["MESH_NODE_ID"], "node-1");
        assert_eq!(spec.env["MESH_ID"], "mesh-main");
        assert!(!spec.env.contains_key("node_id"));
    }

    #[traced_test]
    #[tokio::test]
    async fn test_unanswered_stop_is_bounded() {
        let h = harness_with(
            BTreeMap::new(),
            FakeConnector::hanging(),
            FakeSpawner::default(),
        );
        let id = register(&h.registry, "auth", "a1").await;

        h.controller
            .stop_service(&id, false, Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(h.connector.total_stops(), 1);
        assert_eq!(h.clock.sleeps(), vec![Duration::from_secs(5)]);
        assert!(logs_contain("timed out after 5s"));
    }

    #[tokio::test]
    async fn test_stop_all_cancelled_while_draining() {
        let h = harness(BTreeMap::new());
        register(&h.registry, "auth", "a1").await;
        register(&h.registry, "core", "c1").await;

        let cancel = CancellationToken::new();
        let canceller = {
            let cancel = cancel.clone();
            let clock = Arc::clone(&h.clock);
            async move {
                while clock.sleeps().is_empty() {
                    tokio::task::yield_now().await;
                }
                cancel.cancel();
            }
        };

        let (result, ()) = tokio::join!(
            h.controller
                .stop_all_services(&cancel, h.clock.now() + Duration::from_secs(30)),
            canceller
        );

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(h.connector.total_stops(), 2);
        assert!(h.clock.elapsed() < Duration::from_secs(15));
        assert_eq!(h.registry.len().await, 2);
    }
}
