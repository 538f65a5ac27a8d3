//! The `HostLink` facade: the operations exposed to collaborators.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use hostlink_config::Config;
use hostlink_protocols::{
    ExternalInstance, HostError, HostHandle, HostLinkError, MemoryProbe, OperationOutcome,
    ProcessProbe, RunningObjectRegistry,
};

use crate::classify::ClassificationTable;
use crate::connection::ConnectionManager;
use crate::executor::OperationExecutor;
use crate::health::{HealthMonitor, HealthReport, MonitorHandle};
use crate::locks::PidLocks;
use crate::memory::MemoryGuard;
use crate::process::{SystemMemoryProbe, SystemProcessProbe};
use crate::scanner::{RegistryScanner, ScanReport};

/// Builder for [`HostLink`].
pub struct HostLinkBuilder {
    registry: Arc<dyn RunningObjectRegistry>,
    processes: Option<Arc<dyn ProcessProbe>>,
    memory: Option<Arc<dyn MemoryProbe>>,
    config: Config,
}

impl HostLinkBuilder {
    pub fn new(registry: Arc<dyn RunningObjectRegistry>) -> Self {
        Self {
            registry,
            processes: None,
            memory: None,
            config: Config::default(),
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn process_probe(mut self, probe: Arc<dyn ProcessProbe>) -> Self {
        self.processes = Some(probe);
        self
    }

    pub fn memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.memory = Some(probe);
        self
    }

    pub fn build(self) -> HostLink {
        let config = self.config;
        let processes = self
            .processes
            .unwrap_or_else(|| Arc::new(SystemProcessProbe::new()));
        let memory_probe = self
            .memory
            .unwrap_or_else(|| Arc::new(SystemMemoryProbe::new()));

        let classifier = Arc::new(ClassificationTable::from_config(&config.classification));
        let scanner = Arc::new(RegistryScanner::new(
            self.registry,
            processes.clone(),
            config.registry.signature_prefix.clone(),
            config.connection.active_solution_property.clone(),
        )
        .with_timeouts(
            config.connection.registry_timeout(),
            config.connection.metadata_timeout(),
        ));
        let manager = Arc::new(ConnectionManager::new(scanner, classifier.clone()));

        let memory = Arc::new(MemoryGuard::from_config(memory_probe, &config.memory));
        let prune_manager = Arc::downgrade(&manager);
        let prune_processes = processes.clone();
        memory.register_hook(Arc::new(move || {
            if let Some(manager) = prune_manager.upgrade() {
                manager.prune_exited(prune_processes.as_ref());
            }
        }));

        let executor = Arc::new(OperationExecutor::new(classifier, memory));
        let monitor = Arc::new(HealthMonitor::new(
            manager.clone(),
            executor.clone(),
            processes,
            config.health.clone(),
        ));

        HostLink {
            manager,
            executor,
            monitor,
            locks: PidLocks::new(),
            shutdown: CancellationToken::new(),
            running: Mutex::new(None),
            config,
        }
    }
}

/// Connection lifecycle and resilient execution against host instances.
pub struct HostLink {
    manager: Arc<ConnectionManager>,
    executor: Arc<OperationExecutor>,
    monitor: Arc<HealthMonitor>,
    locks: PidLocks,
    shutdown: CancellationToken,
    running: Mutex<Option<MonitorHandle>>,
    config: Config,
}

impl HostLink {
    pub fn builder(registry: Arc<dyn RunningObjectRegistry>) -> HostLinkBuilder {
        HostLinkBuilder::new(registry)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    /// Every matching host instance in the registry.
    pub async fn discover(&self) -> Result<Vec<ExternalInstance>, HostLinkError> {
        self.scan().await.map(|report| report.instances)
    }

    /// Discovery including the entries that were skipped.
    pub async fn scan(&self) -> Result<ScanReport, HostLinkError> {
        self.manager
            .scanner()
            .scan()
            .await
            .map_err(|err| self.manager.classifier().registry_error(err))
    }

    pub async fn connect(&self, pid: u32) -> Result<ExternalInstance, HostLinkError> {
        self.manager.connect(pid).await
    }

    /// Run a host command. `timeout` defaults to the configured value.
    pub async fn execute(
        &self,
        pid: u32,
        command: &str,
        args: &str,
        timeout: Option<Duration>,
    ) -> OperationOutcome {
        let name = command.to_string();
        let command = command.to_string();
        let args = args.to_string();
        self.run(&name, pid, timeout, move |handle: &dyn HostHandle| {
            handle.execute_command(&command, &args)
        })
        .await
    }

    /// Read a property through a dotted path.
    pub async fn query_property(
        &self,
        pid: u32,
        path: &str,
        timeout: Option<Duration>,
    ) -> OperationOutcome<String> {
        let property = path.to_string();
        self.run(path, pid, timeout, move |handle: &dyn HostHandle| {
            handle.get_property(&property)
        })
        .await
    }

    /// Run an arbitrary operation against the handle for `pid`.
    pub async fn run<T, Op>(
        &self,
        name: &str,
        pid: u32,
        timeout: Option<Duration>,
        op: Op,
    ) -> OperationOutcome<T>
    where
        T: Send + 'static,
        Op: Fn(&dyn HostHandle) -> Result<T, HostError> + Send + Sync + 'static,
    {
        let timeout = timeout.unwrap_or_else(|| self.config.executor.default_timeout());
        let policy = &self.config.executor.retry;
        let lookup = || self.manager.get(pid);

        self.prune_locks();
        if self.config.executor.serialize_commands && self.manager.contains(pid) {
            let _guard = self.locks.lock(pid).await;
            self.executor.execute(name, lookup, op, timeout, policy).await
        } else {
            self.executor.execute(name, lookup, op, timeout, policy).await
        }
    }

    /// Drop locks left behind by evicted connections.
    fn prune_locks(&self) {
        if self.locks.len() > self.manager.len() {
            let dropped = self.locks.retain_idle(|pid| self.manager.contains(pid));
            if dropped > 0 {
                debug!("Dropped {} idle command lock(s)", dropped);
            }
        }
    }

    /// Lock table size, for diagnostics.
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    /// Whether `pid` is tracked and answers a probe now. Never evicts.
    pub async fn is_healthy(&self, pid: u32) -> bool {
        if !self.manager.contains(pid) {
            return false;
        }
        self.monitor.probe(pid).await.is_healthy()
    }

    /// Drop the connection to `pid`. Always succeeds.
    pub fn disconnect(&self, pid: u32) {
        self.manager.disconnect(pid);
        self.locks.forget(pid);
    }

    pub fn list_tracked_instances(&self) -> Vec<ExternalInstance> {
        self.manager.snapshot()
    }

    /// Start the background health loop. No-op if disabled or running.
    pub fn start_monitor(&self) -> bool {
        if !self.config.health.enabled {
            debug!("Health monitor disabled by configuration");
            return false;
        }
        let mut running = self.running.lock();
        if running.is_some() {
            return false;
        }
        *running = Some(self.monitor.clone().spawn(self.shutdown.child_token()));
        true
    }

    pub async fn health_report(&self) -> Option<HealthReport> {
        self.monitor.last_report().await
    }

    /// Stop the health loop and release every connection.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let running = self.running.lock().take();
        if let Some(handle) = running {
            handle.shutdown().await;
        }
        let released = self.manager.disconnect_all();
        info!("HostLink shut down, released {} connection(s)", released);
    }
}

#[cfg(test)]
#[path = "host_tests.rs"]
mod tests;
