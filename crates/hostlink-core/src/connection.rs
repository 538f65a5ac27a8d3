//! The connection table.
//!
//! [`ConnectionManager`] is the only owner of handles bound to host
//! instances. Other components see leases borrowed from it, never the map.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info, warn};

use hostlink_protocols::{
    ConnectionState, ErrorClassification, ExternalInstance, HostError, HostLinkError,
    ProcessProbe, NO_SOLUTION,
};

use crate::classify::ClassificationTable;
use crate::executor::CallError;
use crate::lease::{HandleLease, borrow_handle};
use crate::scanner::RegistryScanner;

struct TrackedConnection {
    lease: HandleLease,
    instance: ExternalInstance,
    last_health_check: DateTime<Utc>,
}

/// Owns the table of live connections, keyed by process id.
pub struct ConnectionManager {
    scanner: Arc<RegistryScanner>,
    classifier: Arc<ClassificationTable>,
    connections: DashMap<u32, TrackedConnection>,
}

impl ConnectionManager {
    pub fn new(scanner: Arc<RegistryScanner>, classifier: Arc<ClassificationTable>) -> Self {
        Self {
            scanner,
            classifier,
            connections: DashMap::new(),
        }
    }

    pub fn scanner(&self) -> &Arc<RegistryScanner> {
        &self.scanner
    }

    pub fn classifier(&self) -> &Arc<ClassificationTable> {
        &self.classifier
    }

    /// Bind a handle to `pid` and track it.
    ///
    /// Re-scans the registry first. An existing entry for the same pid is
    /// released before the new handle is bound. Every blocking step is
    /// bounded; a host that stops answering ends in `Timeout`.
    pub async fn connect(&self, pid: u32) -> Result<ExternalInstance, HostLinkError> {
        let candidate = self
            .scanner
            .find(pid)
            .await
            .map_err(|err| self.classifier.registry_error(err))?;

        let Some(candidate) = candidate else {
            if self.evict(pid, ConnectionState::Failed).is_some() {
                info!("Evicted stale connection to process {} (no longer registered)", pid);
            }
            return Err(HostLinkError::NotFound(pid));
        };

        if let Some((_, previous)) = self.connections.remove(&pid) {
            debug!("Replacing existing connection to process {}", pid);
            Self::close(previous, ConnectionState::Disconnected);
        }

        let operation = format!("Connect to process {}", pid);
        let mut state = ConnectionState::Unknown.transition(ConnectionState::Connecting);
        let mut lease = match self.scanner.bind(&candidate).await {
            Ok(lease) => lease,
            Err(err) => {
                state = state.transition(Self::failed_state(&err));
                debug!("Connection to process {} ended {}", pid, state);
                if let CallError::Host(source) = &err {
                    let classified = self.classifier.classify(source.code);
                    if classified.classification == ErrorClassification::NotFound {
                        return Err(HostLinkError::NotFound(pid));
                    }
                }
                return Err(self.classifier.host_error(&operation, err));
            }
        };

        let borrowed = lease
            .value()
            .map_err(HostError::from)
            .and_then(|handle| borrow_handle(format!("connect:{}", pid), handle));
        let solution = match borrowed {
            Ok(borrowed) => self.scanner.read_solution(borrowed).await,
            Err(err) => Err(CallError::Host(err)),
        };
        let solution = match solution {
            Ok(name) => name,
            Err(err @ CallError::Timeout(_)) => {
                state = state.transition(ConnectionState::Timeout);
                warn!("Connection to process {} ended {}: {}", pid, state, err);
                lease.release();
                return Err(self.classifier.host_error(&operation, err));
            }
            Err(err) => {
                debug!("No active solution for process {}: {}", pid, err);
                NO_SOLUTION.to_string()
            }
        };
        let start_time = self.scanner.start_time(pid).await;

        state = state.transition(ConnectionState::Connected);
        let instance = self
            .scanner
            .instance_for(&candidate, solution, start_time)
            .with_status(state);

        let tracked = TrackedConnection {
            lease,
            instance: instance.clone(),
            last_health_check: Utc::now(),
        };
        if let Some(raced) = self.connections.insert(pid, tracked) {
            warn!("Concurrent connect to process {}, releasing the older handle", pid);
            Self::close(raced, ConnectionState::Disconnected);
        }

        info!(
            "Connected to process {} (version {}, solution {})",
            pid, instance.version, instance.active_solution
        );
        Ok(instance)
    }

    fn failed_state(err: &CallError) -> ConnectionState {
        match err {
            CallError::Timeout(_) => ConnectionState::Timeout,
            _ => ConnectionState::Failed,
        }
    }

    /// Drop the connection to `pid`. Unknown pids are a no-op.
    pub fn disconnect(&self, pid: u32) {
        match self.evict(pid, ConnectionState::Disconnected) {
            Some(_) => info!("Disconnected from process {}", pid),
            None => debug!("Disconnect for untracked process {} ignored", pid),
        }
    }

    /// Borrow the handle for `pid`. No I/O beyond the reference count.
    pub fn get(&self, pid: u32) -> Result<HandleLease, HostLinkError> {
        let entry = self
            .connections
            .get(&pid)
            .ok_or(HostLinkError::NotConnected(pid))?;
        let handle = entry
            .lease
            .value()
            .map_err(|_| HostLinkError::NotConnected(pid))?;
        borrow_handle(format!("call:{}", pid), handle).map_err(|err| {
            debug!("Could not borrow handle for process {}: {}", pid, err);
            HostLinkError::NotConnected(pid)
        })
    }

    /// Borrow the handle and report which table entry it came from.
    pub(crate) fn get_tagged(&self, pid: u32) -> Result<(HandleLease, u64), HostLinkError> {
        let entry = self
            .connections
            .get(&pid)
            .ok_or(HostLinkError::NotConnected(pid))?;
        let handle = entry
            .lease
            .value()
            .map_err(|_| HostLinkError::NotConnected(pid))?;
        let borrowed = borrow_handle(format!("probe:{}", pid), handle)
            .map_err(|_| HostLinkError::NotConnected(pid))?;
        Ok((borrowed, entry.lease.id()))
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.connections.contains_key(&pid)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Tracked process ids.
    pub fn pids(&self) -> Vec<u32> {
        self.connections.iter().map(|entry| *entry.key()).collect()
    }

    /// Copy of every tracked instance.
    pub fn snapshot(&self) -> Vec<ExternalInstance> {
        let mut instances: Vec<ExternalInstance> = self
            .connections
            .iter()
            .map(|entry| entry.instance.clone())
            .collect();
        instances.sort_by_key(|instance| instance.process_id);
        instances
    }

    pub fn last_health_check(&self, pid: u32) -> Option<DateTime<Utc>> {
        self.connections
            .get(&pid)
            .map(|entry| entry.last_health_check)
    }

    /// Record a successful health check (`Connected -> Connected`).
    pub fn touch(&self, pid: u32) -> bool {
        match self.connections.get_mut(&pid) {
            Some(mut entry) => {
                entry.last_health_check = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Remove `pid`, recording the terminal state it reached.
    pub fn evict(&self, pid: u32, state: ConnectionState) -> Option<ExternalInstance> {
        let (_, tracked) = self.connections.remove(&pid)?;
        Some(Self::close(tracked, state))
    }

    /// Remove `pid` only if it is still the entry identified by `lease_id`.
    ///
    /// A probe that raced with a reconnect must not evict the new handle.
    pub(crate) fn evict_lease(
        &self,
        pid: u32,
        lease_id: u64,
        state: ConnectionState,
    ) -> Option<ExternalInstance> {
        let (_, tracked) = self
            .connections
            .remove_if(&pid, |_, tracked| tracked.lease.id() == lease_id)?;
        Some(Self::close(tracked, state))
    }

    /// Evict every connection whose process has exited. Returns the count.
    pub fn prune_exited(&self, processes: &dyn ProcessProbe) -> usize {
        let dead: Vec<u32> = self
            .connections
            .iter()
            .map(|entry| *entry.key())
            .filter(|pid| !processes.is_alive(*pid))
            .collect();

        let pruned = dead
            .into_iter()
            .filter(|pid| self.evict(*pid, ConnectionState::Failed).is_some())
            .count();
        if pruned > 0 {
            info!("Pruned {} connection(s) to exited processes", pruned);
        }
        pruned
    }

    /// Release every tracked handle.
    pub fn disconnect_all(&self) -> usize {
        let count = self
            .pids()
            .into_iter()
            .filter(|pid| self.evict(*pid, ConnectionState::Disconnected).is_some())
            .count();
        if count > 0 {
            info!("Disconnected {} connection(s)", count);
        }
        count
    }

    fn close(mut tracked: TrackedConnection, state: ConnectionState) -> ExternalInstance {
        tracked.lease.release();
        let current = tracked.instance.status;
        tracked.instance.status = current.transition(state);
        tracked.instance
    }
}

/// Validated state changes.
trait Transition {
    fn transition(self, next: ConnectionState) -> ConnectionState;
}

impl Transition for ConnectionState {
    fn transition(self, next: ConnectionState) -> ConnectionState {
        if !self.can_transition_to(next) {
            debug!("Unexpected connection state change {} -> {}", self, next);
        }
        next
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.disconnect_all();
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
