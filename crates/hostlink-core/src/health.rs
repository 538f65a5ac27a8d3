//! Background health monitoring of tracked connections.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use hostlink_config::HealthConfig;
use hostlink_protocols::{ConnectionState, ProcessProbe};

use crate::connection::ConnectionManager;
use crate::executor::{Attempt, CallError, OperationExecutor, run_blocking};

/// Result of probing one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeVerdict {
    Healthy,
    /// The connection should be evicted, ending in `state`.
    Unhealthy {
        state: ConnectionState,
        reason: String,
    },
    /// Nothing is tracked for the pid.
    NotConnected,
}

impl ProbeVerdict {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeVerdict::Healthy)
    }
}

/// A connection removed by a health pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Eviction {
    pub process_id: u32,
    pub state: ConnectionState,
    pub reason: String,
}

/// Summary of one health pass.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub timestamp: DateTime<Utc>,
    pub checked: usize,
    pub healthy: usize,
    pub evicted: Vec<Eviction>,
    pub duration_ms: u64,
}

/// Probes every tracked connection and evicts the dead ones.
pub struct HealthMonitor {
    manager: Arc<ConnectionManager>,
    executor: Arc<OperationExecutor>,
    processes: Arc<dyn ProcessProbe>,
    config: HealthConfig,
    last_report: RwLock<Option<HealthReport>>,
    check_count: AtomicU64,
    eviction_count: AtomicU64,
}

impl HealthMonitor {
    pub fn new(
        manager: Arc<ConnectionManager>,
        executor: Arc<OperationExecutor>,
        processes: Arc<dyn ProcessProbe>,
        config: HealthConfig,
    ) -> Self {
        Self {
            manager,
            executor,
            processes,
            config,
            last_report: RwLock::new(None),
            check_count: AtomicU64::new(0),
            eviction_count: AtomicU64::new(0),
        }
    }

    /// Probe `pid` once without evicting.
    pub async fn probe(&self, pid: u32) -> ProbeVerdict {
        self.probe_tagged(pid).await.0
    }

    async fn probe_tagged(&self, pid: u32) -> (ProbeVerdict, Option<u64>) {
        let (lease, lease_id) = match self.manager.get_tagged(pid) {
            Ok(tagged) => tagged,
            Err(_) => return (ProbeVerdict::NotConnected, None),
        };

        let processes = self.processes.clone();
        let alive = run_blocking(self.config.probe_timeout(), move || {
            Ok(processes.is_alive(pid))
        })
        .await;
        if let Attempt::Completed(false) = alive {
            drop(lease);
            return (
                ProbeVerdict::Unhealthy {
                    state: ConnectionState::Failed,
                    reason: "process exited".to_string(),
                },
                Some(lease_id),
            );
        }

        let verdict = match self
            .executor
            .probe(lease, &self.config.probe_property, self.config.probe_timeout())
            .await
        {
            Ok(_) => ProbeVerdict::Healthy,
            Err(err @ CallError::Timeout(_)) => ProbeVerdict::Unhealthy {
                state: ConnectionState::Timeout,
                reason: err.to_string(),
            },
            Err(err) => ProbeVerdict::Unhealthy {
                state: ConnectionState::Failed,
                reason: err.to_string(),
            },
        };
        (verdict, Some(lease_id))
    }

    /// Run one pass over every tracked connection.
    pub async fn check(&self) -> HealthReport {
        let start = Instant::now();
        self.check_count.fetch_add(1, Ordering::SeqCst);

        let pids = self.manager.pids();
        let verdicts = join_all(pids.iter().map(|pid| self.probe_tagged(*pid))).await;

        let mut healthy = 0;
        let mut evicted = Vec::new();
        for (pid, (verdict, lease_id)) in pids.iter().copied().zip(verdicts) {
            match (verdict, lease_id) {
                (ProbeVerdict::Healthy, _) => {
                    self.manager.touch(pid);
                    healthy += 1;
                }
                (ProbeVerdict::Unhealthy { state, reason }, Some(lease_id)) => {
                    if self.manager.evict_lease(pid, lease_id, state).is_some() {
                        warn!("Evicting process {} ({}): {}", pid, state, reason);
                        evicted.push(Eviction {
                            process_id: pid,
                            state,
                            reason,
                        });
                    }
                }
                _ => debug!("Process {} left the table during the health pass", pid),
            }
        }

        let report = HealthReport {
            timestamp: Utc::now(),
            checked: pids.len(),
            healthy,
            evicted,
            duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        };

        if report.evicted.is_empty() {
            debug!(
                "Health check completed in {}ms: {} healthy",
                report.duration_ms, report.healthy
            );
        } else {
            self.eviction_count
                .fetch_add(report.evicted.len() as u64, Ordering::SeqCst);
            info!(
                "Health check evicted {} connection(s), {} healthy",
                report.evicted.len(),
                report.healthy
            );
        }

        *self.last_report.write().await = Some(report.clone());
        report
    }

    pub async fn last_report(&self) -> Option<HealthReport> {
        self.last_report.read().await.clone()
    }

    /// Number of passes run.
    pub fn check_count(&self) -> u64 {
        self.check_count.load(Ordering::SeqCst)
    }

    /// Total connections evicted by health passes.
    pub fn eviction_count(&self) -> u64 {
        self.eviction_count.load(Ordering::SeqCst)
    }

    /// Start the periodic loop. Stops when `token` is cancelled.
    pub fn spawn(self: Arc<Self>, token: CancellationToken) -> MonitorHandle {
        let loop_token = token.clone();
        let join = tokio::spawn(async move { self.run(loop_token).await });
        MonitorHandle { token, join }
    }

    async fn run(&self, token: CancellationToken) {
        let interval = self.config.interval();
        info!("Starting health monitor (interval: {:?})", interval);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    info!("Health monitor shutting down");
                    break;
                }
                _ = tokio::time::sleep(interval) => {
                    self.check().await;
                }
            }
        }
    }
}

/// Handle to a running health loop.
pub struct MonitorHandle {
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.join.await {
            error!("Health monitor task failed: {}", e);
        }
    }
}

#[cfg(test)]
#[path = "health_tests.rs"]
mod tests;
