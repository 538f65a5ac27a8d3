//! Registry scanning.
//!
//! Enumerates the object-activation registry, keeps entries whose display
//! name carries the host signature, and turns them into [`ExternalInstance`]s.
//! A bad entry is skipped with one warning and never aborts the scan.
//!
//! Registry access, binds and metadata reads are all bounded, so a hung host
//! costs a scan at most one timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, warn};

use hostlink_protocols::{
    ConnectionState, ExternalInstance, HostError, ProcessProbe, RegistryEntry,
    RunningObjectRegistry, NO_SOLUTION,
};

use crate::executor::{self, CallError, run_blocking};
use crate::lease::{HandleLease, adopt_handle};

const UNKNOWN_VERSION: &str = "unknown";
const DEFAULT_REGISTRY_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_METADATA_TIMEOUT: Duration = Duration::from_secs(5);

/// A matching registry entry with its parsed identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub process_id: u32,
    pub version: String,
    pub entry: RegistryEntry,
}

/// An entry left out of the scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    /// `None` when the display name itself could not be read.
    pub display_name: Option<String>,
    pub reason: String,
}

/// Outcome of one registry pass.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub instances: Vec<ExternalInstance>,
    pub skipped: Vec<SkippedEntry>,
}

/// Discovers host instances in the registry.
pub struct RegistryScanner {
    registry: Arc<dyn RunningObjectRegistry>,
    processes: Arc<dyn ProcessProbe>,
    signature_prefix: String,
    solution_property: String,
    registry_timeout: Duration,
    metadata_timeout: Duration,
}

impl RegistryScanner {
    pub fn new(
        registry: Arc<dyn RunningObjectRegistry>,
        processes: Arc<dyn ProcessProbe>,
        signature_prefix: impl Into<String>,
        solution_property: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            processes,
            signature_prefix: signature_prefix.into(),
            solution_property: solution_property.into(),
            registry_timeout: DEFAULT_REGISTRY_TIMEOUT,
            metadata_timeout: DEFAULT_METADATA_TIMEOUT,
        }
    }

    /// Bound registry calls by `registry` and metadata reads by `metadata`.
    pub fn with_timeouts(mut self, registry: Duration, metadata: Duration) -> Self {
        self.registry_timeout = registry;
        self.metadata_timeout = metadata;
        self
    }

    pub fn signature_prefix(&self) -> &str {
        &self.signature_prefix
    }

    /// Parse `{prefix}.{version}:{pid}`.
    ///
    /// Returns `None` for names that do not carry the prefix, and an error
    /// for names that do but have no usable process id.
    pub fn parse_display_name(prefix: &str, name: &str) -> Option<Result<(String, u32), String>> {
        let rest = name.strip_prefix(prefix)?;
        if !(rest.starts_with('.') || rest.starts_with(':')) {
            return None;
        }

        let Some((head, tail)) = rest.rsplit_once(':') else {
            return Some(Err(format!("no ':{{pid}}' suffix in '{}'", name)));
        };
        let pid = match tail.trim().parse::<u32>() {
            Ok(0) => return Some(Err(format!("process id 0 in '{}'", name))),
            Ok(pid) => pid,
            Err(e) => return Some(Err(format!("invalid process id '{}': {}", tail, e))),
        };

        let version = head.trim_start_matches('.');
        let version = if version.is_empty() {
            UNKNOWN_VERSION.to_string()
        } else {
            version.to_string()
        };
        Some(Ok((version, pid)))
    }

    /// Matching candidates, one per process id (last seen wins).
    ///
    /// Only registry access failure is an error; bad entries land in `skipped`.
    pub async fn candidates(&self) -> Result<(Vec<Candidate>, Vec<SkippedEntry>), CallError> {
        let registry = self.registry.clone();
        let prefix = self.signature_prefix.clone();
        run_blocking(self.registry_timeout, move || {
            Self::enumerate(registry.as_ref(), &prefix)
        })
        .await
        .into_result(self.registry_timeout)
    }

    fn enumerate(
        registry: &dyn RunningObjectRegistry,
        prefix: &str,
    ) -> Result<(Vec<Candidate>, Vec<SkippedEntry>), HostError> {
        let entries = registry.entries()?;
        let mut skipped = Vec::new();
        let mut by_pid: HashMap<u32, Candidate> = HashMap::new();
        let mut order = Vec::new();

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Skipping registry entry with unreadable name: {}", err);
                    skipped.push(SkippedEntry {
                        display_name: None,
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            match Self::parse_display_name(prefix, &entry.display_name) {
                None => continue,
                Some(Err(reason)) => {
                    warn!("Skipping malformed registry entry: {}", reason);
                    skipped.push(SkippedEntry {
                        display_name: Some(entry.display_name.clone()),
                        reason,
                    });
                }
                Some(Ok((version, process_id))) => {
                    if by_pid.contains_key(&process_id) {
                        debug!("Duplicate registry entry for process {}", process_id);
                    } else {
                        order.push(process_id);
                    }
                    by_pid.insert(
                        process_id,
                        Candidate {
                            process_id,
                            version,
                            entry,
                        },
                    );
                }
            }
        }

        let candidates = order
            .into_iter()
            .filter_map(|pid| by_pid.remove(&pid))
            .collect();
        Ok((candidates, skipped))
    }

    /// Full scan: bind each candidate and read its metadata.
    ///
    /// Candidates are described concurrently.
    pub async fn scan(&self) -> Result<ScanReport, CallError> {
        let (candidates, mut skipped) = self.candidates().await?;
        let described = join_all(candidates.iter().map(|c| self.describe(c))).await;

        let mut instances = Vec::with_capacity(candidates.len());
        for (candidate, result) in candidates.iter().zip(described) {
            match result {
                Ok(instance) => instances.push(instance),
                Err(err) => {
                    warn!(
                        "Skipping registry entry '{}': bind failed: {}",
                        candidate.entry.display_name, err
                    );
                    skipped.push(SkippedEntry {
                        display_name: Some(candidate.entry.display_name.clone()),
                        reason: err.to_string(),
                    });
                }
            }
        }

        debug!(
            "Registry scan found {} instance(s), skipped {}",
            instances.len(),
            skipped.len()
        );
        Ok(ScanReport { instances, skipped })
    }

    pub async fn discover(&self) -> Result<Vec<ExternalInstance>, CallError> {
        self.scan().await.map(|report| report.instances)
    }

    /// Look up a live entry for `pid` without binding it.
    pub async fn find(&self, pid: u32) -> Result<Option<Candidate>, CallError> {
        let (candidates, _) = self.candidates().await?;
        Ok(candidates.into_iter().find(|c| c.process_id == pid))
    }

    /// Bind `candidate`, adopting the returned reference.
    ///
    /// A bind abandoned on timeout releases its reference when it returns.
    pub async fn bind(&self, candidate: &Candidate) -> Result<HandleLease, CallError> {
        let registry = self.registry.clone();
        let entry = candidate.entry.clone();
        let label = format!("handle:{}", candidate.process_id);
        run_blocking(self.registry_timeout, move || {
            registry
                .bind(&entry)
                .map(|handle| adopt_handle(label, handle))
        })
        .await
        .into_result(self.registry_timeout)
    }

    /// Read the active solution through `lease`, consuming it.
    pub async fn read_solution(&self, lease: HandleLease) -> Result<String, CallError> {
        let name =
            executor::read_property(lease, &self.solution_property, self.metadata_timeout).await?;
        Ok(if name.is_empty() {
            NO_SOLUTION.to_string()
        } else {
            name
        })
    }

    /// Process start time, or now when the process table does not answer.
    pub async fn start_time(&self, pid: u32) -> DateTime<Utc> {
        let processes = self.processes.clone();
        run_blocking(self.metadata_timeout, move || Ok(processes.start_time(pid)))
            .await
            .into_result(self.metadata_timeout)
            .ok()
            .flatten()
            .unwrap_or_else(Utc::now)
    }

    /// The instance for a registry candidate, not yet connected.
    pub fn instance_for(
        &self,
        candidate: &Candidate,
        solution: String,
        start_time: DateTime<Utc>,
    ) -> ExternalInstance {
        ExternalInstance::new(candidate.process_id, candidate.version.clone())
            .with_active_solution(solution)
            .with_start_time(start_time)
            .with_status(ConnectionState::Unknown)
    }

    async fn describe(&self, candidate: &Candidate) -> Result<ExternalInstance, CallError> {
        let pid = candidate.process_id;
        let lease = self.bind(candidate).await?;
        let solution = match self.read_solution(lease).await {
            Ok(name) => name,
            Err(err @ CallError::Timeout(_)) => {
                warn!("Process {} did not report its solution: {}", pid, err);
                NO_SOLUTION.to_string()
            }
            Err(err) => {
                debug!("No active solution for process {}: {}", pid, err);
                NO_SOLUTION.to_string()
            }
        };
        let start_time = self.start_time(pid).await;
        Ok(self.instance_for(candidate, solution, start_time))
    }
}

#[cfg(test)]
#[path = "scanner_tests.rs"]
mod tests;
