//! In-memory test doubles for the host seams.
//!
//! [`MockHandle`] counts references the way a real host object does, so
//! tests can assert that every acquired reference was released exactly once.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use hostlink_protocols::error::codes;
use hostlink_protocols::{
    HandleRef, HostError, HostHandle, MemoryProbe, ProcessProbe, RegistryEntry,
    RunningObjectRegistry,
};

/// A reference-counted host object.
///
/// Created with zero references; [`MockHandle::bind`] hands out the first
/// one the way the registry does.
pub struct MockHandle {
    refs: AtomicU32,
    add_refs: AtomicU32,
    releases: AtomicU32,
    calls: AtomicU32,
    completed: AtomicU32,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
    alive: AtomicBool,
    call_times: Mutex<Vec<Instant>>,
    properties: Mutex<HashMap<String, String>>,
    property_error: Mutex<Option<HostError>>,
    command_results: Mutex<VecDeque<Result<(), HostError>>>,
    commands: Mutex<Vec<(String, String)>>,
    delay: Mutex<Option<Duration>>,
}

impl MockHandle {
    pub fn new() -> Arc<Self> {
        let mut properties = HashMap::new();
        properties.insert("Version".to_string(), "17.0".to_string());
        Arc::new(Self {
            refs: AtomicU32::new(0),
            add_refs: AtomicU32::new(0),
            releases: AtomicU32::new(0),
            calls: AtomicU32::new(0),
            completed: AtomicU32::new(0),
            in_flight: AtomicU32::new(0),
            max_in_flight: AtomicU32::new(0),
            alive: AtomicBool::new(true),
            call_times: Mutex::new(Vec::new()),
            properties: Mutex::new(properties),
            property_error: Mutex::new(None),
            command_results: Mutex::new(VecDeque::new()),
            commands: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
        })
    }

    /// Hand out the caller-owned reference a registry bind produces.
    pub fn bind(self: &Arc<Self>) -> HandleRef {
        self.refs.fetch_add(1, Ordering::SeqCst);
        self.clone()
    }

    pub fn set_property(&self, path: &str, value: &str) {
        self.properties
            .lock()
            .insert(path.to_string(), value.to_string());
    }

    /// Make every property read fail with `error`.
    pub fn fail_properties(&self, error: HostError) {
        *self.property_error.lock() = Some(error);
    }

    /// Queue results for upcoming commands. Once drained, commands succeed.
    pub fn script_commands(&self, results: impl IntoIterator<Item = Result<(), HostError>>) {
        self.command_results.lock().extend(results);
    }

    /// Block every call for `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Simulate the host process exiting.
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn ref_count(&self) -> u32 {
        self.refs.load(Ordering::SeqCst)
    }

    pub fn add_ref_count(&self) -> u32 {
        self.add_refs.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> u32 {
        self.releases.load(Ordering::SeqCst)
    }

    /// Commands that reached the host.
    pub fn command_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Commands that ran to completion on the host side.
    pub fn completed_commands(&self) -> u32 {
        self.completed.load(Ordering::SeqCst)
    }

    /// Highest number of calls observed running at once.
    pub fn max_concurrent_calls(&self) -> u32 {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// When each command reached the host.
    pub fn command_times(&self) -> Vec<Instant> {
        self.call_times.lock().clone()
    }

    pub fn commands(&self) -> Vec<(String, String)> {
        self.commands.lock().clone()
    }

    fn enter(&self, command: bool) -> Result<(), HostError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(HostError::new(
                codes::RPC_S_SERVER_UNAVAILABLE,
                "The RPC server is unavailable",
            ));
        }
        if self.refs.load(Ordering::SeqCst) == 0 {
            return Err(HostError::disconnected("object has no live references"));
        }

        if command {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.call_times.lock().push(Instant::now());
        }
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        Ok(())
    }

    fn leave(&self, command: bool) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if command {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl HostHandle for MockHandle {
    fn add_ref(&self) -> Result<u32, HostError> {
        let previous = self
            .refs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |refs| {
                (refs > 0).then(|| refs + 1)
            })
            .map_err(|_| HostError::disconnected("object has no live references"))?;
        self.add_refs.fetch_add(1, Ordering::SeqCst);
        Ok(previous + 1)
    }

    fn release(&self) -> u32 {
        self.releases.fetch_add(1, Ordering::SeqCst);
        match self
            .refs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |refs| refs.checked_sub(1))
        {
            Ok(previous) => previous - 1,
            Err(_) => 0,
        }
    }

    fn get_property(&self, path: &str) -> Result<String, HostError> {
        self.enter(false)?;
        let result = match self.property_error.lock().clone() {
            Some(err) => Err(err),
            None => self.properties.lock().get(path).cloned().ok_or_else(|| {
                HostError::new(codes::DISP_E_UNKNOWNNAME, format!("Unknown name: {}", path))
            }),
        };
        self.leave(false);
        result
    }

    fn execute_command(&self, command: &str, args: &str) -> Result<(), HostError> {
        self.enter(true)?;
        self.commands
            .lock()
            .push((command.to_string(), args.to_string()));
        let result = self.command_results.lock().pop_front().unwrap_or(Ok(()));
        self.leave(true);
        result
    }
}

enum MockEntry {
    Named {
        name: String,
        handle: Option<Arc<MockHandle>>,
    },
    Unreadable(HostError),
}

/// An in-memory object-activation registry.
#[derive(Default)]
pub struct MockRegistry {
    entries: Mutex<Vec<MockEntry>>,
    access_error: Mutex<Option<HostError>>,
    bind_error: Mutex<Option<HostError>>,
    binds: AtomicU32,
}

impl MockRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `handle` under `name`.
    pub fn register(&self, name: &str, handle: &Arc<MockHandle>) {
        self.entries.lock().push(MockEntry::Named {
            name: name.to_string(),
            handle: Some(handle.clone()),
        });
    }

    /// Register a name whose object cannot be bound.
    pub fn register_name(&self, name: &str) {
        self.entries.lock().push(MockEntry::Named {
            name: name.to_string(),
            handle: None,
        });
    }

    /// Register an entry whose display name cannot be read.
    pub fn register_unreadable(&self, error: HostError) {
        self.entries.lock().push(MockEntry::Unreadable(error));
    }

    pub fn unregister(&self, name: &str) {
        self.entries.lock().retain(|entry| match entry {
            MockEntry::Named { name: n, .. } => n != name,
            MockEntry::Unreadable(_) => true,
        });
    }

    /// Make acquiring the registry itself fail.
    pub fn fail_access(&self, error: HostError) {
        *self.access_error.lock() = Some(error);
    }

    /// Make every bind fail with `error`.
    pub fn fail_binds(&self, error: HostError) {
        *self.bind_error.lock() = Some(error);
    }

    pub fn bind_count(&self) -> u32 {
        self.binds.load(Ordering::SeqCst)
    }
}

impl RunningObjectRegistry for MockRegistry {
    fn entries(&self) -> Result<Vec<Result<RegistryEntry, HostError>>, HostError> {
        if let Some(err) = self.access_error.lock().clone() {
            return Err(err);
        }
        Ok(self
            .entries
            .lock()
            .iter()
            .map(|entry| match entry {
                MockEntry::Named { name, .. } => Ok(RegistryEntry::new(name.clone())),
                MockEntry::Unreadable(err) => Err(err.clone()),
            })
            .collect())
    }

    fn bind(&self, entry: &RegistryEntry) -> Result<HandleRef, HostError> {
        self.binds.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.bind_error.lock().clone() {
            return Err(err);
        }
        let entries = self.entries.lock();
        let found = entries.iter().rev().find_map(|e| match e {
            MockEntry::Named { name, handle } if *name == entry.display_name => Some(handle),
            _ => None,
        });
        match found {
            Some(Some(handle)) => Ok(handle.bind()),
            Some(None) => Err(HostError::new(
                codes::E_NOINTERFACE,
                "object does not support automation",
            )),
            None => Err(HostError::new(
                codes::MK_E_UNAVAILABLE,
                format!("{} is not registered", entry.display_name),
            )),
        }
    }
}

/// Process table with explicit liveness.
///
/// Processes are alive unless marked otherwise.
#[derive(Default)]
pub struct MockProcessProbe {
    dead: Mutex<Vec<u32>>,
    delay: Mutex<Option<Duration>>,
}

impl MockProcessProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_alive(&self, pid: u32, alive: bool) {
        let mut dead = self.dead.lock();
        dead.retain(|p| *p != pid);
        if !alive {
            dead.push(pid);
        }
    }

    /// Make every liveness lookup take `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }
}

impl ProcessProbe for MockProcessProbe {
    fn is_alive(&self, pid: u32) -> bool {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        !self.dead.lock().contains(&pid)
    }

    fn start_time(&self, pid: u32) -> Option<DateTime<Utc>> {
        self.is_alive(pid)
            .then(|| DateTime::from_timestamp(1_700_000_000, 0))
            .flatten()
    }
}

/// Memory probe reporting a settable value.
#[derive(Default)]
pub struct FixedMemoryProbe {
    resident: Mutex<Option<u64>>,
}

impl FixedMemoryProbe {
    pub fn new(resident: Option<u64>) -> Arc<Self> {
        Arc::new(Self {
            resident: Mutex::new(resident),
        })
    }

    pub fn set(&self, resident: Option<u64>) {
        *self.resident.lock() = resident;
    }
}

impl MemoryProbe for FixedMemoryProbe {
    fn resident_bytes(&self) -> Option<u64> {
        *self.resident.lock()
    }
}
