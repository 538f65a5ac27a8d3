//! OS probes backed by `sysinfo`.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sysinfo::{Pid, ProcessesToUpdate, System};

use hostlink_protocols::{MemoryProbe, ProcessProbe};

/// Process table lookups.
pub struct SystemProcessProbe {
    system: Mutex<System>,
}

impl SystemProcessProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    fn with_process<R>(&self, pid: u32, f: impl FnOnce(&sysinfo::Process) -> R) -> Option<R> {
        let pid = Pid::from_u32(pid);
        let mut system = self.system.lock();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system.process(pid).map(f)
    }
}

impl Default for SystemProcessProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessProbe for SystemProcessProbe {
    fn is_alive(&self, pid: u32) -> bool {
        self.with_process(pid, |_| ()).is_some()
    }

    fn start_time(&self, pid: u32) -> Option<DateTime<Utc>> {
        self.with_process(pid, |process| process.start_time())
            .and_then(|secs| DateTime::from_timestamp(i64::try_from(secs).ok()?, 0))
    }
}

/// Resident memory of the current process.
pub struct SystemMemoryProbe {
    pid: Option<Pid>,
    system: Mutex<System>,
}

impl SystemMemoryProbe {
    pub fn new() -> Self {
        Self {
            pid: sysinfo::get_current_pid().ok(),
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SystemMemoryProbe {
    fn resident_bytes(&self) -> Option<u64> {
        let pid = self.pid?;
        let mut system = self.system.lock();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system.process(pid).map(|process| process.memory())
    }
}
