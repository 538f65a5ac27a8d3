//! Per-process command serialization.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Async mutexes keyed by process id.
///
/// Calls for different pids never contend.
#[derive(Default)]
pub struct PidLocks {
    locks: DashMap<u32, Arc<Mutex<()>>>,
}

impl PidLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `pid`.
    pub async fn lock(&self, pid: u32) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(pid)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop the lock for `pid`. Holders keep their guard.
    pub fn forget(&self, pid: u32) {
        self.locks.remove(&pid);
    }

    /// Drop idle locks for pids `keep` rejects. Held or awaited locks stay.
    pub fn retain_idle(&self, keep: impl Fn(u32) -> bool) -> usize {
        let before = self.locks.len();
        self.locks
            .retain(|pid, lock| keep(*pid) || Arc::strong_count(lock) > 1);
        before.saturating_sub(self.locks.len())
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_pid_is_exclusive() {
        let locks = PidLocks::new();
        let guard = locks.lock(1).await;

        let second = tokio::time::timeout(Duration::from_millis(50), locks.lock(1)).await;
        assert!(second.is_err());

        drop(guard);
        let third = tokio::time::timeout(Duration::from_millis(50), locks.lock(1)).await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn test_different_pids_do_not_contend() {
        let locks = PidLocks::new();
        let _first = locks.lock(1).await;
        let second = tokio::time::timeout(Duration::from_millis(50), locks.lock(2)).await;
        assert!(second.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_forget() {
        let locks = PidLocks::new();
        drop(locks.lock(1).await);
        locks.forget(1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_retain_idle_keeps_held_locks() {
        let locks = PidLocks::new();
        drop(locks.lock(1).await);
        drop(locks.lock(2).await);
        let held = locks.lock(3).await;

        assert_eq!(locks.retain_idle(|pid| pid == 2), 1);
        assert_eq!(locks.len(), 2);

        drop(held);
        assert_eq!(locks.retain_idle(|pid| pid == 2), 1);
        assert_eq!(locks.len(), 1);
    }
}
