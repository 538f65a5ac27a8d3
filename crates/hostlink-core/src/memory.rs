//! Memory-pressure guard for the controller process.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::{debug, warn};

use hostlink_config::MemoryConfig;
use hostlink_protocols::MemoryProbe;

/// Best-effort cleanup run when resident memory crosses the soft limit.
pub type CleanupHook = Arc<dyn Fn() + Send + Sync>;

/// Result of a pressure check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryStatus {
    /// Below the soft limit, or the probe could not read memory.
    Normal,
    /// Above the soft limit; a cleanup pass has been scheduled.
    Mitigated { resident: u64 },
    /// Above the hard limit; the call must not be attempted.
    Refused { resident: u64, limit: u64 },
}

pub struct MemoryGuard {
    probe: Arc<dyn MemoryProbe>,
    soft_limit: Option<u64>,
    hard_limit: Option<u64>,
    hooks: RwLock<Vec<CleanupHook>>,
    cleanups: AtomicU64,
    cleaning: Arc<AtomicBool>,
}

impl MemoryGuard {
    pub fn new(probe: Arc<dyn MemoryProbe>, soft_limit: Option<u64>, hard_limit: Option<u64>) -> Self {
        Self {
            probe,
            soft_limit,
            hard_limit,
            hooks: RwLock::new(Vec::new()),
            cleanups: AtomicU64::new(0),
            cleaning: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn from_config(probe: Arc<dyn MemoryProbe>, config: &MemoryConfig) -> Self {
        Self::new(probe, config.soft_limit_bytes(), config.hard_limit_bytes())
    }

    /// A guard that never reports pressure.
    pub fn disabled(probe: Arc<dyn MemoryProbe>) -> Self {
        Self::new(probe, None, None)
    }

    pub fn register_hook(&self, hook: CleanupHook) {
        self.hooks.write().push(hook);
    }

    /// Number of cleanup passes started so far.
    pub fn cleanup_count(&self) -> u64 {
        self.cleanups.load(Ordering::Relaxed)
    }

    /// Check pressure, scheduling cleanup above the soft limit.
    ///
    /// Cleanup never blocks the caller: inside a runtime it runs on the
    /// blocking pool. At most one pass runs at a time.
    pub fn check(&self) -> MemoryStatus {
        if self.soft_limit.is_none() && self.hard_limit.is_none() {
            return MemoryStatus::Normal;
        }
        let Some(resident) = self.probe.resident_bytes() else {
            debug!("Resident memory unavailable, skipping pressure check");
            return MemoryStatus::Normal;
        };

        let over_soft = self.soft_limit.is_some_and(|limit| resident > limit);
        let over_hard = self.hard_limit.filter(|limit| resident > *limit);

        if over_soft || over_hard.is_some() {
            warn!(
                "Memory pressure: resident {} MiB, running cleanup",
                resident / (1024 * 1024)
            );
            self.schedule_cleanup();
        }

        match over_hard {
            Some(limit) => MemoryStatus::Refused { resident, limit },
            None if over_soft => MemoryStatus::Mitigated { resident },
            None => MemoryStatus::Normal,
        }
    }

    fn schedule_cleanup(&self) {
        let hooks: Vec<CleanupHook> = self.hooks.read().clone();
        if hooks.is_empty() {
            return;
        }
        if self.cleaning.swap(true, Ordering::AcqRel) {
            debug!("Cleanup pass already running, not scheduling another");
            return;
        }
        self.cleanups.fetch_add(1, Ordering::Relaxed);

        let running = CleanupRunning(self.cleaning.clone());
        let run = move || {
            let _running = running;
            for hook in &hooks {
                hook();
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(run);
            }
            Err(_) => run(),
        }
    }
}

/// Clears the in-flight flag when a cleanup pass ends, even by panic.
struct CleanupRunning(Arc<AtomicBool>);

impl Drop for CleanupRunning {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    use crate::testing::FixedMemoryProbe;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_below_soft_limit() {
        let guard = MemoryGuard::new(FixedMemoryProbe::new(Some(10 * MIB)), Some(100 * MIB), None);
        assert_eq!(guard.check(), MemoryStatus::Normal);
        assert_eq!(guard.cleanup_count(), 0);
    }

    #[test]
    fn test_soft_limit_runs_hooks() {
        let guard = MemoryGuard::new(FixedMemoryProbe::new(Some(200 * MIB)), Some(100 * MIB), None);
        let runs = Arc::new(AtomicU32::new(0));
        let counter = runs.clone();
        guard.register_hook(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(guard.check(), MemoryStatus::Mitigated { resident: 200 * MIB });
        assert_eq!(guard.cleanup_count(), 1);
        // No runtime here, so the hook ran inline.
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_hard_limit_refuses() {
        let guard = MemoryGuard::new(
            FixedMemoryProbe::new(Some(600 * MIB)),
            Some(100 * MIB),
            Some(500 * MIB),
        );
        assert_eq!(
            guard.check(),
            MemoryStatus::Refused {
                resident: 600 * MIB,
                limit: 500 * MIB
            }
        );
    }

    #[test]
    fn test_unreadable_memory_is_normal() {
        let guard = MemoryGuard::new(FixedMemoryProbe::new(None), Some(1), Some(1));
        assert_eq!(guard.check(), MemoryStatus::Normal);
    }

    #[test]
    fn test_disabled_guard() {
        let guard = MemoryGuard::disabled(FixedMemoryProbe::new(Some(u64::MAX)));
        assert_eq!(guard.check(), MemoryStatus::Normal);
    }

    #[tokio::test]
    async fn test_cleanup_off_the_caller() {
        let probe = FixedMemoryProbe::new(Some(200 * MIB));
        let guard = MemoryGuard::new(probe, Some(100 * MIB), None);
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let tx = parking_lot::Mutex::new(Some(tx));
        guard.register_hook(Arc::new(move || {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(());
            }
        }));

        assert!(matches!(guard.check(), MemoryStatus::Mitigated { .. }));
        rx.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cleanup_passes_do_not_pile_up() {
        let guard = MemoryGuard::new(FixedMemoryProbe::new(Some(200 * MIB)), Some(100 * MIB), None);
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = parking_lot::Mutex::new(release_rx);
        let done_tx = parking_lot::Mutex::new(done_tx);
        guard.register_hook(Arc::new(move || {
            let _ = release_rx.lock().recv();
            let _ = done_tx.lock().send(());
        }));

        for _ in 0..5 {
            assert!(matches!(guard.check(), MemoryStatus::Mitigated { .. }));
        }
        assert_eq!(guard.cleanup_count(), 1);

        // Unblock the running pass and every later one.
        drop(release_tx);
        tokio::task::spawn_blocking(move || done_rx.recv())
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        guard.check();
        assert_eq!(guard.cleanup_count(), 2);
    }
}
