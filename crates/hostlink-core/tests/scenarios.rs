//! End-to-end scenarios against in-memory hosts.
//!
//! These tests drive the `HostLink` facade the way a command-dispatch layer
//! would, with the registry, host objects and process table replaced by the
//! doubles in `hostlink_core::testing`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tracing::instrument::WithSubscriber;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use hostlink_config::Config;
use hostlink_core::testing::{FixedMemoryProbe, MockHandle, MockProcessProbe, MockRegistry};
use hostlink_core::{HostLink, RegistryScanner};
use hostlink_protocols::error::codes;
use hostlink_protocols::{
    ErrorClassification, ErrorCode, HostError, HostLinkError, RetryPolicy,
};

// ============================================================================
// Test Helpers
// ============================================================================

/// Counts `WARN` events.
struct WarnCounter(Arc<AtomicUsize>);

impl<S: Subscriber> Layer<S> for WarnCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::WARN {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct Harness {
    registry: Arc<MockRegistry>,
    processes: Arc<MockProcessProbe>,
    link: HostLink,
}

fn harness(config: Config) -> Harness {
    let registry = MockRegistry::new();
    let processes = MockProcessProbe::new();
    let link = HostLink::builder(registry.clone())
        .process_probe(processes.clone())
        .memory_probe(FixedMemoryProbe::new(None))
        .config(config)
        .build();
    Harness {
        registry,
        processes,
        link,
    }
}

fn name(pid: u32) -> String {
    format!("!VisualStudio.DTE.17.0:{}", pid)
}

fn register(h: &Harness, pid: u32) -> Arc<MockHandle> {
    let handle = MockHandle::new();
    h.registry.register(&name(pid), &handle);
    handle
}

fn transient() -> HostError {
    HostError::new(codes::RPC_E_SERVERCALL_RETRYLATER, "host busy")
}

// ============================================================================
// Discovery
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_empty_registry_discovers_nothing() {
    let h = harness(Config::default());
    h.registry.register("!Excel.Application:12", &MockHandle::new());

    assert!(h.link.discover().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_discover_parses_process_id() {
    let mut config = Config::default();
    config.registry.signature_prefix = "sig".to_string();
    let h = harness(config);
    h.registry.register("sig.17.0:4521", &MockHandle::new());

    let instances = h.link.discover().await.unwrap();
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].process_id, 4521);
    assert_eq!(instances[0].version, "17.0");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_one_malformed_entry_logs_one_warning() {
    for good in 0..4u32 {
        let registry = MockRegistry::new();
        for pid in 1..=good {
            registry.register(&name(pid), &MockHandle::new());
        }
        registry.register("!VisualStudio.DTE.17.0:not-a-pid", &MockHandle::new());

        let scanner = RegistryScanner::new(
            registry.clone(),
            MockProcessProbe::new(),
            "!VisualStudio.DTE",
            "Solution.FullName",
        );

        let warnings = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(WarnCounter(warnings.clone()));
        let instances = scanner
            .discover()
            .with_subscriber(subscriber)
            .await
            .unwrap();

        assert_eq!(instances.len(), good as usize);
        assert_eq!(warnings.load(Ordering::SeqCst), 1);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_hung_host_does_not_hold_up_discovery_or_connect() {
    let mut config = Config::default();
    config.connection.metadata_timeout_ms = 250;
    let h = harness(config);
    let hung = register(&h, 1);
    hung.set_delay(Duration::from_secs(3));
    let healthy = register(&h, 2);
    healthy.set_property("Solution.FullName", "C:\\src\\app.sln");

    let started = Instant::now();
    let instances = h.link.discover().await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(1500));
    assert_eq!(instances.len(), 2);
    assert!(!instances[0].has_solution());
    assert_eq!(instances[1].active_solution, "C:\\src\\app.sln");

    let started = Instant::now();
    let err = h.link.connect(1).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_millis(1500));
    assert_eq!(err.code(), ErrorCode::Timeout);
    assert!(err.code().retryable());

    h.link.connect(2).await.unwrap();
    let pids: Vec<u32> = h
        .link
        .list_tracked_instances()
        .iter()
        .map(|i| i.process_id)
        .collect();
    assert_eq!(pids, vec![2]);
}

// ============================================================================
// Connection lifecycle
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_connect_absent_pid_is_not_found() {
    let h = harness(Config::default());
    register(&h, 1);

    let err = h.link.connect(4521).await.unwrap_err();
    assert!(matches!(err, HostLinkError::NotFound(4521)));
    assert_eq!(err.code(), ErrorCode::NotFound);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_connect_after_kill_is_not_found() {
    let h = harness(Config::default());
    let handle = register(&h, 4521);
    h.link.connect(4521).await.unwrap();

    handle.kill();
    h.registry.unregister(&name(4521));
    h.processes.set_alive(4521, false);

    let err = h.link.connect(4521).await.unwrap_err();
    assert!(matches!(err, HostLinkError::NotFound(4521)));
    assert!(h.link.list_tracked_instances().is_empty());
    assert_eq!(handle.ref_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_exited_process_is_evicted_within_one_interval() {
    let mut config = Config::default();
    config.health.interval_secs = 1;
    let h = harness(config);
    register(&h, 7);
    h.link.connect(7).await.unwrap();
    h.link.start_monitor();

    h.processes.set_alive(7, false);
    let exited = Instant::now();
    while !h.link.list_tracked_instances().is_empty() {
        assert!(exited.elapsed() < Duration::from_millis(1200));
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let outcome = h.link.execute(7, "Build.BuildSolution", "", None).await;
    assert_eq!(outcome.error_code(), Some(ErrorCode::NotConnected));
    assert!(outcome.retryable());

    h.link.shutdown().await;
}

// ============================================================================
// Execution
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_timeout_returns_quickly_without_killing_the_call() {
    let h = harness(Config::default());
    let handle = register(&h, 1);
    h.link.connect(1).await.unwrap();
    handle.set_delay(Duration::from_millis(2000));

    let started = Instant::now();
    let outcome = h
        .link
        .execute(1, "Build.BuildSolution", "", Some(Duration::from_millis(300)))
        .await;

    assert!(started.elapsed() < Duration::from_millis(1000));
    assert_eq!(outcome.classification(), ErrorClassification::Timeout);
    assert_eq!(outcome.error_code(), Some(ErrorCode::Timeout));

    // The abandoned call keeps running on the host and finishes on its own.
    tokio::time::sleep(Duration::from_millis(2000)).await;
    assert_eq!(handle.completed_commands(), 1);
    assert_eq!(handle.add_ref_count(), handle.release_count());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_transient_twice_then_success() {
    let mut config = Config::default();
    config.executor.retry = RetryPolicy::new(2, 100, 2.0);
    let h = harness(config);
    let handle = register(&h, 1);
    h.link.connect(1).await.unwrap();
    handle.script_commands([Err(transient()), Err(transient())]);

    let outcome = h.link.execute(1, "Build.BuildSolution", "", None).await;

    assert!(outcome.success());
    assert_eq!(outcome.retry_attempts(), 2);
    assert_eq!(handle.command_count(), 3);

    let times = handle.command_times();
    assert!(times[1] - times[0] >= Duration::from_millis(100));
    assert!(times[2] - times[1] >= Duration::from_millis(200));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_every_execute_releases_its_lease_once() {
    let h = harness(Config::default());
    let handle = register(&h, 1);
    h.link.connect(1).await.unwrap();
    handle.script_commands([
        Ok(()),
        Err(HostError::failed("boom")),
        Err(HostError::new(codes::E_ACCESSDENIED, "denied")),
    ]);

    for _ in 0..3 {
        let before_add = handle.add_ref_count();
        let before_release = handle.release_count();
        h.link.execute(1, "Edit.Paste", "", None).await;
        assert_eq!(handle.add_ref_count() - before_add, 1);
        assert_eq!(handle.release_count() - before_release, 1);
    }
    assert_eq!(handle.ref_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_executes_keep_the_table_consistent() {
    let mut config = Config::default();
    config.executor.serialize_commands = false;
    let h = Arc::new(harness(config));
    let handles: Vec<_> = (1..=4).map(|pid| register(&h, pid)).collect();
    for pid in 1..=4 {
        h.link.connect(pid).await.unwrap();
    }

    let mut tasks = Vec::new();
    for i in 0..32u32 {
        let h = h.clone();
        tasks.push(tokio::spawn(async move {
            let pid = i % 4 + 1;
            if i % 8 == 0 {
                let _ = h.link.connect(pid).await;
            }
            h.link.execute(pid, "Edit.Find", "", None).await
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let pids: Vec<u32> = h
        .link
        .list_tracked_instances()
        .iter()
        .map(|i| i.process_id)
        .collect();
    assert_eq!(pids, vec![1, 2, 3, 4]);
    for handle in &handles {
        assert_eq!(handle.ref_count(), 1);
    }
}
