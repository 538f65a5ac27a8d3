
    use super::*;
    use std::time::Instant;

    use hostlink_protocols::error::codes;
    use hostlink_protocols::{ConnectionState, ErrorCode};

    use crate::testing::{FixedMemoryProbe, MockHandle, MockProcessProbe, MockRegistry};

    struct Fixture {
        registry: Arc<MockRegistry>,
        processes: Arc<MockProcessProbe>,
        memory: Arc<FixedMemoryProbe>,
        link: HostLink,
    }

    fn fixture(config: Config) -> Fixture {
        let registry = MockRegistry::new();
        let processes = MockProcessProbe::new();
        let memory = FixedMemoryProbe::new(Some(1024));
        let link = HostLink::builder(registry.clone())
            .process_probe(processes.clone())
            .memory_probe(memory.clone())
            .config(config)
            .build();
        Fixture {
            registry,
            processes,
            memory,
            link,
        }
    }

    fn register(fx: &Fixture, pid: u32) -> Arc<MockHandle> {
        let handle = MockHandle::new();
        fx.registry
            .register(&format!("!VisualStudio.DTE.17.0:{}", pid), &handle);
        handle
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_discover_and_connect() {
        let fx = fixture(Config::default());
        register(&fx, 4521);

        let instances = fx.link.discover().await.unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].process_id, 4521);
        assert!(fx.link.list_tracked_instances().is_empty());

        let instance = fx.link.connect(4521).await.unwrap();
        assert_eq!(instance.status, ConnectionState::Connected);
        assert_eq!(fx.link.list_tracked_instances().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_execute_runs_command() {
        let fx = fixture(Config::default());
        let handle = register(&fx, 1);
        fx.link.connect(1).await.unwrap();

        let outcome = fx
            .link
            .execute(1, "Build.BuildSolution", "/rebuild", None)
            .await;
        assert!(outcome.success());
        assert_eq!(outcome.operation(), "Build.BuildSolution");
        assert_eq!(
            handle.commands(),
            vec![("Build.BuildSolution".to_string(), "/rebuild".to_string())]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_execute_unconnected_pid() {
        let fx = fixture(Config::default());
        let outcome = fx.link.execute(1, "Build.BuildSolution", "", None).await;
        assert!(!outcome.success());
        assert_eq!(outcome.error_code(), Some(ErrorCode::NotConnected));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_query_property() {
        let fx = fixture(Config::default());
        let handle = register(&fx, 1);
        handle.set_property("Solution.FullName", "app.sln");
        fx.link.connect(1).await.unwrap();

        let outcome = fx.link.query_property(1, "Solution.FullName", None).await;
        assert_eq!(outcome.into_value().as_deref(), Some("app.sln"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_is_healthy_never_evicts() {
        let fx = fixture(Config::default());
        register(&fx, 1);
        fx.link.connect(1).await.unwrap();
        assert!(fx.link.is_healthy(1).await);

        fx.processes.set_alive(1, false);
        assert!(!fx.link.is_healthy(1).await);
        assert_eq!(fx.link.list_tracked_instances().len(), 1);
        assert!(!fx.link.is_healthy(2).await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_disconnect_always_succeeds() {
        let fx = fixture(Config::default());
        let handle = register(&fx, 1);
        fx.link.connect(1).await.unwrap();

        fx.link.disconnect(1);
        fx.link.disconnect(1);
        assert!(fx.link.list_tracked_instances().is_empty());
        assert_eq!(handle.ref_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_same_pid_commands_are_serialized() {
        let fx = fixture(Config::default());
        let handle = register(&fx, 1);
        handle.set_delay(Duration::from_millis(100));
        fx.link.connect(1).await.unwrap();

        let (a, b) = tokio::join!(
            fx.link.execute(1, "Edit.Find", "", None),
            fx.link.execute(1, "Edit.Replace", "", None)
        );
        assert!(a.success() && b.success());
        assert_eq!(handle.max_concurrent_calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_different_pids_run_concurrently() {
        let fx = fixture(Config::default());
        let first = register(&fx, 1);
        let second = register(&fx, 2);
        first.set_delay(Duration::from_millis(400));
        second.set_delay(Duration::from_millis(400));
        fx.link.connect(1).await.unwrap();
        fx.link.connect(2).await.unwrap();

        let started = Instant::now();
        let (a, b) = tokio::join!(
            fx.link.execute(1, "Build.BuildSolution", "", None),
            fx.link.execute(2, "Build.BuildSolution", "", None)
        );
        assert!(a.success() && b.success());
        assert!(started.elapsed() < Duration::from_millis(750));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_hard_memory_limit() {
        let mut config = Config::default();
        config.memory.soft_limit_mb = 0;
        config.memory.hard_limit_mb = 1;
        let fx = fixture(config);
        let handle = register(&fx, 1);
        fx.link.connect(1).await.unwrap();
        fx.memory.set(Some(8 * 1024 * 1024));

        let outcome = fx.link.execute(1, "Build.BuildSolution", "", None).await;
        assert_eq!(outcome.error_code(), Some(ErrorCode::MemoryPressure));
        assert_eq!(handle.command_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_memory_cleanup_prunes_exited() {
        let mut config = Config::default();
        config.memory.soft_limit_mb = 1;
        let fx = fixture(config);
        register(&fx, 1);
        register(&fx, 2);
        fx.link.connect(1).await.unwrap();
        fx.link.connect(2).await.unwrap();

        fx.processes.set_alive(1, false);
        fx.memory.set(Some(8 * 1024 * 1024));
        let outcome = fx.link.execute(2, "Build.BuildSolution", "", None).await;
        assert!(outcome.success());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let pids: Vec<u32> = fx
            .link
            .list_tracked_instances()
            .iter()
            .map(|i| i.process_id)
            .collect();
        assert_eq!(pids, vec![2]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_registry_failure_surfaces() {
        let fx = fixture(Config::default());
        fx.registry
            .fail_access(HostError::new(codes::E_ACCESSDENIED, "denied"));
        let err = fx.link.discover().await.unwrap_err();
        assert!(matches!(err, HostLinkError::Registry { .. }));
        assert_eq!(err.code(), ErrorCode::AccessDenied);
        assert_eq!(err.raw_code(), Some(codes::E_ACCESSDENIED));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_hung_host_is_bounded() {
        let mut config = Config::default();
        config.connection.metadata_timeout_ms = 200;
        let fx = fixture(config);
        let hung = register(&fx, 1);
        hung.set_delay(Duration::from_secs(2));
        register(&fx, 2).set_property("Solution.FullName", "app.sln");

        let started = Instant::now();
        let instances = fx.link.discover().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        let solutions: Vec<&str> = instances
            .iter()
            .map(|i| i.active_solution.as_str())
            .collect();
        assert_eq!(solutions, vec!["none", "app.sln"]);

        let started = Instant::now();
        let err = fx.link.connect(1).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(err.code(), ErrorCode::Timeout);
        assert!(fx.link.connect(2).await.is_ok());
        assert_eq!(fx.link.list_tracked_instances().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_command_locks_follow_the_connection_table() {
        let fx = fixture(Config::default());
        register(&fx, 1);
        register(&fx, 2);
        fx.link.connect(1).await.unwrap();
        fx.link.connect(2).await.unwrap();

        assert!(fx.link.execute(1, "File.SaveAll", "", None).await.success());
        assert!(fx.link.execute(2, "File.SaveAll", "", None).await.success());
        assert_eq!(fx.link.lock_count(), 2);

        for pid in 100..110 {
            let outcome = fx.link.execute(pid, "File.SaveAll", "", None).await;
            assert_eq!(outcome.error_code(), Some(ErrorCode::NotConnected));
        }
        assert_eq!(fx.link.lock_count(), 2);

        fx.link.manager().evict(1, ConnectionState::Failed);
        assert!(fx.link.execute(2, "File.SaveAll", "", None).await.success());
        assert_eq!(fx.link.lock_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_monitor_lifecycle() {
        let mut config = Config::default();
        config.health.interval_secs = 1;
        let fx = fixture(config);
        register(&fx, 1);
        fx.link.connect(1).await.unwrap();

        assert!(fx.link.start_monitor());
        assert!(!fx.link.start_monitor());

        fx.processes.set_alive(1, false);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(fx.link.list_tracked_instances().is_empty());
        assert_eq!(fx.link.health_report().await.unwrap().evicted.len(), 1);

        fx.link.shutdown().await;
        assert!(fx.link.monitor().check_count() >= 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_disabled_monitor_does_not_start() {
        let mut config = Config::default();
        config.health.enabled = false;
        let fx = fixture(config);
        assert!(!fx.link.start_monitor());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_releases_connections() {
        let fx = fixture(Config::default());
        let handle = register(&fx, 1);
        fx.link.connect(1).await.unwrap();
        fx.link.start_monitor();

        fx.link.shutdown().await;
        assert!(fx.link.list_tracked_instances().is_empty());
        assert_eq!(handle.ref_count(), 0);
    }
