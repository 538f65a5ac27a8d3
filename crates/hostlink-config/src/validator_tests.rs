
    use super::*;

    #[test]
    fn test_validate_default_config() {
        let config = Config::default();
        let result = ConfigValidator::validate(&config);
        assert!(result.is_valid());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_validate_empty_prefix() {
        let mut config = Config::default();
        config.registry.signature_prefix = "  ".to_string();

        let result = ConfigValidator::validate(&config);
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.path == "registry.signature_prefix"));
    }

    #[test]
    fn test_validate_zero_metadata_timeout() {
        let mut config = Config::default();
        config.connection.metadata_timeout_ms = 0;

        let result = ConfigValidator::validate(&config);
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.path == "connection.metadata_timeout_ms"));
    }

    #[test]
    fn test_validate_zero_interval() {
        let mut config = Config::default();
        config.health.interval_secs = 0;

        let result = ConfigValidator::validate(&config);
        assert!(result.errors.iter().any(|e| e.path == "health.interval_secs"));
    }

    #[test]
    fn test_validate_short_interval_warning() {
        let mut config = Config::default();
        config.health.interval_secs = 1;

        let result = ConfigValidator::validate(&config);
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.path == "health.interval_secs"));
    }

    #[test]
    fn test_validate_backoff_below_one() {
        let mut config = Config::default();
        config.executor.retry.backoff_multiplier = 0.5;

        let result = ConfigValidator::validate(&config);
        assert!(!result.is_valid());
    }

    #[test]
    fn test_validate_general_failure_warning() {
        let mut config = Config::default();
        config.classification.general_failure_is_transient = true;

        let result = ConfigValidator::validate(&config);
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_validate_hard_limit_below_soft() {
        let mut config = Config::default();
        config.memory.soft_limit_mb = 1024;
        config.memory.hard_limit_mb = 512;

        let result = ConfigValidator::validate(&config);
        assert!(result.errors.iter().any(|e| e.path == "memory.hard_limit_mb"));
    }

    #[test]
    fn test_into_result_reports_first_error() {
        let mut config = Config::default();
        config.executor.default_timeout_ms = 0;

        let err = ConfigValidator::validate(&config).into_result().unwrap_err();
        assert!(err.to_string().contains("executor.default_timeout_ms"));
    }
