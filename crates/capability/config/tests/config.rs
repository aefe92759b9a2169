use igw_config::{AppConfig, ConfigError};

// 环境变量是进程级共享状态，所有断言放在同一个测试里顺序执行。
#[test]
fn load_config_from_env() {
    // Rust 2024 中 set_var 需要显式标注 unsafe（测试进程内可控）。
    unsafe {
        std::env::remove_var("IGW_DATABASE_URL");
        std::env::set_var("IGW_WORKER_THREADS", "6");
        std::env::set_var("IGW_DEFAULT_POLL_INTERVAL_MS", "250");
        std::env::set_var("IGW_REPLAY_CONNECTIONS", "false");
    }

    let config = AppConfig::from_env().expect("config");
    assert!(config.database_url.is_none());
    assert_eq!(config.worker_threads, 6);
    assert_eq!(config.writer_concurrency, 6);
    assert_eq!(config.default_poll_interval_ms, 250);
    assert_eq!(config.stop_grace_seconds, 5);
    assert_eq!(config.shutdown_grace_seconds, 60);
    assert!(!config.replay_connections);
    assert!(config.ensure_default_storage);

    unsafe {
        std::env::set_var("IGW_WORKER_THREADS", "zero");
    }
    let err = AppConfig::from_env().expect_err("invalid");
    assert!(matches!(err, ConfigError::Invalid(key, _) if key == "IGW_WORKER_THREADS"));

    unsafe {
        std::env::set_var("IGW_WORKER_THREADS", "0");
    }
    assert!(AppConfig::from_env().is_err());

    unsafe {
        std::env::remove_var("IGW_WORKER_THREADS");
        std::env::remove_var("IGW_DEFAULT_POLL_INTERVAL_MS");
        std::env::remove_var("IGW_REPLAY_CONNECTIONS");
    }
}
