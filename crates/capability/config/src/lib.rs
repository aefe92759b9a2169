//! 网关运行配置加载。

use std::env;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 网关运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// 未设置时使用内存存储。
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub worker_threads: usize,
    pub writer_concurrency: usize,
    pub default_poll_interval_ms: u64,
    pub stop_grace_seconds: u64,
    pub shutdown_grace_seconds: u64,
    pub status_channel_capacity: usize,
    pub replay_connections: bool,
    pub ensure_default_storage: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            db_max_connections: 8,
            worker_threads: 4,
            writer_concurrency: 4,
            default_poll_interval_ms: 1000,
            stop_grace_seconds: 5,
            shutdown_grace_seconds: 60,
            status_channel_capacity: 256,
            replay_connections: true,
            ensure_default_storage: true,
        }
    }
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = read_optional("IGW_DATABASE_URL");
        let db_max_connections = read_u64_in_range("IGW_DB_MAX_CONNECTIONS", 8, 1, 1024)? as u32;
        let worker_threads = read_u64_in_range("IGW_WORKER_THREADS", 4, 1, 512)? as usize;
        let writer_concurrency =
            read_u64_in_range("IGW_WRITER_CONCURRENCY", worker_threads as u64, 1, 4096)? as usize;
        let default_poll_interval_ms = read_u64_with_default("IGW_DEFAULT_POLL_INTERVAL_MS", 1000)?;
        let stop_grace_seconds = read_u64_with_default("IGW_STOP_GRACE_SECONDS", 5)?;
        let shutdown_grace_seconds = read_u64_with_default("IGW_SHUTDOWN_GRACE_SECONDS", 60)?;
        let status_channel_capacity =
            read_u64_in_range("IGW_STATUS_CHANNEL_CAPACITY", 256, 1, 65_536)? as usize;
        let replay_connections = read_bool_with_default("IGW_REPLAY_CONNECTIONS", true);
        let ensure_default_storage = read_bool_with_default("IGW_ENSURE_DEFAULT_STORAGE", true);

        Ok(Self {
            database_url,
            db_max_connections,
            worker_threads,
            writer_concurrency,
            default_poll_interval_ms,
            stop_grace_seconds,
            shutdown_grace_seconds,
            status_channel_capacity,
            replay_connections,
            ensure_default_storage,
        })
    }
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match read_optional(key) {
        Some(value) => value,
        None => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

/// 读取带默认值的整数并校验闭区间。
fn read_u64_in_range(key: &str, default: u64, min: u64, max: u64) -> Result<u64, ConfigError> {
    let value = read_u64_with_default(key, default)?;
    if value < min || value > max {
        return Err(ConfigError::Invalid(
            key.to_string(),
            format!("{} not in [{}, {}]", value, min, max),
        ));
    }
    Ok(value)
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => None,
    }
}

fn read_bool_with_default(key: &str, default: bool) -> bool {
    match read_optional(key) {
        Some(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on"),
        None => default,
    }
}
