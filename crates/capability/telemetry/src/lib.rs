//! 追踪初始化与采集指标。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 采集指标快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub readings_collected: u64,
    pub bad_readings: u64,
    pub records_transformed: u64,
    pub destination_writes_ok: u64,
    pub destination_writes_failed: u64,
    pub destination_writes_fatal: u64,
    pub retry_attempts: u64,
    pub collector_errors: u64,
    pub write_latency_ms_total: u64,
    pub write_latency_ms_count: u64,
}

impl MetricsSnapshot {
    /// 平均写入延迟（毫秒），无样本时为 0。
    pub fn mean_write_latency_ms(&self) -> u64 {
        self.write_latency_ms_total
            .checked_div(self.write_latency_ms_count)
            .unwrap_or(0)
    }
}

/// 进程级采集指标。
pub struct TelemetryMetrics {
    readings_collected: AtomicU64,
    bad_readings: AtomicU64,
    records_transformed: AtomicU64,
    destination_writes_ok: AtomicU64,
    destination_writes_failed: AtomicU64,
    destination_writes_fatal: AtomicU64,
    retry_attempts: AtomicU64,
    collector_errors: AtomicU64,
    write_latency_ms_total: AtomicU64,
    write_latency_ms_count: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            readings_collected: AtomicU64::new(0),
            bad_readings: AtomicU64::new(0),
            records_transformed: AtomicU64::new(0),
            destination_writes_ok: AtomicU64::new(0),
            destination_writes_failed: AtomicU64::new(0),
            destination_writes_fatal: AtomicU64::new(0),
            retry_attempts: AtomicU64::new(0),
            collector_errors: AtomicU64::new(0),
            write_latency_ms_total: AtomicU64::new(0),
            write_latency_ms_count: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            readings_collected: self.readings_collected.load(Ordering::Relaxed),
            bad_readings: self.bad_readings.load(Ordering::Relaxed),
            records_transformed: self.records_transformed.load(Ordering::Relaxed),
            destination_writes_ok: self.destination_writes_ok.load(Ordering::Relaxed),
            destination_writes_failed: self.destination_writes_failed.load(Ordering::Relaxed),
            destination_writes_fatal: self.destination_writes_fatal.load(Ordering::Relaxed),
            retry_attempts: self.retry_attempts.load(Ordering::Relaxed),
            collector_errors: self.collector_errors.load(Ordering::Relaxed),
            write_latency_ms_total: self.write_latency_ms_total.load(Ordering::Relaxed),
            write_latency_ms_count: self.write_latency_ms_count.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info，可用 RUST_LOG 覆盖）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 记录采集到的读数条数（含 BAD）。
pub fn record_readings_collected(count: u64) {
    metrics()
        .readings_collected
        .fetch_add(count, Ordering::Relaxed);
}

pub fn record_bad_reading() {
    metrics().bad_readings.fetch_add(1, Ordering::Relaxed);
}

pub fn record_records_transformed(count: u64) {
    metrics()
        .records_transformed
        .fetch_add(count, Ordering::Relaxed);
}

/// 记录单个目的地写入成功及耗时（毫秒）。
pub fn record_destination_write_ok(latency_ms: u64) {
    let metrics = metrics();
    metrics.destination_writes_ok.fetch_add(1, Ordering::Relaxed);
    metrics
        .write_latency_ms_total
        .fetch_add(latency_ms, Ordering::Relaxed);
    metrics
        .write_latency_ms_count
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录单个目的地写入失败；`fatal` 另计一次致命失败。
pub fn record_destination_write_failed(fatal: bool) {
    let metrics = metrics();
    metrics
        .destination_writes_failed
        .fetch_add(1, Ordering::Relaxed);
    if fatal {
        metrics
            .destination_writes_fatal
            .fetch_add(1, Ordering::Relaxed);
    }
}

/// 记录一次重试（不含首次尝试）。
pub fn record_retry_attempt() {
    metrics().retry_attempts.fetch_add(1, Ordering::Relaxed);
}

pub fn record_collector_error() {
    metrics().collector_errors.fetch_add(1, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let before = metrics().snapshot();
        record_readings_collected(3);
        record_bad_reading();
        record_destination_write_ok(12);
        record_destination_write_failed(true);
        let after = metrics().snapshot();
        assert!(after.readings_collected >= before.readings_collected + 3);
        assert!(after.bad_readings > before.bad_readings);
        assert!(after.destination_writes_ok > before.destination_writes_ok);
        assert!(after.destination_writes_fatal > before.destination_writes_fatal);
        assert!(after.write_latency_ms_count > before.write_latency_ms_count);
    }

    #[test]
    fn mean_latency_without_samples_is_zero() {
        assert_eq!(MetricsSnapshot::default().mean_write_latency_ms(), 0);
    }
}
