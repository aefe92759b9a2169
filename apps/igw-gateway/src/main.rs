//! 采集网关入口：加载配置、装配组件、重放连接，收到 Ctrl-C 后优雅关闭。

mod runtime;

use igw_config::AppConfig;
use igw_ingest::CollectorFactory;
use igw_telemetry::{init_tracing, metrics};
use runtime::{Gateway, Stores};
use tracing::{info, warn};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;
    init_tracing();

    // 工作线程数可配置，因此手动构建运行时
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .thread_name("igw-worker")
        .enable_all()
        .build()?;
    runtime.block_on(run(config))
}

async fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        target: "igw.supervisor",
        worker_threads = config.worker_threads,
        writer_concurrency = config.writer_concurrency,
        persistent = config.database_url.is_some(),
        "gateway_starting"
    );

    let stores = Stores::from_config(&config).await?;
    if config.ensure_default_storage {
        stores.ensure_default_storage().await?;
    }

    let gateway = Gateway::assemble(&config, stores, CollectorFactory::with_defaults());
    let storage = gateway.data.storage_status().await?;
    info!(
        target: "igw.storage",
        configured = storage.configured,
        default_storage = ?storage.default_name,
        total = storage.total,
        active = storage.active,
        "storage_status"
    );
    if config.replay_connections {
        let summary = gateway.supervisor.replay().await?;
        if !summary.failed.is_empty() {
            warn!(target: "igw.supervisor", failed = summary.failed.len(), "replay_incomplete");
        }
    }
    info!(target: "igw.supervisor", "gateway_started");

    tokio::signal::ctrl_c().await?;
    info!(target: "igw.supervisor", "shutdown_signal_received");
    gateway.supervisor.shutdown().await;

    let snapshot = metrics().snapshot();
    info!(
        target: "igw.supervisor",
        readings = snapshot.readings_collected,
        records = snapshot.records_transformed,
        writes_ok = snapshot.destination_writes_ok,
        writes_failed = snapshot.destination_writes_failed,
        mean_write_latency_ms = snapshot.mean_write_latency_ms(),
        "gateway_stopped"
    );
    Ok(())
}
