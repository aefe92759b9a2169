//! 运行时装配
//!
//! 根据配置选择注册表实现（PostgreSQL 或内存），创建默认存储，
//! 再组装扇出写入器、监督器与数据管理服务。

use domain::{ConfigMap, StorageDef, StorageKind};
use igw_config::AppConfig;
use igw_control::{DataService, Supervisor, SupervisorConfig};
use igw_ingest::CollectorFactory;
use igw_pipeline::{FanOutWriter, StandardWriterFactory};
use igw_storage::{
    ConnectionStore, DataRecordStore, InMemoryConnectionStore, InMemoryDataRecordStore,
    InMemoryStorageDefStore, PgConnectionStore, PgDataRecordStore, PgStorageDefStore,
    StorageDefStore, StorageError, connect_pool_with, ensure_schema,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// 启动时创建的默认存储名称。
pub const DEFAULT_STORAGE_NAME: &str = "local-default";

/// 注册表与本地记录存储。
#[derive(Clone)]
pub struct Stores {
    pub connections: Arc<dyn ConnectionStore>,
    pub storages: Arc<dyn StorageDefStore>,
    pub records: Arc<dyn DataRecordStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            connections: Arc::new(InMemoryConnectionStore::new()),
            storages: Arc::new(InMemoryStorageDefStore::new()),
            records: Arc::new(InMemoryDataRecordStore::new()),
        }
    }

    /// 配置了数据库时连接 PostgreSQL 并建表，否则使用内存存储。
    pub async fn from_config(config: &AppConfig) -> Result<Self, StorageError> {
        let Some(database_url) = config.database_url.as_deref() else {
            info!(target: "igw.storage", "in_memory_stores_selected");
            return Ok(Self::in_memory());
        };
        let pool = connect_pool_with(database_url, config.db_max_connections).await?;
        ensure_schema(&pool).await?;
        info!(
            target: "igw.storage",
            max_connections = config.db_max_connections,
            "postgres_stores_selected"
        );
        Ok(Self {
            connections: Arc::new(PgConnectionStore::new(pool.clone())),
            storages: Arc::new(PgStorageDefStore::new(pool.clone())),
            records: Arc::new(PgDataRecordStore::new(pool)),
        })
    }

    /// 没有默认存储时创建本地 data_records 目的地。
    pub async fn ensure_default_storage(&self) -> Result<StorageDef, StorageError> {
        let def = self
            .storages
            .create_default_if_none(StorageDef::new(
                DEFAULT_STORAGE_NAME,
                StorageKind::LocalRelational,
                ConfigMap::new(),
            ))
            .await?;
        info!(
            target: "igw.storage",
            storage_id = def.id,
            name = %def.name,
            kind = %def.kind,
            "default_storage_ready"
        );
        Ok(def)
    }
}

pub fn supervisor_config(config: &AppConfig) -> SupervisorConfig {
    SupervisorConfig {
        default_poll_interval: Duration::from_millis(config.default_poll_interval_ms),
        stop_grace: Duration::from_secs(config.stop_grace_seconds),
        shutdown_grace: Duration::from_secs(config.shutdown_grace_seconds),
        status_channel_capacity: config.status_channel_capacity,
    }
}

/// 组装完成的运行时组件。
pub struct Gateway {
    pub stores: Stores,
    pub supervisor: Arc<Supervisor>,
    pub data: DataService,
    pub root: CancellationToken,
}

impl Gateway {
    /// 需在 tokio 运行时内调用（监督器会启动状态泵任务）。
    pub fn assemble(config: &AppConfig, stores: Stores, factory: CollectorFactory) -> Self {
        let root = CancellationToken::new();
        let fan_out = Arc::new(
            FanOutWriter::new(
                stores.storages.clone(),
                stores.records.clone(),
                Arc::new(StandardWriterFactory::new(stores.records.clone())),
            )
            .with_concurrency(config.writer_concurrency)
            .with_cancellation(root.child_token()),
        );
        let supervisor = Arc::new(Supervisor::new(
            stores.connections.clone(),
            fan_out.clone(),
            factory,
            supervisor_config(config),
            root.clone(),
        ));
        let data = DataService::new(stores.records.clone(), stores.storages.clone(), fan_out);
        Self {
            stores,
            supervisor,
            data,
            root,
        }
    }
}
