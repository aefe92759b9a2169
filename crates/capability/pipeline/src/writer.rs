//! 目的地写入器抽象与标准工厂

use crate::error::WriteError;
use crate::local_file::LocalFileWriter;
use crate::object::ObjectStoreWriter;
use crate::relational::{MssqlWriter, PostgresWriter};
use async_trait::async_trait;
use domain::{DataRecord, RelationalEngine, StorageDef, StorageKind};
use igw_storage::DataRecordStore;
use std::sync::Arc;

/// 单个目的地的写入器。
///
/// `records` 已带好 id 与 `destination_id`；一次调用要么整体成功，
/// 要么返回分类后的错误。
#[async_trait]
pub trait DestinationWriter: Send + Sync {
    fn kind(&self) -> StorageKind;

    async fn write(&self, records: &[DataRecord]) -> Result<(), WriteError>;

    /// 连通性检查，不写入任何记录。
    async fn test(&self) -> Result<(), WriteError> {
        Ok(())
    }

    /// 释放客户端资源。
    async fn close(&self) {}
}

/// 按存储定义打开写入器。
#[async_trait]
pub trait WriterFactory: Send + Sync {
    async fn open(&self, def: &StorageDef) -> Result<Arc<dyn DestinationWriter>, WriteError>;
}

/// 本地 data_records 写入器
pub struct LocalRelationalWriter {
    store: Arc<dyn DataRecordStore>,
}

impl LocalRelationalWriter {
    pub fn new(store: Arc<dyn DataRecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl DestinationWriter for LocalRelationalWriter {
    fn kind(&self) -> StorageKind {
        StorageKind::LocalRelational
    }

    async fn write(&self, records: &[DataRecord]) -> Result<(), WriteError> {
        self.store.insert_records(records).await?;
        Ok(())
    }

    async fn test(&self) -> Result<(), WriteError> {
        self.store.count_all().await?;
        Ok(())
    }
}

/// 内置四类写入器的工厂。
pub struct StandardWriterFactory {
    records: Arc<dyn DataRecordStore>,
}

impl StandardWriterFactory {
    pub fn new(records: Arc<dyn DataRecordStore>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl WriterFactory for StandardWriterFactory {
    async fn open(&self, def: &StorageDef) -> Result<Arc<dyn DestinationWriter>, WriteError> {
        let writer: Arc<dyn DestinationWriter> = match def.kind {
            StorageKind::LocalRelational => {
                Arc::new(LocalRelationalWriter::new(self.records.clone()))
            }
            StorageKind::ExternalRelational(RelationalEngine::Postgres) => {
                Arc::new(PostgresWriter::from_config(&def.config)?)
            }
            StorageKind::ExternalRelational(RelationalEngine::Mssql) => {
                Arc::new(MssqlWriter::from_config(&def.config)?)
            }
            StorageKind::ObjectStore(provider) => {
                Arc::new(ObjectStoreWriter::from_config(provider, &def.config)?)
            }
            StorageKind::LocalFile => Arc::new(LocalFileWriter::from_config(&def.config)?),
        };
        Ok(writer)
    }
}
