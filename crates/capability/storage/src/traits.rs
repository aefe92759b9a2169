//! 存储接口 Trait 定义
//!
//! - ConnectionStore：数据源连接注册表
//! - StorageDefStore：存储目的地注册表
//! - DataRecordStore：本地 data_records 表
//!
//! 设计原则：
//! - 所有接口返回 StorageError
//! - 使用 async_trait 支持动态分发（`Arc<dyn ...>`）

use crate::error::StorageError;
use crate::models::{ConnectionUpdate, StorageStatusSummary, StorageUpdate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{ConnectionDef, DataRecord, DataStatus, StatusUpdate, StorageDef, StorageStatus};

/// 数据源连接注册表接口
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    async fn list_connections(&self) -> Result<Vec<ConnectionDef>, StorageError>;

    async fn find_connection(&self, id: &str) -> Result<Option<ConnectionDef>, StorageError>;

    /// 创建连接定义；`id` 为空时分配 UUID。
    async fn create_connection(&self, def: ConnectionDef) -> Result<ConnectionDef, StorageError>;

    async fn update_connection(
        &self,
        id: &str,
        update: ConnectionUpdate,
    ) -> Result<Option<ConnectionDef>, StorageError>;

    async fn delete_connection(&self, id: &str) -> Result<bool, StorageError>;

    /// 幂等写入运行状态，返回更新是否被接受（过期会话或非法迁移返回 false）。
    async fn mark_status(&self, update: &StatusUpdate) -> Result<bool, StorageError>;
}

/// 存储目的地注册表接口
#[async_trait]
pub trait StorageDefStore: Send + Sync {
    async fn list_storages(&self) -> Result<Vec<StorageDef>, StorageError>;

    async fn find_storage(&self, id: i64) -> Result<Option<StorageDef>, StorageError>;

    /// 创建存储定义（分配 id）；`is_default` 为真时同时清除旧默认。
    async fn create_storage(&self, def: StorageDef) -> Result<StorageDef, StorageError>;

    async fn update_storage(
        &self,
        id: i64,
        update: StorageUpdate,
    ) -> Result<Option<StorageDef>, StorageError>;

    async fn delete_storage(&self, id: i64) -> Result<bool, StorageError>;

    /// 原子切换默认存储，目标不存在时返回 false 且不做任何修改。
    async fn set_default(&self, id: i64) -> Result<bool, StorageError>;

    /// `active=true` 的存储，默认存储总是包含在内。
    async fn list_active_storages(&self) -> Result<Vec<StorageDef>, StorageError>;

    async fn find_default(&self) -> Result<Option<StorageDef>, StorageError>;

    /// 没有默认存储时创建 `def` 并设为默认；已有默认时原样返回。
    async fn create_default_if_none(&self, def: StorageDef) -> Result<StorageDef, StorageError>;

    async fn mark_storage_status(
        &self,
        id: i64,
        status: StorageStatus,
        error: Option<&str>,
    ) -> Result<bool, StorageError>;

    async fn storage_status_summary(&self) -> Result<StorageStatusSummary, StorageError> {
        let defs = self.list_storages().await?;
        Ok(StorageStatusSummary::from_defs(&defs))
    }
}

/// 本地 data_records 接口
///
/// 查询结果按采集时间倒序返回。
#[async_trait]
pub trait DataRecordStore: Send + Sync {
    /// 预先分配记录 id，扇出时所有目的地共享同一个 id。
    async fn allocate_id(&self) -> Result<i64, StorageError>;

    /// 批量写入，`id` 为空的记录自动分配；返回写入行数。
    async fn insert_records(&self, records: &[DataRecord]) -> Result<usize, StorageError>;

    async fn find_by_source(&self, source_id: &str) -> Result<Vec<DataRecord>, StorageError>;

    async fn find_by_type(&self, data_type: &str) -> Result<Vec<DataRecord>, StorageError>;

    async fn find_recent(&self, limit: usize) -> Result<Vec<DataRecord>, StorageError>;

    /// 闭区间 `[start, end]`。
    async fn find_by_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DataRecord>, StorageError>;

    async fn count_all(&self) -> Result<u64, StorageError>;

    async fn count_since(&self, since: DateTime<Utc>) -> Result<u64, StorageError>;

    async fn count_by_status(&self, status: DataStatus) -> Result<u64, StorageError>;

    async fn count_by_source(&self, source_id: &str) -> Result<u64, StorageError>;

    async fn distinct_source_ids(&self) -> Result<Vec<String>, StorageError>;

    async fn distinct_data_types(&self) -> Result<Vec<String>, StorageError>;

    async fn delete_by_source(&self, source_id: &str) -> Result<u64, StorageError>;

    /// 删除采集时间早于 `cutoff` 的记录。
    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError>;
}
