//! data_records 内存存储实现
//!
//! 记录按 id 存放在 BTreeMap 中，重复 id 检查为一次查找。

use crate::error::StorageError;
use crate::traits::DataRecordStore;
use chrono::{DateTime, Utc};
use domain::{DataRecord, DataStatus};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicI64, Ordering};

/// data_records 内存存储
pub struct InMemoryDataRecordStore {
    records: RwLock<BTreeMap<i64, DataRecord>>,
    next_id: AtomicI64,
}

impl InMemoryDataRecordStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    fn select<F>(&self, filter: F) -> Vec<DataRecord>
    where
        F: Fn(&DataRecord) -> bool,
    {
        let mut items: Vec<DataRecord> = self
            .records
            .read()
            .map(|items| {
                items
                    .values()
                    .filter(|record| filter(record))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        sort_newest_first(&mut items);
        items
    }

    fn count<F>(&self, filter: F) -> u64
    where
        F: Fn(&DataRecord) -> bool,
    {
        self.records
            .read()
            .map(|items| items.values().filter(|record| filter(record)).count() as u64)
            .unwrap_or(0)
    }

    fn remove<F>(&self, filter: F) -> Result<u64, StorageError>
    where
        F: Fn(&DataRecord) -> bool,
    {
        let mut items = self
            .records
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let before = items.len();
        items.retain(|_, record| !filter(record));
        Ok((before - items.len()) as u64)
    }
}

impl Default for InMemoryDataRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

fn sort_newest_first(items: &mut [DataRecord]) {
    items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
}

#[async_trait::async_trait]
impl DataRecordStore for InMemoryDataRecordStore {
    /// 分配下一个记录 id
    async fn allocate_id(&self) -> Result<i64, StorageError> {
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// 批量插入；任一 id 重复则整批不写入
    async fn insert_records(&self, records: &[DataRecord]) -> Result<usize, StorageError> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut items = self
            .records
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let mut staged: BTreeMap<i64, DataRecord> = BTreeMap::new();
        for record in records {
            let id = match record.id {
                Some(id) => {
                    self.next_id.fetch_max(id + 1, Ordering::SeqCst);
                    id
                }
                None => self.next_id.fetch_add(1, Ordering::SeqCst),
            };
            if items.contains_key(&id) || staged.contains_key(&id) {
                return Err(StorageError::conflict(format!("duplicate record id {}", id)));
            }
            let mut record = record.clone();
            record.id = Some(id);
            staged.insert(id, record);
        }
        let inserted = staged.len();
        items.append(&mut staged);
        Ok(inserted)
    }

    /// 按来源查询，最新在前
    async fn find_by_source(&self, source_id: &str) -> Result<Vec<DataRecord>, StorageError> {
        Ok(self.select(|record| record.source_id == source_id))
    }

    /// 按数据类型查询，最新在前
    async fn find_by_type(&self, data_type: &str) -> Result<Vec<DataRecord>, StorageError> {
        Ok(self.select(|record| record.data_type == data_type))
    }

    /// 最近 `limit` 条记录
    async fn find_recent(&self, limit: usize) -> Result<Vec<DataRecord>, StorageError> {
        let mut items = self.select(|_| true);
        items.truncate(limit);
        Ok(items)
    }

    /// 采集时间在闭区间内的记录
    async fn find_by_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DataRecord>, StorageError> {
        Ok(self.select(|record| record.timestamp >= start && record.timestamp <= end))
    }

    async fn count_all(&self) -> Result<u64, StorageError> {
        Ok(self.records.read().map(|items| items.len() as u64).unwrap_or(0))
    }

    async fn count_since(&self, since: DateTime<Utc>) -> Result<u64, StorageError> {
        Ok(self.count(|record| record.timestamp >= since))
    }

    async fn count_by_status(&self, status: DataStatus) -> Result<u64, StorageError> {
        Ok(self.count(|record| record.status == status))
    }

    async fn count_by_source(&self, source_id: &str) -> Result<u64, StorageError> {
        Ok(self.count(|record| record.source_id == source_id))
    }

    /// 去重后的来源列表（字典序）
    async fn distinct_source_ids(&self) -> Result<Vec<String>, StorageError> {
        let ids: BTreeSet<String> = self
            .records
            .read()
            .map(|items| items.values().map(|record| record.source_id.clone()).collect())
            .unwrap_or_default();
        Ok(ids.into_iter().collect())
    }

    /// 去重后的数据类型列表（字典序）
    async fn distinct_data_types(&self) -> Result<Vec<String>, StorageError> {
        let types: BTreeSet<String> = self
            .records
            .read()
            .map(|items| items.values().map(|record| record.data_type.clone()).collect())
            .unwrap_or_default();
        Ok(types.into_iter().collect())
    }

    async fn delete_by_source(&self, source_id: &str) -> Result<u64, StorageError> {
        self.remove(|record| record.source_id == source_id)
    }

    /// 删除采集时间早于 `cutoff` 的记录
    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError> {
        self.remove(|record| record.timestamp < cutoff)
    }
}
