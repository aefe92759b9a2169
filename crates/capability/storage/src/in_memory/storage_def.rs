//! 存储定义内存存储实现
//!
//! 默认标记的切换在同一把写锁内完成，等价于一次原子写。

use crate::error::StorageError;
use crate::models::StorageUpdate;
use crate::traits::StorageDefStore;
use crate::validation::{validate_single_local_relational, validate_storage_name};
use chrono::Utc;
use domain::{StorageDef, StorageStatus};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// 存储定义内存存储
///
/// 以 id 排序的 BTreeMap 保存，id 自增。
pub struct InMemoryStorageDefStore {
    storages: RwLock<BTreeMap<i64, StorageDef>>,
}

impl InMemoryStorageDefStore {
    pub fn new() -> Self {
        Self {
            storages: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Default for InMemoryStorageDefStore {
    fn default() -> Self {
        Self::new()
    }
}

fn insert_locked(map: &mut BTreeMap<i64, StorageDef>, mut def: StorageDef) -> StorageDef {
    let id = map.keys().next_back().copied().unwrap_or(0) + 1;
    def.id = id;
    if def.is_default {
        for other in map.values_mut() {
            other.is_default = false;
        }
    }
    map.insert(id, def.clone());
    def
}

#[async_trait::async_trait]
impl StorageDefStore for InMemoryStorageDefStore {
    /// 按 id 升序列出全部存储定义
    async fn list_storages(&self) -> Result<Vec<StorageDef>, StorageError> {
        let items = self
            .storages
            .read()
            .map(|map| map.values().cloned().collect())
            .unwrap_or_default();
        Ok(items)
    }

    /// 按 id 查询存储定义
    async fn find_storage(&self, id: i64) -> Result<Option<StorageDef>, StorageError> {
        let item = self
            .storages
            .read()
            .ok()
            .and_then(|map| map.get(&id).cloned());
        Ok(item)
    }

    /// 新建存储定义（本地关系型只允许一个）
    async fn create_storage(&self, def: StorageDef) -> Result<StorageDef, StorageError> {
        validate_storage_name(&def.name)?;
        let mut map = self
            .storages
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        validate_single_local_relational(map.values(), 0, def.kind)?;
        Ok(insert_locked(&mut map, def))
    }

    /// 部分更新；配置变化后状态回到 Configured
    async fn update_storage(
        &self,
        id: i64,
        update: StorageUpdate,
    ) -> Result<Option<StorageDef>, StorageError> {
        if let Some(name) = update.name.as_deref() {
            validate_storage_name(name)?;
        }
        let mut map = self
            .storages
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        if !map.contains_key(&id) {
            return Ok(None);
        }
        if let Some(kind) = update.kind {
            validate_single_local_relational(map.values(), id, kind)?;
        }
        let Some(def) = map.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = update.name {
            def.name = name;
        }
        if let Some(kind) = update.kind {
            def.kind = kind;
        }
        if let Some(config) = update.config {
            def.config = config;
            def.status = StorageStatus::Configured;
            def.last_error = None;
        }
        if let Some(active) = update.active {
            def.active = active;
        }
        Ok(Some(def.clone()))
    }

    /// 删除存储定义
    async fn delete_storage(&self, id: i64) -> Result<bool, StorageError> {
        let mut map = self
            .storages
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(map.remove(&id).is_some())
    }

    /// 切换默认存储（同一把写锁内完成）
    async fn set_default(&self, id: i64) -> Result<bool, StorageError> {
        let mut map = self
            .storages
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        if !map.contains_key(&id) {
            return Ok(false);
        }
        for (key, def) in map.iter_mut() {
            def.is_default = *key == id;
        }
        Ok(true)
    }

    /// 列出激活的存储（总是包含默认存储）
    async fn list_active_storages(&self) -> Result<Vec<StorageDef>, StorageError> {
        let items = self
            .storages
            .read()
            .map(|map| {
                map.values()
                    .filter(|def| def.active || def.is_default)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(items)
    }

    /// 查询默认存储
    async fn find_default(&self) -> Result<Option<StorageDef>, StorageError> {
        let item = self
            .storages
            .read()
            .ok()
            .and_then(|map| map.values().find(|def| def.is_default).cloned());
        Ok(item)
    }

    /// 不存在默认存储时创建一个
    async fn create_default_if_none(&self, def: StorageDef) -> Result<StorageDef, StorageError> {
        validate_storage_name(&def.name)?;
        let mut map = self
            .storages
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        if let Some(existing) = map.values().find(|def| def.is_default) {
            return Ok(existing.clone());
        }
        validate_single_local_relational(map.values(), 0, def.kind)?;
        Ok(insert_locked(&mut map, def.as_default()))
    }

    /// 记录存储状态与最近错误
    async fn mark_storage_status(
        &self,
        id: i64,
        status: StorageStatus,
        error: Option<&str>,
    ) -> Result<bool, StorageError> {
        let mut map = self
            .storages
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let Some(def) = map.get_mut(&id) else {
            return Ok(false);
        };
        def.status = status;
        def.last_error = error.map(str::to_string);
        def.last_tested_at = Some(Utc::now());
        Ok(true)
    }
}
