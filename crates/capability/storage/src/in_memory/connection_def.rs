//! 连接定义内存存储实现

use crate::error::StorageError;
use crate::models::ConnectionUpdate;
use crate::traits::ConnectionStore;
use crate::validation::{apply_status_update, validate_connection_name};
use chrono::Utc;
use domain::{ConnectionDef, StatusUpdate};
use std::collections::HashMap;
use std::sync::RwLock;

/// 连接定义内存存储
///
/// 使用 RwLock + HashMap 提供线程安全的内存存储。
pub struct InMemoryConnectionStore {
    connections: RwLock<HashMap<String, ConnectionDef>>,
}

impl InMemoryConnectionStore {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryConnectionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ConnectionStore for InMemoryConnectionStore {
    /// 按创建时间列出全部连接
    async fn list_connections(&self) -> Result<Vec<ConnectionDef>, StorageError> {
        let mut items: Vec<ConnectionDef> = self
            .connections
            .read()
            .map(|map| map.values().cloned().collect())
            .unwrap_or_default();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(items)
    }

    /// 按 id 查询连接
    async fn find_connection(&self, id: &str) -> Result<Option<ConnectionDef>, StorageError> {
        let item = self
            .connections
            .read()
            .ok()
            .and_then(|map| map.get(id).cloned());
        Ok(item)
    }

    /// 新建连接（id 为空时生成 uuid）
    async fn create_connection(
        &self,
        mut def: ConnectionDef,
    ) -> Result<ConnectionDef, StorageError> {
        validate_connection_name(&def.name)?;
        if def.id.trim().is_empty() {
            def.id = uuid::Uuid::new_v4().to_string();
        }
        let mut map = self
            .connections
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        if map.contains_key(&def.id) {
            return Err(StorageError::conflict("connection exists"));
        }
        map.insert(def.id.clone(), def.clone());
        Ok(def)
    }

    /// 部分更新连接定义
    async fn update_connection(
        &self,
        id: &str,
        update: ConnectionUpdate,
    ) -> Result<Option<ConnectionDef>, StorageError> {
        if let Some(name) = update.name.as_deref() {
            validate_connection_name(name)?;
        }
        let mut map = self
            .connections
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let def = match map.get_mut(id) {
            Some(def) => def,
            None => return Ok(None),
        };
        if let Some(name) = update.name {
            def.name = name;
        }
        if let Some(source_type) = update.source_type {
            def.source_type = source_type;
        }
        if let Some(config) = update.config {
            def.config = config;
        }
        def.updated_at = Utc::now();
        Ok(Some(def.clone()))
    }

    /// 删除连接
    async fn delete_connection(&self, id: &str) -> Result<bool, StorageError> {
        let mut map = self
            .connections
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(map.remove(id).is_some())
    }

    /// 按会话号应用状态更新
    async fn mark_status(&self, update: &StatusUpdate) -> Result<bool, StorageError> {
        let mut map = self
            .connections
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let Some(def) = map.get_mut(&update.connection_id) else {
            return Ok(false);
        };
        Ok(apply_status_update(def, update, Utc::now()))
    }
}
