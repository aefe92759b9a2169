//! Postgres 存储注册表实现
//!
//! `set_default` 在事务内先锁定目标行，再用一条 update 同时清除旧默认、
//! 设置新默认，任意时刻最多只有一个默认存储。

use crate::error::{StorageError, StorageErrorKind};
use crate::models::StorageUpdate;
use crate::postgres::{config_from_text, config_to_text};
use crate::traits::StorageDefStore;
use crate::validation::{validate_single_local_relational, validate_storage_name};
use domain::{StorageDef, StorageKind, StorageStatus};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

const COLUMNS: &str = "id, name, storage_type, config, is_active, is_default, status, \
                       last_error, last_tested_at, created_at";

pub struct PgStorageDefStore {
    pub pool: PgPool,
}

impl PgStorageDefStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = crate::connection::connect_pool(database_url).await?;
        Ok(Self { pool })
    }
}

fn storage_from_row(row: &PgRow) -> Result<StorageDef, StorageError> {
    let tag: String = row.try_get("storage_type")?;
    let kind = StorageKind::from_tag(&tag).ok_or_else(|| {
        StorageError::with_kind(
            StorageErrorKind::Schema,
            format!("unsupported storage type: {}", tag),
        )
    })?;
    let status: String = row.try_get("status")?;
    let status = StorageStatus::parse(&status).ok_or_else(|| {
        StorageError::with_kind(
            StorageErrorKind::Schema,
            format!("unknown storage status: {}", status),
        )
    })?;
    let config: String = row.try_get("config")?;
    Ok(StorageDef {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        kind,
        config: config_from_text(&config)?,
        active: row.try_get("is_active")?,
        is_default: row.try_get("is_default")?,
        status,
        last_error: row.try_get("last_error")?,
        last_tested_at: row.try_get("last_tested_at")?,
        created_at: row.try_get("created_at")?,
    })
}

/// 在事务内校验本地关系型存储唯一（先锁表，串行化并发的新建 / 更新）。
async fn check_local_relational_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    candidate_id: i64,
    kind: StorageKind,
) -> Result<(), StorageError> {
    if kind != StorageKind::LocalRelational {
        return Ok(());
    }
    sqlx::query("lock table storage_defs in share row exclusive mode")
        .execute(&mut **tx)
        .await?;
    let rows = sqlx::query(&format!(
        "select {} from storage_defs where storage_type = $1",
        COLUMNS
    ))
    .bind(StorageKind::LocalRelational.as_tag())
    .fetch_all(&mut **tx)
    .await?;
    let mut existing = Vec::with_capacity(rows.len());
    for row in rows {
        existing.push(storage_from_row(&row)?);
    }
    validate_single_local_relational(&existing, candidate_id, kind)
}

async fn insert_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    def: &StorageDef,
) -> Result<StorageDef, StorageError> {
    if def.is_default {
        sqlx::query("update storage_defs set is_default = false where is_default")
            .execute(&mut **tx)
            .await?;
    }
    let row = sqlx::query(&format!(
        "insert into storage_defs \
         (name, storage_type, config, is_active, is_default, status, last_error, \
          last_tested_at, created_at) \
         values ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         returning {}",
        COLUMNS
    ))
    .bind(&def.name)
    .bind(def.kind.as_tag())
    .bind(config_to_text(&def.config)?)
    .bind(def.active)
    .bind(def.is_default)
    .bind(def.status.as_str())
    .bind(&def.last_error)
    .bind(def.last_tested_at)
    .bind(def.created_at)
    .fetch_one(&mut **tx)
    .await?;
    storage_from_row(&row)
}

#[async_trait::async_trait]
impl StorageDefStore for PgStorageDefStore {
    async fn list_storages(&self) -> Result<Vec<StorageDef>, StorageError> {
        let rows = sqlx::query(&format!("select {} from storage_defs order by id", COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        let mut storages = Vec::with_capacity(rows.len());
        for row in rows {
            storages.push(storage_from_row(&row)?);
        }
        Ok(storages)
    }

    async fn find_storage(&self, id: i64) -> Result<Option<StorageDef>, StorageError> {
        let row = sqlx::query(&format!("select {} from storage_defs where id = $1", COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(storage_from_row(&row)?))
    }

    async fn create_storage(&self, def: StorageDef) -> Result<StorageDef, StorageError> {
        validate_storage_name(&def.name)?;
        let mut tx = self.pool.begin().await?;
        check_local_relational_in_tx(&mut tx, 0, def.kind).await?;
        let created = insert_in_tx(&mut tx, &def).await?;
        tx.commit().await?;
        Ok(created)
    }

    async fn update_storage(
        &self,
        id: i64,
        update: StorageUpdate,
    ) -> Result<Option<StorageDef>, StorageError> {
        if let Some(name) = update.name.as_deref() {
            validate_storage_name(name)?;
        }
        let config_changed = update.config.is_some();
        let config = update.config.as_ref().map(config_to_text).transpose()?;
        let mut tx = self.pool.begin().await?;
        if let Some(kind) = update.kind {
            check_local_relational_in_tx(&mut tx, id, kind).await?;
        }
        let row = sqlx::query(&format!(
            "update storage_defs set \
             name = coalesce($1, name), \
             storage_type = coalesce($2, storage_type), \
             config = coalesce($3, config), \
             is_active = coalesce($4, is_active), \
             status = case when $5 then 'configured' else status end, \
             last_error = case when $5 then null else last_error end \
             where id = $6 \
             returning {}",
            COLUMNS
        ))
        .bind(update.name)
        .bind(update.kind.map(|kind| kind.as_tag()))
        .bind(config)
        .bind(update.active)
        .bind(config_changed)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        tx.commit().await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(storage_from_row(&row)?))
    }

    async fn delete_storage(&self, id: i64) -> Result<bool, StorageError> {
        let result = sqlx::query("delete from storage_defs where id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_default(&self, id: i64) -> Result<bool, StorageError> {
        let mut tx = self.pool.begin().await?;
        let exists = sqlx::query("select id from storage_defs where id = $1 for update")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            tx.rollback().await?;
            return Ok(false);
        }
        sqlx::query(
            "update storage_defs set is_default = (id = $1) \
             where is_default or id = $1",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        tracing::info!(target: "igw.storage", storage_id = id, "default_storage_switched");
        Ok(true)
    }

    async fn list_active_storages(&self) -> Result<Vec<StorageDef>, StorageError> {
        let rows = sqlx::query(&format!(
            "select {} from storage_defs where is_active or is_default order by id",
            COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        let mut storages = Vec::with_capacity(rows.len());
        for row in rows {
            storages.push(storage_from_row(&row)?);
        }
        Ok(storages)
    }

    async fn find_default(&self) -> Result<Option<StorageDef>, StorageError> {
        let row = sqlx::query(&format!(
            "select {} from storage_defs where is_default order by id limit 1",
            COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(storage_from_row(&row)?))
    }

    async fn create_default_if_none(&self, def: StorageDef) -> Result<StorageDef, StorageError> {
        validate_storage_name(&def.name)?;
        let mut tx = self.pool.begin().await?;
        // 串行化并发的启动流程，避免同时插入两个默认存储。
        sqlx::query("lock table storage_defs in share row exclusive mode")
            .execute(&mut *tx)
            .await?;
        let existing = sqlx::query(&format!(
            "select {} from storage_defs where is_default order by id limit 1",
            COLUMNS
        ))
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(row) = existing {
            let existing = storage_from_row(&row)?;
            tx.commit().await?;
            return Ok(existing);
        }
        check_local_relational_in_tx(&mut tx, 0, def.kind).await?;
        let created = insert_in_tx(&mut tx, &def.as_default()).await?;
        tx.commit().await?;
        Ok(created)
    }

    async fn mark_storage_status(
        &self,
        id: i64,
        status: StorageStatus,
        error: Option<&str>,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "update storage_defs set status = $1, last_error = $2, last_tested_at = now() \
             where id = $3",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
