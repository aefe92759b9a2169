//! Postgres 连接注册表实现

use crate::error::{StorageError, StorageErrorKind};
use crate::models::ConnectionUpdate;
use crate::postgres::{config_from_text, config_to_text};
use crate::traits::ConnectionStore;
use crate::validation::{apply_status_update, validate_connection_name};
use chrono::Utc;
use domain::{ConnectionDef, ConnectionStatus, SourceType, StatusUpdate};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

const COLUMNS: &str = "id, name, source_type, config, status, last_error, last_connected_at, \
                       status_epoch, created_at, updated_at";

pub struct PgConnectionStore {
    pub pool: PgPool,
}

impl PgConnectionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 通过数据库 URL 建立连接池
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = crate::connection::connect_pool(database_url).await?;
        Ok(Self { pool })
    }
}

fn connection_from_row(row: &PgRow) -> Result<ConnectionDef, StorageError> {
    let source_type: String = row.try_get("source_type")?;
    let source_type = source_type
        .parse::<SourceType>()
        .map_err(|err| StorageError::with_kind(StorageErrorKind::Schema, err.to_string()))?;
    let status: String = row.try_get("status")?;
    let status = ConnectionStatus::parse(&status).ok_or_else(|| {
        StorageError::with_kind(
            StorageErrorKind::Schema,
            format!("unknown connection status: {}", status),
        )
    })?;
    let config: String = row.try_get("config")?;
    let epoch: i64 = row.try_get("status_epoch")?;
    Ok(ConnectionDef {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        source_type,
        config: config_from_text(&config)?,
        status,
        last_error: row.try_get("last_error")?,
        last_connected_at: row.try_get("last_connected_at")?,
        status_epoch: epoch.max(0) as u64,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait::async_trait]
impl ConnectionStore for PgConnectionStore {
    async fn list_connections(&self) -> Result<Vec<ConnectionDef>, StorageError> {
        let rows = sqlx::query(&format!(
            "select {} from connection_defs order by created_at, id",
            COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        let mut connections = Vec::with_capacity(rows.len());
        for row in rows {
            connections.push(connection_from_row(&row)?);
        }
        Ok(connections)
    }

    async fn find_connection(&self, id: &str) -> Result<Option<ConnectionDef>, StorageError> {
        let row = sqlx::query(&format!("select {} from connection_defs where id = $1", COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(connection_from_row(&row)?))
    }

    async fn create_connection(
        &self,
        mut def: ConnectionDef,
    ) -> Result<ConnectionDef, StorageError> {
        validate_connection_name(&def.name)?;
        if def.id.trim().is_empty() {
            def.id = uuid::Uuid::new_v4().to_string();
        }
        sqlx::query(
            "insert into connection_defs \
             (id, name, source_type, config, status, last_error, last_connected_at, \
              status_epoch, created_at, updated_at) \
             values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&def.id)
        .bind(&def.name)
        .bind(def.source_type.as_str())
        .bind(config_to_text(&def.config)?)
        .bind(def.status.as_str())
        .bind(&def.last_error)
        .bind(def.last_connected_at)
        .bind(def.status_epoch as i64)
        .bind(def.created_at)
        .bind(def.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(def)
    }

    async fn update_connection(
        &self,
        id: &str,
        update: ConnectionUpdate,
    ) -> Result<Option<ConnectionDef>, StorageError> {
        if let Some(name) = update.name.as_deref() {
            validate_connection_name(name)?;
        }
        let config = update.config.as_ref().map(config_to_text).transpose()?;
        let row = sqlx::query(&format!(
            "update connection_defs set \
             name = coalesce($1, name), \
             source_type = coalesce($2, source_type), \
             config = coalesce($3, config), \
             updated_at = now() \
             where id = $4 \
             returning {}",
            COLUMNS
        ))
        .bind(update.name)
        .bind(update.source_type.map(|source_type| source_type.as_str()))
        .bind(config)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(connection_from_row(&row)?))
    }

    async fn delete_connection(&self, id: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("delete from connection_defs where id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_status(&self, update: &StatusUpdate) -> Result<bool, StorageError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(&format!(
            "select {} from connection_defs where id = $1 for update",
            COLUMNS
        ))
        .bind(&update.connection_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(false);
        };
        let mut def = connection_from_row(&row)?;
        let before = def.clone();
        if !apply_status_update(&mut def, update, Utc::now()) {
            tx.rollback().await?;
            return Ok(false);
        }
        if def != before {
            sqlx::query(
                "update connection_defs set status = $1, last_error = $2, \
                 last_connected_at = $3, status_epoch = $4, updated_at = $5 where id = $6",
            )
            .bind(def.status.as_str())
            .bind(&def.last_error)
            .bind(def.last_connected_at)
            .bind(def.status_epoch as i64)
            .bind(def.updated_at)
            .bind(&def.id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(true)
    }
}
