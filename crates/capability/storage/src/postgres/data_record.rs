//! Postgres data_records 实现
//!
//! id 列为 `generated by default as identity`，扇出前通过序列预分配，
//! 写入时显式带上 id。

use crate::error::StorageError;
use crate::traits::DataRecordStore;
use chrono::{DateTime, Utc};
use domain::{DataRecord, DataStatus};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

const COLUMNS: &str =
    "id, source_id, data_type, payload, \"timestamp\", metadata, storage_config_id, status";

pub struct PgDataRecordStore {
    pub pool: PgPool,
}

impl PgDataRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = crate::connection::connect_pool(database_url).await?;
        Ok(Self { pool })
    }

    async fn select(&self, filter: &str, bind: Option<&str>) -> Result<Vec<DataRecord>, StorageError> {
        let sql = format!(
            "select {} from data_records {} order by \"timestamp\" desc, id desc",
            COLUMNS, filter
        );
        let mut query = sqlx::query(&sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }
        let rows = query.fetch_all(&self.pool).await?;
        records_from_rows(rows)
    }

    async fn count(&self, sql: &str) -> Result<u64, StorageError> {
        let row = sqlx::query(sql).fetch_one(&self.pool).await?;
        let count: i64 = row.try_get(0)?;
        Ok(count.max(0) as u64)
    }
}

fn record_from_row(row: &PgRow) -> Result<DataRecord, StorageError> {
    let status: String = row.try_get("status")?;
    let metadata: Option<String> = row.try_get("metadata")?;
    let payload: Option<String> = row.try_get("payload")?;
    Ok(DataRecord {
        id: Some(row.try_get("id")?),
        source_id: row.try_get("source_id")?,
        data_type: row.try_get("data_type")?,
        payload: payload.unwrap_or_default(),
        timestamp: row.try_get("timestamp")?,
        status: DataStatus::parse(&status).unwrap_or(DataStatus::Received),
        destination_id: row.try_get("storage_config_id")?,
        provenance: DataRecord::provenance_from_metadata(metadata.as_deref()),
    })
}

fn records_from_rows(rows: Vec<PgRow>) -> Result<Vec<DataRecord>, StorageError> {
    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        records.push(record_from_row(&row)?);
    }
    Ok(records)
}

#[async_trait::async_trait]
impl DataRecordStore for PgDataRecordStore {
    async fn allocate_id(&self) -> Result<i64, StorageError> {
        let row = sqlx::query("select nextval(pg_get_serial_sequence('data_records', 'id'))")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get(0)?)
    }

    async fn insert_records(&self, records: &[DataRecord]) -> Result<usize, StorageError> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                "insert into data_records \
                 (id, source_id, data_type, payload, \"timestamp\", metadata, storage_config_id, status) \
                 values (coalesce($1, nextval(pg_get_serial_sequence('data_records', 'id'))), \
                         $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(record.id)
            .bind(&record.source_id)
            .bind(&record.data_type)
            .bind(&record.payload)
            .bind(record.timestamp)
            .bind(record.metadata_json())
            .bind(record.destination_id)
            .bind(record.status.as_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(records.len())
    }

    async fn find_by_source(&self, source_id: &str) -> Result<Vec<DataRecord>, StorageError> {
        self.select("where source_id = $1", Some(source_id)).await
    }

    async fn find_by_type(&self, data_type: &str) -> Result<Vec<DataRecord>, StorageError> {
        self.select("where data_type = $1", Some(data_type)).await
    }

    async fn find_recent(&self, limit: usize) -> Result<Vec<DataRecord>, StorageError> {
        let rows = sqlx::query(&format!(
            "select {} from data_records order by \"timestamp\" desc, id desc limit $1",
            COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        records_from_rows(rows)
    }

    async fn find_by_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DataRecord>, StorageError> {
        let rows = sqlx::query(&format!(
            "select {} from data_records where \"timestamp\" between $1 and $2 \
             order by \"timestamp\" desc, id desc",
            COLUMNS
        ))
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        records_from_rows(rows)
    }

    async fn count_all(&self) -> Result<u64, StorageError> {
        self.count("select count(*) from data_records").await
    }

    async fn count_since(&self, since: DateTime<Utc>) -> Result<u64, StorageError> {
        let row = sqlx::query("select count(*) from data_records where \"timestamp\" >= $1")
            .bind(since)
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get(0)?;
        Ok(count.max(0) as u64)
    }

    async fn count_by_status(&self, status: DataStatus) -> Result<u64, StorageError> {
        let row = sqlx::query("select count(*) from data_records where status = $1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get(0)?;
        Ok(count.max(0) as u64)
    }

    async fn count_by_source(&self, source_id: &str) -> Result<u64, StorageError> {
        let row = sqlx::query("select count(*) from data_records where source_id = $1")
            .bind(source_id)
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get(0)?;
        Ok(count.max(0) as u64)
    }

    async fn distinct_source_ids(&self) -> Result<Vec<String>, StorageError> {
        let rows = sqlx::query("select distinct source_id from data_records order by source_id")
            .fetch_all(&self.pool)
            .await?;
        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            ids.push(row.try_get("source_id")?);
        }
        Ok(ids)
    }

    async fn distinct_data_types(&self) -> Result<Vec<String>, StorageError> {
        let rows = sqlx::query("select distinct data_type from data_records order by data_type")
            .fetch_all(&self.pool)
            .await?;
        let mut types = Vec::with_capacity(rows.len());
        for row in rows {
            types.push(row.try_get("data_type")?);
        }
        Ok(types)
    }

    async fn delete_by_source(&self, source_id: &str) -> Result<u64, StorageError> {
        let result = sqlx::query("delete from data_records where source_id = $1")
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError> {
        let result = sqlx::query("delete from data_records where \"timestamp\" < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
