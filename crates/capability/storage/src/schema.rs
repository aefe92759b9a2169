//! 注册表与 data_records 的建表语句
//!
//! 启动时执行，所有语句均为 `if not exists`，可重复执行。

use crate::error::StorageError;
use sqlx::PgPool;

const SCHEMA_STATEMENTS: &[&str] = &[
    "create table if not exists connection_defs (\
        id varchar(64) primary key, \
        name varchar(255) not null, \
        source_type varchar(32) not null, \
        config text not null default '{}', \
        status varchar(32) not null default 'offline', \
        last_error text, \
        last_connected_at timestamptz, \
        status_epoch bigint not null default 0, \
        created_at timestamptz not null default now(), \
        updated_at timestamptz not null default now())",
    "create table if not exists storage_defs (\
        id bigint generated by default as identity primary key, \
        name varchar(50) not null, \
        storage_type varchar(32) not null, \
        config text not null default '{}', \
        is_active boolean not null default true, \
        is_default boolean not null default false, \
        status varchar(32) not null default 'configured', \
        last_error text, \
        last_tested_at timestamptz, \
        created_at timestamptz not null default now())",
    "create table if not exists data_records (\
        id bigint generated by default as identity primary key, \
        source_id varchar(255) not null, \
        data_type varchar(255) not null, \
        payload text, \
        \"timestamp\" timestamptz not null, \
        metadata text, \
        storage_config_id bigint, \
        status varchar(32) not null default 'RECEIVED', \
        created_at timestamptz not null default now())",
    "create index if not exists idx_data_records_timestamp on data_records (\"timestamp\")",
    "create index if not exists idx_data_records_source_timestamp on data_records (source_id, \"timestamp\")",
    "create index if not exists idx_data_records_data_type on data_records (data_type)",
];

/// 创建注册表与 data_records（幂等）。
pub async fn ensure_schema(pool: &PgPool) -> Result<(), StorageError> {
    for statement in SCHEMA_STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::info!(target: "igw.storage", tables = 3, "schema_ensured");
    Ok(())
}
