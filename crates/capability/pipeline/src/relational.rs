//! 外部关系库写入器（PostgreSQL / SQL Server）
//!
//! 每批记录打开一条短连接，首次写入时按 data_records 布局建表
//! （每个写入器实例只建一次），在一个事务中逐行插入后关闭连接。
//! 记录 id 显式写入，保证各目的地 id 一致。

use crate::error::WriteError;
use crate::writer::DestinationWriter;
use async_trait::async_trait;
use domain::{ConfigMap, ConfigReader, DataRecord, RelationalEngine, StorageKind};
use sqlx::postgres::PgConnectOptions;
use sqlx::{ConnectOptions, Connection, PgConnection};
use std::sync::atomic::{AtomicBool, Ordering};
use tiberius::{AuthMethod, Client, Config};
use tokio::net::TcpStream;
use tokio_util::compat::TokioAsyncWriteCompatExt;
use tracing::info;

pub const DEFAULT_TABLE: &str = "data_records";

/// 外部库连接配置：`host, port, database, user, password, table?`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationalConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub table: String,
}

impl RelationalConfig {
    pub fn from_config(config: &ConfigMap, default_port: u16) -> Result<Self, WriteError> {
        let reader = ConfigReader::new(config);
        let table = reader.read_string_with_default("table", DEFAULT_TABLE);
        if !is_identifier(&table) {
            return Err(WriteError::Config(format!("invalid table name: {}", table)));
        }
        Ok(Self {
            host: reader.read_string("host")?,
            port: reader.read_u64_in_range_with_default("port", 1, 65_535, u64::from(default_port))?
                as u16,
            database: reader.read_string("database")?,
            user: reader.read_string("user")?,
            password: reader.read_string("password")?,
            table,
        })
    }
}

/// `[A-Za-z_][A-Za-z0-9_]{0,62}`
pub fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    value.len() <= 63 && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

fn postgres_ddl(table: &str) -> Vec<String> {
    vec![
        format!(
            "create table if not exists {table} (
                id bigint generated by default as identity primary key,
                source_id varchar(255) not null,
                data_type varchar(255) not null,
                payload text,
                \"timestamp\" timestamptz not null,
                metadata text,
                storage_config_id bigint,
                created_at timestamptz not null default now()
            )"
        ),
        format!("create index if not exists idx_{table}_timestamp on {table} (\"timestamp\")"),
        format!(
            "create index if not exists idx_{table}_source_ts on {table} (source_id, \"timestamp\")"
        ),
        format!("create index if not exists idx_{table}_data_type on {table} (data_type)"),
    ]
}

/// sqlx 错误分类：认证、库不存在、语法 / 对象错误为致命，其余按瞬时处理。
pub fn classify_sqlx(err: sqlx::Error) -> WriteError {
    match &err {
        sqlx::Error::Database(db) => {
            let code = db.code().map(|code| code.to_string()).unwrap_or_default();
            if code.starts_with("28") || code == "3D000" || code.starts_with("42") {
                WriteError::Fatal(err.to_string())
            } else {
                WriteError::Transient(err.to_string())
            }
        }
        sqlx::Error::Configuration(_) => WriteError::Config(err.to_string()),
        _ => WriteError::Transient(err.to_string()),
    }
}

/// 外部 PostgreSQL 写入器
pub struct PostgresWriter {
    config: RelationalConfig,
    table_ready: AtomicBool,
}

impl PostgresWriter {
    pub fn from_config(config: &ConfigMap) -> Result<Self, WriteError> {
        Ok(Self {
            config: RelationalConfig::from_config(config, 5432)?,
            table_ready: AtomicBool::new(false),
        })
    }

    fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.config.host)
            .port(self.config.port)
            .database(&self.config.database)
            .username(&self.config.user)
            .password(&self.config.password)
    }

    async fn write_batch(
        &self,
        conn: &mut PgConnection,
        records: &[DataRecord],
    ) -> Result<(), sqlx::Error> {
        if !self.table_ready.load(Ordering::SeqCst) {
            for statement in postgres_ddl(&self.config.table) {
                sqlx::query(&statement).execute(&mut *conn).await?;
            }
            self.table_ready.store(true, Ordering::SeqCst);
            info!(
                target: "igw.pipeline",
                table = %self.config.table,
                host = %self.config.host,
                "external_table_ready"
            );
        }
        let insert = format!(
            "insert into {} (id, source_id, data_type, payload, \"timestamp\", metadata, storage_config_id)
             values (coalesce($1, nextval(pg_get_serial_sequence('{}', 'id'))), $2, $3, $4, $5, $6, $7)
             on conflict (id) do nothing",
            self.config.table, self.config.table
        );
        let mut tx = conn.begin().await?;
        for record in records {
            sqlx::query(&insert)
                .bind(record.id)
                .bind(&record.source_id)
                .bind(&record.data_type)
                .bind(&record.payload)
                .bind(record.timestamp)
                .bind(record.metadata_json())
                .bind(record.destination_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await
    }
}

#[async_trait]
impl DestinationWriter for PostgresWriter {
    fn kind(&self) -> StorageKind {
        StorageKind::ExternalRelational(RelationalEngine::Postgres)
    }

    async fn write(&self, records: &[DataRecord]) -> Result<(), WriteError> {
        let mut conn = self.connect_options().connect().await.map_err(classify_sqlx)?;
        let result = self.write_batch(&mut conn, records).await;
        let _ = conn.close().await;
        result.map_err(classify_sqlx)
    }

    async fn test(&self) -> Result<(), WriteError> {
        let mut conn = self.connect_options().connect().await.map_err(classify_sqlx)?;
        let result = sqlx::query("select 1").execute(&mut conn).await;
        let _ = conn.close().await;
        result.map(|_| ()).map_err(classify_sqlx)
    }
}

fn mssql_ddl(table: &str) -> Vec<String> {
    vec![
        format!(
            "IF OBJECT_ID(N'{table}', N'U') IS NULL
             CREATE TABLE {table} (
                id BIGINT IDENTITY(1,1) PRIMARY KEY,
                source_id NVARCHAR(255) NOT NULL,
                data_type NVARCHAR(255) NOT NULL,
                payload NVARCHAR(MAX),
                [timestamp] DATETIME2 NOT NULL,
                metadata NVARCHAR(MAX) NULL,
                storage_config_id BIGINT NULL,
                created_at DATETIME2 NOT NULL DEFAULT SYSUTCDATETIME()
             )"
        ),
        format!(
            "IF NOT EXISTS (SELECT 1 FROM sys.indexes WHERE name = 'idx_{table}_timestamp')
             CREATE INDEX idx_{table}_timestamp ON {table} ([timestamp])"
        ),
        format!(
            "IF NOT EXISTS (SELECT 1 FROM sys.indexes WHERE name = 'idx_{table}_source_ts')
             CREATE INDEX idx_{table}_source_ts ON {table} (source_id, [timestamp])"
        ),
        format!(
            "IF NOT EXISTS (SELECT 1 FROM sys.indexes WHERE name = 'idx_{table}_data_type')
             CREATE INDEX idx_{table}_data_type ON {table} (data_type)"
        ),
    ]
}

/// tiberius 错误分类：登录失败 (18456)、无法打开库 (4060)、
/// 对象不存在 (208)、语法错误 (102) 为致命。
pub fn classify_tiberius(err: tiberius::error::Error) -> WriteError {
    match &err {
        tiberius::error::Error::Server(token)
            if matches!(token.code(), 18456 | 4060 | 208 | 102) =>
        {
            WriteError::Fatal(err.to_string())
        }
        tiberius::error::Error::Conversion(_) => WriteError::Fatal(err.to_string()),
        _ => WriteError::Transient(err.to_string()),
    }
}

/// 外部 SQL Server 写入器
pub struct MssqlWriter {
    config: RelationalConfig,
    table_ready: AtomicBool,
}

impl MssqlWriter {
    pub fn from_config(config: &ConfigMap) -> Result<Self, WriteError> {
        Ok(Self {
            config: RelationalConfig::from_config(config, 1433)?,
            table_ready: AtomicBool::new(false),
        })
    }

    fn tiberius_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port);
        config.database(&self.config.database);
        config.authentication(AuthMethod::sql_server(&self.config.user, &self.config.password));
        config.trust_cert();
        config
    }

    async fn connect(&self) -> Result<TcpClient, WriteError> {
        let config = self.tiberius_config();
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|err| WriteError::Transient(err.to_string()))?;
        tcp.set_nodelay(true)
            .map_err(|err| WriteError::Transient(err.to_string()))?;
        Client::connect(config, tcp.compat_write())
            .await
            .map_err(classify_tiberius)
    }

    async fn write_batch(
        &self,
        client: &mut TcpClient,
        records: &[DataRecord],
    ) -> Result<(), tiberius::error::Error> {
        if !self.table_ready.load(Ordering::SeqCst) {
            for statement in mssql_ddl(&self.config.table) {
                client.execute(statement, &[]).await?;
            }
            self.table_ready.store(true, Ordering::SeqCst);
            info!(
                target: "igw.pipeline",
                table = %self.config.table,
                host = %self.config.host,
                "external_table_ready"
            );
        }
        let table = &self.config.table;
        let with_id = format!(
            "SET IDENTITY_INSERT {table} ON;
             INSERT INTO {table} (id, source_id, data_type, payload, [timestamp], metadata, storage_config_id)
             VALUES (@P1, @P2, @P3, @P4, @P5, @P6, @P7);
             SET IDENTITY_INSERT {table} OFF;"
        );
        let without_id = format!(
            "INSERT INTO {table} (source_id, data_type, payload, [timestamp], metadata, storage_config_id)
             VALUES (@P1, @P2, @P3, @P4, @P5, @P6)"
        );
        run_batch(client, "BEGIN TRANSACTION").await?;
        for record in records {
            let timestamp = record.timestamp.naive_utc();
            let metadata = record.metadata_json();
            let result = match record.id {
                Some(id) => {
                    client
                        .execute(
                            with_id.as_str(),
                            &[
                                &id,
                                &record.source_id.as_str(),
                                &record.data_type.as_str(),
                                &record.payload.as_str(),
                                &timestamp,
                                &metadata.as_deref(),
                                &record.destination_id,
                            ],
                        )
                        .await
                }
                None => {
                    client
                        .execute(
                            without_id.as_str(),
                            &[
                                &record.source_id.as_str(),
                                &record.data_type.as_str(),
                                &record.payload.as_str(),
                                &timestamp,
                                &metadata.as_deref(),
                                &record.destination_id,
                            ],
                        )
                        .await
                }
            };
            if let Err(err) = result {
                let _ = run_batch(client, "ROLLBACK TRANSACTION").await;
                return Err(err);
            }
        }
        run_batch(client, "COMMIT TRANSACTION").await
    }
}

/// 事务控制语句以普通批处理发送（不经 sp_executesql）。
async fn run_batch(client: &mut TcpClient, sql: &str) -> Result<(), tiberius::error::Error> {
    client.simple_query(sql).await?.into_results().await?;
    Ok(())
}

type TcpClient = Client<tokio_util::compat::Compat<TcpStream>>;

#[async_trait]
impl DestinationWriter for MssqlWriter {
    fn kind(&self) -> StorageKind {
        StorageKind::ExternalRelational(RelationalEngine::Mssql)
    }

    async fn write(&self, records: &[DataRecord]) -> Result<(), WriteError> {
        let mut client = self.connect().await?;
        let result = self.write_batch(&mut client, records).await;
        let _ = client.close().await;
        result.map_err(classify_tiberius)
    }

    async fn test(&self) -> Result<(), WriteError> {
        let mut client = self.connect().await?;
        let result = run_batch(&mut client, "SELECT 1").await;
        let _ = client.close().await;
        result.map_err(classify_tiberius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn table_names_are_validated() {
        assert!(is_identifier("data_records"));
        assert!(is_identifier("_t1"));
        assert!(!is_identifier("1table"));
        assert!(!is_identifier("records; drop table x"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn relational_config_requires_credentials() {
        let config = json!({
            "host": "db",
            "database": "plant",
            "user": "igw",
            "password": "secret"
        });
        let parsed = RelationalConfig::from_config(config.as_object().expect("object"), 5432)
            .expect("config");
        assert_eq!(parsed.port, 5432);
        assert_eq!(parsed.table, DEFAULT_TABLE);

        let config = json!({ "host": "db", "database": "plant", "user": "igw" });
        let err = RelationalConfig::from_config(config.as_object().expect("object"), 5432)
            .expect_err("password");
        assert!(matches!(err, WriteError::Config(_)));

        let config = json!({
            "host": "db",
            "database": "plant",
            "user": "igw",
            "password": "x",
            "table": "a-b"
        });
        assert!(RelationalConfig::from_config(config.as_object().expect("object"), 1433).is_err());
    }
}
