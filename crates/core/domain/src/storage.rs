//! 存储目的地定义
//!
//! `StorageKind` 是标签，`config` 是与标签对应的载荷；写入器只在匹配标签后
//! 才解析具体配置。

use crate::config::ConfigMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 外部关系库引擎。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationalEngine {
    Postgres,
    Mssql,
}

/// 对象存储服务商。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectStoreProvider {
    S3,
    Gcs,
    Azure,
    Oci,
}

/// 存储类型标签。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StorageKind {
    LocalRelational,
    ExternalRelational(RelationalEngine),
    ObjectStore(ObjectStoreProvider),
    LocalFile,
}

impl StorageKind {
    pub fn as_tag(&self) -> &'static str {
        match self {
            StorageKind::LocalRelational => "local_relational",
            StorageKind::ExternalRelational(RelationalEngine::Postgres) => "postgres",
            StorageKind::ExternalRelational(RelationalEngine::Mssql) => "mssql",
            StorageKind::ObjectStore(ObjectStoreProvider::S3) => "s3",
            StorageKind::ObjectStore(ObjectStoreProvider::Gcs) => "gcs",
            StorageKind::ObjectStore(ObjectStoreProvider::Azure) => "azure",
            StorageKind::ObjectStore(ObjectStoreProvider::Oci) => "oci",
            StorageKind::LocalFile => "local_file",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        let kind = match tag.trim().to_ascii_lowercase().as_str() {
            "local_relational" | "local_db" => StorageKind::LocalRelational,
            "postgres" | "postgresql" => StorageKind::ExternalRelational(RelationalEngine::Postgres),
            "mssql" | "sqlserver" => StorageKind::ExternalRelational(RelationalEngine::Mssql),
            "s3" | "aws_s3" => StorageKind::ObjectStore(ObjectStoreProvider::S3),
            "gcs" | "google_cloud_storage" => StorageKind::ObjectStore(ObjectStoreProvider::Gcs),
            "azure" | "azure_blob_storage" => StorageKind::ObjectStore(ObjectStoreProvider::Azure),
            "oci" | "oracle_cloud" => StorageKind::ObjectStore(ObjectStoreProvider::Oci),
            "local_file" | "local" => StorageKind::LocalFile,
            _ => return None,
        };
        Some(kind)
    }

    /// 本地目的地（需要单线程有序写入）。
    pub fn is_local(&self) -> bool {
        matches!(self, StorageKind::LocalRelational | StorageKind::LocalFile)
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

impl TryFrom<String> for StorageKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        StorageKind::from_tag(&value).ok_or_else(|| format!("unsupported storage type: {}", value))
    }
}

impl From<StorageKind> for String {
    fn from(kind: StorageKind) -> Self {
        kind.as_tag().to_string()
    }
}

/// 存储目的地状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageStatus {
    Configured,
    Active,
    Inactive,
    Error,
    Testing,
}

impl StorageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageStatus::Configured => "configured",
            StorageStatus::Active => "active",
            StorageStatus::Inactive => "inactive",
            StorageStatus::Error => "error",
            StorageStatus::Testing => "testing",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "configured" => Some(StorageStatus::Configured),
            "active" => Some(StorageStatus::Active),
            "inactive" => Some(StorageStatus::Inactive),
            "error" => Some(StorageStatus::Error),
            "testing" => Some(StorageStatus::Testing),
            _ => None,
        }
    }
}

/// 存储目的地定义。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageDef {
    pub id: i64,
    pub name: String,
    pub kind: StorageKind,
    pub config: ConfigMap,
    pub active: bool,
    pub is_default: bool,
    pub status: StorageStatus,
    pub last_error: Option<String>,
    pub last_tested_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl StorageDef {
    /// 构造待创建的存储定义（id 由注册表分配）。
    pub fn new(name: impl Into<String>, kind: StorageKind, config: ConfigMap) -> Self {
        Self {
            id: 0,
            name: name.into(),
            kind,
            config,
            active: true,
            is_default: false,
            status: StorageStatus::Configured,
            last_error: None,
            last_tested_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_kind_serializes_as_tag() {
        let kind = StorageKind::ObjectStore(ObjectStoreProvider::Gcs);
        let json = serde_json::to_string(&kind).expect("serialize");
        assert_eq!(json, "\"gcs\"");
        let back: StorageKind = serde_json::from_str("\"aws_s3\"").expect("alias");
        assert_eq!(back, StorageKind::ObjectStore(ObjectStoreProvider::S3));
        assert!(serde_json::from_str::<StorageKind>("\"ftp\"").is_err());
    }
}
