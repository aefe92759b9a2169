//! 对象存储写入器（S3 / GCS / Azure Blob / OCI）
//!
//! 每条记录上传一个 JSON 对象，键按采集日期分区。认证失败、桶或容器不存在
//! 为致命错误，网络错误可重试。OCI 经其 S3 兼容端点上传。

use crate::error::WriteError;
use crate::layout::object_key;
use crate::writer::DestinationWriter;
use async_trait::async_trait;
use domain::{ConfigMap, ConfigReader, DataRecord, ObjectStoreProvider, StorageKind};
use igw_normalize::record_document;
use object_store::ObjectStore;
use object_store::aws::AmazonS3Builder;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// 对象存储错误分类。
pub fn classify_object_store(err: object_store::Error) -> WriteError {
    let message = err.to_string();
    let fatal = match &err {
        object_store::Error::NotFound { .. }
        | object_store::Error::InvalidPath { .. }
        | object_store::Error::NotSupported { .. }
        | object_store::Error::NotImplemented
        | object_store::Error::UnknownConfigurationKey { .. } => true,
        _ => is_fatal_message(&message),
    };
    if fatal {
        WriteError::Fatal(message)
    } else {
        WriteError::Transient(message)
    }
}

fn is_fatal_message(message: &str) -> bool {
    const FATAL_MARKERS: [&str; 10] = [
        "nosuchbucket",
        "containernotfound",
        "bucketnotfound",
        "accessdenied",
        "invalidaccesskeyid",
        "signaturedoesnotmatch",
        "authenticationfailed",
        "forbidden",
        "unauthorized",
        "permission denied",
    ];
    let lower = message.to_ascii_lowercase();
    FATAL_MARKERS.iter().any(|marker| lower.contains(marker))
}

fn build_error(err: object_store::Error) -> WriteError {
    WriteError::Config(err.to_string())
}

/// 从 `AccountName=...;AccountKey=...` 连接串中取出账号与密钥。
pub fn parse_azure_connection_string(value: &str) -> Result<(String, String), WriteError> {
    let mut account = None;
    let mut key = None;
    for part in value.split(';') {
        if let Some(name) = part.trim().strip_prefix("AccountName=") {
            account = Some(name.to_string());
        } else if let Some(secret) = part.trim().strip_prefix("AccountKey=") {
            key = Some(secret.to_string());
        }
    }
    match (account, key) {
        (Some(account), Some(key)) if !account.is_empty() && !key.is_empty() => Ok((account, key)),
        _ => Err(WriteError::Config(
            "connectionString must contain AccountName= and AccountKey=".to_string(),
        )),
    }
}

/// GCS 私钥：完整服务账号 JSON 原样使用，否则与 clientEmail 拼成服务账号文档。
pub fn gcs_service_account(private_key: &str, client_email: &str, project_id: &str) -> String {
    if private_key.trim_start().starts_with('{') {
        return private_key.to_string();
    }
    json!({
        "type": "service_account",
        "project_id": project_id,
        "private_key_id": "",
        "private_key": private_key.replace("\\n", "\n"),
        "client_email": client_email,
    })
    .to_string()
}

pub fn oci_endpoint(namespace: &str, region: &str) -> String {
    format!("https://{}.compat.objectstorage.{}.oraclecloud.com", namespace, region)
}

fn build_store(
    provider: ObjectStoreProvider,
    config: &ConfigMap,
) -> Result<Arc<dyn ObjectStore>, WriteError> {
    let reader = ConfigReader::new(config);
    let store: Arc<dyn ObjectStore> = match provider {
        ObjectStoreProvider::S3 => {
            let mut builder = AmazonS3Builder::new()
                .with_bucket_name(reader.read_string("bucketName")?)
                .with_region(reader.read_string("region")?)
                .with_access_key_id(reader.read_string("accessKeyId")?)
                .with_secret_access_key(reader.read_string("secretAccessKey")?);
            if let Some(endpoint) = reader.read_optional("endpoint") {
                builder = builder.with_endpoint(endpoint);
            }
            Arc::new(builder.build().map_err(build_error)?)
        }
        ObjectStoreProvider::Gcs => {
            let project_id = reader.read_string("projectId")?;
            let client_email = reader.read_string("clientEmail")?;
            let private_key = reader.read_string("privateKey")?;
            let service_account = gcs_service_account(&private_key, &client_email, &project_id);
            let builder = GoogleCloudStorageBuilder::new()
                .with_bucket_name(reader.read_string("bucketName")?)
                .with_service_account_key(service_account);
            Arc::new(builder.build().map_err(build_error)?)
        }
        ObjectStoreProvider::Azure => {
            let connection_string = reader.read_string("connectionString")?;
            let (account, key) = parse_azure_connection_string(&connection_string)?;
            let builder = MicrosoftAzureBuilder::new()
                .with_account(account)
                .with_access_key(key)
                .with_container_name(reader.read_string("containerName")?);
            Arc::new(builder.build().map_err(build_error)?)
        }
        ObjectStoreProvider::Oci => {
            let bucket = reader.read_string("bucketName")?;
            let namespace = reader.read_string("namespace")?;
            let region = reader.read_string("region")?;
            for key in ["tenancyId", "userId", "privateKey", "fingerprint"] {
                reader.read_string(key)?;
            }
            let mut builder = AmazonS3Builder::from_env()
                .with_bucket_name(bucket)
                .with_region(region.clone())
                .with_endpoint(oci_endpoint(&namespace, &region))
                .with_virtual_hosted_style_request(false);
            if let (Some(access_key), Some(secret)) =
                (reader.read_optional("accessKeyId"), reader.read_optional("secretAccessKey"))
            {
                builder = builder
                    .with_access_key_id(access_key)
                    .with_secret_access_key(secret);
            }
            Arc::new(builder.build().map_err(build_error)?)
        }
    };
    Ok(store)
}

/// 对象存储写入器
pub struct ObjectStoreWriter {
    provider: ObjectStoreProvider,
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreWriter {
    pub fn from_config(
        provider: ObjectStoreProvider,
        config: &ConfigMap,
    ) -> Result<Self, WriteError> {
        Ok(Self {
            provider,
            store: build_store(provider, config)?,
        })
    }

    /// 直接使用现成的存储后端（如 `object_store::memory::InMemory`）。
    pub fn with_store(provider: ObjectStoreProvider, store: Arc<dyn ObjectStore>) -> Self {
        Self { provider, store }
    }
}

#[async_trait]
impl DestinationWriter for ObjectStoreWriter {
    fn kind(&self) -> StorageKind {
        StorageKind::ObjectStore(self.provider)
    }

    async fn write(&self, records: &[DataRecord]) -> Result<(), WriteError> {
        for record in records {
            let key = object_key(record);
            let body = serde_json::to_vec(&record_document(record))
                .map_err(|err| WriteError::Fatal(err.to_string()))?;
            self.store
                .put(&Path::from(key.as_str()), body.into())
                .await
                .map_err(classify_object_store)?;
            debug!(
                target: "igw.pipeline",
                key = %key,
                provider = ?self.provider,
                "object_uploaded"
            );
        }
        Ok(())
    }

    /// 列出 `data/` 前缀下一层，校验凭据与桶 / 容器。
    async fn test(&self) -> Result<(), WriteError> {
        self.store
            .list_with_delimiter(Some(&Path::from("data")))
            .await
            .map_err(classify_object_store)?;
        Ok(())
    }
}
