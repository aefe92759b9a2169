//! 本地文件写入器
//!
//! 每条记录一个格式化 JSON 文件。日目录创建失败时再试一次，仍失败则致命。

use crate::error::WriteError;
use crate::layout::{day_dir, file_name};
use crate::writer::DestinationWriter;
use async_trait::async_trait;
use domain::{ConfigMap, ConfigReader, DataRecord, StorageKind};
use igw_normalize::record_document;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct LocalFileWriter {
    base_path: PathBuf,
}

impl LocalFileWriter {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn from_config(config: &ConfigMap) -> Result<Self, WriteError> {
        let path = ConfigReader::new(config).read_string("path")?;
        Ok(Self::new(path))
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    async fn ensure_dir(dir: &Path) -> Result<(), WriteError> {
        if tokio::fs::create_dir_all(dir).await.is_ok() {
            return Ok(());
        }
        tokio::fs::create_dir_all(dir).await.map_err(|err| {
            WriteError::Fatal(format!("cannot create {}: {}", dir.display(), err))
        })
    }
}

#[async_trait]
impl DestinationWriter for LocalFileWriter {
    fn kind(&self) -> StorageKind {
        StorageKind::LocalFile
    }

    async fn write(&self, records: &[DataRecord]) -> Result<(), WriteError> {
        for record in records {
            let dir = day_dir(&self.base_path, record);
            Self::ensure_dir(&dir).await?;
            let path = dir.join(file_name(record));
            let content = serde_json::to_vec_pretty(&record_document(record))
                .map_err(|err| WriteError::Fatal(err.to_string()))?;
            tokio::fs::write(&path, content)
                .await
                .map_err(|err| WriteError::Transient(format!("{}: {}", path.display(), err)))?;
            debug!(target: "igw.pipeline", path = %path.display(), "local_file_written");
        }
        Ok(())
    }

    /// 根目录可创建且不是只读。
    async fn test(&self) -> Result<(), WriteError> {
        Self::ensure_dir(&self.base_path).await?;
        let metadata = tokio::fs::metadata(&self.base_path).await.map_err(|err| {
            WriteError::Fatal(format!("{}: {}", self.base_path.display(), err))
        })?;
        if metadata.permissions().readonly() {
            return Err(WriteError::Fatal(format!(
                "{} is read-only",
                self.base_path.display()
            )));
        }
        Ok(())
    }
}
