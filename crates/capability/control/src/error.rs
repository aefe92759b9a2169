//! 控制层错误类型定义

use domain::SourceType;
use igw_ingest::CollectorError;
use igw_pipeline::FanOutError;
use igw_storage::StorageError;

/// 监督器错误
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("connection already running: {0}")]
    AlreadyRunning(String),

    /// 连接没有运行中的采集句柄（重复 stop 时返回）
    #[error("connection not running: {0}")]
    NotRunning(String),

    #[error("connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("unsupported source type: {0}")]
    UnsupportedSourceType(SourceType),

    #[error("collector error: {0}")]
    Collector(CollectorError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// 监督器已进入关闭流程
    #[error("supervisor is shutting down")]
    ShuttingDown,
}

impl From<CollectorError> for SupervisorError {
    fn from(err: CollectorError) -> Self {
        match err {
            CollectorError::UnsupportedSourceType(source_type) => {
                SupervisorError::UnsupportedSourceType(source_type)
            }
            other => SupervisorError::Collector(other),
        }
    }
}

/// 数据管理服务错误
#[derive(Debug, thiserror::Error)]
pub enum DataServiceError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("fan-out error: {0}")]
    FanOut(#[from] FanOutError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
