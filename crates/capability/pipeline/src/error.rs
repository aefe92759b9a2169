//! 写入错误类型定义

use igw_storage::StorageError;

/// 单个目的地的写入错误
///
/// - `Transient`：按目的地的重试策略重试
/// - `Fatal`：本条记录跳过该目的地，存储定义标记为 Error
/// - `Config`：配置缺失或非法，按致命处理
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    #[error("transient: {0}")]
    Transient(String),
    #[error("fatal: {0}")]
    Fatal(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("cancelled")]
    Cancelled,
}

impl WriteError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, WriteError::Transient(_))
    }

    /// 需要把存储定义标记为 Error。
    pub fn is_fatal(&self) -> bool {
        matches!(self, WriteError::Fatal(_) | WriteError::Config(_))
    }

    pub fn message(&self) -> String {
        match self {
            WriteError::Transient(message)
            | WriteError::Fatal(message)
            | WriteError::Config(message) => message.clone(),
            WriteError::Cancelled => "cancelled".to_string(),
        }
    }
}

/// 主键冲突、表结构错误等永久错误按致命处理，其余后端故障可重试。
impl From<StorageError> for WriteError {
    fn from(err: StorageError) -> Self {
        if err.is_permanent() {
            WriteError::Fatal(err.message().to_string())
        } else {
            WriteError::Transient(err.message().to_string())
        }
    }
}

impl From<domain::ConfigFieldError> for WriteError {
    fn from(err: domain::ConfigFieldError) -> Self {
        WriteError::Config(err.to_string())
    }
}

/// 扇出入口错误（目的地解析阶段）。
#[derive(Debug, thiserror::Error)]
pub enum FanOutError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("destination not found: {0}")]
    DestinationNotFound(i64),
}
