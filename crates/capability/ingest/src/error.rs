//! 采集错误类型定义

use domain::{ConfigFieldError, SourceType};
use igw_protocol::ProtocolError;

/// 采集器错误
///
/// `is_fatal` 为真时监督器将连接标记为 Error 并停止轮询任务，
/// 其余错误记录日志后在下一个周期继续。
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    /// 配置缺失或非法
    #[error("configuration error: {0}")]
    Config(String),

    /// 传输层瞬时错误
    #[error("transport error: {0}")]
    Transport(String),

    /// 不可恢复错误（认证失败、重试耗尽后仍不可达等）
    #[error("fatal error: {0}")]
    Fatal(String),

    #[error("collector not initialized")]
    NotInitialized,

    /// 当前数据源不支持的操作
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("unsupported source type: {0}")]
    UnsupportedSourceType(SourceType),

    #[error("cancelled")]
    Cancelled,
}

impl CollectorError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CollectorError::Config(_)
                | CollectorError::Fatal(_)
                | CollectorError::NotInitialized
                | CollectorError::UnsupportedSourceType(_)
        )
    }
}

impl From<ConfigFieldError> for CollectorError {
    fn from(err: ConfigFieldError) -> Self {
        CollectorError::Config(err.to_string())
    }
}

impl From<ProtocolError> for CollectorError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Configuration(message) => CollectorError::Config(message),
            ProtocolError::Cancelled => CollectorError::Cancelled,
            ProtocolError::AccessDenied(message) | ProtocolError::UnsupportedFunction(message) => {
                CollectorError::Unsupported(message)
            }
            other => CollectorError::Transport(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_errors_map_to_collector_taxonomy() {
        let err: CollectorError = ProtocolError::Configuration("port".to_string()).into();
        assert!(err.is_fatal());
        let err: CollectorError = ProtocolError::ConnectionTimeout.into();
        assert!(matches!(err, CollectorError::Transport(_)));
        assert!(!err.is_fatal());
        let err: CollectorError = ProtocolError::Cancelled.into();
        assert!(matches!(err, CollectorError::Cancelled));
    }
}
