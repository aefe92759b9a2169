//! 协议错误类型定义
//!
//! 分类规则：
//! - 可重试：连接失败、连接超时、设备忙、传输 IO
//! - 传输类（重试耗尽后进入 Reconnecting）：连接失败、超时、IO、未连接
//! - 从站异常（不重试，产出 BAD 读数后继续轮询）：其余设备上报的错误
//! - 配置错误：致命

use tokio_modbus::ExceptionCode;

/// Modbus 通信错误
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// 连接失败
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// 连接或请求超时
    #[error("timeout")]
    ConnectionTimeout,

    /// IO 错误
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// 尚未建立连接
    #[error("not connected")]
    NotConnected,

    /// 响应格式不合法
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// 从站忙（0x05 / 0x06）
    #[error("device busy: {0}")]
    DeviceBusy(String),

    /// 非法地址或数据值（0x02 / 0x03）
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// 不支持的功能码（0x01）
    #[error("unsupported function: {0}")]
    UnsupportedFunction(String),

    /// 写入只读寄存器类型
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// 网关路径 / 目标设备不可达（0x0A / 0x0B）
    #[error("device failure: {0}")]
    DeviceFailure(String),

    /// 从站设备故障（0x04）
    #[error("slave device failure: {0}")]
    SlaveDeviceFailure(String),

    /// 配置错误
    #[error("configuration error: {0}")]
    Configuration(String),

    /// 操作被取消
    #[error("cancelled")]
    Cancelled,
}

impl ProtocolError {
    /// 是否值得按重试策略再次尝试。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProtocolError::ConnectionFailed(_)
                | ProtocolError::ConnectionTimeout
                | ProtocolError::DeviceBusy(_)
                | ProtocolError::Io(_)
                | ProtocolError::NotConnected
        )
    }

    /// 传输层错误：当前连接不可再用。
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ProtocolError::ConnectionFailed(_)
                | ProtocolError::ConnectionTimeout
                | ProtocolError::Io(_)
                | ProtocolError::NotConnected
        )
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, ProtocolError::Configuration(_))
    }

    /// 从站上报的异常码。
    pub fn from_exception(code: ExceptionCode) -> Self {
        let detail = format!("{:?}", code);
        match code {
            ExceptionCode::IllegalFunction => ProtocolError::UnsupportedFunction(detail),
            ExceptionCode::IllegalDataAddress | ExceptionCode::IllegalDataValue => {
                ProtocolError::InvalidData(detail)
            }
            ExceptionCode::ServerDeviceFailure => ProtocolError::SlaveDeviceFailure(detail),
            ExceptionCode::Acknowledge | ExceptionCode::ServerDeviceBusy => {
                ProtocolError::DeviceBusy(detail)
            }
            ExceptionCode::GatewayPathUnavailable | ExceptionCode::GatewayTargetDevice => {
                ProtocolError::DeviceFailure(detail)
            }
            _ => ProtocolError::InvalidResponse(detail),
        }
    }

    /// 客户端库的传输 / 协议错误。
    pub fn from_client(err: tokio_modbus::Error) -> Self {
        match err {
            tokio_modbus::Error::Transport(io) if io.kind() == std::io::ErrorKind::TimedOut => {
                ProtocolError::ConnectionTimeout
            }
            tokio_modbus::Error::Transport(io) => ProtocolError::Io(io),
            other => ProtocolError::InvalidResponse(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exceptions_are_not_retried() {
        let busy = ProtocolError::from_exception(ExceptionCode::ServerDeviceBusy);
        assert!(busy.is_retryable());
        assert!(!busy.is_transport());

        let illegal = ProtocolError::from_exception(ExceptionCode::IllegalFunction);
        assert!(matches!(illegal, ProtocolError::UnsupportedFunction(_)));
        assert!(!illegal.is_retryable());

        let address = ProtocolError::from_exception(ExceptionCode::IllegalDataAddress);
        assert!(matches!(address, ProtocolError::InvalidData(_)));
    }

    #[test]
    fn timeout_reads_as_timeout() {
        assert_eq!(ProtocolError::ConnectionTimeout.to_string(), "timeout");
        assert!(ProtocolError::ConnectionTimeout.is_transport());
    }
}
