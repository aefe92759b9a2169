//! Modbus TCP 轮询状态机
//!
//! ```text
//! Init ─new─▶ Ready ─connect─▶ Connecting ─ok─▶ Polling
//! Connecting ─fail─▶ Error ─(重试)─▶ Connecting
//! Polling ─传输错误─▶ Reconnecting ─ok─▶ Polling
//! Polling ─stop─▶ Stopping ─▶ Stopped
//! ```
//!
//! 每次 `poll` 读取 `startAddress..startAddress+quantity`：
//! - 成功：每个寄存器一条 GOOD 样本
//! - 传输错误：按重试策略重试，耗尽后产出一条 BAD 样本（value = -999）并进入 Reconnecting
//! - 从站异常：不重试，产出一条 BAD 样本，保持 Polling

use crate::config::ModbusTcpConfig;
use crate::error::ProtocolError;
use crate::transport::{RegisterTransport, TransportConnector};
use domain::{Quality, RegisterType};
use igw_retry::{RetryError, RetryStrategy};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 读取失败时 BAD 样本的占位值。
pub const BAD_VALUE: i64 = -999;

/// 轮询器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Init,
    Ready,
    Connecting,
    Polling,
    Error,
    Reconnecting,
    Stopping,
    Stopped,
}

impl PollerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollerState::Init => "INIT",
            PollerState::Ready => "READY",
            PollerState::Connecting => "CONNECTING",
            PollerState::Polling => "POLLING",
            PollerState::Error => "ERROR",
            PollerState::Reconnecting => "RECONNECTING",
            PollerState::Stopping => "STOPPING",
            PollerState::Stopped => "STOPPED",
        }
    }
}

/// 单个寄存器样本
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterSample {
    pub register: u16,
    pub value: i64,
    pub register_type: RegisterType,
    pub quality: Quality,
    pub error_text: Option<String>,
}

/// Modbus TCP 轮询器
pub struct ModbusTcpPoller {
    config: ModbusTcpConfig,
    connector: Arc<dyn TransportConnector>,
    retry: RetryStrategy,
    transport: Mutex<Option<Box<dyn RegisterTransport>>>,
    state: std::sync::Mutex<PollerState>,
}

impl ModbusTcpPoller {
    pub fn new(config: ModbusTcpConfig, connector: Arc<dyn TransportConnector>) -> Self {
        let retry = RetryStrategy::default().with_max_retries(config.max_retries);
        Self {
            config,
            connector,
            retry,
            transport: Mutex::new(None),
            state: std::sync::Mutex::new(PollerState::Ready),
        }
    }

    /// 覆盖默认重试策略（次数仍取配置中的 maxRetries）。
    pub fn with_retry(mut self, retry: RetryStrategy) -> Self {
        self.retry = retry.with_max_retries(self.config.max_retries);
        self
    }

    pub fn config(&self) -> &ModbusTcpConfig {
        &self.config
    }

    pub fn state(&self) -> PollerState {
        self.state
            .lock()
            .map(|state| *state)
            .unwrap_or(PollerState::Error)
    }

    fn set_state(&self, next: PollerState) {
        if let Ok(mut state) = self.state.lock() {
            if *state != next {
                debug!(
                    target: "igw.protocol",
                    from = state.as_str(),
                    to = next.as_str(),
                    "modbus_state_changed"
                );
                *state = next;
            }
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.transport.lock().await.is_some()
    }

    /// 建立连接（带重试）；失败后停留在 Error。
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<(), ProtocolError> {
        self.set_state(PollerState::Connecting);
        let result = self
            .retry
            .execute(
                cancel,
                move || async move {
                    let transport = self.connector.connect(&self.config).await;
                    if transport.is_err() {
                        self.set_state(PollerState::Error);
                    }
                    transport
                },
                ProtocolError::is_retryable,
            )
            .await;
        match result {
            Ok(transport) => {
                *self.transport.lock().await = Some(transport);
                self.set_state(PollerState::Polling);
                info!(
                    target: "igw.protocol",
                    addr = %self.config.socket_addr(),
                    slave_id = self.config.slave_id,
                    "modbus_connected"
                );
                Ok(())
            }
            Err(RetryError::Cancelled) => Err(ProtocolError::Cancelled),
            Err(RetryError::Failed { last_error, .. }) => {
                self.set_state(PollerState::Error);
                Err(last_error)
            }
        }
    }

    /// 执行一次轮询。
    ///
    /// 只有配置错误与取消返回 `Err`，其余失败都以 BAD 样本表示。
    pub async fn poll(&self, cancel: &CancellationToken) -> Result<Vec<RegisterSample>, ProtocolError> {
        match self.state() {
            PollerState::Stopping | PollerState::Stopped => return Err(ProtocolError::NotConnected),
            _ => {}
        }
        let register_type = self.config.register_type;
        let start = self.config.start_address;
        let quantity = self.config.quantity;
        let result = self
            .retry
            .execute(
                cancel,
                move || async move {
                    let mut guard = self.transport.lock().await;
                    if guard.is_none() {
                        *guard = Some(self.connector.connect(&self.config).await?);
                    }
                    let Some(transport) = guard.as_mut() else {
                        return Err(ProtocolError::NotConnected);
                    };
                    let read = transport.read(register_type, start, quantity).await;
                    if read.as_ref().is_err_and(ProtocolError::is_transport) {
                        // 会话已不可用，下一次尝试重新建立。
                        *guard = None;
                    }
                    read
                },
                ProtocolError::is_retryable,
            )
            .await;

        match result {
            Ok(words) => {
                if self.state() != PollerState::Polling {
                    info!(target: "igw.protocol", addr = %self.config.socket_addr(), "modbus_reconnected");
                }
                self.set_state(PollerState::Polling);
                Ok(words
                    .into_iter()
                    .enumerate()
                    .map(|(offset, word)| RegisterSample {
                        register: start.wrapping_add(offset as u16),
                        value: i64::from(word),
                        register_type,
                        quality: Quality::Good,
                        error_text: None,
                    })
                    .collect())
            }
            Err(RetryError::Cancelled) => Err(ProtocolError::Cancelled),
            Err(RetryError::Failed { last_error, attempts }) => {
                if last_error.is_configuration() {
                    self.set_state(PollerState::Error);
                    return Err(last_error);
                }
                if last_error.is_transport() {
                    self.set_state(PollerState::Reconnecting);
                }
                warn!(
                    target: "igw.protocol",
                    addr = %self.config.socket_addr(),
                    register = start,
                    attempts,
                    error = %last_error,
                    "modbus_read_failed"
                );
                Ok(vec![RegisterSample {
                    register: start,
                    value: BAD_VALUE,
                    register_type,
                    quality: Quality::Bad,
                    error_text: Some(last_error.to_string()),
                }])
            }
        }
    }

    /// 写单个保持寄存器（单次事务，不重试）。
    pub async fn write_register(&self, address: u16, value: u16) -> Result<(), ProtocolError> {
        let mut guard = self.transport.lock().await;
        let transport = guard.as_mut().ok_or(ProtocolError::NotConnected)?;
        let result = transport.write_register(address, value).await;
        if result.as_ref().is_err_and(ProtocolError::is_transport) {
            *guard = None;
        }
        result
    }

    /// 写单个线圈（单次事务，不重试）。
    pub async fn write_coil(&self, address: u16, value: bool) -> Result<(), ProtocolError> {
        let mut guard = self.transport.lock().await;
        let transport = guard.as_mut().ok_or(ProtocolError::NotConnected)?;
        let result = transport.write_coil(address, value).await;
        if result.as_ref().is_err_and(ProtocolError::is_transport) {
            *guard = None;
        }
        result
    }

    /// 临时建连再断开，验证设备可达。
    pub async fn test(&self) -> bool {
        match self.connector.connect(&self.config).await {
            Ok(mut transport) => {
                let _ = transport.disconnect().await;
                true
            }
            Err(err) => {
                debug!(target: "igw.protocol", addr = %self.config.socket_addr(), error = %err, "modbus_test_failed");
                false
            }
        }
    }

    /// 断开会话并进入 Stopped。
    pub async fn stop(&self) {
        self.set_state(PollerState::Stopping);
        let transport = self.transport.lock().await.take();
        if let Some(mut transport) = transport {
            if let Err(err) = transport.disconnect().await {
                debug!(target: "igw.protocol", error = %err, "modbus_disconnect_failed");
            }
        }
        self.set_state(PollerState::Stopped);
    }
}
