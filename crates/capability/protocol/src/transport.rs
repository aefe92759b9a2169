//! Modbus 传输抽象
//!
//! 轮询状态机只依赖 `RegisterTransport` / `TransportConnector`，
//! 生产环境使用基于 tokio-modbus 的 `TcpConnector`。

use crate::config::ModbusTcpConfig;
use crate::error::ProtocolError;
use async_trait::async_trait;
use domain::RegisterType;
use std::future::Future;
use std::time::Duration;
use tokio_modbus::client::{Client, Context, Reader, Writer, tcp};
use tokio_modbus::Slave;

/// 已建立的 Modbus 会话。
#[async_trait]
pub trait RegisterTransport: Send {
    /// 读取寄存器；线圈 / 离散输入按 1 / 0 返回。
    async fn read(
        &mut self,
        register_type: RegisterType,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, ProtocolError>;

    async fn write_register(&mut self, address: u16, value: u16) -> Result<(), ProtocolError>;

    async fn write_coil(&mut self, address: u16, value: bool) -> Result<(), ProtocolError>;

    async fn disconnect(&mut self) -> Result<(), ProtocolError>;
}

/// 会话工厂。
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(
        &self,
        config: &ModbusTcpConfig,
    ) -> Result<Box<dyn RegisterTransport>, ProtocolError>;
}

/// tokio-modbus TCP 连接器
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

#[async_trait]
impl TransportConnector for TcpConnector {
    async fn connect(
        &self,
        config: &ModbusTcpConfig,
    ) -> Result<Box<dyn RegisterTransport>, ProtocolError> {
        let addr = config.socket_addr();
        let ctx = with_timeout(config.timeout(), async {
            tcp::connect_slave(addr, Slave(config.slave_id))
                .await
                .map_err(|err| ProtocolError::ConnectionFailed(format!("{}: {}", addr, err)))
        })
        .await?;
        Ok(Box::new(TcpTransport {
            ctx,
            timeout: config.timeout(),
        }))
    }
}

/// 基于 tokio-modbus `Context` 的会话
pub struct TcpTransport {
    ctx: Context,
    timeout: Option<Duration>,
}

async fn with_timeout<T, F>(timeout: Option<Duration>, fut: F) -> Result<T, ProtocolError>
where
    F: Future<Output = Result<T, ProtocolError>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| ProtocolError::ConnectionTimeout)?,
        None => fut.await,
    }
}

fn bits_to_words(bits: Vec<bool>, quantity: u16) -> Vec<u16> {
    // 线圈响应按字节补齐，截掉多余的位。
    bits.into_iter()
        .take(quantity as usize)
        .map(u16::from)
        .collect()
}

#[async_trait]
impl RegisterTransport for TcpTransport {
    async fn read(
        &mut self,
        register_type: RegisterType,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, ProtocolError> {
        let timeout = self.timeout;
        let ctx = &mut self.ctx;
        with_timeout(timeout, async move {
            let words = match register_type {
                RegisterType::Holding => ctx
                    .read_holding_registers(address, quantity)
                    .await
                    .map_err(ProtocolError::from_client)?
                    .map_err(ProtocolError::from_exception)?,
                RegisterType::Input => ctx
                    .read_input_registers(address, quantity)
                    .await
                    .map_err(ProtocolError::from_client)?
                    .map_err(ProtocolError::from_exception)?,
                RegisterType::Coil => {
                    let bits = ctx
                        .read_coils(address, quantity)
                        .await
                        .map_err(ProtocolError::from_client)?
                        .map_err(ProtocolError::from_exception)?;
                    bits_to_words(bits, quantity)
                }
                RegisterType::Discrete => {
                    let bits = ctx
                        .read_discrete_inputs(address, quantity)
                        .await
                        .map_err(ProtocolError::from_client)?
                        .map_err(ProtocolError::from_exception)?;
                    bits_to_words(bits, quantity)
                }
            };
            if words.len() != quantity as usize {
                return Err(ProtocolError::InvalidResponse(format!(
                    "expected {} values, got {}",
                    quantity,
                    words.len()
                )));
            }
            Ok(words)
        })
        .await
    }

    async fn write_register(&mut self, address: u16, value: u16) -> Result<(), ProtocolError> {
        let timeout = self.timeout;
        let ctx = &mut self.ctx;
        with_timeout(timeout, async move {
            ctx.write_single_register(address, value)
                .await
                .map_err(ProtocolError::from_client)?
                .map_err(ProtocolError::from_exception)
        })
        .await
    }

    async fn write_coil(&mut self, address: u16, value: bool) -> Result<(), ProtocolError> {
        let timeout = self.timeout;
        let ctx = &mut self.ctx;
        with_timeout(timeout, async move {
            ctx.write_single_coil(address, value)
                .await
                .map_err(ProtocolError::from_client)?
                .map_err(ProtocolError::from_exception)
        })
        .await
    }

    async fn disconnect(&mut self) -> Result<(), ProtocolError> {
        self.ctx.disconnect().await.map_err(ProtocolError::Io)
    }
}
