//! # 协议通信能力模块
//!
//! Modbus TCP 采集的协议层：
//! - **config**：连接配置解析与校验
//! - **transport**：会话抽象与 tokio-modbus 实现
//! - **poller**：连接 / 轮询 / 重连状态机
//!
//! ## 配置格式
//!
//! ```json
//! {
//!   "ipAddress": "10.0.0.5", "port": 502, "slaveId": 1,
//!   "registerType": "holding", "startAddress": 100, "quantity": 3,
//!   "pollInterval": 1000, "connectionTimeout": 3000, "maxRetries": 3
//! }
//! ```

mod config;
mod error;
mod poller;
mod transport;

pub use config::{MAX_BIT_QUANTITY, MAX_REGISTER_QUANTITY, ModbusTcpConfig};
pub use error::ProtocolError;
pub use poller::{BAD_VALUE, ModbusTcpPoller, PollerState, RegisterSample};
pub use transport::{RegisterTransport, TcpConnector, TcpTransport, TransportConnector};
