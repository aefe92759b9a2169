//! # 数据接入能力模块
//!
//! 每种数据源实现同一套 `Collector` 能力集：
//! - **modbus**：Modbus TCP 轮询（基于 `igw-protocol` 状态机）
//! - **mqtt**：订阅 + 按主题保存最新值
//! - **serial**：串口字节流按分隔符切帧
//! - **api**：HTTP GET 轮询 / POST 写入
//!
//! 采集器通过 `StatusSink` 把状态变化交给监督器，自身不访问注册表。

mod api;
mod collector;
mod error;
mod factory;
mod modbus;
mod mqtt;
mod serial;

pub use api::{ApiCollector, ApiConfig};
pub use collector::{Collector, StatusSink};
pub use error::CollectorError;
pub use factory::{CollectorConstructor, CollectorFactory};
pub use modbus::ModbusCollector;
pub use mqtt::{LatestValueMap, MqttCollector, MqttConfig};
pub use serial::{FRAME_BUFFER_CAPACITY, FrameBuffer, FrameDecoder, Parity, SerialCollector, SerialConfig};
