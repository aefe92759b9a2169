//! Modbus TCP 连接配置
//!
//! 配置键：`ipAddress, port, slaveId, registerType, startAddress, quantity,
//! pollInterval?, connectionTimeout?, maxRetries?`。数值既可以是数字也可以是字符串。

use crate::error::ProtocolError;
use domain::{ConfigFieldError, ConfigMap, ConfigReader, RegisterType};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// 寄存器类读取数量上限（0x03 / 0x04）。
pub const MAX_REGISTER_QUANTITY: u64 = 125;
/// 线圈 / 离散输入读取数量上限（0x01 / 0x02）。
pub const MAX_BIT_QUANTITY: u64 = 2000;

/// Modbus TCP 配置
#[derive(Debug, Clone, PartialEq)]
pub struct ModbusTcpConfig {
    pub ip_address: Ipv4Addr,
    pub port: u16,
    pub slave_id: u8,
    pub register_type: RegisterType,
    pub start_address: u16,
    pub quantity: u16,
    /// 轮询间隔（可以为 0，由调度方设下限）
    pub poll_interval: Duration,
    /// 连接与单次请求超时，0 表示不限
    pub connection_timeout: Duration,
    pub max_retries: u32,
}

fn config_error(err: ConfigFieldError) -> ProtocolError {
    ProtocolError::Configuration(err.to_string())
}

impl ModbusTcpConfig {
    /// 从连接配置表解析并校验。
    pub fn from_config(config: &ConfigMap) -> Result<Self, ProtocolError> {
        let reader = ConfigReader::new(config);
        let ip_raw = reader.read_string("ipAddress").map_err(config_error)?;
        let ip_address = ip_raw.parse::<Ipv4Addr>().map_err(|_| {
            ProtocolError::Configuration(format!("invalid value for ipAddress: {}", ip_raw))
        })?;
        let port = reader
            .read_u64_in_range("port", 1, 65_535)
            .map_err(config_error)? as u16;
        let slave_id = reader
            .read_u64_in_range("slaveId", 1, 255)
            .map_err(config_error)? as u8;
        let register_raw = reader.read_string("registerType").map_err(config_error)?;
        let register_type = RegisterType::parse(&register_raw).ok_or_else(|| {
            ProtocolError::Configuration(format!("invalid value for registerType: {}", register_raw))
        })?;
        let start_address = reader
            .read_u64_in_range("startAddress", 0, 65_535)
            .map_err(config_error)?;
        let max_quantity = if register_type.is_bit() {
            MAX_BIT_QUANTITY
        } else {
            MAX_REGISTER_QUANTITY
        };
        let quantity = reader
            .read_u64_in_range("quantity", 1, max_quantity)
            .map_err(config_error)?;
        if start_address + quantity > 65_536 {
            return Err(ProtocolError::Configuration(format!(
                "startAddress + quantity exceeds address space: {} + {}",
                start_address, quantity
            )));
        }
        let poll_interval = reader
            .read_u64_with_default("pollInterval", 1000)
            .map_err(config_error)?;
        let connection_timeout = reader
            .read_u64_with_default("connectionTimeout", 3000)
            .map_err(config_error)?;
        let max_retries = reader
            .read_u64_in_range_with_default("maxRetries", 0, 100, 3)
            .map_err(config_error)?;

        Ok(Self {
            ip_address,
            port,
            slave_id,
            register_type,
            start_address: start_address as u16,
            quantity: quantity as u16,
            poll_interval: Duration::from_millis(poll_interval),
            connection_timeout: Duration::from_millis(connection_timeout),
            max_retries: max_retries as u32,
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::from((self.ip_address, self.port))
    }

    /// 0 表示不设超时。
    pub fn timeout(&self) -> Option<Duration> {
        (!self.connection_timeout.is_zero()).then_some(self.connection_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn map(value: Value) -> ConfigMap {
        value.as_object().cloned().unwrap_or_default()
    }

    fn base() -> Value {
        json!({
            "ipAddress": "10.0.0.5",
            "port": 502,
            "slaveId": 1,
            "registerType": "holding",
            "startAddress": 100,
            "quantity": 3,
            "pollInterval": 1000
        })
    }

    #[test]
    fn parses_defaults() {
        let config = ModbusTcpConfig::from_config(&map(base())).expect("config");
        assert_eq!(config.socket_addr().to_string(), "10.0.0.5:502");
        assert_eq!(config.register_type, RegisterType::Holding);
        assert_eq!(config.connection_timeout, Duration::from_millis(3000));
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn quantity_boundaries_for_registers() {
        let mut value = base();
        value["quantity"] = json!(1);
        assert!(ModbusTcpConfig::from_config(&map(value.clone())).is_ok());
        value["quantity"] = json!(125);
        assert!(ModbusTcpConfig::from_config(&map(value.clone())).is_ok());
        value["quantity"] = json!(126);
        assert!(ModbusTcpConfig::from_config(&map(value.clone())).is_err());
        value["quantity"] = json!(0);
        assert!(ModbusTcpConfig::from_config(&map(value)).is_err());
    }

    #[test]
    fn coils_allow_larger_quantity() {
        let mut value = base();
        value["registerType"] = json!("coil");
        value["quantity"] = json!(2000);
        assert!(ModbusTcpConfig::from_config(&map(value)).is_ok());
    }

    #[test]
    fn rejects_bad_address_and_ranges() {
        let mut value = base();
        value["ipAddress"] = json!("plc.local");
        assert!(ModbusTcpConfig::from_config(&map(value)).is_err());

        let mut value = base();
        value["slaveId"] = json!(0);
        assert!(ModbusTcpConfig::from_config(&map(value)).is_err());

        let mut value = base();
        value["startAddress"] = json!(65_500);
        value["quantity"] = json!(100);
        assert!(ModbusTcpConfig::from_config(&map(value)).is_err());
    }
}
