//! 数据源连接定义与运行状态

use crate::config::ConfigMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 数据源类型（注册表边界上的标签）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    ModbusTcp,
    Mqtt,
    Serial,
    Api,
}

impl SourceType {
    pub const ALL: [SourceType; 4] = [
        SourceType::ModbusTcp,
        SourceType::Mqtt,
        SourceType::Serial,
        SourceType::Api,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::ModbusTcp => "modbus_tcp",
            SourceType::Mqtt => "mqtt",
            SourceType::Serial => "serial",
            SourceType::Api => "api",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 未知的数据源类型标签。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported source type: {0}")]
pub struct UnknownSourceType(pub String);

impl FromStr for SourceType {
    type Err = UnknownSourceType;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "modbus_tcp" | "modbus" => Ok(SourceType::ModbusTcp),
            "mqtt" => Ok(SourceType::Mqtt),
            "serial" => Ok(SourceType::Serial),
            "api" | "rest" => Ok(SourceType::Api),
            other => Err(UnknownSourceType(other.to_string())),
        }
    }
}

/// 连接在注册表中的最近状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Offline,
    Connecting,
    Active,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Offline => "offline",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Active => "active",
            ConnectionStatus::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "offline" => Some(ConnectionStatus::Offline),
            "connecting" => Some(ConnectionStatus::Connecting),
            "active" => Some(ConnectionStatus::Active),
            "error" => Some(ConnectionStatus::Error),
            _ => None,
        }
    }

    /// 同一会话内是否允许从 `self` 迁移到 `next`。
    pub fn can_transition_to(&self, next: ConnectionStatus) -> bool {
        use ConnectionStatus::*;
        match (self, next) {
            (from, to) if *from == to => true,
            (Offline, Connecting) => true,
            (Connecting, Active | Error | Offline) => true,
            (Active, Error | Offline) => true,
            (Error, Active | Connecting | Offline) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 数据源连接定义。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDef {
    pub id: String,
    pub name: String,
    pub source_type: SourceType,
    pub config: ConfigMap,
    pub status: ConnectionStatus,
    pub last_error: Option<String>,
    pub last_connected_at: Option<DateTime<Utc>>,
    /// 最近一次写入状态的监督器会话号。
    pub status_epoch: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConnectionDef {
    /// 构造新的离线连接定义。
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        source_type: SourceType,
        config: ConfigMap,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            source_type,
            config,
            status: ConnectionStatus::Offline,
            last_error: None,
            last_connected_at: None,
            status_epoch: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// 采集器上报给监督器的状态变化。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub connection_id: String,
    pub epoch: u64,
    pub status: ConnectionStatus,
    pub error: Option<String>,
}

impl StatusUpdate {
    pub fn new(connection_id: impl Into<String>, epoch: u64, status: ConnectionStatus) -> Self {
        Self {
            connection_id: connection_id.into(),
            epoch,
            status,
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// 采集句柄的运行态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectorState {
    Init,
    Running,
    Degraded,
    Stopping,
    Stopped,
}
