use crate::connection::SourceType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Map;

/// 读数质量。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Quality {
    Good,
    Bad,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Good => "GOOD",
            Quality::Bad => "BAD",
        }
    }
}

/// Modbus 寄存器类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterType {
    Holding,
    Input,
    Coil,
    Discrete,
}

impl RegisterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegisterType::Holding => "holding",
            RegisterType::Input => "input",
            RegisterType::Coil => "coil",
            RegisterType::Discrete => "discrete",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "holding" | "holding_register" => Some(RegisterType::Holding),
            "input" | "input_register" => Some(RegisterType::Input),
            "coil" | "coils" => Some(RegisterType::Coil),
            "discrete" | "discrete_input" => Some(RegisterType::Discrete),
            _ => None,
        }
    }

    /// 线圈 / 离散输入按位读取。
    pub fn is_bit(&self) -> bool {
        matches!(self, RegisterType::Coil | RegisterType::Discrete)
    }
}

/// 串口帧内容。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerialData {
    Text(String),
    Bytes(Vec<u8>),
}

/// 按协议区分的读数字段。
#[derive(Debug, Clone, PartialEq)]
pub enum ReadingFields {
    Register {
        register: u16,
        value: i64,
        register_type: RegisterType,
    },
    Topic {
        topic: String,
        payload: Vec<u8>,
    },
    Serial {
        data: SerialData,
    },
    Api {
        body: String,
    },
    /// 诊断信息（连接状态、订阅状态等）。
    Diagnostic {
        kind: String,
        value: String,
        attributes: Map<String, serde_json::Value>,
    },
}

/// 采集器产出的原始读数（仅内存，不直接持久化）。
#[derive(Debug, Clone, PartialEq)]
pub struct RawReading {
    pub source_id: String,
    pub protocol: SourceType,
    pub fields: ReadingFields,
    pub captured_at: DateTime<Utc>,
    pub quality: Quality,
    pub error_text: Option<String>,
}

impl RawReading {
    pub fn good(source_id: impl Into<String>, protocol: SourceType, fields: ReadingFields) -> Self {
        Self {
            source_id: source_id.into(),
            protocol,
            fields,
            captured_at: Utc::now(),
            quality: Quality::Good,
            error_text: None,
        }
    }

    pub fn bad(
        source_id: impl Into<String>,
        protocol: SourceType,
        fields: ReadingFields,
        error_text: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            protocol,
            fields,
            captured_at: Utc::now(),
            quality: Quality::Bad,
            error_text: Some(error_text.into()),
        }
    }

    pub fn diagnostic(
        source_id: impl Into<String>,
        protocol: SourceType,
        kind: impl Into<String>,
        value: impl Into<String>,
        attributes: Map<String, serde_json::Value>,
    ) -> Self {
        Self::good(
            source_id,
            protocol,
            ReadingFields::Diagnostic {
                kind: kind.into(),
                value: value.into(),
                attributes,
            },
        )
    }

    pub fn captured_at(mut self, at: DateTime<Utc>) -> Self {
        self.captured_at = at;
        self
    }
}

/// 记录处理状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataStatus {
    Received,
    Processed,
    Archived,
    Error,
}

impl DataStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataStatus::Received => "RECEIVED",
            DataStatus::Processed => "PROCESSED",
            DataStatus::Archived => "ARCHIVED",
            DataStatus::Error => "ERROR",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "RECEIVED" => Some(DataStatus::Received),
            "PROCESSED" => Some(DataStatus::Processed),
            "ARCHIVED" => Some(DataStatus::Archived),
            "ERROR" => Some(DataStatus::Error),
            _ => None,
        }
    }
}

/// 来源信息块。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    pub connection_id: String,
    pub connection_name: String,
    /// ISO-8601 采集时间。
    pub timestamp: String,
    pub source_type: SourceType,
}

/// 规范化后的数据记录。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataRecord {
    /// 持久化时分配。
    pub id: Option<i64>,
    pub source_id: String,
    pub data_type: String,
    /// UTF-8 JSON 文本。
    pub payload: String,
    /// 采集时间（非持久化时间）。
    pub timestamp: DateTime<Utc>,
    pub status: DataStatus,
    pub destination_id: Option<i64>,
    #[serde(default)]
    pub provenance: Option<Provenance>,
}

impl DataRecord {
    pub fn new(
        source_id: impl Into<String>,
        data_type: impl Into<String>,
        payload: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            source_id: source_id.into(),
            data_type: data_type.into(),
            payload: payload.into(),
            timestamp,
            status: DataStatus::Received,
            destination_id: None,
            provenance: None,
        }
    }

    /// 来源信息的 JSON 文本（对应 `metadata` 列）。
    pub fn metadata_json(&self) -> Option<String> {
        self.provenance
            .as_ref()
            .and_then(|provenance| serde_json::to_string(provenance).ok())
    }

    pub fn provenance_from_metadata(metadata: Option<&str>) -> Option<Provenance> {
        metadata.and_then(|text| serde_json::from_str(text).ok())
    }
}
