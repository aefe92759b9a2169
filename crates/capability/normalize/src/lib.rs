//! # 数据标准化能力模块
//!
//! `Transformer::transform(def, reading)` 是纯函数，不会因载荷形状失败：
//!
//! | 数据源 | 载荷 |
//! |---|---|
//! | modbus_tcp | `{register, value, registerType, quality, errorText?}` |
//! | mqtt | `{topic, payload}`，payload 能解析为 JSON 时取 JSON，否则取原始字符串 |
//! | serial | `{data, rawHex?}`，二进制帧附带大写十六进制 |
//! | api | `{data}`，规则同 mqtt |
//! | 诊断 | `{type, value, ...attributes}` |
//!
//! 所有载荷再平铺来源信息 `{connectionId, connectionName, timestamp, sourceType}`，
//! 同时保留在记录的 `provenance` 字段中（持久化为 `metadata` 列）。

use chrono::SecondsFormat;
use domain::{
    ConnectionDef, DataRecord, DataStatus, Provenance, Quality, RawReading, ReadingFields,
    SerialData,
};
use serde_json::{Map, Value, json};

/// 诊断记录的 data_type。
pub const DIAGNOSTIC_DATA_TYPE: &str = "diagnostic";

/// RawReading → DataRecord 转换器。
#[derive(Debug, Default, Clone, Copy)]
pub struct Transformer;

impl Transformer {
    pub fn new() -> Self {
        Self
    }

    pub fn transform(&self, def: &ConnectionDef, reading: &RawReading) -> DataRecord {
        let provenance = Provenance {
            connection_id: def.id.clone(),
            connection_name: def.name.clone(),
            timestamp: reading
                .captured_at
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            source_type: def.source_type,
        };
        let data_type = match &reading.fields {
            ReadingFields::Diagnostic { .. } => DIAGNOSTIC_DATA_TYPE,
            _ => def.source_type.as_str(),
        };
        let mut payload = Map::new();
        fill_payload(&mut payload, reading);
        payload.insert("connectionId".to_string(), json!(provenance.connection_id));
        payload.insert("connectionName".to_string(), json!(provenance.connection_name));
        payload.insert("timestamp".to_string(), json!(provenance.timestamp));
        payload.insert("sourceType".to_string(), json!(provenance.source_type.as_str()));

        let mut record = DataRecord::new(
            def.id.clone(),
            data_type,
            Value::Object(payload).to_string(),
            reading.captured_at,
        );
        if reading.quality == Quality::Bad {
            record.status = DataStatus::Error;
        }
        record.provenance = Some(provenance);
        record
    }

    /// 按读数顺序转换一批。
    pub fn transform_batch(&self, def: &ConnectionDef, readings: &[RawReading]) -> Vec<DataRecord> {
        readings
            .iter()
            .map(|reading| self.transform(def, reading))
            .collect()
    }
}

fn fill_payload(payload: &mut Map<String, Value>, reading: &RawReading) {
    match &reading.fields {
        ReadingFields::Register {
            register,
            value,
            register_type,
        } => {
            payload.insert("register".to_string(), json!(register));
            payload.insert("value".to_string(), json!(value));
            payload.insert("registerType".to_string(), json!(register_type.as_str()));
            payload.insert("quality".to_string(), json!(reading.quality.as_str()));
            if let Some(error_text) = &reading.error_text {
                payload.insert("errorText".to_string(), json!(error_text));
            }
        }
        ReadingFields::Topic { topic, payload: body } => {
            payload.insert("topic".to_string(), json!(topic));
            payload.insert("payload".to_string(), parse_or_text(body));
        }
        ReadingFields::Serial { data } => match data {
            SerialData::Text(text) => {
                payload.insert("data".to_string(), json!(text));
            }
            SerialData::Bytes(bytes) => {
                payload.insert("data".to_string(), json!(String::from_utf8_lossy(bytes)));
                payload.insert("rawHex".to_string(), json!(hex::encode_upper(bytes)));
            }
        },
        ReadingFields::Api { body } => {
            payload.insert("data".to_string(), parse_or_text(body.as_bytes()));
        }
        ReadingFields::Diagnostic {
            kind,
            value,
            attributes,
        } => {
            payload.insert("type".to_string(), json!(kind));
            payload.insert("value".to_string(), json!(value));
            for (key, value) in attributes {
                payload.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
    }
    if reading.quality == Quality::Bad && !payload.contains_key("quality") {
        payload.insert("quality".to_string(), json!(reading.quality.as_str()));
        if let Some(error_text) = &reading.error_text {
            payload.insert("errorText".to_string(), json!(error_text));
        }
    }
}

/// 字节能解析为 JSON 时返回 JSON，否则返回（有损）字符串。
pub fn parse_or_text(bytes: &[u8]) -> Value {
    serde_json::from_slice::<Value>(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

/// 写入器使用的统一记录文档：顶层字段 + 解析后的载荷 + 来源信息。
pub fn record_document(record: &DataRecord) -> Value {
    let mut document = Map::new();
    document.insert("id".to_string(), json!(record.id));
    document.insert("sourceId".to_string(), json!(record.source_id));
    document.insert("dataType".to_string(), json!(record.data_type));
    document.insert(
        "timestamp".to_string(),
        json!(record.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    document.insert("status".to_string(), json!(record.status.as_str()));
    document.insert("destinationId".to_string(), json!(record.destination_id));
    document.insert("content".to_string(), parse_or_text(record.payload.as_bytes()));
    if let Some(provenance) = &record.provenance {
        document.insert("metadata".to_string(), json!(provenance));
    }
    Value::Object(document)
}
