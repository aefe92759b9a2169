//! 不透明配置表与类型化读取
//!
//! 注册表层只保存 `ConfigMap`，具体采集器 / 写入器在使用前通过
//! `ConfigReader` 解析为强类型结构。前端提交的值可能是字符串、数字或布尔，
//! 读取函数同时接受 `"502"` 与 `502`。

use serde_json::{Map, Value};

/// 连接 / 存储的配置表。
pub type ConfigMap = Map<String, Value>;

/// 配置字段错误。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigFieldError {
    #[error("missing config key: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 只读配置访问器。
#[derive(Debug, Clone, Copy)]
pub struct ConfigReader<'a> {
    map: &'a ConfigMap,
}

impl<'a> ConfigReader<'a> {
    pub fn new(map: &'a ConfigMap) -> Self {
        Self { map }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.get(key).is_some_and(|value| !is_blank(value))
    }

    /// 读取必填字符串（空串视为缺失）。
    pub fn read_string(&self, key: &str) -> Result<String, ConfigFieldError> {
        self.read_optional(key)
            .ok_or_else(|| ConfigFieldError::Missing(key.to_string()))
    }

    pub fn read_optional(&self, key: &str) -> Option<String> {
        match self.map.get(key)? {
            Value::String(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
            Value::Number(value) => Some(value.to_string()),
            Value::Bool(value) => Some(value.to_string()),
            _ => None,
        }
    }

    pub fn read_string_with_default(&self, key: &str, default: &str) -> String {
        self.read_optional(key)
            .unwrap_or_else(|| default.to_string())
    }

    pub fn read_u64(&self, key: &str) -> Result<u64, ConfigFieldError> {
        let raw = self.read_string(key)?;
        raw.parse::<u64>()
            .map_err(|_| ConfigFieldError::Invalid(key.to_string(), raw))
    }

    pub fn read_u64_with_default(&self, key: &str, default: u64) -> Result<u64, ConfigFieldError> {
        if !self.contains(key) {
            return Ok(default);
        }
        self.read_u64(key)
    }

    /// 读取整数并校验闭区间。
    pub fn read_u64_in_range(
        &self,
        key: &str,
        min: u64,
        max: u64,
    ) -> Result<u64, ConfigFieldError> {
        let value = self.read_u64(key)?;
        ensure_range(key, value, min, max)
    }

    pub fn read_u64_in_range_with_default(
        &self,
        key: &str,
        min: u64,
        max: u64,
        default: u64,
    ) -> Result<u64, ConfigFieldError> {
        let value = self.read_u64_with_default(key, default)?;
        ensure_range(key, value, min, max)
    }

    pub fn read_bool_with_default(&self, key: &str, default: bool) -> bool {
        match self.map.get(key) {
            Some(Value::Bool(value)) => *value,
            Some(Value::Number(value)) => value.as_u64().is_some_and(|value| value != 0),
            Some(Value::String(value)) => {
                matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on")
            }
            _ => default,
        }
    }

    /// 读取字符串到字符串的子表（如 HTTP 头）。
    pub fn read_string_map(&self, key: &str) -> Vec<(String, String)> {
        match self.map.get(key) {
            Some(Value::Object(entries)) => entries
                .iter()
                .filter_map(|(name, value)| match value {
                    Value::String(value) => Some((name.clone(), value.clone())),
                    Value::Number(value) => Some((name.clone(), value.to_string())),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

fn ensure_range(key: &str, value: u64, min: u64, max: u64) -> Result<u64, ConfigFieldError> {
    if value < min || value > max {
        return Err(ConfigFieldError::Invalid(
            key.to_string(),
            format!("{} not in [{}, {}]", value, min, max),
        ));
    }
    Ok(value)
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(value) => value.trim().is_empty(),
        _ => false,
    }
}
