//! # PostgreSQL 存储实现模块
//!
//! - **ConnectionStore** (`connection_def.rs`)：连接注册表，状态更新在事务内加行锁
//! - **StorageDefStore** (`storage_def.rs`)：存储注册表，默认切换为单条 update
//! - **DataRecordStore** (`data_record.rs`)：本地 data_records
//!
//! 配置表以 JSON 文本存放在 `config` 列，读取时解析为 `ConfigMap`；
//! 所有 SQL 使用参数绑定。表结构见 `schema.rs`。

pub mod connection_def;
pub mod data_record;
pub mod storage_def;

pub use connection_def::*;
pub use data_record::*;
pub use storage_def::*;

use crate::error::StorageError;
use domain::ConfigMap;

pub(crate) fn config_from_text(text: &str) -> Result<ConfigMap, StorageError> {
    if text.trim().is_empty() {
        return Ok(ConfigMap::new());
    }
    Ok(serde_json::from_str(text)?)
}

pub(crate) fn config_to_text(config: &ConfigMap) -> Result<String, StorageError> {
    Ok(serde_json::to_string(config)?)
}
