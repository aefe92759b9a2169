//! 存储更新结构与统计模型
//!
//! - ConnectionUpdate / StorageUpdate：部分字段更新（None 表示保持不变）
//! - StorageStatusSummary：存储配置概况

use domain::{ConfigMap, SourceType, StorageKind, StorageStatus};
use serde::Serialize;

/// 连接定义更新输入。
#[derive(Debug, Clone, Default)]
pub struct ConnectionUpdate {
    pub name: Option<String>,
    pub source_type: Option<SourceType>,
    pub config: Option<ConfigMap>,
}

/// 存储定义更新输入（默认标记只能通过 set_default 修改）。
#[derive(Debug, Clone, Default)]
pub struct StorageUpdate {
    pub name: Option<String>,
    pub kind: Option<StorageKind>,
    pub config: Option<ConfigMap>,
    pub active: Option<bool>,
}

/// 存储配置概况。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStatusSummary {
    /// 是否存在默认存储。
    pub configured: bool,
    pub default_name: Option<String>,
    pub default_type: Option<StorageKind>,
    pub default_status: Option<StorageStatus>,
    pub total: usize,
    pub active: usize,
}

impl StorageStatusSummary {
    pub fn from_defs(defs: &[domain::StorageDef]) -> Self {
        let default = defs.iter().find(|def| def.is_default);
        Self {
            configured: default.is_some(),
            default_name: default.map(|def| def.name.clone()),
            default_type: default.map(|def| def.kind),
            default_status: default.map(|def| def.status),
            total: defs.len(),
            active: defs.iter().filter(|def| def.active).count(),
        }
    }
}
