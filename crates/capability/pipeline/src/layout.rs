//! 对象键与本地文件路径布局
//!
//! - 对象存储：`data/{yyyy}/{mm}/{dd}/{sourceId}/{recordId}_{dataType}.json`
//! - 本地文件：`{basePath}/{yyyy}/{mm}/{dd}/{sourceId}/{HHmmss}_{recordId}_{safeDataType}.json`
//!
//! 日期取采集时间（UTC）。

use domain::DataRecord;
use std::path::{Path, PathBuf};

pub fn record_id_label(record: &DataRecord) -> String {
    record
        .id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "pending".to_string())
}

pub fn object_key(record: &DataRecord) -> String {
    format!(
        "data/{}/{}/{}_{}.json",
        record.timestamp.format("%Y/%m/%d"),
        safe_component(&record.source_id),
        record_id_label(record),
        safe_component(&record.data_type)
    )
}

pub fn day_dir(base: &Path, record: &DataRecord) -> PathBuf {
    base.join(record.timestamp.format("%Y").to_string())
        .join(record.timestamp.format("%m").to_string())
        .join(record.timestamp.format("%d").to_string())
        .join(safe_component(&record.source_id))
}

pub fn file_name(record: &DataRecord) -> String {
    format!(
        "{}_{}_{}.json",
        record.timestamp.format("%H%M%S"),
        record_id_label(record),
        safe_component(&record.data_type)
    )
}

/// 路径分量中只保留字母数字与 `-_.`，其余替换为 `_`。
pub fn safe_component(value: &str) -> String {
    let safe: String = value
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    match safe.trim_matches('.') {
        "" => "_".to_string(),
        trimmed => trimmed.to_string(),
    }
}
