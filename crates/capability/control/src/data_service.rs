//! 数据管理服务
//!
//! 管理接口使用的记录写入、查询、统计、清理与导出。

use crate::error::DataServiceError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use domain::{DataRecord, DataStatus};
use igw_normalize::record_document;
use igw_pipeline::{DestinationOutcome, Destinations, FanOutReport, FanOutWriter};
use igw_storage::{DataRecordStore, StorageDefStore, StorageStatusSummary};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// CSV 导出表头。
pub const CSV_HEADER: &str = "id,sourceId,dataType,timestamp,content";

/// 记录统计。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataStats {
    pub total_records: u64,
    /// 最近 24 小时。
    pub records_today: u64,
    pub records_with_errors: u64,
}

/// 清理结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResult {
    pub deleted_count: u64,
}

#[derive(Clone)]
pub struct DataService {
    records: Arc<dyn DataRecordStore>,
    storages: Arc<dyn StorageDefStore>,
    fan_out: Arc<FanOutWriter>,
}

impl DataService {
    pub fn new(
        records: Arc<dyn DataRecordStore>,
        storages: Arc<dyn StorageDefStore>,
        fan_out: Arc<FanOutWriter>,
    ) -> Self {
        Self {
            records,
            storages,
            fan_out,
        }
    }

    /// 写入单条记录：指定目的地（如有）+ 默认存储。
    pub async fn store_data(
        &self,
        record: DataRecord,
        destination_id: Option<i64>,
    ) -> Result<FanOutReport, DataServiceError> {
        let destinations = match destination_id {
            Some(id) => Destinations::Explicit(id),
            None => Destinations::Default,
        };
        let report = self.fan_out.write(vec![record], destinations).await?;
        info!(
            target: "igw.supervisor",
            record_ids = ?report.record_ids,
            destinations = report.outcomes.len(),
            failed = report.failures().count(),
            "data_stored"
        );
        Ok(report)
    }

    /// 批量写入全部激活的存储。
    pub async fn store_batch(
        &self,
        records: Vec<DataRecord>,
    ) -> Result<FanOutReport, DataServiceError> {
        let count = records.len();
        let report = self.fan_out.write(records, Destinations::Active).await?;
        info!(
            target: "igw.supervisor",
            records = count,
            destinations = report.outcomes.len(),
            failed = report.failures().count(),
            "data_batch_stored"
        );
        Ok(report)
    }

    pub async fn get_by_source(
        &self,
        source_id: &str,
    ) -> Result<Vec<DataRecord>, DataServiceError> {
        Ok(self.records.find_by_source(source_id).await?)
    }

    pub async fn get_by_type(&self, data_type: &str) -> Result<Vec<DataRecord>, DataServiceError> {
        Ok(self.records.find_by_type(data_type).await?)
    }

    pub async fn get_recent(&self, limit: usize) -> Result<Vec<DataRecord>, DataServiceError> {
        Ok(self.records.find_recent(limit).await?)
    }

    pub async fn get_by_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DataRecord>, DataServiceError> {
        Ok(self.records.find_by_range(start, end).await?)
    }

    pub async fn stats(&self) -> Result<DataStats, DataServiceError> {
        let since = Utc::now() - ChronoDuration::hours(24);
        Ok(DataStats {
            total_records: self.records.count_all().await?,
            records_today: self.records.count_since(since).await?,
            records_with_errors: self.records.count_by_status(DataStatus::Error).await?,
        })
    }

    /// 删除采集时间早于 `days_old` 天的记录。
    pub async fn cleanup(&self, days_old: u32) -> Result<CleanupResult, DataServiceError> {
        let cutoff = cleanup_cutoff(Utc::now(), days_old);
        let deleted_count = self.records.delete_before(cutoff).await?;
        info!(target: "igw.supervisor", days_old, deleted_count, "data_cleaned_up");
        Ok(CleanupResult { deleted_count })
    }

    /// 测试单个存储的连通性，并更新其状态与 `last_tested_at`。
    pub async fn test_storage(
        &self,
        storage_id: i64,
    ) -> Result<DestinationOutcome, DataServiceError> {
        Ok(self.fan_out.test_storage(storage_id).await?)
    }

    pub async fn storage_status(&self) -> Result<StorageStatusSummary, DataServiceError> {
        Ok(self.storages.storage_status_summary().await?)
    }

    pub async fn count_by_source(&self, source_id: &str) -> Result<u64, DataServiceError> {
        Ok(self.records.count_by_source(source_id).await?)
    }

    pub async fn distinct_sources(&self) -> Result<Vec<String>, DataServiceError> {
        Ok(self.records.distinct_source_ids().await?)
    }

    pub async fn distinct_data_types(&self) -> Result<Vec<String>, DataServiceError> {
        Ok(self.records.distinct_data_types().await?)
    }

    pub async fn delete_by_source(&self, source_id: &str) -> Result<u64, DataServiceError> {
        let deleted = self.records.delete_by_source(source_id).await?;
        info!(target: "igw.supervisor", source_id = %source_id, deleted, "data_deleted_by_source");
        Ok(deleted)
    }
}

/// `days_old` 天前的时刻；超出可表示范围时取最早时刻（即不删除任何记录）。
fn cleanup_cutoff(now: DateTime<Utc>, days_old: u32) -> DateTime<Utc> {
    ChronoDuration::try_days(i64::from(days_old))
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// 格式化 JSON 导出（与写入器相同的记录文档）。
pub fn export_json(records: &[DataRecord]) -> Result<String, DataServiceError> {
    let documents: Vec<serde_json::Value> = records.iter().map(record_document).collect();
    Ok(serde_json::to_string_pretty(&documents)?)
}

/// CSV 导出；空输入返回空串。
pub fn export_csv(records: &[DataRecord]) -> String {
    if records.is_empty() {
        return String::new();
    }
    let mut out = String::from(CSV_HEADER);
    out.push('\n');
    for record in records {
        let id = record.id.map(|id| id.to_string()).unwrap_or_default();
        out.push_str(&format!(
            "{},{},{},{},{}\n",
            id,
            csv_field(&record.source_id),
            csv_field(&record.data_type),
            record.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            quote_csv(&record.payload)
        ));
    }
    out
}

fn quote_csv(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// 含分隔符、引号或换行时加引号，否则原样输出。
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        quote_csv(value)
    } else {
        value.to_string()
    }
}
