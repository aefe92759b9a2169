//! 多目的地扇出写入
//!
//! 一批记录先统一分配 id，再按目的地复制（各带 `destination_id`）并发写入。
//! 每个目的地独立重试、独立成败，已提交的目的地不会因其它目的地失败而回滚。
//! 本地目的地（LocalRelational / LocalFile）按目的地串行写入，
//! 保证同一来源的记录按产生顺序落盘。

use crate::error::{FanOutError, WriteError};
use crate::writer::{DestinationWriter, WriterFactory};
use domain::{DataRecord, StorageDef, StorageKind, StorageStatus};
use futures::future::join_all;
use igw_retry::{RetryError, RetryStrategy};
use igw_storage::{DataRecordStore, StorageDefStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 默认并发写入上限。
pub const DEFAULT_WRITER_CONCURRENCY: usize = 4;

/// 按目的地类别选择的重试策略。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub local: RetryStrategy,
    pub object_store: RetryStrategy,
    pub external: RetryStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            local: RetryStrategy::gentle(),
            object_store: RetryStrategy::default(),
            external: RetryStrategy::default(),
        }
    }
}

impl RetryPolicy {
    /// 三类目的地使用同一策略。
    pub fn uniform(strategy: RetryStrategy) -> Self {
        Self {
            local: strategy,
            object_store: strategy,
            external: strategy,
        }
    }

    pub fn for_kind(&self, kind: StorageKind) -> RetryStrategy {
        match kind {
            StorageKind::LocalRelational | StorageKind::LocalFile => self.local,
            StorageKind::ObjectStore(_) => self.object_store,
            StorageKind::ExternalRelational(_) => self.external,
        }
    }
}

/// 目的地集合选择。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destinations {
    /// 全部激活的存储（含默认）。
    Active,
    /// 仅默认存储。
    Default,
    /// 指定存储 + 默认存储（按 id 去重）。
    Explicit(i64),
}

/// 单个目的地的写入结果。
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationOutcome {
    pub storage_id: i64,
    pub name: String,
    pub kind: StorageKind,
    pub result: Result<(), WriteError>,
}

impl DestinationOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// 一次扇出的汇总结果。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FanOutReport {
    pub record_ids: Vec<i64>,
    pub outcomes: Vec<DestinationOutcome>,
}

impl FanOutReport {
    /// 所有目的地均写入成功（没有目的地时为真）。
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(DestinationOutcome::is_ok)
    }

    pub fn outcome(&self, storage_id: i64) -> Option<&DestinationOutcome> {
        self.outcomes
            .iter()
            .find(|outcome| outcome.storage_id == storage_id)
    }

    pub fn failures(&self) -> impl Iterator<Item = &DestinationOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.is_ok())
    }

    pub fn succeeded_count(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.is_ok()).count()
    }
}

struct CachedWriter {
    fingerprint: String,
    writer: Arc<dyn DestinationWriter>,
}

/// 写入器缓存键：类型标签 + 配置文本，配置变化后重新打开。
fn fingerprint(def: &StorageDef) -> String {
    format!(
        "{}:{}",
        def.kind.as_tag(),
        serde_json::Value::Object(def.config.clone())
    )
}

/// 扇出写入器
pub struct FanOutWriter {
    storages: Arc<dyn StorageDefStore>,
    records: Arc<dyn DataRecordStore>,
    factory: Arc<dyn WriterFactory>,
    writers: Mutex<HashMap<i64, CachedWriter>>,
    lanes: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
    permits: Arc<Semaphore>,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl FanOutWriter {
    pub fn new(
        storages: Arc<dyn StorageDefStore>,
        records: Arc<dyn DataRecordStore>,
        factory: Arc<dyn WriterFactory>,
    ) -> Self {
        Self {
            storages,
            records,
            factory,
            writers: Mutex::new(HashMap::new()),
            lanes: Mutex::new(HashMap::new()),
            permits: Arc::new(Semaphore::new(DEFAULT_WRITER_CONCURRENCY)),
            retry: RetryPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// 同时进行中的目的地写入上限（至少 1）。
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.permits = Arc::new(Semaphore::new(limit.max(1)));
        self
    }

    /// 使用外部取消令牌（通常是监督器根令牌的子令牌）。
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// 解析本次扇出的目的地集合。
    pub async fn resolve(
        &self,
        destinations: Destinations,
    ) -> Result<Vec<StorageDef>, FanOutError> {
        let mut defs = match destinations {
            Destinations::Active => self.storages.list_active_storages().await?,
            Destinations::Default => self.storages.find_default().await?.into_iter().collect(),
            Destinations::Explicit(id) => {
                let explicit = self
                    .storages
                    .find_storage(id)
                    .await?
                    .ok_or(FanOutError::DestinationNotFound(id))?;
                let mut defs = vec![explicit];
                if let Some(default) = self.storages.find_default().await? {
                    defs.push(default);
                }
                defs
            }
        };
        let mut seen = Vec::with_capacity(defs.len());
        defs.retain(|def| {
            if seen.contains(&def.id) {
                false
            } else {
                seen.push(def.id);
                true
            }
        });
        Ok(defs)
    }

    /// 写入一批记录到目的地集合，返回每个目的地的结果。
    pub async fn write(
        &self,
        records: Vec<DataRecord>,
        destinations: Destinations,
    ) -> Result<FanOutReport, FanOutError> {
        if records.is_empty() {
            return Ok(FanOutReport::default());
        }
        let defs = self.resolve(destinations).await?;
        let records = self.assign_ids(records).await?;
        let record_ids = records.iter().filter_map(|record| record.id).collect();

        if defs.is_empty() {
            warn!(target: "igw.pipeline", records = records.len(), "no_active_destination");
        }

        let writes = defs.iter().map(|def| {
            let copies: Vec<DataRecord> = records
                .iter()
                .cloned()
                .map(|mut record| {
                    record.destination_id = Some(def.id);
                    record
                })
                .collect();
            async move {
                let result = self.write_destination(def, &copies).await;
                self.settle_status(def, &result).await;
                DestinationOutcome {
                    storage_id: def.id,
                    name: def.name.clone(),
                    kind: def.kind,
                    result,
                }
            }
        });
        let outcomes = join_all(writes).await;

        Ok(FanOutReport {
            record_ids,
            outcomes,
        })
    }

    async fn assign_ids(
        &self,
        mut records: Vec<DataRecord>,
    ) -> Result<Vec<DataRecord>, FanOutError> {
        for record in records.iter_mut() {
            if record.id.is_none() {
                record.id = Some(self.records.allocate_id().await?);
            }
        }
        Ok(records)
    }

    async fn write_destination(
        &self,
        def: &StorageDef,
        records: &[DataRecord],
    ) -> Result<(), WriteError> {
        let _permit = tokio::select! {
            _ = self.cancel.cancelled() => return Err(WriteError::Cancelled),
            permit = self.permits.acquire() => permit.map_err(|_| WriteError::Cancelled)?,
        };
        let lane = if def.kind.is_local() {
            Some(self.lane(def.id).await)
        } else {
            None
        };
        let _ordered = match &lane {
            Some(lane) => Some(lane.lock().await),
            None => None,
        };

        let writer = self.writer_for(def).await?;
        let strategy = self.retry.for_kind(def.kind);
        let started = Instant::now();
        let result = strategy
            .execute(
                &self.cancel,
                || {
                    let writer = writer.clone();
                    async move { writer.write(records).await }
                },
                WriteError::is_retryable,
            )
            .await;

        match result {
            Ok(()) => {
                let latency_ms = started.elapsed().as_millis() as u64;
                igw_telemetry::record_destination_write_ok(latency_ms);
                debug!(
                    target: "igw.pipeline",
                    storage_id = def.id,
                    kind = %def.kind,
                    records = records.len(),
                    latency_ms,
                    "destination_write_ok"
                );
                Ok(())
            }
            Err(RetryError::Cancelled) => Err(WriteError::Cancelled),
            Err(RetryError::Failed {
                attempts,
                last_error,
            }) => {
                igw_telemetry::record_destination_write_failed(last_error.is_fatal());
                warn!(
                    target: "igw.pipeline",
                    storage_id = def.id,
                    kind = %def.kind,
                    attempts,
                    error = %last_error,
                    "destination_write_failed"
                );
                Err(last_error)
            }
        }
    }

    /// 致命错误标记 Error；处于 Error / Configured 的目的地写入成功后标记 Active。
    async fn settle_status(&self, def: &StorageDef, result: &Result<(), WriteError>) {
        let update = match result {
            Err(err) if err.is_fatal() => Some((StorageStatus::Error, Some(err.message()))),
            Ok(()) if matches!(def.status, StorageStatus::Error | StorageStatus::Configured) => {
                Some((StorageStatus::Active, None))
            }
            _ => None,
        };
        let Some((status, error)) = update else {
            return;
        };
        match self
            .storages
            .mark_storage_status(def.id, status, error.as_deref())
            .await
        {
            Ok(_) => info!(
                target: "igw.pipeline",
                storage_id = def.id,
                status = status.as_str(),
                "storage_status_marked"
            ),
            Err(err) => warn!(
                target: "igw.pipeline",
                storage_id = def.id,
                error = %err,
                "storage_status_mark_failed"
            ),
        }
    }

    /// 连通性测试：先标记 Testing，结束后按结果标记 Active 或 Error。
    ///
    /// 两次标记都会刷新 `last_tested_at`；测试失败不返回 `Err`，
    /// 结果放在 `DestinationOutcome::result` 中。
    pub async fn test_storage(&self, storage_id: i64) -> Result<DestinationOutcome, FanOutError> {
        let def = self
            .storages
            .find_storage(storage_id)
            .await?
            .ok_or(FanOutError::DestinationNotFound(storage_id))?;
        self.storages
            .mark_storage_status(def.id, StorageStatus::Testing, None)
            .await?;

        let result = match self.writer_for(&def).await {
            Ok(writer) => writer.test().await,
            Err(err) => Err(err),
        };
        let (status, error) = match &result {
            Ok(()) => (StorageStatus::Active, None),
            Err(err) => (StorageStatus::Error, Some(err.message())),
        };
        self.storages
            .mark_storage_status(def.id, status, error.as_deref())
            .await?;
        info!(
            target: "igw.pipeline",
            storage_id = def.id,
            kind = %def.kind,
            status = status.as_str(),
            "storage_tested"
        );

        Ok(DestinationOutcome {
            storage_id: def.id,
            name: def.name,
            kind: def.kind,
            result,
        })
    }

    async fn lane(&self, storage_id: i64) -> Arc<Mutex<()>> {
        let mut lanes = self.lanes.lock().await;
        lanes
            .entry(storage_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn writer_for(&self, def: &StorageDef) -> Result<Arc<dyn DestinationWriter>, WriteError> {
        let wanted = fingerprint(def);
        let stale = {
            let mut writers = self.writers.lock().await;
            let fresh = writers
                .get(&def.id)
                .filter(|cached| cached.fingerprint == wanted);
            if let Some(cached) = fresh {
                return Ok(cached.writer.clone());
            }
            writers.remove(&def.id).map(|cached| cached.writer)
        };
        if let Some(stale) = stale {
            stale.close().await;
        }

        let writer = self.factory.open(def).await.inspect_err(|err| {
            warn!(
                target: "igw.pipeline",
                storage_id = def.id,
                kind = %def.kind,
                error = %err,
                "destination_open_failed"
            );
        })?;
        debug!(
            target: "igw.pipeline",
            storage_id = def.id,
            kind = %def.kind,
            "destination_writer_opened"
        );
        let mut writers = self.writers.lock().await;
        let cached = writers.entry(def.id).or_insert_with(|| CachedWriter {
            fingerprint: wanted,
            writer: writer.clone(),
        });
        Ok(cached.writer.clone())
    }

    /// 关闭并清空所有已打开的写入器。
    pub async fn close(&self) {
        let drained: Vec<(i64, CachedWriter)> = self.writers.lock().await.drain().collect();
        for (storage_id, cached) in drained {
            cached.writer.close().await;
            debug!(target: "igw.pipeline", storage_id, "destination_writer_closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{ObjectStoreProvider, RelationalEngine};

    #[test]
    fn policy_picks_strategy_by_kind() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.for_kind(StorageKind::LocalFile), RetryStrategy::gentle());
        assert_eq!(
            policy.for_kind(StorageKind::ObjectStore(ObjectStoreProvider::S3)),
            RetryStrategy::default()
        );
        assert_eq!(
            policy.for_kind(StorageKind::ExternalRelational(RelationalEngine::Mssql)),
            RetryStrategy::default()
        );
    }

    #[test]
    fn fingerprint_tracks_config() {
        let mut config = domain::ConfigMap::new();
        config.insert("path".to_string(), serde_json::json!("/tmp/a"));
        let first = StorageDef::new("files", StorageKind::LocalFile, config.clone());
        config.insert("path".to_string(), serde_json::json!("/tmp/b"));
        let second = StorageDef::new("files", StorageKind::LocalFile, config);
        assert_ne!(fingerprint(&first), fingerprint(&second));
    }
}
