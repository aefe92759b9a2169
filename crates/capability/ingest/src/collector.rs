//! 采集器能力集与状态上报通道

use crate::error::CollectorError;
use async_trait::async_trait;
use domain::{ConnectionDef, ConnectionStatus, RawReading, SourceType, StatusUpdate};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 采集器能力集
///
/// 每个连接独占一个采集器实例；`initialize` 只调用一次。
/// 采集器不直接访问注册表，状态变化经 `StatusSink` 交给监督器。
#[async_trait]
pub trait Collector: Send + Sync {
    fn source_type(&self) -> SourceType;

    async fn initialize(&self, def: &ConnectionDef, status: StatusSink) -> Result<(), CollectorError>;

    /// 建立会话并开始采集；`cancel` 取消时所有内部任务退出。
    async fn start(&self, cancel: CancellationToken) -> Result<(), CollectorError>;

    async fn stop(&self) -> Result<(), CollectorError>;

    fn is_collecting(&self) -> bool;

    /// 连接配置中的轮询间隔，未配置时由监督器取默认值。
    fn poll_interval(&self) -> Option<Duration> {
        None
    }

    /// 当前最新读数（由监督器按轮询周期调用）。
    async fn read_latest(&self) -> Result<Vec<RawReading>, CollectorError>;

    /// 写入单个地址，设备拒绝时返回 `Ok(false)`。
    async fn write(&self, address: &str, value: &serde_json::Value) -> Result<bool, CollectorError>;

    async fn diagnostics(&self) -> Vec<RawReading>;

    async fn test(&self) -> bool;

    /// 释放全部资源，可重复调用。
    async fn shutdown(&self);
}

/// 采集器 → 监督器的状态通道（附带会话号）。
#[derive(Debug, Clone)]
pub struct StatusSink {
    connection_id: String,
    epoch: u64,
    sender: mpsc::Sender<StatusUpdate>,
}

impl StatusSink {
    pub fn new(connection_id: impl Into<String>, epoch: u64, sender: mpsc::Sender<StatusUpdate>) -> Self {
        Self {
            connection_id: connection_id.into(),
            epoch,
            sender,
        }
    }

    /// 独立通道（测试或一次性探测使用）。
    pub fn channel(
        connection_id: impl Into<String>,
        epoch: u64,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<StatusUpdate>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self::new(connection_id, epoch, sender), receiver)
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub async fn report(&self, status: ConnectionStatus) {
        self.send(StatusUpdate::new(self.connection_id.clone(), self.epoch, status))
            .await;
    }

    pub async fn report_error(&self, error: impl std::fmt::Display) {
        let update = StatusUpdate::new(self.connection_id.clone(), self.epoch, ConnectionStatus::Error)
            .with_error(error.to_string());
        self.send(update).await;
    }

    async fn send(&self, update: StatusUpdate) {
        if self.sender.send(update).await.is_err() {
            debug!(
                target: "igw.ingest",
                connection_id = %self.connection_id,
                epoch = self.epoch,
                "status_channel_closed"
            );
        }
    }
}
