//! 采集监督器
//!
//! 每个连接最多一个采集句柄。`start` 先在句柄表中占位再启动采集器，
//! 轮询任务按周期调用 `read_latest`，转换后扇出到全部激活的存储。
//!
//! 状态流转：
//! - 采集器经 `StatusSink` 上报状态，由唯一的状态泵任务写入注册表；
//!   句柄已移除或会话号不符的上报直接丢弃。
//! - 监督器自身在启动成功（Active）、致命错误（Error）、停止（Offline）时直接写注册表。
//! - `shutdown` 不改写注册表状态，进程重启后 `replay` 据此恢复采集。

use crate::error::SupervisorError;
use chrono::{DateTime, Utc};
use domain::{
    CollectorState, ConnectionDef, ConnectionStatus, Quality, RawReading, SourceType, StatusUpdate,
};
use futures::future::join_all;
use igw_ingest::{Collector, CollectorError, CollectorFactory, StatusSink};
use igw_normalize::Transformer;
use igw_pipeline::{Destinations, FanOutWriter};
use igw_storage::ConnectionStore;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 轮询间隔下限。
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// 监督器运行参数。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub default_poll_interval: Duration,
    pub stop_grace: Duration,
    pub shutdown_grace: Duration,
    pub status_channel_capacity: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            default_poll_interval: Duration::from_millis(1000),
            stop_grace: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(60),
            status_channel_capacity: 256,
        }
    }
}

/// 连接状态视图（对外接口）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatusView {
    pub status: ConnectionStatus,
    pub is_running: bool,
    pub last_error: Option<String>,
}

/// 采集句柄快照。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandleInfo {
    pub connection_id: String,
    pub source_type: SourceType,
    pub state: CollectorState,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

/// 启动重放结果。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub started: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// 句柄运行态（轮询任务与状态泵共享）。
struct HandleTracker {
    state: RwLock<CollectorState>,
    last_heartbeat: RwLock<Option<DateTime<Utc>>>,
}

impl HandleTracker {
    fn new() -> Self {
        Self {
            state: RwLock::new(CollectorState::Init),
            last_heartbeat: RwLock::new(None),
        }
    }

    fn state(&self) -> CollectorState {
        self.state
            .read()
            .map(|state| *state)
            .unwrap_or(CollectorState::Stopped)
    }

    fn set_state(&self, next: CollectorState) {
        if let Ok(mut state) = self.state.write() {
            *state = next;
        }
    }

    fn beat(&self) {
        if let Ok(mut heartbeat) = self.last_heartbeat.write() {
            *heartbeat = Some(Utc::now());
        }
    }

    fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        self.last_heartbeat.read().ok().and_then(|heartbeat| *heartbeat)
    }
}

struct CollectorHandle {
    source_type: SourceType,
    epoch: u64,
    collector: Arc<dyn Collector>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    tracker: Arc<HandleTracker>,
}

impl CollectorHandle {
    fn info(&self, connection_id: &str) -> HandleInfo {
        HandleInfo {
            connection_id: connection_id.to_string(),
            source_type: self.source_type,
            state: self.tracker.state(),
            last_heartbeat: self.tracker.last_heartbeat(),
        }
    }

    fn is_polling(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

type HandleMap = Arc<Mutex<HashMap<String, CollectorHandle>>>;

/// 采集监督器
pub struct Supervisor {
    connections: Arc<dyn ConnectionStore>,
    fan_out: Arc<FanOutWriter>,
    factory: CollectorFactory,
    transformer: Transformer,
    config: SupervisorConfig,
    handles: HandleMap,
    epoch: AtomicU64,
    root: CancellationToken,
    shutting_down: AtomicBool,
    status_tx: mpsc::Sender<StatusUpdate>,
    pump_cancel: CancellationToken,
    pump: StdMutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    /// 创建监督器并启动状态泵（需在 tokio 运行时内调用）。
    ///
    /// `root` 取消时所有连接的任务随之取消。
    pub fn new(
        connections: Arc<dyn ConnectionStore>,
        fan_out: Arc<FanOutWriter>,
        factory: CollectorFactory,
        config: SupervisorConfig,
        root: CancellationToken,
    ) -> Self {
        let handles: HandleMap = Arc::new(Mutex::new(HashMap::new()));
        let (status_tx, status_rx) = mpsc::channel(config.status_channel_capacity.max(1));
        let pump_cancel = CancellationToken::new();
        let pump = tokio::spawn(run_status_pump(
            connections.clone(),
            handles.clone(),
            status_rx,
            pump_cancel.clone(),
        ));
        Self {
            connections,
            fan_out,
            factory,
            transformer: Transformer::new(),
            config,
            handles,
            epoch: AtomicU64::new(0),
            root,
            shutting_down: AtomicBool::new(false),
            status_tx,
            pump_cancel,
            pump: StdMutex::new(Some(pump)),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// 新会话号：大于进程内计数器与注册表中已记录的会话号。
    fn next_epoch(&self, persisted: u64) -> u64 {
        let previous = self.epoch.fetch_max(persisted, Ordering::SeqCst).max(persisted);
        let next = previous + 1;
        self.epoch.fetch_max(next, Ordering::SeqCst);
        next
    }

    /// 启动连接采集。
    pub async fn start(&self, connection_id: &str) -> Result<(), SupervisorError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(SupervisorError::ShuttingDown);
        }
        let def = self
            .connections
            .find_connection(connection_id)
            .await?
            .ok_or_else(|| SupervisorError::ConnectionNotFound(connection_id.to_string()))?;
        let collector = self.factory.create(def.source_type)?;

        let cancel = self.root.child_token();
        let tracker = Arc::new(HandleTracker::new());
        let epoch = {
            let mut handles = self.handles.lock().await;
            if self.shutting_down.load(Ordering::SeqCst) {
                return Err(SupervisorError::ShuttingDown);
            }
            if handles.contains_key(connection_id) {
                return Err(SupervisorError::AlreadyRunning(connection_id.to_string()));
            }
            let epoch = self.next_epoch(def.status_epoch);
            handles.insert(
                connection_id.to_string(),
                CollectorHandle {
                    source_type: def.source_type,
                    epoch,
                    collector: collector.clone(),
                    cancel: cancel.clone(),
                    task: None,
                    tracker: tracker.clone(),
                },
            );
            epoch
        };

        let sink = StatusSink::new(connection_id, epoch, self.status_tx.clone());
        let started = match collector.initialize(&def, sink).await {
            Ok(()) => collector.start(cancel.clone()).await,
            Err(err) => Err(err),
        };
        if let Err(err) = started {
            self.handles.lock().await.remove(connection_id);
            cancel.cancel();
            collector.shutdown().await;
            igw_telemetry::record_collector_error();
            warn!(
                target: "igw.supervisor",
                connection_id = %connection_id,
                source_type = %def.source_type,
                error = %err,
                "collector_start_failed"
            );
            if !matches!(err, CollectorError::Cancelled) {
                persist_status(
                    self.connections.as_ref(),
                    StatusUpdate::new(connection_id, epoch, ConnectionStatus::Error)
                        .with_error(err.to_string()),
                )
                .await;
            }
            return Err(err.into());
        }

        persist_status(
            self.connections.as_ref(),
            StatusUpdate::new(connection_id, epoch, ConnectionStatus::Active),
        )
        .await;

        let interval = collector
            .poll_interval()
            .unwrap_or(self.config.default_poll_interval)
            .max(MIN_POLL_INTERVAL);
        let task = tokio::spawn(run_polling(PollContext {
            def,
            epoch,
            interval,
            collector: collector.clone(),
            transformer: self.transformer,
            fan_out: self.fan_out.clone(),
            connections: self.connections.clone(),
            tracker: tracker.clone(),
            cancel: cancel.clone(),
        }));

        let mut task = Some(task);
        let attached = {
            let mut handles = self.handles.lock().await;
            match handles
                .get_mut(connection_id)
                .filter(|handle| handle.epoch == epoch)
            {
                Some(handle) => {
                    handle.task = task.take();
                    true
                }
                None => false,
            }
        };
        if !attached {
            // 启动期间被 stop
            cancel.cancel();
            if let Some(task) = task {
                task.abort();
            }
            collector.shutdown().await;
            return Err(SupervisorError::NotRunning(connection_id.to_string()));
        }
        if tracker.state() == CollectorState::Init {
            tracker.set_state(CollectorState::Running);
        }
        info!(
            target: "igw.supervisor",
            connection_id = %connection_id,
            epoch,
            interval_ms = interval.as_millis() as u64,
            "collector_started"
        );
        Ok(())
    }

    /// 停止连接采集；重复调用返回 `NotRunning`。
    pub async fn stop(&self, connection_id: &str) -> Result<(), SupervisorError> {
        let handle = self
            .handles
            .lock()
            .await
            .remove(connection_id)
            .ok_or_else(|| SupervisorError::NotRunning(connection_id.to_string()))?;
        let epoch = handle.epoch;
        self.stop_handle(connection_id, handle).await;
        persist_status(
            self.connections.as_ref(),
            StatusUpdate::new(connection_id, epoch, ConnectionStatus::Offline),
        )
        .await;
        info!(target: "igw.supervisor", connection_id = %connection_id, epoch, "collector_stopped");
        Ok(())
    }

    /// 取消轮询任务，宽限期内停止采集，最后释放资源。
    async fn stop_handle(&self, connection_id: &str, handle: CollectorHandle) {
        let grace = self.config.stop_grace;
        handle.tracker.set_state(CollectorState::Stopping);
        handle.cancel.cancel();
        if let Some(task) = handle.task {
            let abort = task.abort_handle();
            if tokio::time::timeout(grace, task).await.is_err() {
                warn!(
                    target: "igw.supervisor",
                    connection_id = %connection_id,
                    "polling_task_aborted"
                );
                abort.abort();
            }
        }
        match tokio::time::timeout(grace, handle.collector.stop()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(
                target: "igw.supervisor",
                connection_id = %connection_id,
                error = %err,
                "collector_stop_failed"
            ),
            Err(_) => warn!(
                target: "igw.supervisor",
                connection_id = %connection_id,
                grace_ms = grace.as_millis() as u64,
                "collector_stop_timed_out"
            ),
        }
        handle.collector.shutdown().await;
        handle.tracker.set_state(CollectorState::Stopped);
    }

    /// 轮询任务仍在运行。
    pub async fn is_running(&self, connection_id: &str) -> bool {
        self.handles
            .lock()
            .await
            .get(connection_id)
            .is_some_and(CollectorHandle::is_polling)
    }

    async fn collector(&self, connection_id: &str) -> Result<Arc<dyn Collector>, SupervisorError> {
        self.handles
            .lock()
            .await
            .get(connection_id)
            .map(|handle| handle.collector.clone())
            .ok_or_else(|| SupervisorError::NotRunning(connection_id.to_string()))
    }

    pub async fn diagnostics(
        &self,
        connection_id: &str,
    ) -> Result<Vec<RawReading>, SupervisorError> {
        let collector = self.collector(connection_id).await?;
        Ok(collector.diagnostics().await)
    }

    /// 连通性测试：用临时采集器初始化后调用 `test`，结束即释放。
    ///
    /// 不占用句柄表，也不改写注册表状态；配置无效时返回 `Ok(false)`。
    pub async fn test_connection(&self, connection_id: &str) -> Result<bool, SupervisorError> {
        let def = self
            .connections
            .find_connection(connection_id)
            .await?
            .ok_or_else(|| SupervisorError::ConnectionNotFound(connection_id.to_string()))?;
        let collector = self.factory.create(def.source_type)?;

        // 接收端立即关闭，测试期间的状态上报不落库
        let (sink, updates) = StatusSink::channel(connection_id, 0, 1);
        drop(updates);
        let reachable = match collector.initialize(&def, sink).await {
            Ok(()) => collector.test().await,
            Err(err) => {
                warn!(
                    target: "igw.supervisor",
                    connection_id = %connection_id,
                    error = %err,
                    "connection_test_init_failed"
                );
                false
            }
        };
        collector.shutdown().await;
        info!(
            target: "igw.supervisor",
            connection_id = %connection_id,
            source_type = %def.source_type,
            reachable,
            "connection_tested"
        );
        Ok(reachable)
    }

    /// 写入设备地址（委托给运行中的采集器）。
    pub async fn write(
        &self,
        connection_id: &str,
        address: &str,
        value: &serde_json::Value,
    ) -> Result<bool, SupervisorError> {
        let collector = self.collector(connection_id).await?;
        let accepted = collector.write(address, value).await?;
        info!(
            target: "igw.supervisor",
            connection_id = %connection_id,
            address = %address,
            accepted,
            "collector_write"
        );
        Ok(accepted)
    }

    pub async fn connection_status(
        &self,
        connection_id: &str,
    ) -> Result<ConnectionStatusView, SupervisorError> {
        let def = self
            .connections
            .find_connection(connection_id)
            .await?
            .ok_or_else(|| SupervisorError::ConnectionNotFound(connection_id.to_string()))?;
        Ok(ConnectionStatusView {
            status: def.status,
            is_running: self.is_running(connection_id).await,
            last_error: def.last_error,
        })
    }

    pub async fn handles(&self) -> Vec<HandleInfo> {
        let handles = self.handles.lock().await;
        let mut infos: Vec<HandleInfo> = handles
            .iter()
            .map(|(connection_id, handle)| handle.info(connection_id))
            .collect();
        infos.sort_by(|a, b| a.connection_id.cmp(&b.connection_id));
        infos
    }

    /// 重新启动注册表中状态不是 Offline 的连接。
    pub async fn replay(&self) -> Result<ReplaySummary, SupervisorError> {
        let mut summary = ReplaySummary::default();
        for def in self.connections.list_connections().await? {
            if def.status == ConnectionStatus::Offline {
                continue;
            }
            match self.start(&def.id).await {
                Ok(()) => summary.started.push(def.id),
                Err(err) => {
                    warn!(
                        target: "igw.supervisor",
                        connection_id = %def.id,
                        error = %err,
                        "connection_replay_failed"
                    );
                    summary.failed.push((def.id, err.to_string()));
                }
            }
        }
        info!(
            target: "igw.supervisor",
            started = summary.started.len(),
            failed = summary.failed.len(),
            "connections_replayed"
        );
        Ok(summary)
    }

    /// 关闭全部连接：宽限期内优雅停止，超时后强制取消；随后关闭写入器与状态泵。
    ///
    /// 与 `stop` 不同，注册表中的状态保持原样，重启后 `replay` 会重新启动这些连接。
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let drained: Vec<(String, CollectorHandle)> =
            self.handles.lock().await.drain().collect();
        info!(
            target: "igw.supervisor",
            connections = drained.len(),
            "supervisor_shutdown_started"
        );

        let aborts: Vec<AbortHandle> = drained
            .iter()
            .filter_map(|(_, handle)| handle.task.as_ref().map(JoinHandle::abort_handle))
            .collect();

        let stops = drained.into_iter().map(|(connection_id, handle)| async move {
            self.stop_handle(&connection_id, handle).await
        });
        if tokio::time::timeout(self.config.shutdown_grace, join_all(stops))
            .await
            .is_err()
        {
            warn!(
                target: "igw.supervisor",
                grace_secs = self.config.shutdown_grace.as_secs(),
                "supervisor_shutdown_grace_exceeded"
            );
            for abort in &aborts {
                abort.abort();
            }
        }
        self.root.cancel();
        self.fan_out.close().await;

        self.pump_cancel.cancel();
        let pump = self.pump.lock().ok().and_then(|mut pump| pump.take());
        if let Some(pump) = pump {
            let _ = pump.await;
        }
        info!(target: "igw.supervisor", "supervisor_shutdown_completed");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}

async fn persist_status(connections: &dyn ConnectionStore, update: StatusUpdate) {
    match connections.mark_status(&update).await {
        Ok(true) => debug!(
            target: "igw.supervisor",
            connection_id = %update.connection_id,
            epoch = update.epoch,
            status = %update.status,
            "connection_status_marked"
        ),
        Ok(false) => debug!(
            target: "igw.supervisor",
            connection_id = %update.connection_id,
            epoch = update.epoch,
            status = %update.status,
            "connection_status_rejected"
        ),
        Err(err) => warn!(
            target: "igw.supervisor",
            connection_id = %update.connection_id,
            error = %err,
            "connection_status_mark_failed"
        ),
    }
}

/// 状态泵：只转发仍在运行且会话号一致的句柄上报。
async fn run_status_pump(
    connections: Arc<dyn ConnectionStore>,
    handles: HandleMap,
    mut status_rx: mpsc::Receiver<StatusUpdate>,
    cancel: CancellationToken,
) {
    loop {
        let update = tokio::select! {
            _ = cancel.cancelled() => break,
            update = status_rx.recv() => match update {
                Some(update) => update,
                None => break,
            },
        };
        // 持锁写入：stop / 启动失败移除句柄后，本会话不再有上报落库。
        let guard = handles.lock().await;
        let Some(handle) = guard
            .get(&update.connection_id)
            .filter(|handle| handle.epoch == update.epoch)
        else {
            debug!(
                target: "igw.supervisor",
                connection_id = %update.connection_id,
                epoch = update.epoch,
                "stale_status_dropped"
            );
            continue;
        };
        match update.status {
            ConnectionStatus::Error => handle.tracker.set_state(CollectorState::Degraded),
            ConnectionStatus::Active => handle.tracker.set_state(CollectorState::Running),
            _ => {}
        }
        persist_status(connections.as_ref(), update).await;
    }
}

struct PollContext {
    def: ConnectionDef,
    epoch: u64,
    interval: Duration,
    collector: Arc<dyn Collector>,
    transformer: Transformer,
    fan_out: Arc<FanOutWriter>,
    connections: Arc<dyn ConnectionStore>,
    tracker: Arc<HandleTracker>,
    cancel: CancellationToken,
}

/// 轮询任务：瞬时错误记录后继续，致命错误标记 Error 并结束任务（句柄保留）。
async fn run_polling(ctx: PollContext) {
    let connection_id = ctx.def.id.clone();
    let mut ticker = tokio::time::interval(ctx.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let readings = match ctx.collector.read_latest().await {
            Ok(readings) => readings,
            Err(CollectorError::Cancelled) => break,
            Err(err) if err.is_fatal() => {
                igw_telemetry::record_collector_error();
                warn!(
                    target: "igw.supervisor",
                    connection_id = %connection_id,
                    error = %err,
                    "collector_fatal_error"
                );
                ctx.tracker.set_state(CollectorState::Degraded);
                persist_status(
                    ctx.connections.as_ref(),
                    StatusUpdate::new(connection_id.as_str(), ctx.epoch, ConnectionStatus::Error)
                        .with_error(err.to_string()),
                )
                .await;
                return;
            }
            Err(err) => {
                igw_telemetry::record_collector_error();
                ctx.tracker.set_state(CollectorState::Degraded);
                warn!(
                    target: "igw.supervisor",
                    connection_id = %connection_id,
                    error = %err,
                    "collector_read_failed"
                );
                continue;
            }
        };
        ctx.tracker.beat();
        if readings.is_empty() {
            continue;
        }

        igw_telemetry::record_readings_collected(readings.len() as u64);
        let bad = readings
            .iter()
            .filter(|reading| reading.quality == Quality::Bad)
            .count();
        for _ in 0..bad {
            igw_telemetry::record_bad_reading();
        }

        let records = ctx.transformer.transform_batch(&ctx.def, &readings);
        igw_telemetry::record_records_transformed(records.len() as u64);
        if ctx.cancel.is_cancelled() {
            break;
        }
        match ctx.fan_out.write(records, Destinations::Active).await {
            Ok(report) => {
                for failure in report.failures() {
                    if let Err(err) = &failure.result {
                        debug!(
                            target: "igw.supervisor",
                            connection_id = %connection_id,
                            storage_id = failure.storage_id,
                            error = %err,
                            "record_destination_failed"
                        );
                    }
                }
            }
            Err(err) => warn!(
                target: "igw.supervisor",
                connection_id = %connection_id,
                error = %err,
                "fan_out_failed"
            ),
        }
    }
    debug!(target: "igw.supervisor", connection_id = %connection_id, "polling_task_exited");
}
