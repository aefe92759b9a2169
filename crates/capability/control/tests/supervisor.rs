use async_trait::async_trait;
use domain::{
    CollectorState, ConfigMap, ConnectionDef, ConnectionStatus, RawReading, ReadingFields,
    RegisterType, SourceType, StorageDef, StorageKind,
};
use igw_control::{Supervisor, SupervisorConfig, SupervisorError};
use igw_ingest::{Collector, CollectorError, CollectorFactory, StatusSink};
use igw_pipeline::{FanOutWriter, RetryPolicy, StandardWriterFactory};
use igw_retry::RetryStrategy;
use igw_storage::{
    ConnectionStore, DataRecordStore, InMemoryConnectionStore, InMemoryDataRecordStore,
    InMemoryStorageDefStore, StorageDefStore,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// 启动与读取行为可脚本化的采集器。
#[derive(Default)]
struct FakeCollector {
    connection_id: Mutex<String>,
    sink: Mutex<Option<StatusSink>>,
    fail_start: bool,
    fatal_after: Option<u32>,
    poll_interval: Option<Duration>,
    unreachable: bool,
    reads: AtomicU32,
    tests: AtomicU32,
    collecting: AtomicBool,
    stopped: AtomicBool,
    shut_down: AtomicBool,
}

impl FakeCollector {
    fn sink(&self) -> Option<StatusSink> {
        self.sink.lock().expect("sink").clone()
    }
}

#[async_trait]
impl Collector for FakeCollector {
    fn source_type(&self) -> SourceType {
        SourceType::ModbusTcp
    }

    async fn initialize(
        &self,
        def: &ConnectionDef,
        status: StatusSink,
    ) -> Result<(), CollectorError> {
        *self.connection_id.lock().expect("id") = def.id.clone();
        *self.sink.lock().expect("sink") = Some(status);
        Ok(())
    }

    async fn start(&self, _cancel: CancellationToken) -> Result<(), CollectorError> {
        if let Some(sink) = self.sink() {
            sink.report(ConnectionStatus::Connecting).await;
        }
        if self.fail_start {
            return Err(CollectorError::Config("missing config key: ipAddress".to_string()));
        }
        self.collecting.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), CollectorError> {
        self.collecting.store(false, Ordering::SeqCst);
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_collecting(&self) -> bool {
        self.collecting.load(Ordering::SeqCst)
    }

    fn poll_interval(&self) -> Option<Duration> {
        Some(self.poll_interval.unwrap_or(Duration::from_millis(5)))
    }

    async fn read_latest(&self) -> Result<Vec<RawReading>, CollectorError> {
        let read = self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fatal_after.is_some_and(|limit| read >= limit) {
            return Err(CollectorError::Fatal(
                "10.0.0.5:502 unreachable after retries".to_string(),
            ));
        }
        let connection_id = self.connection_id.lock().expect("id").clone();
        Ok(vec![RawReading::good(
            connection_id,
            SourceType::ModbusTcp,
            ReadingFields::Register {
                register: 100,
                value: 42,
                register_type: RegisterType::Holding,
            },
        )])
    }

    async fn write(
        &self,
        address: &str,
        _value: &serde_json::Value,
    ) -> Result<bool, CollectorError> {
        Ok(address == "100")
    }

    async fn diagnostics(&self) -> Vec<RawReading> {
        let connection_id = self.connection_id.lock().expect("id").clone();
        vec![RawReading::diagnostic(
            connection_id,
            SourceType::ModbusTcp,
            "connection_status",
            "CONNECTED",
            serde_json::Map::new(),
        )]
    }

    /// 只有初始化过的采集器才能测试；上报一次 Connecting。
    async fn test(&self) -> bool {
        self.tests.fetch_add(1, Ordering::SeqCst);
        let Some(sink) = self.sink() else {
            return false;
        };
        sink.report(ConnectionStatus::Connecting).await;
        !self.unreachable
    }

    async fn shutdown(&self) {
        self.collecting.store(false, Ordering::SeqCst);
        self.shut_down.store(true, Ordering::SeqCst);
    }
}

#[derive(Clone, Copy, Default)]
struct Script {
    fail_start: bool,
    fatal_after: Option<u32>,
    poll_interval: Option<Duration>,
    unreachable: bool,
}

struct Harness {
    connections: Arc<InMemoryConnectionStore>,
    storages: Arc<InMemoryStorageDefStore>,
    records: Arc<InMemoryDataRecordStore>,
    script: Script,
    supervisor: Supervisor,
    created: Arc<Mutex<Vec<Arc<FakeCollector>>>>,
}

async fn harness(script: Script) -> Harness {
    let connections = Arc::new(InMemoryConnectionStore::new());
    let storages = Arc::new(InMemoryStorageDefStore::new());
    let records = Arc::new(InMemoryDataRecordStore::new());
    storages
        .create_default_if_none(StorageDef::new(
            "local-default",
            StorageKind::LocalRelational,
            ConfigMap::new(),
        ))
        .await
        .expect("default storage");

    let created: Arc<Mutex<Vec<Arc<FakeCollector>>>> = Arc::new(Mutex::new(Vec::new()));
    let supervisor = build_supervisor(&connections, &storages, &records, script, &created);
    Harness {
        connections,
        storages,
        records,
        script,
        supervisor,
        created,
    }
}

/// 在给定注册表上组装监督器（各自的取消令牌与扇出写入器）。
fn build_supervisor(
    connections: &Arc<InMemoryConnectionStore>,
    storages: &Arc<InMemoryStorageDefStore>,
    records: &Arc<InMemoryDataRecordStore>,
    script: Script,
    created: &Arc<Mutex<Vec<Arc<FakeCollector>>>>,
) -> Supervisor {
    let root = CancellationToken::new();
    let fan_out = FanOutWriter::new(
        storages.clone(),
        records.clone(),
        Arc::new(StandardWriterFactory::new(records.clone())),
    )
    .with_retry_policy(RetryPolicy::uniform(RetryStrategy::new(
        2,
        Duration::from_millis(1),
        Duration::from_millis(2),
        2.0,
    )))
    .with_cancellation(root.child_token());

    let registry = created.clone();
    let factory = CollectorFactory::new().register(SourceType::ModbusTcp, move || {
        let collector = Arc::new(FakeCollector {
            fail_start: script.fail_start,
            fatal_after: script.fatal_after,
            poll_interval: script.poll_interval,
            unreachable: script.unreachable,
            ..FakeCollector::default()
        });
        registry.lock().expect("registry").push(collector.clone());
        collector as Arc<dyn Collector>
    });

    let config = SupervisorConfig {
        stop_grace: Duration::from_millis(500),
        shutdown_grace: Duration::from_secs(5),
        ..SupervisorConfig::default()
    };
    Supervisor::new(connections.clone(), Arc::new(fan_out), factory, config, root)
}

impl Harness {
    /// 模拟进程重启：同一注册表上的新监督器。
    fn restarted_supervisor(&self) -> Supervisor {
        build_supervisor(
            &self.connections,
            &self.storages,
            &self.records,
            self.script,
            &self.created,
        )
    }

    async fn add_connection(&self, name: &str, source_type: SourceType) -> String {
        let mut config = ConfigMap::new();
        config.insert("ipAddress".to_string(), serde_json::json!("10.0.0.5"));
        self.connections
            .create_connection(ConnectionDef::new("", name, source_type, config))
            .await
            .expect("create connection")
            .id
    }

    async fn status(&self, id: &str) -> ConnectionDef {
        self.connections
            .find_connection(id)
            .await
            .expect("find")
            .expect("connection")
    }

    fn collectors(&self) -> Vec<Arc<FakeCollector>> {
        self.created.lock().expect("registry").clone()
    }

    async fn wait_for_records(&self, source_id: &str, at_least: u64) {
        for _ in 0..200 {
            if self.records.count_by_source(source_id).await.expect("count") >= at_least {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no records for {}", source_id);
    }
}

#[tokio::test]
async fn started_connection_polls_and_stores_records() {
    let h = harness(Script::default()).await;
    let id = h.add_connection("plc-line-1", SourceType::ModbusTcp).await;

    h.supervisor.start(&id).await.expect("start");
    h.wait_for_records(&id, 3).await;

    assert!(h.supervisor.is_running(&id).await);
    let def = h.status(&id).await;
    assert_eq!(def.status, ConnectionStatus::Active);
    assert!(def.last_connected_at.is_some());

    let stored = h.records.find_by_source(&id).await.expect("records");
    let payload: serde_json::Value = serde_json::from_str(&stored[0].payload).expect("payload");
    assert_eq!(payload["value"], serde_json::json!(42));
    assert_eq!(stored[0].data_type, "modbus_tcp");

    let handles = h.supervisor.handles().await;
    assert_eq!(handles.len(), 1);
    assert_eq!(handles[0].state, CollectorState::Running);
    assert!(handles[0].last_heartbeat.is_some());

    let view = h.supervisor.connection_status(&id).await.expect("status view");
    assert!(view.is_running);
    assert_eq!(view.status, ConnectionStatus::Active);
}

#[tokio::test]
async fn at_most_one_handle_per_connection() {
    let h = harness(Script::default()).await;
    let id = h.add_connection("plc-line-2", SourceType::ModbusTcp).await;

    let (first, second) = tokio::join!(h.supervisor.start(&id), h.supervisor.start(&id));
    let already = [&first, &second]
        .iter()
        .filter(|result| matches!(result, Err(SupervisorError::AlreadyRunning(_))))
        .count();
    assert_eq!(already, 1);
    assert!(first.is_ok() || second.is_ok());
    assert_eq!(h.supervisor.handles().await.len(), 1);
    assert!(matches!(
        h.supervisor.start(&id).await,
        Err(SupervisorError::AlreadyRunning(_))
    ));
}

#[tokio::test]
async fn stop_is_not_repeatable() {
    let h = harness(Script::default()).await;
    let id = h.add_connection("plc-line-3", SourceType::ModbusTcp).await;
    h.supervisor.start(&id).await.expect("start");

    h.supervisor.stop(&id).await.expect("stop");
    assert!(matches!(
        h.supervisor.stop(&id).await,
        Err(SupervisorError::NotRunning(_))
    ));
    assert!(h.supervisor.handles().await.is_empty());
    assert!(!h.supervisor.is_running(&id).await);
    assert_eq!(h.status(&id).await.status, ConnectionStatus::Offline);

    let collector = &h.collectors()[0];
    assert!(collector.stopped.load(Ordering::SeqCst));
    assert!(collector.shut_down.load(Ordering::SeqCst));

    // 已停止会话的迟到上报被丢弃。
    let sink = collector.sink().expect("sink");
    sink.report(ConnectionStatus::Connecting).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.status(&id).await.status, ConnectionStatus::Offline);
}

#[tokio::test]
async fn restart_opens_a_new_session() {
    let h = harness(Script::default()).await;
    let id = h.add_connection("plc-line-4", SourceType::ModbusTcp).await;
    h.supervisor.start(&id).await.expect("start");
    let first_epoch = h.status(&id).await.status_epoch;
    h.supervisor.stop(&id).await.expect("stop");

    h.supervisor.start(&id).await.expect("restart");
    let def = h.status(&id).await;
    assert!(def.status_epoch > first_epoch);
    assert_eq!(def.status, ConnectionStatus::Active);
}

#[tokio::test]
async fn unknown_connection_and_source_type_are_typed_errors() {
    let h = harness(Script::default()).await;
    assert!(matches!(
        h.supervisor.start("missing").await,
        Err(SupervisorError::ConnectionNotFound(_))
    ));
    let id = h.add_connection("broker", SourceType::Mqtt).await;
    assert!(matches!(
        h.supervisor.start(&id).await,
        Err(SupervisorError::UnsupportedSourceType(SourceType::Mqtt))
    ));
    assert!(h.supervisor.handles().await.is_empty());
}

#[tokio::test]
async fn invalid_config_marks_connection_error() {
    let h = harness(Script {
        fail_start: true,
        ..Script::default()
    })
    .await;
    let id = h.add_connection("plc-line-5", SourceType::ModbusTcp).await;

    let err = h.supervisor.start(&id).await.expect_err("start fails");
    assert!(matches!(err, SupervisorError::Collector(CollectorError::Config(_))));
    assert!(h.supervisor.handles().await.is_empty());
    assert!(h.collectors()[0].shut_down.load(Ordering::SeqCst));

    let def = h.status(&id).await;
    assert_eq!(def.status, ConnectionStatus::Error);
    assert!(def.last_error.expect("error").contains("ipAddress"));
}

#[tokio::test]
async fn fatal_read_stops_polling_but_keeps_handle() {
    let h = harness(Script {
        fatal_after: Some(2),
        ..Script::default()
    })
    .await;
    let id = h.add_connection("plc-line-6", SourceType::ModbusTcp).await;
    h.supervisor.start(&id).await.expect("start");

    for _ in 0..200 {
        if !h.supervisor.is_running(&id).await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(!h.supervisor.is_running(&id).await);
    let def = h.status(&id).await;
    assert_eq!(def.status, ConnectionStatus::Error);
    assert!(def.last_error.expect("error").contains("unreachable"));
    assert_eq!(h.records.count_by_source(&id).await.expect("count"), 2);

    let handles = h.supervisor.handles().await;
    assert_eq!(handles.len(), 1);
    assert_eq!(handles[0].state, CollectorState::Degraded);
    h.supervisor.stop(&id).await.expect("stop after fatal");
    assert_eq!(h.status(&id).await.status, ConnectionStatus::Offline);
}

#[tokio::test]
async fn diagnostics_and_writes_go_to_running_collector() {
    let h = harness(Script::default()).await;
    let id = h.add_connection("plc-line-7", SourceType::ModbusTcp).await;
    assert!(matches!(
        h.supervisor.diagnostics(&id).await,
        Err(SupervisorError::NotRunning(_))
    ));
    h.supervisor.start(&id).await.expect("start");

    let diagnostics = h.supervisor.diagnostics(&id).await.expect("diagnostics");
    assert_eq!(diagnostics.len(), 1);
    assert!(h.supervisor.write(&id, "100", &serde_json::json!(5)).await.expect("write"));
    assert!(!h.supervisor.write(&id, "7", &serde_json::json!(5)).await.expect("write"));
}

#[tokio::test]
async fn replay_restarts_connections_that_were_not_offline() {
    let h = harness(Script::default()).await;
    let mut active = ConnectionDef::new("", "was-active", SourceType::ModbusTcp, ConfigMap::new());
    active.status = ConnectionStatus::Active;
    active.status_epoch = 9;
    let active = h.connections.create_connection(active).await.expect("create").id;
    let offline = h.add_connection("was-offline", SourceType::ModbusTcp).await;

    let summary = h.supervisor.replay().await.expect("replay");
    assert_eq!(summary.started, vec![active.clone()]);
    assert!(summary.failed.is_empty());
    assert!(h.supervisor.is_running(&active).await);
    assert!(!h.supervisor.is_running(&offline).await);
    assert!(h.status(&active).await.status_epoch > 9);
}

#[tokio::test]
async fn shutdown_stops_everything_and_refuses_new_work() {
    let h = harness(Script::default()).await;
    let mut ids = Vec::new();
    for name in ["line-a", "line-b", "line-c"] {
        let id = h.add_connection(name, SourceType::ModbusTcp).await;
        h.supervisor.start(&id).await.expect("start");
        ids.push(id);
    }
    for id in &ids {
        h.wait_for_records(id, 1).await;
    }

    h.supervisor.shutdown().await;

    assert!(h.supervisor.handles().await.is_empty());
    for collector in h.collectors() {
        assert!(collector.stopped.load(Ordering::SeqCst));
        assert!(collector.shut_down.load(Ordering::SeqCst));
    }
    for id in &ids {
        assert_ne!(h.status(id).await.status, ConnectionStatus::Offline);
    }

    let after = h.records.count_all().await.expect("count");
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(h.records.count_all().await.expect("count"), after);

    assert!(matches!(
        h.supervisor.start(&ids[0]).await,
        Err(SupervisorError::ShuttingDown)
    ));
}

#[tokio::test]
async fn connections_running_at_shutdown_are_replayed_after_restart() {
    let h = harness(Script::default()).await;
    let running = h.add_connection("line-r", SourceType::ModbusTcp).await;
    let stopped = h.add_connection("line-s", SourceType::ModbusTcp).await;
    h.supervisor.start(&running).await.expect("start");
    h.supervisor.start(&stopped).await.expect("start");
    h.wait_for_records(&running, 1).await;
    h.supervisor.stop(&stopped).await.expect("stop");
    let epoch = h.status(&running).await.status_epoch;

    h.supervisor.shutdown().await;

    let next = h.restarted_supervisor();
    let summary = next.replay().await.expect("replay");
    assert_eq!(summary.started, vec![running.clone()]);
    assert!(summary.failed.is_empty());
    assert!(next.is_running(&running).await);
    assert!(!next.is_running(&stopped).await);
    assert!(h.status(&running).await.status_epoch > epoch);
    next.shutdown().await;
}

#[tokio::test]
async fn zero_poll_interval_is_clamped_to_minimum() {
    let h = harness(Script {
        poll_interval: Some(Duration::ZERO),
        ..Script::default()
    })
    .await;
    let id = h.add_connection("line-fast", SourceType::ModbusTcp).await;

    let started = Instant::now();
    h.supervisor.start(&id).await.expect("start");
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.supervisor.stop(&id).await.expect("stop");
    let elapsed_ms = started.elapsed().as_millis() as u32;

    let reads = h.collectors()[0].reads.load(Ordering::SeqCst);
    assert!(reads >= 2, "reads: {}", reads);
    // 每毫秒至多一次，外加首个立即触发的 tick
    assert!(reads <= elapsed_ms + 1, "reads: {} in {}ms", reads, elapsed_ms);
}

#[tokio::test]
async fn test_connection_uses_a_throwaway_collector() {
    let h = harness(Script::default()).await;
    let id = h.add_connection("line-t", SourceType::ModbusTcp).await;
    let before = h.status(&id).await;

    assert!(h.supervisor.test_connection(&id).await.expect("test"));

    let collectors = h.collectors();
    assert_eq!(collectors.len(), 1);
    assert_eq!(collectors[0].tests.load(Ordering::SeqCst), 1);
    assert!(collectors[0].shut_down.load(Ordering::SeqCst));
    assert!(h.supervisor.handles().await.is_empty());
    tokio::time::sleep(Duration::from_millis(20)).await;
    let after = h.status(&id).await;
    assert_eq!(after.status, before.status);
    assert_eq!(after.status_epoch, before.status_epoch);

    assert!(matches!(
        h.supervisor.test_connection("missing").await,
        Err(SupervisorError::ConnectionNotFound(_))
    ));
}

#[tokio::test]
async fn test_connection_reports_unreachable_without_touching_running_handle() {
    let h = harness(Script {
        unreachable: true,
        ..Script::default()
    })
    .await;
    let id = h.add_connection("line-u", SourceType::ModbusTcp).await;
    h.supervisor.start(&id).await.expect("start");

    assert!(!h.supervisor.test_connection(&id).await.expect("test"));

    assert!(h.supervisor.is_running(&id).await);
    let collectors = h.collectors();
    assert_eq!(collectors.len(), 2);
    assert!(!collectors[0].shut_down.load(Ordering::SeqCst));
    assert!(collectors[1].shut_down.load(Ordering::SeqCst));
}
