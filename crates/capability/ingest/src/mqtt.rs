//! MQTT 采集器
//!
//! 每条入站消息按主题覆盖写入 `LatestValueMap`，`read_latest` 只做快照、不清空；
//! 推送速率由监督器的轮询节拍限流。事件循环在每次 ConnAck 后重新订阅，
//! 会话断开上报 Error，恢复后上报 Active。

use crate::collector::{Collector, StatusSink};
use crate::error::CollectorError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    ConfigReader, ConnectionDef, ConnectionStatus, RawReading, ReadingFields, SourceType,
};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const TEST_TIMEOUT: Duration = Duration::from_secs(5);
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);
const REQUEST_CAPACITY: usize = 10;

/// MQTT 连接配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic: String,
}

impl MqttConfig {
    pub fn from_config(config: &domain::ConfigMap) -> Result<Self, CollectorError> {
        let reader = ConfigReader::new(config);
        let host = reader.read_string("host")?;
        let port = reader.read_u64_in_range("port", 1, 65_535)? as u16;
        Ok(Self {
            host,
            port,
            username: reader.read_optional("username"),
            password: reader.read_optional("password"),
            topic: reader.read_string_with_default("topic", "#"),
        })
    }

    pub fn broker(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn options(&self, client_id: String) -> MqttOptions {
        let mut options = MqttOptions::new(client_id, self.host.clone(), self.port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(true);
        if let (Some(username), Some(password)) = (self.username.as_ref(), self.password.as_ref()) {
            options.set_credentials(username, password);
        }
        options
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LatestValue {
    payload: Vec<u8>,
    received_at: DateTime<Utc>,
}

/// 按主题保存最新值（多写一读）。
#[derive(Debug, Default)]
pub struct LatestValueMap {
    values: RwLock<HashMap<String, LatestValue>>,
}

impl LatestValueMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, topic: impl Into<String>, payload: Vec<u8>) {
        self.insert_at(topic, payload, Utc::now());
    }

    pub fn insert_at(&self, topic: impl Into<String>, payload: Vec<u8>, received_at: DateTime<Utc>) {
        if let Ok(mut values) = self.values.write() {
            values.insert(
                topic.into(),
                LatestValue {
                    payload,
                    received_at,
                },
            );
        }
    }

    /// `(topic, payload, received_at)` 快照。
    pub fn snapshot(&self) -> Vec<(String, Vec<u8>, DateTime<Utc>)> {
        self.values
            .read()
            .map(|values| {
                values
                    .iter()
                    .map(|(topic, value)| (topic.clone(), value.payload.clone(), value.received_at))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.values.read().map(|values| values.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct MqttSession {
    connection_id: String,
    config: MqttConfig,
    client: AsyncClient,
    eventloop: Mutex<Option<EventLoop>>,
    status: StatusSink,
}

/// MQTT 采集器
#[derive(Default)]
pub struct MqttCollector {
    session: OnceLock<MqttSession>,
    latest: Arc<LatestValueMap>,
    collecting: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    cancel: Mutex<Option<CancellationToken>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MqttCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> &LatestValueMap {
        &self.latest
    }

    fn session(&self) -> Result<&MqttSession, CollectorError> {
        self.session.get().ok_or(CollectorError::NotInitialized)
    }

    fn cancel_task(&self) {
        if let Ok(mut cancel) = self.cancel.lock() {
            if let Some(token) = cancel.take() {
                token.cancel();
            }
        }
        if let Ok(mut task) = self.task.lock() {
            task.take();
        }
    }
}

struct EventLoopContext {
    connection_id: String,
    topic: String,
    client: AsyncClient,
    status: StatusSink,
    latest: Arc<LatestValueMap>,
    connected: Arc<AtomicBool>,
}

async fn run_event_loop(mut eventloop: EventLoop, context: EventLoopContext, cancel: CancellationToken) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = eventloop.poll() => event,
        };
        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                // clean session 下重连不会保留订阅。
                if let Err(err) = context.client.try_subscribe(context.topic.clone(), QoS::AtMostOnce) {
                    warn!(target: "igw.ingest", connection_id = %context.connection_id, error = %err, "mqtt_subscribe_failed");
                }
                context.connected.store(true, Ordering::SeqCst);
                info!(
                    target: "igw.ingest",
                    connection_id = %context.connection_id,
                    topic = %context.topic,
                    "mqtt_connected"
                );
                context.status.report(ConnectionStatus::Active).await;
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                context.latest.insert(publish.topic.clone(), publish.payload.to_vec());
            }
            Ok(_) => {}
            Err(err) => {
                if context.connected.swap(false, Ordering::SeqCst) {
                    warn!(target: "igw.ingest", connection_id = %context.connection_id, error = %err, "mqtt_session_lost");
                    context.status.report_error(&err).await;
                } else {
                    debug!(target: "igw.ingest", connection_id = %context.connection_id, error = %err, "mqtt_connect_failed");
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
                }
            }
        }
    }
    context.connected.store(false, Ordering::SeqCst);
}

fn publish_payload(value: &Value) -> Vec<u8> {
    match value {
        Value::String(text) => text.as_bytes().to_vec(),
        other => other.to_string().into_bytes(),
    }
}

#[async_trait]
impl Collector for MqttCollector {
    fn source_type(&self) -> SourceType {
        SourceType::Mqtt
    }

    async fn initialize(&self, def: &ConnectionDef, status: StatusSink) -> Result<(), CollectorError> {
        let config = MqttConfig::from_config(&def.config)?;
        let (client, eventloop) = AsyncClient::new(config.options(format!("ingest_{}", def.id)), REQUEST_CAPACITY);
        let session = MqttSession {
            connection_id: def.id.clone(),
            config,
            client,
            eventloop: Mutex::new(Some(eventloop)),
            status,
        };
        self.session
            .set(session)
            .map_err(|_| CollectorError::Fatal("collector already initialized".to_string()))
    }

    async fn start(&self, cancel: CancellationToken) -> Result<(), CollectorError> {
        let session = self.session()?;
        if self.collecting.load(Ordering::SeqCst) {
            return Ok(());
        }
        let eventloop = session
            .eventloop
            .lock()
            .ok()
            .and_then(|mut eventloop| eventloop.take())
            .ok_or_else(|| CollectorError::Fatal("mqtt session already consumed".to_string()))?;
        session.status.report(ConnectionStatus::Connecting).await;
        let token = cancel.child_token();
        let context = EventLoopContext {
            connection_id: session.connection_id.clone(),
            topic: session.config.topic.clone(),
            client: session.client.clone(),
            status: session.status.clone(),
            latest: self.latest.clone(),
            connected: self.connected.clone(),
        };
        let handle = tokio::spawn(run_event_loop(eventloop, context, token.clone()));
        if let Ok(mut cancel) = self.cancel.lock() {
            *cancel = Some(token);
        }
        if let Ok(mut task) = self.task.lock() {
            *task = Some(handle);
        }
        self.collecting.store(true, Ordering::SeqCst);
        info!(
            target: "igw.ingest",
            connection_id = %session.connection_id,
            broker = %session.config.broker(),
            topic = %session.config.topic,
            "mqtt_collection_started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), CollectorError> {
        let session = self.session()?;
        if self.collecting.swap(false, Ordering::SeqCst) {
            if let Err(err) = session.client.try_unsubscribe(session.config.topic.clone()) {
                debug!(target: "igw.ingest", connection_id = %session.connection_id, error = %err, "mqtt_unsubscribe_failed");
            }
            self.cancel_task();
        }
        Ok(())
    }

    fn is_collecting(&self) -> bool {
        self.collecting.load(Ordering::SeqCst)
    }

    async fn read_latest(&self) -> Result<Vec<RawReading>, CollectorError> {
        let session = self.session()?;
        Ok(self
            .latest
            .snapshot()
            .into_iter()
            .map(|(topic, payload, received_at)| {
                RawReading::good(
                    &session.connection_id,
                    SourceType::Mqtt,
                    ReadingFields::Topic { topic, payload },
                )
                .captured_at(received_at)
            })
            .collect())
    }

    async fn write(&self, address: &str, value: &Value) -> Result<bool, CollectorError> {
        let session = self.session()?;
        if !self.connected.load(Ordering::SeqCst) {
            return Ok(false);
        }
        session
            .client
            .publish(address, QoS::AtMostOnce, false, publish_payload(value))
            .await
            .map_err(|err| CollectorError::Transport(err.to_string()))?;
        Ok(true)
    }

    async fn diagnostics(&self) -> Vec<RawReading> {
        let Some(session) = self.session.get() else {
            return Vec::new();
        };
        let connected = self.connected.load(Ordering::SeqCst);
        let mut connection = Map::new();
        connection.insert("broker".to_string(), json!(session.config.broker()));
        let mut subscription = Map::new();
        subscription.insert("topic".to_string(), json!(session.config.topic));
        subscription.insert("active_topics".to_string(), json!(self.latest.len()));
        vec![
            RawReading::diagnostic(
                &session.connection_id,
                SourceType::Mqtt,
                "connection_status",
                if connected { "CONNECTED" } else { "DISCONNECTED" },
                connection,
            ),
            RawReading::diagnostic(
                &session.connection_id,
                SourceType::Mqtt,
                "subscription_status",
                if self.is_collecting() { "SUBSCRIBED" } else { "IDLE" },
                subscription,
            ),
        ]
    }

    async fn test(&self) -> bool {
        let Some(session) = self.session.get() else {
            return false;
        };
        let options = session
            .config
            .options(format!("ingest_test_{}", session.connection_id));
        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let connected = tokio::time::timeout(TEST_TIMEOUT, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => return true,
                    Ok(_) => {}
                    Err(_) => return false,
                }
            }
        })
        .await
        .unwrap_or(false);
        let _ = client.try_disconnect();
        connected
    }

    async fn shutdown(&self) {
        if let Some(session) = self.session.get() {
            self.collecting.store(false, Ordering::SeqCst);
            let _ = session.client.try_disconnect();
        }
        self.cancel_task();
    }
}
