//! Modbus TCP 采集器
//!
//! 包装 `ModbusTcpPoller`：`read_latest` 执行一次轮询并把样本映射为
//! `RawReading`；轮询器进入 Reconnecting 时上报 Error，恢复 Polling 时上报 Active。

use crate::collector::{Collector, StatusSink};
use crate::error::CollectorError;
use async_trait::async_trait;
use domain::{
    ConnectionDef, ConnectionStatus, RawReading, ReadingFields, RegisterType, SourceType,
};
use igw_protocol::{
    ModbusTcpConfig, ModbusTcpPoller, PollerState, ProtocolError, RegisterSample, TcpConnector,
    TransportConnector,
};
use igw_retry::RetryStrategy;
use serde_json::{Map, Value, json};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

struct ModbusSession {
    connection_id: String,
    poller: ModbusTcpPoller,
    status: StatusSink,
}

/// Modbus TCP 采集器
pub struct ModbusCollector {
    connector: Arc<dyn TransportConnector>,
    retry: Option<RetryStrategy>,
    session: OnceLock<ModbusSession>,
    cancel: Mutex<CancellationToken>,
    collecting: AtomicBool,
    degraded: AtomicBool,
}

impl Default for ModbusCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl ModbusCollector {
    pub fn new() -> Self {
        Self::with_connector(Arc::new(TcpConnector))
    }

    pub fn with_connector(connector: Arc<dyn TransportConnector>) -> Self {
        Self {
            connector,
            retry: None,
            session: OnceLock::new(),
            cancel: Mutex::new(CancellationToken::new()),
            collecting: AtomicBool::new(false),
            degraded: AtomicBool::new(false),
        }
    }

    /// 覆盖轮询器的退避参数（次数仍取 maxRetries）。
    pub fn with_retry(mut self, retry: RetryStrategy) -> Self {
        self.retry = Some(retry);
        self
    }

    fn session(&self) -> Result<&ModbusSession, CollectorError> {
        self.session.get().ok_or(CollectorError::NotInitialized)
    }

    fn cancel_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .map(|token| token.clone())
            .unwrap_or_default()
    }

    pub fn poller_state(&self) -> Option<PollerState> {
        self.session.get().map(|session| session.poller.state())
    }

    fn to_reading(connection_id: &str, sample: RegisterSample) -> RawReading {
        let fields = ReadingFields::Register {
            register: sample.register,
            value: sample.value,
            register_type: sample.register_type,
        };
        match sample.error_text {
            Some(error_text) => RawReading::bad(connection_id, SourceType::ModbusTcp, fields, error_text),
            None => RawReading::good(connection_id, SourceType::ModbusTcp, fields),
        }
    }
}

#[async_trait]
impl Collector for ModbusCollector {
    fn source_type(&self) -> SourceType {
        SourceType::ModbusTcp
    }

    async fn initialize(&self, def: &ConnectionDef, status: StatusSink) -> Result<(), CollectorError> {
        let config = ModbusTcpConfig::from_config(&def.config)?;
        let mut poller = ModbusTcpPoller::new(config, self.connector.clone());
        if let Some(retry) = self.retry {
            poller = poller.with_retry(retry);
        }
        let session = ModbusSession {
            connection_id: def.id.clone(),
            poller,
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
        if let Ok(mut token) = self.cancel.lock() {
            *token = cancel.clone();
        }
        session.status.report(ConnectionStatus::Connecting).await;
        match session.poller.connect(&cancel).await {
            Ok(()) => {
                self.collecting.store(true, Ordering::SeqCst);
                session.status.report(ConnectionStatus::Active).await;
                Ok(())
            }
            Err(ProtocolError::Cancelled) => Err(CollectorError::Cancelled),
            Err(err) => {
                session.status.report_error(&err).await;
                match err {
                    ProtocolError::Configuration(message) => Err(CollectorError::Config(message)),
                    other => Err(CollectorError::Fatal(format!(
                        "{} unreachable after retries: {}",
                        session.poller.config().socket_addr(),
                        other
                    ))),
                }
            }
        }
    }

    async fn stop(&self) -> Result<(), CollectorError> {
        let session = self.session()?;
        if self.collecting.swap(false, Ordering::SeqCst) {
            session.poller.stop().await;
            info!(target: "igw.ingest", connection_id = %session.connection_id, "modbus_collection_stopped");
        }
        Ok(())
    }

    fn is_collecting(&self) -> bool {
        self.collecting.load(Ordering::SeqCst)
    }

    fn poll_interval(&self) -> Option<Duration> {
        self.session
            .get()
            .map(|session| session.poller.config().poll_interval)
    }

    async fn read_latest(&self) -> Result<Vec<RawReading>, CollectorError> {
        let session = self.session()?;
        if !self.is_collecting() {
            return Ok(Vec::new());
        }
        let samples = session.poller.poll(&self.cancel_token()).await?;
        match session.poller.state() {
            PollerState::Reconnecting => {
                if !self.degraded.swap(true, Ordering::SeqCst) {
                    let reason = samples
                        .iter()
                        .find_map(|sample| sample.error_text.clone())
                        .unwrap_or_else(|| "connection lost".to_string());
                    warn!(target: "igw.ingest", connection_id = %session.connection_id, error = %reason, "modbus_reconnecting");
                    session.status.report_error(reason).await;
                }
            }
            PollerState::Polling => {
                if self.degraded.swap(false, Ordering::SeqCst) {
                    info!(target: "igw.ingest", connection_id = %session.connection_id, "modbus_recovered");
                    session.status.report(ConnectionStatus::Active).await;
                }
            }
            _ => {}
        }
        Ok(samples
            .into_iter()
            .map(|sample| Self::to_reading(&session.connection_id, sample))
            .collect())
    }

    async fn write(&self, address: &str, value: &Value) -> Result<bool, CollectorError> {
        let session = self.session()?;
        let register = address
            .trim()
            .parse::<u16>()
            .map_err(|_| CollectorError::Config(format!("invalid register address: {}", address)))?;
        let result = match session.poller.config().register_type {
            RegisterType::Holding => {
                let word = value
                    .as_u64()
                    .and_then(|value| u16::try_from(value).ok())
                    .ok_or_else(|| {
                        CollectorError::Config(format!("holding register value must fit u16: {}", value))
                    })?;
                session.poller.write_register(register, word).await
            }
            RegisterType::Coil => {
                let bit = match value {
                    Value::Bool(bit) => *bit,
                    Value::Number(number) => number.as_f64().is_some_and(|number| number != 0.0),
                    other => {
                        return Err(CollectorError::Config(format!("coil value must be bool or number: {}", other)));
                    }
                };
                session.poller.write_coil(register, bit).await
            }
            other => {
                return Err(CollectorError::Unsupported(format!(
                    "cannot write to register type: {}",
                    other.as_str()
                )));
            }
        };
        match result {
            Ok(()) => Ok(true),
            Err(err) if err.is_transport() || err.is_configuration() => Err(err.into()),
            Err(err) => {
                warn!(target: "igw.ingest", connection_id = %session.connection_id, register, error = %err, "modbus_write_rejected");
                Ok(false)
            }
        }
    }

    async fn diagnostics(&self) -> Vec<RawReading> {
        let Some(session) = self.session.get() else {
            return Vec::new();
        };
        let config = session.poller.config();
        let connected = self.is_collecting() && session.poller.is_connected().await;
        let mut attributes = Map::new();
        attributes.insert("address".to_string(), json!(config.ip_address.to_string()));
        attributes.insert("port".to_string(), json!(config.port.to_string()));
        attributes.insert("state".to_string(), json!(session.poller.state().as_str()));
        vec![RawReading::diagnostic(
            &session.connection_id,
            SourceType::ModbusTcp,
            "connection_status",
            if connected { "CONNECTED" } else { "DISCONNECTED" },
            attributes,
        )]
    }

    async fn test(&self) -> bool {
        match self.session.get() {
            Some(session) => session.poller.test().await,
            None => false,
        }
    }

    async fn shutdown(&self) {
        if let Some(session) = self.session.get() {
            self.collecting.store(false, Ordering::SeqCst);
            session.poller.stop().await;
        }
    }
}
