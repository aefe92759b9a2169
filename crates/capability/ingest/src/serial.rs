//! 串口采集器
//!
//! 串口设备按字节流打开（波特率等线路参数由宿主机预先设置），
//! 按分隔符切帧后放入有界缓冲区，满时丢弃最旧帧；`read_latest` 取走全部帧。

use crate::collector::{Collector, StatusSink};
use crate::error::CollectorError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    ConfigReader, ConnectionDef, ConnectionStatus, RawReading, ReadingFields, SerialData,
    SourceType,
};
use serde_json::{Map, Value, json};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::io::{AsyncReadExt, AsyncWriteExt, WriteHalf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 缓冲区最多保留的帧数。
pub const FRAME_BUFFER_CAPACITY: usize = 1024;
/// 单帧最大字节数，超出时强制切帧。
const MAX_FRAME_LEN: usize = 4096;
const READ_CHUNK: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Even,
    Odd,
}

/// 串口配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    pub com_port: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
    pub delimiter: Vec<u8>,
}

impl SerialConfig {
    pub fn from_config(config: &domain::ConfigMap) -> Result<Self, CollectorError> {
        let reader = ConfigReader::new(config);
        let com_port = reader.read_string("comPort")?;
        let baud_rate = reader.read_u64_in_range_with_default("baudRate", 1, 4_000_000, 9600)? as u32;
        let data_bits = match reader.read_u64_with_default("dataBits", 8)? {
            bits @ (7 | 8) => bits as u8,
            other => return Err(CollectorError::Config(format!("invalid value for dataBits: {}", other))),
        };
        let stop_bits = match reader.read_u64_with_default("stopBits", 1)? {
            bits @ (1 | 2) => bits as u8,
            other => return Err(CollectorError::Config(format!("invalid value for stopBits: {}", other))),
        };
        let parity = match reader
            .read_string_with_default("parity", "none")
            .to_ascii_lowercase()
            .as_str()
        {
            "none" => Parity::None,
            "even" => Parity::Even,
            "odd" => Parity::Odd,
            other => return Err(CollectorError::Config(format!("invalid value for parity: {}", other))),
        };
        let delimiter = match config.get("delimiter") {
            Some(Value::String(text)) if !text.is_empty() => unescape(text).into_bytes(),
            _ => b"\n".to_vec(),
        };
        Ok(Self {
            com_port,
            baud_rate,
            data_bits,
            stop_bits,
            parity,
            delimiter,
        })
    }
}

/// 配置里常见的 `"\\r\\n"` 写法还原为控制字符。
fn unescape(text: &str) -> String {
    text.replace("\\r", "\r").replace("\\n", "\n").replace("\\t", "\t")
}

/// 分隔符切帧器
#[derive(Debug)]
pub struct FrameDecoder {
    delimiter: Vec<u8>,
    pending: Vec<u8>,
}

impl FrameDecoder {
    pub fn new(delimiter: Vec<u8>) -> Self {
        Self {
            delimiter,
            pending: Vec::new(),
        }
    }

    /// 追加字节，返回已完整的帧（不含分隔符，空帧丢弃）。
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(bytes);
        let mut frames = Vec::new();
        while let Some(position) = find(&self.pending, &self.delimiter) {
            let frame: Vec<u8> = self.pending.drain(..position).collect();
            self.pending.drain(..self.delimiter.len());
            if !frame.is_empty() {
                frames.push(frame);
            }
        }
        if self.pending.len() > MAX_FRAME_LEN {
            frames.push(std::mem::take(&mut self.pending));
        }
        frames
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// 有界帧缓冲区（满时丢弃最旧帧）。
#[derive(Debug)]
pub struct FrameBuffer {
    frames: Mutex<VecDeque<(SerialData, DateTime<Utc>)>>,
    capacity: usize,
}

impl FrameBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// 返回是否丢弃了旧帧。
    pub fn push(&self, frame: Vec<u8>) -> bool {
        let data = match String::from_utf8(frame) {
            Ok(text) => SerialData::Text(text.trim_end_matches('\r').to_string()),
            Err(err) => SerialData::Bytes(err.into_bytes()),
        };
        let Ok(mut frames) = self.frames.lock() else {
            return false;
        };
        let dropped = frames.len() >= self.capacity;
        if dropped {
            frames.pop_front();
        }
        frames.push_back((data, Utc::now()));
        dropped
    }

    pub fn drain(&self) -> Vec<(SerialData, DateTime<Utc>)> {
        self.frames
            .lock()
            .map(|mut frames| frames.drain(..).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().map(|frames| frames.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct SerialSession {
    connection_id: String,
    config: SerialConfig,
    status: StatusSink,
}

/// 串口采集器
pub struct SerialCollector {
    session: OnceLock<SerialSession>,
    buffer: Arc<FrameBuffer>,
    writer: tokio::sync::Mutex<Option<WriteHalf<tokio::fs::File>>>,
    collecting: Arc<AtomicBool>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl Default for SerialCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialCollector {
    pub fn new() -> Self {
        Self {
            session: OnceLock::new(),
            buffer: Arc::new(FrameBuffer::new(FRAME_BUFFER_CAPACITY)),
            writer: tokio::sync::Mutex::new(None),
            collecting: Arc::new(AtomicBool::new(false)),
            cancel: Mutex::new(None),
        }
    }

    fn session(&self) -> Result<&SerialSession, CollectorError> {
        self.session.get().ok_or(CollectorError::NotInitialized)
    }

    async fn open(config: &SerialConfig) -> std::io::Result<tokio::fs::File> {
        tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&config.com_port)
            .await
    }

    fn cancel_reader(&self) {
        if let Ok(mut cancel) = self.cancel.lock() {
            if let Some(token) = cancel.take() {
                token.cancel();
            }
        }
    }
}

#[async_trait]
impl Collector for SerialCollector {
    fn source_type(&self) -> SourceType {
        SourceType::Serial
    }

    async fn initialize(&self, def: &ConnectionDef, status: StatusSink) -> Result<(), CollectorError> {
        let config = SerialConfig::from_config(&def.config)?;
        self.session
            .set(SerialSession {
                connection_id: def.id.clone(),
                config,
                status,
            })
            .map_err(|_| CollectorError::Fatal("collector already initialized".to_string()))
    }

    async fn start(&self, cancel: CancellationToken) -> Result<(), CollectorError> {
        let session = self.session()?;
        if self.collecting.load(Ordering::SeqCst) {
            return Ok(());
        }
        session.status.report(ConnectionStatus::Connecting).await;
        let file = match Self::open(&session.config).await {
            Ok(file) => file,
            Err(err) => {
                session.status.report_error(&err).await;
                return Err(CollectorError::Fatal(format!(
                    "cannot open {}: {}",
                    session.config.com_port, err
                )));
            }
        };
        let (mut reader, writer) = tokio::io::split(file);
        *self.writer.lock().await = Some(writer);

        let token = cancel.child_token();
        let buffer = self.buffer.clone();
        let collecting = self.collecting.clone();
        let status = session.status.clone();
        let connection_id = session.connection_id.clone();
        let mut decoder = FrameDecoder::new(session.config.delimiter.clone());
        let reader_token = token.clone();
        self.collecting.store(true, Ordering::SeqCst);
        tokio::spawn(async move {
            let mut chunk = vec![0u8; READ_CHUNK];
            loop {
                let read = tokio::select! {
                    _ = reader_token.cancelled() => break,
                    read = reader.read(&mut chunk) => read,
                };
                match read {
                    Ok(0) => {
                        warn!(target: "igw.ingest", connection_id = %connection_id, "serial_stream_closed");
                        status.report_error("serial stream closed").await;
                        break;
                    }
                    Ok(len) => {
                        for frame in decoder.push(&chunk[..len]) {
                            if buffer.push(frame) {
                                warn!(target: "igw.ingest", connection_id = %connection_id, "serial_frame_dropped");
                            }
                        }
                    }
                    Err(err) => {
                        warn!(target: "igw.ingest", connection_id = %connection_id, error = %err, "serial_read_failed");
                        status.report_error(&err).await;
                        break;
                    }
                }
            }
            collecting.store(false, Ordering::SeqCst);
        });
        if let Ok(mut cancel) = self.cancel.lock() {
            *cancel = Some(token);
        }
        session.status.report(ConnectionStatus::Active).await;
        info!(
            target: "igw.ingest",
            connection_id = %session.connection_id,
            port = %session.config.com_port,
            baud_rate = session.config.baud_rate,
            "serial_collection_started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), CollectorError> {
        self.session()?;
        if self.collecting.swap(false, Ordering::SeqCst) {
            self.cancel_reader();
            if let Some(mut writer) = self.writer.lock().await.take() {
                let _ = writer.shutdown().await;
            }
        }
        Ok(())
    }

    fn is_collecting(&self) -> bool {
        self.collecting.load(Ordering::SeqCst)
    }

    async fn read_latest(&self) -> Result<Vec<RawReading>, CollectorError> {
        let session = self.session()?;
        Ok(self
            .buffer
            .drain()
            .into_iter()
            .map(|(data, captured_at)| {
                RawReading::good(&session.connection_id, SourceType::Serial, ReadingFields::Serial { data })
                    .captured_at(captured_at)
            })
            .collect())
    }

    async fn write(&self, _address: &str, value: &Value) -> Result<bool, CollectorError> {
        let session = self.session()?;
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Ok(false);
        };
        let mut bytes = match value {
            Value::String(text) => text.as_bytes().to_vec(),
            other => other.to_string().into_bytes(),
        };
        bytes.extend_from_slice(&session.config.delimiter);
        writer
            .write_all(&bytes)
            .await
            .map_err(|err| CollectorError::Transport(err.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|err| CollectorError::Transport(err.to_string()))?;
        Ok(true)
    }

    async fn diagnostics(&self) -> Vec<RawReading> {
        let Some(session) = self.session.get() else {
            return Vec::new();
        };
        let mut attributes = Map::new();
        attributes.insert("port".to_string(), json!(session.config.com_port));
        attributes.insert("baudRate".to_string(), json!(session.config.baud_rate));
        attributes.insert("bufferedFrames".to_string(), json!(self.buffer.len()));
        vec![RawReading::diagnostic(
            &session.connection_id,
            SourceType::Serial,
            "connection_status",
            if self.is_collecting() { "CONNECTED" } else { "DISCONNECTED" },
            attributes,
        )]
    }

    async fn test(&self) -> bool {
        match self.session.get() {
            Some(session) => Self::open(&session.config).await.is_ok(),
            None => false,
        }
    }

    async fn shutdown(&self) {
        self.collecting.store(false, Ordering::SeqCst);
        self.cancel_reader();
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }
}
