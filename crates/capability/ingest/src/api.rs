//! HTTP API 采集器
//!
//! 每次 `read_latest` 发起一次 GET，响应体原样作为读数；非 2xx 视为瞬时传输错误。

use crate::collector::{Collector, StatusSink};
use crate::error::CollectorError;
use async_trait::async_trait;
use domain::{ConfigReader, ConnectionDef, ConnectionStatus, RawReading, ReadingFields, SourceType};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{Map, Value, json};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// API 连接配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub url: String,
    pub timeout: Duration,
    pub headers: Vec<(String, String)>,
}

impl ApiConfig {
    pub fn from_config(config: &domain::ConfigMap) -> Result<Self, CollectorError> {
        let reader = ConfigReader::new(config);
        let url = reader.read_string("url")?;
        if !is_absolute_url(&url) {
            return Err(CollectorError::Config(format!("invalid value for url: {}", url)));
        }
        let timeout_ms = reader.read_u64_in_range_with_default("timeoutMs", 1, 600_000, 5000)?;
        Ok(Self {
            url,
            timeout: Duration::from_millis(timeout_ms),
            headers: reader.read_string_map("headers"),
        })
    }

    fn header_map(&self) -> Result<HeaderMap, CollectorError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| CollectorError::Config(format!("invalid header name: {}", name)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| CollectorError::Config(format!("invalid header value for {}", name)))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

fn is_absolute_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

struct ApiSession {
    connection_id: String,
    config: ApiConfig,
    client: reqwest::Client,
    status: StatusSink,
}

/// HTTP API 采集器
#[derive(Default)]
pub struct ApiCollector {
    session: OnceLock<ApiSession>,
    collecting: AtomicBool,
    degraded: AtomicBool,
}

impl ApiCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn session(&self) -> Result<&ApiSession, CollectorError> {
        self.session.get().ok_or(CollectorError::NotInitialized)
    }

    async fn fetch(session: &ApiSession) -> Result<String, CollectorError> {
        let response = session
            .client
            .get(&session.config.url)
            .send()
            .await
            .map_err(|err| CollectorError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(CollectorError::Transport(format!("http status {}", status.as_u16())));
        }
        response
            .text()
            .await
            .map_err(|err| CollectorError::Transport(err.to_string()))
    }
}

#[async_trait]
impl Collector for ApiCollector {
    fn source_type(&self) -> SourceType {
        SourceType::Api
    }

    async fn initialize(&self, def: &ConnectionDef, status: StatusSink) -> Result<(), CollectorError> {
        let config = ApiConfig::from_config(&def.config)?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(config.header_map()?)
            .build()
            .map_err(|err| CollectorError::Config(err.to_string()))?;
        self.session
            .set(ApiSession {
                connection_id: def.id.clone(),
                config,
                client,
                status,
            })
            .map_err(|_| CollectorError::Fatal("collector already initialized".to_string()))
    }

    async fn start(&self, _cancel: CancellationToken) -> Result<(), CollectorError> {
        let session = self.session()?;
        if !self.collecting.swap(true, Ordering::SeqCst) {
            session.status.report(ConnectionStatus::Connecting).await;
            session.status.report(ConnectionStatus::Active).await;
            info!(target: "igw.ingest", connection_id = %session.connection_id, url = %session.config.url, "api_collection_started");
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), CollectorError> {
        self.session()?;
        self.collecting.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_collecting(&self) -> bool {
        self.collecting.load(Ordering::SeqCst)
    }

    async fn read_latest(&self) -> Result<Vec<RawReading>, CollectorError> {
        let session = self.session()?;
        if !self.is_collecting() {
            return Ok(Vec::new());
        }
        match Self::fetch(session).await {
            Ok(body) => {
                if self.degraded.swap(false, Ordering::SeqCst) {
                    session.status.report(ConnectionStatus::Active).await;
                }
                Ok(vec![RawReading::good(
                    &session.connection_id,
                    SourceType::Api,
                    ReadingFields::Api { body },
                )])
            }
            Err(err) => {
                if !self.degraded.swap(true, Ordering::SeqCst) {
                    warn!(target: "igw.ingest", connection_id = %session.connection_id, error = %err, "api_fetch_failed");
                    session.status.report_error(&err).await;
                }
                Err(err)
            }
        }
    }

    async fn write(&self, address: &str, value: &Value) -> Result<bool, CollectorError> {
        let session = self.session()?;
        let target = if is_absolute_url(address) {
            address
        } else {
            session.config.url.as_str()
        };
        let response = session
            .client
            .post(target)
            .json(value)
            .send()
            .await
            .map_err(|err| CollectorError::Transport(err.to_string()))?;
        Ok(response.status().is_success())
    }

    async fn diagnostics(&self) -> Vec<RawReading> {
        let Some(session) = self.session.get() else {
            return Vec::new();
        };
        let mut attributes = Map::new();
        attributes.insert("url".to_string(), json!(session.config.url));
        let value = if !self.is_collecting() {
            "DISCONNECTED"
        } else if self.degraded.load(Ordering::SeqCst) {
            "DEGRADED"
        } else {
            "CONNECTED"
        };
        vec![RawReading::diagnostic(
            &session.connection_id,
            SourceType::Api,
            "connection_status",
            value,
            attributes,
        )]
    }

    async fn test(&self) -> bool {
        match self.session.get() {
            Some(session) => Self::fetch(session).await.is_ok(),
            None => false,
        }
    }

    async fn shutdown(&self) {
        self.collecting.store(false, Ordering::SeqCst);
    }
}
