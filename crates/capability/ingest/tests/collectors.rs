use domain::{ConnectionDef, ConnectionStatus, ReadingFields, SerialData, SourceType};
use igw_ingest::{
    ApiCollector, Collector, CollectorError, CollectorFactory, LatestValueMap, MqttCollector,
    SerialCollector, StatusSink,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

fn def(source_type: SourceType, config: serde_json::Value) -> ConnectionDef {
    ConnectionDef::new(
        "conn-1",
        "source",
        source_type,
        config.as_object().cloned().unwrap_or_default(),
    )
}

#[test]
fn latest_value_map_keeps_last_value_per_topic() {
    let map = LatestValueMap::new();
    map.insert("sensors/a", b"1".to_vec());
    map.insert("sensors/a", b"2".to_vec());
    map.insert("sensors/b", b"9".to_vec());
    let mut snapshot: Vec<(String, Vec<u8>)> = map
        .snapshot()
        .into_iter()
        .map(|(topic, payload, _)| (topic, payload))
        .collect();
    snapshot.sort();
    assert_eq!(
        snapshot,
        vec![
            ("sensors/a".to_string(), b"2".to_vec()),
            ("sensors/b".to_string(), b"9".to_vec()),
        ]
    );
    assert_eq!(map.len(), 2);
}

#[tokio::test]
async fn mqtt_read_latest_snapshots_without_clearing() {
    let collector = MqttCollector::new();
    let (sink, _updates) = StatusSink::channel("conn-1", 1, 16);
    collector
        .initialize(
            &def(SourceType::Mqtt, json!({ "host": "broker", "port": 1883, "topic": "sensors/#" })),
            sink,
        )
        .await
        .expect("init");
    collector.latest().insert("sensors/a", b"1".to_vec());
    collector.latest().insert("sensors/a", b"2".to_vec());
    collector.latest().insert("sensors/b", b"9".to_vec());

    for _ in 0..2 {
        let mut topics: Vec<(String, Vec<u8>)> = collector
            .read_latest()
            .await
            .expect("read")
            .into_iter()
            .filter_map(|reading| match reading.fields {
                ReadingFields::Topic { topic, payload } => Some((topic, payload)),
                _ => None,
            })
            .collect();
        topics.sort();
        assert_eq!(
            topics,
            vec![
                ("sensors/a".to_string(), b"2".to_vec()),
                ("sensors/b".to_string(), b"9".to_vec()),
            ]
        );
    }

    // 未连上 broker 时发布直接返回 false。
    assert!(!collector.write("cmd/a", &json!({ "on": true })).await.expect("write"));
    let diagnostics = collector.diagnostics().await;
    assert_eq!(diagnostics.len(), 2);
    match &diagnostics[1].fields {
        ReadingFields::Diagnostic { kind, attributes, .. } => {
            assert_eq!(kind, "subscription_status");
            assert_eq!(attributes.get("active_topics"), Some(&json!(2)));
            assert_eq!(attributes.get("topic"), Some(&json!("sensors/#")));
        }
        other => panic!("unexpected fields: {:?}", other),
    }
}

#[tokio::test]
async fn mqtt_config_requires_host() {
    let collector = MqttCollector::new();
    let (sink, _updates) = StatusSink::channel("conn-1", 1, 16);
    let err = collector
        .initialize(&def(SourceType::Mqtt, json!({ "port": 1883 })), sink)
        .await
        .expect_err("host");
    assert!(matches!(err, CollectorError::Config(_)));
}

#[tokio::test]
async fn serial_collector_frames_device_stream() {
    let dir = tempfile::tempdir().expect("tempdir");
    let device = dir.path().join("ttyFAKE0");
    tokio::fs::write(&device, b"T=21.5\nT=21.6\n").await.expect("device");

    let collector = SerialCollector::new();
    let (sink, mut updates) = StatusSink::channel("conn-1", 1, 16);
    collector
        .initialize(
            &def(SourceType::Serial, json!({ "comPort": device.to_string_lossy() })),
            sink,
        )
        .await
        .expect("init");
    collector.start(CancellationToken::new()).await.expect("start");
    assert_eq!(updates.recv().await.map(|u| u.status), Some(ConnectionStatus::Connecting));

    // 普通文件读到 EOF 后读取任务结束。
    for _ in 0..100 {
        if !collector.is_collecting() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let frames: Vec<SerialData> = collector
        .read_latest()
        .await
        .expect("read")
        .into_iter()
        .filter_map(|reading| match reading.fields {
            ReadingFields::Serial { data } => Some(data),
            _ => None,
        })
        .collect();
    assert_eq!(
        frames,
        vec![
            SerialData::Text("T=21.5".to_string()),
            SerialData::Text("T=21.6".to_string()),
        ]
    );
    assert!(collector.read_latest().await.expect("drained").is_empty());
    collector.shutdown().await;
}

#[tokio::test]
async fn serial_missing_device_fails_start() {
    let collector = SerialCollector::new();
    let (sink, _updates) = StatusSink::channel("conn-1", 1, 16);
    collector
        .initialize(
            &def(SourceType::Serial, json!({ "comPort": "/nonexistent/ttyS99" })),
            sink,
        )
        .await
        .expect("init");
    assert!(!collector.test().await);
    let err = collector
        .start(CancellationToken::new())
        .await
        .expect_err("missing device");
    assert!(err.is_fatal());
}

async fn serve_once(status_line: &'static str, body: &'static str) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut request = vec![0u8; 4096];
            let _ = socket.read(&mut request).await;
            let response = format!(
                "{}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });
    format!("http://{}/telemetry", addr)
}

#[tokio::test]
async fn api_collector_reads_body_and_flags_http_errors() {
    let url = serve_once("HTTP/1.1 200 OK", r#"{"temp":21.5}"#).await;
    let collector = ApiCollector::new();
    let (sink, _updates) = StatusSink::channel("conn-1", 1, 16);
    collector
        .initialize(&def(SourceType::Api, json!({ "url": url, "timeoutMs": 2000 })), sink)
        .await
        .expect("init");
    collector.start(CancellationToken::new()).await.expect("start");
    let readings = collector.read_latest().await.expect("read");
    assert_eq!(
        readings[0].fields,
        ReadingFields::Api {
            body: r#"{"temp":21.5}"#.to_string()
        }
    );

    let url = serve_once("HTTP/1.1 503 Service Unavailable", "").await;
    let failing = ApiCollector::new();
    let (sink, mut updates) = StatusSink::channel("conn-2", 1, 16);
    failing
        .initialize(&def(SourceType::Api, json!({ "url": url })), sink)
        .await
        .expect("init");
    failing.start(CancellationToken::new()).await.expect("start");
    let err = failing.read_latest().await.expect_err("503");
    assert!(matches!(err, CollectorError::Transport(_)));
    assert!(!err.is_fatal());
    updates.recv().await;
    updates.recv().await;
    assert_eq!(updates.recv().await.map(|u| u.status), Some(ConnectionStatus::Error));
}

#[tokio::test]
async fn factory_rejects_unregistered_source_types() {
    let factory = CollectorFactory::with_defaults();
    for source_type in SourceType::ALL {
        assert!(factory.supports(source_type));
        assert_eq!(factory.create(source_type).expect("create").source_type(), source_type);
    }

    let factory = CollectorFactory::new().register(SourceType::Api, || Arc::new(ApiCollector::new()));
    let err = factory.create(SourceType::Mqtt).err().expect("unsupported");
    assert!(matches!(err, CollectorError::UnsupportedSourceType(SourceType::Mqtt)));
    assert!(err.is_fatal());
}
