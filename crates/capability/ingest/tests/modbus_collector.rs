use async_trait::async_trait;
use domain::{ConnectionDef, ConnectionStatus, Quality, ReadingFields, RegisterType, SourceType};
use igw_ingest::{Collector, CollectorError, ModbusCollector, StatusSink};
use igw_protocol::{ModbusTcpConfig, ProtocolError, RegisterTransport, TransportConnector};
use igw_retry::RetryStrategy;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
struct FakeDevice {
    reads: Arc<Mutex<VecDeque<Result<Vec<u16>, ()>>>>,
    writes: Arc<Mutex<Vec<(u16, u16)>>>,
}

struct FakeSession {
    device: FakeDevice,
}

#[async_trait]
impl TransportConnector for FakeDevice {
    async fn connect(
        &self,
        _config: &ModbusTcpConfig,
    ) -> Result<Box<dyn RegisterTransport>, ProtocolError> {
        Ok(Box::new(FakeSession {
            device: self.clone(),
        }))
    }
}

#[async_trait]
impl RegisterTransport for FakeSession {
    async fn read(
        &mut self,
        _register_type: RegisterType,
        _address: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, ProtocolError> {
        match self.device.reads.lock().expect("reads").pop_front() {
            Some(Ok(values)) => Ok(values),
            Some(Err(())) => Err(ProtocolError::ConnectionTimeout),
            None => Ok(vec![1; quantity as usize]),
        }
    }

    async fn write_register(&mut self, address: u16, value: u16) -> Result<(), ProtocolError> {
        self.device.writes.lock().expect("writes").push((address, value));
        Ok(())
    }

    async fn write_coil(&mut self, address: u16, value: bool) -> Result<(), ProtocolError> {
        self.device
            .writes
            .lock()
            .expect("writes")
            .push((address, u16::from(value)));
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ProtocolError> {
        Ok(())
    }
}

fn modbus_def(register_type: &str) -> ConnectionDef {
    let config = json!({
        "ipAddress": "10.0.0.5",
        "port": 502,
        "slaveId": 1,
        "registerType": register_type,
        "startAddress": 100,
        "quantity": 3,
        "pollInterval": 1000
    });
    ConnectionDef::new(
        "conn-1",
        "boiler",
        SourceType::ModbusTcp,
        config.as_object().cloned().unwrap_or_default(),
    )
}

fn collector(device: &FakeDevice) -> ModbusCollector {
    ModbusCollector::with_connector(Arc::new(device.clone())).with_retry(RetryStrategy::new(
        3,
        Duration::from_millis(1),
        Duration::from_millis(4),
        2.0,
    ))
}

fn register_values(readings: &[domain::RawReading]) -> Vec<(u16, i64)> {
    readings
        .iter()
        .filter_map(|reading| match &reading.fields {
            ReadingFields::Register { register, value, .. } => Some((*register, *value)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn start_reports_connecting_then_active_and_reads_registers() {
    let device = FakeDevice::default();
    device.reads.lock().expect("reads").push_back(Ok(vec![42, 7, 9]));
    let collector = collector(&device);
    let (sink, mut updates) = StatusSink::channel("conn-1", 1, 16);
    collector.initialize(&modbus_def("holding"), sink).await.expect("init");
    assert_eq!(collector.poll_interval(), Some(Duration::from_millis(1000)));

    collector.start(CancellationToken::new()).await.expect("start");
    assert!(collector.is_collecting());
    assert_eq!(updates.recv().await.map(|u| u.status), Some(ConnectionStatus::Connecting));
    assert_eq!(updates.recv().await.map(|u| u.status), Some(ConnectionStatus::Active));

    let readings = collector.read_latest().await.expect("read");
    assert_eq!(register_values(&readings), vec![(100, 42), (101, 7), (102, 9)]);
    assert!(readings.iter().all(|r| r.quality == Quality::Good && r.source_id == "conn-1"));
}

#[tokio::test]
async fn exhausted_retries_report_error_then_recover_to_active() {
    let device = FakeDevice::default();
    {
        let mut reads = device.reads.lock().expect("reads");
        for _ in 0..6 {
            reads.push_back(Err(()));
        }
        reads.push_back(Ok(vec![42, 7, 9]));
    }
    let collector = collector(&device);
    let (sink, mut updates) = StatusSink::channel("conn-1", 1, 16);
    collector.initialize(&modbus_def("holding"), sink).await.expect("init");
    collector.start(CancellationToken::new()).await.expect("start");
    updates.recv().await;
    updates.recv().await;

    for _ in 0..2 {
        let readings = collector.read_latest().await.expect("read");
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].quality, Quality::Bad);
        assert_eq!(readings[0].error_text.as_deref(), Some("timeout"));
        assert_eq!(register_values(&readings), vec![(100, -999)]);
    }
    let update = updates.recv().await.expect("error update");
    assert_eq!(update.status, ConnectionStatus::Error);
    assert_eq!(update.error.as_deref(), Some("timeout"));

    let readings = collector.read_latest().await.expect("read");
    assert_eq!(readings.len(), 3);
    assert_eq!(updates.recv().await.map(|u| u.status), Some(ConnectionStatus::Active));
    assert!(updates.try_recv().is_err());
}

#[tokio::test]
async fn write_follows_register_type() {
    let device = FakeDevice::default();
    let holding = collector(&device);
    let (sink, _updates) = StatusSink::channel("conn-1", 1, 16);
    holding.initialize(&modbus_def("holding"), sink).await.expect("init");
    holding.start(CancellationToken::new()).await.expect("start");
    assert!(holding.write("10", &json!(500)).await.expect("write"));
    let err = holding.write("10", &json!(70000)).await.expect_err("too large");
    assert!(matches!(err, CollectorError::Config(_)));

    let coil = collector(&device);
    let (sink, _updates) = StatusSink::channel("conn-2", 1, 16);
    coil.initialize(&modbus_def("coil"), sink).await.expect("init");
    coil.start(CancellationToken::new()).await.expect("start");
    assert!(coil.write("11", &json!(true)).await.expect("write"));
    assert!(coil.write("12", &json!(0)).await.expect("write"));
    assert_eq!(
        *device.writes.lock().expect("writes"),
        vec![(10, 500), (11, 1), (12, 0)]
    );

    let input = collector(&device);
    let (sink, _updates) = StatusSink::channel("conn-3", 1, 16);
    input.initialize(&modbus_def("input"), sink).await.expect("init");
    input.start(CancellationToken::new()).await.expect("start");
    let err = input.write("1", &json!(1)).await.expect_err("read only");
    assert!(matches!(err, CollectorError::Unsupported(_)));
}

#[tokio::test]
async fn invalid_config_is_fatal_and_diagnostics_report_state() {
    let device = FakeDevice::default();
    let broken = collector(&device);
    let mut def = modbus_def("holding");
    def.config.insert("quantity".to_string(), json!(126));
    let (sink, _updates) = StatusSink::channel("conn-1", 1, 16);
    let err = broken.initialize(&def, sink).await.expect_err("quantity");
    assert!(err.is_fatal());
    assert!(matches!(broken.read_latest().await, Err(CollectorError::NotInitialized)));

    let collector = collector(&device);
    let (sink, _updates) = StatusSink::channel("conn-1", 1, 16);
    collector.initialize(&modbus_def("holding"), sink).await.expect("init");
    collector.start(CancellationToken::new()).await.expect("start");
    let diagnostics = collector.diagnostics().await;
    match &diagnostics[0].fields {
        ReadingFields::Diagnostic { kind, value, attributes } => {
            assert_eq!(kind, "connection_status");
            assert_eq!(value, "CONNECTED");
            assert_eq!(attributes.get("address"), Some(&json!("10.0.0.5")));
            assert_eq!(attributes.get("port"), Some(&json!("502")));
        }
        other => panic!("unexpected fields: {:?}", other),
    }

    collector.stop().await.expect("stop");
    assert!(!collector.is_collecting());
    assert!(collector.read_latest().await.expect("read").is_empty());
}
