use chrono::{TimeZone, Utc};
use domain::{
    ConnectionDef, ConnectionStatus, DataRecord, DataStatus, Provenance, SourceType, StorageDef,
    StorageKind, StorageStatus,
};

#[test]
fn record_json_keeps_provenance_and_top_level_fields() {
    let captured = Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).single().expect("time");
    let mut record = DataRecord::new("conn-1", "modbus_tcp", r#"{"register":100,"value":42}"#, captured);
    record.id = Some(7);
    record.destination_id = Some(1);
    record.provenance = Some(Provenance {
        connection_id: "conn-1".to_string(),
        connection_name: "plc-a".to_string(),
        timestamp: captured.to_rfc3339(),
        source_type: SourceType::ModbusTcp,
    });

    let json = serde_json::to_string(&record).expect("serialize");
    assert!(json.contains("\"sourceId\":\"conn-1\""));
    assert!(json.contains("\"status\":\"RECEIVED\""));

    let back: DataRecord = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back.provenance, record.provenance);
    assert_eq!(back.id, Some(7));
    assert_eq!(back.timestamp, captured);
    assert_eq!(back.status, DataStatus::Received);
}

#[test]
fn metadata_column_round_trips_provenance() {
    let mut record = DataRecord::new("conn-2", "mqtt", "{}", Utc::now());
    assert!(record.metadata_json().is_none());
    record.provenance = Some(Provenance {
        connection_id: "conn-2".to_string(),
        connection_name: "broker".to_string(),
        timestamp: "2024-05-01T08:30:00+00:00".to_string(),
        source_type: SourceType::Mqtt,
    });
    let metadata = record.metadata_json();
    assert_eq!(
        DataRecord::provenance_from_metadata(metadata.as_deref()),
        record.provenance
    );
}

#[test]
fn new_definitions_start_in_resting_state() {
    let connection = ConnectionDef::new("c1", "line-1", SourceType::Serial, Default::default());
    assert_eq!(connection.status, ConnectionStatus::Offline);
    assert_eq!(connection.status_epoch, 0);

    let storage = StorageDef::new("local", StorageKind::LocalFile, Default::default()).as_default();
    assert!(storage.is_default);
    assert!(storage.active);
    assert_eq!(storage.status, StorageStatus::Configured);
}
