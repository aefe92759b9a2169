use domain::{ConnectionDef, ConnectionStatus, SourceType, StatusUpdate};
use igw_storage::{ConnectionStore, ConnectionUpdate, InMemoryConnectionStore};

fn modbus_def() -> ConnectionDef {
    let config = serde_json::json!({ "ipAddress": "10.0.0.5", "port": 502 });
    let config = config.as_object().cloned().unwrap_or_default();
    ConnectionDef::new("", "plc-a", SourceType::ModbusTcp, config)
}

#[tokio::test]
async fn create_assigns_id_and_rejects_empty_name() {
    let store = InMemoryConnectionStore::new();
    let created = store.create_connection(modbus_def()).await.expect("create");
    assert!(!created.id.is_empty());
    assert_eq!(created.status, ConnectionStatus::Offline);

    let mut nameless = modbus_def();
    nameless.name = "  ".to_string();
    store
        .create_connection(nameless)
        .await
        .expect_err("empty name");
}

#[tokio::test]
async fn update_and_delete_round_trip() {
    let store = InMemoryConnectionStore::new();
    let created = store.create_connection(modbus_def()).await.expect("create");
    let updated = store
        .update_connection(
            &created.id,
            ConnectionUpdate {
                name: Some("plc-b".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect("update")
        .expect("exists");
    assert_eq!(updated.name, "plc-b");
    assert_eq!(updated.config, created.config);

    assert!(store.delete_connection(&created.id).await.expect("delete"));
    assert!(!store.delete_connection(&created.id).await.expect("delete twice"));
    assert!(store.find_connection(&created.id).await.expect("find").is_none());
}

#[tokio::test]
async fn mark_status_is_idempotent_and_epoch_monotonic() {
    let store = InMemoryConnectionStore::new();
    let created = store.create_connection(modbus_def()).await.expect("create");
    let id = created.id.as_str();

    let connecting = StatusUpdate::new(id, 1, ConnectionStatus::Connecting);
    assert!(store.mark_status(&connecting).await.expect("connecting"));
    let active = StatusUpdate::new(id, 1, ConnectionStatus::Active);
    assert!(store.mark_status(&active).await.expect("active"));
    assert!(store.mark_status(&active).await.expect("active again"));

    // 同一会话内 Active 不能回退到 Connecting。
    assert!(!store.mark_status(&connecting).await.expect("regress"));

    // 旧会话的迟到更新被拒绝。
    let next = StatusUpdate::new(id, 2, ConnectionStatus::Connecting);
    assert!(store.mark_status(&next).await.expect("new session"));
    let stale = StatusUpdate::new(id, 1, ConnectionStatus::Error).with_error("late");
    assert!(!store.mark_status(&stale).await.expect("stale"));

    let def = store.find_connection(id).await.expect("find").expect("exists");
    assert_eq!(def.status, ConnectionStatus::Connecting);
    assert_eq!(def.status_epoch, 2);
    assert!(def.last_connected_at.is_some());
    assert!(def.last_error.is_none());
}

#[tokio::test]
async fn mark_status_for_unknown_connection_is_not_applied() {
    let store = InMemoryConnectionStore::new();
    let update = StatusUpdate::new("missing", 1, ConnectionStatus::Connecting);
    assert!(!store.mark_status(&update).await.expect("mark"));
}
