use domain::{ObjectStoreProvider, StorageDef, StorageKind, StorageStatus};
use igw_storage::{InMemoryStorageDefStore, StorageDefStore, StorageUpdate};

fn def(name: &str, kind: StorageKind) -> StorageDef {
    StorageDef::new(name, kind, Default::default())
}

#[tokio::test]
async fn set_default_switches_exactly_one() {
    let store = InMemoryStorageDefStore::new();
    let first = store
        .create_storage(def("local-db", StorageKind::LocalRelational).as_default())
        .await
        .expect("first");
    let second = store
        .create_storage(def("archive", StorageKind::LocalFile))
        .await
        .expect("second");
    let third = store
        .create_storage(def("bucket", StorageKind::ObjectStore(ObjectStoreProvider::S3)))
        .await
        .expect("third");

    assert!(store.set_default(second.id).await.expect("switch"));

    let all = store.list_storages().await.expect("list");
    let defaults: Vec<i64> = all.iter().filter(|def| def.is_default).map(|def| def.id).collect();
    assert_eq!(defaults, vec![second.id]);
    let first_after = all.iter().find(|def| def.id == first.id).expect("first");
    assert!(!first_after.is_default);
    let third_after = all.iter().find(|def| def.id == third.id).expect("third");
    assert_eq!(third_after, &third);
}

#[tokio::test]
async fn set_default_twice_equals_once() {
    let store = InMemoryStorageDefStore::new();
    let a = store
        .create_storage(def("alpha", StorageKind::LocalFile))
        .await
        .expect("a");
    let b = store
        .create_storage(def("bravo", StorageKind::LocalRelational))
        .await
        .expect("b");
    assert!(store.set_default(a.id).await.expect("a"));
    assert!(store.set_default(b.id).await.expect("b"));
    let once = store.list_storages().await.expect("list");
    assert!(store.set_default(b.id).await.expect("b again"));
    assert_eq!(store.list_storages().await.expect("list"), once);
    assert!(!store.set_default(999).await.expect("missing"));
    assert_eq!(store.find_default().await.expect("default").map(|def| def.id), Some(b.id));
}

#[tokio::test]
async fn active_set_always_contains_default() {
    let store = InMemoryStorageDefStore::new();
    let local = store
        .create_storage(def("local-db", StorageKind::LocalRelational).as_default())
        .await
        .expect("local");
    let inactive = store
        .create_storage(def("cold", StorageKind::LocalFile))
        .await
        .expect("cold");
    store
        .update_storage(local.id, StorageUpdate { active: Some(false), ..Default::default() })
        .await
        .expect("update");
    store
        .update_storage(inactive.id, StorageUpdate { active: Some(false), ..Default::default() })
        .await
        .expect("update");

    let active: Vec<i64> = store
        .list_active_storages()
        .await
        .expect("active")
        .iter()
        .map(|def| def.id)
        .collect();
    assert_eq!(active, vec![local.id]);
}

#[tokio::test]
async fn create_default_if_none_keeps_existing() {
    let store = InMemoryStorageDefStore::new();
    let created = store
        .create_default_if_none(def("local-default", StorageKind::LocalRelational))
        .await
        .expect("create");
    assert!(created.is_default);
    let again = store
        .create_default_if_none(def("other-default", StorageKind::LocalFile))
        .await
        .expect("existing");
    assert_eq!(again.id, created.id);
    assert_eq!(store.list_storages().await.expect("list").len(), 1);
}

#[tokio::test]
async fn storage_name_length_is_validated() {
    let store = InMemoryStorageDefStore::new();
    store
        .create_storage(def("ab", StorageKind::LocalFile))
        .await
        .expect_err("too short");
}

#[tokio::test]
async fn status_summary_reflects_default() {
    let store = InMemoryStorageDefStore::new();
    let summary = store.storage_status_summary().await.expect("summary");
    assert!(!summary.configured);

    let local = store
        .create_storage(def("local-db", StorageKind::LocalRelational).as_default())
        .await
        .expect("local");
    store
        .create_storage(def("bucket", StorageKind::ObjectStore(ObjectStoreProvider::Gcs)))
        .await
        .expect("bucket");
    assert!(store
        .mark_storage_status(local.id, StorageStatus::Error, Some("disk full"))
        .await
        .expect("mark"));

    let summary = store.storage_status_summary().await.expect("summary");
    assert!(summary.configured);
    assert_eq!(summary.default_name.as_deref(), Some("local-db"));
    assert_eq!(summary.default_status, Some(StorageStatus::Error));
    assert_eq!(summary.total, 2);
    assert_eq!(summary.active, 2);
    let stored = store.find_storage(local.id).await.expect("find").expect("exists");
    assert_eq!(stored.last_error.as_deref(), Some("disk full"));
    assert!(stored.last_tested_at.is_some());
}
