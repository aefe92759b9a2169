//! 注册表校验与状态迁移规则
//!
//! - validate_connection_name：连接名非空
//! - validate_storage_name：存储名 3 到 50 个字符
//! - validate_single_local_relational：本地关系型存储只允许一个
//! - apply_status_update：按会话号与迁移表应用状态更新
//!
//! 内存实现与 Postgres 实现共用这里的规则，保证两者行为一致。

use crate::error::StorageError;
use chrono::{DateTime, Utc};
use domain::{ConnectionDef, ConnectionStatus, StatusUpdate, StorageDef, StorageKind};

pub fn validate_connection_name(name: &str) -> Result<(), StorageError> {
    if name.trim().is_empty() {
        return Err(StorageError::invalid("connection name required"));
    }
    Ok(())
}

pub fn validate_storage_name(name: &str) -> Result<(), StorageError> {
    let len = name.trim().chars().count();
    if !(3..=50).contains(&len) {
        return Err(StorageError::invalid("storage name must be 3-50 characters"));
    }
    Ok(())
}

/// 本地关系型存储共用同一张 data_records 表，注册表中只能有一个。
///
/// `candidate_id` 为正在更新的定义（新建时传 0）。
pub fn validate_single_local_relational<'a>(
    existing: impl IntoIterator<Item = &'a StorageDef>,
    candidate_id: i64,
    kind: StorageKind,
) -> Result<(), StorageError> {
    if kind != StorageKind::LocalRelational {
        return Ok(());
    }
    let taken = existing
        .into_iter()
        .any(|def| def.id != candidate_id && def.kind == StorageKind::LocalRelational);
    if taken {
        return Err(StorageError::conflict(
            "a local relational storage is already defined",
        ));
    }
    Ok(())
}

/// 应用状态更新，返回是否被接受。
///
/// - 会话号小于当前记录：过期更新，拒绝
/// - 会话号更大：新会话，接受任意状态
/// - 同一会话：相同状态幂等接受，其余按 `can_transition_to` 校验
pub fn apply_status_update(
    def: &mut ConnectionDef,
    update: &StatusUpdate,
    now: DateTime<Utc>,
) -> bool {
    if update.epoch < def.status_epoch {
        return false;
    }
    let same_session = update.epoch == def.status_epoch;
    if same_session && def.status == update.status {
        if update.error.is_some() {
            def.last_error = update.error.clone();
            def.updated_at = now;
        }
        return true;
    }
    if same_session && !def.status.can_transition_to(update.status) {
        return false;
    }
    def.status = update.status;
    def.status_epoch = update.epoch;
    match update.status {
        ConnectionStatus::Active => {
            def.last_error = None;
            def.last_connected_at = Some(now);
        }
        ConnectionStatus::Error => def.last_error = update.error.clone(),
        ConnectionStatus::Connecting | ConnectionStatus::Offline => {
            if update.error.is_some() {
                def.last_error = update.error.clone();
            }
        }
    }
    def.updated_at = now;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::SourceType;

    fn def() -> ConnectionDef {
        ConnectionDef::new("c1", "plc", SourceType::ModbusTcp, Default::default())
    }

    #[test]
    fn stale_epoch_is_rejected() {
        let mut def = def();
        let now = Utc::now();
        assert!(apply_status_update(&mut def, &StatusUpdate::new("c1", 2, ConnectionStatus::Connecting), now));
        assert!(!apply_status_update(&mut def, &StatusUpdate::new("c1", 1, ConnectionStatus::Active), now));
        assert_eq!(def.status, ConnectionStatus::Connecting);
        assert_eq!(def.status_epoch, 2);
    }

    #[test]
    fn active_session_cannot_regress_to_connecting() {
        let mut def = def();
        let now = Utc::now();
        for status in [ConnectionStatus::Connecting, ConnectionStatus::Active] {
            assert!(apply_status_update(&mut def, &StatusUpdate::new("c1", 1, status), now));
        }
        assert!(def.last_connected_at.is_some());
        assert!(!apply_status_update(&mut def, &StatusUpdate::new("c1", 1, ConnectionStatus::Connecting), now));
        let error = StatusUpdate::new("c1", 1, ConnectionStatus::Error).with_error("timeout");
        assert!(apply_status_update(&mut def, &error, now));
        assert_eq!(def.last_error.as_deref(), Some("timeout"));
        assert!(apply_status_update(&mut def, &StatusUpdate::new("c1", 1, ConnectionStatus::Connecting), now));
    }

    #[test]
    fn second_local_relational_is_a_conflict() {
        let mut local = StorageDef::new("local-db", StorageKind::LocalRelational, Default::default());
        local.id = 1;
        let existing = [local];
        let err = validate_single_local_relational(&existing, 0, StorageKind::LocalRelational)
            .expect_err("second local");
        assert_eq!(err.kind(), crate::error::StorageErrorKind::Conflict);
        assert!(validate_single_local_relational(&existing, 1, StorageKind::LocalRelational).is_ok());
        assert!(validate_single_local_relational(&existing, 0, StorageKind::LocalFile).is_ok());
    }

    #[test]
    fn storage_name_bounds() {
        assert!(validate_storage_name("ab").is_err());
        assert!(validate_storage_name("abc").is_ok());
        assert!(validate_storage_name(&"x".repeat(50)).is_ok());
        assert!(validate_storage_name(&"x".repeat(51)).is_err());
    }
}
