//! 存储层错误类型
//!
//! 统一封装注册表与 data_records 的底层错误：
//! - SQL 执行 / 连接错误
//! - 配置 JSON 解析错误
//! - 校验失败（名称长度、未知类型标签）
//!
//! `kind` 区分可恢复的后端故障与重试无效的永久错误。

/// 存储错误类别。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// 连接、超时等后端故障。
    Backend,
    /// 主键 / 唯一约束冲突（SQLSTATE 23xxx）。
    Conflict,
    /// 表结构或语句错误（SQLSTATE 42xxx、列解码失败）。
    Schema,
    /// 输入校验失败。
    Invalid,
}

#[derive(Debug)]
pub struct StorageError {
    kind: StorageErrorKind,
    message: String,
}

impl StorageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_kind(StorageErrorKind::Backend, message)
    }

    pub fn with_kind(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::with_kind(StorageErrorKind::Conflict, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::with_kind(StorageErrorKind::Invalid, message)
    }

    pub fn kind(&self) -> StorageErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// 重试不会成功的错误。
    pub fn is_permanent(&self) -> bool {
        !matches!(self.kind, StorageErrorKind::Backend)
    }
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for StorageError {}

/// 按 SQLSTATE 类别划分：23 完整性约束，42 语法或对象不存在。
fn kind_of_sqlx(err: &sqlx::Error) -> StorageErrorKind {
    match err {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some(code) if code.starts_with("23") => StorageErrorKind::Conflict,
            Some(code) if code.starts_with("42") => StorageErrorKind::Schema,
            _ => StorageErrorKind::Backend,
        },
        sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. } => StorageErrorKind::Schema,
        _ => StorageErrorKind::Backend,
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        Self::with_kind(kind_of_sqlx(&err), err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid(format!("invalid json: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_errors_are_not_permanent() {
        assert!(!StorageError::new("pool timed out").is_permanent());
        assert!(StorageError::conflict("duplicate record id 1").is_permanent());
        assert!(StorageError::invalid("bad name").is_permanent());
    }

    #[test]
    fn sqlx_decode_errors_are_schema_errors() {
        let err = StorageError::from(sqlx::Error::ColumnNotFound("payload".to_string()));
        assert_eq!(err.kind(), StorageErrorKind::Schema);
        let err = StorageError::from(sqlx::Error::PoolTimedOut);
        assert_eq!(err.kind(), StorageErrorKind::Backend);
    }
}
