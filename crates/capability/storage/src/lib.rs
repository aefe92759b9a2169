//! # IGW Storage 模块
//!
//! 连接注册表与本地 data_records 的存储抽象层。
//!
//! ## 架构设计
//!
//! 1. **接口抽象层** (`traits.rs`)：ConnectionStore / StorageDefStore / DataRecordStore
//! 2. **数据模型层** (`models.rs`)：部分更新结构与统计概况
//! 3. **错误处理层** (`error.rs`)：统一的存储错误类型
//! 4. **校验层** (`validation.rs`)：名称约束与连接状态迁移规则
//! 5. **连接管理层** (`connection.rs`)：数据库连接池
//! 6. **表结构** (`schema.rs`)：启动时幂等建表
//! 7. **实现层**：
//!    - `in_memory/`：未配置数据库时使用，也用于测试
//!    - `postgres/`：PostgreSQL 实现
//!
//! ## 核心约束
//!
//! - 任意时刻最多一个默认存储，切换默认是一次原子写
//! - `list_active_storages` 总是包含默认存储
//! - 连接状态按监督器会话号（epoch）单调推进，过期会话的更新被拒绝
//! - 配置表对注册表不透明，仅以 JSON 文本保存

pub mod connection;
pub mod error;
pub mod in_memory;
pub mod models;
pub mod postgres;
pub mod schema;
pub mod traits;
pub mod validation;

pub use connection::*;
pub use error::*;
pub use models::*;
pub use schema::ensure_schema;
pub use traits::*;
pub use validation::*;

pub use in_memory::{InMemoryConnectionStore, InMemoryDataRecordStore, InMemoryStorageDefStore};

pub use postgres::{PgConnectionStore, PgDataRecordStore, PgStorageDefStore};
