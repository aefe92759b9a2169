//! 内存存储实现模块
//!
//! 未配置数据库时使用，也用于测试。
//!
//! 包含以下实现：
//! - ConnectionStore: InMemoryConnectionStore
//! - StorageDefStore: InMemoryStorageDefStore
//! - DataRecordStore: InMemoryDataRecordStore

pub mod connection_def;
pub mod data_record;
pub mod storage_def;

pub use connection_def::*;
pub use data_record::*;
pub use storage_def::*;
