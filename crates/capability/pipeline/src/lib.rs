//! # IGW Pipeline 模块
//!
//! 把规范化后的记录并行写入所有激活的存储目的地。
//!
//! - `fanout`：目的地解析、id 分配、按目的地重试与状态回写
//! - `writer`：写入器抽象与标准工厂
//! - `relational` / `object` / `local_file`：四类写入器实现
//! - `layout`：对象键与文件路径的分区规则

pub mod error;
pub mod fanout;
pub mod layout;
pub mod local_file;
pub mod object;
pub mod relational;
pub mod writer;

pub use error::{FanOutError, WriteError};
pub use fanout::{
    DEFAULT_WRITER_CONCURRENCY, DestinationOutcome, Destinations, FanOutReport, FanOutWriter,
    RetryPolicy,
};
pub use local_file::LocalFileWriter;
pub use object::ObjectStoreWriter;
pub use relational::{MssqlWriter, PostgresWriter, RelationalConfig};
pub use writer::{DestinationWriter, LocalRelationalWriter, StandardWriterFactory, WriterFactory};
